//! Summarization Orchestrator
//!
//! Picks threads that need a summary, renders a bounded prompt, drives the
//! gateway and persists the structured result. A failing thread never aborts
//! a batch; every summary write is one transaction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use rusqlite::TransactionBehavior;
use serde::Serialize;
use tracing::{error, info, warn};

use super::gateway::SummaryGateway;
use super::truncate::render_thread;
use crate::adapters::sqlite::{failures, from_millis, messages, queries, summaries, threads, DbPool};
use crate::config::SummarizeConfig;
use crate::error::{DigestError, Result};
use crate::types::{Summary, SummaryKind, Thread};

const THREAD_SYSTEM_PROMPT: &str = "You summarize Linux kernel mailing list threads for busy \
maintainers. Reply with a single JSON object and nothing else, using these fields: \
\"tldr\" (one or two sentences), \"key_points\" (array of short strings), \"subsystems\" \
(array of affected kernel subsystems), \"important_changes\" (object with \"resolution\", \
\"action_items\" (array), \"discussion_summary\", \"thread_type\"), and \"importance\" \
(one of low, medium, high, critical).";

const DIGEST_SYSTEM_PROMPT: &str = "You write periodic digests of Linux kernel mailing list \
activity. Given the most active threads of the period with their summaries, reply with a \
single JSON object and nothing else, using these fields: \"tldr\" (the period in two or three \
sentences), \"key_points\" (array, one entry per notable thread), \"subsystems\" (array), \
\"important_changes\" (object with \"resolution\", \"action_items\" (array), \
\"discussion_summary\", \"thread_type\"), and \"importance\" (low, medium, high or critical).";

/// Outcome of a batch run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub summarized: Vec<i64>,
    /// Permanent failures with their error text
    pub failed: Vec<(i64, String)>,
    /// Transient failures that exhausted their retries; eligible next run
    pub pending_retry: Vec<i64>,
    /// Failures that could not be written to the failure table
    pub bookkeeping_errors: Vec<(i64, String)>,
    /// Stopped early by `cancel()` or gateway shutdown
    pub cancelled: bool,
}

pub struct Orchestrator {
    pool: DbPool,
    gateway: Arc<SummaryGateway>,
    config: SummarizeConfig,
    cancelled: AtomicBool,
}

impl Orchestrator {
    pub fn new(pool: DbPool, gateway: Arc<SummaryGateway>, config: SummarizeConfig) -> Self {
        Self {
            pool,
            gateway,
            config,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Ask running batches to stop before their next thread.
    pub fn cancel(&self) {
        info!("Summarization cancel requested");
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Threads without a current summary, latest activity first.
    pub fn select_candidates(&self, limit: u32) -> Result<Vec<i64>> {
        queries::summary_candidates(&self.pool, self.config.min_emails, limit)
    }

    /// Summarize one thread and persist the result.
    ///
    /// The summary is dated at the moment its input was read. If ingestion
    /// changes the thread while the call is in flight the stored summary is
    /// therefore already stale; if the thread is merged away it is not stored.
    pub async fn summarize_thread(&self, thread_id: i64, force: bool) -> Result<Summary> {
        let (thread, members, seen_update, read_at) = {
            let conn = self.pool.get()?;
            let read_at = Utc::now();
            let thread = threads::get_thread(&conn, thread_id)?
                .ok_or_else(|| DigestError::NotFound(format!("thread {}", thread_id)))?;
            let seen_update = threads::updated_at(&conn, thread_id)?;
            (thread, messages::thread_messages(&conn, thread_id)?, seen_update, read_at)
        };
        if members.is_empty() {
            return Err(DigestError::InvalidInput(format!("thread {} has no messages", thread_id)));
        }

        let rendered = render_thread(
            &thread,
            &members,
            self.config.prompt_budget_chars,
            self.config.per_message_chars,
        );
        if rendered.omitted > 0 {
            info!(
                thread_id,
                included = rendered.included,
                omitted = rendered.omitted,
                "Thread truncated to fit prompt budget"
            );
        }

        let response = self
            .gateway
            .summarize(THREAD_SYSTEM_PROMPT, &rendered.text, force)
            .await?;
        let mut summary = Summary::from_payload(
            SummaryKind::Thread,
            Some(thread_id),
            None,
            &response.payload,
            &response.model,
        );
        summary.generated_at = read_at;

        {
            let mut conn = self.pool.get()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let current = threads::updated_at(&tx, thread_id)?
                .ok_or_else(|| DigestError::NotFound(format!("thread {} merged during summarization", thread_id)))?;
            if Some(current) != seen_update {
                // Changed in flight; keep the summary strictly older than the change
                warn!(thread_id, "Thread changed during summarization; summary stored as stale");
                summary.generated_at = summary.generated_at.min(from_millis(current - 1));
            }
            summaries::upsert_summary(&tx, &summary)?;
            failures::clear_failure(&tx, thread_id)?;
            tx.commit()?;
        }

        info!(thread_id, cached = response.cached, importance = summary.importance.as_str(), "Thread summarized");
        Ok(summary)
    }

    /// Summarize up to `limit` candidate threads.
    pub async fn summarize_pending(&self, limit: u32) -> Result<BatchReport> {
        let candidates = self.select_candidates(limit)?;
        info!("Summarizing {} candidate threads", candidates.len());
        self.summarize_batch(&candidates).await
    }

    pub async fn summarize_batch(&self, thread_ids: &[i64]) -> Result<BatchReport> {
        let mut report = BatchReport::default();

        for &thread_id in thread_ids {
            if self.is_cancelled() {
                report.cancelled = true;
                break;
            }

            match self.summarize_thread(thread_id, false).await {
                Ok(_) => report.summarized.push(thread_id),
                Err(DigestError::ShutDown) | Err(DigestError::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Err(e) if e.is_transient() => {
                    warn!(thread_id, "Summary pending retry: {}", e);
                    self.record_failure(thread_id, &e, true, &mut report);
                    report.pending_retry.push(thread_id);
                }
                Err(e) => {
                    error!(thread_id, "Summary failed: {}", e);
                    self.record_failure(thread_id, &e, false, &mut report);
                    report.failed.push((thread_id, e.to_string()));
                }
            }
        }

        info!(
            summarized = report.summarized.len(),
            failed = report.failed.len(),
            pending_retry = report.pending_retry.len(),
            cancelled = report.cancelled,
            "Summary batch finished"
        );
        Ok(report)
    }

    /// Failure bookkeeping is best effort; a store error here is reported, not raised.
    fn record_failure(&self, thread_id: i64, err: &DigestError, transient: bool, report: &mut BatchReport) {
        let recorded = self
            .pool
            .get()
            .map_err(DigestError::from)
            .and_then(|conn| failures::record_failure(&conn, thread_id, &err.to_string(), transient));
        if let Err(e) = recorded {
            error!(thread_id, "Could not record summary failure: {}", e);
            report.bookkeeping_errors.push((thread_id, e.to_string()));
        }
    }

    /// Daily or weekly digest of threads that started in the period.
    ///
    /// An existing digest is returned as is unless `force` is set.
    pub async fn generate_digest(&self, kind: SummaryKind, start: NaiveDate, force: bool) -> Result<Summary> {
        let days = kind
            .period_days()
            .ok_or_else(|| DigestError::InvalidInput("digest kind must be daily or weekly".into()))?;

        if !force {
            let conn = self.pool.get()?;
            if let Some(existing) = summaries::get_digest(&conn, kind, start)? {
                return Ok(existing);
            }
        }

        let from = start.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();
        let to = from + Duration::days(days);
        let top = queries::threads_started_between(
            &self.pool,
            from,
            to,
            self.config.digest_max_threads as u32,
        )?;
        if top.is_empty() {
            return Err(DigestError::NotFound(format!(
                "no threads started in the {} period beginning {}",
                kind.as_str(),
                start
            )));
        }

        // Fill in missing thread summaries first; failures only degrade the digest
        let missing: Vec<i64> = {
            let conn = self.pool.get()?;
            let mut ids = Vec::new();
            for thread in &top {
                if thread.email_count >= self.config.min_emails
                    && summaries::get_thread_summary(&conn, thread.id)?.is_none()
                {
                    ids.push(thread.id);
                }
            }
            ids
        };
        if !missing.is_empty() {
            let report = self.summarize_batch(&missing).await?;
            if report.cancelled {
                return Err(DigestError::Cancelled);
            }
        }
        if self.is_cancelled() {
            return Err(DigestError::Cancelled);
        }

        let prompt = self.render_digest(kind, start, &top)?;
        let response = self.gateway.summarize(DIGEST_SYSTEM_PROMPT, &prompt, force).await?;
        let digest = Summary::from_payload(kind, None, Some(start), &response.payload, &response.model);

        {
            let conn = self.pool.get()?;
            let tx = conn.unchecked_transaction()?;
            summaries::upsert_summary(&tx, &digest)?;
            tx.commit()?;
        }

        info!(kind = kind.as_str(), %start, threads = top.len(), "Digest generated");
        Ok(digest)
    }

    fn render_digest(&self, kind: SummaryKind, start: NaiveDate, top: &[Thread]) -> Result<String> {
        let conn = self.pool.get()?;
        let mut prompt = format!(
            "{} digest for the period starting {} ({} threads)\n\n",
            kind.as_str(),
            start,
            top.len()
        );

        for (i, thread) in top.iter().enumerate() {
            prompt.push_str(&format!(
                "## {}. {}\nEmails: {} | Participants: {}\n",
                i + 1,
                thread.subject,
                thread.email_count,
                thread.participant_count
            ));
            match summaries::get_thread_summary(&conn, thread.id)? {
                Some(summary) => {
                    prompt.push_str(&format!(
                        "Importance: {}\nTL;DR: {}\n",
                        summary.importance.as_str(),
                        summary.tldr
                    ));
                    for point in &summary.key_points {
                        prompt.push_str(&format!("- {}\n", point));
                    }
                }
                None => prompt.push_str("TL;DR: (not summarized)\n"),
            }
            prompt.push('\n');
        }
        Ok(prompt)
    }
}
