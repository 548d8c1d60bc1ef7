//! Read surface served to the dashboard and used for candidate selection.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;

use super::messages;
use super::summaries::get_thread_summary;
use super::threads::{get_thread, row_to_thread};
use super::{from_millis, DbPool};
use crate::error::{DigestError, Result};
use crate::types::{Importance, Message, Summary, Thread};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadSort {
    /// Latest post first
    Recent,
    /// Most emails, then most participants
    Activity,
}

impl ThreadSort {
    fn order_by(&self) -> &'static str {
        match self {
            ThreadSort::Recent => "t.last_post DESC, t.id DESC",
            ThreadSort::Activity => "t.email_count DESC, t.participant_count DESC, t.last_post DESC",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadListItem {
    #[serde(flatten)]
    pub thread: Thread,
    pub tldr: Option<String>,
    pub importance: Option<Importance>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadDetail {
    pub thread: Thread,
    pub messages: Vec<Message>,
    pub summary: Option<Summary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub message_id: String,
    pub thread_id: Option<i64>,
    pub subject: String,
    pub sender: String,
    pub date: DateTime<Utc>,
    /// Matched terms wrapped in `[` `]`
    pub snippet: String,
    /// bm25 score; lower is more relevant
    pub rank: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub tag: String,
    pub threads: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagStats {
    pub subject_tags: Vec<TagCount>,
    pub subsystems: Vec<TagCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contributor {
    pub sender: String,
    pub name: Option<String>,
    pub messages: u32,
    pub threads: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub messages: u64,
    pub threads: u64,
    pub unique_senders: u64,
    pub summarized_threads: u64,
    pub daily_digests: u64,
    pub weekly_digests: u64,
    pub needs_review: u64,
    pub failed_threads: u64,
    pub first_post: Option<DateTime<Utc>>,
    pub last_post: Option<DateTime<Utc>>,
}

pub fn list_threads(pool: &DbPool, sort: ThreadSort, limit: u32, offset: u32) -> Result<Vec<ThreadListItem>> {
    let conn = pool.get()?;
    let sql = format!(
        "SELECT t.id, t.root_message_id, t.subject, t.participant_count, t.email_count,
                t.first_post, t.last_post, t.tags, s.tldr, s.importance
         FROM threads t
         LEFT JOIN summaries s ON s.summary_key = 'thread:' || t.id
         ORDER BY {}
         LIMIT ?1 OFFSET ?2",
        sort.order_by()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![limit, offset], |row| {
        let importance: Option<String> = row.get(9)?;
        Ok(ThreadListItem {
            thread: row_to_thread(row)?,
            tldr: row.get(8)?,
            importance: importance.map(|i| Importance::parse_lenient(&i)),
        })
    })?;

    let mut items = Vec::new();
    for row in rows {
        items.push(row?);
    }
    Ok(items)
}

pub fn thread_detail(pool: &DbPool, thread_id: i64) -> Result<ThreadDetail> {
    let conn = pool.get()?;
    let thread = get_thread(&conn, thread_id)?
        .ok_or_else(|| DigestError::NotFound(format!("thread {}", thread_id)))?;
    Ok(ThreadDetail {
        messages: messages::thread_messages(&conn, thread_id)?,
        summary: get_thread_summary(&conn, thread_id)?,
        thread,
    })
}

/// Quote every term so user input never reaches the FTS5 query grammar.
fn fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect();
    (!terms.is_empty()).then(|| terms.join(" "))
}

pub fn search(pool: &DbPool, query: &str, limit: u32) -> Result<Vec<SearchHit>> {
    let fts = fts_query(query).ok_or_else(|| DigestError::InvalidInput("empty search query".into()))?;

    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT m.message_id, tm.thread_id, m.subject, m.sender, m.date,
                snippet(messages_fts, -1, '[', ']', '...', 16),
                bm25(messages_fts)
         FROM messages_fts
         JOIN messages m ON m.id = messages_fts.rowid
         LEFT JOIN thread_members tm ON tm.message_id = m.message_id
         WHERE messages_fts MATCH ?1
         ORDER BY bm25(messages_fts)
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![fts, limit], |row| {
        Ok(SearchHit {
            message_id: row.get(0)?,
            thread_id: row.get(1)?,
            subject: row.get(2)?,
            sender: row.get(3)?,
            date: from_millis(row.get(4)?),
            snippet: row.get(5)?,
            rank: row.get(6)?,
        })
    })?;

    let mut hits = Vec::new();
    for row in rows {
        hits.push(row?);
    }
    Ok(hits)
}

pub fn tag_stats(pool: &DbPool, limit: u32) -> Result<TagStats> {
    let conn = pool.get()?;
    let collect = |sql: &str| -> Result<Vec<TagCount>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(TagCount {
                tag: row.get(0)?,
                threads: row.get(1)?,
            })
        })?;
        let mut counts = Vec::new();
        for row in rows {
            counts.push(row?);
        }
        Ok(counts)
    };

    let subject_tags = collect(
        "SELECT j.value, COUNT(DISTINCT t.id)
         FROM threads t, json_each(t.tags) j
         GROUP BY j.value
         ORDER BY 2 DESC, 1 ASC
         LIMIT ?1",
    )?;
    let subsystems = collect(
        "SELECT j.value, COUNT(DISTINCT s.thread_id)
         FROM summaries s, json_each(s.subsystems) j
         WHERE s.kind = 'thread'
         GROUP BY j.value
         ORDER BY 2 DESC, 1 ASC
         LIMIT ?1",
    )?;

    Ok(TagStats {
        subject_tags,
        subsystems,
    })
}

pub fn top_contributors(pool: &DbPool, limit: u32) -> Result<Vec<Contributor>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT m.sender, MAX(m.sender_name), COUNT(*), COUNT(DISTINCT tm.thread_id)
         FROM messages m
         LEFT JOIN thread_members tm ON tm.message_id = m.message_id
         GROUP BY m.sender
         ORDER BY 3 DESC, 1 ASC
         LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], |row| {
        Ok(Contributor {
            sender: row.get(0)?,
            name: row.get(1)?,
            messages: row.get(2)?,
            threads: row.get(3)?,
        })
    })?;

    let mut contributors = Vec::new();
    for row in rows {
        contributors.push(row?);
    }
    Ok(contributors)
}

pub fn stats(pool: &DbPool) -> Result<StoreStats> {
    let conn = pool.get()?;
    Ok(conn.query_row(
        "SELECT
            (SELECT COUNT(*) FROM messages),
            (SELECT COUNT(*) FROM threads),
            (SELECT COUNT(DISTINCT sender) FROM messages),
            (SELECT COUNT(*) FROM summaries WHERE kind = 'thread'),
            (SELECT COUNT(*) FROM summaries WHERE kind = 'daily'),
            (SELECT COUNT(*) FROM summaries WHERE kind = 'weekly'),
            (SELECT COUNT(*) FROM messages WHERE needs_review = 1),
            (SELECT COUNT(*) FROM summary_failures),
            (SELECT MIN(date) FROM messages),
            (SELECT MAX(date) FROM messages)",
        [],
        |row| {
            Ok(StoreStats {
                messages: row.get::<_, i64>(0)? as u64,
                threads: row.get::<_, i64>(1)? as u64,
                unique_senders: row.get::<_, i64>(2)? as u64,
                summarized_threads: row.get::<_, i64>(3)? as u64,
                daily_digests: row.get::<_, i64>(4)? as u64,
                weekly_digests: row.get::<_, i64>(5)? as u64,
                needs_review: row.get::<_, i64>(6)? as u64,
                failed_threads: row.get::<_, i64>(7)? as u64,
                first_post: row.get::<_, Option<i64>>(8)?.map(from_millis),
                last_post: row.get::<_, Option<i64>>(9)?.map(from_millis),
            })
        },
    )?)
}

pub fn messages_needing_review(pool: &DbPool) -> Result<Vec<Message>> {
    let conn = pool.get()?;
    messages::messages_needing_review(&conn)
}

/// Threads that need a (fresh) summary, latest activity first.
///
/// A summary is stale when it predates the thread's last post or the last
/// change to the thread's membership. Threads whose last attempt failed
/// permanently are skipped until the thread changes again.
pub fn summary_candidates(pool: &DbPool, min_emails: u32, limit: u32) -> Result<Vec<i64>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT t.id
         FROM threads t
         LEFT JOIN summaries s ON s.summary_key = 'thread:' || t.id
         WHERE t.email_count >= ?1
           AND (s.id IS NULL OR s.generated_at < t.last_post OR s.generated_at < t.updated_at)
           AND NOT EXISTS (
               SELECT 1 FROM summary_failures f
               WHERE f.thread_id = t.id AND f.transient = 0 AND f.failed_at >= t.updated_at
           )
         ORDER BY t.last_post DESC, t.id DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![min_emails, limit], |row| row.get(0))?;

    let mut ids = Vec::new();
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

/// Threads whose first post falls in `[start, end)`, most active first.
pub fn threads_started_between(
    pool: &DbPool,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    limit: u32,
) -> Result<Vec<Thread>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT t.id, t.root_message_id, t.subject, t.participant_count, t.email_count,
                t.first_post, t.last_post, t.tags
         FROM threads t
         WHERE t.first_post >= ?1 AND t.first_post < ?2
         ORDER BY t.email_count DESC, t.participant_count DESC, t.last_post DESC
         LIMIT ?3",
    )?;
    let rows = stmt.query_map(
        params![start.timestamp_millis(), end.timestamp_millis(), limit],
        row_to_thread,
    )?;

    let mut threads = Vec::new();
    for row in rows {
        threads.push(row?);
    }
    Ok(threads)
}
