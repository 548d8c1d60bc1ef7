use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::from_millis;
use crate::error::{DigestError, Result};
use crate::types::{Importance, Summary, SummaryKind};

const SUMMARY_COLUMNS: &str = "kind, thread_id, period_start, tldr, key_points, important_changes,
                               subsystems, importance, model, generated_at";

/// Unique key: one thread summary per thread, one digest per (kind, period start).
pub fn summary_key(kind: SummaryKind, thread_id: Option<i64>, period_start: Option<NaiveDate>) -> Result<String> {
    match (kind, thread_id, period_start) {
        (SummaryKind::Thread, Some(id), _) => Ok(format!("thread:{}", id)),
        (SummaryKind::Daily | SummaryKind::Weekly, _, Some(start)) => {
            Ok(format!("{}:{}", kind.as_str(), start.format("%Y-%m-%d")))
        }
        _ => Err(DigestError::InvalidInput(format!(
            "{} summary without its key field",
            kind.as_str()
        ))),
    }
}

/// Create or overwrite the summary stored under its key.
pub fn upsert_summary(conn: &Connection, summary: &Summary) -> Result<()> {
    let key = summary_key(summary.kind, summary.thread_id, summary.period_start)?;
    conn.execute(
        "INSERT INTO summaries (
            summary_key, kind, thread_id, period_start, tldr, key_points,
            important_changes, subsystems, importance, model, generated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        ON CONFLICT(summary_key) DO UPDATE SET
            tldr = excluded.tldr,
            key_points = excluded.key_points,
            important_changes = excluded.important_changes,
            subsystems = excluded.subsystems,
            importance = excluded.importance,
            model = excluded.model,
            generated_at = excluded.generated_at",
        params![
            key,
            summary.kind.as_str(),
            summary.thread_id,
            summary.period_start.map(|d| d.format("%Y-%m-%d").to_string()),
            summary.tldr,
            serde_json::to_string(&summary.key_points)?,
            serde_json::to_string(&summary.important_changes)?,
            serde_json::to_string(&summary.subsystems)?,
            summary.importance.as_str(),
            summary.model,
            summary.generated_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}

pub fn get_thread_summary(conn: &Connection, thread_id: i64) -> Result<Option<Summary>> {
    get_by_key(conn, &summary_key(SummaryKind::Thread, Some(thread_id), None)?)
}

pub fn get_digest(conn: &Connection, kind: SummaryKind, period_start: NaiveDate) -> Result<Option<Summary>> {
    get_by_key(conn, &summary_key(kind, None, Some(period_start))?)
}

fn get_by_key(conn: &Connection, key: &str) -> Result<Option<Summary>> {
    let sql = format!("SELECT {} FROM summaries WHERE summary_key = ?1", SUMMARY_COLUMNS);
    Ok(conn.query_row(&sql, params![key], row_to_summary).optional()?)
}

pub(crate) fn row_to_summary(row: &Row) -> rusqlite::Result<Summary> {
    let kind: String = row.get(0)?;
    let period_start: Option<String> = row.get(2)?;
    let key_points: String = row.get(4)?;
    let important_changes: String = row.get(5)?;
    let subsystems: String = row.get(6)?;
    let importance: String = row.get(7)?;
    Ok(Summary {
        kind: SummaryKind::from_str(&kind).unwrap_or(SummaryKind::Thread),
        thread_id: row.get(1)?,
        period_start: period_start.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
        tldr: row.get(3)?,
        key_points: serde_json::from_str(&key_points).unwrap_or_default(),
        important_changes: serde_json::from_str(&important_changes).unwrap_or_default(),
        subsystems: serde_json::from_str(&subsystems).unwrap_or_default(),
        importance: Importance::parse_lenient(&importance),
        model: row.get(8)?,
        generated_at: from_millis(row.get(9)?),
    })
}
