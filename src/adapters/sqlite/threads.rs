//! Thread, membership and waiting-ancestor rows.
//!
//! All functions take a plain connection so the reconstructor can compose
//! them inside one transaction.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::from_millis;
use crate::error::Result;
use crate::types::Thread;

/// Parent link of one member, as needed for root selection
#[derive(Debug, Clone)]
pub struct MemberLink {
    pub message_id: String,
    pub parent_id: Option<String>,
    pub date: DateTime<Utc>,
    pub subject: String,
    pub tags: Vec<String>,
}

/// Aggregates derivable from members alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberCounts {
    pub participant_count: u32,
    pub email_count: u32,
    pub first_post: Option<i64>,
    pub last_post: Option<i64>,
}

const THREAD_COLUMNS: &str =
    "id, root_message_id, subject, participant_count, email_count, first_post, last_post, tags";

pub fn thread_of(conn: &Connection, message_id: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT thread_id FROM thread_members WHERE message_id = ?1",
            params![message_id],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn create_thread(conn: &Connection, root_message_id: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO threads (root_message_id, updated_at) VALUES (?1, ?2)",
        params![root_message_id, Utc::now().timestamp_millis()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn add_member(conn: &Connection, message_id: &str, thread_id: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO thread_members (message_id, thread_id) VALUES (?1, ?2)",
        params![message_id, thread_id],
    )?;
    Ok(())
}

pub fn add_pending(conn: &Connection, ancestor_id: &str, thread_id: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO pending_ancestors (ancestor_id, thread_id) VALUES (?1, ?2)",
        params![ancestor_id, thread_id],
    )?;
    Ok(())
}

/// Remove and return every thread waiting for `ancestor_id`.
pub fn take_waiting(conn: &Connection, ancestor_id: &str) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT thread_id FROM pending_ancestors WHERE ancestor_id = ?1 ORDER BY thread_id",
    )?;
    let rows = stmt.query_map(params![ancestor_id], |row| row.get(0))?;
    let mut waiting = Vec::new();
    for row in rows {
        waiting.push(row?);
    }

    conn.execute(
        "DELETE FROM pending_ancestors WHERE ancestor_id = ?1",
        params![ancestor_id],
    )?;
    Ok(waiting)
}

/// Move everything owned by `absorbed` onto `survivor` and delete `absorbed`.
///
/// Summary rows of the absorbed thread are dropped; the survivor's summary is
/// left in place and goes stale through `updated_at`.
pub fn merge_into(conn: &Connection, survivor: i64, absorbed: i64) -> Result<usize> {
    let moved = conn.execute(
        "UPDATE thread_members SET thread_id = ?1 WHERE thread_id = ?2",
        params![survivor, absorbed],
    )?;
    conn.execute(
        "UPDATE OR IGNORE pending_ancestors SET thread_id = ?1 WHERE thread_id = ?2",
        params![survivor, absorbed],
    )?;
    conn.execute(
        "DELETE FROM pending_ancestors WHERE thread_id = ?1",
        params![absorbed],
    )?;
    conn.execute(
        "DELETE FROM summaries WHERE kind = 'thread' AND thread_id = ?1",
        params![absorbed],
    )?;
    conn.execute(
        "DELETE FROM summary_failures WHERE thread_id = ?1",
        params![absorbed],
    )?;
    conn.execute("DELETE FROM threads WHERE id = ?1", params![absorbed])?;
    Ok(moved)
}

/// Pending rows naming an identifier that is itself a member of the thread
/// are satisfied and can go.
pub fn prune_satisfied_pending(conn: &Connection, thread_id: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM pending_ancestors
         WHERE thread_id = ?1
           AND ancestor_id IN (SELECT message_id FROM thread_members WHERE thread_id = ?1)",
        params![thread_id],
    )?;
    Ok(())
}

pub fn member_links(conn: &Connection, thread_id: i64) -> Result<Vec<MemberLink>> {
    let mut stmt = conn.prepare(
        "SELECT m.message_id, m.parent_id, m.date, m.subject, m.tags
         FROM messages m
         JOIN thread_members tm ON tm.message_id = m.message_id
         WHERE tm.thread_id = ?1",
    )?;
    let rows = stmt.query_map(params![thread_id], |row| {
        let tags: String = row.get(4)?;
        Ok(MemberLink {
            message_id: row.get(0)?,
            parent_id: row.get(1)?,
            date: from_millis(row.get(2)?),
            subject: row.get(3)?,
            tags: serde_json::from_str(&tags).unwrap_or_default(),
        })
    })?;
    let mut links = Vec::new();
    for row in rows {
        links.push(row?);
    }
    Ok(links)
}

pub fn member_counts(conn: &Connection, thread_id: i64) -> Result<MemberCounts> {
    Ok(conn.query_row(
        "SELECT COUNT(DISTINCT m.sender), COUNT(*), MIN(m.date), MAX(m.date)
         FROM messages m
         JOIN thread_members tm ON tm.message_id = m.message_id
         WHERE tm.thread_id = ?1",
        params![thread_id],
        |row| {
            Ok(MemberCounts {
                participant_count: row.get(0)?,
                email_count: row.get(1)?,
                first_post: row.get(2)?,
                last_post: row.get(3)?,
            })
        },
    )?)
}

/// Last membership or aggregate change of a thread, epoch ms.
pub fn updated_at(conn: &Connection, thread_id: i64) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT updated_at FROM threads WHERE id = ?1",
            params![thread_id],
            |row| row.get(0),
        )
        .optional()?)
}

/// Store recomputed aggregates; `updated_at` moves only when they changed.
///
/// Returns whether the row changed.
pub fn update_thread(conn: &Connection, thread: &Thread) -> Result<bool> {
    if get_thread(conn, thread.id)?.as_ref() == Some(thread) {
        return Ok(false);
    }
    conn.execute(
        "UPDATE threads SET
            root_message_id = ?2, subject = ?3, participant_count = ?4,
            email_count = ?5, first_post = ?6, last_post = ?7, tags = ?8,
            updated_at = ?9
         WHERE id = ?1",
        params![
            thread.id,
            thread.root_message_id,
            thread.subject,
            thread.participant_count,
            thread.email_count,
            thread.first_post.map(|d| d.timestamp_millis()),
            thread.last_post.map(|d| d.timestamp_millis()),
            serde_json::to_string(&thread.tags)?,
            Utc::now().timestamp_millis(),
        ],
    )?;
    Ok(true)
}

pub fn get_thread(conn: &Connection, thread_id: i64) -> Result<Option<Thread>> {
    let sql = format!("SELECT {} FROM threads WHERE id = ?1", THREAD_COLUMNS);
    Ok(conn.query_row(&sql, params![thread_id], row_to_thread).optional()?)
}

pub fn thread_ids(conn: &Connection) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT id FROM threads ORDER BY id")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    let mut ids = Vec::new();
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

pub(crate) fn row_to_thread(row: &Row) -> rusqlite::Result<Thread> {
    let tags: String = row.get(7)?;
    Ok(Thread {
        id: row.get(0)?,
        root_message_id: row.get(1)?,
        subject: row.get(2)?,
        participant_count: row.get(3)?,
        email_count: row.get(4)?,
        first_post: row.get::<_, Option<i64>>(5)?.map(from_millis),
        last_post: row.get::<_, Option<i64>>(6)?.map(from_millis),
        tags: serde_json::from_str(&tags).unwrap_or_default(),
    })
}
