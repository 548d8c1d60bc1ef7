use rusqlite::{params, Connection, OptionalExtension, Row};

use super::from_millis;
use crate::error::Result;
use crate::types::{ArchiveFormat, Message};

const MESSAGE_COLUMNS: &str = "message_id, subject, sender, sender_name, date, body,
                               parent_id, in_reply_to, ancestors, tags, needs_review, origin";

/// Insert if absent. Returns `false` when the identifier already exists.
pub fn insert_message(conn: &Connection, msg: &Message) -> Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO messages (
            message_id, subject, sender, sender_name, date, body,
            parent_id, in_reply_to, ancestors, tags, needs_review, origin,
            ingested_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            msg.message_id,
            msg.subject,
            msg.sender,
            msg.sender_name,
            msg.date.timestamp_millis(),
            msg.body,
            msg.parent_id,
            msg.in_reply_to,
            serde_json::to_string(&msg.ancestors)?,
            serde_json::to_string(&msg.tags)?,
            msg.needs_review as i32,
            msg.origin.as_str(),
            chrono::Utc::now().timestamp_millis(),
        ],
    )?;
    Ok(changed == 1)
}

pub fn message_exists(conn: &Connection, message_id: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM messages WHERE message_id = ?1",
            params![message_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn get_message(conn: &Connection, message_id: &str) -> Result<Option<Message>> {
    let sql = format!("SELECT {} FROM messages WHERE message_id = ?1", MESSAGE_COLUMNS);
    Ok(conn.query_row(&sql, params![message_id], row_to_message).optional()?)
}

/// Members of a thread in chronological order (ties by identifier).
pub fn thread_messages(conn: &Connection, thread_id: i64) -> Result<Vec<Message>> {
    let sql = format!(
        "SELECT {} FROM messages m
         JOIN thread_members tm ON tm.message_id = m.message_id
         WHERE tm.thread_id = ?1
         ORDER BY m.date ASC, m.message_id ASC",
        MESSAGE_COLUMNS
            .split(',')
            .map(|c| format!("m.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![thread_id], row_to_message)?;

    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

/// Messages whose In-Reply-To disagreed with their References.
pub fn messages_needing_review(conn: &Connection) -> Result<Vec<Message>> {
    let sql = format!(
        "SELECT {} FROM messages WHERE needs_review = 1 ORDER BY date ASC",
        MESSAGE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], row_to_message)?;

    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

pub(crate) fn row_to_message(row: &Row) -> rusqlite::Result<Message> {
    let ancestors: String = row.get(8)?;
    let tags: String = row.get(9)?;
    let origin: String = row.get(11)?;
    Ok(Message {
        message_id: row.get(0)?,
        subject: row.get(1)?,
        sender: row.get(2)?,
        sender_name: row.get(3)?,
        date: from_millis(row.get(4)?),
        body: row.get(5)?,
        parent_id: row.get(6)?,
        in_reply_to: row.get(7)?,
        ancestors: serde_json::from_str(&ancestors).unwrap_or_default(),
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        needs_review: row.get::<_, i32>(10)? != 0,
        origin: ArchiveFormat::parse(&origin).unwrap_or(ArchiveFormat::Mbox),
    })
}
