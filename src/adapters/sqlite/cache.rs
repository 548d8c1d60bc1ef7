use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::from_millis;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub response: String,
    pub model: String,
    pub hit_count: u64,
    pub created_at: DateTime<Utc>,
}

pub fn get_entry(conn: &Connection, key: &str) -> Result<Option<CacheEntry>> {
    Ok(conn
        .query_row(
            "SELECT cache_key, response, model, hit_count, created_at
             FROM llm_cache WHERE cache_key = ?1",
            params![key],
            |row| {
                Ok(CacheEntry {
                    key: row.get(0)?,
                    response: row.get(1)?,
                    model: row.get(2)?,
                    hit_count: row.get::<_, i64>(3)? as u64,
                    created_at: from_millis(row.get(4)?),
                })
            },
        )
        .optional()?)
}

pub fn record_hit(conn: &Connection, key: &str) -> Result<()> {
    conn.execute(
        "UPDATE llm_cache SET hit_count = hit_count + 1 WHERE cache_key = ?1",
        params![key],
    )?;
    Ok(())
}

/// First writer wins. Returns `true` when this call created the entry.
pub fn insert_if_absent(conn: &Connection, key: &str, model: &str, response: &str) -> Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO llm_cache (cache_key, response, model, hit_count, created_at)
         VALUES (?1, ?2, ?3, 0, ?4)",
        params![key, response, model, Utc::now().timestamp_millis()],
    )?;
    Ok(changed == 1)
}

pub fn evict(conn: &Connection, key: &str) -> Result<bool> {
    let changed = conn.execute("DELETE FROM llm_cache WHERE cache_key = ?1", params![key])?;
    Ok(changed == 1)
}
