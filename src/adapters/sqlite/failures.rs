use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;

use super::from_millis;
use crate::error::Result;

/// Last summarization failure of a thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryFailure {
    pub thread_id: i64,
    pub last_error: String,
    /// Retries were exhausted on a transient error; the thread stays eligible
    pub transient: bool,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

pub fn record_failure(conn: &Connection, thread_id: i64, error: &str, transient: bool) -> Result<()> {
    conn.execute(
        "INSERT INTO summary_failures (thread_id, last_error, transient, attempts, failed_at)
         VALUES (?1, ?2, ?3, 1, ?4)
         ON CONFLICT(thread_id) DO UPDATE SET
            last_error = excluded.last_error,
            transient = excluded.transient,
            attempts = summary_failures.attempts + 1,
            failed_at = excluded.failed_at",
        params![thread_id, error, transient as i32, Utc::now().timestamp_millis()],
    )?;
    Ok(())
}

pub fn clear_failure(conn: &Connection, thread_id: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM summary_failures WHERE thread_id = ?1",
        params![thread_id],
    )?;
    Ok(())
}

pub fn list_failures(conn: &Connection) -> Result<Vec<SummaryFailure>> {
    let mut stmt = conn.prepare(
        "SELECT thread_id, last_error, transient, attempts, failed_at
         FROM summary_failures ORDER BY failed_at DESC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(SummaryFailure {
            thread_id: row.get(0)?,
            last_error: row.get(1)?,
            transient: row.get::<_, i32>(2)? != 0,
            attempts: row.get(3)?,
            failed_at: from_millis(row.get(4)?),
        })
    })?;

    let mut failures = Vec::new();
    for row in rows {
        failures.push(row?);
    }
    Ok(failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_memory_pool;

    #[test]
    fn test_failures_accumulate_and_clear() {
        let pool = create_memory_pool().unwrap();
        let conn = pool.get().unwrap();

        record_failure(&conn, 7, "HTTP 503", true).unwrap();
        record_failure(&conn, 7, "HTTP 400", false).unwrap();

        let failures = list_failures(&conn).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].attempts, 2);
        assert_eq!(failures[0].last_error, "HTTP 400");
        assert!(!failures[0].transient);

        clear_failure(&conn, 7).unwrap();
        assert!(list_failures(&conn).unwrap().is_empty());
    }
}
