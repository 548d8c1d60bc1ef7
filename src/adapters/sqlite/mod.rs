pub mod cache;
pub mod failures;
pub mod messages;
pub mod pool;
pub mod queries;
pub mod schema;
pub mod summaries;
pub mod threads;

// Re-export the pool type so callers can do `use crate::adapters::sqlite::DbPool`
pub use pool::{create_memory_pool, create_pool, DbPool};

/// Unix epoch milliseconds to UTC, tolerating out-of-range values.
pub(crate) fn from_millis(ms: i64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
