use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use tracing::info;

use super::schema::initialize_schema;
use crate::error::Result;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Open (or create) the on-disk store and bring its schema up to date.
pub fn create_pool(db_path: &Path) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = Pool::builder().max_size(8).build(manager)?;

    let conn = pool.get()?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -8000;
         PRAGMA temp_store = MEMORY;",
    )?;
    initialize_schema(&conn)?;

    info!("Opened store at {:?}", db_path);
    Ok(pool)
}

/// Single-connection in-memory store.
///
/// Every connection to `:memory:` is a separate database, so the pool is
/// capped at one; callers must never hold two connections at once.
pub fn create_memory_pool() -> Result<DbPool> {
    let manager = SqliteConnectionManager::memory()
        .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
    let pool = Pool::builder().max_size(1).build(manager)?;
    {
        let conn = pool.get()?;
        initialize_schema(&conn)?;
    }
    Ok(pool)
}
