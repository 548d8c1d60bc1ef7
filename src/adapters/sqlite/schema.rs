use rusqlite::Connection;

use crate::error::Result;

pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch("
        -- Canonical messages; message_id is the global identity
        CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY,
            message_id      TEXT NOT NULL UNIQUE,
            subject         TEXT NOT NULL DEFAULT '',
            sender          TEXT NOT NULL,      -- normalized, lowercase
            sender_name     TEXT,
            date            INTEGER NOT NULL,   -- unix epoch ms
            body            TEXT NOT NULL DEFAULT '',
            parent_id       TEXT,               -- effective parent after tie-break
            in_reply_to     TEXT,               -- raw header value
            ancestors       TEXT NOT NULL DEFAULT '[]',  -- JSON array, oldest first
            tags            TEXT NOT NULL DEFAULT '[]',  -- JSON array
            needs_review    INTEGER NOT NULL DEFAULT 0,
            origin          TEXT NOT NULL,      -- 'mbox' | 'atom' | 'digest'
            ingested_at     INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_date   ON messages(date);
        CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender);
        CREATE INDEX IF NOT EXISTS idx_messages_review ON messages(needs_review) WHERE needs_review = 1;

        -- Threads (materialised from members)
        CREATE TABLE IF NOT EXISTS threads (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            root_message_id     TEXT NOT NULL,
            subject             TEXT NOT NULL DEFAULT '',
            participant_count   INTEGER NOT NULL DEFAULT 0,
            email_count         INTEGER NOT NULL DEFAULT 0,
            first_post          INTEGER,
            last_post           INTEGER,
            tags                TEXT NOT NULL DEFAULT '[]',
            updated_at          INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_threads_last_post ON threads(last_post DESC);
        CREATE INDEX IF NOT EXISTS idx_threads_first_post ON threads(first_post);

        -- message -> thread index; rewritten only by merges
        CREATE TABLE IF NOT EXISTS thread_members (
            message_id      TEXT PRIMARY KEY,
            thread_id       INTEGER NOT NULL REFERENCES threads(id)
        );

        CREATE INDEX IF NOT EXISTS idx_thread_members_thread ON thread_members(thread_id);

        -- Threads waiting for an ancestor that has not arrived yet
        CREATE TABLE IF NOT EXISTS pending_ancestors (
            ancestor_id     TEXT NOT NULL,
            thread_id       INTEGER NOT NULL REFERENCES threads(id),
            PRIMARY KEY (ancestor_id, thread_id)
        );

        CREATE INDEX IF NOT EXISTS idx_pending_thread ON pending_ancestors(thread_id);

        -- Thread summaries and periodic digests
        CREATE TABLE IF NOT EXISTS summaries (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            summary_key         TEXT NOT NULL UNIQUE,   -- 'thread:<id>' | '<kind>:<YYYY-MM-DD>'
            kind                TEXT NOT NULL,
            thread_id           INTEGER,
            period_start        TEXT,
            tldr                TEXT NOT NULL DEFAULT '',
            key_points          TEXT NOT NULL DEFAULT '[]',
            important_changes   TEXT NOT NULL DEFAULT '{}',
            subsystems          TEXT NOT NULL DEFAULT '[]',
            importance          TEXT NOT NULL DEFAULT 'medium',
            model               TEXT NOT NULL,
            generated_at        INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_summaries_thread ON summaries(thread_id);

        -- Content-addressed response cache; first writer wins
        CREATE TABLE IF NOT EXISTS llm_cache (
            cache_key       TEXT PRIMARY KEY,   -- hex sha256(prompt || 0x00 || model)
            response        TEXT NOT NULL,
            model           TEXT NOT NULL,
            hit_count       INTEGER NOT NULL DEFAULT 0,
            created_at      INTEGER NOT NULL
        );

        -- Threads whose last summarization attempt failed
        CREATE TABLE IF NOT EXISTS summary_failures (
            thread_id       INTEGER PRIMARY KEY,
            last_error      TEXT NOT NULL,
            transient       INTEGER NOT NULL,
            attempts        INTEGER NOT NULL DEFAULT 1,
            failed_at       INTEGER NOT NULL
        );

        -- Full-text search over subject and body
        CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(
            subject,
            body,
            content='messages',
            content_rowid='id'
        );

        CREATE TRIGGER IF NOT EXISTS messages_fts_insert AFTER INSERT ON messages BEGIN
            INSERT INTO messages_fts(rowid, subject, body) VALUES (new.id, new.subject, new.body);
        END;

        CREATE TRIGGER IF NOT EXISTS messages_fts_delete AFTER DELETE ON messages BEGIN
            INSERT INTO messages_fts(messages_fts, rowid, subject, body)
            VALUES ('delete', old.id, old.subject, old.body);
        END;
    ")?;

    Ok(())
}
