//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Forum-Ripple database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Tracked characters (one per forum account)
CREATE TABLE IF NOT EXISTS characters (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    profile_url TEXT NOT NULL,
    group_name TEXT,
    avatar_url TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    threads_crawled_at TEXT,
    profile_crawled_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_characters_name ON characters(name);

-- Free-form profile fields
CREATE TABLE IF NOT EXISTS profile_fields (
    character_id TEXT NOT NULL REFERENCES characters(id),
    field_key TEXT NOT NULL,
    field_value TEXT NOT NULL,
    PRIMARY KEY (character_id, field_key)
);

-- Discussion threads
CREATE TABLE IF NOT EXISTS threads (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    url TEXT NOT NULL,
    forum_id TEXT,
    forum_name TEXT,
    category TEXT NOT NULL,
    last_poster_id TEXT,
    last_poster_name TEXT,
    last_poster_avatar TEXT,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_threads_category ON threads(category);

-- Character participation in threads
CREATE TABLE IF NOT EXISTS character_threads (
    character_id TEXT NOT NULL REFERENCES characters(id),
    thread_id TEXT NOT NULL REFERENCES threads(id),
    category TEXT NOT NULL,
    is_user_last_poster INTEGER NOT NULL DEFAULT 0,
    post_count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (character_id, thread_id)
);

CREATE INDEX IF NOT EXISTS idx_character_threads_thread ON character_threads(thread_id);

-- Dialogue quotes, unique per character and exact text
CREATE TABLE IF NOT EXISTS quotes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    character_id TEXT NOT NULL REFERENCES characters(id),
    text TEXT NOT NULL,
    source_thread_id TEXT,
    source_thread_title TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(character_id, text)
);

-- (thread, character) pairs whose quotes were already extracted
CREATE TABLE IF NOT EXISTS quote_crawl_log (
    thread_id TEXT NOT NULL,
    character_id TEXT NOT NULL,
    scraped_at TEXT NOT NULL,
    PRIMARY KEY (thread_id, character_id)
);

-- Per-post activity from the bulk export
CREATE TABLE IF NOT EXISTS posts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    thread_id TEXT NOT NULL,
    author_id TEXT NOT NULL,
    author_name TEXT,
    post_date TEXT
);

CREATE INDEX IF NOT EXISTS idx_posts_thread ON posts(thread_id);
CREATE INDEX IF NOT EXISTS idx_posts_author ON posts(author_id);

-- Key/value markers (export credentials, last sync times)
CREATE TABLE IF NOT EXISTS crawl_status (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
