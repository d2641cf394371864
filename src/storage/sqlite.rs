//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::parser::ThreadCategory;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    CharacterRecord, CharacterThreadLink, CharacterThreadRecord, CharacterUpsert, CrawlKind,
    PostActivity, QuoteRecord, ThreadUpsert,
};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;

const UPSERT_THREAD_SQL: &str = "
    INSERT INTO threads (id, title, url, forum_id, forum_name, category,
                         last_poster_id, last_poster_name, last_poster_avatar, updated_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
    ON CONFLICT(id) DO UPDATE SET
        title = excluded.title,
        url = excluded.url,
        forum_id = COALESCE(excluded.forum_id, threads.forum_id),
        forum_name = COALESCE(excluded.forum_name, threads.forum_name),
        category = excluded.category,
        last_poster_id = CASE WHEN excluded.last_poster_name IS NOT NULL
                              THEN excluded.last_poster_id ELSE threads.last_poster_id END,
        last_poster_name = COALESCE(excluded.last_poster_name, threads.last_poster_name),
        last_poster_avatar = CASE WHEN excluded.last_poster_name IS NOT NULL
                                  THEN excluded.last_poster_avatar ELSE threads.last_poster_avatar END,
        updated_at = excluded.updated_at";

const LINK_SQL: &str = "
    INSERT INTO character_threads (character_id, thread_id, category, is_user_last_poster, post_count)
    VALUES (?1, ?2, ?3, ?4, ?5)
    ON CONFLICT(character_id, thread_id) DO UPDATE SET
        category = excluded.category,
        is_user_last_poster = excluded.is_user_last_poster,
        post_count = excluded.post_count";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens or creates the database at `path`
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn category_from_db(value: &str) -> ThreadCategory {
    ThreadCategory::from_name(value).unwrap_or(ThreadCategory::Ongoing)
}

fn character_from_row(row: &Row<'_>) -> rusqlite::Result<CharacterRecord> {
    Ok(CharacterRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        profile_url: row.get(2)?,
        group_name: row.get(3)?,
        avatar_url: row.get(4)?,
        threads_crawled_at: row.get(5)?,
        profile_crawled_at: row.get(6)?,
    })
}

const CHARACTER_COLUMNS: &str =
    "id, name, profile_url, group_name, avatar_url, threads_crawled_at, profile_crawled_at";

fn write_thread(conn: &Connection, thread: &ThreadUpsert, updated_at: &str) -> rusqlite::Result<usize> {
    conn.execute(
        UPSERT_THREAD_SQL,
        params![
            thread.thread_id,
            thread.title,
            thread.url,
            thread.forum_id,
            thread.forum_name,
            thread.category.as_str(),
            thread.last_poster_id,
            thread.last_poster_name,
            thread.last_poster_avatar,
            updated_at
        ],
    )
}

fn write_link(conn: &Connection, link: &CharacterThreadLink) -> rusqlite::Result<usize> {
    conn.execute(
        LINK_SQL,
        params![
            link.character_id,
            link.thread_id,
            link.category.as_str(),
            link.is_user_last_poster,
            link.post_count
        ],
    )
}

impl Storage for SqliteStorage {
    // ===== Characters =====

    fn upsert_character(&mut self, character: &CharacterUpsert) -> StorageResult<()> {
        let now = now();
        self.conn.execute(
            "INSERT INTO characters (id, name, profile_url, group_name, avatar_url, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                profile_url = excluded.profile_url,
                group_name = COALESCE(excluded.group_name, characters.group_name),
                avatar_url = COALESCE(excluded.avatar_url, characters.avatar_url),
                updated_at = excluded.updated_at",
            params![
                character.id,
                character.name,
                character.profile_url,
                character.group_name,
                character.avatar_url,
                now
            ],
        )?;
        Ok(())
    }

    fn upsert_profile_field(
        &mut self,
        character_id: &str,
        key: &str,
        value: &str,
    ) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO profile_fields (character_id, field_key, field_value) VALUES (?1, ?2, ?3)
             ON CONFLICT(character_id, field_key) DO UPDATE SET field_value = excluded.field_value",
            params![character_id, key, value],
        )?;
        Ok(())
    }

    fn get_character(&self, id: &str) -> StorageResult<Option<CharacterRecord>> {
        let character = self
            .conn
            .query_row(
                &format!("SELECT {} FROM characters WHERE id = ?1", CHARACTER_COLUMNS),
                params![id],
                character_from_row,
            )
            .optional()?;
        Ok(character)
    }

    fn list_characters(&self) -> StorageResult<Vec<CharacterRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM characters ORDER BY CAST(id AS INTEGER), id",
            CHARACTER_COLUMNS
        ))?;
        let characters = stmt
            .query_map([], character_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(characters)
    }

    fn profile_fields(&self, character_id: &str) -> StorageResult<BTreeMap<String, String>> {
        let mut stmt = self.conn.prepare(
            "SELECT field_key, field_value FROM profile_fields WHERE character_id = ?1",
        )?;
        let fields = stmt
            .query_map(params![character_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<BTreeMap<String, String>, _>>()?;
        Ok(fields)
    }

    fn rename_character(&mut self, id: &str, name: &str) -> StorageResult<bool> {
        let updated = self.conn.execute(
            "UPDATE characters SET name = ?1, updated_at = ?2 WHERE id = ?3 AND name != ?1",
            params![name, now(), id],
        )?;
        Ok(updated > 0)
    }

    fn update_character_crawl_time(&mut self, id: &str, kind: CrawlKind) -> StorageResult<()> {
        let updated = self.conn.execute(
            &format!("UPDATE characters SET {} = ?1 WHERE id = ?2", kind.column()),
            params![now(), id],
        )?;
        if updated == 0 {
            return Err(StorageError::CharacterNotFound(id.to_string()));
        }
        Ok(())
    }

    // ===== Threads =====

    fn upsert_thread(&mut self, thread: &ThreadUpsert) -> StorageResult<()> {
        write_thread(&self.conn, thread, &now())?;
        Ok(())
    }

    fn link_character_thread(&mut self, link: &CharacterThreadLink) -> StorageResult<()> {
        write_link(&self.conn, link)?;
        Ok(())
    }

    fn upsert_thread_with_link(
        &mut self,
        thread: &ThreadUpsert,
        link: &CharacterThreadLink,
    ) -> StorageResult<()> {
        let now = now();
        let tx = self.conn.transaction()?;
        write_thread(&tx, thread, &now)?;
        write_link(&tx, link)?;
        tx.commit()?;
        Ok(())
    }

    fn threads_for(&self, character_id: &str) -> StorageResult<Vec<CharacterThreadRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.id, t.title, t.url, t.forum_name, ct.category, t.last_poster_name,
                    ct.is_user_last_poster, ct.post_count
             FROM character_threads ct
             JOIN threads t ON t.id = ct.thread_id
             WHERE ct.character_id = ?1
             ORDER BY CAST(t.id AS INTEGER)",
        )?;
        let threads = stmt
            .query_map(params![character_id], |row| {
                Ok(CharacterThreadRecord {
                    thread_id: row.get(0)?,
                    title: row.get(1)?,
                    url: row.get(2)?,
                    forum_name: row.get(3)?,
                    category: category_from_db(&row.get::<_, String>(4)?),
                    last_poster_name: row.get(5)?,
                    is_user_last_poster: row.get(6)?,
                    post_count: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(threads)
    }

    fn replace_thread_posts(
        &mut self,
        thread_id: &str,
        posts: &[PostActivity],
    ) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM posts WHERE thread_id = ?1", params![thread_id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO posts (thread_id, author_id, author_name, post_date) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for post in posts {
                stmt.execute(params![
                    thread_id,
                    post.author_id,
                    post.author_name,
                    post.post_date
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn thread_posts(&self, thread_id: &str) -> StorageResult<Vec<PostActivity>> {
        let mut stmt = self.conn.prepare(
            "SELECT author_id, author_name, post_date FROM posts WHERE thread_id = ?1 ORDER BY id",
        )?;
        let posts = stmt
            .query_map(params![thread_id], |row| {
                Ok(PostActivity {
                    author_id: row.get(0)?,
                    author_name: row.get(1)?,
                    post_date: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    // ===== Quotes =====

    fn add_quote(
        &mut self,
        character_id: &str,
        text: &str,
        source_thread_id: Option<&str>,
        source_thread_title: Option<&str>,
    ) -> StorageResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO quotes (character_id, text, source_thread_id, source_thread_title, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![character_id, text, source_thread_id, source_thread_title, now()],
        )?;
        Ok(inserted > 0)
    }

    fn quotes_for(&self, character_id: &str) -> StorageResult<Vec<QuoteRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, text, source_thread_id, source_thread_title
             FROM quotes WHERE character_id = ?1 ORDER BY id",
        )?;
        let quotes = stmt
            .query_map(params![character_id], |row| {
                Ok(QuoteRecord {
                    id: row.get(0)?,
                    text: row.get(1)?,
                    source_thread_id: row.get(2)?,
                    source_thread_title: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(quotes)
    }

    // ===== Quote Scrape Log =====

    fn is_thread_quote_scraped(&self, thread_id: &str, character_id: &str) -> StorageResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM quote_crawl_log WHERE thread_id = ?1 AND character_id = ?2",
                params![thread_id, character_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn mark_thread_quote_scraped(
        &mut self,
        thread_id: &str,
        character_id: &str,
    ) -> StorageResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO quote_crawl_log (thread_id, character_id, scraped_at) VALUES (?1, ?2, ?3)",
            params![thread_id, character_id, now()],
        )?;
        Ok(())
    }

    fn clear_quote_scrape_log(&mut self) -> StorageResult<usize> {
        let removed = self.conn.execute("DELETE FROM quote_crawl_log", [])?;
        Ok(removed)
    }

    // ===== Crawl Status =====

    fn get_crawl_status(&self, key: &str) -> StorageResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM crawl_status WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_crawl_status(&mut self, key: &str, value: &str) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO crawl_status (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now()],
        )?;
        Ok(())
    }
}
