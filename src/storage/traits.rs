//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::storage::{
    CharacterRecord, CharacterThreadLink, CharacterThreadRecord, CharacterUpsert, CrawlKind,
    PostActivity, QuoteRecord, ThreadUpsert,
};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Character not found: {0}")]
    CharacterNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// This is the narrow persistence interface the crawl engine writes through.
/// Writes are idempotent: repeating an upsert overwrites, repeating an insert
/// of an existing quote or scrape-log pair is a no-op.
pub trait Storage {
    // ===== Characters =====

    /// Inserts or updates a character
    ///
    /// Optional fields that are None keep their stored value.
    fn upsert_character(&mut self, character: &CharacterUpsert) -> StorageResult<()>;

    /// Inserts or replaces one profile field of a character
    fn upsert_profile_field(
        &mut self,
        character_id: &str,
        key: &str,
        value: &str,
    ) -> StorageResult<()>;

    /// Gets a character by id
    fn get_character(&self, id: &str) -> StorageResult<Option<CharacterRecord>>;

    /// Lists every tracked character, ordered by numeric id
    fn list_characters(&self) -> StorageResult<Vec<CharacterRecord>>;

    /// Gets every stored profile field of a character
    fn profile_fields(&self, character_id: &str) -> StorageResult<BTreeMap<String, String>>;

    /// Updates the display name of a tracked character
    ///
    /// # Returns
    ///
    /// `true` if the stored name changed, `false` if it was already current
    /// or the character is not tracked
    fn rename_character(&mut self, id: &str, name: &str) -> StorageResult<bool>;

    /// Stamps the last crawl time of the given kind
    fn update_character_crawl_time(&mut self, id: &str, kind: CrawlKind) -> StorageResult<()>;

    // ===== Threads =====

    /// Inserts or updates a thread
    ///
    /// Title, URL and category are overwritten; a missing forum or last poster
    /// keeps the stored one.
    fn upsert_thread(&mut self, thread: &ThreadUpsert) -> StorageResult<()>;

    /// Links a character to a thread, overwriting category, last-poster flag and post count
    fn link_character_thread(&mut self, link: &CharacterThreadLink) -> StorageResult<()>;

    /// Writes a thread and its character link in one transaction
    fn upsert_thread_with_link(
        &mut self,
        thread: &ThreadUpsert,
        link: &CharacterThreadLink,
    ) -> StorageResult<()>;

    /// Gets every thread linked to a character
    fn threads_for(&self, character_id: &str) -> StorageResult<Vec<CharacterThreadRecord>>;

    /// Replaces the stored post activity of a thread
    fn replace_thread_posts(&mut self, thread_id: &str, posts: &[PostActivity])
        -> StorageResult<()>;

    /// Gets the stored post activity of a thread, in insertion order
    fn thread_posts(&self, thread_id: &str) -> StorageResult<Vec<PostActivity>>;

    // ===== Quotes =====

    /// Adds a quote
    ///
    /// # Returns
    ///
    /// `true` if the quote was inserted, `false` if the character already had
    /// this exact text
    fn add_quote(
        &mut self,
        character_id: &str,
        text: &str,
        source_thread_id: Option<&str>,
        source_thread_title: Option<&str>,
    ) -> StorageResult<bool>;

    /// Gets every quote of a character, oldest first
    fn quotes_for(&self, character_id: &str) -> StorageResult<Vec<QuoteRecord>>;

    // ===== Quote Scrape Log =====

    fn is_thread_quote_scraped(&self, thread_id: &str, character_id: &str) -> StorageResult<bool>;

    fn mark_thread_quote_scraped(&mut self, thread_id: &str, character_id: &str)
        -> StorageResult<()>;

    /// Empties the scrape log
    ///
    /// # Returns
    ///
    /// The number of entries removed
    fn clear_quote_scrape_log(&mut self) -> StorageResult<usize>;

    // ===== Crawl Status =====

    fn get_crawl_status(&self, key: &str) -> StorageResult<Option<String>>;

    fn set_crawl_status(&mut self, key: &str, value: &str) -> StorageResult<()>;
}
