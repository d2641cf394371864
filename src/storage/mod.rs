//! Storage module for persisting crawl data
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - Character, profile field and thread persistence
//! - Quote storage and the per-thread quote scrape log
//! - Key/value crawl status markers

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::parser::ThreadCategory;
use serde::Serialize;
use std::path::Path;

/// Opens (or creates) a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// Character data written by profile crawls
#[derive(Debug, Clone)]
pub struct CharacterUpsert {
    pub id: String,
    pub name: String,
    pub profile_url: String,
    pub group_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// A stored character
#[derive(Debug, Clone, Serialize)]
pub struct CharacterRecord {
    pub id: String,
    pub name: String,
    pub profile_url: String,
    pub group_name: Option<String>,
    pub avatar_url: Option<String>,
    pub threads_crawled_at: Option<String>,
    pub profile_crawled_at: Option<String>,
}

/// Thread data written by thread crawls
#[derive(Debug, Clone)]
pub struct ThreadUpsert {
    pub thread_id: String,
    pub title: String,
    pub url: String,
    pub forum_id: Option<String>,
    pub forum_name: Option<String>,
    pub category: ThreadCategory,
    pub last_poster_id: Option<String>,
    pub last_poster_name: Option<String>,
    pub last_poster_avatar: Option<String>,
}

/// Character-to-thread link
#[derive(Debug, Clone)]
pub struct CharacterThreadLink {
    pub character_id: String,
    pub thread_id: String,
    pub category: ThreadCategory,
    pub is_user_last_poster: bool,
    /// Posts the character has made in the thread
    pub post_count: u32,
}

/// A thread as seen from one linked character
#[derive(Debug, Clone, Serialize)]
pub struct CharacterThreadRecord {
    pub thread_id: String,
    pub title: String,
    pub url: String,
    pub forum_name: Option<String>,
    pub category: ThreadCategory,
    pub last_poster_name: Option<String>,
    pub is_user_last_poster: bool,
    pub post_count: u32,
}

/// A stored quote
#[derive(Debug, Clone, Serialize)]
pub struct QuoteRecord {
    pub id: i64,
    pub text: String,
    pub source_thread_id: Option<String>,
    pub source_thread_title: Option<String>,
}

/// One post's author and date
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostActivity {
    pub author_id: String,
    pub author_name: Option<String>,
    pub post_date: Option<String>,
}

/// Which crawl timestamp to stamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlKind {
    Threads,
    Profile,
}

impl CrawlKind {
    pub fn column(&self) -> &'static str {
        match self {
            Self::Threads => "threads_crawled_at",
            Self::Profile => "profile_crawled_at",
        }
    }
}
