//! Administrative database export ingestion
//!
//! The platform's admin panel can dump selected database tables to a flat SQL
//! file. [`ExportClient`] drives that protocol, [`dump`] parses the file and
//! [`records`] projects its rows into typed records.

mod client;
pub mod dump;
pub mod records;

pub use client::{ExportClient, ExportState};
pub use dump::{parse_sql_dump, RawDump, SqlValue};
pub use records::{
    project_forums, project_members, project_posts, project_topics, unix_to_iso, ForumRecord,
    MemberRecord, PostRecord, TopicRecord,
};

use serde::Serialize;
use thiserror::Error;

/// Internal part numbers the dump uses for each table
pub const PART_MEMBERS: &str = "21";
pub const PART_TOPICS: &str = "23";
pub const PART_POSTS: &str = "32";
pub const PART_FORUMS: &str = "36";

/// Failures of the export protocol
///
/// These never leave [`ExportClient::fetch_snapshot`]; they are logged and
/// turned into an empty snapshot.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no admin credentials configured")]
    MissingCredentials,

    #[error("login rejected (HTTP {status}): no session token found")]
    LoginRejected { status: u16 },

    #[error("dump could not be started (HTTP {status})")]
    StartRejected { status: u16 },

    #[error("dump part {part} still paginating after {pages} pages")]
    PageCeiling { part: String, pages: u32 },

    #[error("export file not available after {attempts} attempts")]
    FileNotReady { attempts: usize },

    #[error("invalid export URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Admin panel login
#[derive(Debug, Clone)]
pub struct ExportCredentials {
    pub username: String,
    pub password: String,
}

impl ExportCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Everything projected from one export
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportSnapshot {
    pub posts: Vec<PostRecord>,
    pub topics: Vec<TopicRecord>,
    pub forums: Vec<ForumRecord>,
    pub members: Vec<MemberRecord>,
}

impl ExportSnapshot {
    /// Projects every supported table of a parsed dump
    pub fn from_dump(dump: &RawDump) -> Self {
        Self {
            posts: project_posts(dump, false),
            topics: project_topics(dump),
            forums: project_forums(dump),
            members: project_members(dump),
        }
    }

    /// Parses and projects the raw SQL text of an export file
    pub fn from_sql(sql: &str) -> Self {
        Self::from_dump(&parse_sql_dump(sql))
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
            && self.topics.is_empty()
            && self.forums.is_empty()
            && self.members.is_empty()
    }

    /// Name of a forum id, if the export contained it
    pub fn forum_name(&self, forum_id: &str) -> Option<&str> {
        self.forums
            .iter()
            .find(|f| f.forum_id == forum_id)
            .map(|f| f.name.as_str())
    }
}
