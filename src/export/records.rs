//! Typed projections of exported rows
//!
//! Column offsets follow the platform's IPB 1.3 table layout. Rows shorter
//! than the widest column a projection reads are skipped.

use super::dump::{RawDump, SqlValue};
use chrono::DateTime;
use serde::Serialize;

mod posts {
    pub const AUTHOR_ID: usize = 3;
    pub const AUTHOR_NAME: usize = 4;
    pub const POST_DATE: usize = 8;
    pub const BODY: usize = 10;
    pub const TOPIC_ID: usize = 12;
    pub const FORUM_ID: usize = 13;
    pub const MIN_COLUMNS: usize = FORUM_ID + 1;
}

mod topics {
    pub const ID: usize = 0;
    pub const TITLE: usize = 1;
    pub const STATE: usize = 3;
    pub const LAST_POSTER_ID: usize = 7;
    pub const LAST_POST_DATE: usize = 8;
    pub const LAST_POSTER_NAME: usize = 11;
    pub const FORUM_ID: usize = 15;
    pub const MIN_COLUMNS: usize = FORUM_ID + 1;
}

mod members {
    pub const ID: usize = 0;
    pub const NAME: usize = 1;
    pub const POST_COUNT: usize = 9;
    pub const MIN_COLUMNS: usize = POST_COUNT + 1;
}

mod forums {
    pub const ID: usize = 0;
    pub const NAME: usize = 6;
    pub const CATEGORY_ID: usize = 16;
    pub const MIN_COLUMNS: usize = CATEGORY_ID + 1;
}

const UNTITLED: &str = "Untitled";

/// A post row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostRecord {
    pub author_id: String,
    pub author_name: Option<String>,
    pub thread_id: Option<String>,
    /// Calendar date of the post (`YYYY-MM-DD`, UTC)
    pub post_date: Option<String>,
    pub forum_id: Option<String>,
    pub body: Option<String>,
}

/// A topic (thread) row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicRecord {
    pub thread_id: String,
    pub title: String,
    pub forum_id: Option<String>,
    pub state: Option<String>,
    pub last_poster_id: Option<String>,
    pub last_poster_name: Option<String>,
    pub last_post_date: Option<String>,
}

/// A forum row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForumRecord {
    pub forum_id: String,
    pub name: String,
    pub category_id: Option<String>,
}

/// A member row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberRecord {
    pub member_id: String,
    pub name: String,
    pub post_count: u64,
}

/// Converts a Unix timestamp column into a `YYYY-MM-DD` date
///
/// Non-positive, missing and unparseable values yield None.
pub fn unix_to_iso(value: &SqlValue) -> Option<String> {
    let seconds = value.as_i64().filter(|s| *s > 0)?;
    DateTime::from_timestamp(seconds, 0).map(|dt| dt.format("%Y-%m-%d").to_string())
}

fn text(value: &SqlValue) -> Option<String> {
    match value {
        SqlValue::Text(s) if !s.trim().is_empty() => Some(s.clone()),
        SqlValue::Int(i) => Some(i.to_string()),
        _ => None,
    }
}

fn rows<'a>(dump: &'a RawDump, table: &str, min_columns: usize) -> impl Iterator<Item = &'a Vec<SqlValue>> {
    dump.get(table)
        .into_iter()
        .flatten()
        .filter(move |row| row.len() >= min_columns)
}

/// Projects post rows; guest posts (no author id) are dropped
pub fn project_posts(dump: &RawDump, include_body: bool) -> Vec<PostRecord> {
    rows(dump, "posts", posts::MIN_COLUMNS)
        .filter_map(|row| {
            let author_id = row[posts::AUTHOR_ID].as_id()?;
            Some(PostRecord {
                author_id,
                author_name: text(&row[posts::AUTHOR_NAME]),
                thread_id: row[posts::TOPIC_ID].as_id(),
                post_date: unix_to_iso(&row[posts::POST_DATE]),
                forum_id: row[posts::FORUM_ID].as_id(),
                body: if include_body {
                    row[posts::BODY].as_text().map(str::to_string)
                } else {
                    None
                },
            })
        })
        .collect()
}

/// Projects topic rows
pub fn project_topics(dump: &RawDump) -> Vec<TopicRecord> {
    rows(dump, "topics", topics::MIN_COLUMNS)
        .filter_map(|row| {
            let thread_id = row[topics::ID].as_id()?;
            Some(TopicRecord {
                thread_id,
                title: text(&row[topics::TITLE]).unwrap_or_else(|| UNTITLED.to_string()),
                forum_id: row[topics::FORUM_ID].as_id(),
                state: text(&row[topics::STATE]),
                last_poster_id: row[topics::LAST_POSTER_ID].as_id(),
                last_poster_name: row[topics::LAST_POSTER_NAME]
                    .as_text()
                    .filter(|s| !s.trim().is_empty())
                    .map(str::to_string),
                last_post_date: unix_to_iso(&row[topics::LAST_POST_DATE]),
            })
        })
        .collect()
}

/// Projects forum rows
pub fn project_forums(dump: &RawDump) -> Vec<ForumRecord> {
    rows(dump, "forums", forums::MIN_COLUMNS)
        .filter_map(|row| {
            let forum_id = row[forums::ID].as_id()?;
            Some(ForumRecord {
                forum_id,
                name: text(&row[forums::NAME]).unwrap_or_else(|| "Unknown Forum".to_string()),
                category_id: match &row[forums::CATEGORY_ID] {
                    SqlValue::Null => None,
                    value => text(value),
                },
            })
        })
        .collect()
}

/// Projects member rows; an unreadable post count is zero
pub fn project_members(dump: &RawDump) -> Vec<MemberRecord> {
    rows(dump, "members", members::MIN_COLUMNS)
        .filter_map(|row| {
            let member_id = row[members::ID].as_id()?;
            Some(MemberRecord {
                member_id,
                name: text(&row[members::NAME]).unwrap_or_else(|| "Unknown".to_string()),
                post_count: row[members::POST_COUNT]
                    .as_i64()
                    .and_then(|n| u64::try_from(n).ok())
                    .unwrap_or(0),
            })
        })
        .collect()
}
