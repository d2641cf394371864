//! HTML extraction layer
//!
//! Pure functions that turn raw forum markup into typed records. Every
//! extractor tolerates missing or variant markup and degrades to partial or
//! empty results instead of failing.
//!
//! - [`search`]: search result pages and their pagination
//! - [`thread`]: last poster, post authors and dates, thread pagination and title
//! - [`profile`]: profile pages, including hero images and the power grid
//! - [`quotes`]: dialogue quotes authored by one character
//! - [`members`]: member-list pages
//! - [`page`]: page-level signals (cooldown interstitial, meta refresh)

pub mod members;
pub mod page;
pub mod profile;
pub mod quotes;
pub mod search;
pub mod thread;

pub use members::{parse_member_list, MemberEntry};
pub use page::{is_cooldown_page, max_page_offset, parse_meta_redirect};
pub use profile::{parse_profile_page, ParsedProfile, PowerGrid, PowerStat};
pub use quotes::{extract_quotes, ExtractedQuote, QuoteRules};
pub use search::{parse_search_results, SearchPage};
pub use thread::{
    parse_last_poster, parse_post_date, parse_post_records, parse_thread_forum,
    parse_thread_title, ForumRef, ParsedLastPoster, ParsedPost,
};

use crate::config::ForumConfig;
use scraper::{ElementRef, Selector};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use url::Url;

/// Category of a thread, derived from the forum it lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadCategory {
    Ongoing,
    Comms,
    Complete,
    Incomplete,
}

impl ThreadCategory {
    /// All categories, in reporting order
    pub const ALL: [ThreadCategory; 4] = [
        ThreadCategory::Ongoing,
        ThreadCategory::Comms,
        ThreadCategory::Complete,
        ThreadCategory::Incomplete,
    ];

    /// Returns the category name as stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadCategory::Ongoing => "ongoing",
            ThreadCategory::Comms => "comms",
            ThreadCategory::Complete => "complete",
            ThreadCategory::Incomplete => "incomplete",
        }
    }

    /// Parses a stored category name
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "ongoing" => Some(ThreadCategory::Ongoing),
            "comms" => Some(ThreadCategory::Comms),
            "complete" => Some(ThreadCategory::Complete),
            "incomplete" => Some(ThreadCategory::Incomplete),
            _ => None,
        }
    }
}

impl fmt::Display for ThreadCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Board-specific rules the extractors need: base URL, forum-to-category
/// mapping and the search-result exclusion lists
#[derive(Debug, Clone)]
pub struct BoardRules {
    pub base_url: Url,
    pub complete_forum_id: String,
    pub incomplete_forum_id: String,
    pub comms_forum_id: String,
    pub excluded_forum_ids: HashSet<String>,
    pub excluded_forum_names: HashSet<String>,
    pub excluded_title_markers: Vec<String>,
    pub cooldown_marker: String,
    /// Offset step used when the pagination control advertises a single page
    pub default_page_step: u32,
}

impl BoardRules {
    /// Builds the rules from the forum configuration
    pub fn from_config(config: &ForumConfig, default_page_step: u32) -> Result<Self, url::ParseError> {
        Ok(Self {
            base_url: Url::parse(&config.base_url)?,
            complete_forum_id: config.complete_forum_id.clone(),
            incomplete_forum_id: config.incomplete_forum_id.clone(),
            comms_forum_id: config.comms_forum_id.clone(),
            excluded_forum_ids: config.excluded_forum_ids.iter().cloned().collect(),
            excluded_forum_names: config.excluded_forum_names.iter().cloned().collect(),
            excluded_title_markers: config.excluded_title_markers.clone(),
            cooldown_marker: config.cooldown_title_marker.clone(),
            default_page_step,
        })
    }

    /// Maps a forum id onto its thread category
    ///
    /// Total and deterministic: any id that is not one of the three configured
    /// forums, including no id at all, is `Ongoing`.
    pub fn categorize(&self, forum_id: Option<&str>) -> ThreadCategory {
        match forum_id {
            Some(id) if id == self.complete_forum_id => ThreadCategory::Complete,
            Some(id) if id == self.incomplete_forum_id => ThreadCategory::Incomplete,
            Some(id) if id == self.comms_forum_id => ThreadCategory::Comms,
            _ => ThreadCategory::Ongoing,
        }
    }

    /// Resolves a possibly relative href against the board's base URL
    pub fn absolute_url(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.starts_with("http://") || href.starts_with("https://") {
            return Some(href.to_string());
        }
        self.base_url.join(href).ok().map(|url| url.to_string())
    }
}

/// A thread found on a search result page
///
/// Two threads are equal when their ids are equal.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedThread {
    pub thread_id: String,
    pub title: String,
    pub url: String,
    pub forum_id: Option<String>,
    pub forum_name: Option<String>,
    pub category: ThreadCategory,
}

impl PartialEq for ParsedThread {
    fn eq(&self, other: &Self) -> bool {
        self.thread_id == other.thread_id
    }
}

impl Eq for ParsedThread {}

/// Parses a CSS selector, returning None for invalid selectors
pub(crate) fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

/// First descendant of `scope` matching `css`
pub(crate) fn select_first<'a>(scope: ElementRef<'a>, css: &str) -> Option<ElementRef<'a>> {
    let sel = selector(css)?;
    let found = scope.select(&sel).next();
    found
}

/// All descendants of `scope` matching `css`
pub(crate) fn select_all<'a>(scope: ElementRef<'a>, css: &str) -> Vec<ElementRef<'a>> {
    match selector(css) {
        Some(sel) => scope.select(&sel).collect(),
        None => Vec::new(),
    }
}

/// Text content of an element with whitespace runs collapsed to single spaces
pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extracts the numeric value of a `key=` query parameter from an href
///
/// The key must start the query or follow `&`/`?`, so `st=` never matches `last=`.
pub(crate) fn numeric_param(href: &str, key: &str) -> Option<String> {
    let needle = format!("{}=", key);
    let mut search_from = 0;

    while let Some(pos) = href[search_from..].find(&needle) {
        let start = search_from + pos;
        let at_boundary = start == 0
            || matches!(href.as_bytes()[start - 1], b'?' | b'&' | b';' | b'/');
        let value_start = start + needle.len();

        if at_boundary {
            let digits: String = href[value_start..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if !digits.is_empty() {
                return Some(digits);
            }
        }
        search_from = value_start;
    }

    None
}

/// The literal "no information" placeholder the platform renders for empty fields
pub(crate) fn is_placeholder(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case("No Information")
}
