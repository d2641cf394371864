//! Shared fixtures: configuration, storage and forum page builders

use forum_ripple::config::{parse_config, Config};
use forum_ripple::crawler::{Crawler, SharedStorage};
use forum_ripple::state::ActivityHandle;
use forum_ripple::storage::{CharacterUpsert, SqliteStorage, Storage};
use std::sync::{Arc, Mutex};

/// A validated configuration pointed at `base_url` with every delay disabled
pub fn test_config(base_url: &str) -> Config {
    let toml = format!(
        r#"
[forum]
base-url = "{}"

[fetcher]
request-delay-ms = 0
request-timeout-secs = 5

[crawl]
character-delay-ms = 0
max-consecutive-misses = 3
max-user-id = 50

[export]
page-delay-ms = 0
poll-schedule-ms = [0]
forum-name = "board"

[storage]
database-path = ":memory:"
"#,
        base_url
    );
    parse_config(&toml).expect("test config is valid")
}

pub fn memory_storage() -> SharedStorage {
    let storage = SqliteStorage::new_in_memory().expect("Failed to open in-memory storage");
    Arc::new(Mutex::new(storage))
}

pub fn crawler(config: Config, storage: &SharedStorage) -> Crawler {
    Crawler::new(Arc::new(config), storage.clone(), ActivityHandle::default())
        .expect("Failed to create crawler")
}

pub fn seed_character(storage: &SharedStorage, id: &str, name: &str) {
    storage
        .lock()
        .unwrap()
        .upsert_character(&CharacterUpsert {
            id: id.to_string(),
            name: name.to_string(),
            profile_url: format!("https://board.example.net/index.php?showuser={}", id),
            group_name: None,
            avatar_url: None,
        })
        .expect("Failed to seed character");
}

/// One post in the `.pr-wrap` theme
pub fn post(user_id: &str, name: &str, body: &str) -> String {
    format!(
        r#"<div class="pr-wrap">
            <div class="pr-name"><a href="index.php?showuser={}">{}</a></div>
            <div class="pr-body">{}</div>
        </div>"#,
        user_id, name, body
    )
}

/// One post in the `.pr-wrap` theme carrying a `.pr-d` date line
pub fn dated_post(user_id: &str, name: &str, date: &str, body: &str) -> String {
    format!(
        r#"<div class="pr-wrap">
            <div class="pr-name"><a href="index.php?showuser={}">{}</a></div>
            <div class="pr-d">{}</div>
            <div class="pr-body">{}</div>
        </div>"#,
        user_id, name, date, body
    )
}

/// A guest post: the author name is plain text without a profile link
pub fn guest_post(name: &str, body: &str) -> String {
    format!(
        r#"<div class="pr-wrap">
            <div class="pr-name">{}</div>
            <div class="pr-body">{}</div>
        </div>"#,
        name, body
    )
}

/// Pagination control linking the given `st=` offsets of a thread
pub fn pagination(thread_id: &str, offsets: &[u32]) -> String {
    let links: String = offsets
        .iter()
        .map(|st| format!(r#"<a href="index.php?showtopic={}&amp;st={}">{}</a>"#, thread_id, st, st))
        .collect();
    format!(r#"<div class="pagination">{}</div>"#, links)
}

/// A thread page with breadcrumb, posts and an optional pagination block
pub fn thread_page(title: &str, forum: (&str, &str), posts: &[String], pages: &str) -> String {
    format!(
        r#"<html><head><title>Test Board -> {}</title></head><body>
        <div id="navstrip"><a href="index.php">Test Board</a> &gt; <a href="index.php?showforum={}">{}</a></div>
        {}
        {}
        </body></html>"#,
        title,
        forum.0,
        forum.1,
        pages,
        posts.join("\n")
    )
}

pub fn profile_page(name: &str) -> String {
    format!(
        r#"<html><head><title>Viewing Profile -> {}</title></head><body>
        <h1 class="profile-name">{}</h1>
        <dl class="profile-dossier"><dt>Age</dt><dd>35</dd></dl>
        </body></html>"#,
        name, name
    )
}

/// A search result page listing `(thread_id, title, forum_id, forum_name)` hits
pub fn search_page(hits: &[(&str, &str, &str, &str)]) -> String {
    let blocks: String = hits
        .iter()
        .map(|(thread_id, title, forum_id, forum_name)| {
            format!(
                r#"<div class="tableborder">
                    <a href="index.php?showtopic={}">{}</a>
                    <a href="index.php?showforum={}">{}</a>
                </div>"#,
                thread_id, title, forum_id, forum_name
            )
        })
        .collect();
    format!(
        "<html><head><title>Search Results</title></head><body>{}</body></html>",
        blocks
    )
}

pub fn cooldown_page() -> String {
    "<html><head><title>Board Message</title></head><body>Please wait before searching again.</body></html>"
        .to_string()
}

/// A small export file: two posts by member 42 in topic 100, one untracked post,
/// two topics, one forum and two members
pub const EXPORT_SQL: &str = r#"-- export
REPLACE INTO `ibf_posts` VALUES (1, 0, 0, 42, "Tony Stark", 0, 0, 0, 1700000000, 0, "Hello world", 0, 100, 5, 0);
REPLACE INTO `ibf_posts` VALUES (2, 0, 0, 77, "Random Member", 0, 0, 0, 1700000500, 0, "Elsewhere", 0, 200, 5, 0);
REPLACE INTO `ibf_posts` VALUES (3, 0, 0, 42, "Tony Stark", 0, 0, 0, 1700090000, 0, "Back again", 0, 100, 5, 0);
REPLACE INTO `ibf_topics` VALUES (100, "Avengers Assemble", "", "open", 0, 0, 0, 42, 1700100000, 0, 0, "Tony Stark", 0, 0, 0, 5);
REPLACE INTO `ibf_topics` VALUES (200, "Unrelated Thread", "", "open", 0, 0, 0, 77, 1700100000, 0, 0, "Random Member", 0, 0, 0, 5);
REPLACE INTO `ibf_forums` VALUES (5, 0, 0, 0, 0, 0, "IC Roleplay", 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0);
REPLACE INTO `ibf_members` VALUES (42, "Tony Stark", 3, 0, 0, 0, 0, "", 0, 2, 0, 0, 0, 0, 0, 0, 0, "", 0, 0, 0, 0);
REPLACE INTO `ibf_members` VALUES (99, "Wanda Maximoff", 3, 0, 0, 0, 0, "", 0, 0, 0, 0, 0, 0, 0, 0, 0, "", 0, 0, 0, 0);
"#;
