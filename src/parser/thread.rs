//! Thread page extraction
//!
//! Post markup differs between board themes. Containers, author blocks and
//! bodies are located through ordered selector cascades; the first variant
//! that matches wins.

use super::{collapse_whitespace, element_text, numeric_param, select_all, select_first};
use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html};
use serde::Serialize;
use std::sync::OnceLock;

/// Post wrapper selectors, most specific theme first
const POST_CONTAINERS: &[&str] = &[".pr-a", ".pr-wrap"];

/// Author name block inside a post
const POST_AUTHORS: &[&str] = &[".pr-j", ".pr-name"];

/// Post body inside a post
const POST_BODIES: &[&str] = &[".postcolor", ".pr-body"];

/// Breadcrumb containers holding the `showforum=` trail
const BREADCRUMBS: &[&str] = &["#navstrip", ".navstrip", ".breadcrumb"];

/// Date line of a post in themes that give it its own element
const POST_DATE: &str = ".pr-d";

fn absolute_date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+(\d{1,2}),?\s+(\d{4})")
            .expect("valid date regex")
    })
}

fn today_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\btoday\b").expect("valid today regex"))
}

fn yesterday_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\byesterday\b").expect("valid yesterday regex"))
}

/// The author of a post; also used for the last poster of a thread
///
/// A missing user id denotes a guest poster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedLastPoster {
    pub name: String,
    pub user_id: Option<String>,
}

impl ParsedLastPoster {
    pub fn is_guest(&self) -> bool {
        self.user_id.is_none()
    }
}

/// One member post on a thread page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedPost {
    pub user_id: String,
    pub name: String,
    /// `YYYY-MM-DD`, when the post header carries a readable date
    pub post_date: Option<String>,
}

/// Forum a thread belongs to, read from the page breadcrumb
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForumRef {
    pub id: String,
    pub name: Option<String>,
}

/// Returns every post container on the page using the first matching theme variant
pub(crate) fn post_containers(root: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    POST_CONTAINERS
        .iter()
        .map(|css| select_all(root, css))
        .find(|posts| !posts.is_empty())
        .unwrap_or_default()
}

/// Returns the body element of a post
pub(crate) fn post_body<'a>(post: ElementRef<'a>) -> Option<ElementRef<'a>> {
    POST_BODIES.iter().find_map(|css| select_first(post, css))
}

/// Reads the author block of a post
pub(crate) fn post_author(post: ElementRef<'_>) -> Option<ParsedLastPoster> {
    let author = POST_AUTHORS.iter().find_map(|css| select_first(post, css))?;

    let name = element_text(author);
    if name.is_empty() {
        return None;
    }

    let user_id = select_first(author, r#"a[href*="showuser="]"#)
        .and_then(|link| link.value().attr("href"))
        .and_then(|href| numeric_param(href, "showuser"));

    Some(ParsedLastPoster { name, user_id })
}

/// Extracts the author of the final post on a thread page
///
/// # Returns
///
/// * `Some(ParsedLastPoster)` - The last post's author
/// * `None` - No post containers were found or the name could not be read
pub fn parse_last_poster(html: &str) -> Option<ParsedLastPoster> {
    let document = Html::parse_document(html);
    let posts = post_containers(document.root_element());
    let last = posts.last()?;
    post_author(*last)
}

/// Extracts every member post on a thread page, in page order
///
/// Guest posts carry no user id and are skipped. The date comes from the
/// post's date element when the theme has one, else from the post text
/// outside the body. `today` anchors the "Today" and "Yesterday" labels the
/// board prints for recent posts.
pub fn parse_post_records(html: &str, today: NaiveDate) -> Vec<ParsedPost> {
    let document = Html::parse_document(html);

    post_containers(document.root_element())
        .into_iter()
        .filter_map(|post| {
            let author = post_author(post)?;
            let user_id = author.user_id?;

            let post_date = select_first(post, POST_DATE)
                .and_then(|el| parse_post_date(&element_text(el), today))
                .or_else(|| parse_post_date(&header_text(post), today));

            Some(ParsedPost {
                user_id,
                name: author.name,
                post_date,
            })
        })
        .collect()
}

/// Reads a board date label as `YYYY-MM-DD`
///
/// Accepts "Today, 08:30 PM", "Yesterday, 05:12 AM" and absolute dates such
/// as "Jan 15 2026, 08:30 PM".
pub fn parse_post_date(text: &str, today: NaiveDate) -> Option<String> {
    let date = if today_regex().is_match(text) {
        today
    } else if yesterday_regex().is_match(text) {
        today.pred_opt()?
    } else {
        let captures = absolute_date_regex().captures(text)?;
        let month = month_number(captures.get(1)?.as_str())?;
        let day = captures.get(2)?.as_str().parse::<u32>().ok()?;
        let year = captures.get(3)?.as_str().parse::<i32>().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)?
    };
    Some(date.format("%Y-%m-%d").to_string())
}

fn month_number(name: &str) -> Option<u32> {
    let month = match name.get(..3)?.to_ascii_lowercase().as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// Text of a post outside its body
fn header_text(post: ElementRef<'_>) -> String {
    let body = post_body(post).map(|b| b.id());
    let parts: Vec<&str> = post
        .descendants()
        .filter(|node| match body {
            Some(body) => !node.ancestors().any(|a| a.id() == body) && node.id() != body,
            None => true,
        })
        .filter_map(|node| node.value().as_text().map(|t| &**t))
        .collect();
    collapse_whitespace(&parts.join(" "))
}

/// Reads the thread title from the `<title>` text ("Board -> Thread Title")
pub fn parse_thread_title(html: &str) -> Option<String> {
    let title = super::page::page_title(html)?;
    let title = match title.rsplit_once("->") {
        Some((_, tail)) => tail.trim().to_string(),
        None => title,
    };
    Some(title).filter(|t| !t.is_empty())
}

/// Reads the innermost forum of the page breadcrumb
pub fn parse_thread_forum(html: &str) -> Option<ForumRef> {
    let document = Html::parse_document(html);
    let root = document.root_element();

    BREADCRUMBS.iter().find_map(|css| {
        let crumb = select_first(root, css)?;
        let link = select_all(crumb, r#"a[href*="showforum="]"#).pop()?;
        let id = numeric_param(link.value().attr("href")?, "showforum")?;
        let name = Some(element_text(link)).filter(|n| !n.is_empty());
        Some(ForumRef { id, name })
    })
}
