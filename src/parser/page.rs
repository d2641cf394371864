//! Page-level signals shared by every page type

use super::{numeric_param, select_all, select_first, BoardRules};
use scraper::Html;

/// Returns the trimmed `<title>` text of a document, if any
pub fn page_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    select_first(document.root_element(), "title")
        .map(|title| title.text().collect::<String>().trim().to_string())
        .filter(|title| !title.is_empty())
}

/// Detects the platform's generic error/cooldown interstitial
///
/// The interstitial is recognised by a marker in the page title (for JCink
/// boards, "Board Message"). A page without a title is never a cooldown page.
pub fn is_cooldown_page(html: &str, marker: &str) -> bool {
    page_title(html)
        .map(|title| title.contains(marker))
        .unwrap_or(false)
}

/// Detects a meta-refresh redirect and resolves its target against the base URL
///
/// Search requests are frequently answered with a short redirect page before
/// the actual results.
pub fn parse_meta_redirect(html: &str, rules: &BoardRules) -> Option<String> {
    let document = Html::parse_document(html);

    let meta = select_all(document.root_element(), "meta[http-equiv]")
        .into_iter()
        .find(|meta| {
            meta.value()
                .attr("http-equiv")
                .map(|v| v.trim().eq_ignore_ascii_case("refresh"))
                .unwrap_or(false)
        })?;

    let content = meta.value().attr("content")?;
    let lower = content.to_ascii_lowercase();
    let start = lower.find("url=")? + "url=".len();
    let target = content[start..]
        .trim()
        .trim_matches(|c| c == '\'' || c == '"')
        .trim();

    if target.is_empty() {
        return None;
    }

    rules.absolute_url(target)
}

/// Returns the largest `st=` offset advertised by the page's pagination control
///
/// Used for thread pages and member lists alike; 0 means a single page.
pub fn max_page_offset(html: &str) -> u32 {
    let document = Html::parse_document(html);
    select_all(document.root_element(), ".pagination a[href]")
        .into_iter()
        .filter_map(|link| link.value().attr("href"))
        .filter_map(|href| numeric_param(href, "st"))
        .filter_map(|st| st.parse::<u32>().ok())
        .max()
        .unwrap_or(0)
}
