//! Search result extraction
//!
//! A JCink "all posts by member" search renders one `.tableborder` block per
//! hit, each holding a `showtopic=` link and a `showforum=` link. Results are
//! paginated through `st=` offsets.

use super::{element_text, numeric_param, select_all, select_first, BoardRules, ParsedThread};
use scraper::Html;
use std::collections::HashSet;
use url::Url;

/// Threads found on one search result page plus the other pages to fetch
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    /// Threads on this page, deduplicated by thread id, in page order
    pub threads: Vec<ParsedThread>,

    /// Absolute URLs of the additional result pages (never the current one)
    pub extra_pages: Vec<String>,
}

/// Parses a search result page
///
/// # Arguments
///
/// * `html` - The search result page
/// * `rules` - Base URL, category mapping and exclusion lists
///
/// # Returns
///
/// The page's threads and the URLs of every additional page advertised by the
/// pagination control. Both are empty when the markup is not recognised.
pub fn parse_search_results(html: &str, rules: &BoardRules) -> SearchPage {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let mut threads = Vec::new();
    let mut seen = HashSet::new();

    for block in select_all(root, ".tableborder") {
        let Some(topic_link) = select_first(block, r#"a[href*="showtopic="]"#) else {
            continue;
        };
        let Some(href) = topic_link.value().attr("href") else {
            continue;
        };
        let Some(thread_id) = numeric_param(href, "showtopic") else {
            continue;
        };
        if !seen.insert(thread_id.clone()) {
            continue;
        }

        let (forum_id, forum_name) = match select_first(block, r#"a[href*="showforum="]"#) {
            Some(link) => (
                link.value()
                    .attr("href")
                    .and_then(|h| numeric_param(h, "showforum")),
                Some(element_text(link)).filter(|name| !name.is_empty()),
            ),
            None => (None, None),
        };

        if let Some(id) = &forum_id {
            if rules.excluded_forum_ids.contains(id) {
                continue;
            }
        }
        if let Some(name) = &forum_name {
            if rules.excluded_forum_names.contains(name) {
                continue;
            }
        }

        let title = element_text(topic_link);
        if rules
            .excluded_title_markers
            .iter()
            .any(|marker| title.contains(marker.as_str()))
        {
            continue;
        }

        let Some(url) = rules.absolute_url(href) else {
            continue;
        };

        let category = rules.categorize(forum_id.as_deref());
        threads.push(ParsedThread {
            thread_id,
            title,
            url,
            forum_id,
            forum_name,
            category,
        });
    }

    let extra_pages = additional_page_urls(&document, rules);

    SearchPage {
        threads,
        extra_pages,
    }
}

/// Builds one URL per offset step up to the largest advertised offset
///
/// The step is the smallest positive offset on the control. Offset 0 is the
/// page being parsed and is never included.
fn additional_page_urls(document: &Html, rules: &BoardRules) -> Vec<String> {
    let mut max_offset = 0u32;
    let mut min_offset: Option<u32> = None;
    let mut template: Option<String> = None;

    for link in select_all(document.root_element(), ".pagination a[href]") {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        if href.trim_start().starts_with("javascript:") {
            continue;
        }
        let Some(offset) = numeric_param(href, "st").and_then(|st| st.parse::<u32>().ok()) else {
            continue;
        };

        if offset > 0 {
            min_offset = Some(min_offset.map_or(offset, |m| m.min(offset)));
        }
        if offset > max_offset {
            max_offset = offset;
            template = rules.absolute_url(href);
        }
    }

    let Some(template) = template.and_then(|t| Url::parse(&t).ok()) else {
        return Vec::new();
    };

    let step = min_offset.unwrap_or(rules.default_page_step).max(1);
    let retained: Vec<(String, String)> = template
        .query_pairs()
        .filter(|(key, _)| key != "st")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    (1..)
        .map(|n| n * step)
        .take_while(|offset| *offset <= max_offset)
        .map(|offset| {
            let mut url = template.clone();
            url.query_pairs_mut()
                .clear()
                .extend_pairs(retained.iter())
                .append_pair("st", &offset.to_string());
            url.to_string()
        })
        .collect()
}
