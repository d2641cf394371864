//! Member-list extraction

use super::{element_text, numeric_param, select_all};
use scraper::Html;
use std::collections::HashSet;

/// A member row from the member list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberEntry {
    pub user_id: String,
    pub name: String,
}

/// Lists every `(user id, name)` pair linked from a member-list page
///
/// Entries are deduplicated by user id; links without visible text (avatar
/// links, for example) are ignored so that the named link for the same member
/// can still be picked up.
pub fn parse_member_list(html: &str) -> Vec<MemberEntry> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut members = Vec::new();

    for link in select_all(document.root_element(), r#"a[href*="showuser="]"#) {
        let Some(user_id) = link
            .value()
            .attr("href")
            .and_then(|href| numeric_param(href, "showuser"))
        else {
            continue;
        };

        let name = element_text(link);
        if name.is_empty() || seen.contains(&user_id) {
            continue;
        }

        seen.insert(user_id.clone());
        members.push(MemberEntry { user_id, name });
    }

    members
}
