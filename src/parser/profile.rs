//! Profile page extraction
//!
//! Profiles come in two skins: the "proper" theme (`h1.profile-name`,
//! `dl.profile-dossier`, hero images, power grid) and the static mini-profile
//! skin (`div.pf-*`). Each field is read through an ordered list of
//! `(selector, extractor)` candidates and the first hit wins, so a
//! theme-specific selector always takes priority over a generic one.

use super::{element_text, is_placeholder, select_all, select_first};
use regex::Regex;
use scraper::{ElementRef, Html};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Display name used when no name could be read
pub const UNKNOWN_NAME: &str = "Unknown";

/// Group ids encoded as `group-N` classes on the profile application block
const GROUP_NAMES: &[(&str, &str)] = &[
    ("4", "Admin"),
    ("5", "Reserved"),
    ("6", "Red"),
    ("7", "Orange"),
    ("8", "Yellow"),
    ("9", "Green"),
    ("10", "Blue"),
    ("11", "Purple"),
    ("12", "Corrupted"),
    ("13", "Pastel"),
    ("14", "Pink"),
    ("15", "Neutral"),
];

/// Avatar candidates, most specific first; the last one matches any background image
const AVATAR_SELECTORS: &[&str] = &[
    ".hero-sq-top",
    ".pf-c",
    ".profile-gif",
    ".hero-rect",
    ".hero-portrait",
    r#"[style*="background-image"]"#,
];

/// Hero image slots and the selectors tried for each, most specific first
const HERO_SLOTS: &[(&str, &[&str])] = &[
    ("portrait_image", &[".hero-portrait", ".profile-portrait"]),
    ("square_image", &[".hero-sq-top", ".profile-gif", ".pf-c"]),
    ("secondary_square_image", &[".hero-sq-bot", ".profile-square-alt"]),
    ("rectangle_gif", &[".hero-rect", ".profile-rect"]),
];

/// Singleton fields read from their own element
const SINGLETON_FIELDS: &[(&str, &[&str])] = &[
    ("short_quote", &[".profile-short-quote"]),
    ("connections", &[".profile-connections"]),
];

fn background_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)url\(['"]?(https?://[^'")\s,]+)['"]?\)"#).expect("valid background url regex")
    })
}

fn width_percent_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)width\s*:\s*([0-9]+(?:\.[0-9]+)?)\s*%").expect("valid width regex")
    })
}

/// One of the six fixed power-grid stats
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerStat {
    Intelligence,
    Strength,
    Speed,
    Durability,
    EnergyProjection,
    FightingSkills,
}

impl PowerStat {
    /// Recognises both the full label and the abbreviated card label
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "int" | "intelligence" => Some(PowerStat::Intelligence),
            "str" | "strength" => Some(PowerStat::Strength),
            "spd" | "speed" => Some(PowerStat::Speed),
            "dur" | "durability" => Some(PowerStat::Durability),
            "en" | "enp" | "nrg" | "energy" | "energy projection" => {
                Some(PowerStat::EnergyProjection)
            }
            "fs" | "fgt" | "fight" | "fighting" | "fighting skills" => {
                Some(PowerStat::FightingSkills)
            }
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PowerStat::Intelligence => "intelligence",
            PowerStat::Strength => "strength",
            PowerStat::Speed => "speed",
            PowerStat::Durability => "durability",
            PowerStat::EnergyProjection => "energy projection",
            PowerStat::FightingSkills => "fighting skills",
        }
    }
}

/// Power-grid ratings on the 1..=7 scale
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PowerGrid {
    pub stats: BTreeMap<PowerStat, u8>,
    /// Lower-cased label as printed on the card, e.g. `int`
    pub labels: BTreeMap<PowerStat, String>,
}

impl PowerGrid {
    pub fn get(&self, stat: PowerStat) -> Option<u8> {
        self.stats.get(&stat).copied()
    }

    pub fn insert(&mut self, stat: PowerStat, label: &str, rating: u8) {
        self.stats.insert(stat, rating);
        self.labels.insert(stat, label.trim().to_lowercase());
    }

    /// Field key a stat is stored under, `power grid - <card label>`
    pub fn field_key(&self, stat: PowerStat) -> String {
        let label = self
            .labels
            .get(&stat)
            .map(String::as_str)
            .unwrap_or_else(|| stat.label());
        format!("power grid - {label}")
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
}

/// Converts a bar width percentage onto the 1..=7 scale
///
/// Any visible bar rates at least 1.
pub fn percent_to_rating(percent: f64) -> u8 {
    if percent <= 0.0 {
        return 0;
    }
    (percent * 7.0 / 100.0).ceil().clamp(1.0, 7.0) as u8
}

/// Data read from a character profile page
#[derive(Debug, Clone, Serialize)]
pub struct ParsedProfile {
    pub user_id: String,
    pub name: String,
    pub group_name: Option<String>,
    pub avatar_url: Option<String>,
    /// Free-form fields keyed by lower-cased label, plus derived keys such as hero images
    pub fields: BTreeMap<String, String>,
    pub power_grid: PowerGrid,
}

impl ParsedProfile {
    /// False when the page yielded no display name
    pub fn has_name(&self) -> bool {
        !self.name.is_empty() && self.name != UNKNOWN_NAME
    }

    /// All stored field entries, with the power grid flattened into `power grid - <label>` keys
    pub fn field_entries(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.extend(
            self.power_grid
                .stats
                .iter()
                .map(|(stat, value)| (self.power_grid.field_key(*stat), value.to_string())),
        );
        entries
    }
}

/// Parses a profile page
///
/// # Arguments
///
/// * `html` - The profile page
/// * `user_id` - The platform user id the page belongs to
///
/// # Returns
///
/// A profile that is as complete as the markup allows. The name is
/// [`UNKNOWN_NAME`] when neither a name element nor a usable title exists.
pub fn parse_profile_page(html: &str, user_id: &str) -> ParsedProfile {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let name = parse_name(root).unwrap_or_else(|| UNKNOWN_NAME.to_string());
    let group_name = parse_group(root);
    let avatar_url = first_background_url(root, AVATAR_SELECTORS);

    let mut fields = BTreeMap::new();
    read_dossier(root, &mut fields);
    if fields.is_empty() {
        read_static_fields(root, &mut fields);
    }
    read_data_fields(root, &mut fields);
    read_codename(root, &mut fields);
    read_player(root, &mut fields);

    for (key, selectors) in HERO_SLOTS {
        if let Some(url) = first_background_url(root, selectors) {
            fields.insert(key.to_string(), url);
        }
    }

    if let Some(alias) = first_text(root, &[".profile-ooc-footer"]) {
        fields.entry("alias".to_string()).or_insert(alias);
    }
    for (key, selectors) in SINGLETON_FIELDS {
        if let Some(value) = first_text(root, selectors) {
            fields.insert(key.to_string(), value);
        }
    }
    if let Some(link) = select_first(root, ".profile-app-link a[href]")
        .and_then(|a| a.value().attr("href"))
    {
        fields.insert("application".to_string(), link.trim().to_string());
    }

    let power_grid = parse_power_grid(root);

    ParsedProfile {
        user_id: user_id.to_string(),
        name,
        group_name,
        avatar_url,
        fields,
        power_grid,
    }
}

fn parse_name(root: ElementRef<'_>) -> Option<String> {
    if let Some(name) = first_text(root, &["h1.profile-name", "div.pf-e", ".profile-name"]) {
        return Some(name);
    }

    // "Viewing Profile -> Name"
    let title = element_text(select_first(root, "title")?);
    let (_, name) = title.rsplit_once("->")?;
    Some(name.trim().to_string()).filter(|n| !n.is_empty())
}

fn parse_group(root: ElementRef<'_>) -> Option<String> {
    if let Some(app) = select_first(root, ".profile-app") {
        let encoded = app
            .value()
            .classes()
            .find_map(|class| class.strip_prefix("group-").map(|id| (class, id)));
        if let Some((class, id)) = encoded {
            let name = GROUP_NAMES
                .iter()
                .find(|(gid, _)| *gid == id)
                .map(|(_, name)| name.to_string())
                .unwrap_or_else(|| class.to_string());
            return Some(name);
        }
    }

    first_text(root, &["div.pf-x div.mp-b", ".profile-group", ".group-name"])
}

/// `dl.profile-dossier` term/definition pairs
fn read_dossier(root: ElementRef<'_>, fields: &mut BTreeMap<String, String>) {
    let Some(dossier) = select_first(root, "dl.profile-dossier") else {
        return;
    };
    let terms = select_all(dossier, "dt");
    let values = select_all(dossier, "dd");

    for (term, value) in terms.into_iter().zip(values) {
        let key = element_text(term).to_lowercase();
        let value = element_text(value);
        if !key.is_empty() && !is_placeholder(&value) {
            fields.insert(key, value);
        }
    }
}

/// `div.pf-k` blocks whose `span.pf-l` label is followed by the value
fn read_static_fields(root: ElementRef<'_>, fields: &mut BTreeMap<String, String>) {
    for block in select_all(root, "div.pf-k") {
        let Some(label) = select_first(block, "span.pf-l") else {
            continue;
        };
        let key = element_text(label).to_lowercase();
        let value = text_without(block, label);
        if !key.is_empty() && !is_placeholder(&value) {
            fields.insert(key, value);
        }
    }
}

/// Elements carrying a `data-field` name
fn read_data_fields(root: ElementRef<'_>, fields: &mut BTreeMap<String, String>) {
    for element in select_all(root, "[data-field]") {
        let Some(key) = element.value().attr("data-field") else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = element_text(element);
        if !key.is_empty() && !is_placeholder(&value) {
            fields.entry(key).or_insert(value);
        }
    }
}

fn read_codename(root: ElementRef<'_>, fields: &mut BTreeMap<String, String>) {
    let codename = first_text(root, &["h2.profile-codename", "div.pf-s span.pf-1"]);
    if let Some(codename) = codename.filter(|c| !c.eq_ignore_ascii_case("code name")) {
        fields.insert("codename".to_string(), codename);
    }
}

/// "played by <b>name</b>" plus the player metadata blocks
fn read_player(root: ElementRef<'_>, fields: &mut BTreeMap<String, String>) {
    if let Some(player) = first_text(root, &["div.pf-z b"]) {
        fields.insert("player".to_string(), player);
    }

    for block in select_all(root, "div.pf-ab") {
        let title = block
            .value()
            .attr("title")
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        if title.is_empty() {
            continue;
        }

        if let Some(triggers) = title.strip_prefix("please avoid") {
            let triggers = triggers.trim_start_matches(':').trim();
            if !triggers.is_empty() {
                fields.insert("triggers".to_string(), triggers.to_string());
            }
            continue;
        }

        let value = match select_first(block, "span.pf-ac") {
            Some(icon) => text_without(block, icon),
            None => element_text(block),
        };
        if !is_placeholder(&value) {
            fields.insert(title, value);
        }
    }
}

fn parse_power_grid(root: ElementRef<'_>) -> PowerGrid {
    let mut grid = PowerGrid::default();

    for stat in select_all(root, "div.profile-stat") {
        let Some(label) = select_first(stat, ".profile-stat-label") else {
            continue;
        };
        let Some(fill) = select_first(stat, ".profile-stat-fill") else {
            continue;
        };
        let label = element_text(label);
        let Some(kind) = PowerStat::from_label(&label) else {
            continue;
        };

        let direct = fill
            .value()
            .attr("data-value")
            .and_then(|v| v.trim().parse::<f64>().ok())
            .map(|v| v.round().clamp(0.0, 7.0) as u8);
        let from_width = || {
            let style = fill.value().attr("style")?;
            let captures = width_percent_regex().captures(style)?;
            let percent = captures.get(1)?.as_str().parse::<f64>().ok()?;
            Some(percent_to_rating(percent))
        };

        if let Some(rating) = direct.or_else(from_width).filter(|r| *r > 0) {
            grid.insert(kind, &label, rating);
        }
    }

    grid
}

/// First non-placeholder text among the selectors
fn first_text(root: ElementRef<'_>, selectors: &[&str]) -> Option<String> {
    selectors.iter().find_map(|css| {
        let element = select_first(root, css)?;
        let text = element_text(element);
        (!is_placeholder(&text)).then_some(text)
    })
}

/// First background-image URL among the selectors
///
/// A selector whose element has no usable URL falls through to the next one.
fn first_background_url(root: ElementRef<'_>, selectors: &[&str]) -> Option<String> {
    selectors.iter().find_map(|css| {
        select_all(root, css).into_iter().find_map(|element| {
            let style = element.value().attr("style")?;
            background_url(style)
        })
    })
}

/// Extracts the URL from a CSS `url(...)` declaration
pub fn background_url(style: &str) -> Option<String> {
    background_url_regex()
        .captures(style)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Text of `element` with the text of `excluded` (a descendant) removed
fn text_without(element: ElementRef<'_>, excluded: ElementRef<'_>) -> String {
    let full = element_text(element);
    let skip = element_text(excluded);
    let rest = match full.strip_prefix(skip.as_str()) {
        Some(rest) => rest.to_string(),
        None => full.replacen(skip.as_str(), "", 1),
    };
    rest.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_proper_theme_profile() {
        let html = r#"<html><head><title>Viewing Profile -> Tony Stark</title></head><body>
        <div class="profile-app group-10">
            <h1 class="profile-name">Tony Stark</h1>
            <h2 class="profile-codename">Iron Man</h2>
            <div class="hero-portrait" style="background-image: url('https://img.example/portrait.png')"></div>
            <div class="hero-sq-top" style="background-image: url(&quot;https://img.example/square.gif&quot;)"></div>
            <div class="hero-sq-bot" style="background-image:url(https://img.example/square2.png)"></div>
            <dl class="profile-dossier">
                <dt>Age</dt><dd>48</dd>
                <dt>Occupation</dt><dd>No Information</dd>
                <dt>Affiliation</dt><dd>Avengers</dd>
            </dl>
            <div class="profile-ooc-footer">Shell</div>
            <div class="profile-short-quote">Genius, billionaire.</div>
            <div class="profile-connections">No Information</div>
        </div>
        </body></html>"#;

        let profile = parse_profile_page(html, "42");
        assert_eq!(profile.user_id, "42");
        assert_eq!(profile.name, "Tony Stark");
        assert!(profile.has_name());
        assert_eq!(profile.group_name.as_deref(), Some("Blue"));
        assert_eq!(
            profile.avatar_url.as_deref(),
            Some("https://img.example/square.gif")
        );
        assert_eq!(profile.fields.get("age").map(String::as_str), Some("48"));
        assert_eq!(
            profile.fields.get("affiliation").map(String::as_str),
            Some("Avengers")
        );
        assert!(!profile.fields.contains_key("occupation"));
        assert!(!profile.fields.contains_key("connections"));
        assert_eq!(profile.fields["codename"], "Iron Man");
        assert_eq!(profile.fields["alias"], "Shell");
        assert_eq!(profile.fields["short_quote"], "Genius, billionaire.");
        assert_eq!(
            profile.fields["portrait_image"],
            "https://img.example/portrait.png"
        );
        assert_eq!(
            profile.fields["secondary_square_image"],
            "https://img.example/square2.png"
        );
        assert!(!profile.fields.contains_key("rectangle_gif"));
    }

    #[test]
    fn test_hero_selector_beats_generic_fallback() {
        let html = r#"<html><body>
        <div class="profile-gif" style="background-image: url('https://img.example/generic.gif')"></div>
        <div class="hero-sq-top" style="background-image: url('https://img.example/hero.gif')"></div>
        </body></html>"#;

        let profile = parse_profile_page(html, "7");
        assert_eq!(
            profile.fields.get("square_image").map(String::as_str),
            Some("https://img.example/hero.gif")
        );
        assert_eq!(
            profile.avatar_url.as_deref(),
            Some("https://img.example/hero.gif")
        );
    }

    #[test]
    fn test_generic_fallback_used_when_hero_missing() {
        let html = r#"<div class="profile-gif" style="background-image: url('https://img.example/generic.gif')"></div>"#;
        let profile = parse_profile_page(html, "7");
        assert_eq!(
            profile.fields.get("square_image").map(String::as_str),
            Some("https://img.example/generic.gif")
        );
    }

    #[test]
    fn test_avatar_falls_back_to_any_background_image() {
        let html = r#"<div class="other" style="background-image: url(https://img.example/fallback.jpg)"></div>"#;
        let profile = parse_profile_page(html, "1");
        assert_eq!(
            profile.avatar_url.as_deref(),
            Some("https://img.example/fallback.jpg")
        );
    }

    #[test]
    fn test_static_skin_profile() {
        let html = r#"<html><body>
        <div class="pf-e">Natasha Romanoff</div>
        <div class="pf-x"><div class="mp-b">Red Room</div></div>
        <div class="pf-s"><span class="pf-1">Black Widow</span></div>
        <div class="pf-k"><span class="pf-l">Age</span>35</div>
        <div class="pf-k"><span class="pf-l">Height</span>No Information</div>
        <div class="pf-z">played by <b>Sam</b></div>
        <div class="pf-ab" title="Pronouns"><span class="pf-ac">*</span>she/her</div>
        <div class="pf-ab" title="Please avoid: spiders, heights"></div>
        </body></html>"#;

        let profile = parse_profile_page(html, "3");
        assert_eq!(profile.name, "Natasha Romanoff");
        assert_eq!(profile.group_name.as_deref(), Some("Red Room"));
        assert_eq!(profile.fields["codename"], "Black Widow");
        assert_eq!(profile.fields["age"], "35");
        assert!(!profile.fields.contains_key("height"));
        assert_eq!(profile.fields["player"], "Sam");
        assert_eq!(profile.fields["pronouns"], "she/her");
        assert_eq!(profile.fields["triggers"], "spiders, heights");
    }

    #[test]
    fn test_name_falls_back_to_title() {
        let html = "<html><head><title>Viewing Profile -> Bucky Barnes</title></head></html>";
        assert_eq!(parse_profile_page(html, "9").name, "Bucky Barnes");
    }

    #[test]
    fn test_defaults_when_missing() {
        let profile = parse_profile_page("<html><body>Bare page</body></html>", "99");
        assert_eq!(profile.name, UNKNOWN_NAME);
        assert!(!profile.has_name());
        assert_eq!(profile.group_name, None);
        assert_eq!(profile.avatar_url, None);
        assert!(profile.fields.is_empty());
        assert!(profile.power_grid.is_empty());
    }

    #[test]
    fn test_unknown_group_class_is_kept_verbatim() {
        let html = r#"<div class="profile-app group-99"><h1 class="profile-name">X</h1></div>"#;
        assert_eq!(
            parse_profile_page(html, "1").group_name.as_deref(),
            Some("group-99")
        );
    }

    #[test]
    fn test_power_grid() {
        let html = r#"<html><body>
        <div class="profile-stat"><span class="profile-stat-label">INT</span>
            <div class="profile-stat-fill" data-value="6"></div></div>
        <div class="profile-stat"><span class="profile-stat-label">STR</span>
            <div class="profile-stat-fill" style="width: 57%"></div></div>
        <div class="profile-stat"><span class="profile-stat-label">SPD</span>
            <div class="profile-stat-fill" style="width: 0%"></div></div>
        <div class="profile-stat"><span class="profile-stat-label">DUR</span>
            <div class="profile-stat-fill" data-value="n/a"></div></div>
        <div class="profile-stat"><span class="profile-stat-label">Fighting Skills</span>
            <div class="profile-stat-fill" style="width:100%"></div></div>
        <div class="profile-stat"><span class="profile-stat-label">Charm</span>
            <div class="profile-stat-fill" data-value="7"></div></div>
        </body></html>"#;

        let profile = parse_profile_page(html, "1");
        let grid = &profile.power_grid;
        assert_eq!(grid.get(PowerStat::Intelligence), Some(6));
        assert_eq!(grid.get(PowerStat::Strength), Some(4));
        assert_eq!(grid.get(PowerStat::Speed), None);
        assert_eq!(grid.get(PowerStat::Durability), None);
        assert_eq!(grid.get(PowerStat::FightingSkills), Some(7));
        assert_eq!(grid.stats.len(), 3);

        let entries = profile.field_entries();
        assert!(entries.contains(&("power grid - int".to_string(), "6".to_string())));
        assert!(entries.contains(&("power grid - str".to_string(), "4".to_string())));
        assert!(entries.contains(&("power grid - fighting skills".to_string(), "7".to_string())));
        assert!(!entries.iter().any(|(k, _)| k == "power grid - intelligence"));
    }

    #[test]
    fn test_percent_to_rating() {
        assert_eq!(percent_to_rating(0.0), 0);
        assert_eq!(percent_to_rating(-3.0), 0);
        assert_eq!(percent_to_rating(5.0), 1);
        assert_eq!(percent_to_rating(14.0), 1);
        assert_eq!(percent_to_rating(15.0), 2);
        assert_eq!(percent_to_rating(50.0), 4);
        assert_eq!(percent_to_rating(100.0), 7);
        assert_eq!(percent_to_rating(150.0), 7);
    }
}
