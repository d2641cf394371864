use serde::Deserialize;

/// Main configuration structure for Forum-Ripple
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub forum: ForumConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub quotes: QuoteConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub export: ExportConfig,
    pub storage: StorageConfig,
}

/// The remote forum and how its forums map onto thread categories
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ForumConfig {
    /// Root URL of the forum, e.g. `https://board.jcink.net`
    pub base_url: String,

    #[serde(default = "default_complete_forum_id")]
    pub complete_forum_id: String,

    #[serde(default = "default_incomplete_forum_id")]
    pub incomplete_forum_id: String,

    #[serde(default = "default_comms_forum_id")]
    pub comms_forum_id: String,

    /// Forums whose threads never show up in search results
    #[serde(default)]
    pub excluded_forum_ids: Vec<String>,

    #[serde(default = "default_excluded_forum_names")]
    pub excluded_forum_names: Vec<String>,

    /// Title fragments marking administrative, non-content threads
    #[serde(default = "default_excluded_title_markers")]
    pub excluded_title_markers: Vec<String>,

    /// Display names that are never registered as characters
    #[serde(default)]
    pub excluded_names: Vec<String>,

    #[serde(default = "default_cooldown_marker")]
    pub cooldown_title_marker: String,
}

impl ForumConfig {
    /// Returns true if the display name is on the exclusion list (case-insensitive)
    pub fn is_excluded_name(&self, name: &str) -> bool {
        let name = name.trim();
        self.excluded_names
            .iter()
            .any(|excluded| excluded.trim().eq_ignore_ascii_case(name))
    }
}

/// HTTP fetch behaviour
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FetcherConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Delay paid by every polite request, in milliseconds
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: u32,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub bot_username: Option<String>,

    #[serde(default)]
    pub bot_password: Option<String>,

    /// Headless browser argv used for client-side rendered pages; the URL is appended
    #[serde(default)]
    pub render_command: Option<Vec<String>>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            request_delay_ms: default_request_delay_ms(),
            max_concurrent_requests: default_max_concurrent_requests(),
            request_timeout_secs: default_request_timeout_secs(),
            bot_username: None,
            bot_password: None,
            render_command: None,
        }
    }
}

/// Dialogue quote filters
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct QuoteConfig {
    #[serde(default = "default_min_words")]
    pub min_words: usize,

    /// Maximum quote length in characters before truncation
    #[serde(default = "default_max_length")]
    pub max_length: usize,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            min_words: default_min_words(),
            max_length: default_max_length(),
        }
    }
}

/// Orchestration and scheduling
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlConfig {
    #[serde(default = "default_discovery_interval")]
    pub discovery_interval_minutes: u64,

    #[serde(default = "default_threads_interval")]
    pub threads_interval_minutes: u64,

    #[serde(default = "default_profiles_interval")]
    pub profiles_interval_minutes: u64,

    /// Gap between per-character crawls in bulk loops, in milliseconds
    #[serde(default = "default_character_delay_ms")]
    pub character_delay_ms: u64,

    #[serde(default = "default_max_consecutive_misses")]
    pub max_consecutive_misses: u32,

    #[serde(default = "default_max_user_id")]
    pub max_user_id: u64,

    #[serde(default = "default_search_redirect_limit")]
    pub search_redirect_limit: u32,

    #[serde(default = "default_search_page_size")]
    pub search_page_size: u32,

    #[serde(default = "default_thread_page_size")]
    pub thread_page_size: u32,

    #[serde(default = "default_member_page_size")]
    pub member_page_size: u32,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            discovery_interval_minutes: default_discovery_interval(),
            threads_interval_minutes: default_threads_interval(),
            profiles_interval_minutes: default_profiles_interval(),
            character_delay_ms: default_character_delay_ms(),
            max_consecutive_misses: default_max_consecutive_misses(),
            max_user_id: default_max_user_id(),
            search_redirect_limit: default_search_redirect_limit(),
            search_page_size: default_search_page_size(),
            thread_page_size: default_thread_page_size(),
            member_page_size: default_member_page_size(),
        }
    }
}

/// Administrative database export
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExportConfig {
    #[serde(default)]
    pub admin_username: Option<String>,

    #[serde(default)]
    pub admin_password: Option<String>,

    /// Name used in the export file path; derived from the base URL host when absent
    #[serde(default)]
    pub forum_name: Option<String>,

    /// Internal table part numbers requested from the dump (topics, posts, forums, members)
    #[serde(default = "default_table_parts")]
    pub table_parts: Vec<String>,

    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,

    #[serde(default = "default_max_pages_per_part")]
    pub max_pages_per_part: u32,

    /// Waits before each attempt to download the generated file, in milliseconds
    #[serde(default = "default_poll_schedule_ms")]
    pub poll_schedule_ms: Vec<u64>,

    #[serde(default = "default_min_file_bytes")]
    pub min_file_bytes: usize,

    #[serde(default = "default_export_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            admin_username: None,
            admin_password: None,
            forum_name: None,
            table_parts: default_table_parts(),
            page_delay_ms: default_page_delay_ms(),
            max_pages_per_part: default_max_pages_per_part(),
            poll_schedule_ms: default_poll_schedule_ms(),
            min_file_bytes: default_min_file_bytes(),
            request_timeout_secs: default_export_timeout_secs(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

fn default_complete_forum_id() -> String {
    "49".to_string()
}

fn default_incomplete_forum_id() -> String {
    "59".to_string()
}

fn default_comms_forum_id() -> String {
    "31".to_string()
}

fn default_excluded_forum_names() -> Vec<String> {
    vec!["Guidebook".to_string(), "OOC Archives".to_string()]
}

fn default_excluded_title_markers() -> Vec<String> {
    vec!["From: Auto Claims".to_string()]
}

fn default_cooldown_marker() -> String {
    "Board Message".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (compatible; ForumRipple/1.0)".to_string()
}

fn default_request_delay_ms() -> u64 {
    2000
}

fn default_max_concurrent_requests() -> u32 {
    5
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_min_words() -> usize {
    3
}

fn default_max_length() -> usize {
    500
}

fn default_discovery_interval() -> u64 {
    1440
}

fn default_threads_interval() -> u64 {
    60
}

fn default_profiles_interval() -> u64 {
    1440
}

fn default_character_delay_ms() -> u64 {
    15_000
}

fn default_max_consecutive_misses() -> u32 {
    20
}

fn default_max_user_id() -> u64 {
    10_000
}

fn default_search_redirect_limit() -> u32 {
    3
}

fn default_search_page_size() -> u32 {
    25
}

fn default_thread_page_size() -> u32 {
    25
}

fn default_member_page_size() -> u32 {
    30
}

fn default_table_parts() -> Vec<String> {
    ["23", "32", "36", "21"].iter().map(|s| s.to_string()).collect()
}

fn default_page_delay_ms() -> u64 {
    300
}

fn default_max_pages_per_part() -> u32 {
    200
}

fn default_poll_schedule_ms() -> Vec<u64> {
    vec![2000, 5000, 10_000, 15_000, 30_000]
}

fn default_min_file_bytes() -> usize {
    100
}

fn default_export_timeout_secs() -> u64 {
    120
}
