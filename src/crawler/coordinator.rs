//! Crawl orchestration
//!
//! [`Crawler`] sequences fetches, extraction and persistence for every crawl
//! operation: per-character thread crawls, targeted single-thread crawls,
//! profile crawls, registration, discovery and bulk reconciliation.
//!
//! All remote requests go through the politeness-bounded [`Fetcher`] and run
//! strictly one after another. Each operation is idempotent and returns either
//! a summary or a [`CrawlError`]; [`OperationReport`] turns that into the
//! plain record handed to API or CLI callers.

use crate::config::Config;
use crate::crawler::fetcher::Fetcher;
use crate::export::{ExportClient, ExportCredentials, ExportSnapshot};
use crate::parser::{
    extract_quotes, is_cooldown_page, max_page_offset, parse_last_poster, parse_member_list,
    parse_meta_redirect, parse_post_records, parse_profile_page, parse_search_results,
    parse_thread_forum, parse_thread_title, BoardRules, ParsedLastPoster, ParsedProfile,
    ParsedThread, QuoteRules, ThreadCategory,
};
use crate::state::{ActivityHandle, LogLevel};
use crate::storage::{
    CharacterRecord, CharacterThreadLink, CharacterUpsert, CrawlKind, PostActivity, Storage,
    StorageError, StorageResult, ThreadUpsert,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Crawl-status keys holding admin export credentials
pub const EXPORT_USERNAME_KEY: &str = "acp_username";
pub const EXPORT_PASSWORD_KEY: &str = "acp_password";

/// Crawl-status key stamped after every successful export reconciliation
pub const LAST_EXPORT_SYNC_KEY: &str = "last_export_sync";

const UNTITLED: &str = "Untitled";

/// Storage shared between the crawler and its callers
pub type SharedStorage = Arc<Mutex<dyn Storage + Send>>;

/// Errors that end a crawl operation
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("platform cooldown page served for {url}; retry later")]
    Cooldown { url: String },

    #[error("could not fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("search for {url} redirected more than {limit} times")]
    RedirectLimit { url: String, limit: u32 },

    #[error("character {0} is not tracked")]
    UnknownCharacter(String),

    #[error("no profile found for user {0}")]
    ProfileNotFound(String),

    #[error("character {name} ({id}) is on the excluded-names list")]
    ExcludedName { id: String, name: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl CrawlError {
    /// Whether the operation should simply be retried on its next run
    pub fn is_retryable(&self) -> bool {
        matches!(self, CrawlError::Cooldown { .. } | CrawlError::Fetch { .. })
    }

    pub fn is_cooldown(&self) -> bool {
        matches!(self, CrawlError::Cooldown { .. })
    }

    fn fetch(url: &str, reason: impl Into<String>) -> Self {
        CrawlError::Fetch {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result record of one operation: the summary fields, or `{"error": "..."}`
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum OperationReport<T> {
    Success(T),
    Failure { error: String },
}

impl<T> OperationReport<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, OperationReport::Success(_))
    }
}

impl<T> From<Result<T, CrawlError>> for OperationReport<T> {
    fn from(result: Result<T, CrawlError>) -> Self {
        match result {
            Ok(summary) => OperationReport::Success(summary),
            Err(e) => OperationReport::Failure {
                error: e.to_string(),
            },
        }
    }
}

/// Thread counts per category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryCounts {
    pub ongoing: usize,
    pub comms: usize,
    pub complete: usize,
    pub incomplete: usize,
}

impl CategoryCounts {
    pub fn add(&mut self, category: ThreadCategory) {
        match category {
            ThreadCategory::Ongoing => self.ongoing += 1,
            ThreadCategory::Comms => self.comms += 1,
            ThreadCategory::Complete => self.complete += 1,
            ThreadCategory::Incomplete => self.incomplete += 1,
        }
    }

    pub fn merge(&mut self, other: &CategoryCounts) {
        self.ongoing += other.ongoing;
        self.comms += other.comms;
        self.complete += other.complete;
        self.incomplete += other.incomplete;
    }

    pub fn total(&self) -> usize {
        self.ongoing + self.comms + self.complete + self.incomplete
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadCrawlSummary {
    pub character_id: String,
    pub character_name: String,
    pub threads: CategoryCounts,
    pub total_threads: usize,
    pub posts_recorded: usize,
    pub quotes_added: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SingleThreadSummary {
    pub thread_id: String,
    pub title: String,
    pub category: ThreadCategory,
    pub last_poster_id: Option<String>,
    pub last_poster_name: Option<String>,
    pub linked_characters: Vec<String>,
    pub posts_recorded: usize,
    pub quotes_added: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileSummary {
    pub character_id: String,
    pub name: String,
    pub group_name: Option<String>,
    pub avatar_url: Option<String>,
    pub fields_stored: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationSummary {
    pub profile: ProfileSummary,
    pub threads: ThreadCrawlSummary,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoverySummary {
    pub probed: u64,
    pub registered: Vec<String>,
    pub already_tracked: usize,
    pub excluded: usize,
    pub failures: usize,
    /// Last id probed before stopping
    pub last_user_id: u64,
    pub consecutive_misses: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MemberListSummary {
    pub pages: usize,
    pub members_seen: usize,
    pub registered: Vec<String>,
    pub excluded: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshSummary {
    pub refreshed: usize,
    pub failures: usize,
}

/// Where a reconciliation got its thread data from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileSource {
    Export,
    Html,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileSummary {
    pub source: ReconcileSource,
    pub threads: CategoryCounts,
    pub total_threads: usize,
    pub posts_recorded: usize,
    pub recent_threads: usize,
    pub characters_crawled: usize,
    /// Tracked characters renamed from the export's member table
    pub names_refreshed: usize,
    pub quotes_added: usize,
    pub failures: usize,
}

impl ReconcileSummary {
    fn new(source: ReconcileSource) -> Self {
        Self {
            source,
            threads: CategoryCounts::default(),
            total_threads: 0,
            posts_recorded: 0,
            recent_threads: 0,
            characters_crawled: 0,
            names_refreshed: 0,
            quotes_added: 0,
            failures: 0,
        }
    }
}

/// A near-real-time "someone posted" notification
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadEvent {
    pub thread_id: String,
    /// The user who just posted; trusted over the page's own last-post block
    pub user_id: Option<String>,
    pub forum_id: Option<String>,
}

/// Pages of one thread keyed by `st=` offset
struct ThreadPages {
    pages: BTreeMap<u32, String>,
    /// False when some page after the first could not be fetched
    complete: bool,
}

impl ThreadPages {
    fn first(&self) -> Option<&str> {
        self.pages.values().next().map(String::as_str)
    }

    fn last(&self) -> Option<&str> {
        self.pages.values().next_back().map(String::as_str)
    }

    /// Member posts across every page, in thread order
    fn post_activity(&self) -> Vec<PostActivity> {
        let today = chrono::Utc::now().date_naive();
        self.pages
            .values()
            .flat_map(|html| parse_post_records(html, today))
            .map(|post| PostActivity {
                author_id: post.user_id,
                author_name: Some(post.name),
                post_date: post.post_date,
            })
            .collect()
    }
}

/// The crawl orchestrator
pub struct Crawler {
    config: Arc<Config>,
    fetcher: Fetcher,
    rules: BoardRules,
    quote_rules: QuoteRules,
    index_url: Url,
    storage: SharedStorage,
    activity: ActivityHandle,
}

impl Crawler {
    /// Creates a crawler
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `storage` - Store every operation writes through
    /// * `activity` - Activity state updated by every multi-step operation
    pub fn new(
        config: Arc<Config>,
        storage: SharedStorage,
        activity: ActivityHandle,
    ) -> crate::Result<Self> {
        let fetcher = Fetcher::new(&config.fetcher, &config.forum.base_url)?;
        Self::with_fetcher(config, fetcher, storage, activity)
    }

    /// Creates a crawler around an existing fetcher
    pub fn with_fetcher(
        config: Arc<Config>,
        fetcher: Fetcher,
        storage: SharedStorage,
        activity: ActivityHandle,
    ) -> crate::Result<Self> {
        let rules = BoardRules::from_config(&config.forum, config.crawl.search_page_size)?;
        let index_url = rules.base_url.join("index.php")?;
        let quote_rules = QuoteRules::from(&config.quotes);

        Ok(Self {
            config,
            fetcher,
            rules,
            quote_rules,
            index_url,
            storage,
            activity,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn activity(&self) -> &ActivityHandle {
        &self.activity
    }

    pub fn storage(&self) -> SharedStorage {
        self.storage.clone()
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    // ===== Character Thread Crawl =====

    /// Crawls every thread a tracked character has posted in
    ///
    /// Search results are fetched page by page. Every page of each thread is
    /// read for the true last poster and the thread's post activity, and thread
    /// plus link are written together. Quotes are extracted for a thread only
    /// the first time this character is seen in it.
    pub async fn crawl_character_threads(
        &self,
        character_id: &str,
    ) -> Result<ThreadCrawlSummary, CrawlError> {
        let character = self
            .with_storage(|s| s.get_character(character_id))?
            .ok_or_else(|| CrawlError::UnknownCharacter(character_id.to_string()))?;

        let _activity = self.activity.begin(
            format!("Crawling threads for {}", character.name),
            Some(character.id.as_str()),
        );

        let search_url = self.board_url(&[
            ("act", "Search"),
            ("CODE", "getalluser"),
            ("mid", &character.id),
            ("type", "posts"),
        ]);
        let threads = self.collect_search_threads(&search_url).await?;

        tracing::info!(
            "Found {} threads for {} ({})",
            threads.len(),
            character.name,
            character.id
        );

        let mut counts = CategoryCounts::default();
        let mut posts_recorded = 0;
        let mut quotes_added = 0;
        let mut avatar_cache: HashMap<String, Option<String>> = HashMap::new();

        for (index, thread) in threads.iter().enumerate() {
            self.activity.step(format!(
                "{}: thread {}/{} ({})",
                character.name,
                index + 1,
                threads.len(),
                thread.title
            ));

            let fetched = match self.fetch_thread_page(&thread.thread_id, 0).await? {
                Some(first) => Some(self.fetch_thread_pages(&thread.thread_id, first).await?),
                None => None,
            };
            let last_poster = fetched.as_ref().and_then(|t| t.last()).and_then(parse_last_poster);
            let posts = fetched
                .as_ref()
                .map(ThreadPages::post_activity)
                .unwrap_or_default();
            let complete = fetched.as_ref().map(|t| t.complete).unwrap_or(false);

            let avatar = match &last_poster {
                Some(poster) => self.poster_avatar(poster, &mut avatar_cache).await?,
                None => None,
            };

            let is_user_last_poster = last_poster
                .as_ref()
                .map(|p| is_same_user(p, &character))
                .unwrap_or(false);

            let upsert = self.thread_upsert(thread, last_poster.as_ref(), avatar);
            let link = CharacterThreadLink {
                character_id: character.id.clone(),
                thread_id: thread.thread_id.clone(),
                category: thread.category,
                is_user_last_poster,
                post_count: post_counts(&posts)
                    .get(character.id.as_str())
                    .copied()
                    .unwrap_or(0),
            };
            self.with_storage(|s| {
                s.upsert_thread_with_link(&upsert, &link)?;
                if complete {
                    s.replace_thread_posts(&thread.thread_id, &posts)?;
                }
                Ok(())
            })?;
            counts.add(thread.category);
            if complete {
                posts_recorded += posts.len();
            }

            quotes_added += self
                .quote_pass(
                    &thread.thread_id,
                    &thread.title,
                    std::slice::from_ref(&character),
                    fetched.map(|t| t.pages).unwrap_or_default(),
                )
                .await?;
        }

        self.with_storage(|s| s.update_character_crawl_time(&character.id, CrawlKind::Threads))?;

        tracing::info!(
            "Crawled {} threads for {} ({} new quotes)",
            counts.total(),
            character.name,
            quotes_added
        );

        Ok(ThreadCrawlSummary {
            character_id: character.id,
            character_name: character.name,
            total_threads: counts.total(),
            threads: counts,
            posts_recorded,
            quotes_added,
        })
    }

    /// Fetches a search and all of its result pages
    ///
    /// A cooldown on the first page aborts; a cooldown on a later page stops
    /// pagination and keeps what was already read.
    async fn collect_search_threads(&self, url: &str) -> Result<Vec<ParsedThread>, CrawlError> {
        let first = self.fetch_search(url).await?;
        let page = parse_search_results(&first, &self.rules);

        let mut seen: HashSet<String> = page.threads.iter().map(|t| t.thread_id.clone()).collect();
        let mut threads = page.threads;

        for extra in &page.extra_pages {
            let Some(html) = self.fetcher.fetch_politely(extra).await.into_body() else {
                tracing::warn!("Skipping search page {}", extra);
                continue;
            };
            if is_cooldown_page(&html, &self.rules.cooldown_marker) {
                tracing::warn!("Cooldown page at {}; stopping pagination", extra);
                self.activity
                    .log(LogLevel::Warn, format!("Cooldown while paging search results: {}", extra));
                break;
            }
            for thread in parse_search_results(&html, &self.rules).threads {
                if seen.insert(thread.thread_id.clone()) {
                    threads.push(thread);
                }
            }
        }

        Ok(threads)
    }

    /// Fetches a search page, following the interstitial meta-refresh redirects
    async fn fetch_search(&self, url: &str) -> Result<String, CrawlError> {
        let limit = self.config.crawl.search_redirect_limit;
        let mut current = url.to_string();
        let mut redirects = 0;

        loop {
            let html = self
                .fetcher
                .fetch_politely(&current)
                .await
                .into_body()
                .ok_or_else(|| CrawlError::fetch(&current, "search page unavailable"))?;

            if is_cooldown_page(&html, &self.rules.cooldown_marker) {
                self.activity
                    .log(LogLevel::Warn, format!("Cooldown page on search {}", current));
                return Err(CrawlError::Cooldown { url: current });
            }

            match parse_meta_redirect(&html, &self.rules) {
                Some(target) => {
                    redirects += 1;
                    if redirects > limit {
                        return Err(CrawlError::RedirectLimit {
                            url: url.to_string(),
                            limit,
                        });
                    }
                    tracing::debug!("Search redirected to {}", target);
                    current = target;
                }
                None => return Ok(html),
            }
        }
    }

    // ===== Single Thread Crawl =====

    /// Crawls one thread in reaction to a posting event
    ///
    /// The event's user, when given, is recorded as last poster even if the
    /// fetched page still shows an older last post. Every tracked character
    /// whose user id authored a post is linked to the thread; guest posts never
    /// link anyone.
    pub async fn crawl_single_thread(
        &self,
        event: &ThreadEvent,
    ) -> Result<SingleThreadSummary, CrawlError> {
        let _activity = self
            .activity
            .begin(format!("Crawling thread {}", event.thread_id), None);

        let first = self
            .fetch_thread_page(&event.thread_id, 0)
            .await?
            .ok_or_else(|| CrawlError::fetch(&self.thread_url(&event.thread_id, 0), "thread unavailable"))?;

        let pages = self.fetch_thread_pages(&event.thread_id, first).await?;
        let (first_page, last_page) = match (pages.first(), pages.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(CrawlError::fetch(&event.thread_id, "thread unavailable")),
        };

        let title = parse_thread_title(first_page).unwrap_or_else(|| UNTITLED.to_string());
        let page_forum = parse_thread_forum(first_page);
        let forum_id = event
            .forum_id
            .clone()
            .or_else(|| page_forum.as_ref().map(|f| f.id.clone()));
        let forum_name = page_forum
            .filter(|f| Some(&f.id) == forum_id.as_ref())
            .and_then(|f| f.name);
        let category = self.rules.categorize(forum_id.as_deref());

        let page_last_poster = parse_last_poster(last_page);
        let posts = pages.post_activity();
        let counts = post_counts(&posts);

        let characters = self.with_storage(|s| s.list_characters())?;

        let last_poster = match &event.user_id {
            Some(user_id) => Some(self.trusted_poster(user_id, &characters, page_last_poster).await?),
            None => page_last_poster,
        };

        let avatar = last_poster
            .as_ref()
            .and_then(|poster| poster.user_id.as_deref())
            .and_then(|id| characters.iter().find(|c| c.id == id))
            .and_then(|c| c.avatar_url.clone());

        let mut linked: Vec<CharacterRecord> = characters
            .iter()
            .filter(|c| counts.contains_key(c.id.as_str()))
            .cloned()
            .collect();
        if let Some(user_id) = &event.user_id {
            if !linked.iter().any(|c| &c.id == user_id) {
                if let Some(c) = characters.iter().find(|c| &c.id == user_id) {
                    linked.push(c.clone());
                }
            }
        }

        let thread = ParsedThread {
            thread_id: event.thread_id.clone(),
            title: title.clone(),
            url: self.thread_url(&event.thread_id, 0),
            forum_id,
            forum_name,
            category,
        };
        let upsert = self.thread_upsert(&thread, last_poster.as_ref(), avatar);

        let complete = pages.complete;
        self.with_storage(|s| {
            s.upsert_thread(&upsert)?;
            for character in &linked {
                let counted = counts.get(character.id.as_str()).copied().unwrap_or(0);
                // The event's own post may not be rendered yet
                let post_count = if event.user_id.as_deref() == Some(character.id.as_str()) {
                    counted.max(1)
                } else {
                    counted
                };
                s.link_character_thread(&CharacterThreadLink {
                    character_id: character.id.clone(),
                    thread_id: thread.thread_id.clone(),
                    category,
                    is_user_last_poster: last_poster
                        .as_ref()
                        .map(|p| is_same_user(p, character))
                        .unwrap_or(false),
                    post_count,
                })?;
            }
            if complete {
                s.replace_thread_posts(&thread.thread_id, &posts)?;
            }
            Ok(())
        })?;
        let posts_recorded = if complete { posts.len() } else { 0 };

        let quotes_added = self
            .quote_pass(&thread.thread_id, &title, &linked, pages.pages)
            .await?;

        tracing::info!(
            "Thread {} ({}): {} linked characters, {} new quotes",
            thread.thread_id,
            category,
            linked.len(),
            quotes_added
        );

        Ok(SingleThreadSummary {
            thread_id: thread.thread_id,
            title,
            category,
            last_poster_id: last_poster.as_ref().and_then(|p| p.user_id.clone()),
            last_poster_name: last_poster.map(|p| p.name),
            linked_characters: linked.into_iter().map(|c| c.id).collect(),
            posts_recorded,
            quotes_added,
        })
    }

    /// Resolves the display name of an event's posting user
    ///
    /// Tracked characters use their stored name; otherwise the page's last
    /// poster is used if it is the same user, else the user's profile is read.
    async fn trusted_poster(
        &self,
        user_id: &str,
        characters: &[CharacterRecord],
        page_last_poster: Option<ParsedLastPoster>,
    ) -> Result<ParsedLastPoster, CrawlError> {
        if let Some(character) = characters.iter().find(|c| c.id == user_id) {
            return Ok(ParsedLastPoster {
                name: character.name.clone(),
                user_id: Some(character.id.clone()),
            });
        }

        if let Some(poster) = page_last_poster.filter(|p| p.user_id.as_deref() == Some(user_id)) {
            return Ok(poster);
        }

        let name = match self.fetch_profile(user_id).await {
            Ok(profile) => profile.name,
            Err(e) if e.is_cooldown() => return Err(e),
            Err(e) => {
                tracing::warn!("Could not resolve name of user {}: {}", user_id, e);
                format!("User {}", user_id)
            }
        };
        Ok(ParsedLastPoster {
            name,
            user_id: Some(user_id.to_string()),
        })
    }

    // ===== Quote Pass =====

    /// Extracts quotes from every page of a thread for the given characters
    ///
    /// Characters whose (thread, character) pair is in the scrape log are
    /// skipped; when none remain nothing is fetched. `pages` holds already
    /// fetched pages keyed by offset. A pair is marked scraped only when every
    /// page was read.
    async fn quote_pass(
        &self,
        thread_id: &str,
        thread_title: &str,
        characters: &[CharacterRecord],
        mut pages: BTreeMap<u32, String>,
    ) -> Result<usize, CrawlError> {
        let pending: Vec<&CharacterRecord> = {
            let mut pending = Vec::new();
            for character in characters {
                if !self.with_storage(|s| s.is_thread_quote_scraped(thread_id, &character.id))? {
                    pending.push(character);
                }
            }
            pending
        };
        if pending.is_empty() {
            return Ok(0);
        }

        if !pages.contains_key(&0) {
            match self.fetch_thread_page(thread_id, 0).await? {
                Some(first) => {
                    pages.insert(0, first);
                }
                None => return Ok(0),
            }
        }

        let max_offset = pages.get(&0).map(|html| max_page_offset(html)).unwrap_or(0);
        let step = self.config.crawl.thread_page_size.max(1);
        let mut complete = true;

        for offset in (step..=max_offset).step_by(step as usize) {
            if pages.contains_key(&offset) {
                continue;
            }
            match self.fetch_thread_page(thread_id, offset).await? {
                Some(html) => {
                    pages.insert(offset, html);
                }
                None => complete = false,
            }
        }

        let mut added = 0;
        for character in pending {
            let quotes: Vec<String> = pages
                .values()
                .flat_map(|html| extract_quotes(html, &character.name, &self.quote_rules))
                .map(|q| q.text)
                .collect();

            self.with_storage(|s| {
                for text in &quotes {
                    if s.add_quote(&character.id, text, Some(thread_id), Some(thread_title))? {
                        added += 1;
                    }
                }
                if complete {
                    s.mark_thread_quote_scraped(thread_id, &character.id)?;
                }
                Ok(())
            })?;
        }

        if !complete {
            tracing::warn!(
                "Thread {} was only partially read; quotes will be retried",
                thread_id
            );
        }

        Ok(added)
    }

    // ===== Profiles =====

    /// Crawls one profile and stores the character with all of its fields
    pub async fn crawl_profile(&self, user_id: &str) -> Result<ProfileSummary, CrawlError> {
        let _activity = self
            .activity
            .begin(format!("Crawling profile {}", user_id), Some(user_id));

        let profile = self.fetch_profile(user_id).await?;
        self.store_profile(&profile)
    }

    /// Registers a new character: profile crawl, then full thread crawl
    pub async fn register_character(
        &self,
        user_id: &str,
    ) -> Result<RegistrationSummary, CrawlError> {
        let _activity = self
            .activity
            .begin(format!("Registering character {}", user_id), Some(user_id));

        let profile = self.fetch_profile(user_id).await?;
        if self.config.forum.is_excluded_name(&profile.name) {
            return Err(CrawlError::ExcludedName {
                id: user_id.to_string(),
                name: profile.name,
            });
        }

        let profile = self.store_profile(&profile)?;
        let threads = self.crawl_character_threads(user_id).await?;

        Ok(RegistrationSummary { profile, threads })
    }

    /// Re-crawls the profile of every tracked character
    pub async fn refresh_profiles(&self) -> Result<RefreshSummary, CrawlError> {
        let _activity = self.activity.begin("Refreshing profiles", None);
        let characters = self.with_storage(|s| s.list_characters())?;
        let mut summary = RefreshSummary::default();

        for character in &characters {
            self.activity
                .step(format!("Refreshing profile of {}", character.name));

            match self.fetch_profile(&character.id).await {
                Ok(profile) => {
                    self.store_profile(&profile)?;
                    summary.refreshed += 1;
                }
                Err(e) if e.is_cooldown() => return Err(e),
                Err(e) => {
                    summary.failures += 1;
                    self.activity.log(
                        LogLevel::Warn,
                        format!("Profile refresh failed for {}: {}", character.name, e),
                    );
                }
            }
        }

        Ok(summary)
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<ParsedProfile, CrawlError> {
        let url = self.profile_url(user_id);
        let html = self
            .fetcher
            .fetch_rendered(&url)
            .await
            .into_body()
            .ok_or_else(|| CrawlError::fetch(&url, "profile unavailable"))?;

        if is_cooldown_page(&html, &self.rules.cooldown_marker) {
            return Err(CrawlError::Cooldown { url });
        }

        let profile = parse_profile_page(&html, user_id);
        if !profile.has_name() {
            return Err(CrawlError::ProfileNotFound(user_id.to_string()));
        }
        Ok(profile)
    }

    fn store_profile(&self, profile: &ParsedProfile) -> Result<ProfileSummary, CrawlError> {
        let character = CharacterUpsert {
            id: profile.user_id.clone(),
            name: profile.name.clone(),
            profile_url: self.profile_url(&profile.user_id),
            group_name: profile.group_name.clone(),
            avatar_url: profile.avatar_url.clone(),
        };
        let fields = profile.field_entries();

        self.with_storage(|s| {
            s.upsert_character(&character)?;
            for (key, value) in &fields {
                s.upsert_profile_field(&character.id, key, value)?;
            }
            s.update_character_crawl_time(&character.id, CrawlKind::Profile)
        })?;

        tracing::info!(
            "Stored profile of {} ({}) with {} fields",
            profile.name,
            profile.user_id,
            fields.len()
        );

        Ok(ProfileSummary {
            character_id: profile.user_id.clone(),
            name: profile.name.clone(),
            group_name: profile.group_name.clone(),
            avatar_url: profile.avatar_url.clone(),
            fields_stored: fields.len(),
        })
    }

    /// Avatar of a thread's last poster, from the store or the poster's profile
    async fn poster_avatar(
        &self,
        poster: &ParsedLastPoster,
        cache: &mut HashMap<String, Option<String>>,
    ) -> Result<Option<String>, CrawlError> {
        let Some(user_id) = &poster.user_id else {
            return Ok(None);
        };
        if let Some(avatar) = cache.get(user_id) {
            return Ok(avatar.clone());
        }

        let stored = self.with_storage(|s| s.get_character(user_id))?;
        let avatar = match stored {
            Some(character) => character.avatar_url,
            None => match self.fetch_profile(user_id).await {
                Ok(profile) => profile.avatar_url,
                Err(e) if e.is_cooldown() => return Err(e),
                Err(_) => None,
            },
        };

        cache.insert(user_id.clone(), avatar.clone());
        Ok(avatar)
    }

    // ===== Discovery =====

    /// Probes user ids from 1 upwards and registers every new character
    ///
    /// Stops after `max-consecutive-misses` misses in a row or at
    /// `max-user-id`. Known and excluded ids reset the miss counter.
    pub async fn discover_characters(&self) -> Result<DiscoverySummary, CrawlError> {
        let _activity = self.activity.begin("Discovering characters", None);

        let known: HashSet<String> = self
            .with_storage(|s| s.list_characters())?
            .into_iter()
            .map(|c| c.id)
            .collect();

        let max_misses = self.config.crawl.max_consecutive_misses;
        let ceiling = self.config.crawl.max_user_id;
        let mut summary = DiscoverySummary::default();
        let mut misses = 0u32;
        let mut user_id = 1u64;

        while user_id <= ceiling && misses < max_misses {
            let id = user_id.to_string();
            summary.probed += 1;
            summary.last_user_id = user_id;
            user_id += 1;

            if known.contains(&id) {
                misses = 0;
                summary.already_tracked += 1;
                continue;
            }

            self.activity.step(format!("Probing user {}", id));
            let profile = match self.fetch_profile(&id).await {
                Ok(profile) => profile,
                Err(e) => {
                    misses += 1;
                    tracing::debug!("User {} is a miss ({}/{}): {}", id, misses, max_misses, e);
                    continue;
                }
            };
            misses = 0;

            if self.config.forum.is_excluded_name(&profile.name) {
                summary.excluded += 1;
                tracing::debug!("Skipping excluded name {} ({})", profile.name, id);
                continue;
            }

            if self.register_discovered(&profile).await {
                summary.registered.push(id);
            } else {
                summary.failures += 1;
            }
        }

        summary.consecutive_misses = misses;
        tracing::info!(
            "Discovery probed {} ids, registered {}",
            summary.probed,
            summary.registered.len()
        );
        Ok(summary)
    }

    /// Walks the member list and registers every new, non-excluded member
    pub async fn discover_from_member_list(&self) -> Result<MemberListSummary, CrawlError> {
        let _activity = self.activity.begin("Reading member list", None);

        let known: HashSet<String> = self
            .with_storage(|s| s.list_characters())?
            .into_iter()
            .map(|c| c.id)
            .collect();

        let first_url = self.member_list_url(0);
        let first = self
            .fetcher
            .fetch_politely(&first_url)
            .await
            .into_body()
            .ok_or_else(|| CrawlError::fetch(&first_url, "member list unavailable"))?;
        if is_cooldown_page(&first, &self.rules.cooldown_marker) {
            return Err(CrawlError::Cooldown { url: first_url });
        }

        let max_offset = max_page_offset(&first);
        let step = self.config.crawl.member_page_size.max(1);
        let mut summary = MemberListSummary::default();
        let mut members = Vec::new();
        let mut seen = HashSet::new();

        let mut pages = vec![first];
        for offset in (step..=max_offset).step_by(step as usize) {
            let url = self.member_list_url(offset);
            let Some(html) = self.fetcher.fetch_politely(&url).await.into_body() else {
                tracing::warn!("Skipping member list page {}", url);
                continue;
            };
            if is_cooldown_page(&html, &self.rules.cooldown_marker) {
                tracing::warn!("Cooldown page at {}; stopping member list", url);
                break;
            }
            pages.push(html);
        }
        summary.pages = pages.len();

        for html in &pages {
            for member in parse_member_list(html) {
                if seen.insert(member.user_id.clone()) {
                    members.push(member);
                }
            }
        }
        summary.members_seen = members.len();

        for member in members {
            if known.contains(&member.user_id) {
                continue;
            }
            if self.config.forum.is_excluded_name(&member.name) {
                summary.excluded += 1;
                continue;
            }

            self.activity
                .step(format!("Registering member {} ({})", member.name, member.user_id));
            let profile = match self.fetch_profile(&member.user_id).await {
                Ok(profile) => profile,
                Err(e) => {
                    summary.failures += 1;
                    self.activity.log(
                        LogLevel::Warn,
                        format!("Profile of member {} unavailable: {}", member.user_id, e),
                    );
                    continue;
                }
            };
            if self.config.forum.is_excluded_name(&profile.name) {
                summary.excluded += 1;
                continue;
            }

            if self.register_discovered(&profile).await {
                summary.registered.push(member.user_id);
            } else {
                summary.failures += 1;
            }
        }

        Ok(summary)
    }

    /// Stores a discovered profile and crawls its threads
    ///
    /// Failures are logged and reported as `false`; they never end the
    /// surrounding discovery loop.
    async fn register_discovered(&self, profile: &ParsedProfile) -> bool {
        if let Err(e) = self.store_profile(profile) {
            self.activity.log(
                LogLevel::Error,
                format!("Could not store {} ({}): {}", profile.name, profile.user_id, e),
            );
            return false;
        }
        self.activity.log(
            LogLevel::Info,
            format!("Registered {} ({})", profile.name, profile.user_id),
        );

        let result = self.crawl_character_threads(&profile.user_id).await;
        self.character_pause().await;

        match result {
            Ok(_) => true,
            Err(e) => {
                self.activity.log(
                    LogLevel::Warn,
                    format!("Thread crawl failed for {}: {}", profile.name, e),
                );
                false
            }
        }
    }

    // ===== Reconciliation =====

    /// Brings every tracked character's threads up to date
    ///
    /// Uses the admin export when credentials are available, followed by a
    /// quote pass over the exported threads. Without credentials, or when the
    /// export yields nothing, falls back to the recent-activity pass plus a
    /// per-character HTML crawl.
    pub async fn reconcile_all(&self) -> Result<ReconcileSummary, CrawlError> {
        let _activity = self.activity.begin("Reconciling all threads", None);

        if let Some(credentials) = self.export_credentials()? {
            self.activity.step("Downloading admin export");
            match ExportClient::new(
                &self.config.forum.base_url,
                &self.config.export,
                &self.config.fetcher.user_agent,
            ) {
                Ok(mut client) => {
                    let snapshot = client.fetch_snapshot(Some(&credentials)).await;
                    if !snapshot.is_empty() {
                        return self.apply_snapshot(&snapshot).await;
                    }
                    self.activity
                        .log(LogLevel::Warn, "Admin export was empty; crawling HTML instead");
                }
                Err(e) => {
                    self.activity
                        .log(LogLevel::Warn, format!("Admin export unavailable: {}", e));
                }
            }
        }

        self.reconcile_from_html().await
    }

    /// Export credentials from the configuration, else from the crawl-status store
    fn export_credentials(&self) -> Result<Option<ExportCredentials>, CrawlError> {
        let export = &self.config.export;
        if let (Some(user), Some(pass)) = (&export.admin_username, &export.admin_password) {
            if !user.is_empty() && !pass.is_empty() {
                return Ok(Some(ExportCredentials::new(user.as_str(), pass.as_str())));
            }
        }

        let (user, pass) = self.with_storage(|s| {
            Ok((
                s.get_crawl_status(EXPORT_USERNAME_KEY)?,
                s.get_crawl_status(EXPORT_PASSWORD_KEY)?,
            ))
        })?;
        Ok(match (user, pass) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => {
                Some(ExportCredentials::new(user, pass))
            }
            _ => None,
        })
    }

    /// Writes the export's threads and post activity, then runs the quote pass
    ///
    /// Tracked characters are renamed from the member table first, so links
    /// and quotes use current names.
    async fn apply_snapshot(&self, snapshot: &ExportSnapshot) -> Result<ReconcileSummary, CrawlError> {
        let names_refreshed = self.refresh_member_names(snapshot)?;

        let characters: HashMap<String, CharacterRecord> = self
            .with_storage(|s| s.list_characters())?
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        let mut posts_by_thread: BTreeMap<&str, Vec<PostActivity>> = BTreeMap::new();
        for post in &snapshot.posts {
            if let Some(thread_id) = &post.thread_id {
                posts_by_thread
                    .entry(thread_id.as_str())
                    .or_default()
                    .push(PostActivity {
                        author_id: post.author_id.clone(),
                        author_name: post.author_name.clone(),
                        post_date: post.post_date.clone(),
                    });
            }
        }

        let mut summary = ReconcileSummary::new(ReconcileSource::Export);
        summary.names_refreshed = names_refreshed;
        let mut quote_targets = Vec::new();
        let mut touched = HashSet::new();

        for topic in &snapshot.topics {
            let posts = posts_by_thread.remove(topic.thread_id.as_str()).unwrap_or_default();

            let mut participants: Vec<CharacterRecord> = Vec::new();
            for post in &posts {
                if let Some(character) = characters.get(&post.author_id) {
                    if !participants.iter().any(|c| c.id == character.id) {
                        participants.push(character.clone());
                    }
                }
            }
            if participants.is_empty() {
                continue;
            }

            let category = self.rules.categorize(topic.forum_id.as_deref());
            let upsert = ThreadUpsert {
                thread_id: topic.thread_id.clone(),
                title: topic.title.clone(),
                url: self.thread_url(&topic.thread_id, 0),
                forum_id: topic.forum_id.clone(),
                forum_name: topic
                    .forum_id
                    .as_deref()
                    .and_then(|id| snapshot.forum_name(id))
                    .map(str::to_string),
                category,
                last_poster_id: topic.last_poster_id.clone(),
                last_poster_name: topic.last_poster_name.clone(),
                last_poster_avatar: topic
                    .last_poster_id
                    .as_ref()
                    .and_then(|id| characters.get(id))
                    .and_then(|c| c.avatar_url.clone()),
            };

            let counts = post_counts(&posts);
            self.with_storage(|s| {
                s.upsert_thread(&upsert)?;
                for character in &participants {
                    s.link_character_thread(&CharacterThreadLink {
                        character_id: character.id.clone(),
                        thread_id: topic.thread_id.clone(),
                        category,
                        is_user_last_poster: topic.last_poster_id.as_deref()
                            == Some(character.id.as_str()),
                        post_count: counts.get(character.id.as_str()).copied().unwrap_or(0),
                    })?;
                }
                s.replace_thread_posts(&topic.thread_id, &posts)
            })?;

            summary.threads.add(category);
            summary.posts_recorded += posts.len();
            touched.extend(participants.iter().map(|c| c.id.clone()));
            quote_targets.push((topic.thread_id.clone(), topic.title.clone(), participants));
        }

        self.with_storage(|s| {
            for id in &touched {
                s.update_character_crawl_time(id, CrawlKind::Threads)?;
            }
            s.set_crawl_status(LAST_EXPORT_SYNC_KEY, &chrono::Utc::now().to_rfc3339())
        })?;

        summary.total_threads = summary.threads.total();
        summary.characters_crawled = touched.len();
        tracing::info!(
            "Export reconciled {} threads, {} posts",
            summary.total_threads,
            summary.posts_recorded
        );

        for (index, (thread_id, title, participants)) in quote_targets.iter().enumerate() {
            self.activity.step(format!(
                "Quote pass {}/{}: {}",
                index + 1,
                quote_targets.len(),
                title
            ));
            summary.quotes_added += self
                .quote_pass(thread_id, title, participants, BTreeMap::new())
                .await?;
        }

        Ok(summary)
    }

    /// Renames tracked characters whose export member name differs from the stored one
    fn refresh_member_names(&self, snapshot: &ExportSnapshot) -> Result<usize, CrawlError> {
        let renamed = self.with_storage(|s| {
            let mut renamed = 0;
            for member in &snapshot.members {
                let name = member.name.trim();
                if name.is_empty() {
                    continue;
                }
                if s.rename_character(&member.member_id, name)? {
                    tracing::info!("Renamed character {} to {}", member.member_id, name);
                    renamed += 1;
                }
            }
            Ok(renamed)
        })?;
        Ok(renamed)
    }

    /// Recent-activity pass followed by a full per-character crawl
    async fn reconcile_from_html(&self) -> Result<ReconcileSummary, CrawlError> {
        let mut summary = ReconcileSummary::new(ReconcileSource::Html);

        self.activity.step("Checking recently active threads");
        let active_url = self.board_url(&[("act", "Search"), ("CODE", "getactive")]);
        match self.fetch_search(&active_url).await {
            Ok(html) => {
                for thread in parse_search_results(&html, &self.rules).threads {
                    let event = ThreadEvent {
                        thread_id: thread.thread_id.clone(),
                        user_id: None,
                        forum_id: thread.forum_id.clone(),
                    };
                    match self.crawl_single_thread(&event).await {
                        Ok(result) => {
                            summary.recent_threads += 1;
                            summary.posts_recorded += result.posts_recorded;
                            summary.quotes_added += result.quotes_added;
                        }
                        Err(e) if e.is_cooldown() => return Err(e),
                        Err(e) => {
                            summary.failures += 1;
                            self.activity.log(
                                LogLevel::Warn,
                                format!("Recent thread {} failed: {}", thread.thread_id, e),
                            );
                        }
                    }
                }
            }
            Err(e) if e.is_cooldown() => return Err(e),
            Err(e) => {
                self.activity
                    .log(LogLevel::Warn, format!("Recent activity unavailable: {}", e));
            }
        }

        let characters = self.with_storage(|s| s.list_characters())?;
        for (index, character) in characters.iter().enumerate() {
            if index > 0 {
                self.character_pause().await;
            }
            self.activity.step(format!(
                "Character {}/{}: {}",
                index + 1,
                characters.len(),
                character.name
            ));

            match self.crawl_character_threads(&character.id).await {
                Ok(result) => {
                    summary.characters_crawled += 1;
                    summary.threads.merge(&result.threads);
                    summary.posts_recorded += result.posts_recorded;
                    summary.quotes_added += result.quotes_added;
                }
                Err(e) if e.is_cooldown() => return Err(e),
                Err(e) => {
                    summary.failures += 1;
                    self.activity.log(
                        LogLevel::Error,
                        format!("Thread crawl failed for {}: {}", character.name, e),
                    );
                }
            }
        }

        summary.total_threads = summary.threads.total();
        Ok(summary)
    }

    // ===== Maintenance =====

    /// Empties the quote scrape log so every thread is quote-scraped again
    pub fn reset_quote_log(&self) -> Result<usize, CrawlError> {
        let removed = self.with_storage(|s| s.clear_quote_scrape_log())?;
        self.activity
            .log(LogLevel::Info, format!("Cleared {} quote scrape log entries", removed));
        Ok(removed)
    }

    // ===== Helpers =====

    fn with_storage<T>(
        &self,
        op: impl FnOnce(&mut (dyn Storage + Send)) -> StorageResult<T>,
    ) -> Result<T, CrawlError> {
        let mut storage = self
            .storage
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(op(&mut *storage)?)
    }

    /// Fetches one thread page; None for transport failures, Err on cooldown
    async fn fetch_thread_page(
        &self,
        thread_id: &str,
        offset: u32,
    ) -> Result<Option<String>, CrawlError> {
        let url = self.thread_url(thread_id, offset);
        let Some(html) = self.fetcher.fetch_politely(&url).await.into_body() else {
            return Ok(None);
        };
        if is_cooldown_page(&html, &self.rules.cooldown_marker) {
            self.activity
                .log(LogLevel::Warn, format!("Cooldown page on thread {}", url));
            return Err(CrawlError::Cooldown { url });
        }
        Ok(Some(html))
    }

    /// Fetches every page of a thread after its already fetched first page
    ///
    /// Transport failures on later pages leave gaps and mark the result
    /// incomplete; a cooldown aborts.
    async fn fetch_thread_pages(
        &self,
        thread_id: &str,
        first: String,
    ) -> Result<ThreadPages, CrawlError> {
        let max_offset = max_page_offset(&first);
        let step = self.config.crawl.thread_page_size.max(1);

        let mut offsets: BTreeSet<u32> = (step..=max_offset).step_by(step as usize).collect();
        if max_offset > 0 {
            offsets.insert(max_offset);
        }

        let mut pages = BTreeMap::new();
        pages.insert(0, first);
        let mut complete = true;
        for offset in offsets {
            match self.fetch_thread_page(thread_id, offset).await? {
                Some(html) => {
                    pages.insert(offset, html);
                }
                None => {
                    tracing::warn!("Could not fetch page st={} of thread {}", offset, thread_id);
                    complete = false;
                }
            }
        }

        Ok(ThreadPages { pages, complete })
    }

    fn thread_upsert(
        &self,
        thread: &ParsedThread,
        last_poster: Option<&ParsedLastPoster>,
        avatar: Option<String>,
    ) -> ThreadUpsert {
        ThreadUpsert {
            thread_id: thread.thread_id.clone(),
            title: thread.title.clone(),
            url: thread.url.clone(),
            forum_id: thread.forum_id.clone(),
            forum_name: thread.forum_name.clone(),
            category: thread.category,
            last_poster_id: last_poster.and_then(|p| p.user_id.clone()),
            last_poster_name: last_poster.map(|p| p.name.clone()),
            last_poster_avatar: avatar,
        }
    }

    async fn character_pause(&self) {
        let delay = self.config.crawl.character_delay_ms;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    fn board_url(&self, params: &[(&str, &str)]) -> String {
        let mut url = self.index_url.clone();
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        url.to_string()
    }

    fn thread_url(&self, thread_id: &str, offset: u32) -> String {
        if offset == 0 {
            self.board_url(&[("showtopic", thread_id)])
        } else {
            self.board_url(&[("showtopic", thread_id), ("st", &offset.to_string())])
        }
    }

    fn profile_url(&self, user_id: &str) -> String {
        self.board_url(&[("showuser", user_id)])
    }

    fn member_list_url(&self, offset: u32) -> String {
        self.board_url(&[("act", "Members"), ("st", &offset.to_string())])
    }
}

/// Posts per author id
fn post_counts(posts: &[PostActivity]) -> HashMap<&str, u32> {
    let mut counts = HashMap::new();
    for post in posts {
        *counts.entry(post.author_id.as_str()).or_insert(0) += 1;
    }
    counts
}

/// Whether a post author is the given character: by user id, else by name
///
/// Only used for the last-poster flag. Thread links go by user id alone.
fn is_same_user(author: &ParsedLastPoster, character: &CharacterRecord) -> bool {
    match &author.user_id {
        Some(id) => *id == character.id,
        None => author.name.eq_ignore_ascii_case(&character.name),
    }
}
