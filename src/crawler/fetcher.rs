//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - One pooled HTTP client with a cookie jar for the forum session
//! - A concurrency limiter plus a fixed per-request politeness delay
//! - Lazy, at-most-once bot login
//! - An optional headless-browser render path with plain-fetch fallback
//!
//! Transport failures are returned as [`FetchResult`] values and never raised.

use crate::config::FetcherConfig;
use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{redirect::Policy, Client};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OnceCell, Semaphore};
use url::Url;

/// Cookie names that indicate a logged-in forum session
const SESSION_COOKIES: [&str; 3] = ["member_id", "session_id", "pass_hash"];

/// Result of a fetch operation
#[derive(Debug)]
pub enum FetchResult {
    /// Successfully fetched the page
    Success {
        /// Final URL after redirects
        final_url: String,
        /// HTTP status code
        status_code: u16,
        /// Page body content
        body: String,
    },

    /// Server answered with a non-success status
    HttpError {
        /// The HTTP status code
        status_code: u16,
    },

    /// Network error (connection refused, timeout, etc.)
    NetworkError {
        /// Error description
        error: String,
    },
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success { .. })
    }

    /// The page body, or None for any kind of failure
    pub fn into_body(self) -> Option<String> {
        match self {
            FetchResult::Success { body, .. } => Some(body),
            _ => None,
        }
    }
}

/// Errors from the render path; never surfaced past the fetcher
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to start renderer: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("renderer exited with status {0:?}")]
    Exit(Option<i32>),

    #[error("renderer timed out after {0:?}")]
    Timeout(Duration),

    #[error("renderer produced no output")]
    Empty,
}

/// Something that can produce the client-side rendered markup of a page
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<String, RenderError>;
}

/// Renders pages by running an external headless browser
///
/// The URL is appended to the configured argv and the rendered document is
/// read from stdout, e.g. `["chromium", "--headless", "--dump-dom"]`.
#[derive(Debug, Clone)]
pub struct CommandRenderer {
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandRenderer {
    /// Returns None for an empty argv
    pub fn new(argv: Vec<String>, timeout: Duration) -> Option<Self> {
        if argv.is_empty() {
            return None;
        }
        Some(Self { argv, timeout })
    }
}

#[async_trait]
impl PageRenderer for CommandRenderer {
    async fn render(&self, url: &str) -> Result<String, RenderError> {
        let mut command = tokio::process::Command::new(&self.argv[0]);
        command.args(&self.argv[1..]).arg(url).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| RenderError::Timeout(self.timeout))??;

        if !output.status.success() {
            return Err(RenderError::Exit(output.status.code()));
        }

        let body = String::from_utf8_lossy(&output.stdout).into_owned();
        if body.trim().is_empty() {
            return Err(RenderError::Empty);
        }
        Ok(body)
    }
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The fetcher configuration
/// * `cookies` - Cookie jar shared with the fetcher, so the session can be inspected
pub fn build_http_client(config: &FetcherConfig, cookies: Arc<Jar>) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(10))
        .cookie_provider(cookies)
        .gzip(true)
        .brotli(true)
        .build()
}

/// Politeness-bounded page fetcher
pub struct Fetcher {
    client: Client,
    cookies: Arc<Jar>,
    limiter: Arc<Semaphore>,
    delay: Duration,
    base_url: Url,
    credentials: Option<(String, String)>,
    /// Set once the login attempt has run, successful or not
    authenticated: OnceCell<bool>,
    renderer: Option<Arc<dyn PageRenderer>>,
}

impl Fetcher {
    /// Creates a fetcher for the board at `base_url`
    ///
    /// A configured `render-command` becomes the render path.
    pub fn new(config: &FetcherConfig, base_url: &str) -> crate::Result<Self> {
        let base_url = Url::parse(base_url)?;
        let cookies = Arc::new(Jar::default());
        let client = build_http_client(config, cookies.clone())?;

        let credentials = match (&config.bot_username, &config.bot_password) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => {
                Some((user.clone(), pass.clone()))
            }
            _ => None,
        };

        let renderer = config
            .render_command
            .clone()
            .and_then(|argv| {
                CommandRenderer::new(argv, Duration::from_secs(config.request_timeout_secs))
            })
            .map(|r| Arc::new(r) as Arc<dyn PageRenderer>);

        Ok(Self {
            client,
            cookies,
            limiter: Arc::new(Semaphore::new(config.max_concurrent_requests.max(1) as usize)),
            delay: Duration::from_millis(config.request_delay_ms),
            base_url,
            credentials,
            authenticated: OnceCell::new(),
            renderer,
        })
    }

    /// Replaces the render path
    pub fn with_renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Whether the login attempt has run and found a session
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.get().copied().unwrap_or(false)
    }

    /// Fetches a page without the politeness delay
    pub async fn fetch(&self, url: &str) -> FetchResult {
        self.ensure_authenticated().await;
        self.get(url).await
    }

    /// Takes a limiter slot, waits the politeness delay, then fetches
    pub async fn fetch_politely(&self, url: &str) -> FetchResult {
        let _permit = self.limiter.acquire().await.ok();
        tokio::time::sleep(self.delay).await;
        self.fetch(url).await
    }

    /// Fetches a page through the render path, falling back to a plain fetch
    pub async fn fetch_rendered(&self, url: &str) -> FetchResult {
        let Some(renderer) = self.renderer.clone() else {
            return self.fetch_politely(url).await;
        };

        let _permit = self.limiter.acquire().await.ok();
        tokio::time::sleep(self.delay).await;

        match renderer.render(url).await {
            Ok(body) => {
                tracing::debug!("Rendered {} ({} bytes)", url, body.len());
                FetchResult::Success {
                    final_url: url.to_string(),
                    status_code: 200,
                    body,
                }
            }
            Err(e) => {
                tracing::warn!("Render failed for {}, using plain fetch: {}", url, e);
                self.fetch(url).await
            }
        }
    }

    async fn ensure_authenticated(&self) {
        self.authenticated.get_or_init(|| self.login()).await;
    }

    /// Submits the login form once
    ///
    /// A missing session cookie is only a warning: cookie names vary between
    /// board configurations.
    async fn login(&self) -> bool {
        let Some((username, password)) = &self.credentials else {
            return false;
        };

        let login_url = match self.base_url.join("index.php?act=Login&CODE=01") {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("Invalid login URL: {}", e);
                return false;
            }
        };

        let form = [
            ("UserName", username.as_str()),
            ("PassWord", password.as_str()),
            ("CookieDate", "1"),
            ("Privacy", "0"),
        ];

        match self.client.post(login_url).form(&form).send().await {
            Ok(response) if response.status().is_success() || response.status().is_redirection() => {
                let cookies = self
                    .cookies
                    .cookies(&self.base_url)
                    .and_then(|v| v.to_str().ok().map(str::to_string))
                    .unwrap_or_default();

                if SESSION_COOKIES.iter().any(|name| cookies.contains(name)) {
                    tracing::info!("Logged in as {}", username);
                } else {
                    tracing::warn!("Login as {} returned no session cookie; continuing", username);
                }
                true
            }
            Ok(response) => {
                tracing::warn!("Login as {} failed: HTTP {}", username, response.status());
                false
            }
            Err(e) => {
                tracing::warn!("Login as {} failed: {}", username, e);
                false
            }
        }
    }

    async fn get(&self, url: &str) -> FetchResult {
        tracing::debug!("GET {}", url);

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                let error = if e.is_timeout() {
                    "Request timeout".to_string()
                } else if e.is_connect() {
                    "Connection refused".to_string()
                } else {
                    e.to_string()
                };
                tracing::warn!("Fetch failed for {}: {}", url, error);
                return FetchResult::NetworkError { error };
            }
        };

        let status = response.status();
        let final_url = response.url().to_string();

        if !status.is_success() {
            tracing::warn!("Fetch failed for {}: HTTP {}", url, status);
            return FetchResult::HttpError {
                status_code: status.as_u16(),
            };
        }

        match response.text().await {
            Ok(body) => FetchResult::Success {
                final_url,
                status_code: status.as_u16(),
                body,
            },
            Err(e) => {
                tracing::warn!("Reading body of {} failed: {}", url, e);
                FetchResult::NetworkError {
                    error: e.to_string(),
                }
            }
        }
    }
}
