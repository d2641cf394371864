//! Export protocol client
//!
//! The admin panel protocol is a fixed sequence driven by a URL-embedded
//! session token:
//!
//! 1. `admin.php?login=yes&username=..&password=..` answers with a redirect whose
//!    target carries `adsess=<token>` (or a page mentioning it)
//! 2. `act=mysql&code=backup&erase=1` clears the previous export
//! 3. `act=mysql&code=dump&step1=1` starts a new one
//! 4. every table part is paged through `act=mysql&code=dump&line=L&part=P`,
//!    following the "next page" link embedded in each response
//! 5. the finished file appears at `sqls/<token>-<forum>_.sql`

use super::{ExportCredentials, ExportError, ExportSnapshot};
use crate::config::ExportConfig;
use regex::Regex;
use reqwest::{redirect::Policy, Client, StatusCode};
use std::sync::OnceLock;
use std::time::Duration;
use url::Url;

/// Progress of one export run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportState {
    LoggedOut,
    LoggedIn,
    DumpRequested,
    Polling,
    Ready,
    Parsed,
}

fn next_link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?i)admin\.php\?[^'"]*act=mysql[^'"]*code=dump[^'"]*line=(\d+)[^'"]*part=(\d+)[^'"]*adsess=([a-f0-9]+)"#,
        )
        .expect("valid next-link regex")
    })
}

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"adsess=([a-f0-9]+)").expect("valid token regex"))
}

/// Client for the admin panel's database export
pub struct ExportClient {
    /// Login must see the redirect itself, so it never follows one
    login_client: Client,
    client: Client,
    base_url: Url,
    forum_name: String,
    config: ExportConfig,
    state: ExportState,
    token: Option<String>,
}

impl ExportClient {
    /// Creates a client for the board at `base_url`
    ///
    /// # Arguments
    ///
    /// * `base_url` - Root URL of the board
    /// * `config` - Export protocol settings
    /// * `user_agent` - User agent sent with every request
    pub fn new(base_url: &str, config: &ExportConfig, user_agent: &str) -> Result<Self, ExportError> {
        let base_url = Url::parse(base_url)?;
        let timeout = Duration::from_secs(config.request_timeout_secs);

        let login_client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .redirect(Policy::none())
            .build()?;
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .redirect(Policy::limited(10))
            .gzip(true)
            .build()?;

        let forum_name = config
            .forum_name
            .clone()
            .unwrap_or_else(|| forum_name_from_host(&base_url));

        Ok(Self {
            login_client,
            client,
            base_url,
            forum_name,
            config: config.clone(),
            state: ExportState::LoggedOut,
            token: None,
        })
    }

    pub fn state(&self) -> ExportState {
        self.state
    }

    /// Runs the whole protocol and returns the projected snapshot
    ///
    /// Never fails: any protocol error is logged and yields an empty snapshot,
    /// which callers treat as "use the HTML path instead".
    pub async fn fetch_snapshot(&mut self, credentials: Option<&ExportCredentials>) -> ExportSnapshot {
        match self.try_fetch_snapshot(credentials).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Export failed in state {:?}: {}", self.state, e);
                ExportSnapshot::default()
            }
        }
    }

    /// Runs the whole protocol, surfacing the first error
    pub async fn try_fetch_snapshot(
        &mut self,
        credentials: Option<&ExportCredentials>,
    ) -> Result<ExportSnapshot, ExportError> {
        self.state = ExportState::LoggedOut;
        self.token = None;

        let credentials = credentials.ok_or(ExportError::MissingCredentials)?;
        let token = self.login(credentials).await?;
        self.generate_dump(&token).await?;
        let sql = self.poll_file(&token).await?;

        let snapshot = ExportSnapshot::from_sql(&sql);
        self.state = ExportState::Parsed;

        tracing::info!(
            "Export parsed: {} posts, {} topics, {} forums, {} members",
            snapshot.posts.len(),
            snapshot.topics.len(),
            snapshot.forums.len(),
            snapshot.members.len()
        );

        Ok(snapshot)
    }

    /// Logs in and returns the session token
    pub async fn login(&mut self, credentials: &ExportCredentials) -> Result<String, ExportError> {
        if credentials.username.is_empty() || credentials.password.is_empty() {
            return Err(ExportError::MissingCredentials);
        }

        let mut url = self.admin_url()?;
        url.query_pairs_mut()
            .append_pair("login", "yes")
            .append_pair("username", &credentials.username)
            .append_pair("password", &credentials.password);

        let response = self.login_client.get(url).send().await?;
        let status = response.status();

        let from_redirect = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(token_from_url);

        let token = match from_redirect {
            Some(token) => Some(token),
            None if status == StatusCode::OK => {
                let body = response.text().await?;
                token_regex()
                    .captures(&body)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string())
            }
            None => None,
        };

        match token {
            Some(token) => {
                tracing::info!("Export login succeeded");
                self.token = Some(token.clone());
                self.state = ExportState::LoggedIn;
                Ok(token)
            }
            None => Err(ExportError::LoginRejected {
                status: status.as_u16(),
            }),
        }
    }

    /// Clears the previous export, starts a new one and pages through every table part
    pub async fn generate_dump(&mut self, token: &str) -> Result<(), ExportError> {
        let clear = self.mysql_url(token, &[("code", "backup"), ("erase", "1")])?;
        if let Err(e) = self.client.get(clear).send().await {
            tracing::warn!("Clearing the previous export failed: {}", e);
        }

        let start = self.mysql_url(token, &[("code", "dump"), ("step1", "1")])?;
        let response = self.client.get(start).send().await?;
        if !response.status().is_success() {
            return Err(ExportError::StartRejected {
                status: response.status().as_u16(),
            });
        }
        self.state = ExportState::DumpRequested;

        let parts = self.config.table_parts.clone();
        let mut total_pages = 0;
        for part in &parts {
            total_pages += self.page_through_part(token, part).await?;
        }

        tracing::info!(
            "Export dump requested: {} table parts, {} pages",
            parts.len(),
            total_pages
        );
        Ok(())
    }

    /// Follows the "next page" links of one table part
    ///
    /// Returns the number of pages requested. A part that is still advertising
    /// further pages at the page ceiling is an error.
    async fn page_through_part(&self, token: &str, part: &str) -> Result<u32, ExportError> {
        let mut line = "0".to_string();
        let mut pages = 0u32;

        loop {
            if pages >= self.config.max_pages_per_part {
                return Err(ExportError::PageCeiling {
                    part: part.to_string(),
                    pages,
                });
            }

            let url = self.mysql_url(
                token,
                &[("code", "dump"), ("line", line.as_str()), ("part", part)],
            )?;
            let body = match self.client.get(url).send().await {
                Ok(response) => response.text().await.unwrap_or_default(),
                Err(e) => {
                    tracing::warn!("Export page for part {} failed: {}", part, e);
                    return Ok(pages);
                }
            };
            pages += 1;

            let next = next_link_regex().captures(&body).and_then(|c| {
                let next_line = c.get(1)?.as_str().to_string();
                let next_part = c.get(2)?.as_str().to_string();
                Some((next_line, next_part))
            });

            match next {
                Some((next_line, next_part)) if next_part == part => {
                    tracing::debug!("Export part {} continues at line {}", part, next_line);
                    line = next_line;
                    tokio::time::sleep(Duration::from_millis(self.config.page_delay_ms)).await;
                }
                _ => break,
            }
        }

        if pages > 1 {
            tracing::debug!("Export part {}: {} pages", part, pages);
        }
        Ok(pages)
    }

    /// Polls the export file URL on the configured backoff schedule
    pub async fn poll_file(&mut self, token: &str) -> Result<String, ExportError> {
        self.state = ExportState::Polling;
        let file_url = self
            .base_url
            .join(&format!("sqls/{}-{}_.sql", token, self.forum_name))?;

        for (attempt, wait_ms) in self.config.poll_schedule_ms.iter().enumerate() {
            tokio::time::sleep(Duration::from_millis(*wait_ms)).await;

            match self.client.get(file_url.clone()).send().await {
                Ok(response) if response.status() == StatusCode::OK => {
                    let body = response.text().await.unwrap_or_default();
                    if body.len() > self.config.min_file_bytes {
                        tracing::info!("Export file retrieved ({} bytes)", body.len());
                        self.state = ExportState::Ready;
                        return Ok(body);
                    }
                    tracing::debug!("Export file attempt {} too small ({} bytes)", attempt + 1, body.len());
                }
                Ok(response) => {
                    tracing::debug!("Export file attempt {}: HTTP {}", attempt + 1, response.status());
                }
                Err(e) => {
                    tracing::debug!("Export file attempt {} failed: {}", attempt + 1, e);
                }
            }
        }

        Err(ExportError::FileNotReady {
            attempts: self.config.poll_schedule_ms.len(),
        })
    }

    fn admin_url(&self) -> Result<Url, ExportError> {
        Ok(self.base_url.join("admin.php")?)
    }

    fn mysql_url(&self, token: &str, params: &[(&str, &str)]) -> Result<Url, ExportError> {
        let mut url = self.admin_url()?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("act", "mysql");
            for (key, value) in params {
                query.append_pair(key, value);
            }
            query.append_pair("adsess", token);
        }
        Ok(url)
    }
}

/// Reads the `adsess=` value out of a URL
fn token_from_url(url: &str) -> Option<String> {
    let start = url.find("adsess=")? + "adsess=".len();
    let token: String = url[start..].chars().take_while(|c| *c != '&').collect();
    (!token.is_empty()).then_some(token)
}

/// Hosted boards live at `<name>.jcink.net`; the export file is named after `<name>`
fn forum_name_from_host(base_url: &Url) -> String {
    base_url
        .host_str()
        .and_then(|host| host.split('.').next())
        .unwrap_or_default()
        .to_string()
}
