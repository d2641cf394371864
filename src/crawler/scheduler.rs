//! Recurring crawl triggers
//!
//! This module handles:
//! - The strict startup sequence (discovery, then reconciliation)
//! - Independent recurring triggers for discovery, reconciliation and profile refresh
//! - A shared crawl lane so that no two heavy jobs ever run at the same time

use crate::config::CrawlConfig;
use crate::crawler::coordinator::{CrawlError, Crawler};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// The heavy jobs the scheduler triggers
#[async_trait]
pub trait CrawlJobs: Send + Sync {
    async fn discover(&self) -> Result<(), CrawlError>;

    async fn reconcile(&self) -> Result<(), CrawlError>;

    async fn refresh_profiles(&self) -> Result<(), CrawlError>;
}

#[async_trait]
impl CrawlJobs for Crawler {
    async fn discover(&self) -> Result<(), CrawlError> {
        let summary = self.discover_characters().await?;
        tracing::info!(
            "Scheduled discovery registered {} characters",
            summary.registered.len()
        );
        Ok(())
    }

    async fn reconcile(&self) -> Result<(), CrawlError> {
        let summary = self.reconcile_all().await?;
        tracing::info!(
            "Scheduled reconciliation ({:?}) covered {} threads",
            summary.source,
            summary.total_threads
        );
        Ok(())
    }

    async fn refresh_profiles(&self) -> Result<(), CrawlError> {
        let summary = Crawler::refresh_profiles(self).await?;
        tracing::info!("Scheduled refresh updated {} profiles", summary.refreshed);
        Ok(())
    }
}

/// A scheduled job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    Discovery,
    Threads,
    Profiles,
}

impl Job {
    pub fn label(&self) -> &'static str {
        match self {
            Job::Discovery => "discovery",
            Job::Threads => "thread reconciliation",
            Job::Profiles => "profile refresh",
        }
    }
}

/// Trigger periods; None disables a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intervals {
    pub discovery: Option<Duration>,
    pub threads: Option<Duration>,
    pub profiles: Option<Duration>,
}

impl Intervals {
    /// Converts the configured minutes; zero disables a trigger
    pub fn from_config(config: &CrawlConfig) -> Self {
        let minutes = |m: u64| (m > 0).then(|| Duration::from_secs(m * 60));
        Self {
            discovery: minutes(config.discovery_interval_minutes),
            threads: minutes(config.threads_interval_minutes),
            profiles: minutes(config.profiles_interval_minutes),
        }
    }

    fn get(&self, job: Job) -> Option<Duration> {
        match job {
            Job::Discovery => self.discovery,
            Job::Threads => self.threads,
            Job::Profiles => self.profiles,
        }
    }
}

/// Runs crawl jobs on their intervals
pub struct Scheduler<J: CrawlJobs> {
    jobs: Arc<J>,
    intervals: Intervals,
    /// Held for the whole duration of a job
    lane: Arc<Mutex<()>>,
}

impl<J: CrawlJobs> Scheduler<J> {
    pub fn new(jobs: Arc<J>, intervals: Intervals) -> Self {
        Self {
            jobs,
            intervals,
            lane: Arc::new(Mutex::new(())),
        }
    }

    /// Shares the crawl lane with other callers (one-off commands, webhooks)
    pub fn lane(&self) -> Arc<Mutex<()>> {
        self.lane.clone()
    }

    /// Runs the startup sequence, then the recurring triggers forever
    pub async fn run(&self) {
        self.run_startup().await;

        tokio::join!(
            self.recurring(Job::Discovery),
            self.recurring(Job::Threads),
            self.recurring(Job::Profiles),
        );
    }

    /// Discovery to completion, then the first reconciliation
    ///
    /// Enabled triggers only; never concurrent with each other.
    pub async fn run_startup(&self) {
        if self.intervals.discovery.is_some() {
            self.run_job(Job::Discovery).await;
        }
        if self.intervals.threads.is_some() {
            self.run_job(Job::Threads).await;
        }
    }

    async fn recurring(&self, job: Job) {
        let Some(period) = self.intervals.get(job) else {
            tracing::info!("Recurring {} disabled", job.label());
            return;
        };

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.run_job(job).await;
        }
    }

    /// Runs one job inside the crawl lane; failures are logged, never raised
    pub async fn run_job(&self, job: Job) {
        let _lane = self.lane.lock().await;
        tracing::info!("Starting {}", job.label());

        let result = match job {
            Job::Discovery => self.jobs.discover().await,
            Job::Threads => self.jobs.reconcile().await,
            Job::Profiles => self.jobs.refresh_profiles().await,
        };

        match result {
            Ok(()) => tracing::info!("Finished {}", job.label()),
            Err(e) if e.is_retryable() => {
                tracing::warn!("{} interrupted, will retry next run: {}", job.label(), e)
            }
            Err(e) => tracing::error!("{} failed: {}", job.label(), e),
        }
    }
}
