//! Scrape pipeline orchestration: fetch, normalize, merge, persist, plus the
//! one-shot start-up schedule.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use quotefeed_adapters::{
    AdapterError, ExtractionMode, FixturePageSource, LivePageSource, PageSource, DEFAULT_SOURCE_URL,
};
use quotefeed_core::{merge_with_stats, normalize_items, MergeStats, PersistedDocument, QuoteCollection};
use quotefeed_storage::{HttpClientConfig, HttpFetcher, QuoteStore, StoreError};
use serde::Serialize;
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

mod time_of_day;

pub use time_of_day::{parse_time_of_day, resolve, Meridiem, ScheduleTimeSpec, TimeOfDay, TimeSpecError};

pub const CRATE_NAME: &str = "quotefeed-sync";

#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    pub source_url: String,
    pub store_path: PathBuf,
    pub schedule_enabled: bool,
    pub schedule_time: Option<String>,
    pub extraction_mode: ExtractionMode,
    pub fixture_html: Option<PathBuf>,
    pub user_agent: String,
    pub http_timeout_secs: u64,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl ScrapeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup; unset or blank values fall
    /// back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            source_url: var("QUOTEFEED_SOURCE_URL").unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            store_path: var("QUOTEFEED_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/quotes.json")),
            schedule_enabled: var("QUOTEFEED_SCHEDULE_ENABLED")
                .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            schedule_time: var("QUOTEFEED_SCHEDULE_TIME"),
            extraction_mode: var("QUOTEFEED_EXTRACTION_MODE")
                .map(|v| ExtractionMode::from_config(&v))
                .unwrap_or_default(),
            fixture_html: var("QUOTEFEED_FIXTURE_HTML").map(PathBuf::from),
            user_agent: var("QUOTEFEED_USER_AGENT").unwrap_or_else(|| "quotefeed-bot/0.1".to_string()),
            http_timeout_secs: var("QUOTEFEED_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(30),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("a scrape run is already in progress")]
    AlreadyRunning,
    #[error("fetching quote page: {0}")]
    Fetch(#[from] AdapterError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a trigger gets back: the page title and the merged collection.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeOutcome {
    pub title: String,
    pub quotes: QuoteCollection,
    #[serde(skip)]
    pub scraped_at: DateTime<Utc>,
    #[serde(skip)]
    pub stats: MergeStats,
}

/// Held for the duration of one run; clears the flag on every exit path.
struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct ScrapePipeline {
    store: QuoteStore,
    source: Arc<dyn PageSource>,
    running: AtomicBool,
}

impl ScrapePipeline {
    pub fn new(store: QuoteStore, source: Arc<dyn PageSource>) -> Self {
        Self {
            store,
            source,
            running: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &ScrapeConfig) -> Result<Self> {
        let source: Arc<dyn PageSource> = match &config.fixture_html {
            Some(path) => {
                info!(path = %path.display(), "scraping from local fixture page");
                Arc::new(FixturePageSource::from_path(
                    config.source_url.clone(),
                    path.clone(),
                    config.extraction_mode,
                ))
            }
            None => {
                let http = HttpFetcher::new(HttpClientConfig {
                    timeout: Duration::from_secs(config.http_timeout_secs),
                    user_agent: Some(config.user_agent.clone()),
                    ..Default::default()
                })
                .context("building http fetcher")?;
                Arc::new(LivePageSource::new(
                    config.source_url.clone(),
                    http,
                    config.extraction_mode,
                ))
            }
        };
        Ok(Self::new(QuoteStore::new(config.store_path.clone()), source))
    }

    pub fn store(&self) -> &QuoteStore {
        &self.store
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// One scrape cycle. Rejected with [`PipelineError::AlreadyRunning`] while
    /// another cycle holds the run guard; nothing is queued.
    pub async fn run_once(&self) -> Result<ScrapeOutcome, PipelineError> {
        let Some(_guard) = RunGuard::try_acquire(&self.running) else {
            return Err(PipelineError::AlreadyRunning);
        };

        let span = info_span!("scrape_run", run_id = %Uuid::new_v4(), url = self.source.source_url());
        self.run_cycle().instrument(span).await
    }

    async fn run_cycle(&self) -> Result<ScrapeOutcome, PipelineError> {
        let page = self.source.fetch().await?;
        let incoming = normalize_items(&page.items);
        debug!(raw = page.items.len(), valid = incoming.len(), "normalized scraped batch");

        let existing = self.store.read().await?;
        let (quotes, stats) = merge_with_stats(&existing, &incoming);

        let scraped_at = Utc::now();
        let document = PersistedDocument::new(scraped_at, self.source.source_url(), page.title, quotes);
        self.store.write(&document).await?;

        info!(
            total = document.count,
            added = stats.added,
            updated = stats.updated,
            unchanged = stats.unchanged,
            "scrape cycle persisted"
        );

        Ok(ScrapeOutcome {
            title: document.title,
            quotes: document.quotes,
            scraped_at,
            stats,
        })
    }
}

async fn run_scheduled(pipeline: &ScrapePipeline) {
    match pipeline.run_once().await {
        Ok(outcome) => info!(quotes = outcome.quotes.len(), "scheduled scrape finished"),
        Err(PipelineError::AlreadyRunning) => {
            info!("scheduled scrape skipped; a run is already in progress")
        }
        Err(err) => error!(error = %err, "scheduled scrape failed"),
    }
}

/// A single scrape armed for one point in time. Fires at most once.
pub struct OneShotSchedule {
    scheduler: JobScheduler,
    job_id: Uuid,
    scheduled_for: Option<DateTime<Local>>,
}

impl OneShotSchedule {
    pub async fn arm(pipeline: Arc<ScrapePipeline>, delay: Duration) -> Result<Self> {
        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let job = Job::new_one_shot_async(delay, move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                run_scheduled(&pipeline).await;
            })
        })
        .context("creating one-shot scrape job")?;
        let job_id = sched.add(job).await.context("adding one-shot scrape job")?;
        sched.start().await.context("starting scheduler")?;
        Ok(Self {
            scheduler: sched,
            job_id,
            scheduled_for: None,
        })
    }

    /// Arm from configuration. Every configuration problem is logged and
    /// leaves scheduling off; none of them are fatal.
    pub async fn arm_from_config(config: &ScrapeConfig, pipeline: Arc<ScrapePipeline>) -> Option<Self> {
        if !config.schedule_enabled {
            debug!("scheduled scrape disabled");
            return None;
        }
        let Some(time) = config.schedule_time.as_deref() else {
            warn!("scheduled scrape enabled but QUOTEFEED_SCHEDULE_TIME is not set; skipping");
            return None;
        };

        let parsed = parse_time_of_day(time).and_then(|t| resolve(time, &Local::now()).map(|next| (t, next)));
        let (time_of_day, next) = match parsed {
            Ok(parsed) => parsed,
            Err(err) => {
                error!(error = %err, "invalid schedule time; scheduled scrape disabled");
                return None;
            }
        };

        match Self::arm(pipeline, next.delay).await {
            Ok(mut schedule) => {
                info!(
                    scheduled_for = %next.scheduled_for.to_rfc3339(),
                    delay_secs = next.delay.as_secs(),
                    ambiguous = time_of_day.is_ambiguous(),
                    "scheduled scrape armed"
                );
                schedule.scheduled_for = Some(next.scheduled_for);
                Some(schedule)
            }
            Err(err) => {
                error!(error = %err, "failed to arm scheduled scrape");
                None
            }
        }
    }

    pub fn scheduled_for(&self) -> Option<DateTime<Local>> {
        self.scheduled_for
    }

    /// Disarm the job (if it has not fired yet) and stop the scheduler.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Err(err) = self.scheduler.remove(&self.job_id).await {
            debug!(error = %err, "one-shot scrape job already gone");
        }
        self.scheduler.shutdown().await.context("stopping scheduler")?;
        Ok(())
    }
}

/// Build the pipeline from the environment and run a single cycle.
pub async fn run_scrape_once_from_env() -> Result<ScrapeOutcome> {
    let config = ScrapeConfig::from_env();
    let pipeline = ScrapePipeline::from_config(&config)?;
    pipeline.run_once().await.context("scrape cycle failed")
}
