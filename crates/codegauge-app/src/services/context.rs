use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use thiserror::Error;

use crate::config::AppConfig;
use crate::constants::{DEFAULT_BATCH_DEADLINE_SECS, DEFAULT_UNIT_TIMEOUT_SECS, MAX_CONCURRENT_UNITS};
use crate::paths::{AppPaths, PathError};
use crate::services::blob_store::{BlobError, BlobStore, FsBlobStore};
use crate::services::classifier::GeminiClient;
use crate::services::fetch::{DefaultRepoFetcher, RepoFetcher};
use crate::services::jobs::{PipelineJobStore, PipelineJobStoreError};
use crate::services::reports::{ReportStore, ReportStoreError, SqliteReportStore};
use crate::services::unpacker::UnpackError;

pub type GenericRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// External classifier: text in, untrusted text out. May fail, hang past the
/// caller's timeout, or return non-JSON text; callers own validation.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, system_role: &str, prompt: &str) -> PipelineResult<String>;
}

/// External summarizer with the same failure surface as the classifier.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, prompt: &str) -> PipelineResult<String>;
}

/// Concurrency and timeout ceilings applied per analysis batch.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeLimits {
    /// Global ceiling on units analyzed concurrently.
    pub max_concurrent_units: usize,
    /// Per-unit invocation timeout; a unit past it is treated as failed.
    pub unit_timeout: Duration,
    /// Overall batch deadline after which the scheduler stops waiting and
    /// hands control to the reducer.
    pub batch_deadline: Duration,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            max_concurrent_units: MAX_CONCURRENT_UNITS,
            unit_timeout: Duration::from_secs(DEFAULT_UNIT_TIMEOUT_SECS),
            batch_deadline: Duration::from_secs(DEFAULT_BATCH_DEADLINE_SECS),
        }
    }
}

/// Shared wiring handed to the pipeline coordinator: durable stores, external
/// collaborators, and runtime ceilings.
pub struct PipelineContext {
    pub paths: AppPaths,
    pub blobs: Arc<dyn BlobStore>,
    pub classifier: Arc<dyn Classifier>,
    pub summarizer: Arc<dyn Summarizer>,
    pub fetcher: Arc<dyn RepoFetcher>,
    pub jobs: Arc<PipelineJobStore>,
    pub reports: Arc<dyn ReportStore>,
    pub limits: RuntimeLimits,
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error(transparent)]
    Jobs(#[from] PipelineJobStoreError),
    #[error(transparent)]
    Reports(#[from] ReportStoreError),
    #[error(transparent)]
    Unpack(#[from] UnpackError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("remote service returned status {status}: {message}")]
    Api { status: u16, message: String },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("missing GOOGLE_AI_API_KEY or GEMINI_API_KEY environment variable")]
    MissingGeminiApiKey,
    #[error("job `{job_id}` has nothing to analyze: no entries survived the inclusion policy")]
    NothingToAnalyze { job_id: String },
    #[error("job `{job_id}` has no results to aggregate")]
    NoResults { job_id: String },
}

impl PipelineError {
    pub fn message(msg: impl Into<String>) -> Self {
        PipelineError::Message(msg.into())
    }

    /// Whether the job never got past unpacking, meaning no report row is
    /// owed to the caller (a "failed to start" rejection).
    pub fn is_failed_to_start(&self) -> bool {
        matches!(
            self,
            PipelineError::Unpack(_) | PipelineError::NothingToAnalyze { .. }
        )
    }
}

/// Wire up the production pipeline context from configuration.
pub fn build_pipeline_context(cfg: &AppConfig) -> PipelineResult<PipelineContext> {
    let paths = match &cfg.storage.data_dir {
        Some(dir) => AppPaths::new(dir)?,
        None => AppPaths::from_project_dirs()?,
    };

    let quota = Quota::per_second(
        NonZeroU32::new(cfg.classifier.requests_per_second.max(1))
            .unwrap_or(NonZeroU32::MIN),
    );
    let limiter = Arc::new(RateLimiter::direct(quota));

    let client = Arc::new(GeminiClient::from_env(
        cfg.classifier.model.clone(),
        Some(limiter),
    )?);
    let blobs = Arc::new(FsBlobStore::builder().paths(paths.clone()).build());
    let jobs = Arc::new(PipelineJobStore::open(&paths)?);
    let reports = Arc::new(SqliteReportStore::open(paths.reports_db_path())?);
    let fetcher = Arc::new(DefaultRepoFetcher::new()?);

    let limits = RuntimeLimits {
        max_concurrent_units: cfg.limits.max_concurrent_units.max(1),
        unit_timeout: Duration::from_secs(cfg.limits.unit_timeout_secs),
        batch_deadline: Duration::from_secs(cfg.limits.batch_deadline_secs),
    };

    Ok(PipelineContext {
        paths,
        blobs,
        classifier: client.clone(),
        summarizer: client,
        fetcher,
        jobs,
        reports,
        limits,
    })
}
