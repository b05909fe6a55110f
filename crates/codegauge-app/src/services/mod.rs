//! Orchestration layer for IO-bound pipeline services.
//!
//! Modules exposed here coordinate external systems (blob storage, the
//! classifier, job and report persistence) and must avoid embedding pure
//! transforms. Keep stateless helpers in `crate::pipeline` so concurrency and
//! resource accounting stay localized.

pub mod analyzer;
pub mod blob_store;
pub mod classifier;
pub mod context;
pub mod coordinator;
pub mod fetch;
pub mod jobs;
pub mod reducer;
pub mod reports;
pub mod scheduler;
pub mod unpacker;

pub use analyzer::{analyze_unit, result_key, UnitRef};
pub use blob_store::{validate_key, BlobError, BlobStore, FsBlobStore, MemoryBlobStore};
pub use classifier::GeminiClient;
pub use context::{
    build_pipeline_context, Classifier, GenericRateLimiter, PipelineContext, PipelineError,
    PipelineResult, RuntimeLimits, Summarizer,
};
pub use coordinator::{run_pipeline, PipelineOutcome, RunRequest};
pub use fetch::{DefaultRepoFetcher, RepoFetcher};
pub use jobs::{PipelineJob, PipelineJobStatus, PipelineJobStore, PipelineJobStoreError};
pub use reducer::{archive_key, reduce_job, ReduceTarget, ReportBundle};
pub use reports::{
    AggregateReport, ReportDetail, ReportStore, ReportStoreError, SqliteReportStore,
};
pub use scheduler::{dispatch_units, DispatchSummary};
pub use unpacker::{unit_key, unpack_archive, UnpackError};
