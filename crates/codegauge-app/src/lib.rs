//! Batch code-quality analysis pipeline.
//!
//! A submitted repository archive is unpacked into per-file analysis units,
//! each unit is scored by an AI classifier under bounded concurrency, and the
//! surviving verdicts are reduced into one persisted aggregate report. The
//! pipeline tolerates partial failure end to end: a lost unit costs one
//! verdict, never the job.

pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod paths;
pub mod pipeline;
pub mod services;

pub use error::AppError;
pub use paths::AppPaths;
