//! Application-level error type shared across the binary and services.

use thiserror::Error;

use crate::config::AppConfigError;
use crate::paths::PathError;
use crate::services::blob_store::BlobError;
use crate::services::context::PipelineError;
use crate::services::jobs::PipelineJobStoreError;
use crate::services::reports::ReportStoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    ConfigLoad(#[from] AppConfigError),
    #[error(transparent)]
    Paths(#[from] PathError),
    #[error(transparent)]
    BlobStore(#[from] BlobError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Jobs(#[from] PipelineJobStoreError),
    #[error(transparent)]
    Reports(#[from] ReportStoreError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Message(String),
}

impl AppError {
    pub fn message(msg: impl Into<String>) -> Self {
        AppError::Message(msg.into())
    }
}
