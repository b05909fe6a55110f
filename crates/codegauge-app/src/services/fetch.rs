//! Repository acquisition seam.
//!
//! Acquisition is an external collaborator: the pipeline only needs
//! `fetch(reference) -> bytes` returning a gzip-compressed tar archive.
//! Failures are surfaced as-is; retrying acquisition is not this pipeline's
//! concern.

use async_trait::async_trait;
use bytes::Bytes;

use crate::services::context::{PipelineError, PipelineResult};

/// Narrow interface over repository acquisition.
#[async_trait]
pub trait RepoFetcher: Send + Sync {
    /// Resolve `reference` to a raw archive blob.
    async fn fetch(&self, reference: &str) -> PipelineResult<Bytes>;
}

/// Fetcher dispatching on the reference shape: `http(s)://` references are
/// downloaded, everything else is read as a local archive path.
pub struct DefaultRepoFetcher {
    http: reqwest::Client,
}

impl DefaultRepoFetcher {
    pub fn new() -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .user_agent("codegauge")
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl RepoFetcher for DefaultRepoFetcher {
    async fn fetch(&self, reference: &str) -> PipelineResult<Bytes> {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            let response = self.http.get(reference).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(PipelineError::Api {
                    status: status.as_u16(),
                    message: format!("archive download failed for {reference}"),
                });
            }
            Ok(response.bytes().await?)
        } else {
            let bytes = tokio::fs::read(reference).await.map_err(|e| {
                PipelineError::message(format!("failed to read archive {reference}: {e}"))
            })?;
            Ok(Bytes::from(bytes))
        }
    }
}
