use std::time::{SystemTime, UNIX_EPOCH};

use bincode::config;
use bincode::error::{DecodeError, EncodeError};
use bincode::serde::{decode_from_slice, encode_to_vec};
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::paths::{AppPaths, PathError};

const JOB_ENV_MAP_SIZE_BYTES: usize = 1 << 28; // 256 MiB

/// Stage a pipeline job is in, persisted as an explicit state-machine value
/// so independently retried invocations never rely on implicit control flow.
///
/// `Stopped` is the non-error halt taken when the caller did not request
/// automatic continuation after unpacking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineJobStatus {
    Unpacking,
    Analyzing,
    Reducing,
    Done,
    Stopped,
    Failed,
}

impl PipelineJobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineJobStatus::Unpacking => "unpacking",
            PipelineJobStatus::Analyzing => "analyzing",
            PipelineJobStatus::Reducing => "reducing",
            PipelineJobStatus::Done => "done",
            PipelineJobStatus::Stopped => "stopped",
            PipelineJobStatus::Failed => "failed",
        }
    }

    /// Whether the job can no longer transition to another state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineJobStatus::Done | PipelineJobStatus::Stopped | PipelineJobStatus::Failed
        )
    }
}

/// Metadata persisted for every pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineJob {
    pub job_id: String,
    pub user_id: String,
    pub project_id: String,
    pub status: PipelineJobStatus,
    #[serde(default)]
    pub unit_count: u32,
    pub error: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl PipelineJob {
    #[must_use]
    pub fn new(
        job_id: impl Into<String>,
        user_id: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        let job_id = job_id.into();
        debug_assert!(!job_id.is_empty());
        let now_ms = current_timestamp_ms();
        Self {
            job_id,
            user_id: user_id.into(),
            project_id: project_id.into(),
            status: PipelineJobStatus::Unpacking,
            unit_count: 0,
            error: None,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    pub fn set_status(&mut self, status: PipelineJobStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
        self.updated_at_ms = current_timestamp_ms();
    }
}

pub(crate) fn current_timestamp_ms() -> i64 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    since_epoch.as_millis() as i64
}

/// Errors emitted by the pipeline job store.
#[derive(Debug, Error)]
pub enum PipelineJobStoreError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Heed(#[from] heed::Error),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("job `{0}` already exists")]
    Duplicate(String),
    #[error("job `{0}` not found")]
    NotFound(String),
}

/// LMDB-backed persistence for pipeline jobs.
#[derive(Debug)]
pub struct PipelineJobStore {
    env: Env,
    jobs: Database<Str, Bytes>,
}

impl PipelineJobStore {
    pub fn open(paths: &AppPaths) -> Result<Self, PipelineJobStoreError> {
        let path = paths.jobs_lmdb_dir()?;
        debug_assert!(path.exists());

        let mut options = EnvOpenOptions::new();
        options.max_dbs(4);
        options.map_size(JOB_ENV_MAP_SIZE_BYTES);
        let env = unsafe {
            // SAFETY: LMDB requires callers to uphold environment lifetime invariants.
            options.open(&path)?
        };
        let jobs = {
            let rtxn = env.read_txn()?;
            let opened = env.open_database::<Str, Bytes>(&rtxn, Some("jobs"))?;
            drop(rtxn);
            match opened {
                Some(existing) => existing,
                None => {
                    let mut wtxn = env.write_txn()?;
                    let db = env.create_database::<Str, Bytes>(&mut wtxn, Some("jobs"))?;
                    wtxn.commit()?;
                    db
                }
            }
        };
        Ok(Self { env, jobs })
    }

    /// Record a freshly submitted job. Job ids are unique per run; reuse is a
    /// caller bug surfaced as `Duplicate`.
    pub fn insert(&self, job: &PipelineJob) -> Result<(), PipelineJobStoreError> {
        debug_assert!(!job.job_id.is_empty());
        debug_assert!(job.status == PipelineJobStatus::Unpacking);

        let mut wtxn = self.env.write_txn()?;
        if self.jobs.get(&wtxn, job.job_id.as_str())?.is_some() {
            return Err(PipelineJobStoreError::Duplicate(job.job_id.clone()));
        }
        let encoded = encode_to_vec(job, config::standard())?;
        self.jobs
            .put(&mut wtxn, job.job_id.as_str(), encoded.as_slice())?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn get(&self, job_id: &str) -> Result<Option<PipelineJob>, PipelineJobStoreError> {
        debug_assert!(!job_id.is_empty());
        let rtxn = self.env.read_txn()?;
        let value = self.jobs.get(&rtxn, job_id)?;
        if let Some(raw) = value {
            let (job, _) = decode_from_slice::<PipelineJob, _>(raw, config::standard())?;
            Ok(Some(job))
        } else {
            Ok(None)
        }
    }

    /// Transition a job to `status`, overwriting the full record.
    pub fn update_status(
        &self,
        job_id: &str,
        status: PipelineJobStatus,
        error: Option<String>,
    ) -> Result<PipelineJob, PipelineJobStoreError> {
        debug_assert!(!job_id.is_empty());
        let mut wtxn = self.env.write_txn()?;
        let existing = self.jobs.get(&wtxn, job_id)?;
        let Some(raw) = existing else {
            return Err(PipelineJobStoreError::NotFound(job_id.to_string()));
        };
        let (mut job, _) = decode_from_slice::<PipelineJob, _>(raw, config::standard())?;
        job.set_status(status, error);
        let encoded = encode_to_vec(&job, config::standard())?;
        self.jobs.put(&mut wtxn, job_id, encoded.as_slice())?;
        wtxn.commit()?;
        Ok(job)
    }

    pub fn upsert(&self, job: &PipelineJob) -> Result<(), PipelineJobStoreError> {
        debug_assert!(!job.job_id.is_empty());
        let mut wtxn = self.env.write_txn()?;
        let encoded = encode_to_vec(job, config::standard())?;
        self.jobs
            .put(&mut wtxn, job.job_id.as_str(), encoded.as_slice())?;
        wtxn.commit()?;
        Ok(())
    }

    /// List jobs, most recently created first, optionally filtered by status.
    pub fn list(
        &self,
        status: Option<PipelineJobStatus>,
        limit: usize,
    ) -> Result<Vec<PipelineJob>, PipelineJobStoreError> {
        debug_assert!(limit > 0);
        let rtxn = self.env.read_txn()?;
        let iter = self.jobs.iter(&rtxn)?;
        let mut out = Vec::new();
        for entry in iter {
            let (_, raw) = entry?;
            let (job, _) = decode_from_slice::<PipelineJob, _>(raw, config::standard())?;
            if let Some(wanted) = status {
                if job.status != wanted {
                    continue;
                }
            }
            out.push(job);
        }
        out.sort_by_key(|job| std::cmp::Reverse(job.created_at_ms));
        out.truncate(limit);
        Ok(out)
    }

    pub fn count_by_status(
        &self,
        status: PipelineJobStatus,
    ) -> Result<usize, PipelineJobStoreError> {
        let rtxn = self.env.read_txn()?;
        let iter = self.jobs.iter(&rtxn)?;
        let mut count = 0_usize;
        for entry in iter {
            let (_, raw) = entry?;
            let (job, _) = decode_from_slice::<PipelineJob, _>(raw, config::standard())?;
            if job.status == status {
                count = count.saturating_add(1);
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::AppPaths;
    use tempfile::TempDir;

    #[test]
    fn pipeline_job_new_sets_defaults() {
        let job = PipelineJob::new("job-123", "user-1", "proj-1");

        assert_eq!(job.job_id, "job-123");
        assert_eq!(job.user_id, "user-1");
        assert_eq!(job.project_id, "proj-1");
        assert_eq!(job.status, PipelineJobStatus::Unpacking);
        assert_eq!(job.unit_count, 0);
        assert!(job.error.is_none());
        assert!(!job.status.is_terminal());
    }

    #[test]
    fn insert_rejects_duplicate_job_id() {
        let temp = TempDir::new().expect("temp dir");
        let paths = AppPaths::new(temp.path()).expect("app paths");
        let store = PipelineJobStore::open(&paths).expect("open store");

        let job = PipelineJob::new("job-id", "u", "p");
        store.insert(&job).expect("initial insert succeeds");
        let err = store.insert(&job).expect_err("duplicate insert fails");
        match err {
            PipelineJobStoreError::Duplicate(id) => assert_eq!(id, "job-id"),
            other => panic!("expected duplicate error, got {other:?}"),
        }
    }

    #[test]
    fn status_transitions_persist() {
        let temp = TempDir::new().expect("temp dir");
        let paths = AppPaths::new(temp.path()).expect("app paths");
        let store = PipelineJobStore::open(&paths).expect("open store");

        let job = PipelineJob::new("job-456", "u", "p");
        store.insert(&job).expect("insert succeeds");

        for status in [
            PipelineJobStatus::Analyzing,
            PipelineJobStatus::Reducing,
            PipelineJobStatus::Done,
        ] {
            let updated = store
                .update_status(&job.job_id, status, None)
                .expect("status update succeeds");
            assert_eq!(updated.status, status);
            let fetched = store
                .get(&job.job_id)
                .expect("fetch succeeds")
                .expect("job exists");
            assert_eq!(fetched.status, status);
            assert!(fetched.updated_at_ms >= fetched.created_at_ms);
        }
    }

    #[test]
    fn failed_status_carries_error_message() {
        let temp = TempDir::new().expect("temp dir");
        let paths = AppPaths::new(temp.path()).expect("app paths");
        let store = PipelineJobStore::open(&paths).expect("open store");

        let job = PipelineJob::new("job-err", "u", "p");
        store.insert(&job).expect("insert succeeds");
        store
            .update_status(
                &job.job_id,
                PipelineJobStatus::Failed,
                Some("nothing to analyze".to_string()),
            )
            .expect("update succeeds");

        let fetched = store.get("job-err").expect("fetch").expect("exists");
        assert_eq!(fetched.status, PipelineJobStatus::Failed);
        assert_eq!(fetched.error.as_deref(), Some("nothing to analyze"));
        assert!(fetched.status.is_terminal());
    }

    #[test]
    fn list_filters_by_status_and_orders_newest_first() {
        let temp = TempDir::new().expect("temp dir");
        let paths = AppPaths::new(temp.path()).expect("app paths");
        let store = PipelineJobStore::open(&paths).expect("open store");

        for id in ["a", "b", "c"] {
            let mut job = PipelineJob::new(id, "u", "p");
            job.created_at_ms += id.as_bytes()[0] as i64;
            store.upsert(&job).expect("upsert succeeds");
        }
        store
            .update_status("b", PipelineJobStatus::Done, None)
            .expect("update succeeds");

        let unpacking = store
            .list(Some(PipelineJobStatus::Unpacking), 10)
            .expect("list succeeds");
        assert_eq!(unpacking.len(), 2);
        assert_eq!(unpacking[0].job_id, "c", "newest first");

        assert_eq!(
            store.count_by_status(PipelineJobStatus::Done).expect("count"),
            1
        );
    }
}
