//! Relational persistence for aggregate reports and per-unit detail rows.
//!
//! The aggregate report is the canonical record of a job's outcome; detail
//! rows are best-effort drill-down data inserted in fixed-size batches, one
//! transaction per batch and not transactional across batches.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::verdict::Verdict;

/// One aggregate report per completed job, success or failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    pub job_id: String,
    pub user_id: String,
    pub project_id: String,
    /// Derived 0-100 score.
    pub overall_score: u8,
    /// Executive summary, or the failure explanation for failure reports.
    pub summary: String,
    pub total_files: u32,
    pub files_with_tests: u32,
    /// Mean per-unit score on the 0-10 scale, one decimal.
    pub avg_score: f64,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

impl AggregateReport {
    /// Explicit zero-valued failure report carrying the error message, so that
    /// every job that got past dispatch terminates in exactly one report row.
    pub fn failure(
        job_id: impl Into<String>,
        user_id: impl Into<String>,
        project_id: impl Into<String>,
        cause: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            user_id: user_id.into(),
            project_id: project_id.into(),
            overall_score: 0,
            summary: format!("report generation failed: {}", cause.into()),
            total_files: 0,
            files_with_tests: 0,
            avg_score: 0.0,
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

/// Per-unit detail row referencing its report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDetail {
    pub file_path: String,
    pub score: f64,
    pub has_tests: bool,
    pub test_type: String,
    pub observations: Vec<String>,
    pub suggestions: Vec<String>,
}

impl From<&Verdict> for ReportDetail {
    fn from(verdict: &Verdict) -> Self {
        Self {
            file_path: verdict.file_path.clone(),
            score: verdict.score,
            has_tests: verdict.has_tests,
            test_type: verdict.test_type.as_ref().to_string(),
            observations: verdict.observations.clone(),
            suggestions: verdict.suggestions.clone(),
        }
    }
}

/// Errors emitted by the report store.
#[derive(Debug, Error)]
pub enum ReportStoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("report store connection poisoned")]
    Poisoned,
}

/// Insert/select contract consumed by the reducer and the CLI.
pub trait ReportStore: Send + Sync {
    /// Persist one aggregate report, returning its row id.
    fn insert_report(&self, report: &AggregateReport) -> Result<i64, ReportStoreError>;

    /// Persist one batch of detail rows referencing `report_id`. Callers chunk
    /// rows to respect the persistence layer's payload ceiling.
    fn insert_details(
        &self,
        report_id: i64,
        rows: &[ReportDetail],
    ) -> Result<(), ReportStoreError>;

    /// Fetch the report persisted for `job_id`, if any.
    fn get_report(&self, job_id: &str) -> Result<Option<AggregateReport>, ReportStoreError>;

    /// Fetch all detail rows persisted for `job_id`'s report.
    fn get_details(&self, job_id: &str) -> Result<Vec<ReportDetail>, ReportStoreError>;
}

/// SQLite-backed report store.
pub struct SqliteReportStore {
    conn: Mutex<Connection>,
}

impl SqliteReportStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ReportStoreError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, ReportStoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, ReportStoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS reports (
                 id INTEGER PRIMARY KEY,
                 job_id TEXT NOT NULL UNIQUE,
                 user_id TEXT NOT NULL,
                 project_id TEXT NOT NULL,
                 overall_score INTEGER NOT NULL,
                 summary TEXT NOT NULL,
                 total_files INTEGER NOT NULL,
                 files_with_tests INTEGER NOT NULL,
                 avg_score REAL NOT NULL,
                 created_at TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS report_details (
                 id INTEGER PRIMARY KEY,
                 report_id INTEGER NOT NULL REFERENCES reports(id),
                 file_path TEXT NOT NULL,
                 score REAL NOT NULL,
                 has_tests INTEGER NOT NULL,
                 test_type TEXT NOT NULL,
                 observations TEXT NOT NULL,
                 suggestions TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_report_details_report
                 ON report_details(report_id);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl ReportStore for SqliteReportStore {
    fn insert_report(&self, report: &AggregateReport) -> Result<i64, ReportStoreError> {
        let conn = self.conn.lock().map_err(|_| ReportStoreError::Poisoned)?;
        conn.execute(
            "INSERT INTO reports (job_id, user_id, project_id, overall_score, summary,
                                  total_files, files_with_tests, avg_score, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                report.job_id,
                report.user_id,
                report.project_id,
                report.overall_score,
                report.summary,
                report.total_files,
                report.files_with_tests,
                report.avg_score,
                report.created_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn insert_details(
        &self,
        report_id: i64,
        rows: &[ReportDetail],
    ) -> Result<(), ReportStoreError> {
        let mut conn = self.conn.lock().map_err(|_| ReportStoreError::Poisoned)?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO report_details (report_id, file_path, score, has_tests,
                                             test_type, observations, suggestions)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for row in rows {
                stmt.execute(params![
                    report_id,
                    row.file_path,
                    row.score,
                    row.has_tests,
                    row.test_type,
                    serde_json::to_string(&row.observations)?,
                    serde_json::to_string(&row.suggestions)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn get_report(&self, job_id: &str) -> Result<Option<AggregateReport>, ReportStoreError> {
        let conn = self.conn.lock().map_err(|_| ReportStoreError::Poisoned)?;
        let mut stmt = conn.prepare(
            "SELECT job_id, user_id, project_id, overall_score, summary,
                    total_files, files_with_tests, avg_score, created_at
             FROM reports WHERE job_id = ?1",
        )?;
        let mut rows = stmt.query_map(params![job_id], |row| {
            Ok(AggregateReport {
                job_id: row.get(0)?,
                user_id: row.get(1)?,
                project_id: row.get(2)?,
                overall_score: row.get(3)?,
                summary: row.get(4)?,
                total_files: row.get(5)?,
                files_with_tests: row.get(6)?,
                avg_score: row.get(7)?,
                created_at: row.get(8)?,
            })
        })?;
        match rows.next() {
            Some(report) => Ok(Some(report?)),
            None => Ok(None),
        }
    }

    fn get_details(&self, job_id: &str) -> Result<Vec<ReportDetail>, ReportStoreError> {
        let conn = self.conn.lock().map_err(|_| ReportStoreError::Poisoned)?;
        let mut stmt = conn.prepare(
            "SELECT d.file_path, d.score, d.has_tests, d.test_type, d.observations, d.suggestions
             FROM report_details d
             JOIN reports r ON r.id = d.report_id
             WHERE r.job_id = ?1
             ORDER BY d.file_path",
        )?;
        let rows = stmt.query_map(params![job_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (file_path, score, has_tests, test_type, observations, suggestions) = row?;
            out.push(ReportDetail {
                file_path,
                score,
                has_tests,
                test_type,
                observations: serde_json::from_str(&observations)?,
                suggestions: serde_json::from_str(&suggestions)?,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DETAIL_INSERT_BATCH;

    fn sample_report(job_id: &str) -> AggregateReport {
        AggregateReport {
            job_id: job_id.to_string(),
            user_id: "user-1".to_string(),
            project_id: "proj-1".to_string(),
            overall_score: 50,
            summary: "- add tests".to_string(),
            total_files: 3,
            files_with_tests: 1,
            avg_score: 5.0,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    fn sample_detail(path: &str) -> ReportDetail {
        ReportDetail {
            file_path: path.to_string(),
            score: 5.0,
            has_tests: false,
            test_type: "none".to_string(),
            observations: vec!["untested".to_string()],
            suggestions: vec!["add unit tests".to_string()],
        }
    }

    #[test]
    fn insert_and_fetch_report() {
        let store = SqliteReportStore::open_in_memory().expect("open store");
        let report = sample_report("job-1");

        let id = store.insert_report(&report).expect("insert succeeds");
        assert!(id > 0);

        let fetched = store
            .get_report("job-1")
            .expect("select succeeds")
            .expect("report exists");
        assert_eq!(fetched, report);

        assert!(store.get_report("job-missing").expect("select").is_none());
    }

    #[test]
    fn duplicate_job_id_is_rejected() {
        let store = SqliteReportStore::open_in_memory().expect("open store");
        store.insert_report(&sample_report("job-1")).expect("first insert");
        assert!(store.insert_report(&sample_report("job-1")).is_err());
    }

    #[test]
    fn details_roundtrip_through_batches() {
        let store = SqliteReportStore::open_in_memory().expect("open store");
        let id = store
            .insert_report(&sample_report("job-1"))
            .expect("insert report");

        let rows: Vec<ReportDetail> = (0..120)
            .map(|i| sample_detail(&format!("src/file_{i:03}.rs")))
            .collect();
        for chunk in rows.chunks(DETAIL_INSERT_BATCH) {
            store.insert_details(id, chunk).expect("batch insert");
        }

        let fetched = store.get_details("job-1").expect("select details");
        assert_eq!(fetched.len(), 120);
        assert_eq!(fetched[0].file_path, "src/file_000.rs");
        assert_eq!(fetched[0].observations, vec!["untested".to_string()]);
    }

    #[test]
    fn failure_report_is_zero_valued() {
        let report = AggregateReport::failure("job-9", "u", "p", "sqlite exploded");
        assert_eq!(report.overall_score, 0);
        assert_eq!(report.total_files, 0);
        assert_eq!(report.avg_score, 0.0);
        assert!(report.summary.contains("sqlite exploded"));

        let store = SqliteReportStore::open_in_memory().expect("open store");
        store.insert_report(&report).expect("failure report persists");
        let fetched = store.get_report("job-9").expect("select").expect("exists");
        assert_eq!(fetched.overall_score, 0);
    }
}
