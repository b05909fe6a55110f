//! Reduction: gather whatever verdicts exist for a job and persist one report.
//!
//! The reducer is deliberately tolerant of partial results. It lists the
//! job's result prefix once, parses what it can, skips what it cannot, and
//! aggregates over the verdicts it actually read; verdicts a straggler writes
//! after the listing are simply absent from the report. Only an empty result
//! set or a failure to persist the report row itself is an error.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::constants::DETAIL_INSERT_BATCH;
use crate::pipeline::stats::{compute_stats, fallback_summary, JobStats};
use crate::pipeline::verdict::Verdict;
use crate::services::blob_store::BlobStore;
use crate::services::context::{PipelineError, PipelineResult, Summarizer};
use crate::services::reports::{AggregateReport, ReportDetail, ReportStore};

/// Identity of the job being reduced.
#[derive(Debug, Clone)]
pub struct ReduceTarget {
    pub job_id: String,
    pub user_id: String,
    pub project_id: String,
}

/// Durable snapshot of a finished report, written next to the results.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReportBundle {
    pub report: AggregateReport,
    pub details: Vec<ReportDetail>,
}

/// Key under which the archival report bundle is stored.
pub fn archive_key(job_id: &str) -> String {
    format!("archive/{job_id}.json")
}

/// Aggregate all stored verdicts for `target` into a persisted report.
pub async fn reduce_job(
    blobs: &dyn BlobStore,
    summarizer: &dyn Summarizer,
    reports: &dyn ReportStore,
    target: &ReduceTarget,
) -> PipelineResult<AggregateReport> {
    let verdicts = collect_verdicts(blobs, &target.job_id).await?;
    if verdicts.is_empty() {
        return Err(PipelineError::NoResults {
            job_id: target.job_id.clone(),
        });
    }

    let stats = compute_stats(&verdicts);
    let summary = summarize(summarizer, &stats, &verdicts).await;

    let report = AggregateReport {
        job_id: target.job_id.clone(),
        user_id: target.user_id.clone(),
        project_id: target.project_id.clone(),
        overall_score: stats.overall_score,
        summary,
        total_files: stats.total_files as u32,
        files_with_tests: stats.files_with_tests as u32,
        avg_score: stats.avg_score,
        created_at: chrono::Utc::now().to_rfc3339(),
    };

    // The report row is the canonical outcome; its insert must succeed.
    let report_id = reports.insert_report(&report)?;

    // Detail rows are drill-down data. A failed batch loses those rows only.
    let details: Vec<ReportDetail> = verdicts.iter().map(ReportDetail::from).collect();
    for chunk in details.chunks(DETAIL_INSERT_BATCH) {
        if let Err(err) = reports.insert_details(report_id, chunk) {
            warn!(job_id = %target.job_id, error = %err, "detail batch insert failed, continuing");
        }
    }

    store_bundle(blobs, &target.job_id, &report, details).await;

    info!(
        job_id = %target.job_id,
        total_files = report.total_files,
        overall_score = report.overall_score,
        "report persisted"
    );
    Ok(report)
}

/// Read and parse every verdict currently stored under the job's result
/// prefix. Unparseable blobs are logged and skipped.
async fn collect_verdicts(blobs: &dyn BlobStore, job_id: &str) -> PipelineResult<Vec<Verdict>> {
    let prefix = format!("results/{job_id}/");
    let keys = blobs.list(&prefix).await?;

    let mut verdicts = Vec::with_capacity(keys.len());
    for key in keys {
        let bytes = match blobs.get(&key).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(key = %key, error = %err, "result unreadable, skipping");
                continue;
            }
        };
        match serde_json::from_slice::<Verdict>(&bytes) {
            Ok(verdict) => verdicts.push(verdict),
            Err(err) => {
                warn!(key = %key, error = %err, "result is not valid verdict JSON, skipping");
            }
        }
    }
    Ok(verdicts)
}

/// Ask the summarizer for an executive summary; fall back to the
/// deterministic local summary on any failure.
async fn summarize(summarizer: &dyn Summarizer, stats: &JobStats, verdicts: &[Verdict]) -> String {
    match summarizer.summarize(&build_summary_prompt(stats, verdicts)).await {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => {
            warn!("summarizer returned empty text, using fallback summary");
            fallback_summary(stats)
        }
        Err(err) => {
            warn!(error = %err, "summarizer unavailable, using fallback summary");
            fallback_summary(stats)
        }
    }
}

fn build_summary_prompt(stats: &JobStats, verdicts: &[Verdict]) -> String {
    let mut results = String::new();
    for verdict in verdicts {
        results.push_str(&format!(
            "- {} (score {:.1})\n",
            verdict.file_path, verdict.score
        ));
        for observation in &verdict.observations {
            results.push_str(&format!("  - {observation}\n"));
        }
    }

    format!(
        "Summarize this code quality audit as 3-5 short, actionable bullet points.\n\
         Files analyzed: {}\n\
         Files with tests: {}\n\
         Average testability score: {:.1}/10\n\
         Per-file results:\n{results}",
        stats.total_files, stats.files_with_tests, stats.avg_score,
    )
}

/// Best-effort archival snapshot next to the raw results. Losing it costs
/// nothing the relational store does not already hold.
async fn store_bundle(
    blobs: &dyn BlobStore,
    job_id: &str,
    report: &AggregateReport,
    details: Vec<ReportDetail>,
) {
    let bundle = ReportBundle {
        report: report.clone(),
        details,
    };
    let payload = match serde_json::to_vec(&bundle) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(job_id = %job_id, error = %err, "report bundle serialization failed");
            return;
        }
    };
    if let Err(err) = blobs.put(&archive_key(job_id), payload.into()).await {
        warn!(job_id = %job_id, error = %err, "report bundle upload failed");
    }
}
