//! End-to-end pipeline orchestration and the job state machine.
//!
//! The coordinator owns status transitions: unpacking, analyzing, reducing,
//! then done, with failed and stopped as terminal exits. Failures before any
//! unit was dispatched reject the job outright and leave no report row;
//! failures after dispatch still owe the caller a report row, so a zero-valued
//! failure report is written best-effort before the job is marked failed.

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::services::analyzer::{analyze_unit, UnitRef};
use crate::services::context::{PipelineContext, PipelineError, PipelineResult};
use crate::services::jobs::{PipelineJob, PipelineJobStatus};
use crate::services::reducer::{reduce_job, ReduceTarget};
use crate::services::reports::AggregateReport;
use crate::services::scheduler::dispatch_units;
use crate::services::unpacker::unpack_archive;

/// One pipeline submission.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Archive location: an `http(s)://` URL or a local filesystem path.
    pub reference: String,
    pub user_id: String,
    pub project_id: String,
    /// When false, the pipeline stops after unpacking so the caller can
    /// inspect the extracted units before committing to analysis.
    pub auto_continue: bool,
}

/// Terminal outcome of a pipeline run that did not error.
#[derive(Debug)]
pub enum PipelineOutcome {
    Completed(AggregateReport),
    /// Unpacking finished but analysis was not requested.
    Stopped { job_id: String, unit_count: u32 },
}

/// Drive one job through the full pipeline.
pub async fn run_pipeline(
    ctx: &PipelineContext,
    request: RunRequest,
) -> PipelineResult<PipelineOutcome> {
    let job_id = Uuid::new_v4().to_string();
    let mut job = PipelineJob::new(&job_id, &request.user_id, &request.project_id);
    ctx.jobs.insert(&job)?;
    info!(job_id = %job_id, reference = %request.reference, "pipeline job accepted");

    let paths = match unpack_stage(ctx, &request, &job_id).await {
        Ok(paths) => paths,
        Err(err) => return Err(reject(ctx, &job_id, err)),
    };

    job.unit_count = paths.len() as u32;
    if !request.auto_continue {
        job.set_status(PipelineJobStatus::Stopped, None);
        ctx.jobs.upsert(&job)?;
        info!(job_id = %job_id, unit_count = job.unit_count, "stopped after unpacking");
        return Ok(PipelineOutcome::Stopped {
            job_id,
            unit_count: job.unit_count,
        });
    }

    job.set_status(PipelineJobStatus::Analyzing, None);
    ctx.jobs.upsert(&job)?;

    let units: Vec<UnitRef> = paths
        .into_iter()
        .map(|path| UnitRef {
            job_id: job_id.clone(),
            user_id: request.user_id.clone(),
            project_id: request.project_id.clone(),
            path,
        })
        .collect();

    let summary = dispatch_units(units, &ctx.limits, |unit| {
        let blobs = ctx.blobs.clone();
        let classifier = ctx.classifier.clone();
        async move { analyze_unit(blobs.as_ref(), classifier.as_ref(), &unit).await }
    })
    .await;
    info!(
        job_id = %job_id,
        completed = summary.completed,
        missing = summary.missing(),
        "analysis stage finished"
    );

    ctx.jobs
        .update_status(&job_id, PipelineJobStatus::Reducing, None)?;

    let target = ReduceTarget {
        job_id: job_id.clone(),
        user_id: request.user_id.clone(),
        project_id: request.project_id.clone(),
    };
    match reduce_job(
        ctx.blobs.as_ref(),
        ctx.summarizer.as_ref(),
        ctx.reports.as_ref(),
        &target,
    )
    .await
    {
        Ok(report) => {
            ctx.jobs
                .update_status(&job_id, PipelineJobStatus::Done, None)?;
            info!(job_id = %job_id, overall_score = report.overall_score, "pipeline done");
            Ok(PipelineOutcome::Completed(report))
        }
        Err(err) => Err(fail_with_report(ctx, &target, err)),
    }
}

/// Fetch and unpack the archive, producing the unit path list.
async fn unpack_stage(
    ctx: &PipelineContext,
    request: &RunRequest,
    job_id: &str,
) -> PipelineResult<Vec<String>> {
    let archive = ctx.fetcher.fetch(&request.reference).await?;
    let paths = unpack_archive(
        ctx.blobs.as_ref(),
        &request.user_id,
        &request.project_id,
        &archive,
    )
    .await?;
    if paths.is_empty() {
        return Err(PipelineError::NothingToAnalyze {
            job_id: job_id.to_string(),
        });
    }
    Ok(paths)
}

/// Pre-dispatch failure: the job never started analyzing, so no report row is
/// written. The job record still captures why it failed.
fn reject(ctx: &PipelineContext, job_id: &str, err: PipelineError) -> PipelineError {
    error!(job_id = %job_id, error = %err, "pipeline rejected before analysis");
    if let Err(update_err) =
        ctx.jobs
            .update_status(job_id, PipelineJobStatus::Failed, Some(err.to_string()))
    {
        warn!(job_id = %job_id, error = %update_err, "failed to record job rejection");
    }
    err
}

/// Post-dispatch failure: units were analyzed, so the caller is owed a report
/// row even though aggregation failed.
fn fail_with_report(
    ctx: &PipelineContext,
    target: &ReduceTarget,
    err: PipelineError,
) -> PipelineError {
    error!(job_id = %target.job_id, error = %err, "reduce stage failed");
    let report = AggregateReport::failure(
        &target.job_id,
        &target.user_id,
        &target.project_id,
        err.to_string(),
    );
    if let Err(insert_err) = ctx.reports.insert_report(&report) {
        warn!(
            job_id = %target.job_id,
            error = %insert_err,
            "failure report could not be persisted"
        );
    }
    if let Err(update_err) = ctx.jobs.update_status(
        &target.job_id,
        PipelineJobStatus::Failed,
        Some(err.to_string()),
    ) {
        warn!(job_id = %target.job_id, error = %update_err, "failed to record job failure");
    }
    err
}
