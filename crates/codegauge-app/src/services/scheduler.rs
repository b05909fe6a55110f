//! Fan-out scheduling with bounded concurrency and layered timeouts.
//!
//! Units run through a caller-supplied async worker, at most
//! `max_concurrent_units` in flight. Each invocation races a per-unit
//! timeout; the whole batch races the batch deadline. Hitting the deadline
//! abandons whatever is still in flight. The summary counters are written by
//! the unit futures themselves, so work finished before the deadline is
//! counted even when the batch is cut short.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::{stream, StreamExt};
use tracing::{info, warn};

use crate::services::analyzer::UnitRef;
use crate::services::context::RuntimeLimits;

/// Outcome counts for one dispatched batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    pub dispatched: usize,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// True when the batch deadline expired with work still in flight.
    pub deadline_hit: bool,
}

impl DispatchSummary {
    /// Units that never produced a stored result.
    pub fn missing(&self) -> usize {
        self.dispatched - self.completed
    }
}

/// Run `work` once per unit under the configured ceilings.
///
/// Individual failures and timeouts never abort the batch; they only show up
/// in the summary. Duplicate paths are harmless because workers overwrite
/// keyed results.
pub async fn dispatch_units<F, Fut>(
    units: Vec<UnitRef>,
    limits: &RuntimeLimits,
    work: F,
) -> DispatchSummary
where
    F: Fn(UnitRef) -> Fut,
    Fut: Future<Output = crate::services::context::PipelineResult<()>>,
{
    let dispatched = units.len();
    let completed = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let timed_out = AtomicUsize::new(0);

    let work = &work;
    let completed_ref = &completed;
    let failed_ref = &failed;
    let timed_out_ref = &timed_out;

    let batch = stream::iter(units)
        .map(|unit| async move {
            let path = unit.path.clone();
            match tokio::time::timeout(limits.unit_timeout, work(unit)).await {
                Ok(Ok(())) => {
                    completed_ref.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err(err)) => {
                    warn!(path = %path, error = %err, "unit analysis failed");
                    failed_ref.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    warn!(path = %path, "unit analysis timed out");
                    timed_out_ref.fetch_add(1, Ordering::Relaxed);
                }
            }
        })
        // A ceiling of 0 would never start any unit; treat it as 1.
        .buffer_unordered(limits.max_concurrent_units.max(1))
        .collect::<()>();

    let deadline_hit = tokio::time::timeout(limits.batch_deadline, batch)
        .await
        .is_err();

    let summary = DispatchSummary {
        dispatched,
        completed: completed.load(Ordering::Relaxed),
        failed: failed.load(Ordering::Relaxed),
        timed_out: timed_out.load(Ordering::Relaxed),
        deadline_hit,
    };

    if deadline_hit {
        warn!(
            dispatched = summary.dispatched,
            completed = summary.completed,
            "batch deadline expired, proceeding with partial results"
        );
    } else {
        info!(
            dispatched = summary.dispatched,
            completed = summary.completed,
            failed = summary.failed,
            timed_out = summary.timed_out,
            "batch dispatch finished"
        );
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::context::PipelineError;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    fn units(n: usize) -> Vec<UnitRef> {
        (0..n)
            .map(|i| UnitRef {
                job_id: "job-1".to_string(),
                user_id: "u1".to_string(),
                project_id: "p1".to_string(),
                path: format!("src/file_{i:03}.rs"),
            })
            .collect()
    }

    fn limits(max: usize, unit_ms: u64, batch_ms: u64) -> RuntimeLimits {
        RuntimeLimits {
            max_concurrent_units: max,
            unit_timeout: Duration::from_millis(unit_ms),
            batch_deadline: Duration::from_millis(batch_ms),
        }
    }

    #[tokio::test]
    async fn all_units_complete() {
        let summary = dispatch_units(units(10), &limits(4, 1_000, 10_000), |_unit| async {
            Ok(())
        })
        .await;

        assert_eq!(summary.dispatched, 10);
        assert_eq!(summary.completed, 10);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.timed_out, 0);
        assert!(!summary.deadline_hit);
        assert_eq!(summary.missing(), 0);
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_the_ceiling() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let summary = dispatch_units(units(20), &limits(3, 1_000, 10_000), |_unit| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert_eq!(summary.completed, 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn failures_are_counted_not_fatal() {
        let summary = dispatch_units(units(4), &limits(4, 1_000, 10_000), |unit| async move {
            if unit.path.ends_with("000.rs") || unit.path.ends_with("001.rs") {
                Err(PipelineError::message("store offline"))
            } else {
                Ok(())
            }
        })
        .await;

        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.missing(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_units_hit_the_unit_timeout() {
        let summary = dispatch_units(units(3), &limits(3, 50, 60_000), |unit| async move {
            if unit.path.ends_with("000.rs") {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
            }
            Ok(())
        })
        .await;

        assert_eq!(summary.completed, 2);
        assert_eq!(summary.timed_out, 1);
        assert!(!summary.deadline_hit);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_deadline_abandons_stragglers_but_keeps_finished_work() {
        // Unit timeout is generous; the batch deadline is the binding limit.
        let summary = dispatch_units(units(5), &limits(5, 60_000, 100), |unit| async move {
            if unit.path.ends_with("003.rs") || unit.path.ends_with("004.rs") {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
            }
            Ok(())
        })
        .await;

        assert!(summary.deadline_hit);
        assert_eq!(summary.completed, 3);
        assert_eq!(summary.missing(), 2);
    }

    #[tokio::test]
    async fn zero_ceiling_still_makes_progress() {
        let summary = dispatch_units(units(3), &limits(0, 1_000, 10_000), |_unit| async {
            Ok(())
        })
        .await;
        assert_eq!(summary.completed, 3);
        assert!(!summary.deadline_hit);
    }

    #[tokio::test]
    async fn empty_batch_is_a_clean_noop() {
        let summary = dispatch_units(Vec::new(), &limits(4, 1_000, 10_000), |_unit| async {
            Ok(())
        })
        .await;
        assert_eq!(summary.dispatched, 0);
        assert_eq!(summary.completed, 0);
        assert!(!summary.deadline_hit);
    }
}
