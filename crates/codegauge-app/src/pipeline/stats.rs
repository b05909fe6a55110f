//! Aggregate statistics computed during reduction.
//!
//! Pure arithmetic over parsed verdicts; no IO. The reducer feeds these values
//! into the persisted report and, when the summarizer is unavailable, into the
//! deterministic fallback summary.

use crate::pipeline::verdict::Verdict;

/// Aggregate statistics over all verdicts successfully read for a job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobStats {
    /// Number of verdicts the statistics were computed from. May be less than
    /// the number of units dispatched when individual results never
    /// materialized.
    pub total_files: usize,
    /// Count of units whose verdict carries `has_tests == true`.
    pub files_with_tests: usize,
    /// Arithmetic mean of per-unit scores on the 0-10 scale, rounded to one
    /// decimal place.
    pub avg_score: f64,
    /// Mean score mapped to the 0-100 scale: `round(avg_score * 10)`.
    pub overall_score: u8,
}

/// Compute aggregate statistics from the verdicts read during reduction.
pub fn compute_stats(verdicts: &[Verdict]) -> JobStats {
    if verdicts.is_empty() {
        return JobStats {
            total_files: 0,
            files_with_tests: 0,
            avg_score: 0.0,
            overall_score: 0,
        };
    }

    let total_files = verdicts.len();
    let files_with_tests = verdicts.iter().filter(|v| v.has_tests).count();
    let sum: f64 = verdicts.iter().map(|v| v.score).sum();
    let avg_score = round_one_decimal(sum / total_files as f64);
    let overall_score = (avg_score * 10.0).round().clamp(0.0, 100.0) as u8;

    JobStats {
        total_files,
        files_with_tests,
        avg_score,
        overall_score,
    }
}

/// Deterministic 2-4 line summary derived solely from local statistics, used
/// when the summarizer is unreachable or returns unusable output.
pub fn fallback_summary(stats: &JobStats) -> String {
    let quality = if stats.avg_score >= 8.0 {
        "strong"
    } else if stats.avg_score >= 6.0 {
        "moderate"
    } else {
        "needs improvement"
    };

    format!(
        "Analyzed {} files with an average testability score of {:.1}/10.\n\
         {} of {} files have test coverage.\n\
         Overall code quality is rated: {quality}.",
        stats.total_files, stats.avg_score, stats.files_with_tests, stats.total_files
    )
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::verdict::TestType;

    fn verdict(score: f64, has_tests: bool) -> Verdict {
        Verdict {
            file_path: format!("src/f{score}.rs"),
            score,
            has_tests,
            test_type: if has_tests {
                TestType::Unit
            } else {
                TestType::None
            },
            observations: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    #[test]
    fn computes_scenario_means() {
        // Scores 10, 5, 0 with tests on the first only.
        let verdicts = vec![verdict(10.0, true), verdict(5.0, false), verdict(0.0, false)];
        let stats = compute_stats(&verdicts);
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.files_with_tests, 1);
        assert_eq!(stats.avg_score, 5.0);
        assert_eq!(stats.overall_score, 50);
    }

    #[test]
    fn all_failures_score_zero() {
        let verdicts = vec![
            Verdict::failure("a.rs", "boom"),
            Verdict::failure("b.rs", "boom"),
            Verdict::failure("c.rs", "boom"),
        ];
        let stats = compute_stats(&verdicts);
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.files_with_tests, 0);
        assert_eq!(stats.avg_score, 0.0);
        assert_eq!(stats.overall_score, 0);
    }

    #[test]
    fn mean_rounds_to_one_decimal() {
        let verdicts = vec![verdict(7.0, true), verdict(8.0, true), verdict(8.0, true)];
        let stats = compute_stats(&verdicts);
        // 23 / 3 = 7.666... -> 7.7 -> overall 77
        assert_eq!(stats.avg_score, 7.7);
        assert_eq!(stats.overall_score, 77);
    }

    #[test]
    fn empty_input_yields_zeroes() {
        let stats = compute_stats(&[]);
        assert_eq!(stats.total_files, 0);
        assert_eq!(stats.overall_score, 0);
    }

    #[test]
    fn fallback_summary_thresholds() {
        let strong = compute_stats(&[verdict(9.0, true), verdict(8.0, true)]);
        assert!(fallback_summary(&strong).contains("strong"));

        let moderate = compute_stats(&[verdict(6.0, false), verdict(7.0, true)]);
        assert!(fallback_summary(&moderate).contains("moderate"));

        let weak = compute_stats(&[verdict(2.0, false)]);
        assert!(fallback_summary(&weak).contains("needs improvement"));
    }

    #[test]
    fn fallback_summary_reports_local_counts() {
        let stats = compute_stats(&[verdict(10.0, true), verdict(5.0, false), verdict(0.0, false)]);
        let summary = fallback_summary(&stats);
        assert!(summary.contains("3 files"));
        assert!(summary.contains("5.0/10"));
        assert!(summary.contains("1 of 3"));
        let lines = summary.lines().count();
        assert!((2..=4).contains(&lines), "expected 2-4 lines, got {lines}");
    }
}
