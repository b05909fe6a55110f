//! Pure pipeline transformations that operate on unit and verdict data.
//!
//! Modules under this namespace must remain free of IO and external side
//! effects so they can be reused across batch orchestrators and test
//! harnesses.

pub mod policy;
pub mod stats;
pub mod verdict;

pub use policy::should_include;
pub use stats::{compute_stats, fallback_summary, JobStats};
pub use verdict::{TestType, Verdict, VerdictParseError, VerdictValidationError, MAX_SCORE};
