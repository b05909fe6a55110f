//! Structured verdict returned by the classifier for a single unit.
//!
//! These types model the contract we expect from the classification stage.
//! They stay pure, provide JSON schema generation for prompting, and expose
//! validation so downstream code can refuse malformed payloads before writing
//! to durable result storage. Anything the classifier returns is untrusted
//! text until it survives [`Verdict::from_classifier_text`].

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use strum::AsRefStr;
use thiserror::Error;

/// Upper bound (inclusive) for per-unit scores.
pub const MAX_SCORE: f64 = 10.0;

/// Kind of test coverage the classifier observed for a unit.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TestType {
    Unit,
    Integration,
    E2e,
    #[default]
    None,
}

/// Canonical classification result for one unit.
///
/// `file_path` is assigned by the analyzer, never trusted from classifier
/// output. Immutable once written; re-analysis overwrites the same result key.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Verdict {
    #[serde(default)]
    pub file_path: String,
    pub score: f64,
    pub has_tests: bool,
    #[serde(default)]
    pub test_type: TestType,
    #[serde(default)]
    pub observations: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl Verdict {
    /// Canonical placeholder written when analysis of a unit fails for any
    /// reason. Still a completed, reduceable record.
    pub fn failure(file_path: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            score: 0.0,
            has_tests: false,
            test_type: TestType::None,
            observations: vec![format!("analysis failed: {}", cause.into())],
            suggestions: Vec::new(),
        }
    }

    /// Whether this verdict is the canonical failure placeholder.
    pub fn is_failure(&self) -> bool {
        self.score == 0.0
            && !self.has_tests
            && self.test_type == TestType::None
            && self
                .observations
                .first()
                .is_some_and(|obs| obs.starts_with("analysis failed:"))
    }

    /// Generate a JSON schema describing the payload expected from the
    /// classifier.
    pub fn schema() -> JsonValue {
        let schema = schemars::schema_for!(Verdict);
        serde_json::to_value(&schema).expect("schema is serializable")
    }

    /// Validate semantic constraints beyond plain JSON typing.
    pub fn validate(&self) -> Result<(), VerdictValidationError> {
        let mut issues = Vec::new();

        if !self.score.is_finite() {
            issues.push(format!("score must be a finite number, got {}", self.score));
        } else if !(0.0..=MAX_SCORE).contains(&self.score) {
            issues.push(format!(
                "score must lie in [0, {MAX_SCORE}], got {}",
                self.score
            ));
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(VerdictValidationError { issues })
        }
    }

    /// Parse untrusted classifier output into a validated verdict for
    /// `file_path`.
    ///
    /// Tolerates a Markdown code fence around the JSON body; any parse or
    /// validation failure is surfaced so the caller can substitute
    /// [`Verdict::failure`].
    pub fn from_classifier_text(
        file_path: &str,
        text: &str,
    ) -> Result<Self, VerdictParseError> {
        let body = strip_code_fence(text);
        if body.is_empty() {
            return Err(VerdictParseError::Empty);
        }
        let mut verdict: Verdict = serde_json::from_str(body)?;
        verdict.validate()?;
        verdict.file_path = file_path.to_string();
        Ok(verdict)
    }
}

/// Validation failures aggregated into a single error.
#[derive(Debug, Error)]
#[error("verdict validation failed: {issues:?}")]
pub struct VerdictValidationError {
    pub issues: Vec<String>,
}

/// Failure to obtain a valid verdict from classifier output.
#[derive(Debug, Error)]
pub enum VerdictParseError {
    #[error("classifier returned no output")]
    Empty,
    #[error("classifier output is not valid verdict JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Validation(#[from] VerdictValidationError),
}

/// Strip a surrounding Markdown code fence, if present, and trim whitespace.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}
