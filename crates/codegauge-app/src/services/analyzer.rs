//! Per-unit analysis: load content, consult the classifier, persist a verdict.
//!
//! Every unit that can be loaded produces exactly one stored verdict, even
//! when the classifier fails or returns garbage; the canonical failure verdict
//! keeps such units visible in the aggregate instead of silently vanishing.
//! Only a failure to load the unit or to persist the verdict surfaces as an
//! error, in which case no result is written and the reducer sees one fewer
//! result than was dispatched.

use tracing::{debug, warn};

use crate::constants::{MAX_UNIT_CONTENT_CHARS, TRUNCATION_MARKER};
use crate::pipeline::verdict::Verdict;
use crate::services::blob_store::BlobStore;
use crate::services::context::{Classifier, PipelineResult};
use crate::services::unpacker::unit_key;

const CLASSIFIER_SYSTEM_ROLE: &str =
    "You are a senior test engineer reviewing source files for quality and testability. \
     Respond with a single JSON object and nothing else.";

/// Identity of one unit within a job.
#[derive(Debug, Clone)]
pub struct UnitRef {
    pub job_id: String,
    pub user_id: String,
    pub project_id: String,
    /// Repository-relative file path; doubles as the unit's result key suffix.
    pub path: String,
}

/// Key under which a unit's verdict is stored.
pub fn result_key(job_id: &str, path: &str) -> String {
    format!("results/{job_id}/{path}")
}

/// Analyze one unit end to end.
///
/// Re-running for the same `(job_id, path)` overwrites the previous verdict,
/// so duplicate dispatch converges on the latest result.
pub async fn analyze_unit(
    store: &dyn BlobStore,
    classifier: &dyn Classifier,
    unit: &UnitRef,
) -> PipelineResult<()> {
    let key = unit_key(&unit.user_id, &unit.project_id, &unit.path);
    let raw = store.get(&key).await?;
    let content = truncate_content(&String::from_utf8_lossy(&raw));

    let verdict = match classifier
        .classify(CLASSIFIER_SYSTEM_ROLE, &build_prompt(&unit.path, &content))
        .await
    {
        Ok(text) => match Verdict::from_classifier_text(&unit.path, &text) {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(path = %unit.path, error = %err, "classifier output rejected");
                Verdict::failure(&unit.path, err.to_string())
            }
        },
        Err(err) => {
            warn!(path = %unit.path, error = %err, "classifier call failed");
            Verdict::failure(&unit.path, err.to_string())
        }
    };

    let payload = serde_json::to_vec(&verdict)?;
    store
        .put(&result_key(&unit.job_id, &unit.path), payload.into())
        .await?;
    debug!(path = %unit.path, score = verdict.score, "verdict stored");
    Ok(())
}

/// Cap oversized units so prompts stay within the classifier's context
/// window. The cut lands on a char boundary and is marked in the text.
fn truncate_content(content: &str) -> String {
    if content.chars().count() <= MAX_UNIT_CONTENT_CHARS {
        return content.to_string();
    }
    let mut truncated: String = content.chars().take(MAX_UNIT_CONTENT_CHARS).collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

fn build_prompt(path: &str, content: &str) -> String {
    format!(
        "Analyze the following source file for code quality and testability.\n\
         \n\
         Scoring anchors:\n\
         - 10: fully covered by tests, cleanly structured, dependencies mockable\n\
         - 5: some logic present but untested, structure workable\n\
         - 0: untestable as written, or contains hardcoded secrets\n\
         \n\
         Respond with a JSON object matching this schema:\n\
         {schema}\n\
         \n\
         File: {path}\n\
         ```\n\
         {content}\n\
         ```",
        schema = Verdict::schema(),
    )
}
