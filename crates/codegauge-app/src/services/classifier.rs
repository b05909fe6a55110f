//! Gemini-backed implementations of the classifier and summarizer seams.
//!
//! The rest of the pipeline only sees the [`Classifier`] and [`Summarizer`]
//! traits from `context`; everything the remote service returns is untrusted
//! text that callers parse and validate themselves. Transport-level failures
//! are retried with exponential backoff; malformed payloads are not (they
//! become failure verdicts upstream).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};

use crate::services::context::{
    Classifier, GenericRateLimiter, PipelineError, PipelineResult, Summarizer,
};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// System role used for summary generation.
const SUMMARY_SYSTEM_ROLE: &str =
    "You are a principal engineer writing a short executive summary of a code quality audit.";

#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    limiter: Option<Arc<GenericRateLimiter>>,
    backoff: ExponentialBuilder,
}

impl GeminiClient {
    pub fn from_env(
        model: impl Into<String>,
        limiter: Option<Arc<GenericRateLimiter>>,
    ) -> Result<Self, PipelineError> {
        let api_key = std::env::var("GOOGLE_AI_API_KEY")
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .map_err(|_| PipelineError::MissingGeminiApiKey)?;
        let model = model.into();
        if model.trim().is_empty() {
            return Err(PipelineError::message("classifier model must not be empty"));
        }
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
            limiter,
            backoff: ExponentialBuilder::default(),
        })
    }

    async fn generate(
        &self,
        system_role: &str,
        prompt: &str,
        json_output: bool,
    ) -> PipelineResult<String> {
        let request = build_request(system_role, prompt, json_output);
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url, self.model
        );

        let call = || async {
            if let Some(limiter) = &self.limiter {
                limiter.until_ready().await;
            }
            let response = self
                .http
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(&request)
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(PipelineError::Api {
                    status: status.as_u16(),
                    message,
                });
            }
            let payload: GenerateContentResponse = response.json().await?;
            parse_response(payload)
        };

        call.retry(self.backoff.clone()).when(is_transient).await
    }
}

#[async_trait]
impl Classifier for GeminiClient {
    async fn classify(&self, system_role: &str, prompt: &str) -> PipelineResult<String> {
        self.generate(system_role, prompt, true).await
    }
}

#[async_trait]
impl Summarizer for GeminiClient {
    async fn summarize(&self, prompt: &str) -> PipelineResult<String> {
        self.generate(SUMMARY_SYSTEM_ROLE, prompt, false).await
    }
}

/// Retry transport failures and throttling/server statuses; anything else is
/// surfaced immediately.
fn is_transient(err: &PipelineError) -> bool {
    match err {
        PipelineError::Http(_) => true,
        PipelineError::Api { status, .. } => *status == 429 || *status >= 500,
        _ => false,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    system_instruction: ContentPayload,
    contents: Vec<ContentPayload>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<PartPayload>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PartPayload {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    candidate_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<ContentPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

fn build_request(system_role: &str, prompt: &str, json_output: bool) -> GenerateContentRequest {
    GenerateContentRequest {
        system_instruction: ContentPayload {
            role: None,
            parts: vec![PartPayload {
                text: Some(system_role.to_string()),
            }],
        },
        contents: vec![ContentPayload {
            role: Some("user".to_string()),
            parts: vec![PartPayload {
                text: Some(prompt.to_string()),
            }],
        }],
        generation_config: GenerationConfig {
            temperature: 0.0,
            candidate_count: 1,
            response_mime_type: json_output.then(|| "application/json".to_string()),
        },
    }
}

fn parse_response(payload: GenerateContentResponse) -> PipelineResult<String> {
    if let Some(feedback) = &payload.prompt_feedback {
        if feedback.block_reason.is_some() {
            return Err(PipelineError::message(
                "classifier rejected the prompt for safety reasons",
            ));
        }
    }
    let candidate = payload
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::message("classifier response missing candidates"))?;
    let mut buffer = String::new();
    if let Some(content) = candidate.content {
        for part in content.parts {
            if let Some(text) = part.text {
                buffer.push_str(&text);
            }
        }
    }
    if buffer.trim().is_empty() {
        return Err(PipelineError::message(
            "classifier response contained no text",
        ));
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_with_camel_case_fields() {
        let request = build_request("senior test engineer", "rate this file", true);
        let value = serde_json::to_value(&request).expect("serializes");

        assert_eq!(
            value["systemInstruction"]["parts"][0]["text"],
            "senior test engineer"
        );
        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(
            value["generationConfig"]["responseMimeType"],
            "application/json"
        );
        assert_eq!(value["generationConfig"]["temperature"], 0.0);
    }

    #[test]
    fn plain_text_request_omits_mime_type() {
        let request = build_request("role", "prompt", false);
        let value = serde_json::to_value(&request).expect("serializes");
        assert!(value["generationConfig"]
            .as_object()
            .expect("object")
            .get("responseMimeType")
            .is_none());
    }

    #[test]
    fn parse_response_concatenates_text_parts() {
        let payload: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates": [{"content": {"parts": [{"text": "{\"score\""}, {"text": ": 5}"}]}}]}"#,
        )
        .expect("deserializes");
        let text = parse_response(payload).expect("parses");
        assert_eq!(text, r#"{"score": 5}"#);
    }

    #[test]
    fn parse_response_rejects_blocked_prompt() {
        let payload: GenerateContentResponse = serde_json::from_str(
            r#"{"promptFeedback": {"blockReason": "SAFETY"}, "candidates": []}"#,
        )
        .expect("deserializes");
        assert!(parse_response(payload).is_err());
    }

    #[test]
    fn parse_response_rejects_empty_candidates() {
        let payload: GenerateContentResponse =
            serde_json::from_str(r#"{"candidates": []}"#).expect("deserializes");
        assert!(parse_response(payload).is_err());
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(is_transient(&PipelineError::Api {
            status: 503,
            message: String::new()
        }));
        assert!(is_transient(&PipelineError::Api {
            status: 429,
            message: String::new()
        }));
        assert!(!is_transient(&PipelineError::Api {
            status: 400,
            message: String::new()
        }));
        assert!(!is_transient(&PipelineError::message("bad payload")));
    }
}
