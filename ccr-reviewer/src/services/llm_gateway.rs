//! LLM Gateway
//!
//! Builds prompts from templates, calls the `LlmClient` and parses the reply
//! against a strict schema. A reply that does not parse is re-asked up to
//! `malformed_retries` times and then surfaced as
//! `LlmError::MalformedResponse`. `LlmError::Unavailable` propagates at once;
//! retrying transport failures is the caller's decision.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::Arc;

use super::llm_client::{LlmClient, LlmError};
use super::prompts;
use crate::models::Standard;

/// What a classification request is about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationSubject {
    /// A single standard's text
    Standard,
    /// A whole flattened codebase
    Codebase,
}

/// Classification reply: names from the vocabulary, empty means universal
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ClassificationResult {
    pub classifications: Vec<String>,
}

/// Verdict for one standard
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct StandardVerdict {
    /// Reference assigned in the prompt (`S1`, `S2`, ...)
    pub standard_ref: String,
    #[serde(default)]
    pub title: String,
    pub compliant: bool,
    #[serde(default)]
    pub relevant_sections: Vec<String>,
    #[serde(default)]
    pub recommendations: Option<String>,
}

/// Compliance reply for one standard set
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ComplianceResult {
    pub standards: Vec<StandardVerdict>,
    pub summary: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// Inputs for one compliance check
pub struct ComplianceRequest<'a> {
    pub custom_prompt: Option<&'a str>,
    pub standards: &'a [Standard],
    pub codebase: &'a str,
}

/// Prompt reference for the standard at `index` in a compliance request
pub fn standard_ref(index: usize) -> String {
    format!("S{}", index + 1)
}

pub struct LlmGateway {
    client: Arc<dyn LlmClient>,
    malformed_retries: u32,
}

impl LlmGateway {
    pub fn new(client: Arc<dyn LlmClient>, malformed_retries: u32) -> Self {
        Self {
            client,
            malformed_retries,
        }
    }

    /// Ask which vocabulary entries apply to `content`
    ///
    /// Returns the model's names as given; matching against the vocabulary is
    /// the Classification Matcher's job.
    pub async fn classify(
        &self,
        subject: ClassificationSubject,
        content: &str,
        vocabulary: &[String],
    ) -> Result<ClassificationResult, LlmError> {
        let (system, template) = match subject {
            ClassificationSubject::Standard => (
                prompts::STANDARD_CLASSIFICATION_SYSTEM,
                prompts::STANDARD_CLASSIFICATION_TEMPLATE,
            ),
            ClassificationSubject::Codebase => (
                prompts::CODEBASE_CLASSIFICATION_SYSTEM,
                prompts::CODEBASE_CLASSIFICATION_TEMPLATE,
            ),
        };

        let names = vocabulary.join(", ");
        let user = prompts::render(template, &[("classifications", &names), ("content", content)]);

        self.complete(system, &user, |_: &ClassificationResult| Ok(()))
            .await
    }

    /// Evaluate a codebase against a list of standards
    ///
    /// The reply must cover every standard exactly once; verdicts come back in
    /// the same order as `request.standards`.
    pub async fn check_compliance(
        &self,
        request: &ComplianceRequest<'_>,
    ) -> Result<ComplianceResult, LlmError> {
        let standards_block = format_standards(request.standards);
        let custom = request
            .custom_prompt
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| format!("{}{}\n\n", prompts::CUSTOM_PROMPT_PREFIX, p))
            .unwrap_or_default();

        let user = prompts::render(
            prompts::COMPLIANCE_TEMPLATE,
            &[
                ("custom_prompt", &custom),
                ("standards", &standards_block),
                ("codebase", request.codebase),
            ],
        );

        let expected: Vec<String> = (0..request.standards.len()).map(standard_ref).collect();

        let mut result = self
            .complete(prompts::COMPLIANCE_SYSTEM, &user, |r: &ComplianceResult| {
                validate_coverage(r, &expected)
            })
            .await?;

        result
            .standards
            .sort_by_key(|v| expected.iter().position(|e| *e == v.standard_ref));
        Ok(result)
    }

    /// Send a prompt and parse the reply into `T`, re-asking on malformed output
    pub async fn complete<T, V>(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        validate: V,
    ) -> Result<T, LlmError>
    where
        T: DeserializeOwned,
        V: Fn(&T) -> Result<(), String>,
    {
        let mut prompt: Cow<'_, str> = Cow::Borrowed(user_prompt);
        let mut retries_used = 0u32;

        loop {
            let raw = self.client.complete(system_prompt, &prompt).await?;

            let outcome = parse_json::<T>(&raw).and_then(|value| validate(&value).map(|_| value));
            match outcome {
                Ok(value) => return Ok(value),
                Err(reason) if retries_used < self.malformed_retries => {
                    retries_used += 1;
                    tracing::warn!(
                        attempt = retries_used,
                        max_retries = self.malformed_retries,
                        %reason,
                        "LLM reply failed validation, asking again"
                    );
                    let suffix = prompts::render(prompts::MALFORMED_RETRY_SUFFIX, &[("reason", &reason)]);
                    prompt = Cow::Owned(format!("{}{}", user_prompt, suffix));
                }
                Err(reason) => {
                    tracing::error!(%reason, raw_chars = raw.len(), "LLM reply malformed");
                    return Err(LlmError::MalformedResponse { reason, raw });
                }
            }
        }
    }
}

fn format_standards(standards: &[Standard]) -> String {
    standards
        .iter()
        .enumerate()
        .map(|(i, s)| format!("### {} ({})\n{}\n", standard_ref(i), s.repository_path, s.text.trim_end()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn validate_coverage(result: &ComplianceResult, expected: &[String]) -> Result<(), String> {
    let mut seen = HashSet::new();
    for verdict in &result.standards {
        if !expected.contains(&verdict.standard_ref) {
            return Err(format!("unknown standard_ref '{}'", verdict.standard_ref));
        }
        if !seen.insert(verdict.standard_ref.as_str()) {
            return Err(format!("standard_ref '{}' appears twice", verdict.standard_ref));
        }
    }

    let missing: Vec<&str> = expected
        .iter()
        .filter(|e| !seen.contains(e.as_str()))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(format!("no verdict for {}", missing.join(", ")));
    }

    Ok(())
}

/// Parse the JSON object in a model reply
///
/// Tolerates a surrounding Markdown code fence or leading prose; the object
/// itself must match `T` exactly.
pub fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    let payload = extract_json_object(raw).ok_or_else(|| "reply contains no JSON object".to_string())?;
    serde_json::from_str(payload).map_err(|e| format!("reply does not match schema: {}", e))
}

fn extract_json_object(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&trimmed[start..=end])
}
