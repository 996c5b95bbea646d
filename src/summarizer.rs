//! Client for the external summarization service.
//!
//! The service turns a rendered transcript delta into a structured note
//! draft. It is treated as a fallible, rate-limited dependency: every
//! failure is classified as transient (retry with backoff), rate-limited
//! (honor the indicated delay), or permanent for this attempt (abandon the
//! call, keep the bytes). The daemon never crashes on a summarizer failure.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::models::NoteDraft;

/// Retry ceiling for one extraction attempt group.
pub const MAX_ATTEMPTS: u32 = 4;

const BASE_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 30_000;

const EXTRACT_PROMPT: &str = include_str!("prompts/extract.txt");
const ARCHIVE_PROMPT: &str = include_str!("prompts/archive.txt");

/// Typed failures of the summarization service.
#[derive(Debug, Error)]
pub enum SummarizeError {
    /// Network or service-side error; worth retrying with backoff.
    #[error("summarization service unavailable: {0}")]
    Transient(String),

    /// The service asked us to slow down.
    #[error("summarization service rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// This attempt cannot succeed (unusable response, rejected request).
    /// The captured bytes stay pending for a later cycle.
    #[error("summarization attempt failed: {0}")]
    Permanent(String),
}

impl SummarizeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited { .. })
    }
}

/// One extraction request: a rendered transcript plus context.
#[derive(Debug, Clone, Copy)]
pub struct ExtractRequest<'a> {
    pub project: &'a str,
    pub tool: &'a str,
    pub transcript: &'a str,
    /// The previous note's rendered entry, for continuity.
    pub prior_context: Option<&'a str>,
}

/// Seam between the scheduler and the summarization service.
#[async_trait]
pub trait Summarize: Send + Sync {
    /// Convert a transcript delta into a structured note draft.
    async fn extract(&self, request: ExtractRequest<'_>) -> Result<NoteDraft, SummarizeError>;

    /// Condense old session entries into (or extend) an archive summary.
    async fn summarize_archive(
        &self,
        sessions: &str,
        max_tokens: u32,
    ) -> Result<String, SummarizeError>;
}

/// Client for a Gemini-style `generateContent` endpoint.
pub struct GeminiClient {
    http: Client,
    api_base: String,
    api_key: String,
    model: String,
    /// Floor between calls, enforced by pacing rather than failing.
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl GeminiClient {
    pub fn new(api_base: String, api_key: String, model: String, min_interval: Duration) -> Self {
        Self {
            http: Client::new(),
            api_base,
            api_key,
            model,
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Wait out the call floor. Runs inside the owning project's task, so
    /// pacing here never stalls other projects' polling.
    async fn pace(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn generate(&self, prompt: &str) -> Result<String, SummarizeError> {
        self.pace().await;

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.api_base, self.model
        );
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
        });

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SummarizeError::Transient(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(SummarizeError::RateLimited { retry_after });
        }
        if status.is_server_error() {
            return Err(SummarizeError::Transient(format!("status {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SummarizeError::Permanent(format!("{status}: {body}")));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| SummarizeError::Permanent(format!("undecodable response: {e}")))?;

        json.get("candidates")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|c| c.pointer("/content/parts/0/text"))
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .ok_or_else(|| SummarizeError::Permanent("response carried no text".to_string()))
    }
}

#[async_trait]
impl Summarize for GeminiClient {
    async fn extract(&self, request: ExtractRequest<'_>) -> Result<NoteDraft, SummarizeError> {
        let prompt = EXTRACT_PROMPT
            .replace("{project}", request.project)
            .replace("{tool}", request.tool)
            .replace("{previous_context}", request.prior_context.unwrap_or("None"))
            .replace("{log_content}", request.transcript);

        let text = self.generate(&prompt).await?;
        Ok(parse_draft(&text))
    }

    async fn summarize_archive(
        &self,
        sessions: &str,
        max_tokens: u32,
    ) -> Result<String, SummarizeError> {
        let prompt = ARCHIVE_PROMPT
            .replace("{max_tokens}", &max_tokens.to_string())
            .replace("{sessions}", sessions);

        let text = self.generate(&prompt).await?;
        Ok(text.trim().to_string())
    }
}

/// Call `extract` with bounded retries and exponential backoff.
///
/// Transient and rate-limited failures retry (honoring an indicated delay);
/// a permanent failure abandons the attempt group immediately. Either way
/// the caller keeps its captured bytes.
pub async fn extract_with_retry(
    summarizer: &dyn Summarize,
    request: ExtractRequest<'_>,
    max_attempts: u32,
) -> Result<NoteDraft, SummarizeError> {
    let attempt_group = Uuid::new_v4();

    for attempt in 1..=max_attempts {
        match summarizer.extract(request).await {
            Ok(draft) => return Ok(draft),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = match &e {
                    SummarizeError::RateLimited {
                        retry_after: Some(delay),
                    } => *delay,
                    _ => backoff_for_attempt(attempt),
                };
                tracing::warn!(
                    attempt_group = %attempt_group,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Extraction attempt failed, retrying: {}",
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                tracing::warn!(
                    attempt_group = %attempt_group,
                    attempt,
                    "Extraction abandoned: {}",
                    e
                );
                return Err(e);
            }
        }
    }

    unreachable!("retry loop always returns")
}

fn backoff_for_attempt(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(6);
    let ms = (BASE_BACKOFF_MS << exp).min(MAX_BACKOFF_MS);
    Duration::from_millis(ms)
}

/// Parse the service's labeled-field response into a draft.
///
/// The format is a fixed set of `HEADER:` sections, list sections carrying
/// `- ` bullets. Unknown sections are ignored; placeholder values like
/// "None" or "Not stated" read as absent.
pub fn parse_draft(text: &str) -> NoteDraft {
    #[derive(PartialEq)]
    enum Section {
        None,
        Goal,
        Happened,
        LeftOff,
        Threads,
        Artifacts,
    }

    let mut draft = NoteDraft::default();
    let mut section = Section::None;

    for line in text.lines() {
        let trimmed = line.trim();

        if let Some(rest) = trimmed.strip_prefix("STATED_GOAL:") {
            draft.stated_goal = clean_value(rest);
            section = Section::Goal;
        } else if trimmed.starts_with("WHAT_HAPPENED:") {
            section = Section::Happened;
        } else if let Some(rest) = trimmed.strip_prefix("LEFT_OFF_AT:") {
            draft.left_off_at = clean_value(rest);
            section = Section::LeftOff;
        } else if trimmed.starts_with("LOOSE_THREADS:") {
            section = Section::Threads;
        } else if trimmed.starts_with("KEY_ARTIFACTS:") {
            section = Section::Artifacts;
        } else if let Some(item) = trimmed.strip_prefix("- ") {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            match section {
                Section::Happened => draft.what_happened.push(item.to_string()),
                Section::Threads => draft.loose_threads.push(item.to_string()),
                Section::Artifacts => draft.key_artifacts.push(item.to_string()),
                _ => {}
            }
        } else if !trimmed.is_empty() {
            // Continuation of a single-value section.
            match section {
                Section::Goal => extend_value(&mut draft.stated_goal, trimmed),
                Section::LeftOff => extend_value(&mut draft.left_off_at, trimmed),
                _ => {}
            }
        }
    }

    draft
}

fn clean_value(raw: &str) -> Option<String> {
    let value = raw.trim();
    let placeholder = matches!(
        value.to_ascii_lowercase().as_str(),
        "" | "none" | "not stated" | "not specified" | "n/a"
    );
    if placeholder {
        None
    } else {
        Some(value.to_string())
    }
}

fn extend_value(slot: &mut Option<String>, more: &str) {
    match slot {
        Some(value) => {
            value.push(' ');
            value.push_str(more);
        }
        None => *slot = clean_value(more),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_response() {
        let text = "\
STATED_GOAL: Fix the flaky login test
WHAT_HAPPENED:
- Reproduced the failure locally
- Pinned the race to session teardown
LEFT_OFF_AT: Writing a regression test
LOOSE_THREADS:
- Audit the other teardown paths
KEY_ARTIFACTS:
- tests/login_spec.rs
- src/session.rs
";
        let draft = parse_draft(text);
        assert_eq!(draft.stated_goal.as_deref(), Some("Fix the flaky login test"));
        assert_eq!(draft.what_happened.len(), 2);
        assert_eq!(draft.left_off_at.as_deref(), Some("Writing a regression test"));
        assert_eq!(draft.loose_threads, vec!["Audit the other teardown paths"]);
        assert_eq!(
            draft.key_artifacts,
            vec!["tests/login_spec.rs", "src/session.rs"]
        );
    }

    #[test]
    fn placeholders_read_as_absent() {
        let text = "STATED_GOAL: Not stated\nLEFT_OFF_AT: None\nWHAT_HAPPENED:\n- something\n";
        let draft = parse_draft(text);
        assert!(draft.stated_goal.is_none());
        assert!(draft.left_off_at.is_none());
        assert_eq!(draft.what_happened, vec!["something"]);
    }

    #[test]
    fn multi_line_goal_joins_continuations() {
        let text = "STATED_GOAL: Ship the importer\nand clean up afterwards\n\nWHAT_HAPPENED:\n- work\n";
        let draft = parse_draft(text);
        assert_eq!(
            draft.stated_goal.as_deref(),
            Some("Ship the importer and clean up afterwards")
        );
    }

    #[test]
    fn garbage_parses_to_empty_draft() {
        let draft = parse_draft("complete nonsense with no headers");
        assert!(draft.is_empty());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_for_attempt(1), Duration::from_millis(500));
        assert_eq!(backoff_for_attempt(2), Duration::from_millis(1000));
        assert_eq!(backoff_for_attempt(3), Duration::from_millis(2000));
        assert_eq!(backoff_for_attempt(20), Duration::from_millis(30_000));
    }
}
