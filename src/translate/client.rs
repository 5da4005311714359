//! OpenAI-compatible chat-completion client.
//! One request per segment: connection pooling via reqwest, per-call
//! timeout, cooperative cancellation, typed error classification.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::normalize::FenceNormalizer;
use super::prompt::TranslationPrompt;
use super::{ErrorKind, ProviderReply, SegmentRequest, TranslateError, Translator};
use crate::config::TranslationConfig;

const TEMPERATURE: f32 = 0.1;
const TOP_P: f32 = 1.0;
/// Error bodies are truncated before classification and logging.
const MAX_ERROR_BODY_CHARS: usize = 200;

/// HTTP client for `{base}/chat/completions` endpoints.
pub struct OpenAiClient {
    http: reqwest::Client,
    fence: FenceNormalizer,
}

impl OpenAiClient {
    pub fn new() -> Result<Self, TranslateError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| TranslateError::provider(ErrorKind::Unknown, e.to_string()))?;

        Ok(Self {
            http,
            fence: FenceNormalizer::new(),
        })
    }
}

#[async_trait]
impl Translator for OpenAiClient {
    async fn translate(
        &self,
        request: &SegmentRequest,
        config: &TranslationConfig,
        prompt: &TranslationPrompt,
        cancel: &CancellationToken,
    ) -> Result<ProviderReply, TranslateError> {
        if cancel.is_cancelled() {
            return Err(TranslateError::Cancelled);
        }

        let (system, user) = build_messages(request, config, prompt);
        let body = ChatRequest {
            model: &config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: TEMPERATURE,
            top_p: TOP_P,
            response_format: ResponseFormat { kind: "text" },
        };

        let url = format!("{}/chat/completions", config.api_base_url);
        let started = Instant::now();

        let send = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", config.api_key))
            .header("api-key", &config.api_key)
            .timeout(config.timeout())
            .json(&body)
            .send();

        let response = tokio::select! {
            result = send => result,
            _ = cancel.cancelled() => return Err(TranslateError::Cancelled),
        };

        let response = match response {
            Ok(response) => response,
            Err(e) => return Err(classify_transport(&e)),
        };

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(MAX_ERROR_BODY_CHARS)
                .collect::<String>();
            return Err(classify_status(status.as_u16(), &detail));
        }

        let parsed = tokio::select! {
            result = response.json::<ChatResponse>() => result,
            _ = cancel.cancelled() => return Err(TranslateError::Cancelled),
        };
        let parsed = parsed.map_err(|e| {
            TranslateError::provider(ErrorKind::InvalidResponse, format!("malformed completion: {e}"))
        })?;
        let content = completion_text(parsed)?;

        let source_was_fence = self.fence.is_single_fence(&request.text);
        let markdown = self.fence.unwrap_reply(&content, source_was_fence);

        let latency_ms = started.elapsed().as_millis() as u64;
        debug!(
            model = %config.model,
            document = %request.document_label,
            latency_ms,
            chars_in = request.text.len(),
            chars_out = markdown.len(),
            "segment translated"
        );

        Ok(ProviderReply {
            markdown,
            provider_id: config.model.clone(),
            latency_ms,
        })
    }
}

/// Interpolate the prompt and wrap the segment in the two-message shape:
/// instructions as the system message, the literal segment text behind a
/// one-line "translated Markdown only" instruction as the user message.
fn build_messages(
    request: &SegmentRequest,
    config: &TranslationConfig,
    prompt: &TranslationPrompt,
) -> (String, String) {
    let system = prompt
        .instructions
        .replace("{{targetLanguage}}", &config.target_language)
        .replace("{{fileName}}", &request.file_name);
    let user = format!(
        "Translate this Markdown segment and return the translated Markdown only.\n\n{}",
        request.text
    );
    (system, user)
}

/// Map an HTTP status to the error taxonomy.
fn classify_status(status: u16, detail: &str) -> TranslateError {
    let kind = match status {
        401 | 403 => ErrorKind::Authentication,
        408 => ErrorKind::Timeout,
        429 => ErrorKind::RateLimit,
        500..=599 => ErrorKind::Server,
        _ => ErrorKind::Unknown,
    };
    let message = if detail.is_empty() {
        format!("provider returned status {status}")
    } else {
        format!("provider returned status {status}: {detail}")
    };
    TranslateError::provider(kind, message)
}

/// Classify transport-level failures. reqwest predicates first, then the
/// message text when no status is available.
fn classify_transport(error: &reqwest::Error) -> TranslateError {
    let kind = if error.is_timeout() {
        ErrorKind::Timeout
    } else if error.is_connect() {
        ErrorKind::Network
    } else {
        classify_transport_message(&error.to_string())
    };
    TranslateError::provider(kind, error.to_string())
}

fn classify_transport_message(message: &str) -> ErrorKind {
    let message = message.to_ascii_lowercase();
    if message.contains("timed out") || message.contains("timeout") {
        ErrorKind::Timeout
    } else if message.contains("dns")
        || message.contains("connect")
        || message.contains("connection")
        || message.contains("network")
    {
        ErrorKind::Network
    } else {
        ErrorKind::Unknown
    }
}

/// Pull the completion text out of a parsed response; an empty completion
/// is a provider bug, not something worth retrying.
fn completion_text(response: ChatResponse) -> Result<String, TranslateError> {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .unwrap_or_default();
    if content.trim().is_empty() {
        return Err(TranslateError::provider(
            ErrorKind::InvalidResponse,
            "provider returned an empty completion",
        ));
    }
    Ok(content)
}

// --- Wire types ---

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    top_p: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}
