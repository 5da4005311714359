//! Translation pipeline: shared types, error taxonomy, and the provider
//! trait the scheduler drives.

pub mod cache;
pub mod client;
pub mod normalize;
pub mod prompt;
pub mod scheduler;
pub mod service;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::TranslationConfig;
use prompt::TranslationPrompt;

/// Classification of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Bad credentials. Fatal for the whole run: retrying cannot help.
    Authentication,
    Timeout,
    RateLimit,
    Network,
    Server,
    /// The provider answered but the completion was unusable.
    InvalidResponse,
    Unknown,
}

impl ErrorKind {
    /// Whether a fresh attempt at the same segment may succeed.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::RateLimit | ErrorKind::Network | ErrorKind::Server
        )
    }

    /// Fatal kinds abort the whole run instead of being recovered per segment.
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorKind::Authentication)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimit => "rateLimit",
            ErrorKind::Network => "network",
            ErrorKind::Server => "server",
            ErrorKind::InvalidResponse => "invalidResponse",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Translation failure. Cooperative cancellation is its own variant so
/// callers can always tell "user cancelled" from "request failed".
#[derive(Debug, Clone)]
pub enum TranslateError {
    Provider {
        kind: ErrorKind,
        message: String,
        /// Originating segment, when the failure is attributable to one.
        segment: Option<usize>,
    },
    Cancelled,
}

impl TranslateError {
    pub fn provider(kind: ErrorKind, message: impl Into<String>) -> Self {
        TranslateError::Provider {
            kind,
            message: message.into(),
            segment: None,
        }
    }

    pub fn with_segment(self, index: usize) -> Self {
        match self {
            TranslateError::Provider { kind, message, .. } => TranslateError::Provider {
                kind,
                message,
                segment: Some(index),
            },
            other => other,
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            TranslateError::Provider { kind, .. } => Some(*kind),
            TranslateError::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TranslateError::Cancelled)
    }

    pub fn is_fatal(&self) -> bool {
        self.kind().is_some_and(ErrorKind::is_fatal)
    }

    pub fn retryable(&self) -> bool {
        self.kind().is_some_and(ErrorKind::retryable)
    }
}

impl std::fmt::Display for TranslateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranslateError::Provider {
                kind,
                message,
                segment: Some(index),
            } => write!(f, "{kind}: {message} (segment {index})"),
            TranslateError::Provider { kind, message, .. } => write!(f, "{kind}: {message}"),
            TranslateError::Cancelled => write!(f, "translation cancelled"),
        }
    }
}

impl std::error::Error for TranslateError {}

/// One segment handed to a provider.
#[derive(Debug, Clone)]
pub struct SegmentRequest {
    pub text: String,
    /// File name hint interpolated into the prompt, e.g. `guide.md`.
    pub file_name: String,
    /// Workspace-relative label of the source document.
    pub document_label: String,
}

/// Raw provider reply for one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderReply {
    pub markdown: String,
    pub provider_id: String,
    pub latency_ms: u64,
}

/// Provider abstraction: one network call per segment. Implementations
/// must honor `cancel` cooperatively and classify failures via `ErrorKind`.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(
        &self,
        request: &SegmentRequest,
        config: &TranslationConfig,
        prompt: &TranslationPrompt,
        cancel: &CancellationToken,
    ) -> Result<ProviderReply, TranslateError>;
}
