//! Resolved translation configuration.
//! The host resolves settings (workspace config, secret storage) into this
//! struct; `normalized` applies defaults and clamps once at the boundary so
//! the pipeline never re-validates.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const MIN_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
pub const RETRY_ATTEMPTS_MIN: u32 = 1;
pub const RETRY_ATTEMPTS_MAX: u32 = 6;
pub const DEFAULT_BATCH_TARGET_CHARS: usize = 500;
pub const DEFAULT_BATCH_MAX_CHARS: usize = 1_400;

/// Immutable per-run translation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TranslationConfig {
    /// Chat-completion endpoint base, e.g. `https://api.openai.com/v1`.
    pub api_base_url: String,
    pub api_key: String,
    pub model: String,
    /// Human-readable target language, interpolated into the prompt.
    pub target_language: String,
    pub timeout_ms: u64,
    /// Maximum in-flight provider requests per document run.
    pub concurrency: usize,
    pub retry_max_attempts: u32,
    /// Merge short segments into provider-sized batches before scheduling.
    pub adaptive_batching: bool,
    pub batch_target_chars: usize,
    pub batch_max_chars: usize,
    /// Retry the whole run at concurrency 1 after a non-fatal parallel failure.
    pub parallel_fallback: bool,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            target_language: "English".to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            concurrency: DEFAULT_CONCURRENCY,
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            adaptive_batching: true,
            batch_target_chars: DEFAULT_BATCH_TARGET_CHARS,
            batch_max_chars: DEFAULT_BATCH_MAX_CHARS,
            parallel_fallback: true,
        }
    }
}

impl TranslationConfig {
    /// Clamp host-provided values into supported ranges.
    /// Retry attempts floor at 1: a run always gets one live attempt per
    /// segment, "zero attempts" is not a supported mode.
    pub fn normalized(mut self) -> Self {
        self.api_base_url = self.api_base_url.trim_end_matches('/').to_string();
        self.timeout_ms = self.timeout_ms.max(MIN_TIMEOUT_MS);
        self.concurrency = self.concurrency.max(1);
        self.retry_max_attempts = self
            .retry_max_attempts
            .clamp(RETRY_ATTEMPTS_MIN, RETRY_ATTEMPTS_MAX);
        if self.batch_target_chars == 0 {
            self.batch_target_chars = DEFAULT_BATCH_TARGET_CHARS;
        }
        if self.batch_max_chars < self.batch_target_chars {
            self.batch_max_chars = self.batch_target_chars.max(DEFAULT_BATCH_MAX_CHARS);
        }
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
