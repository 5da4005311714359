//! Lingomark: live translated Markdown preview core.
//! Segments a document into fence-safe units, translates them concurrently
//! through an OpenAI-compatible chat-completion endpoint, caches results at
//! document and segment granularity, and reassembles output in source order.

pub mod cancellation;
pub mod config;
pub mod document;
pub mod fingerprint;
pub mod metrics;
pub mod segment;
pub mod translate;

pub use config::TranslationConfig;
pub use document::{DocumentRef, DocumentSnapshot};
pub use translate::cache::TranslationCache;
pub use translate::client::OpenAiClient;
pub use translate::prompt::{PromptSource, TranslationPrompt};
pub use translate::scheduler::{Recovery, RecoveryStrategy};
pub use translate::service::{
    DocumentTranslation, NoopObserver, PassthroughRenderer, ProgressObserver, Renderer,
    SegmentUpdate, TranslationService,
};
pub use translate::{ErrorKind, TranslateError, Translator};

use std::sync::Arc;

/// Initialize tracing with an env-filter default (`RUST_LOG` overrides).
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lingomark=debug".parse().unwrap()),
        )
        .with_target(true)
        .init();
}

/// Wire up a ready-to-use service against the HTTP provider client with
/// default cache sizing. Hosts that need fakes construct
/// `TranslationService` directly.
pub fn build_service(renderer: Arc<dyn Renderer>) -> Result<TranslationService, TranslateError> {
    let client = Arc::new(OpenAiClient::new()?);
    Ok(TranslationService::new(
        client,
        Arc::new(TranslationCache::with_defaults()),
        renderer,
        Arc::new(metrics::MetricsRegistry::new()),
    ))
}
