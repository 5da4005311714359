//! Translation service facade.
//! Ties segmentation, scheduling, caching, and rendering together behind
//! the single entry point the presentation layer calls, and owns the
//! per-document run lifecycle (supersede, close, manual retry).

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::cache::{DocumentEntry, TranslationCache};
use super::prompt::TranslationPrompt;
use super::scheduler::{Recovery, SegmentScheduler};
use super::{TranslateError, Translator};
use crate::cancellation::{RunGuard, RunRegistry};
use crate::config::TranslationConfig;
use crate::document::DocumentSnapshot;
use crate::metrics::{metric_names, MetricsRegistry, RunIds};
use crate::segment::{merge_adaptive, segment_markdown, BatchPolicy};

/// Provider id reported when no translation work happened.
pub const NOOP_PROVIDER_ID: &str = "noop";
/// Fixed body shown for documents with nothing to translate.
pub const NOTHING_TO_TRANSLATE: &str = "_Nothing to translate._";

/// Markdown-to-HTML derivation, supplied by the host.
pub trait Renderer: Send + Sync {
    fn render(&self, markdown: &str) -> String;
}

/// Hands the markdown through unchanged; hosts that render in the webview
/// itself need no HTML derivation here.
pub struct PassthroughRenderer;

impl Renderer for PassthroughRenderer {
    fn render(&self, markdown: &str) -> String {
        markdown.to_string()
    }
}

/// Streaming update for one flushed segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentUpdate {
    pub index: usize,
    pub total: usize,
    pub markdown: String,
    pub html: String,
    pub latency_ms: u64,
    pub provider_id: String,
    pub from_cache: bool,
    pub recovery: Option<Recovery>,
}

/// Progress callbacks. `plan` fires once before any network work;
/// `segment` fires at most once per index, in ascending index order.
pub trait ProgressObserver: Send + Sync {
    fn plan(&self, _segments: &[String]) {}
    fn segment(&self, _update: &SegmentUpdate) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {}

/// Composed result for one document run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentTranslation {
    pub markdown: String,
    pub html: String,
    /// Provider id of the last flushed segment.
    pub provider_id: String,
    /// Sum of per-segment provider latencies, not wall-clock time.
    pub latency_ms: u64,
    pub recoveries: Vec<Recovery>,
    pub from_cache: bool,
}

/// Facade over the whole pipeline. One instance serves many documents;
/// runs for the same document supersede each other.
pub struct TranslationService {
    scheduler: SegmentScheduler,
    cache: Arc<TranslationCache>,
    renderer: Arc<dyn Renderer>,
    metrics: Arc<MetricsRegistry>,
    registry: RunRegistry,
}

impl TranslationService {
    pub fn new(
        translator: Arc<dyn Translator>,
        cache: Arc<TranslationCache>,
        renderer: Arc<dyn Renderer>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            scheduler: SegmentScheduler::new(
                translator,
                Arc::clone(&cache),
                Arc::clone(&metrics),
            ),
            cache,
            renderer,
            metrics,
            registry: RunRegistry::new(),
        }
    }

    /// Translate a document snapshot. A new call for the same document URI
    /// supersedes the run already in flight.
    pub async fn translate_document(
        &self,
        snapshot: &DocumentSnapshot,
        config: &TranslationConfig,
        prompt: &TranslationPrompt,
        cancel: &CancellationToken,
        observer: &dyn ProgressObserver,
    ) -> Result<DocumentTranslation, TranslateError> {
        let guard = self.registry.begin(&snapshot.document.uri, cancel);
        let ids = RunIds::new(guard.generation());
        let span = tracing::info_span!(
            "translate_document",
            trace_id = %ids.trace_id,
            uri = %snapshot.document.uri,
            version = snapshot.document.version,
        );

        let result = self
            .run(snapshot, config, prompt, &guard, observer)
            .instrument(span)
            .await;
        self.registry
            .finish(&snapshot.document.uri, guard.generation());
        result
    }

    /// Manual retry: drop the document's cached state, then translate fresh.
    pub async fn retry_document(
        &self,
        snapshot: &DocumentSnapshot,
        config: &TranslationConfig,
        prompt: &TranslationPrompt,
        cancel: &CancellationToken,
        observer: &dyn ProgressObserver,
    ) -> Result<DocumentTranslation, TranslateError> {
        self.cache.clear_for_document(&snapshot.document.uri);
        self.translate_document(snapshot, config, prompt, cancel, observer)
            .await
    }

    /// Document or its preview closed: cancel the in-flight run and drop
    /// every cache entry the document owns.
    pub fn close_document(&self, uri: &str) {
        self.registry.cancel(uri);
        self.cache.clear_for_document(uri);
        debug!(uri, "document closed, translation state cleared");
    }

    pub fn cache(&self) -> &Arc<TranslationCache> {
        &self.cache
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    async fn run(
        &self,
        snapshot: &DocumentSnapshot,
        config: &TranslationConfig,
        prompt: &TranslationPrompt,
        guard: &RunGuard,
        observer: &dyn ProgressObserver,
    ) -> Result<DocumentTranslation, TranslateError> {
        if guard.is_cancelled() {
            return Err(TranslateError::Cancelled);
        }

        if snapshot.is_empty() {
            debug!("empty document, nothing to translate");
            let markdown = NOTHING_TO_TRANSLATE.to_string();
            return Ok(DocumentTranslation {
                html: self.renderer.render(&markdown),
                markdown,
                provider_id: NOOP_PROVIDER_ID.to_string(),
                latency_ms: 0,
                recoveries: Vec::new(),
                from_cache: false,
            });
        }

        if let Some(hit) = self
            .cache
            .get_document(&snapshot.document, config, &prompt.fingerprint)
        {
            self.metrics.count(metric_names::DOCUMENT_CACHE_HIT);
            debug!("serving document translation from cache");
            return Ok(DocumentTranslation {
                markdown: hit.markdown,
                html: hit.html,
                provider_id: hit.provider_id,
                latency_ms: hit.latency_ms,
                recoveries: Vec::new(),
                from_cache: true,
            });
        }

        let mut segments = segment_markdown(&snapshot.text);
        if config.adaptive_batching {
            segments = merge_adaptive(segments, &BatchPolicy::from(config));
        }
        observer.plan(&segments);
        info!(segments = segments.len(), "translation run started");

        let total = segments.len();
        let run_timer = self.metrics.span(metric_names::RUN_TOTAL);
        let renderer = &self.renderer;
        let outcomes = self
            .scheduler
            .run(
                &snapshot.document,
                &segments,
                config,
                prompt,
                guard.token(),
                &|outcome| {
                    observer.segment(&SegmentUpdate {
                        index: outcome.index,
                        total,
                        markdown: outcome.markdown.clone(),
                        html: renderer.render(&outcome.markdown),
                        latency_ms: outcome.latency_ms,
                        provider_id: outcome.provider_id.clone(),
                        from_cache: outcome.from_cache,
                        recovery: outcome.recovery.clone(),
                    });
                },
            )
            .await;

        let outcomes = match outcomes {
            Ok(outcomes) => outcomes,
            Err(error) => {
                if error.is_cancelled() {
                    info!("translation run cancelled");
                } else {
                    warn!(error = %error, "translation run failed");
                }
                return Err(error);
            }
        };

        let markdown = outcomes
            .iter()
            .map(|o| o.markdown.trim_end())
            .collect::<Vec<_>>()
            .join("\n\n");
        let html = self.renderer.render(&markdown);
        let latency_ms = outcomes.iter().map(|o| o.latency_ms).sum();
        let provider_id = outcomes
            .last()
            .map(|o| o.provider_id.clone())
            .unwrap_or_else(|| NOOP_PROVIDER_ID.to_string());
        let recoveries: Vec<Recovery> = outcomes
            .iter()
            .filter_map(|o| o.recovery.clone())
            .collect();

        // Only fully clean runs are cached at document granularity: a
        // recovered placeholder can change on the next run.
        if recoveries.is_empty() {
            self.cache.put_document(
                &snapshot.document,
                config,
                &prompt.fingerprint,
                DocumentEntry {
                    markdown: markdown.clone(),
                    html: html.clone(),
                    provider_id: provider_id.clone(),
                    latency_ms,
                },
            );
        } else {
            debug!(recovered = recoveries.len(), "degraded run, skipping document cache");
        }

        run_timer.finish();
        info!(
            segments = total,
            recovered = recoveries.len(),
            latency_ms,
            "translation run finished"
        );

        Ok(DocumentTranslation {
            markdown,
            html,
            provider_id,
            latency_ms,
            recoveries,
            from_cache: false,
        })
    }
}
