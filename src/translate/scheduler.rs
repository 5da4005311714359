//! Segment scheduler: bounded-concurrency translation of one document's
//! segments, with cache short-circuiting, per-segment retry and recovery,
//! and strictly index-ordered flushing regardless of completion order.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::cache::{SegmentEntry, TranslationCache};
use super::normalize::{sanitize_message, FenceNormalizer};
use super::prompt::TranslationPrompt;
use super::{ErrorKind, SegmentRequest, TranslateError, Translator};
use crate::config::{TranslationConfig, RETRY_ATTEMPTS_MAX, RETRY_ATTEMPTS_MIN};
use crate::document::DocumentRef;
use crate::metrics::{metric_names, MetricsRegistry};

pub const BACKOFF_BASE_MS: u64 = 250;
pub const BACKOFF_CAP_MS: u64 = 2_000;
const BACKOFF_JITTER_MS: u64 = 50;

/// Provider id recorded on placeholder segments.
pub const PLACEHOLDER_PROVIDER_ID: &str = "placeholder";

/// How a failed segment was salvaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RecoveryStrategy {
    CacheFallback,
    Placeholder,
}

impl RecoveryStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryStrategy::CacheFallback => "cacheFallback",
            RecoveryStrategy::Placeholder => "placeholder",
        }
    }
}

/// Record of a segment that could not be translated live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recovery {
    pub segment_index: usize,
    pub code: ErrorKind,
    pub strategy: RecoveryStrategy,
    pub attempts: u32,
    /// Sanitized, display-safe error message.
    pub message: String,
}

/// Final state of one segment after scheduling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentOutcome {
    pub index: usize,
    pub markdown: String,
    pub provider_id: String,
    pub latency_ms: u64,
    pub from_cache: bool,
    pub recovery: Option<Recovery>,
}

/// Drives all segments of one document run through the provider.
pub struct SegmentScheduler {
    translator: Arc<dyn Translator>,
    cache: Arc<TranslationCache>,
    metrics: Arc<MetricsRegistry>,
}

impl SegmentScheduler {
    pub fn new(
        translator: Arc<dyn Translator>,
        cache: Arc<TranslationCache>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            translator,
            cache,
            metrics,
        }
    }

    /// Translate all segments, invoking `on_flush` strictly in ascending
    /// index order. A non-fatal run-level failure is retried once at
    /// concurrency 1 when the config allows it; segments already flushed by
    /// the failed pass are not emitted again.
    pub async fn run(
        &self,
        document: &DocumentRef,
        segments: &[String],
        config: &TranslationConfig,
        prompt: &TranslationPrompt,
        cancel: &CancellationToken,
        on_flush: &(dyn Fn(&SegmentOutcome) + Send + Sync),
    ) -> Result<Vec<SegmentOutcome>, TranslateError> {
        let emitted = AtomicUsize::new(0);
        let first = self
            .run_once(
                document,
                segments,
                config,
                prompt,
                cancel,
                config.concurrency,
                &emitted,
                on_flush,
            )
            .await;

        match first {
            Err(error)
                if config.parallel_fallback
                    && config.concurrency > 1
                    && !error.is_fatal()
                    && !error.is_cancelled() =>
            {
                warn!(error = %error, "parallel run failed, retrying serially");
                self.metrics.count(metric_names::RUN_FALLBACK_SERIAL);
                self.run_once(document, segments, config, prompt, cancel, 1, &emitted, on_flush)
                    .await
            }
            other => other,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_once(
        &self,
        document: &DocumentRef,
        segments: &[String],
        config: &TranslationConfig,
        prompt: &TranslationPrompt,
        cancel: &CancellationToken,
        concurrency: usize,
        emitted: &AtomicUsize,
        on_flush: &(dyn Fn(&SegmentOutcome) + Send + Sync),
    ) -> Result<Vec<SegmentOutcome>, TranslateError> {
        let total = segments.len();
        let mut slots: Vec<Option<SegmentOutcome>> = (0..total).map(|_| None).collect();
        let fence = FenceNormalizer::new();

        // Cache pre-pass: resolve hits before any network work. Hits are
        // re-normalized; when normalization changes a stored value the
        // entry is rewritten.
        for (index, text) in segments.iter().enumerate() {
            let Some(hit) = self
                .cache
                .get_segment(document, config, text, &prompt.fingerprint)
            else {
                continue;
            };
            let markdown = fence.unwrap_reply(&hit.markdown, fence.is_single_fence(text));
            if markdown != hit.markdown {
                self.cache
                    .rewrite_segment(config, text, &prompt.fingerprint, markdown.clone());
            }
            self.metrics.count(metric_names::SEGMENT_CACHE_HIT);
            slots[index] = Some(SegmentOutcome {
                index,
                markdown,
                provider_id: hit.provider_id,
                latency_ms: hit.latency_ms,
                from_cache: true,
                recovery: None,
            });
        }

        let mut next_flush = flush_ready(&slots, 0, emitted, on_flush);

        let pending: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(index, _)| index)
            .collect();

        if !pending.is_empty() {
            let worker_count = concurrency.clamp(1, pending.len());
            debug!(
                total,
                pending = pending.len(),
                workers = worker_count,
                "scheduling segment translation"
            );

            let (tx, mut rx) = mpsc::unbounded_channel();
            let shared = Arc::new(WorkerShared {
                translator: Arc::clone(&self.translator),
                cache: Arc::clone(&self.cache),
                metrics: Arc::clone(&self.metrics),
                segments: segments.to_vec(),
                pending,
                document: document.clone(),
                config: config.clone(),
                prompt: prompt.clone(),
                cancel: cancel.clone(),
                next: AtomicUsize::new(0),
                halted: AtomicBool::new(false),
            });

            let mut handles = Vec::with_capacity(worker_count);
            for _ in 0..worker_count {
                handles.push(tokio::spawn(worker_loop(Arc::clone(&shared), tx.clone())));
            }
            drop(tx);

            while let Some(result) = rx.recv().await {
                match result {
                    Ok(outcome) => {
                        let index = outcome.index;
                        slots[index] = Some(outcome);
                        next_flush = flush_ready(&slots, next_flush, emitted, on_flush);
                    }
                    Err(error) => {
                        // Stop further claims; in-flight work is abandoned.
                        shared.halted.store(true, Ordering::SeqCst);
                        for handle in &handles {
                            handle.abort();
                        }
                        return Err(error);
                    }
                }
            }

            for join in join_all(handles).await {
                if let Err(e) = join {
                    if e.is_cancelled() {
                        continue;
                    }
                    return Err(TranslateError::provider(
                        ErrorKind::Unknown,
                        format!("segment worker failed: {e}"),
                    ));
                }
            }
        }

        let mut outcomes = Vec::with_capacity(total);
        for (index, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(outcome) => outcomes.push(outcome),
                None if cancel.is_cancelled() => return Err(TranslateError::Cancelled),
                None => {
                    return Err(TranslateError::provider(
                        ErrorKind::Unknown,
                        "segment produced no result",
                    )
                    .with_segment(index))
                }
            }
        }
        Ok(outcomes)
    }
}

/// Flush every slot that became contiguous with the already-flushed prefix.
/// `emitted` persists across the parallel pass and a serial fallback so no
/// index is ever emitted twice.
fn flush_ready(
    slots: &[Option<SegmentOutcome>],
    mut next_flush: usize,
    emitted: &AtomicUsize,
    on_flush: &(dyn Fn(&SegmentOutcome) + Send + Sync),
) -> usize {
    while next_flush < slots.len() {
        let Some(outcome) = &slots[next_flush] else { break };
        if next_flush >= emitted.load(Ordering::SeqCst) {
            on_flush(outcome);
            emitted.store(next_flush + 1, Ordering::SeqCst);
        }
        next_flush += 1;
    }
    next_flush
}

struct WorkerShared {
    translator: Arc<dyn Translator>,
    cache: Arc<TranslationCache>,
    metrics: Arc<MetricsRegistry>,
    segments: Vec<String>,
    pending: Vec<usize>,
    document: DocumentRef,
    config: TranslationConfig,
    prompt: TranslationPrompt,
    cancel: CancellationToken,
    next: AtomicUsize,
    halted: AtomicBool,
}

/// Pull unclaimed pending indices until the queue drains, the run halts on
/// a fatal error, or cancellation fires.
async fn worker_loop(
    shared: Arc<WorkerShared>,
    tx: mpsc::UnboundedSender<Result<SegmentOutcome, TranslateError>>,
) {
    loop {
        if shared.halted.load(Ordering::SeqCst) || shared.cancel.is_cancelled() {
            break;
        }
        let slot = shared.next.fetch_add(1, Ordering::SeqCst);
        let Some(&index) = shared.pending.get(slot) else {
            break;
        };
        let result = process_segment(&shared, index).await;
        let stop = result.is_err();
        if tx.send(result).is_err() || stop {
            break;
        }
    }
}

/// Translate one segment: retry retryable failures with backoff, then
/// recover (cache fallback or placeholder) once attempts are exhausted.
/// Only fatal errors and cancellation propagate as `Err`.
async fn process_segment(
    shared: &WorkerShared,
    index: usize,
) -> Result<SegmentOutcome, TranslateError> {
    let text = &shared.segments[index];
    let request = SegmentRequest {
        text: text.clone(),
        file_name: shared.document.file_name().to_string(),
        document_label: shared.document.label.clone(),
    };
    let max_attempts = shared
        .config
        .retry_max_attempts
        .clamp(RETRY_ATTEMPTS_MIN, RETRY_ATTEMPTS_MAX);

    let mut attempts = 0;
    loop {
        if shared.cancel.is_cancelled() {
            return Err(TranslateError::Cancelled);
        }
        attempts += 1;

        let result = shared
            .translator
            .translate(&request, &shared.config, &shared.prompt, &shared.cancel)
            .await;

        match result {
            Ok(reply) => {
                shared
                    .metrics
                    .record(metric_names::PROVIDER_CALL, reply.latency_ms as f64 * 1000.0);
                shared.cache.put_segment(
                    &shared.document,
                    &shared.config,
                    text,
                    &shared.prompt.fingerprint,
                    SegmentEntry {
                        markdown: reply.markdown.clone(),
                        provider_id: reply.provider_id.clone(),
                        latency_ms: reply.latency_ms,
                    },
                );
                return Ok(SegmentOutcome {
                    index,
                    markdown: reply.markdown,
                    provider_id: reply.provider_id,
                    latency_ms: reply.latency_ms,
                    from_cache: false,
                    recovery: None,
                });
            }
            Err(TranslateError::Cancelled) => return Err(TranslateError::Cancelled),
            Err(error) if error.is_fatal() => {
                warn!(segment = index, error = %error, "fatal provider error, aborting run");
                return Err(error.with_segment(index));
            }
            Err(error) => {
                let kind = error.kind().unwrap_or(ErrorKind::Unknown);
                if kind.retryable() && attempts < max_attempts {
                    let delay = backoff_delay(attempts);
                    shared.metrics.count(metric_names::SEGMENT_RETRY);
                    debug!(
                        segment = index,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "segment attempt failed, retrying"
                    );
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = shared.cancel.cancelled() => return Err(TranslateError::Cancelled),
                    }
                    continue;
                }
                let message = match &error {
                    TranslateError::Provider { message, .. } => message.clone(),
                    other => other.to_string(),
                };
                return Ok(recover(shared, index, text, kind, attempts, &message));
            }
        }
    }
}

/// Salvage an exhausted segment. The segment cache is re-checked here: a
/// concurrent run for another document may have filled it since the
/// pre-pass. Placeholders keep the original text inline so nothing is lost.
fn recover(
    shared: &WorkerShared,
    index: usize,
    text: &str,
    kind: ErrorKind,
    attempts: u32,
    message: &str,
) -> SegmentOutcome {
    let message = sanitize_message(message);
    shared.metrics.count(metric_names::SEGMENT_RECOVERED);

    if let Some(hit) =
        shared
            .cache
            .get_segment(&shared.document, &shared.config, text, &shared.prompt.fingerprint)
    {
        warn!(
            segment = index,
            code = kind.as_str(),
            attempts,
            "segment failed, reusing cached translation"
        );
        return SegmentOutcome {
            index,
            markdown: hit.markdown,
            provider_id: hit.provider_id,
            latency_ms: hit.latency_ms,
            from_cache: true,
            recovery: Some(Recovery {
                segment_index: index,
                code: kind,
                strategy: RecoveryStrategy::CacheFallback,
                attempts,
                message,
            }),
        };
    }

    warn!(
        segment = index,
        code = kind.as_str(),
        attempts,
        "segment failed, emitting placeholder"
    );
    let markdown = format!(
        "> **Translation failed** ({}): {}\n\n{}",
        kind.as_str(),
        message,
        text
    );
    SegmentOutcome {
        index,
        markdown,
        provider_id: PLACEHOLDER_PROVIDER_ID.to_string(),
        latency_ms: 0,
        from_cache: false,
        recovery: Some(Recovery {
            segment_index: index,
            code: kind,
            strategy: RecoveryStrategy::Placeholder,
            attempts,
            message,
        }),
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(6);
    let exp = (BACKOFF_BASE_MS << shift).min(BACKOFF_CAP_MS);
    // jitter from clock nanos
    let jitter = (std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64)
        % BACKOFF_JITTER_MS;
    Duration::from_millis(exp + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::prompt::{PromptSource, TranslationPrompt};
    use crate::translate::ProviderReply;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Scripted translator: per-text behaviors keyed by call count.
    struct MockTranslator {
        calls: AtomicUsize,
        per_text_calls: Mutex<HashMap<String, usize>>,
        latencies: HashMap<String, u64>,
        script: Box<dyn Fn(&str, usize) -> Result<ProviderReply, TranslateError> + Send + Sync>,
    }

    impl MockTranslator {
        fn translating_all() -> Self {
            Self::with_script(|text, _| Ok(reply(text)))
        }

        fn with_script(
            script: impl Fn(&str, usize) -> Result<ProviderReply, TranslateError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                per_text_calls: Mutex::new(HashMap::new()),
                latencies: HashMap::new(),
                script: Box::new(script),
            }
        }

        fn with_latencies(mut self, latencies: &[(&str, u64)]) -> Self {
            self.latencies = latencies
                .iter()
                .map(|(t, ms)| (t.to_string(), *ms))
                .collect();
            self
        }

        fn total_calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn reply(text: &str) -> ProviderReply {
        ProviderReply {
            markdown: format!("T:{text}"),
            provider_id: "mock".to_string(),
            latency_ms: 7,
        }
    }

    #[async_trait]
    impl Translator for MockTranslator {
        async fn translate(
            &self,
            request: &SegmentRequest,
            _config: &TranslationConfig,
            _prompt: &TranslationPrompt,
            _cancel: &CancellationToken,
        ) -> Result<ProviderReply, TranslateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let text_calls = {
                let mut map = self.per_text_calls.lock();
                let entry = map.entry(request.text.clone()).or_insert(0);
                *entry += 1;
                *entry
            };
            if let Some(ms) = self.latencies.get(&request.text) {
                sleep(Duration::from_millis(*ms)).await;
            }
            (self.script)(&request.text, text_calls)
        }
    }

    struct Harness {
        scheduler: SegmentScheduler,
        cache: Arc<TranslationCache>,
        translator: Arc<MockTranslator>,
        document: DocumentRef,
        prompt: TranslationPrompt,
    }

    fn harness(translator: MockTranslator) -> Harness {
        let cache = Arc::new(TranslationCache::with_defaults());
        let translator = Arc::new(translator);
        let scheduler = SegmentScheduler::new(
            Arc::clone(&translator) as Arc<dyn Translator>,
            Arc::clone(&cache),
            Arc::new(MetricsRegistry::new()),
        );
        Harness {
            scheduler,
            cache,
            translator,
            document: DocumentRef::new("file:///ws/doc.md", 1, "doc.md"),
            prompt: TranslationPrompt::new("Translate.", PromptSource::Configuration),
        }
    }

    fn segments(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    async fn run_collecting(
        h: &Harness,
        segs: &[String],
        config: &TranslationConfig,
    ) -> (Result<Vec<SegmentOutcome>, TranslateError>, Vec<usize>) {
        let flushed = Mutex::new(Vec::new());
        let cancel = CancellationToken::new();
        let result = h
            .scheduler
            .run(&h.document, segs, config, &h.prompt, &cancel, &|outcome| {
                flushed.lock().push(outcome.index);
            })
            .await;
        (result, flushed.into_inner())
    }

    #[tokio::test(start_paused = true)]
    async fn flush_order_is_ascending_despite_varied_latency() {
        let translator = MockTranslator::translating_all()
            .with_latencies(&[("s0", 80), ("s1", 40), ("s2", 10), ("s3", 1)]);
        let h = harness(translator);
        let config = TranslationConfig {
            concurrency: 4,
            ..TranslationConfig::default()
        };

        let segs = segments(&["s0", "s1", "s2", "s3"]);
        let (result, flushed) = run_collecting(&h, &segs, &config).await;

        let outcomes = result.unwrap();
        assert_eq!(flushed, vec![0, 1, 2, 3]);
        assert_eq!(
            outcomes.iter().map(|o| o.index).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        assert_eq!(outcomes[0].markdown, "T:s0");
        assert_eq!(outcomes[3].markdown, "T:s3");
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_errors_are_retried_until_success() {
        let translator = MockTranslator::with_script(|text, call| {
            if call <= 2 {
                Err(TranslateError::provider(ErrorKind::Server, "http 500"))
            } else {
                Ok(reply(text))
            }
        });
        let h = harness(translator);
        let config = TranslationConfig {
            concurrency: 1,
            retry_max_attempts: 3,
            ..TranslationConfig::default()
        };

        let segs = segments(&["s0"]);
        let (result, _) = run_collecting(&h, &segs, &config).await;

        let outcomes = result.unwrap();
        assert_eq!(outcomes[0].markdown, "T:s0");
        assert!(outcomes[0].recovery.is_none());
        assert_eq!(h.translator.total_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_segment_becomes_placeholder() {
        let translator = MockTranslator::with_script(|_, _| {
            Err(TranslateError::provider(ErrorKind::Server, "http 502   bad\ngateway"))
        });
        let h = harness(translator);
        let config = TranslationConfig {
            concurrency: 1,
            retry_max_attempts: 2,
            parallel_fallback: false,
            ..TranslationConfig::default()
        };

        let segs = segments(&["Original paragraph."]);
        let (result, flushed) = run_collecting(&h, &segs, &config).await;

        let outcomes = result.unwrap();
        assert_eq!(flushed, vec![0]);
        let outcome = &outcomes[0];
        assert!(outcome.markdown.contains("Translation failed"));
        assert!(outcome.markdown.contains("http 502 bad gateway"));
        assert!(outcome.markdown.ends_with("Original paragraph."));
        assert_eq!(outcome.provider_id, PLACEHOLDER_PROVIDER_ID);

        let recovery = outcome.recovery.as_ref().unwrap();
        assert_eq!(recovery.strategy, RecoveryStrategy::Placeholder);
        assert_eq!(recovery.code, ErrorKind::Server);
        assert_eq!(recovery.attempts, 2);
        assert_eq!(h.translator.total_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_errors_skip_backoff() {
        let translator = MockTranslator::with_script(|_, _| {
            Err(TranslateError::provider(ErrorKind::InvalidResponse, "empty"))
        });
        let h = harness(translator);
        let config = TranslationConfig {
            concurrency: 1,
            retry_max_attempts: 6,
            parallel_fallback: false,
            ..TranslationConfig::default()
        };

        let (result, _) = run_collecting(&h, &segments(&["s0"]), &config).await;
        let outcomes = result.unwrap();
        assert_eq!(
            outcomes[0].recovery.as_ref().unwrap().code,
            ErrorKind::InvalidResponse
        );
        // One attempt only: invalidResponse is not retryable.
        assert_eq!(h.translator.total_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_segment_reuses_cached_translation() {
        let translator = MockTranslator::with_script(|text, call| {
            if call == 1 {
                Ok(reply(text))
            } else {
                Err(TranslateError::provider(ErrorKind::Unknown, "broke"))
            }
        });
        let h = harness(translator);
        let config = TranslationConfig {
            concurrency: 1,
            parallel_fallback: false,
            ..TranslationConfig::default()
        };

        // Identical text means identical fingerprint: the pre-pass misses
        // both, index 0 caches on success, index 1 recovers from that entry.
        let segs = segments(&["Same text.", "Same text."]);
        let (result, flushed) = run_collecting(&h, &segs, &config).await;

        let outcomes = result.unwrap();
        assert_eq!(flushed, vec![0, 1]);
        assert!(outcomes[0].recovery.is_none());

        let second = &outcomes[1];
        assert!(second.from_cache);
        assert_eq!(second.markdown, "T:Same text.");
        let recovery = second.recovery.as_ref().unwrap();
        assert_eq!(recovery.strategy, RecoveryStrategy::CacheFallback);
        assert_eq!(recovery.code, ErrorKind::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn authentication_aborts_the_whole_run() {
        let translator = MockTranslator::with_script(|text, _| {
            if text == "s2" {
                Err(TranslateError::provider(ErrorKind::Authentication, "bad key"))
            } else {
                Ok(reply(text))
            }
        });
        let h = harness(translator);
        let config = TranslationConfig {
            concurrency: 2,
            parallel_fallback: true,
            ..TranslationConfig::default()
        };

        let segs = segments(&["s0", "s1", "s2"]);
        let (result, _) = run_collecting(&h, &segs, &config).await;

        let error = result.unwrap_err();
        assert!(error.is_fatal());
        assert_eq!(error.kind(), Some(ErrorKind::Authentication));
        match error {
            TranslateError::Provider { segment, .. } => assert_eq!(segment, Some(2)),
            other => panic!("unexpected error: {other}"),
        }
        // Fatal runs never fall back to serial: s0, s1, s2 called once each.
        assert_eq!(h.translator.total_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_failure_falls_back_to_serial_without_duplicate_flushes() {
        let translator = MockTranslator::with_script(|text, call| {
            if text == "s2" && call == 1 {
                panic!("worker blew up");
            }
            Ok(reply(text))
        });
        let h = harness(translator);
        let config = TranslationConfig {
            concurrency: 2,
            parallel_fallback: true,
            ..TranslationConfig::default()
        };

        let segs = segments(&["s0", "s1", "s2"]);
        let (result, flushed) = run_collecting(&h, &segs, &config).await;

        let outcomes = result.unwrap();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[2].markdown, "T:s2");
        // Each index flushed exactly once, in order, across both passes.
        assert_eq!(flushed, vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn cached_segments_skip_the_provider() {
        let translator = MockTranslator::translating_all();
        let h = harness(translator);
        let config = TranslationConfig::default();

        for text in ["s0", "s1"] {
            h.cache.put_segment(
                &h.document,
                &config,
                text,
                &h.prompt.fingerprint,
                SegmentEntry {
                    markdown: format!("cached:{text}"),
                    provider_id: "mock".to_string(),
                    latency_ms: 3,
                },
            );
        }

        let segs = segments(&["s0", "s1"]);
        let (result, flushed) = run_collecting(&h, &segs, &config).await;

        let outcomes = result.unwrap();
        assert_eq!(h.translator.total_calls(), 0);
        assert_eq!(flushed, vec![0, 1]);
        assert!(outcomes.iter().all(|o| o.from_cache));
        assert_eq!(outcomes[0].markdown, "cached:s0");
    }

    #[tokio::test(start_paused = true)]
    async fn cache_hits_are_renormalized_and_rewritten() {
        let translator = MockTranslator::translating_all();
        let h = harness(translator);
        let config = TranslationConfig::default();

        h.cache.put_segment(
            &h.document,
            &config,
            "prose",
            &h.prompt.fingerprint,
            SegmentEntry {
                markdown: "```markdown\n## Heading\n```".to_string(),
                provider_id: "mock".to_string(),
                latency_ms: 3,
            },
        );

        let (result, _) = run_collecting(&h, &segments(&["prose"]), &config).await;
        assert_eq!(result.unwrap()[0].markdown, "## Heading");

        let stored = h
            .cache
            .get_segment(&h.document, &config, "prose", &h.prompt.fingerprint)
            .unwrap();
        assert_eq!(stored.markdown, "## Heading");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_propagates_as_cancelled() {
        let translator = MockTranslator::translating_all().with_latencies(&[("s0", 1_000)]);
        let h = harness(translator);
        let config = TranslationConfig {
            concurrency: 1,
            ..TranslationConfig::default()
        };

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = h
            .scheduler
            .run(
                &h.document,
                &segments(&["s0"]),
                &config,
                &h.prompt,
                &cancel,
                &|_| panic!("nothing should flush"),
            )
            .await;

        assert!(result.unwrap_err().is_cancelled());
    }

    #[test]
    fn backoff_grows_and_caps() {
        let d1 = backoff_delay(1).as_millis() as u64;
        let d3 = backoff_delay(3).as_millis() as u64;
        let d6 = backoff_delay(6).as_millis() as u64;
        assert!((BACKOFF_BASE_MS..BACKOFF_BASE_MS + BACKOFF_JITTER_MS).contains(&d1));
        assert!((1_000..1_000 + BACKOFF_JITTER_MS).contains(&d3));
        assert!((BACKOFF_CAP_MS..BACKOFF_CAP_MS + BACKOFF_JITTER_MS).contains(&d6));
    }
}
