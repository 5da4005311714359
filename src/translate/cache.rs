//! Two-tier in-memory translation cache with TTL.
//! Document tier: whole-run results keyed by {uri, version, config hash}.
//! Segment tier: raw segment translations keyed by content fingerprint,
//! shared across documents through an ownership index so invalidating one
//! document never evicts entries another document still uses.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::config::TranslationConfig;
use crate::document::DocumentRef;
use crate::fingerprint;

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_DOCUMENT_CAPACITY: usize = 16;
/// Segment tier holds this many entries per document-tier slot.
pub const SEGMENT_CAPACITY_FACTOR: usize = 8;

/// Cached whole-document result. Only fully successful runs land here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentEntry {
    pub markdown: String,
    pub html: String,
    pub provider_id: String,
    pub latency_ms: u64,
}

/// Cached raw translation for one segment fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentEntry {
    pub markdown: String,
    pub provider_id: String,
    pub latency_ms: u64,
}

struct Timestamped<T> {
    value: T,
    inserted_at: Instant,
}

impl<T> Timestamped<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            inserted_at: Instant::now(),
        }
    }
}

struct Inner {
    documents: LruCache<String, Timestamped<DocumentEntry>>,
    segments: LruCache<String, Timestamped<SegmentEntry>>,
    /// fingerprint -> URIs of documents that used the entry.
    owners: HashMap<String, HashSet<String>>,
}

/// Best-effort acceleration layer: a miss just costs a provider call.
/// All operations are synchronous and take one lock, so nothing can
/// interleave with them across `await` points.
pub struct TranslationCache {
    inner: Mutex<Inner>,
    ttl: Duration,
}

impl TranslationCache {
    pub fn new(document_capacity: usize, ttl: Duration) -> Self {
        let document_capacity =
            NonZeroUsize::new(document_capacity).expect("cache capacity must be > 0");
        let segment_capacity = NonZeroUsize::new(document_capacity.get() * SEGMENT_CAPACITY_FACTOR)
            .expect("segment capacity must be > 0");
        Self {
            inner: Mutex::new(Inner {
                documents: LruCache::new(document_capacity),
                segments: LruCache::new(segment_capacity),
                owners: HashMap::new(),
            }),
            ttl,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_DOCUMENT_CAPACITY, DEFAULT_TTL)
    }

    fn is_expired(&self, inserted_at: Instant) -> bool {
        inserted_at.elapsed() >= self.ttl
    }

    /// Look up a whole-document result. Expired entries are purged on access.
    pub fn get_document(
        &self,
        document: &DocumentRef,
        config: &TranslationConfig,
        prompt_fp: &str,
    ) -> Option<DocumentEntry> {
        let key = fingerprint::document_cache_key(document, config, prompt_fp);
        let mut inner = self.inner.lock();
        let expired = match inner.documents.peek(&key) {
            Some(entry) => self.is_expired(entry.inserted_at),
            None => return None,
        };
        if expired {
            inner.documents.pop(&key);
            return None;
        }
        inner.documents.get(&key).map(|entry| entry.value.clone())
    }

    /// Store a whole-document result, evicting the stalest entry at capacity.
    pub fn put_document(
        &self,
        document: &DocumentRef,
        config: &TranslationConfig,
        prompt_fp: &str,
        entry: DocumentEntry,
    ) {
        let key = fingerprint::document_cache_key(document, config, prompt_fp);
        let mut inner = self.inner.lock();
        inner.documents.push(key, Timestamped::new(entry));
    }

    /// Look up a segment translation. A hit refreshes the entry's timestamp
    /// (sliding TTL) and records `document` as an owner.
    pub fn get_segment(
        &self,
        document: &DocumentRef,
        config: &TranslationConfig,
        segment_text: &str,
        prompt_fp: &str,
    ) -> Option<SegmentEntry> {
        let key = fingerprint::segment_fingerprint(segment_text, config, prompt_fp);
        let mut inner = self.inner.lock();

        let expired = match inner.segments.peek(&key) {
            Some(entry) => self.is_expired(entry.inserted_at),
            None => return None,
        };
        if expired {
            inner.segments.pop(&key);
            inner.owners.remove(&key);
            return None;
        }

        let value = {
            let entry = inner.segments.get_mut(&key).expect("peeked entry present");
            entry.inserted_at = Instant::now();
            entry.value.clone()
        };
        inner
            .owners
            .entry(key)
            .or_default()
            .insert(document.uri.clone());
        Some(value)
    }

    /// Store a segment translation and record ownership. Capacity overflow
    /// evicts the stalest segment entry together with its ownership records.
    pub fn put_segment(
        &self,
        document: &DocumentRef,
        config: &TranslationConfig,
        segment_text: &str,
        prompt_fp: &str,
        entry: SegmentEntry,
    ) {
        let key = fingerprint::segment_fingerprint(segment_text, config, prompt_fp);
        let mut inner = self.inner.lock();

        if let Some((evicted_key, _)) = inner.segments.push(key.clone(), Timestamped::new(entry)) {
            if evicted_key != key {
                inner.owners.remove(&evicted_key);
            }
        }
        inner
            .owners
            .entry(key)
            .or_default()
            .insert(document.uri.clone());
    }

    /// Replace the stored markdown for a segment in place, without touching
    /// its timestamp or ownership. Used when re-normalization changed a hit.
    pub fn rewrite_segment(
        &self,
        config: &TranslationConfig,
        segment_text: &str,
        prompt_fp: &str,
        markdown: String,
    ) {
        let key = fingerprint::segment_fingerprint(segment_text, config, prompt_fp);
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.segments.peek_mut(&key) {
            entry.value.markdown = markdown;
        }
    }

    /// Drop everything a closed or invalidated document contributed:
    /// its document-tier entries (any version or config) and its ownership
    /// of segment entries, deleting each fingerprint that ends up orphaned.
    pub fn clear_for_document(&self, document_uri: &str) {
        let prefix = fingerprint::document_key_prefix(document_uri);
        let mut inner = self.inner.lock();

        let doc_keys: Vec<String> = inner
            .documents
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in doc_keys {
            inner.documents.pop(&key);
        }

        let mut orphaned = Vec::new();
        for (key, owners) in inner.owners.iter_mut() {
            owners.remove(document_uri);
            if owners.is_empty() {
                orphaned.push(key.clone());
            }
        }
        for key in orphaned {
            inner.owners.remove(&key);
            inner.segments.pop(&key);
        }
    }

    pub fn document_len(&self) -> usize {
        self.inner.lock().documents.len()
    }

    pub fn segment_len(&self) -> usize {
        self.inner.lock().segments.len()
    }
}
