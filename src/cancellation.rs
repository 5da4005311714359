//! Cancellation framework: CancellationToken + per-document run registry.
//! Starting a run for a document supersedes the previous one, so a stale
//! run can never write results over a newer preview.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Token and generation for one in-flight document run.
#[derive(Debug, Clone)]
pub struct RunGuard {
    token: CancellationToken,
    generation: u64,
}

impl RunGuard {
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

struct ActiveRun {
    token: CancellationToken,
    generation: u64,
}

/// Tracks the in-flight run per document key.
pub struct RunRegistry {
    runs: Mutex<HashMap<String, ActiveRun>>,
    generation: AtomicU64,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self {
            runs: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Begin a run for `document_uri`, cancelling any run already in flight
    /// for the same key. The returned guard's token is a child of
    /// `external`, so host-side cancellation propagates into the run.
    pub fn begin(&self, document_uri: &str, external: &CancellationToken) -> RunGuard {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = external.child_token();

        let mut runs = self.runs.lock();
        if let Some(previous) = runs.insert(
            document_uri.to_string(),
            ActiveRun {
                token: token.clone(),
                generation,
            },
        ) {
            previous.token.cancel();
            tracing::debug!(
                uri = document_uri,
                superseded = previous.generation,
                generation,
                "superseding in-flight run"
            );
        }

        RunGuard { token, generation }
    }

    /// Cancel and forget the in-flight run for a document (preview or
    /// document closed).
    pub fn cancel(&self, document_uri: &str) {
        if let Some(run) = self.runs.lock().remove(document_uri) {
            run.token.cancel();
            tracing::debug!(uri = document_uri, generation = run.generation, "run cancelled");
        }
    }

    /// Drop registry state for a finished run. A newer run for the same key
    /// is left untouched.
    pub fn finish(&self, document_uri: &str, generation: u64) {
        let mut runs = self.runs.lock();
        if runs
            .get(document_uri)
            .is_some_and(|run| run.generation == generation)
        {
            runs.remove(document_uri);
        }
    }

    /// Number of runs currently tracked.
    pub fn active(&self) -> usize {
        self.runs.lock().len()
    }
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new()
    }
}
