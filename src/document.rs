//! Document identity and snapshot types.
//! The core never owns document content; the host hands over a snapshot of
//! the text together with a stable URI and a monotonic version stamp.

/// Stable reference to a host document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentRef {
    /// Stable URI, unique per open document.
    pub uri: String,
    /// Monotonically increasing edit counter.
    pub version: u64,
    /// Workspace-relative path, for display and prompt interpolation.
    pub label: String,
}

impl DocumentRef {
    pub fn new(uri: impl Into<String>, version: u64, label: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            version,
            label: label.into(),
        }
    }

    /// Final path component of the label, e.g. `docs/guide.md` -> `guide.md`.
    pub fn file_name(&self) -> &str {
        self.label
            .rsplit(['/', '\\'])
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.label)
    }
}

/// A document reference paired with the full text read at request time.
#[derive(Debug, Clone)]
pub struct DocumentSnapshot {
    pub document: DocumentRef,
    pub text: String,
}

impl DocumentSnapshot {
    pub fn new(document: DocumentRef, text: impl Into<String>) -> Self {
        Self {
            document,
            text: text.into(),
        }
    }

    /// True when there is nothing to translate.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}
