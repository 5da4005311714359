//! Markdown segmentation.
//! Splits a document into paragraph-like units that never cut through a
//! fenced code block, then optionally merges short units into
//! provider-sized batches.

use crate::config::TranslationConfig;

/// Thresholds for adaptive batching.
#[derive(Debug, Clone, Copy)]
pub struct BatchPolicy {
    /// Stop merging once a batch reaches this many chars.
    pub target_chars: usize,
    /// Never let a merge push a batch past this many chars.
    pub max_chars: usize,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            target_chars: crate::config::DEFAULT_BATCH_TARGET_CHARS,
            max_chars: crate::config::DEFAULT_BATCH_MAX_CHARS,
        }
    }
}

impl From<&TranslationConfig> for BatchPolicy {
    fn from(config: &TranslationConfig) -> Self {
        Self {
            target_chars: config.batch_target_chars,
            max_chars: config.batch_max_chars,
        }
    }
}

/// Split `text` into paragraph segments in source order.
/// A line starting with ``` toggles fence state; blank lines terminate the
/// current segment only outside a fence, so a fenced block (delimiters
/// included) always lands in one segment. An empty document yields no
/// segments.
pub fn segment_markdown(text: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut buffer: Vec<&str> = Vec::new();
    let mut in_fence = false;

    for line in text.lines() {
        if line.starts_with("```") {
            in_fence = !in_fence;
            buffer.push(line);
            continue;
        }
        if line.trim().is_empty() && !in_fence {
            flush(&mut buffer, &mut segments);
        } else {
            buffer.push(line);
        }
    }
    flush(&mut buffer, &mut segments);

    segments
}

fn flush(buffer: &mut Vec<&str>, segments: &mut Vec<String>) {
    if buffer.is_empty() {
        return;
    }
    let segment = buffer.join("\n");
    buffer.clear();
    if !segment.trim().is_empty() {
        segments.push(segment);
    }
}

/// Greedily merge consecutive short segments into batches.
/// Merging stops as soon as a batch reaches `target_chars`; a candidate that
/// would push the batch past `max_chars` flushes it first. Segments at or
/// above the target are emitted on their own.
pub fn merge_adaptive(segments: Vec<String>, policy: &BatchPolicy) -> Vec<String> {
    let mut merged = Vec::new();
    let mut batch = String::new();

    for segment in segments {
        let segment_chars = segment.chars().count();

        if segment_chars >= policy.target_chars {
            flush_batch(&mut batch, &mut merged);
            merged.push(segment);
            continue;
        }

        let batch_chars = batch.chars().count();
        let candidate_chars = if batch.is_empty() {
            segment_chars
        } else {
            batch_chars + 2 + segment_chars
        };

        if candidate_chars > policy.max_chars {
            flush_batch(&mut batch, &mut merged);
            batch = segment;
        } else {
            if !batch.is_empty() {
                batch.push_str("\n\n");
            }
            batch.push_str(&segment);
            if batch.chars().count() >= policy.target_chars {
                flush_batch(&mut batch, &mut merged);
            }
        }
    }
    flush_batch(&mut batch, &mut merged);

    merged
}

fn flush_batch(batch: &mut String, merged: &mut Vec<String>) {
    if !batch.is_empty() {
        merged.push(std::mem::take(batch));
    }
}
