//! Provider reply normalization and error-message hygiene.
//! Chat models often wrap a whole reply in a Markdown code fence; that
//! wrapper is stripped unless the source segment was itself a lone fence.

use regex::Regex;

/// Display cap for sanitized provider error messages.
pub const MAX_MESSAGE_CHARS: usize = 180;

/// Fence tags that mean "this is just Markdown", not a real code language.
const MARKDOWN_TAGS: &[&str] = &[
    "", "markdown", "md", "mdx", "gfm", "commonmark", "plain", "text", "txt", "none",
];

/// Detects and unwraps replies wrapped in a single Markdown-like fence.
pub struct FenceNormalizer {
    open: Regex,
}

impl FenceNormalizer {
    pub fn new() -> Self {
        Self {
            // Opening fence line: ``` plus an optional language tag.
            open: Regex::new(r"^```([^`\n]*)$").unwrap(),
        }
    }

    /// True when `text` is exactly one fenced block: an opening fence line,
    /// a closing ``` line, and no other fence lines between or around them.
    pub fn is_single_fence(&self, text: &str) -> bool {
        let lines: Vec<&str> = text.trim().lines().collect();
        if lines.len() < 2 {
            return false;
        }
        let first = lines[0].trim_end();
        let last = lines[lines.len() - 1].trim();
        if !self.open.is_match(first) || last != "```" {
            return false;
        }
        lines[1..lines.len() - 1]
            .iter()
            .all(|line| !line.trim_start().starts_with("```"))
    }

    /// Strip a whole-reply fence whose tag is absent or Markdown-like.
    /// When the source segment was itself a lone fence the wrapping is
    /// legitimate provider output and is preserved verbatim.
    pub fn unwrap_reply(&self, reply: &str, source_was_fence: bool) -> String {
        if source_was_fence || !self.is_single_fence(reply) {
            return reply.to_string();
        }

        let trimmed = reply.trim();
        let lines: Vec<&str> = trimmed.lines().collect();
        let tag = self
            .open
            .captures(lines[0].trim_end())
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim())
            .unwrap_or("");

        if !is_markdown_tag(tag) {
            return reply.to_string();
        }

        lines[1..lines.len() - 1].join("\n")
    }
}

impl Default for FenceNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

fn is_markdown_tag(tag: &str) -> bool {
    let tag = tag.to_ascii_lowercase();
    MARKDOWN_TAGS.contains(&tag.as_str())
        || tag.contains("markdown")
        || tag.contains("commonmark")
        || tag.contains("gfm")
}

/// Sanitize an error message for inline display: collapse all whitespace
/// runs and cap the length.
pub fn sanitize_message(message: &str) -> String {
    let collapsed = message.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= MAX_MESSAGE_CHARS {
        return collapsed;
    }
    collapsed.chars().take(MAX_MESSAGE_CHARS).collect()
}
