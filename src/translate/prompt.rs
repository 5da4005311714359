//! Prompt resolution: workspace file, configured template, or built-in
//! default, in that priority order. The resolved instructions carry a
//! fingerprint so changing them invalidates cached segments.

use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use crate::fingerprint;

/// Built-in instructions. `{{targetLanguage}}` and `{{fileName}}` are
/// interpolated per request by the provider client.
pub const DEFAULT_INSTRUCTIONS: &str = "\
You are a professional technical translator. Translate the Markdown content \
from the file {{fileName}} into {{targetLanguage}}.

Rules:
- Preserve the Markdown structure exactly: headings, lists, tables, links, \
frontmatter, inline code and fenced code blocks stay as they are.
- Do not translate code, identifiers, URLs, or file paths. Comments inside \
code blocks may be translated.
- Keep the tone and register of the original text.
- Return the translated Markdown only, with no commentary.";

/// Where the instructions came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromptSource {
    Default,
    Configuration,
    WorkspaceFile,
}

impl PromptSource {
    pub fn as_str(self) -> &'static str {
        match self {
            PromptSource::Default => "default",
            PromptSource::Configuration => "configuration",
            PromptSource::WorkspaceFile => "workspace-file",
        }
    }
}

/// Resolved translation instructions plus provenance and fingerprint.
#[derive(Debug, Clone)]
pub struct TranslationPrompt {
    pub instructions: String,
    pub source: PromptSource,
    pub fingerprint: String,
}

impl TranslationPrompt {
    pub fn new(instructions: impl Into<String>, source: PromptSource) -> Self {
        let instructions = instructions.into();
        let fingerprint = fingerprint::prompt_fingerprint(&instructions);
        Self {
            instructions,
            source,
            fingerprint,
        }
    }

    /// The built-in prompt.
    pub fn built_in() -> Self {
        Self::new(DEFAULT_INSTRUCTIONS, PromptSource::Default)
    }

    /// Resolve instructions from the available sources. A workspace prompt
    /// file wins over a configured template, which wins over the built-in
    /// default; unreadable or blank sources fall through with a warning.
    pub fn resolve(configured: Option<&str>, workspace_file: Option<&Path>) -> Self {
        if let Some(path) = workspace_file {
            match std::fs::read_to_string(path) {
                Ok(text) if !text.trim().is_empty() => {
                    debug!(path = %path.display(), "using workspace prompt file");
                    return Self::new(text, PromptSource::WorkspaceFile);
                }
                Ok(_) => {
                    warn!(path = %path.display(), "workspace prompt file is empty, ignoring");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "workspace prompt file unreadable, ignoring");
                }
            }
        }

        if let Some(template) = configured {
            if !template.trim().is_empty() {
                return Self::new(template, PromptSource::Configuration);
            }
        }

        Self::built_in()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prompt_carries_placeholders() {
        let prompt = TranslationPrompt::built_in();
        assert!(prompt.instructions.contains("{{targetLanguage}}"));
        assert!(prompt.instructions.contains("{{fileName}}"));
        assert_eq!(prompt.source, PromptSource::Default);
    }

    #[test]
    fn configured_template_beats_default() {
        let prompt = TranslationPrompt::resolve(Some("Translate into {{targetLanguage}}."), None);
        assert_eq!(prompt.source, PromptSource::Configuration);
        assert_ne!(prompt.fingerprint, TranslationPrompt::built_in().fingerprint);
    }

    #[test]
    fn blank_template_falls_through_to_default() {
        let prompt = TranslationPrompt::resolve(Some("   "), None);
        assert_eq!(prompt.source, PromptSource::Default);
    }

    #[test]
    fn workspace_file_beats_configured_template() {
        let dir = std::env::temp_dir().join("lingomark-prompt-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("prompt.md");
        std::fs::write(&path, "Workspace instructions.").unwrap();

        let prompt = TranslationPrompt::resolve(Some("configured"), Some(&path));
        assert_eq!(prompt.source, PromptSource::WorkspaceFile);
        assert_eq!(prompt.instructions, "Workspace instructions.");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_workspace_file_falls_through() {
        let path = std::env::temp_dir().join("lingomark-prompt-test-does-not-exist.md");
        let prompt = TranslationPrompt::resolve(Some("configured"), Some(&path));
        assert_eq!(prompt.source, PromptSource::Configuration);
    }

    #[test]
    fn fingerprint_tracks_instruction_content() {
        let a = TranslationPrompt::new("one", PromptSource::Configuration);
        let b = TranslationPrompt::new("one", PromptSource::WorkspaceFile);
        let c = TranslationPrompt::new("two", PromptSource::Configuration);
        // Provenance does not partition the cache, content does.
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.fingerprint, c.fingerprint);
    }
}
