//! Stable content fingerprints for cache keys.
//! blake3 over a canonical JSON rendering (object keys sorted) so that
//! semantically identical inputs hash identically regardless of field order.

use serde::Serialize;
use serde_json::Value;

use crate::config::TranslationConfig;
use crate::document::DocumentRef;

/// Hex length of a rendered fingerprint.
const FINGERPRINT_LEN: usize = 16;

/// Fingerprint any serializable value.
pub fn fingerprint<T: Serialize>(value: &T) -> String {
    let value = serde_json::to_value(value).unwrap_or(Value::Null);
    let mut canonical = String::new();
    write_canonical(&value, &mut canonical);

    let mut hasher = blake3::Hasher::new();
    hasher.update(canonical.as_bytes());
    let hex = hasher.finalize().to_hex();
    hex[..FINGERPRINT_LEN].to_string()
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Normalize segment text before fingerprinting: CRLF to LF, trimmed.
pub fn normalize_segment_text(text: &str) -> String {
    text.replace("\r\n", "\n").trim().to_string()
}

/// Fingerprint of prompt instructions alone.
pub fn prompt_fingerprint(instructions: &str) -> String {
    #[derive(Serialize)]
    struct PromptInput<'a> {
        instructions: &'a str,
    }
    fingerprint(&PromptInput { instructions })
}

/// Hash of the configuration facets that partition translation results.
pub fn config_fingerprint(config: &TranslationConfig, prompt_fp: &str) -> String {
    #[derive(Serialize)]
    struct ConfigInput<'a> {
        api_base_url: &'a str,
        model: &'a str,
        target_language: &'a str,
        prompt: &'a str,
    }
    fingerprint(&ConfigInput {
        api_base_url: &config.api_base_url,
        model: &config.model,
        target_language: &config.target_language,
        prompt: prompt_fp,
    })
}

/// Document-tier cache key. Prefixed by the URI so per-document
/// invalidation can match on `uri@`.
pub fn document_cache_key(document: &DocumentRef, config: &TranslationConfig, prompt_fp: &str) -> String {
    format!(
        "{}@{}#{}",
        document.uri,
        document.version,
        config_fingerprint(config, prompt_fp)
    )
}

/// Prefix matching every document-tier key of `uri`, any version or config.
pub fn document_key_prefix(uri: &str) -> String {
    format!("{uri}@")
}

/// Segment-tier cache key. Deliberately excludes the document URI so an
/// identical paragraph in another file reuses the same entry.
pub fn segment_fingerprint(segment_text: &str, config: &TranslationConfig, prompt_fp: &str) -> String {
    #[derive(Serialize)]
    struct SegmentInput<'a> {
        text: String,
        model: &'a str,
        target_language: &'a str,
        api_base_url: &'a str,
        prompt: &'a str,
    }
    fingerprint(&SegmentInput {
        text: normalize_segment_text(segment_text),
        model: &config.model,
        target_language: &config.target_language,
        api_base_url: &config.api_base_url,
        prompt: prompt_fp,
    })
}
