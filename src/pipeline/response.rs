//! Response hygiene: turn raw model output into a typed JSON object.
//!
//! Even with a JSON response constraint, models occasionally wrap the object
//! in ` ```json ` fences, prefix it with a BOM, or add a sentence of prose
//! around it. These rules strip exactly that and nothing more; anything that
//! still fails to deserialise is reported as [`CallError::Malformed`].
//!
//! ## Rule Order
//!
//! 1. Strip outer code fences
//! 2. Remove invisible Unicode (BOM, zero-width spaces)
//! 3. Parse; on failure retry on the outermost `{ … }` span

use crate::error::CallError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;

/// Parse a model answer into `T`.
pub fn parse_json_object<T: DeserializeOwned>(raw: &str) -> Result<T, CallError> {
    let cleaned = remove_invisible_chars(&strip_code_fences(raw));
    let cleaned = cleaned.trim();

    match serde_json::from_str::<T>(cleaned) {
        Ok(v) => Ok(v),
        Err(first_err) => {
            if let Some(span) = outer_object_span(cleaned) {
                if span.len() < cleaned.len() {
                    if let Ok(v) = serde_json::from_str::<T>(span) {
                        return Ok(v);
                    }
                }
            }
            Err(CallError::Malformed {
                detail: format!("{first_err} (response began: {:?})", preview(cleaned)),
            })
        }
    }
}

// ── Rule 1: Strip outer code fences ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\s*\n(.*?)\n?```\s*$").unwrap());

fn strip_code_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 2: Remove invisible Unicode ─────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(['\u{200B}', '\u{FEFF}', '\u{200C}', '\u{200D}', '\u{2060}'], "")
}

// ── Rule 3: Outermost object span ────────────────────────────────────────────

fn outer_object_span(input: &str) -> Option<&str> {
    let start = input.find('{')?;
    let end = input.rfind('}')?;
    (end > start).then(|| &input[start..=end])
}

fn preview(s: &str) -> String {
    s.chars().take(60).collect()
}
