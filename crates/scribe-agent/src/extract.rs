//! Pull code and JSON out of free-form completion replies

use regex::{Regex, RegexBuilder};
use scribe_core::{Result, ScribeError};
use serde::de::DeserializeOwned;

fn fenced_block(language_pattern: &str) -> Option<Regex> {
    RegexBuilder::new(&format!(r"```(?:{})[ \t]*\r?\n(.*?)```", language_pattern))
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .ok()
}

fn first_capture(re: Option<Regex>, text: &str) -> Option<String> {
    re?.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Extract code from a reply
///
/// Prefers the first fenced block tagged with one of `languages`, then the
/// first fenced block of any kind, then the whole reply trimmed.
pub fn extract_code(reply: &str, languages: &[&str]) -> String {
    if !languages.is_empty() {
        let tags = languages
            .iter()
            .map(|l| regex::escape(l))
            .collect::<Vec<_>>()
            .join("|");
        if let Some(code) = first_capture(fenced_block(&tags), reply) {
            return code;
        }
    }

    if let Some(code) = first_capture(fenced_block(r"[\w+#.-]*"), reply) {
        return code;
    }

    reply.trim().to_string()
}

/// Parse the JSON object carried by a reply
///
/// Accepts a bare object, an object inside a fenced block, or an object
/// surrounded by prose (first `{` to last `}`).
pub fn extract_json<T: DeserializeOwned>(reply: &str) -> Result<T> {
    let trimmed = reply.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    if let Some(block) = first_capture(fenced_block(r"json|"), reply) {
        if let Ok(value) = serde_json::from_str(&block) {
            return Ok(value);
        }
    }

    let candidate = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => {
            return Err(ScribeError::Completion(format!(
                "reply contains no JSON object: {}",
                preview(trimmed)
            )))
        }
    };

    serde_json::from_str(candidate).map_err(|e| {
        ScribeError::Completion(format!(
            "reply JSON did not match the expected shape ({}): {}",
            e,
            preview(trimmed)
        ))
    })
}

fn preview(text: &str) -> String {
    const MAX: usize = 120;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(MAX).collect::<String>())
    }
}
