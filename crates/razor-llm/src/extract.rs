//! Pulling structured payloads out of free-form generated text.

use razor_types::RazorError;
use serde::de::DeserializeOwned;

/// Returns the body of the first fenced code block in `text`, or the whole
/// text trimmed when no fence is present.
pub fn extract_code_block(text: &str) -> String {
    let Some(start) = text.find("```") else {
        return text.trim().to_string();
    };
    let after_fence = &text[start + 3..];
    // Skip the info string (language tag) up to the end of the line.
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(after_fence.len());
    let body = &after_fence[body_start..];
    match body.find("```") {
        Some(end) => body[..end].trim_end_matches(&['\n', '\r'][..]).to_string(),
        None => body.trim_end().to_string(),
    }
}

/// Parses a JSON document out of generated text. Accepts bare JSON, JSON
/// inside a fenced block, or JSON embedded in prose (outermost braces).
pub fn extract_json<T: DeserializeOwned>(stage: &str, text: &str) -> Result<T, RazorError> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    if trimmed.contains("```") {
        if let Ok(value) = serde_json::from_str(&extract_code_block(trimmed)) {
            return Ok(value);
        }
    }

    let embedded = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => {
            return Err(RazorError::MalformedOutput {
                stage: stage.to_string(),
                message: "no JSON object found in generated text".into(),
            })
        }
    };

    serde_json::from_str(embedded).map_err(|e| RazorError::MalformedOutput {
        stage: stage.to_string(),
        message: format!("invalid JSON: {e}"),
    })
}
