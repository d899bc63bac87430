//! JSON parsing helpers for AI backend responses
//!
//! Models often wrap the JSON payload in extra text; these helpers pull out
//! the outermost object.

use crate::error::{Error, Result};

use super::AiCategory;

fn truncate(s: &str) -> String {
    match s.char_indices().nth(200) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Parse a category suggestion from an AI response
pub fn parse_category(response: &str) -> Result<AiCategory> {
    let response = response.trim();
    let start = response.find('{');
    let end = response.rfind('}');

    let parsed: AiCategory = match (start, end) {
        (Some(s), Some(e)) if s < e => {
            let json_str = &response[s..=e];
            serde_json::from_str(json_str).map_err(|e| {
                Error::InvalidData(format!(
                    "Invalid JSON from AI: {} | Raw: {}",
                    e,
                    truncate(json_str)
                ))
            })?
        }
        _ => {
            return Err(Error::InvalidData(format!(
                "No JSON found in AI response | Raw: {}",
                truncate(response)
            )))
        }
    };

    if parsed.category.trim().is_empty() {
        return Err(Error::InvalidData("AI returned an empty category".into()));
    }

    Ok(AiCategory {
        category: parsed.category.trim().to_string(),
        subcategory: parsed
            .subcategory
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        confidence: parsed.confidence,
    })
}
