//! Parsing helpers for model responses
//!
//! Models often wrap JSON in markdown fences or add stray text around it.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::{Insight, Priority};

/// Maximum insights kept from one response
pub const MAX_INSIGHTS: usize = 3;

/// Trim whitespace and a surrounding ```json / ``` fence
pub fn strip_code_fences(response: &str) -> &str {
    let mut text = response.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

#[derive(Debug, Deserialize)]
struct RawInsight {
    title: String,
    message: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    priority: String,
}

/// Parse a JSON array of insights, keeping at most `MAX_INSIGHTS`
///
/// Unknown priorities become `medium`; a missing category becomes `tip`.
pub fn parse_insights(response: &str) -> Result<Vec<Insight>> {
    let text = strip_code_fences(response);

    let start = text.find('[');
    let end = text.rfind(']');
    let json_str = match (start, end) {
        (Some(s), Some(e)) if s < e => &text[s..=e],
        _ => {
            return Err(Error::InvalidData(format!(
                "No JSON array found in AI response | Raw: {}",
                truncate(text, 200)
            )))
        }
    };

    let raw: Vec<RawInsight> = serde_json::from_str(json_str).map_err(|e| {
        Error::InvalidData(format!(
            "Invalid insight JSON from AI: {} | Raw: {}",
            e,
            truncate(json_str, 200)
        ))
    })?;

    Ok(raw
        .into_iter()
        .take(MAX_INSIGHTS)
        .map(|r| Insight {
            title: r.title.trim().to_string(),
            message: r.message.trim().to_string(),
            category: if r.category.trim().is_empty() {
                "tip".to_string()
            } else {
                r.category.trim().to_lowercase()
            },
            priority: Priority::parse_lossy(&r.priority),
        })
        .collect())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}...", s.chars().take(max).collect::<String>())
    } else {
        s.to_string()
    }
}
