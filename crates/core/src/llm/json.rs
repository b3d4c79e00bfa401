use crate::domain::contract::LlmEquityAnalysis;
use crate::domain::equity::{EquityProfile, ProfileOrigin};
use anyhow::Context;

pub const MAX_COMMENTARY_CHARS: usize = 1200;

pub fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        let inner = strip_fences(trimmed).trim();
        if inner.starts_with('{') {
            return Some(inner.to_string());
        }
    }

    // Greedy span: first '{' to last '}'.
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(trimmed[start..=end].trim().to_string())
}

/// Drops a leading ```lang line and the trailing ``` if present.
fn strip_fences(text: &str) -> &str {
    let mut inner = text;
    if let Some(after_first) = inner.split_once('\n').map(|(_, rest)| rest) {
        inner = after_first;
    } else {
        inner = inner.trim_start_matches('`');
    }
    if let Some(end) = inner.rfind("```") {
        inner = &inner[..end];
    }
    inner
}

pub fn parse_profile(
    text: &str,
    default_as_of_date: chrono::NaiveDate,
    origin: ProfileOrigin,
) -> anyhow::Result<EquityProfile> {
    let json_str = extract_json(text).unwrap_or_else(|| text.trim().to_string());
    let parsed = serde_json::from_str::<LlmEquityAnalysis>(&json_str)
        .with_context(|| format!("LLM output is not valid JSON for analysis schema: {json_str}"))?;
    parsed.validate_and_into_profile(default_as_of_date, origin)
}

/// Normalizes free-text commentary. Returns `None` when nothing usable is left.
pub fn clean_commentary(text: &str) -> Option<String> {
    let trimmed = text.trim();
    let body = if trimmed.starts_with("```") {
        strip_fences(trimmed).trim()
    } else {
        trimmed
    };
    if body.is_empty() {
        return None;
    }

    match body.char_indices().nth(MAX_COMMENTARY_CHARS) {
        Some((cut, _)) => Some(format!("{}…", body[..cut].trim_end())),
        None => Some(body.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 15).unwrap()
    }

    fn analysis_text() -> String {
        json!({
            "ticker": "TSM",
            "name": "Taiwan Semiconductor",
            "price": 180.0,
            "thesis": "Leading-edge foundry share keeps rising.",
            "scenarios": [
                {"case": "base", "cagr": 0.14, "price_target": 265.0, "probability": 1.0}
            ],
            "verdict": {"stance": "buy", "summary": "Core holding."}
        })
        .to_string()
    }

    #[test]
    fn extract_json_handles_fenced_blocks() {
        let body = "{\"a\":1}";
        let fenced = format!("```json\n{body}\n```\n");
        assert_eq!(extract_json(&fenced), Some(body.to_string()));
    }

    #[test]
    fn extract_json_handles_single_line_fence() {
        assert_eq!(
            extract_json("```json{\"a\":1}```"),
            Some("{\"a\":1}".to_string())
        );
        assert_eq!(
            extract_json("```\nSure thing: {\"a\":1}\n```"),
            Some("{\"a\":1}".to_string())
        );
    }

    #[test]
    fn extract_json_falls_back_to_braces() {
        let s = "Here you go: {\"a\":{\"b\":2}} hope this helps";
        assert_eq!(extract_json(s), Some("{\"a\":{\"b\":2}}".to_string()));
    }

    #[test]
    fn extract_json_rejects_text_without_object() {
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("} backwards {"), None);
    }

    #[test]
    fn parse_profile_accepts_prose_wrapped_json() {
        let text = format!("Sure! Analysis below.\n{}\nLet me know.", analysis_text());
        let p = parse_profile(&text, as_of(), ProfileOrigin::Curated).unwrap();
        assert_eq!(p.ticker, "TSM");
        assert_eq!(p.scenarios.len(), 1);
        assert_eq!(p.verdict.conviction, 0.5);
    }

    #[test]
    fn parse_profile_rejects_truncated_json() {
        let text = analysis_text();
        let cut = &text[..text.len() / 2];
        assert!(parse_profile(cut, as_of(), ProfileOrigin::Curated).is_err());
    }

    #[test]
    fn clean_commentary_strips_fences_and_blank() {
        assert_eq!(
            clean_commentary("```\nMargins look stretched.\n```"),
            Some("Margins look stretched.".to_string())
        );
        assert_eq!(clean_commentary("   \n "), None);
    }

    #[test]
    fn clean_commentary_truncates_on_char_boundary() {
        let long = "é".repeat(MAX_COMMENTARY_CHARS + 10);
        let out = clean_commentary(&long).unwrap();
        assert_eq!(out.chars().count(), MAX_COMMENTARY_CHARS + 1);
        assert!(out.ends_with('…'));
    }
}
