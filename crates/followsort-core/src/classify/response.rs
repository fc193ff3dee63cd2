//! Two-stage handling of model output: `repair` never fails, `parse_verdicts`
//! is strict and raises `Error::AiResponse`.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::{errors::Error, Result};

/// One classification item as returned by the model, before vocabulary checks.
#[derive(Clone, Debug, PartialEq)]
pub struct Verdict {
    pub name: String,
    pub category: String,
    pub confidence: f64,
    pub reason: String,
}

fn reasoning_blocks() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<think>.*?</think>|<thinking>.*?</thinking>|<reasoning>.*?</reasoning>")
            .expect("valid regex")
    })
}

/// Best-effort cleanup of raw completion text.
///
/// Drops reasoning blocks and code fences, then keeps the span from the first
/// `{` to the last `}`. Input without such a span is returned trimmed.
pub fn repair(raw: &str) -> String {
    let without_reasoning = reasoning_blocks().replace_all(raw, "");
    let text = without_reasoning
        .replace("```json", "")
        .replace("```JSON", "")
        .replace("```", "");
    let text = text.trim();

    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => text[start..=end].to_string(),
        _ => text.to_string(),
    }
}

/// Validate repaired text into verdicts.
///
/// `name` and `category` are required on every item; `confidence` defaults to
/// 0 and is clamped into `[0, 1]`, `reason` defaults to empty.
pub fn parse_verdicts(text: &str) -> Result<Vec<Verdict>> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| Error::AiResponse(format!("response is not valid JSON: {e}")))?;

    let items = value
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::AiResponse("response has no `results` array".to_string()))?;

    items
        .iter()
        .enumerate()
        .map(|(idx, item)| parse_item(idx, item))
        .collect()
}

fn parse_item(idx: usize, item: &Value) -> Result<Verdict> {
    let obj = item
        .as_object()
        .ok_or_else(|| Error::AiResponse(format!("results[{idx}] is not an object")))?;

    let name = obj
        .get("name")
        .or_else(|| obj.get("uname"))
        .and_then(Value::as_str)
        .ok_or_else(|| Error::AiResponse(format!("results[{idx}] is missing `name`")))?;
    let category = obj
        .get("category")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::AiResponse(format!("results[{idx}] is missing `category`")))?;

    let confidence = match obj.get("confidence") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    let confidence = if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };

    let reason = obj
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(Verdict {
        name: name.to_string(),
        category: category.to_string(),
        confidence,
        reason,
    })
}
