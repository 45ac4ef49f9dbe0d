//! Structured output extraction
//!
//! Turns raw model text into a JSON object. Handles the usual ways models
//! wrap or damage JSON:
//! - markdown code fences (```json ... ```)
//! - trailing commas
//! - unclosed brackets from truncated output
//! - prose around the JSON body
//!
//! Anything still unparseable is a transient stage failure, so the caller
//! retries with a stricter instruction.

use serde_json::Value;
use tracing::debug;

use crate::types::{ForgeError, Result};

/// Parse a stage's raw model output into a JSON object.
pub fn extract_structured(raw: &str, stage: &str) -> Result<Value> {
    let cleaned = preprocess(raw);
    if cleaned.is_empty() {
        return Err(ForgeError::transient_stage(stage, "model returned empty output"));
    }

    let value = parse_or_repair(&cleaned).ok_or_else(|| {
        ForgeError::transient_stage(
            stage,
            format!(
                "unparseable structured output: {}...",
                cleaned.chars().take(120).collect::<String>()
            ),
        )
    })?;

    if !value.is_object() {
        return Err(ForgeError::transient_stage(
            stage,
            format!("expected a JSON object, got {}", kind(&value)),
        ));
    }
    Ok(value)
}

fn parse_or_repair(cleaned: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
        return Some(value);
    }

    debug!("Direct JSON parse failed, attempting repair");
    let repaired = balance_brackets(&strip_trailing_commas(cleaned));
    if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
        return Some(value);
    }

    let embedded = outermost_object(cleaned)?;
    serde_json::from_str::<Value>(&strip_trailing_commas(embedded)).ok()
}

fn preprocess(raw: &str) -> String {
    let mut s = raw.trim().trim_start_matches('\u{feff}').trim();

    if s.starts_with("```") {
        s = match s.find('\n') {
            Some(newline) => &s[newline + 1..],
            None => s.trim_start_matches('`'),
        };
    }
    if let Some(stripped) = s.trim_end().strip_suffix("```") {
        s = stripped;
    }

    s.trim().to_string()
}

/// Remove commas directly before `}` or `]`, outside of strings.
fn strip_trailing_commas(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escape = false;

    for (i, &ch) in chars.iter().enumerate() {
        if in_string {
            out.push(ch);
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        if ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        if ch == '"' {
            in_string = true;
        }
        out.push(ch);
    }
    out
}

/// Close an unterminated string and any open containers, innermost first.
fn balance_brackets(s: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escape = false;

    for ch in s.chars() {
        if escape {
            escape = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' if !in_string => stack.push('}'),
            '[' if !in_string => stack.push(']'),
            '}' | ']' if !in_string => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut out = s.to_string();
    if in_string {
        out.push('"');
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

/// First balanced `{...}` span in mixed content
fn outermost_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;

    for (i, ch) in s[start..].char_indices() {
        if escape {
            escape = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
