//! Recovery of structured fix data from possibly-malformed LLM output.
//!
//! Models emit fenced blocks, bare newlines inside strings, array-valued
//! code fields and half-truncated objects. Four stages, in order:
//!
//! 1. parse the whole response as JSON;
//! 2. strip a ```json fence and parse the body;
//! 3. extract the first balanced `{…}` with a depth counter that respects
//!    string boundaries and escapes, then parse, then parse again after a
//!    string-content repair pass;
//! 4. regex out the individual fields and accept a partial object when at
//!    least one code field is non-empty.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

/// Normalized fix payload recovered from an LLM response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFix {
    pub original_code: String,
    pub fixed_code: String,
    pub description: String,
    pub commit_message: String,
}

impl RawFix {
    pub fn is_usable(&self) -> bool {
        !self.original_code.is_empty() || !self.fixed_code.is_empty()
    }
}

/// Run the full recovery pipeline. Returns `None` only when no stage
/// produced a usable payload.
pub fn parse_fix_response(response: &str) -> Option<RawFix> {
    // Stage 1: the whole response is JSON.
    if let Ok(value) = serde_json::from_str::<Value>(response.trim()) {
        if let Some(fix) = from_value(&value) {
            return Some(fix);
        }
    }

    // Stage 2: a fenced ```json block.
    if let Some(body) = extract_fenced_block(response) {
        if let Ok(value) = serde_json::from_str::<Value>(&body) {
            if let Some(fix) = from_value(&value) {
                return Some(fix);
            }
        }
    }

    // Stage 3: first balanced object, raw then repaired.
    if let Some(object) = extract_first_object(response) {
        if let Ok(value) = serde_json::from_str::<Value>(&object) {
            if let Some(fix) = from_value(&value) {
                return Some(fix);
            }
        }
        let repaired = repair_string_content(&object);
        if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
            if let Some(fix) = from_value(&value) {
                return Some(fix);
            }
        }

        // Stage 4: regex field extraction over the candidate object.
        if let Some(fix) = extract_fields(&object) {
            return Some(fix);
        }
    }

    // Stage 4 over the whole response when no object was found.
    extract_fields(response)
}

/// Pull the body out of a ``` / ```json fence.
fn extract_fenced_block(text: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"```(?:json)?\s*(\{[\s\S]*?\})\s*```").unwrap()
    });
    re.captures(text).map(|caps| caps[1].to_string())
}

/// Extract the first balanced `{…}`, tracking string boundaries and
/// escape characters so braces inside strings do not count.
pub fn extract_first_object(text: &str) -> Option<String> {
    let bytes: Vec<char> = text.chars().collect();
    let start = bytes.iter().position(|c| *c == '{')?;

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in bytes.iter().enumerate().skip(start) {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(bytes[start..=i].iter().collect());
                }
            }
            _ => {}
        }
    }
    None
}

/// Escape bare newlines and tabs inside quoted strings; drop carriage
/// returns. The most common malformation from models writing code into
/// JSON string values.
pub fn repair_string_content(json: &str) -> String {
    let mut result = String::with_capacity(json.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in json.chars() {
        if escaped {
            result.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => {
                result.push(c);
                escaped = true;
            }
            '"' => {
                result.push(c);
                in_string = !in_string;
            }
            '\n' if in_string => result.push_str("\\n"),
            '\r' if in_string => {}
            '\t' if in_string => result.push_str("\\t"),
            _ => result.push(c),
        }
    }
    result
}

/// Last resort: regex out each field individually.
fn extract_fields(text: &str) -> Option<RawFix> {
    let original_code = extract_code_field(text, "original_code");
    let fixed_code = extract_code_field(text, "fixed_code");
    let description = extract_string_field(text, "description");
    let commit_message = extract_string_field(text, "commit_message");

    let fix = RawFix {
        original_code: clean_code_string(&original_code.unwrap_or_default()),
        fixed_code: clean_code_string(&fixed_code.unwrap_or_default()),
        description: description.unwrap_or_default(),
        commit_message: commit_message.unwrap_or_default(),
    };

    if fix.is_usable() {
        Some(fix)
    } else {
        None
    }
}

fn extract_code_field(text: &str, field: &str) -> Option<String> {
    // String-valued: "field": "..." with escapes; array-valued: "field": [...]
    let string_re = Regex::new(&format!(
        r#""{field}"\s*:\s*"((?:[^"\\]|\\.)*)""#
    ))
    .ok()?;
    if let Some(caps) = string_re.captures(text) {
        return Some(caps[1].to_string());
    }

    let array_re = Regex::new(&format!(r#"(?s)"{field}"\s*:\s*\[(.*?)\]"#)).ok()?;
    if let Some(caps) = array_re.captures(text) {
        let joined = join_array_body(&caps[1]);
        return Some(joined);
    }
    None
}

fn extract_string_field(text: &str, field: &str) -> Option<String> {
    let re = Regex::new(&format!(r#""{field}"\s*:\s*"([^"]*)""#)).ok()?;
    re.captures(text).map(|caps| caps[1].to_string())
}

/// Join the contents of a JSON-ish string array with newlines.
fn join_array_body(body: &str) -> String {
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&format!("[{body}]")) {
        return items
            .iter()
            .map(value_to_line)
            .collect::<Vec<_>>()
            .join("\n");
    }
    // Fall back to stripping quotes per element.
    body.split(',')
        .map(|piece| piece.trim().trim_matches('"').to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

fn value_to_line(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Normalize any JSON value (string, array of lines, nested object) to a
/// code string.
pub fn normalize_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => {
            let trimmed = s.trim();
            // A string that itself encodes a JSON array of lines.
            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(trimmed) {
                    return items.iter().map(value_to_line).collect::<Vec<_>>().join("\n");
                }
            }
            s.clone()
        }
        Value::Array(items) => items.iter().map(value_to_line).collect::<Vec<_>>().join("\n"),
        Value::Object(map) => map
            .get("code")
            .or_else(|| map.get("text"))
            .map(normalize_to_string)
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}

/// Unescape JSON escape sequences left in extracted code and trim blank
/// edge lines, preserving interior structure.
pub fn clean_code_string(code: &str) -> String {
    if code.is_empty() {
        return String::new();
    }

    let mut unescaped = String::with_capacity(code.len());
    let mut chars = code.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some('n') => {
                    unescaped.push('\n');
                    chars.next();
                }
                Some('t') => {
                    unescaped.push('\t');
                    chars.next();
                }
                Some('"') => {
                    unescaped.push('"');
                    chars.next();
                }
                Some('\\') => {
                    unescaped.push('\\');
                    chars.next();
                }
                _ => unescaped.push(c),
            }
        } else {
            unescaped.push(c);
        }
    }

    let lines: Vec<&str> = unescaped.lines().collect();
    let start = lines.iter().position(|l| !l.trim().is_empty()).unwrap_or(0);
    let end = lines.iter().rposition(|l| !l.trim().is_empty()).map(|i| i + 1).unwrap_or(0);
    lines[start..end].join("\n")
}

/// Build a `RawFix` from a parsed JSON value.
fn from_value(value: &Value) -> Option<RawFix> {
    let object = value.as_object()?;

    let get = |key: &str| object.get(key).map(normalize_to_string).unwrap_or_default();

    let fix = RawFix {
        original_code: clean_code_string(&get("original_code")),
        fixed_code: clean_code_string(&get("fixed_code")),
        description: get("description"),
        commit_message: get("commit_message"),
    };

    if fix.is_usable() {
        Some(fix)
    } else {
        None
    }
}
