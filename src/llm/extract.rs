//! Deterministic repair pass for coercing a model completion into a JSON
//! object, used by the prefill protocol in [`crate::session`].

/// Strip markdown code fences around a JSON payload, if present.
pub(crate) fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        if let Some(end) = rest.rfind("```") {
            return rest[..end].trim();
        }
        return rest.trim();
    }
    if let Some(rest) = trimmed.strip_prefix("```") {
        if let Some(end) = rest.rfind("```") {
            let inner = rest[..end].trim();
            if inner.starts_with('{') {
                return inner;
            }
        }
    }
    trimmed
}

/// Find the span of the first balanced `{...}` object in `text`, tracking
/// string literals so a `}` inside a string doesn't close the object early.
fn balanced_object_span(text: &str) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, i + 1));
                }
            }
            _ => {}
        }
    }
    None
}

/// Strip trailing commentary after the last balanced `}`, and anything
/// before the first `{`.
fn strip_trailing_commentary(text: &str) -> &str {
    match balanced_object_span(text) {
        Some((start, end)) => &text[start..end],
        None => text,
    }
}

/// Escape stray, unescaped control characters (raw newlines/tabs) found
/// inside string literals — models sometimes emit literal newlines in a
/// multi-line `scratchpad` or `analysis` field, which is invalid JSON.
fn escape_control_chars_in_strings(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for ch in text.chars() {
        if in_string {
            if escaped {
                out.push(ch);
                escaped = false;
                continue;
            }
            match ch {
                '\\' => {
                    out.push(ch);
                    escaped = true;
                }
                '"' => {
                    out.push(ch);
                    in_string = false;
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                _ => out.push(ch),
            }
            continue;
        }
        if ch == '"' {
            in_string = true;
        }
        out.push(ch);
    }
    out
}

/// Attempt to parse `raw` (already prefixed with the prefill seed) as the
/// target type `T`, applying the repair pass on the first failure.
pub fn extract_and_repair<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, String> {
    if let Ok(value) = serde_json::from_str::<T>(raw) {
        return Ok(value);
    }

    let stripped = strip_fences(raw);
    let trimmed = strip_trailing_commentary(stripped);
    let repaired = escape_control_chars_in_strings(trimmed);

    serde_json::from_str::<T>(&repaired).map_err(|e| format!("{e}\nafter repair: {repaired}"))
}
