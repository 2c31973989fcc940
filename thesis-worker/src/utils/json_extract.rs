//! Pull JSON payloads out of free-form model output
//!
//! Generation services wrap JSON in code fences or prose. These helpers find
//! the first balanced object or array and parse it.

use serde::de::DeserializeOwned;

/// Parse the first JSON value of type `T` embedded in `text`
pub fn extract_json<T: DeserializeOwned>(text: &str) -> Option<T> {
    let trimmed = strip_code_fence(text);
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    for (start, open) in trimmed.char_indices().filter(|(_, c)| *c == '{' || *c == '[') {
        if let Some(end) = balanced_end(&trimmed[start..], open) {
            if let Ok(value) = serde_json::from_str(&trimmed[start..start + end]) {
                return Some(value);
            }
        }
    }
    None
}

fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Byte length of the balanced bracket group starting at `text[0]`
fn balanced_end(text: &str, open: char) -> Option<usize> {
    let close = if open == '{' { '}' } else { ']' };
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_fenced_json() {
        let text = "```json\n[{\"a\": 1}]\n```";
        let value: Value = extract_json(text).unwrap();
        assert_eq!(value[0]["a"], 1);
    }

    #[test]
    fn test_json_inside_prose() {
        let text = "Here are the defects: {\"defects\": [\"x ] y\"]} hope this helps";
        let value: Value = extract_json(text).unwrap();
        assert_eq!(value["defects"][0], "x ] y");
    }

    #[test]
    fn test_no_json() {
        assert!(extract_json::<Value>("nothing here").is_none());
    }
}
