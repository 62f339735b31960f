//! Lenient decoding of JSON-ish model output.
//!
//! [`repair`] is a single character scanner that normalizes the usual defects
//! of generated JSON: surrounding prose and code fences, bare keys,
//! single-quoted strings, trailing commas, `True`/`False`/`None` literals, raw control
//! characters and unescaped quotes inside string values.

use serde_json::Value;

/// Returns the body of the first fenced block, or `text` when there is none.
///
/// The language tag on the opening fence line is dropped. An unterminated
/// fence runs to the end of the text.
pub fn strip_fences(text: &str) -> &str {
    let Some(open) = text.find("```") else {
        return text;
    };
    let after = &text[open + 3..];
    let body = match after.find('\n') {
        Some(newline) if !after[..newline].trim().contains(' ') => &after[newline + 1..],
        _ => after,
    };
    match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    }
}

/// The span from the first opening brace or bracket to the last matching closer.
pub fn extract_json_span(text: &str) -> Option<&str> {
    let (start, closer) = match (text.find('{'), text.find('[')) {
        (Some(o), Some(a)) if a < o => (a, ']'),
        (Some(o), _) => (o, '}'),
        (None, Some(a)) => (a, ']'),
        (None, None) => return None,
    };
    let end = text.rfind(closer)?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Rewrites `text` into something `serde_json` is likely to accept.
///
/// Pure and total: any input yields a string, valid JSON or not.
pub fn repair(text: &str) -> String {
    let source = strip_fences(text);
    let span = extract_json_span(source).unwrap_or_else(|| source.trim());
    let chars: Vec<char> = span.chars().collect();
    let mut out = String::with_capacity(span.len() + 16);
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if let Some(q) = quote {
            match c {
                '\\' => match chars.get(i + 1) {
                    Some('\'') => {
                        out.push('\'');
                        i += 1;
                    }
                    Some(&next) => {
                        out.push('\\');
                        out.push(next);
                        i += 1;
                    }
                    None => out.push_str("\\\\"),
                },
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if c == q => {
                    if q == '"' && !closes_string(&chars, i + 1) {
                        out.push_str("\\\"");
                    } else {
                        out.push('"');
                        quote = None;
                    }
                }
                '"' => out.push_str("\\\""),
                c => out.push(c),
            }
            i += 1;
            continue;
        }

        match c {
            '"' | '\'' => {
                out.push('"');
                quote = Some(c);
            }
            ',' => {
                if !matches!(next_significant(&chars, i + 1), None | Some('}') | Some(']')) {
                    out.push(',');
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len() && is_word_char(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                if next_significant(&chars, i) == Some(':') {
                    out.push('"');
                    out.push_str(&word);
                    out.push('"');
                } else {
                    let literal = match word.as_str() {
                        "True" | "true" => "true",
                        "False" | "false" => "false",
                        "None" | "null" | "undefined" | "NaN" => "null",
                        other => other,
                    };
                    out.push_str(literal);
                }
                continue;
            }
            c => out.push(c),
        }
        i += 1;
    }

    if quote.is_some() {
        out.push('"');
    }
    out
}

/// Direct decode, then the extracted span, then the repaired text.
pub fn parse_tolerant(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    if let Some(span) = extract_json_span(strip_fences(trimmed)) {
        if let Ok(value) = serde_json::from_str(span) {
            return Some(value);
        }
    }
    serde_json::from_str(&repair(trimmed)).ok()
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '-'
}

fn next_significant(chars: &[char], from: usize) -> Option<char> {
    chars[from.min(chars.len())..]
        .iter()
        .copied()
        .find(|c| !c.is_whitespace())
}

/// A double quote closes its string only when followed by structure.
fn closes_string(chars: &[char], from: usize) -> bool {
    matches!(
        next_significant(chars, from),
        None | Some(',') | Some('}') | Some(']') | Some(':')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bare_keys_single_quotes_trailing_commas() {
        let fixed = repair("{name: 'todo', items: [1, 2, 3,],}");
        let value: Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(value, json!({"name": "todo", "items": [1, 2, 3]}));
    }

    #[test]
    fn test_capitalized_literals() {
        let value = parse_tolerant("{'done': True, 'owner': None, 'late': False}").unwrap();
        assert_eq!(value, json!({"done": true, "owner": null, "late": false}));
    }

    #[test]
    fn test_fenced_with_prose() {
        let raw = "Here is the plan:\n```json\n{\"a\": 1,}\n```\nLet me know!";
        assert_eq!(parse_tolerant(raw).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_inner_unescaped_quotes() {
        let raw = r#"{"description": "Show a "Hello" banner", "n": 1}"#;
        let value = parse_tolerant(raw).unwrap();
        assert_eq!(value["description"], "Show a \"Hello\" banner");
        assert_eq!(value["n"], 1);
    }

    #[test]
    fn test_raw_newlines_in_strings() {
        let raw = "{\"code\": \"line1\nline2\"}";
        let value = parse_tolerant(raw).unwrap();
        assert_eq!(value["code"], "line1\nline2");
    }

    #[test]
    fn test_escaped_apostrophe_in_single_quotes() {
        let value = parse_tolerant(r#"{'msg': 'it\'s fine'}"#).unwrap();
        assert_eq!(value["msg"], "it's fine");
    }

    #[test]
    fn test_valid_json_survives_repair() {
        let raw = r#"{"a": "x, y}", "b": [true, null]}"#;
        let repaired: Value = serde_json::from_str(&repair(raw)).unwrap();
        assert_eq!(repaired, serde_json::from_str::<Value>(raw).unwrap());
    }

    #[test]
    fn test_top_level_array() {
        let value = parse_tolerant("[{'type': 'create_file'},]").unwrap();
        assert_eq!(value, json!([{"type": "create_file"}]));
    }

    #[test]
    fn test_no_json_at_all() {
        assert_eq!(parse_tolerant("I could not produce a plan."), None);
    }

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_fences("```dart\nvoid main() {}\n```"), "void main() {}\n");
        assert_eq!(strip_fences("no fences"), "no fences");
        assert_eq!(strip_fences("```\n{}"), "{}");
    }
}
