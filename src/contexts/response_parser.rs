use crate::contexts::tolerant_json::parse_tolerant;
use crate::data::TextGenerator;
use crate::error::EngineError;
use crate::registries::PromptRegistry;
use serde::Serialize;
use serde_json::Value;

/// Code (or file content) plus the free-text summary around it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeResponse {
    pub content: String,
    pub summary: String,
}

/// What a raw completion turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedResponse {
    Code(CodeResponse),
    List(Vec<Value>),
}

/// Types a raw completion without any collaborator call.
///
/// A JSON object with `code`/`summary` or a bare JSON list is returned as is.
/// Otherwise the text between the first and last code fence is the code and
/// the text after the last fence (or else before the first) is the summary.
/// Text with no fence at all is taken as code.
pub fn parse(raw: &str) -> ParsedResponse {
    let trimmed = raw.trim();
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(items)) => return ParsedResponse::List(items),
        Ok(Value::Object(map)) if map.contains_key("code") || map.contains_key("summary") => {
            let content = map.get("code").and_then(Value::as_str).unwrap_or_default();
            let summary = match map.get("summary") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            return ParsedResponse::Code(CodeResponse {
                content: content.to_string(),
                summary,
            });
        }
        _ => {}
    }

    ParsedResponse::Code(split_fenced(trimmed))
}

/// Like [`parse`], but always yields code; a bare list becomes its JSON text.
pub fn extract_code(raw: &str) -> CodeResponse {
    match parse(raw) {
        ParsedResponse::Code(code) => code,
        ParsedResponse::List(_) => CodeResponse {
            content: raw.trim().to_string(),
            summary: String::new(),
        },
    }
}

fn split_fenced(text: &str) -> CodeResponse {
    let (Some(first), Some(last)) = (text.find("```"), text.rfind("```")) else {
        return CodeResponse {
            content: text.to_string(),
            summary: String::new(),
        };
    };

    let before = text[..first].trim();
    if first == last {
        return CodeResponse {
            content: drop_language_tag(&text[first + 3..]).trim().to_string(),
            summary: before.to_string(),
        };
    }

    let content = drop_language_tag(&text[first + 3..last]).trim().to_string();
    let after = text[last + 3..].trim();
    let summary = if after.is_empty() { before } else { after };
    CodeResponse {
        content,
        summary: summary.to_string(),
    }
}

fn drop_language_tag(block: &str) -> &str {
    match block.find('\n') {
        Some(newline) => {
            let tag = block[..newline].trim();
            if tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '+' || c == '-') {
                &block[newline + 1..]
            } else {
                block
            }
        }
        None => block,
    }
}

#[derive(Serialize)]
struct CorrectionInput<'a> {
    text: &'a str,
    expected: &'a str,
}

/// Parser with the collaborator-backed correction path for strict JSON callers.
pub struct ResponseParser<G: TextGenerator> {
    generator: G,
    prompts: PromptRegistry,
}

impl<G: TextGenerator> ResponseParser<G> {
    pub fn new(generator: G, prompts: PromptRegistry) -> Self {
        Self { generator, prompts }
    }

    /// Decodes a JSON object or list, asking the generator once to correct it if needed.
    ///
    /// # Arguments
    /// * `raw` - The completion text
    /// * `expected` - Short description of the expected shape, quoted in the correction prompt
    ///
    /// # Returns
    /// `EngineError::MalformedResponse` when the corrected text still does not decode.
    pub fn parse_object(&self, raw: &str, expected: &str) -> Result<Value, EngineError> {
        if let Some(value) = decode_structured(raw) {
            return Ok(value);
        }

        tracing::warn!(chars = raw.len(), "response is not valid JSON, requesting correction");
        let prompt = self.prompts.render(
            "json_correction",
            &CorrectionInput {
                text: raw,
                expected,
            },
        )?;
        let corrected = self.generator.generate(&prompt).map_err(|e| {
            EngineError::MalformedResponse(format!("correction request failed: {}", e))
        })?;

        decode_structured(&corrected.text).ok_or_else(|| {
            EngineError::MalformedResponse(format!(
                "no JSON object found after correction: {}",
                preview(&corrected.text)
            ))
        })
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }
}

fn decode_structured(text: &str) -> Option<Value> {
    parse_tolerant(text).filter(|v| v.is_object() || v.is_array())
}

fn preview(text: &str) -> String {
    let mut end = text.len().min(120);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Completion;
    use crate::error::ServiceError;
    use serde_json::json;
    use std::cell::RefCell;

    struct Scripted {
        replies: RefCell<Vec<String>>,
        prompts: RefCell<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: RefCell::new(replies.iter().rev().map(|s| s.to_string()).collect()),
                prompts: RefCell::new(Vec::new()),
            }
        }
    }

    impl TextGenerator for Scripted {
        fn generate(&self, prompt: &str) -> Result<Completion, ServiceError> {
            self.prompts.borrow_mut().push(prompt.to_string());
            self.replies
                .borrow_mut()
                .pop()
                .map(Completion::new)
                .ok_or(ServiceError::Empty)
        }
    }

    #[test]
    fn test_parse_code_object() {
        let parsed = parse(r#"{"code": "void main() {}", "summary": "entry"}"#);
        assert_eq!(
            parsed,
            ParsedResponse::Code(CodeResponse {
                content: "void main() {}".to_string(),
                summary: "entry".to_string()
            })
        );
    }

    #[test]
    fn test_parse_structured_summary_is_serialized() {
        let parsed = parse(r#"{"code": "x", "summary": {"changed": 2}}"#);
        let ParsedResponse::Code(code) = parsed else {
            panic!("expected code");
        };
        assert_eq!(code.summary, r#"{"changed":2}"#);
    }

    #[test]
    fn test_parse_bare_list() {
        assert_eq!(parse("[1, 2]"), ParsedResponse::List(vec![json!(1), json!(2)]));
    }

    #[test]
    fn test_parse_fenced_with_trailing_summary() {
        let raw = "Sure!\n```dart\nclass A {}\n```\nAdded class A.";
        let code = extract_code(raw);
        assert_eq!(code.content, "class A {}");
        assert_eq!(code.summary, "Added class A.");
    }

    #[test]
    fn test_parse_fenced_summary_falls_back_to_leading_text() {
        let code = extract_code("Here is the widget:\n```\nclass B {}\n```");
        assert_eq!(code.content, "class B {}");
        assert_eq!(code.summary, "Here is the widget:");
    }

    #[test]
    fn test_parse_unfenced_is_code() {
        let code = extract_code("  class C {}\n");
        assert_eq!(code.content, "class C {}");
        assert!(code.summary.is_empty());
    }

    #[test]
    fn test_parse_object_without_correction() {
        let generator = Scripted::new(&[]);
        let parser = ResponseParser::new(&generator, PromptRegistry::builtin());
        let value = parser.parse_object("{steps: [],}", "a task plan").unwrap();
        assert_eq!(value, json!({"steps": []}));
        assert!(generator.prompts.borrow().is_empty());
    }

    #[test]
    fn test_parse_object_uses_correction_once() {
        let generator = Scripted::new(&[r#"{"steps": [1]}"#]);
        let parser = ResponseParser::new(&generator, PromptRegistry::builtin());
        let value = parser.parse_object("I think the plan is good", "a task plan").unwrap();
        assert_eq!(value, json!({"steps": [1]}));
        let prompts = generator.prompts.borrow();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("I think the plan is good"));
    }

    #[test]
    fn test_parse_object_correction_failure_is_malformed() {
        let generator = Scripted::new(&["still not json"]);
        let parser = ResponseParser::new(&generator, PromptRegistry::builtin());
        let err = parser.parse_object("nope", "a task plan").unwrap_err();
        assert!(matches!(err, EngineError::MalformedResponse(_)));
    }

    #[test]
    fn test_parse_object_service_failure_is_malformed() {
        let generator = Scripted::new(&[]);
        let parser = ResponseParser::new(&generator, PromptRegistry::builtin());
        let err = parser.parse_object("nope", "a task plan").unwrap_err();
        assert!(matches!(err, EngineError::MalformedResponse(_)));
    }
}
