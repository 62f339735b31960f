use crate::error::PromptError;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

const TASK_PLAN: &str = r#"You are planning changes to a Flutter project.

Task:
{{input.request}}

Current project files:
{{input.files}}

Routes already registered in {{input.entry_file}}:
{{input.routes}}

Project layout:
- {{input.entry_file}}: entry point (MaterialApp with initialRoute and named routes, MultiProvider for state)
- lib/screens/: screen widgets
- lib/widgets/: reusable widgets
- lib/models/: data models
- lib/providers/: state management providers
- lib/services/: business logic and API calls

Respond with a single JSON object of this shape and nothing else:
{
  "steps": [
    {"type": "create_file", "file_path": "lib/screens/example_screen.dart", "description": "what the file must contain"}
  ],
  "entryPointUpdate": {
    "imports_to_add": ["screens/example_screen.dart"],
    "routes_to_add": {"/example": "ExampleScreen()"},
    "initial_route": "/example",
    "providers_to_initialize": ["ChangeNotifierProvider(create: (_) => ExampleProvider())"]
  },
  "dependencies": [{"package_name": "provider", "version": "^6.1.2"}]
}

Rules:
1. "type" is one of create_file, update_file, delete_file.
2. Set initial_route only when the task introduces the home or landing screen. It must be a key of routes_to_add or an existing route.
3. Route widgets must match the classes created by the steps.
{{input.feedback?}}"#;

const PLAN_REVIEW: &str = r#"Review the task plan below, written for this request:
{{input.request}}

Plan:
{{input.plan}}

Improve only the step descriptions so each one says precisely what the file must contain.
Keep exactly the same steps, file paths, entryPointUpdate and dependencies.
Respond with the full plan as a single JSON object and nothing else."#;

const FILE_CONTENT: &str = r#"You are writing one file of a Flutter project.

Overall task: {{input.task}}
File: {{input.path}}
Instructions: {{input.description}}

Current content of the file (empty when the file is new):
{{input.existing}}

Project context:
{{input.context}}

Return the complete content of {{input.path}} in a single ```dart fenced block, followed by a one-line summary.
Do not redefine widgets that live in other files; import them instead."#;

const JSON_CORRECTION: &str = r#"The following text should have been {{input.expected}} encoded as JSON, but it does not parse:

{{input.text}}

Respond with only the corrected JSON. No explanations and no code fences."#;

const ENTRY_POINT_MERGE: &str = r#"Update the Flutter entry file {{input.path}}.
Add the following without removing or renaming anything that already exists.

Routes to add (route: widget constructor):
{{input.routes}}

Initial route: {{input.initial_route?}}

Providers to initialize, in this order:
{{input.providers}}

Current content:
{{input.content}}

Return the complete updated file in a single ```dart fenced block."#;

const STRUCTURAL_REPAIR: &str = r#"The Dart file {{input.path}} fails static analysis.

Diagnostics:
{{input.diagnostics}}

Current content:
{{input.content}}

Other project files for reference:
{{input.context}}

Fix the errors with minimal changes. Return the complete corrected file in a single ```dart fenced block."#;

/// Prompt templates by name, built in and optionally overridden from disk.
///
/// Templates use `{{input.path.to.value}}` placeholders (mandatory) and
/// `{{input.value?}}` (optional, removed when absent).
#[derive(Debug, Clone)]
pub struct PromptRegistry {
    templates: BTreeMap<String, String>,
}

impl Default for PromptRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptRegistry {
    pub fn builtin() -> Self {
        let templates = [
            ("task_plan", TASK_PLAN),
            ("plan_review", PLAN_REVIEW),
            ("file_content", FILE_CONTENT),
            ("json_correction", JSON_CORRECTION),
            ("entry_point_merge", ENTRY_POINT_MERGE),
            ("structural_repair", STRUCTURAL_REPAIR),
        ]
        .into_iter()
        .map(|(name, template)| (name.to_string(), template.to_string()))
        .collect();
        Self { templates }
    }

    /// Built-in templates, with `<dir>/<name>.yml` files replacing them by name.
    ///
    /// # Arguments
    /// * `dir` - Directory of overrides; a missing directory means no overrides
    pub fn load(dir: &Path) -> Result<Self, PromptError> {
        let mut registry = Self::builtin();
        if !dir.is_dir() {
            return Ok(registry);
        }

        let entries = fs::read_dir(dir).map_err(|e| {
            PromptError::InvalidTemplate(format!("Failed to read {}: {}", dir.display(), e))
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yml") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let content = fs::read_to_string(&path).map_err(|e| {
                PromptError::InvalidTemplate(format!("Failed to read {}: {}", path.display(), e))
            })?;
            let template = extract_template(&content)?;
            tracing::debug!(prompt = %name, "prompt overridden from {}", path.display());
            registry.templates.insert(name.to_string(), template);
        }
        Ok(registry)
    }

    pub fn template(&self, name: &str) -> Result<&str, PromptError> {
        self.templates
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| PromptError::UnknownPrompt(name.to_string()))
    }

    /// Fills the named template from a serializable input.
    pub fn render<T: Serialize>(&self, name: &str, input: &T) -> Result<String, PromptError> {
        let template = self.template(name)?;
        let input = serde_json::to_value(input)
            .map_err(|e| PromptError::InvalidTemplate(e.to_string()))?;
        fill_placeholders(template, &input)
    }
}

/// Replaces `{{input.a.b}}` / `{{input.a?}}` placeholders with values from `input`.
///
/// Strings are inserted verbatim, null as nothing, other values as JSON.
/// Inserted text is never scanned again.
pub fn fill_placeholders(template: &str, input: &Value) -> Result<String, PromptError> {
    let mut result = template.to_string();
    let mut offset = 0;

    while let Some(found) = result[offset..].find("{{") {
        let start = offset + found;
        let Some(end_pos) = result[start..].find("}}") else {
            break;
        };
        let end = start + end_pos;

        let placeholder = result[start + 2..end].trim();
        let (path, is_optional) = match placeholder.strip_suffix('?') {
            Some(path) => (path, true),
            None => (placeholder, false),
        };

        match resolve_path(input, path)? {
            Some(value) => {
                let replacement = match value {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    other => serde_json::to_string_pretty(other)
                        .map_err(|e| PromptError::InvalidTemplate(e.to_string()))?,
                };
                result.replace_range(start..end + 2, &replacement);
                offset = start + replacement.len();
            }
            None if is_optional => {
                result.replace_range(start..end + 2, "");
                offset = start;
            }
            None => return Err(PromptError::MissingPlaceholder(path.to_string())),
        }
    }

    Ok(result)
}

fn resolve_path<'a>(value: &'a Value, path: &str) -> Result<Option<&'a Value>, PromptError> {
    let mut parts = path.split('.');
    if parts.next() != Some("input") {
        return Err(PromptError::InvalidPlaceholderPath(path.to_string()));
    }

    let mut current = value;
    for part in parts {
        match current.get(part) {
            Some(v) => current = v,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Reads the `template` field of a prompt override file.
fn extract_template(yaml_content: &str) -> Result<String, PromptError> {
    use yaml_rust::YamlLoader;

    let docs = YamlLoader::load_from_str(yaml_content)
        .map_err(|e| PromptError::InvalidTemplate(format!("Invalid YAML: {}", e)))?;
    let Some(doc) = docs.first() else {
        return Err(PromptError::InvalidTemplate("Empty YAML document".to_string()));
    };

    doc["template"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| PromptError::InvalidTemplate("No template field found".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fill_nested_and_optional() {
        let input = json!({"name": "todo", "meta": {"owner": "ana"}});
        let out = fill_placeholders(
            "{{input.name}} by {{input.meta.owner}}{{input.note?}}!",
            &input,
        )
        .unwrap();
        assert_eq!(out, "todo by ana!");
    }

    #[test]
    fn test_fill_missing_mandatory() {
        let err = fill_placeholders("{{input.absent}}", &json!({})).unwrap_err();
        assert!(matches!(err, PromptError::MissingPlaceholder(p) if p == "input.absent"));
    }

    #[test]
    fn test_fill_invalid_path() {
        let err = fill_placeholders("{{output.x}}", &json!({})).unwrap_err();
        assert!(matches!(err, PromptError::InvalidPlaceholderPath(_)));
    }

    #[test]
    fn test_inserted_text_is_not_rescanned() {
        let input = json!({"code": "{{input.code}}"});
        assert_eq!(fill_placeholders("[{{input.code}}]", &input).unwrap(), "[{{input.code}}]");
    }

    #[test]
    fn test_builtin_templates_render() {
        let registry = PromptRegistry::builtin();
        let out = registry
            .render(
                "json_correction",
                &json!({"text": "{oops", "expected": "a task plan"}),
            )
            .unwrap();
        assert!(out.contains("{oops"));
        assert!(out.contains("a task plan"));
        assert!(matches!(
            registry.template("nope"),
            Err(PromptError::UnknownPrompt(_))
        ));
    }

    #[test]
    fn test_task_plan_template_feedback_is_optional() {
        let registry = PromptRegistry::builtin();
        let out = registry
            .render(
                "task_plan",
                &json!({"request": "add login", "files": "lib/main.dart", "routes": "/", "entry_file": "lib/main.dart"}),
            )
            .unwrap();
        assert!(out.contains("add login"));
        assert!(out.contains("\"entryPointUpdate\""));
    }

    #[test]
    fn test_load_overrides_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("json_correction.yml"),
            "template: |\n  Fix this: {{input.text}}\n",
        )
        .unwrap();
        let registry = PromptRegistry::load(dir.path()).unwrap();
        let out = registry
            .render("json_correction", &json!({"text": "{", "expected": "x"}))
            .unwrap();
        assert_eq!(out, "Fix this: {\n");
        assert!(registry.template("task_plan").is_ok());
    }

    #[test]
    fn test_extract_template_missing_field() {
        assert!(extract_template("name: x\n").is_err());
    }
}
