//! Task plan schema enforcement.
//!
//! Canonical shape:
//!
//! ```json
//! {
//!   "steps": [{"type": "create_file", "file_path": "...", "description": "..."}],
//!   "entryPointUpdate": {
//!     "imports_to_add": [], "routes_to_add": {}, "initial_route": null,
//!     "providers_to_initialize": []
//!   },
//!   "dependencies": [{"package_name": "http", "version": "^1.0.0"}]
//! }
//! ```
//!
//! `update_main_dart` is accepted in place of `entryPointUpdate`.

use crate::contexts::project_state::{is_safe_relative_path, normalize_path};
use crate::data::{DependencyDeclaration, EntryPointUpdate, FileOperation, OperationType, TaskPlan};
use crate::error::ValidationError;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

pub const ENTRY_POINT_KEY: &str = "entryPointUpdate";
const ENTRY_POINT_ALIASES: &[&str] = &["update_main_dart"];

/// Validates and normalizes a decoded plan.
///
/// Either every rule holds and a complete [`TaskPlan`] comes back, or a
/// [`ValidationError`] does. Nothing is partially populated.
pub fn validate(plan: &Value) -> Result<TaskPlan, ValidationError> {
    let object = plan.as_object().ok_or(ValidationError::NotAnObject)?;

    let steps = object.get("steps").ok_or(ValidationError::MissingKey("steps"))?;
    let entry = entry_point_value(object).ok_or(ValidationError::MissingKey(ENTRY_POINT_KEY))?;
    let dependencies = object
        .get("dependencies")
        .ok_or(ValidationError::MissingKey("dependencies"))?;

    Ok(TaskPlan {
        steps: validate_steps(steps)?,
        entry_point_update: validate_entry_point(entry)?,
        dependencies: validate_dependencies(dependencies)?,
    })
}

/// Checks that the initial route, if any, will exist once the plan is applied.
///
/// # Arguments
/// * `plan` - A plan that already passed [`validate`]
/// * `existing_routes` - Route keys currently registered in the entry file
pub fn check_initial_route(
    plan: &TaskPlan,
    existing_routes: &BTreeSet<String>,
) -> Result<(), ValidationError> {
    let update = &plan.entry_point_update;
    match &update.initial_route {
        Some(route)
            if !update.routes_to_add.contains_key(route) && !existing_routes.contains(route) =>
        {
            Err(ValidationError::UnknownInitialRoute(route.clone()))
        }
        _ => Ok(()),
    }
}

fn entry_point_value(object: &Map<String, Value>) -> Option<&Value> {
    object.get(ENTRY_POINT_KEY).or_else(|| {
        ENTRY_POINT_ALIASES
            .iter()
            .find_map(|alias| object.get(*alias))
    })
}

fn validate_steps(steps: &Value) -> Result<Vec<FileOperation>, ValidationError> {
    let items = steps.as_array().ok_or_else(|| wrong_type("steps", "a list"))?;
    if items.is_empty() {
        return Err(ValidationError::EmptySteps);
    }

    items
        .iter()
        .enumerate()
        .map(|(index, item)| validate_step(index, item))
        .collect()
}

fn validate_step(index: usize, item: &Value) -> Result<FileOperation, ValidationError> {
    let step = item
        .as_object()
        .ok_or_else(|| wrong_type(&format!("steps[{}]", index), "an object"))?;

    let kind_text = non_empty_str(step, "type").ok_or(ValidationError::MissingStepField {
        index,
        field: "type",
    })?;
    let kind = OperationType::parse(kind_text).ok_or_else(|| ValidationError::InvalidStepType {
        index,
        found: kind_text.to_string(),
    })?;

    let raw_path = non_empty_str(step, "file_path").ok_or(ValidationError::MissingStepField {
        index,
        field: "file_path",
    })?;
    let file_path = normalize_path(raw_path);
    if !is_safe_relative_path(&file_path) {
        return Err(ValidationError::UnsafeStepPath {
            index,
            path: raw_path.to_string(),
        });
    }

    let description = non_empty_str(step, "description").ok_or(
        ValidationError::MissingStepField {
            index,
            field: "description",
        },
    )?;

    Ok(FileOperation {
        kind,
        file_path,
        description: description.trim().to_string(),
    })
}

/// Validates an entry point update on its own, as found under [`ENTRY_POINT_KEY`].
pub fn validate_entry_point(value: &Value) -> Result<EntryPointUpdate, ValidationError> {
    let object = match value {
        Value::Null => return Ok(EntryPointUpdate::default()),
        Value::Object(object) => object,
        _ => return Err(wrong_type(ENTRY_POINT_KEY, "an object")),
    };

    let mut imports_to_add: Vec<String> = Vec::new();
    for import in string_list(object.get("imports_to_add"), "imports_to_add")? {
        if !imports_to_add.contains(&import) {
            imports_to_add.push(import);
        }
    }

    let routes_to_add = route_map(object.get("routes_to_add"))?;

    let initial_route = match object.get("initial_route") {
        None | Some(Value::Null) => None,
        Some(Value::String(route)) if route.trim().is_empty() => None,
        Some(Value::String(route)) => Some(route.trim().to_string()),
        Some(_) => return Err(wrong_type("initial_route", "a string or null")),
    };

    let providers = object
        .get("providers_to_initialize")
        .or_else(|| object.get("providers_to_add"));
    let providers_to_initialize = string_list(providers, "providers_to_initialize")?;

    Ok(EntryPointUpdate {
        imports_to_add,
        routes_to_add,
        initial_route,
        providers_to_initialize,
    })
}

/// Accepts `{"/route": "Widget()"}` or `[{"route": "/route", "widget": "Widget()"}]`.
fn route_map(value: Option<&Value>) -> Result<BTreeMap<String, String>, ValidationError> {
    let mut routes = BTreeMap::new();
    match value {
        None | Some(Value::Null) => {}
        Some(Value::Object(map)) => {
            for (route, constructor) in map {
                let constructor = constructor
                    .as_str()
                    .ok_or_else(|| wrong_type(&format!("routes_to_add.{}", route), "a string"))?;
                routes.insert(route.trim().to_string(), constructor.trim().to_string());
            }
        }
        Some(Value::Array(items)) => {
            for item in items {
                let route = item.get("route").and_then(Value::as_str);
                let widget = item.get("widget").and_then(Value::as_str);
                let (Some(route), Some(widget)) = (route, widget) else {
                    return Err(wrong_type("routes_to_add", "a map of route to widget"));
                };
                routes.insert(route.trim().to_string(), widget.trim().to_string());
            }
        }
        Some(_) => return Err(wrong_type("routes_to_add", "a map of route to widget")),
    }
    Ok(routes)
}

fn validate_dependencies(value: &Value) -> Result<Vec<DependencyDeclaration>, ValidationError> {
    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        _ => return Err(wrong_type("dependencies", "a list")),
    };

    let mut declarations: Vec<DependencyDeclaration> = Vec::new();
    for (index, item) in items.iter().enumerate() {
        let declaration = match item {
            Value::String(spec) => DependencyDeclaration::parse(spec),
            Value::Object(object) => {
                let name = ["package_name", "package", "name"]
                    .iter()
                    .find_map(|key| non_empty_str(object, key));
                let version = non_empty_str(object, "version")
                    .unwrap_or(DependencyDeclaration::ANY_VERSION);
                name.and_then(|n| DependencyDeclaration::parse(n))
                    .map(|d| DependencyDeclaration::new(d.name, version.trim()))
            }
            _ => None,
        }
        .ok_or_else(|| wrong_type(&format!("dependencies[{}]", index), "a package declaration"))?;

        match declarations.iter_mut().find(|d| d.name == declaration.name) {
            Some(existing) => existing.version = declaration.version,
            None => declarations.push(declaration),
        }
    }
    Ok(declarations)
}

fn string_list(value: Option<&Value>, key: &str) -> Result<Vec<String>, ValidationError> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(|s| s.trim().to_string())
                    .ok_or_else(|| wrong_type(key, "a list of strings"))
            })
            .filter(|item| !matches!(item, Ok(s) if s.is_empty()))
            .collect(),
        Some(_) => Err(wrong_type(key, "a list of strings")),
    }
}

fn non_empty_str<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    object
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn wrong_type(key: &str, expected: &'static str) -> ValidationError {
    ValidationError::WrongType {
        key: key.to_string(),
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "steps": [
                {"type": "create_file", "file_path": "lib/screens/todo_screen.dart", "description": "Todo list screen"},
                {"type": "delete", "file_path": "./lib/old.dart", "description": "Remove old screen"}
            ],
            "entryPointUpdate": {
                "imports_to_add": ["screens/todo_screen.dart", "screens/todo_screen.dart"],
                "routes_to_add": {"/todo": "TodoScreen()"},
                "initial_route": "/todo"
            },
            "dependencies": [
                {"package_name": "provider", "version": "^6.1.2"},
                "http: ^1.2.0",
                "intl"
            ]
        })
    }

    #[test]
    fn test_validate_normalizes() {
        let plan = validate(&sample()).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[1].kind, OperationType::DeleteFile);
        assert_eq!(plan.steps[1].file_path, "lib/old.dart");
        assert_eq!(plan.entry_point_update.imports_to_add, vec!["screens/todo_screen.dart"]);
        assert_eq!(plan.entry_point_update.initial_route.as_deref(), Some("/todo"));
        assert!(plan.entry_point_update.providers_to_initialize.is_empty());
        assert_eq!(
            plan.dependencies,
            vec![
                DependencyDeclaration::new("provider", "^6.1.2"),
                DependencyDeclaration::new("http", "^1.2.0"),
                DependencyDeclaration::new("intl", "any"),
            ]
        );
    }

    #[test]
    fn test_missing_top_level_keys_fail() {
        for key in ["steps", "entryPointUpdate", "dependencies"] {
            let mut value = sample();
            value.as_object_mut().unwrap().remove(key);
            let err = validate(&value).unwrap_err();
            assert!(matches!(err, ValidationError::MissingKey(_)), "{key}: {err}");
        }
        assert_eq!(validate(&json!([1])), Err(ValidationError::NotAnObject));
        assert_eq!(validate(&json!("plan")), Err(ValidationError::NotAnObject));
    }

    #[test]
    fn test_alias_key_is_accepted() {
        let mut value = sample();
        let object = value.as_object_mut().unwrap();
        let entry = object.remove("entryPointUpdate").unwrap();
        object.insert("update_main_dart".to_string(), entry);
        let plan = validate(&value).unwrap();
        assert_eq!(plan.entry_point_update.routes_to_add.len(), 1);
    }

    #[test]
    fn test_empty_steps_fail() {
        let mut value = sample();
        value["steps"] = json!([]);
        assert_eq!(validate(&value), Err(ValidationError::EmptySteps));
    }

    #[test]
    fn test_bad_step_type_and_fields() {
        let mut value = sample();
        value["steps"][0]["type"] = json!("rename_file");
        assert!(matches!(
            validate(&value),
            Err(ValidationError::InvalidStepType { index: 0, .. })
        ));

        let mut value = sample();
        value["steps"][1]["description"] = json!("  ");
        assert_eq!(
            validate(&value),
            Err(ValidationError::MissingStepField {
                index: 1,
                field: "description"
            })
        );

        let mut value = sample();
        value["steps"][0]["file_path"] = json!("../../etc/passwd");
        assert!(matches!(
            validate(&value),
            Err(ValidationError::UnsafeStepPath { index: 0, .. })
        ));
    }

    #[test]
    fn test_entry_point_defaults() {
        let mut value = sample();
        value["entryPointUpdate"] = json!({});
        let plan = validate(&value).unwrap();
        assert_eq!(plan.entry_point_update, EntryPointUpdate::default());

        value["entryPointUpdate"] = Value::Null;
        assert!(validate(&value).is_ok());

        value["entryPointUpdate"] = json!("main.dart");
        assert!(matches!(validate(&value), Err(ValidationError::WrongType { .. })));
    }

    #[test]
    fn test_route_list_form_and_provider_alias() {
        let mut value = sample();
        value["entryPointUpdate"] = json!({
            "routes_to_add": [{"route": "/home", "widget": "HomeScreen()"}],
            "providers_to_add": ["ChangeNotifierProvider(create: (_) => Cart())"]
        });
        let plan = validate(&value).unwrap();
        assert_eq!(plan.entry_point_update.routes_to_add["/home"], "HomeScreen()");
        assert_eq!(plan.entry_point_update.providers_to_initialize.len(), 1);
    }

    #[test]
    fn test_duplicate_dependency_keeps_last_version() {
        let mut value = sample();
        value["dependencies"] = json!(["http: ^0.13.0", {"package": "http", "version": "^1.0.0"}]);
        let plan = validate(&value).unwrap();
        assert_eq!(plan.dependencies, vec![DependencyDeclaration::new("http", "^1.0.0")]);
    }

    #[test]
    fn test_invalid_dependency_entry() {
        let mut value = sample();
        value["dependencies"] = json!([42]);
        assert!(matches!(validate(&value), Err(ValidationError::WrongType { .. })));
    }

    #[test]
    fn test_check_initial_route() {
        let plan = validate(&sample()).unwrap();
        assert!(check_initial_route(&plan, &BTreeSet::new()).is_ok());

        let mut value = sample();
        value["entryPointUpdate"]["initial_route"] = json!("/settings");
        let plan = validate(&value).unwrap();
        assert_eq!(
            check_initial_route(&plan, &BTreeSet::new()),
            Err(ValidationError::UnknownInitialRoute("/settings".to_string()))
        );
        let existing: BTreeSet<String> = ["/settings".to_string()].into_iter().collect();
        assert!(check_initial_route(&plan, &existing).is_ok());
    }
}
