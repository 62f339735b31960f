use crate::config::EngineConfig;
use crate::contexts::entry_point::module_path;
use crate::data::{component_name, EntryPointUpdate, FileOperation, TaskPlan};
use std::path::Path;

/// What a minimal-diff plan may keep.
#[derive(Debug, Clone)]
pub struct SimplifyPolicy {
    pub entry_file: String,
    /// Directories whose files carry UI and are always kept.
    pub ui_dirs: Vec<String>,
    /// Test-only and generic helper directories that are always dropped.
    pub dropped_dirs: Vec<String>,
    pub essential_packages: Vec<String>,
}

impl SimplifyPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            entry_file: config.entry_file.clone(),
            ui_dirs: ["lib/screens", "lib/pages", "lib/views", "lib/widgets"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            dropped_dirs: [
                "test",
                "integration_test",
                "lib/utils",
                "lib/util",
                "lib/helpers",
                "lib/helper",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            essential_packages: config.essential_packages.clone(),
        }
    }

    fn is_ui(&self, path: &str) -> bool {
        path == self.entry_file || self.ui_dirs.iter().any(|dir| is_under(path, dir))
    }

    fn is_dropped(&self, path: &str) -> bool {
        path != self.entry_file && self.dropped_dirs.iter().any(|dir| is_under(path, dir))
    }
}

impl Default for SimplifyPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Prunes a validated plan to the operations a minimal change needs.
///
/// Steps under UI directories and the entry file stay. Test and helper steps
/// go. Any other step stays only when its main class is referenced by a
/// kept step description, route or provider. The initial route survives only
/// together with its own route entry. Dependencies are cut to the essential
/// allow-list. The input plan is left untouched.
pub fn simplify(plan: &TaskPlan, policy: &SimplifyPolicy) -> TaskPlan {
    let update = &plan.entry_point_update;

    let primary: Vec<&FileOperation> = plan
        .steps
        .iter()
        .filter(|s| policy.is_ui(&s.file_path))
        .collect();

    let mut references: Vec<&str> = primary.iter().map(|s| s.description.as_str()).collect();
    references.extend(update.routes_to_add.values().map(String::as_str));
    references.extend(update.providers_to_initialize.iter().map(String::as_str));

    let mut steps: Vec<FileOperation> = Vec::new();
    let mut dropped: Vec<&FileOperation> = Vec::new();
    for step in &plan.steps {
        let keep = if policy.is_ui(&step.file_path) {
            true
        } else if policy.is_dropped(&step.file_path) {
            false
        } else {
            let class = class_name_for(&step.file_path);
            references.iter().any(|text| mentions(text, &class))
        };
        if keep {
            steps.push(step.clone());
        } else {
            tracing::debug!(path = %step.file_path, "step dropped by simplifier");
            dropped.push(step);
        }
    }

    if steps.is_empty() {
        if let Some(first) = plan.steps.first() {
            steps.push(first.clone());
            dropped.retain(|s| s.file_path != first.file_path);
        }
    }

    let dropped_classes: Vec<String> = dropped.iter().map(|s| class_name_for(&s.file_path)).collect();

    let entry_point_update = EntryPointUpdate {
        imports_to_add: update
            .imports_to_add
            .iter()
            .filter(|import| !dropped.iter().any(|s| import_targets(import, &s.file_path)))
            .cloned()
            .collect(),
        routes_to_add: update
            .routes_to_add
            .iter()
            .filter(|(route, constructor)| {
                update.initial_route.as_deref() == Some(route.as_str())
                    || component_name(constructor)
                        .is_some_and(|c| steps.iter().any(|s| defines_component(s, &c)))
            })
            .map(|(route, constructor)| (route.clone(), constructor.clone()))
            .collect(),
        initial_route: update
            .initial_route
            .clone()
            .filter(|route| update.routes_to_add.contains_key(route)),
        providers_to_initialize: update
            .providers_to_initialize
            .iter()
            .filter(|p| !dropped_classes.iter().any(|class| mentions(p, class)))
            .cloned()
            .collect(),
    };

    let dependencies = plan
        .dependencies
        .iter()
        .filter(|d| policy.essential_packages.contains(&d.name))
        .cloned()
        .collect();

    TaskPlan {
        steps,
        entry_point_update,
        dependencies,
    }
}

fn is_under(path: &str, dir: &str) -> bool {
    path.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/'))
}

/// `lib/screens/todo_list_screen.dart` names `TodoListScreen`.
fn class_name_for(path: &str) -> String {
    let stem = Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    stem.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

const UI_SUFFIXES: &[&str] = &["Screen", "Page", "View", "Widget"];

/// Whether `step` plausibly defines `component`.
///
/// The file stem may drop or add a UI suffix (`home.dart` for `HomeScreen`),
/// and a description naming the component counts too.
fn defines_component(step: &FileOperation, component: &str) -> bool {
    let class = class_name_for(&step.file_path);
    let suffixed = |longer: &str, shorter: &str| {
        longer
            .strip_prefix(shorter)
            .is_some_and(|rest| UI_SUFFIXES.contains(&rest))
    };
    class == component
        || suffixed(component, &class)
        || suffixed(&class, component)
        || mentions(&step.description, component)
}

/// Whole-word occurrence of `word` in `text`.
fn mentions(text: &str, word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    text.match_indices(word).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + word.len()..].chars().next();
        !before.is_some_and(is_ident_char) && !after.is_some_and(is_ident_char)
    })
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Whether an import string refers to the file at `path`.
fn import_targets(import: &str, path: &str) -> bool {
    let module = module_path(import);
    let relative = path.strip_prefix("lib/").unwrap_or(path);
    module == path || module == relative || module.ends_with(&format!("/{}", relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DependencyDeclaration, OperationType};

    fn step(path: &str, description: &str) -> FileOperation {
        FileOperation {
            kind: OperationType::CreateFile,
            file_path: path.to_string(),
            description: description.to_string(),
        }
    }

    fn plan() -> TaskPlan {
        let mut update = EntryPointUpdate::default();
        update.imports_to_add = vec![
            "screens/todo_screen.dart".to_string(),
            "package:app/utils/date_helpers.dart".to_string(),
            "providers/todo_provider.dart".to_string(),
        ];
        update.routes_to_add.insert("/todo".to_string(), "TodoScreen()".to_string());
        update.routes_to_add.insert("/stats".to_string(), "StatsScreen()".to_string());
        update.initial_route = Some("/todo".to_string());
        update.providers_to_initialize =
            vec!["ChangeNotifierProvider(create: (_) => TodoProvider())".to_string()];

        TaskPlan {
            steps: vec![
                step("lib/screens/todo_screen.dart", "List of Todo items"),
                step("lib/providers/todo_provider.dart", "Holds the todos"),
                step("lib/models/todo.dart", "Todo model"),
                step("lib/models/audit_log.dart", "Audit entries"),
                step("lib/utils/date_helpers.dart", "Date formatting"),
                step("test/todo_test.dart", "Widget tests"),
            ],
            entry_point_update: update,
            dependencies: vec![
                DependencyDeclaration::new("provider", "^6.1.2"),
                DependencyDeclaration::new("lottie", "^3.0.0"),
            ],
        }
    }

    #[test]
    fn test_simplify_keeps_ui_and_referenced_steps() {
        let simplified = simplify(&plan(), &SimplifyPolicy::default());
        let paths: Vec<&str> = simplified.steps.iter().map(|s| s.file_path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "lib/screens/todo_screen.dart",
                "lib/providers/todo_provider.dart",
                "lib/models/todo.dart",
            ]
        );
    }

    #[test]
    fn test_simplify_prunes_entry_point_and_dependencies() {
        let simplified = simplify(&plan(), &SimplifyPolicy::default());
        let update = &simplified.entry_point_update;
        assert_eq!(
            update.imports_to_add,
            vec!["screens/todo_screen.dart", "providers/todo_provider.dart"]
        );
        assert_eq!(update.routes_to_add.len(), 1);
        assert_eq!(update.routes_to_add["/todo"], "TodoScreen()");
        assert_eq!(update.initial_route.as_deref(), Some("/todo"));
        assert_eq!(update.providers_to_initialize.len(), 1);
        assert_eq!(
            simplified.dependencies,
            vec![DependencyDeclaration::new("provider", "^6.1.2")]
        );
    }

    #[test]
    fn test_initial_route_without_its_entry_is_dropped() {
        let mut original = plan();
        original.entry_point_update.initial_route = Some("/home".to_string());
        let simplified = simplify(&original, &SimplifyPolicy::default());
        assert_eq!(simplified.entry_point_update.initial_route, None);
        assert!(!simplified.entry_point_update.routes_to_add.contains_key("/home"));
    }

    #[test]
    fn test_original_plan_is_untouched() {
        let original = plan();
        let _ = simplify(&original, &SimplifyPolicy::default());
        assert_eq!(original.steps.len(), 6);
        assert_eq!(original.dependencies.len(), 2);
    }

    #[test]
    fn test_never_empty() {
        let original = TaskPlan {
            steps: vec![step("test/only_test.dart", "tests")],
            entry_point_update: EntryPointUpdate::default(),
            dependencies: Vec::new(),
        };
        let simplified = simplify(&original, &SimplifyPolicy::default());
        assert_eq!(simplified.steps.len(), 1);
    }

    #[test]
    fn test_route_kept_when_file_and_class_names_differ() {
        let mut update = EntryPointUpdate::default();
        update.imports_to_add = vec!["screens/home.dart".to_string()];
        update.routes_to_add.insert("/home".to_string(), "const HomeScreen()".to_string());
        update.routes_to_add.insert("/stats".to_string(), "const StatsOverview()".to_string());
        update.routes_to_add.insert("/gone".to_string(), "const GoneScreen()".to_string());
        update.initial_route = Some("/home".to_string());
        let original = TaskPlan {
            steps: vec![
                step("lib/screens/home.dart", "Landing screen"),
                step("lib/screens/dashboard.dart", "Hosts the StatsOverview widget"),
            ],
            entry_point_update: update,
            dependencies: Vec::new(),
        };

        let simplified = simplify(&original, &SimplifyPolicy::default());
        let update = &simplified.entry_point_update;
        assert_eq!(simplified.steps.len(), 2);
        assert_eq!(update.imports_to_add, vec!["screens/home.dart"]);
        let routes: Vec<&str> = update.routes_to_add.keys().map(String::as_str).collect();
        assert_eq!(routes, vec!["/home", "/stats"]);
        assert_eq!(update.initial_route.as_deref(), Some("/home"));
    }

    #[test]
    fn test_defines_component() {
        assert!(defines_component(&step("lib/screens/home.dart", ""), "HomeScreen"));
        assert!(defines_component(&step("lib/screens/settings_page.dart", ""), "Settings"));
        assert!(defines_component(&step("lib/screens/a.dart", "shows ProfileCard"), "ProfileCard"));
        assert!(!defines_component(&step("lib/screens/home.dart", ""), "HomeScreenBody"));
        assert!(!defines_component(&step("lib/models/todo.dart", "Todo model"), "TodoScreenX"));
    }

    #[test]
    fn test_helpers() {
        assert_eq!(class_name_for("lib/screens/todo_list_screen.dart"), "TodoListScreen");
        assert!(mentions("uses TodoProvider()", "TodoProvider"));
        assert!(!mentions("uses TodoProviderX", "TodoProvider"));
        assert!(is_under("lib/screens/a.dart", "lib/screens"));
        assert!(!is_under("lib/screensaver.dart", "lib/screens"));
        assert!(import_targets("import 'utils/x.dart';", "lib/utils/x.dart"));
        assert!(import_targets("imports/x.dart", "lib/imports/x.dart"));
        assert!(!import_targets("importer.dart", "lib/er.dart"));
    }
}
