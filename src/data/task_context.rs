use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Cross-task memory for one session.
///
/// Tracks which file owns each generated component and which component each
/// route points at. Grows monotonically across tasks; only deletions forget
/// ownership.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskContext {
    current_task: String,
    affected_files: Vec<String>,
    /// Component name to owning file.
    components: BTreeMap<String, String>,
    /// Route key to component name.
    routes: BTreeMap<String, String>,
}

fn class_definition_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^(?:(?:abstract|base|final|sealed|interface)\s+)*class\s+([A-Za-z]\w*)")
            .expect("valid class definition regex")
    })
}

fn constructor_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:const\s+|new\s+)?([A-Z]\w*)").expect("valid constructor regex")
    })
}

/// Public top-level classes defined in `content`, in source order.
pub fn top_level_classes(content: &str) -> Vec<String> {
    class_definition_regex()
        .captures_iter(content)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// The component a route constructor expression builds.
///
/// Accepts `HomeScreen()`, `const HomeScreen()` and builder forms such as
/// `(context) => const HomeScreen()`.
pub fn component_name(constructor: &str) -> Option<String> {
    let expr = match constructor.find("=>") {
        Some(pos) => &constructor[pos + 2..],
        None => constructor,
    };
    constructor_name_regex()
        .captures(expr.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

impl TaskContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new task; component and route knowledge carries over.
    pub fn begin_task(&mut self, description: &str) {
        self.current_task = description.to_string();
        self.affected_files.clear();
    }

    pub fn current_task(&self) -> &str {
        &self.current_task
    }

    pub fn mark_affected(&mut self, path: &str) {
        if !self.affected_files.iter().any(|p| p == path) {
            self.affected_files.push(path.to_string());
        }
    }

    pub fn affected_files(&self) -> &[String] {
        &self.affected_files
    }

    /// Records `name` as defined in `path`, returning the previous owner if it moved.
    pub fn register_component(&mut self, name: &str, path: &str) -> Option<String> {
        match self.components.insert(name.to_string(), path.to_string()) {
            Some(previous) if previous != path => Some(previous),
            _ => None,
        }
    }

    /// Registers every public top-level class in `content` as owned by `path`.
    pub fn record_file(&mut self, path: &str, content: &str) -> Vec<String> {
        let names = top_level_classes(content);
        for name in &names {
            if let Some(previous) = self.register_component(name, path) {
                tracing::debug!(component = %name, from = %previous, to = %path, "component moved");
            }
        }
        names
    }

    /// Drops ownership records for a deleted file.
    pub fn forget_file(&mut self, path: &str) {
        self.components.retain(|_, owner| owner != path);
    }

    pub fn register_route(&mut self, route: &str, component: &str) {
        self.routes.insert(route.to_string(), component.to_string());
    }

    /// Registers each route whose constructor names a component.
    pub fn absorb_routes(&mut self, routes: &BTreeMap<String, String>) {
        for (route, constructor) in routes {
            if let Some(component) = component_name(constructor) {
                self.register_route(route, &component);
            }
        }
    }

    pub fn component_owner(&self, name: &str) -> Option<&str> {
        self.components.get(name).map(String::as_str)
    }

    pub fn route_component(&self, route: &str) -> Option<&str> {
        self.routes.get(route).map(String::as_str)
    }

    /// Components owned by any file other than `path`.
    pub fn components_outside<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.components
            .iter()
            .filter(move |(_, owner)| owner.as_str() != path)
            .map(|(name, _)| name.as_str())
    }

    pub fn components(&self) -> &BTreeMap<String, String> {
        &self.components
    }

    pub fn routes(&self) -> &BTreeMap<String, String> {
        &self.routes
    }
}
