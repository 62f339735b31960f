use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of change a plan step makes to one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    CreateFile,
    UpdateFile,
    DeleteFile,
}

impl OperationType {
    /// Parses the canonical names and their short aliases (`create`, `update`, `delete`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "create_file" | "create" => Some(OperationType::CreateFile),
            "update_file" | "update" => Some(OperationType::UpdateFile),
            "delete_file" | "delete" => Some(OperationType::DeleteFile),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::CreateFile => "create_file",
            OperationType::UpdateFile => "update_file",
            OperationType::DeleteFile => "delete_file",
        }
    }

    pub fn writes_content(&self) -> bool {
        !matches!(self, OperationType::DeleteFile)
    }
}

/// One step of a task plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOperation {
    #[serde(rename = "type")]
    pub kind: OperationType,
    pub file_path: String,
    /// Free-text instruction handed to content generation.
    pub description: String,
}

/// Registrations to merge into the entry file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPointUpdate {
    pub imports_to_add: Vec<String>,
    /// Route key to constructor expression.
    pub routes_to_add: BTreeMap<String, String>,
    pub initial_route: Option<String>,
    /// Order matters: providers initialize in this sequence.
    pub providers_to_initialize: Vec<String>,
}

impl EntryPointUpdate {
    pub fn is_empty(&self) -> bool {
        self.imports_to_add.is_empty() && !self.has_structural_changes()
    }

    /// Whether routes, providers or the initial route need merging.
    pub fn has_structural_changes(&self) -> bool {
        !self.routes_to_add.is_empty()
            || self.initial_route.is_some()
            || !self.providers_to_initialize.is_empty()
    }
}

/// A package the manifest must declare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyDeclaration {
    #[serde(rename = "package_name")]
    pub name: String,
    pub version: String,
}

impl DependencyDeclaration {
    pub const ANY_VERSION: &'static str = "any";

    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Parses `"name: ^1.0"`, `"name:^1.0"` or a bare `"name"`.
    pub fn parse(spec: &str) -> Option<Self> {
        let spec = spec.trim();
        let (name, version) = match spec.split_once(':') {
            Some((name, version)) => (name.trim(), version.trim()),
            None => (spec, ""),
        };
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return None;
        }
        let version = if version.is_empty() {
            Self::ANY_VERSION
        } else {
            version
        };
        Some(Self::new(name, version))
    }
}

/// A validated task plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPlan {
    pub steps: Vec<FileOperation>,
    #[serde(rename = "entryPointUpdate")]
    pub entry_point_update: EntryPointUpdate,
    pub dependencies: Vec<DependencyDeclaration>,
}

impl TaskPlan {
    /// The plan callers fall back to when no valid plan could be produced:
    /// a single update of the entry file carrying the request as its description.
    pub fn fallback(entry_file: &str, request: &str) -> Self {
        Self {
            steps: vec![FileOperation {
                kind: OperationType::UpdateFile,
                file_path: entry_file.to_string(),
                description: request.to_string(),
            }],
            entry_point_update: EntryPointUpdate::default(),
            dependencies: Vec::new(),
        }
    }

    /// Paths the plan creates or updates, in step order, without repeats.
    pub fn written_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = Vec::new();
        for step in self.steps.iter().filter(|s| s.kind.writes_content()) {
            if !paths.contains(&step.file_path.as_str()) {
                paths.push(&step.file_path);
            }
        }
        paths
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}
