mod cache;
mod collaborators;
mod project_state;
mod task_context;
mod task_plan;

pub use cache::CompletionCache;
pub use collaborators::{CheckReport, Completion, StructuralChecker, TextGenerator};
pub use project_state::{truncate_context, ProjectFile, ProjectState};
pub use task_context::{component_name, top_level_classes, TaskContext};
pub use task_plan::{
    DependencyDeclaration, EntryPointUpdate, FileOperation, OperationType, TaskPlan,
};
