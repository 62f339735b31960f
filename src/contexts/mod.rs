pub mod entry_point;
pub mod file_cache;
pub mod manifest;
pub mod merge_strategy;
pub mod plan_simplifier;
pub mod plan_validator;
pub mod planner;
pub mod project_state;
pub mod response_parser;
pub mod source_scan;
pub mod structural_validator;
pub mod task_runner;
pub mod tolerant_json;

pub use entry_point::{EntryPointReconciler, MergeOutcome, Reconciliation, ValidationGate};
pub use file_cache::{CachedGenerator, FileCompletionCache};
pub use manifest::ManifestUpdater;
pub use merge_strategy::{CollaboratorMerge, HeuristicMerge, MergeError, MergeStrategy};
pub use plan_simplifier::{simplify, SimplifyPolicy};
pub use plan_validator::validate;
pub use planner::Planner;
pub use project_state::ProjectStateStore;
pub use response_parser::{CodeResponse, ParsedResponse, ResponseParser};
pub use structural_validator::{CheckState, DiagnosticClassifier, RepairReport, StructuralValidator};
pub use task_runner::{Recovered, TaskReport, TaskRunner};
