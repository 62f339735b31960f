//! Project-state reconciliation engine for generated Flutter projects.
//!
//! The engine applies machine-generated task plans to a source tree without
//! losing accumulated work: it parses unreliable model output, validates and
//! optionally simplifies plans, keeps an authoritative snapshot of the
//! project, merges entry-point registrations, keeps the dependency manifest
//! coherent and runs a bounded structural repair loop over touched files.

pub mod config;
pub mod contexts;
pub mod data;
pub mod error;
pub mod registries;
pub mod task_history;

pub use config::EngineConfig;
pub use error::{
    CheckerError, EngineError, PromptError, ServiceError, StorageError, ValidationError,
};
