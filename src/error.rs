use std::path::PathBuf;
use thiserror::Error;

/// Reasons a task plan is rejected by the validator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("task plan must be a JSON object")]
    NotAnObject,

    #[error("task plan is missing required key '{0}'")]
    MissingKey(&'static str),

    #[error("'{key}' must be {expected}")]
    WrongType { key: String, expected: &'static str },

    #[error("task plan has no steps")]
    EmptySteps,

    #[error("step {index}: unknown operation type '{found}'")]
    InvalidStepType { index: usize, found: String },

    #[error("step {index}: '{field}' must be a non-empty string")]
    MissingStepField { index: usize, field: &'static str },

    #[error("step {index}: file path '{path}' escapes the project root")]
    UnsafeStepPath { index: usize, path: String },

    #[error("initial route '{0}' is neither added by the plan nor present in the entry file")]
    UnknownInitialRoute(String),
}

/// Disk failures surfaced by the project state store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("path '{0}' is outside the project root")]
    OutsideRoot(String),
}

impl StorageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Transient failures of the text-generation collaborator. All are retryable.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("generation request failed: {0}")]
    Transport(String),

    #[error("generation request timed out after {0}s")]
    Timeout(u64),

    #[error("generation service answered with status {0}")]
    Status(u16),

    #[error("generation service returned an unreadable body: {0}")]
    InvalidBody(String),

    #[error("generation service returned an empty completion")]
    Empty,
}

/// The structural checker could not be run at all.
#[derive(Debug, Error)]
pub enum CheckerError {
    #[error("failed to start checker '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("checker timed out after {0}s")]
    Timeout(u64),

    #[error("checker I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors while resolving or rendering a prompt template.
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt '{0}' not found in registry")]
    UnknownPrompt(String),

    #[error("required placeholder '{0}' could not be resolved")]
    MissingPlaceholder(String),

    #[error("invalid path '{0}' in placeholder")]
    InvalidPlaceholderPath(String),

    #[error("prompt template is invalid: {0}")]
    InvalidTemplate(String),
}

/// Task-level failures. Everything else degrades to a warning inside the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("invalid task plan: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error("no valid task plan after {attempts} attempts: {last_error}")]
    PlanExhausted { attempts: usize, last_error: String },
}
