//! Typed error hierarchy for taskforge.
//!
//! A single enum, `TaskforgeError`, covers every failure the core can report.
//! Each variant maps onto an `ErrorCategory` so the CLI can print a stable
//! `category:code` pair without string matching.

use std::path::PathBuf;

use thiserror::Error;

use crate::state::TaskStatus;

/// Result alias used throughout the library.
pub type Result<T, E = TaskforgeError> = std::result::Result<T, E>;

/// The kind of resource a `NotFound` error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    State,
    Task,
    Checkpoint,
    Artifact,
    Bundle,
    Result,
    Schema,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::State => write!(f, "state"),
            ResourceKind::Task => write!(f, "task"),
            ResourceKind::Checkpoint => write!(f, "checkpoint"),
            ResourceKind::Artifact => write!(f, "artifact"),
            ResourceKind::Bundle => write!(f, "bundle"),
            ResourceKind::Result => write!(f, "result"),
            ResourceKind::Schema => write!(f, "schema"),
        }
    }
}

/// Coarse error grouping, printed by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    State,
    Lifecycle,
    Validation,
    Schema,
    Config,
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::State => write!(f, "state"),
            ErrorCategory::Lifecycle => write!(f, "lifecycle"),
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Schema => write!(f, "schema"),
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TaskforgeError {
    #[error("Validation failed: {message}")]
    ValidationFailed {
        message: String,
        violations: Vec<String>,
    },

    #[error("Cannot {operation} task {task_id}: current status is {current}")]
    InvalidTransition {
        task_id: String,
        operation: String,
        current: TaskStatus,
    },

    #[error("{kind} not found: {id}")]
    NotFound { kind: ResourceKind, id: String },

    #[error("Corrupt document at {path}: {source}")]
    StateCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Refusing to overwrite existing document at {path}")]
    AlreadyExists { path: PathBuf },

    #[error("I/O failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out waiting for lock on {path}")]
    Locked { path: PathBuf },

    #[error("Schema not found: {name}")]
    SchemaNotFound { name: String },

    #[error("Schema {name} failed to compile: {message}")]
    SchemaCompileFailed { name: String, message: String },

    #[error("Missing configuration: {key}")]
    ConfigMissing { key: String },

    #[error("Invalid configuration for {key}: {reason}")]
    ConfigInvalid { key: String, reason: String },

    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TaskforgeError {
    pub fn validation(message: impl Into<String>, violations: Vec<String>) -> Self {
        TaskforgeError::ValidationFailed {
            message: message.into(),
            violations,
        }
    }

    pub fn not_found(kind: ResourceKind, id: impl Into<String>) -> Self {
        TaskforgeError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TaskforgeError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            TaskforgeError::ValidationFailed { .. } => ErrorCategory::Validation,
            TaskforgeError::InvalidTransition { .. } => ErrorCategory::Lifecycle,
            TaskforgeError::NotFound { .. }
            | TaskforgeError::StateCorrupt { .. }
            | TaskforgeError::AlreadyExists { .. }
            | TaskforgeError::Locked { .. } => ErrorCategory::State,
            TaskforgeError::Io { .. } | TaskforgeError::Serialize(_) => ErrorCategory::Io,
            TaskforgeError::SchemaNotFound { .. } | TaskforgeError::SchemaCompileFailed { .. } => {
                ErrorCategory::Schema
            }
            TaskforgeError::ConfigMissing { .. } | TaskforgeError::ConfigInvalid { .. } => {
                ErrorCategory::Config
            }
            TaskforgeError::Other(_) => ErrorCategory::State,
        }
    }

    /// Stable machine-readable code, printed alongside the category.
    pub fn code(&self) -> &'static str {
        match self {
            TaskforgeError::ValidationFailed { .. } => "VALIDATION_FAILED",
            TaskforgeError::InvalidTransition { .. } => "INVALID_TRANSITION",
            TaskforgeError::NotFound { .. } => "NOT_FOUND",
            TaskforgeError::StateCorrupt { .. } => "CORRUPT",
            TaskforgeError::AlreadyExists { .. } => "ALREADY_EXISTS",
            TaskforgeError::Io { .. } => "IO_FAILURE",
            TaskforgeError::Locked { .. } => "LOCKED",
            TaskforgeError::SchemaNotFound { .. } => "SCHEMA_NOT_FOUND",
            TaskforgeError::SchemaCompileFailed { .. } => "SCHEMA_COMPILE_FAILED",
            TaskforgeError::ConfigMissing { .. } => "CONFIG_MISSING",
            TaskforgeError::ConfigInvalid { .. } => "CONFIG_INVALID",
            TaskforgeError::Serialize(_) => "SERIALIZE",
            TaskforgeError::Other(_) => "INTERNAL",
        }
    }
}
