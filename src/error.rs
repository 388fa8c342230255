//! Error types for the orchestration engine.

use std::path::PathBuf;

use uuid::Uuid;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Resolution error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Worktree error: {0}")]
    Worktree(#[from] WorktreeError),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse assistant settings at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Task store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Task {id} not found")]
    TaskNotFound { id: Uuid },

    #[error("Attempt {id} not found")]
    AttemptNotFound { id: Uuid },

    #[error("Task {task_id} already has an active attempt {attempt_id}")]
    ActiveAttemptExists { task_id: Uuid, attempt_id: Uuid },

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Command resolution errors.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("No command tier succeeded for assistant {variant}")]
    ResolutionExhausted { variant: String },
}

/// Worktree lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum WorktreeError {
    #[error("Failed to create worktree for attempt {attempt_id}: {reason}")]
    AcquisitionFailed { attempt_id: Uuid, reason: String },

    #[error("Failed to remove worktree at {path}: {reason}")]
    ReleaseFailed { path: PathBuf, reason: String },

    #[error("VCS command failed: {0}")]
    Vcs(String),

    #[error("Corrupt worktree marker at {path}: {reason}")]
    MarkerCorrupt { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Process supervision errors.
///
/// Timeouts and cancellations are not errors — they are flags on
/// `ProcessResult`, since the process did run and was reaped.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to spawn `{command}`: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write prompt to stdin: {0}")]
    StdinFailed(std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Task state machine errors.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task {id}: cannot transition from {from} to {to}")]
    InvalidTransition { id: Uuid, from: String, to: String },

    #[error("Task {id} already has a cancellation in flight")]
    CancellationPending { id: Uuid },
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
