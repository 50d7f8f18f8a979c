//! Error types for the scheduling engine

use std::collections::HashMap;
use thiserror::Error;

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Error kinds surfaced by the scheduling engine.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Malformed workflow or application configuration.
    #[error("config error: {0}")]
    ConfigError(String),

    /// Cycle-point or interval parsing/arithmetic failure.
    #[error("cycle error: {0}")]
    CycleError(String),

    /// Two cycle values from incompatible families (ISO vs integer) met.
    #[error("cycle kind mismatch: {0}")]
    CycleKindMismatch(String),

    /// A host-selection threshold expression used a non-whitelisted construct.
    #[error("unsafe expression: {0}")]
    UnsafeExpression(String),

    /// An otherwise-valid expression failed during evaluation.
    #[error("expression evaluation failed: {0}")]
    EvalError(String),

    /// No candidate host survived blacklisting/filtering/metric collection.
    #[error("no hosts available: {diagnostics:?}")]
    NoHostsAvailable {
        /// Per-host reason the candidate was rejected.
        diagnostics: HashMap<String, String>,
    },

    /// A local or remote command invocation failed.
    #[error("remote command failed: {0}")]
    RemoteCommandFailed(String),

    /// Referenced a task id that does not exist in the engine.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// Attempted to insert a task that already exists at that cycle.
    #[error("duplicate task: {0}")]
    DuplicateTask(String),

    /// A persisted state dump is incompatible with the running engine.
    #[error("state dump incompatible: {0}")]
    StateDumpIncompatible(String),

    /// Invalid state transition attempted on a task instance.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// The state the task was in.
        from: String,
        /// The state that was requested.
        to: String,
    },

    /// Generic I/O failure (config files, state dumps, job files).
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for SchedulerError {
    fn from(err: std::io::Error) -> Self {
        SchedulerError::Io(err.to_string())
    }
}
