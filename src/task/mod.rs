//! Task state machine (C4): per-instance state, prerequisites, outputs, and
//! the message-driven transitions between them.
//!
//! Grounded on `cylc/flow/task_state.py` (`TaskState.xtrigger`/`reset`) and
//! `cylc/flow/task_proxy.py`'s message handling, reshaped into an explicit
//! state machine instead of string-keyed attribute bags. The "dynamic class
//! loading by name" the original uses to build task classes becomes
//! [`TaskRegistry`]: a name -> constructor map built once at startup.

mod instance;
mod registry;

pub use instance::{Output, Prerequisite, ResetTarget, TaskInstance, TaskState};
pub use registry::{TaskDef, TaskRegistry};

use crate::error::{Result, SchedulerError};

/// Unique identifier for a task instance: `(name, cycle_point)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskId {
    pub name: String,
    pub point: crate::cycle::Point,
}

impl TaskId {
    pub fn new(name: impl Into<String>, point: crate::cycle::Point) -> Self {
        Self { name: name.into(), point }
    }

    /// The label used for this task's three implicit outputs, e.g.
    /// `foo.20000101T0000`.
    pub fn label(&self) -> String {
        format!("{}.{}", self.name, self.point.canonical())
    }

    /// Parses a `TASK_ID` argument of the form `name.cycle_point`, as
    /// accepted by every CLI subcommand taking `TASK_ID+` (§6).
    pub fn parse(raw: &str) -> Result<Self> {
        let (name, point) = raw
            .rsplit_once('.')
            .ok_or_else(|| SchedulerError::ConfigError(format!("malformed task id: {raw}")))?;
        Ok(Self { name: name.to_string(), point: crate::cycle::Point::parse(point)? })
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// The three outputs every task instance implicitly owns, per §3 of the
/// design: `started`, `completed` (emitted just before the finish boundary),
/// and `finished`.
pub const IMPLICIT_OUTPUTS: [&str; 3] = ["started", "completed", "finished"];

/// Builds the message text used on the wire for an implicit output, e.g.
/// `"foo.20000101T0000 started"`.
pub fn output_message(id: &TaskId, output: &str) -> String {
    format!("{} {}", id.label(), output)
}
