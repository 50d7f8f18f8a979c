//! chronoloom: a cycling workflow scheduler.
//!
//! Tasks recur against a cycle-point sequence (ISO-8601 datetime or integer
//! counter); each tick negotiates prerequisite satisfaction, dispatches
//! ready tasks to hosts via a restricted remote command protocol, spawns
//! successors bounded by a runahead window, and cleans up spent instances.
//! State can be dumped to and restored from a text snapshot, and the whole
//! engine is steerable at runtime through a CLI and, behind the `http`
//! feature, a small JSON wire server.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod broker;
pub mod cli;
pub mod config;
pub mod cycle;
pub mod error;
pub mod expr;
pub mod host;
pub mod observability;
pub mod remote;
pub mod scheduler;
pub mod state_dump;
pub mod task;

#[cfg(feature = "http")]
pub mod wire;

pub use broker::DependencyBroker;
pub use config::{AppConfig, ConfigLoader};
pub use cycle::{Interval, Point, Sequence};
pub use error::{Result, SchedulerError};
pub use scheduler::{Scheduler, StopMode, TickReport};
pub use state_dump::StateDump;
pub use task::{TaskDef, TaskId, TaskInstance, TaskRegistry, TaskState};
