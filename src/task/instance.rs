//! A single task instance and the message-driven transitions between its
//! five canonical states.

use super::{output_message, TaskId, IMPLICIT_OUTPUTS};
use crate::error::{Result, SchedulerError};
use std::collections::BTreeMap;

/// The five states a task instance may occupy, per §4.4 of the design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Waiting,
    Submitted,
    Running,
    Finished,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Waiting => "waiting",
            TaskState::Submitted => "submitted",
            TaskState::Running => "running",
            TaskState::Finished => "finished",
            TaskState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskState {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "waiting" => Ok(TaskState::Waiting),
            "submitted" => Ok(TaskState::Submitted),
            "running" => Ok(TaskState::Running),
            "finished" => Ok(TaskState::Finished),
            "failed" => Ok(TaskState::Failed),
            other => Err(SchedulerError::StateDumpIncompatible(format!("unknown task state: {other}"))),
        }
    }
}

/// A prerequisite: an output label (of some other task, or this one) that
/// must be satisfied before this task may run.
#[derive(Debug, Clone)]
pub struct Prerequisite {
    pub label: String,
    pub satisfied: bool,
}

/// An output this task can produce.
#[derive(Debug, Clone)]
pub struct Output {
    pub name: String,
    pub satisfied: bool,
}

/// A live task instance. Held by the scheduler's task set; the broker only
/// borrows it for the duration of a tick.
#[derive(Debug, Clone)]
pub struct TaskInstance {
    pub id: TaskId,
    pub state: TaskState,
    pub prerequisites: Vec<Prerequisite>,
    pub outputs: Vec<Output>,
    pub spawned: bool,
    pub held: bool,
    pub quick_death: bool,
    pub one_off: bool,
    pub follow_on: Option<String>,
    /// Flow number this instance belongs to, set by `set-outputs --flow`.
    pub flow: Option<u64>,
    inbox: Vec<(u8, String)>,
}

impl TaskInstance {
    /// Construct a fresh *waiting* instance. `prereq_labels` are the
    /// dependency-graph edges resolved to concrete labels (e.g.
    /// `"foo.20000101T0000 succeeded"`); `extra_outputs` are any
    /// task-specific outputs beyond the three implicit ones.
    pub fn new(
        id: TaskId,
        prereq_labels: Vec<String>,
        extra_outputs: Vec<String>,
        quick_death: bool,
        one_off: bool,
        follow_on: Option<String>,
    ) -> Self {
        let mut outputs: Vec<Output> = IMPLICIT_OUTPUTS
            .iter()
            .map(|o| Output { name: output_message(&id, o), satisfied: false })
            .collect();
        for name in extra_outputs {
            outputs.push(Output { name, satisfied: false });
        }
        let prerequisites = prereq_labels
            .into_iter()
            .map(|label| Prerequisite { label, satisfied: false })
            .collect();
        Self {
            id,
            state: TaskState::Waiting,
            prerequisites,
            outputs,
            spawned: false,
            held: false,
            quick_death,
            one_off,
            follow_on,
            flow: None,
            inbox: Vec::new(),
        }
    }

    /// All prerequisites are satisfied (vacuously true for an empty set).
    pub fn prereqs_satisfied(&self) -> bool {
        self.prerequisites.iter().all(|p| p.satisfied)
    }

    /// All outputs are satisfied.
    pub fn outputs_complete(&self) -> bool {
        self.outputs.iter().all(|o| o.satisfied)
    }

    /// Ready to run: waiting, not held, all prerequisites satisfied.
    pub fn ready_to_run(&self) -> bool {
        self.state == TaskState::Waiting && !self.held && self.prereqs_satisfied()
    }

    /// Whether the successor should be spawned: one-off tasks never spawn;
    /// otherwise any task that has started running is eligible (mirrors the
    /// `ready_to_spawn` predicate of the design, which fires well before
    /// completion so downstream cycles can be pre-populated within
    /// runahead).
    pub fn ready_to_spawn(&self) -> bool {
        !self.one_off
            && !self.spawned
            && matches!(self.state, TaskState::Submitted | TaskState::Running | TaskState::Finished | TaskState::Failed)
    }

    /// Enqueue an inbound message, to be drained on the next `process_inbox`.
    pub fn enqueue(&mut self, priority: u8, text: impl Into<String>) {
        self.inbox.push((priority, text.into()));
    }

    /// Drain the inbox and apply each message in order, per §4.4's
    /// transition rules. Returns `true` if any message changed state or
    /// output satisfaction (the caller uses this to set the scheduler's
    /// dirty flag).
    pub fn process_inbox(&mut self) -> bool {
        let messages = std::mem::take(&mut self.inbox);
        let mut dirty = false;
        for (priority, text) in messages {
            if self.apply_message(priority, &text) {
                dirty = true;
            }
        }
        dirty
    }

    fn apply_message(&mut self, priority: u8, text: &str) -> bool {
        let started = output_message(&self.id, "started");
        let finished = output_message(&self.id, "finished");
        let failed_text = format!("{} failed", self.id.label());

        if text == started {
            if self.state != TaskState::Submitted {
                tracing::warn!(task = %self.id, "received 'started' while not submitted");
            }
            self.state = TaskState::Running;
            return self.mark_output_satisfied(&started, priority);
        }

        if text == failed_text {
            self.state = TaskState::Failed;
            return true;
        }

        if let Some(output) = self.outputs.iter().find(|o| o.name == text) {
            if output.satisfied {
                tracing::warn!(task = %self.id, output = text, "UNEXPECTED OUTPUT");
                return false;
            }
            let dirty = self.mark_output_satisfied(text, priority);
            if text == finished {
                if self.outputs_complete() {
                    self.state = TaskState::Finished;
                } else {
                    self.state = TaskState::Failed;
                }
            }
            return dirty;
        }

        tracing::info!(task = %self.id, "* {text}");
        false
    }

    fn mark_output_satisfied(&mut self, name: &str, priority: u8) -> bool {
        if let Some(output) = self.outputs.iter_mut().find(|o| o.name == name) {
            if !output.satisfied {
                output.satisfied = true;
                tracing::event!(
                    tracing::Level::INFO,
                    priority,
                    task = %self.id,
                    output = name,
                    "output satisfied"
                );
                return true;
            }
        }
        false
    }

    /// Mark a prerequisite satisfied by label, called by the broker during
    /// negotiation. Returns whether it changed anything.
    pub fn satisfy_prerequisite(&mut self, label: &str) -> bool {
        if let Some(p) = self.prerequisites.iter_mut().find(|p| p.label == label && !p.satisfied) {
            p.satisfied = true;
            true
        } else {
            false
        }
    }

    /// Admin `reset`: `waiting` clears prerequisites/outputs, `finished`
    /// marks everything satisfied and jumps state.
    pub fn reset(&mut self, target: ResetTarget) -> Result<()> {
        match target {
            ResetTarget::Waiting => {
                self.state = TaskState::Waiting;
                for p in &mut self.prerequisites {
                    p.satisfied = false;
                }
                for o in &mut self.outputs {
                    o.satisfied = false;
                }
            }
            ResetTarget::WaitingSatisfied => {
                self.state = TaskState::Waiting;
                for p in &mut self.prerequisites {
                    p.satisfied = true;
                }
            }
            ResetTarget::Finished => {
                self.state = TaskState::Finished;
                for o in &mut self.outputs {
                    o.satisfied = true;
                }
            }
        }
        Ok(())
    }

    /// Per-class bookkeeping snapshot used by the state dump (§4.8): a
    /// compact bitmap over prerequisites and outputs in declaration order.
    pub fn satisfaction_bitmap(&self) -> BTreeMap<&'static str, Vec<bool>> {
        let mut map = BTreeMap::new();
        map.insert("prereqs", self.prerequisites.iter().map(|p| p.satisfied).collect());
        map.insert("outputs", self.outputs.iter().map(|o| o.satisfied).collect());
        map
    }
}

/// Targets for the admin `reset` operation (§4.6/§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetTarget {
    Waiting,
    WaitingSatisfied,
    Finished,
}

impl std::str::FromStr for ResetTarget {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "waiting" => Ok(ResetTarget::Waiting),
            "ready" | "waiting+satisfied" => Ok(ResetTarget::WaitingSatisfied),
            "finished" => Ok(ResetTarget::Finished),
            other => Err(SchedulerError::ConfigError(format!("unknown reset target: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::Point;

    fn instance() -> TaskInstance {
        let id = TaskId::new("foo", Point::parse("20000101T0000").unwrap());
        TaskInstance::new(id, vec![], vec![], false, false, None)
    }

    #[test]
    fn started_transitions_to_running() {
        let mut t = instance();
        t.state = TaskState::Submitted;
        t.enqueue(1, output_message(&t.id, "started"));
        assert!(t.process_inbox());
        assert_eq!(t.state, TaskState::Running);
    }

    #[test]
    fn finished_with_all_outputs_satisfied_is_finished() {
        let mut t = instance();
        t.state = TaskState::Running;
        let started = output_message(&t.id, "started");
        let completed = output_message(&t.id, "completed");
        let finished = output_message(&t.id, "finished");
        t.enqueue(1, started);
        t.enqueue(1, completed);
        t.enqueue(1, finished);
        t.process_inbox();
        assert_eq!(t.state, TaskState::Finished);
        assert!(t.outputs_complete());
    }

    #[test]
    fn finished_with_missing_output_demotes_to_failed() {
        let mut t = instance();
        t.state = TaskState::Running;
        let finished = output_message(&t.id, "finished");
        t.enqueue(1, finished);
        t.process_inbox();
        assert_eq!(t.state, TaskState::Failed);
    }

    #[test]
    fn explicit_failed_message() {
        let mut t = instance();
        t.state = TaskState::Running;
        t.enqueue(1, format!("{} failed", t.id.label()));
        t.process_inbox();
        assert_eq!(t.state, TaskState::Failed);
    }

    #[test]
    fn repeated_output_logs_unexpected_and_stays_dirty_free() {
        let mut t = instance();
        let started = output_message(&t.id, "started");
        t.state = TaskState::Submitted;
        t.enqueue(1, started.clone());
        t.process_inbox();
        t.enqueue(1, started);
        assert!(!t.process_inbox());
    }

    #[test]
    fn reset_waiting_clears_satisfaction() {
        let mut t = instance();
        t.outputs[0].satisfied = true;
        t.reset(ResetTarget::Waiting).unwrap();
        assert_eq!(t.state, TaskState::Waiting);
        assert!(!t.outputs[0].satisfied);
    }
}
