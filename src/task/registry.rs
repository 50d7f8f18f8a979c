//! Task-type registry: the original's dynamic-class-loading-by-name becomes
//! a map from task name to immutable descriptor ([`TaskDef`]), looked up by
//! the scheduler (spawning) and the state dump loader (restart).

use super::instance::TaskInstance;
use super::TaskId;
use crate::cycle::{Interval, Point};
use crate::error::{Result, SchedulerError};
use std::collections::HashMap;

/// One edge of a task's dependency graph: `task_name[offset] => output`,
/// resolved against a concrete cycle point to produce the prerequisite
/// label the broker indexes against.
#[derive(Debug, Clone)]
pub struct PrereqSpec {
    /// Offset from this task's own cycle point; `None` means co-temporal.
    pub offset: Option<Interval>,
    pub task_name: String,
    /// Output name, e.g. `"finished"` or a custom milestone.
    pub output: String,
}

/// Immutable task metadata (`D` in the data model): name, successor step,
/// quick-death/one-off flags, dependency edges.
#[derive(Debug, Clone)]
pub struct TaskDef {
    pub name: String,
    /// The cycling step used to compute this task's successor cycle.
    pub step: Interval,
    pub quick_death: bool,
    pub one_off: bool,
    /// If one-off, the name bookkeeping should treat as this task's
    /// successor for cleanup grouping purposes (§4.6 general pass).
    pub follow_on: Option<String>,
    pub prerequisites: Vec<PrereqSpec>,
    /// Outputs beyond the three implicit ones (`started`/`completed`/`finished`).
    pub extra_outputs: Vec<String>,
}

impl TaskDef {
    pub fn new(name: impl Into<String>, step: Interval) -> Self {
        Self {
            name: name.into(),
            step,
            quick_death: false,
            one_off: false,
            follow_on: None,
            prerequisites: Vec::new(),
            extra_outputs: Vec::new(),
        }
    }

    pub fn quick_death(mut self) -> Self {
        self.quick_death = true;
        self
    }

    pub fn one_off(mut self, follow_on: Option<String>) -> Self {
        self.one_off = true;
        self.follow_on = follow_on;
        self
    }

    pub fn depends_on(mut self, task_name: impl Into<String>, output: impl Into<String>) -> Self {
        self.prerequisites.push(PrereqSpec { offset: None, task_name: task_name.into(), output: output.into() });
        self
    }

    pub fn depends_on_offset(
        mut self,
        task_name: impl Into<String>,
        offset: Interval,
        output: impl Into<String>,
    ) -> Self {
        self.prerequisites.push(PrereqSpec { offset: Some(offset), task_name: task_name.into(), output: output.into() });
        self
    }

    /// The cycle point of this task's successor.
    pub fn next_cycle(&self, point: &Point) -> Result<Point> {
        point.add(&self.step)
    }
}

/// Name -> descriptor map, built once at startup from the (out-of-scope)
/// workflow definition parser.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    defs: HashMap<String, TaskDef>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self { defs: HashMap::new() }
    }

    pub fn register(&mut self, def: TaskDef) {
        self.defs.insert(def.name.clone(), def);
    }

    pub fn get(&self, name: &str) -> Option<&TaskDef> {
        self.defs.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.defs.keys().map(String::as_str)
    }

    /// Construct a fresh *waiting* instance of `name` at `point`, resolving
    /// every prerequisite edge to a concrete output label. Used both by
    /// ordinary spawning and by state-dump restart (the latter immediately
    /// overwrites satisfaction flags from the dumped bitmap rather than
    /// resetting them, matching the original's `no_reset` constructor flag).
    pub fn build_instance(&self, name: &str, point: Point) -> Result<TaskInstance> {
        let def = self
            .get(name)
            .ok_or_else(|| SchedulerError::ConfigError(format!("unknown task type: {name}")))?;
        let mut prereq_labels = Vec::with_capacity(def.prerequisites.len());
        for spec in &def.prerequisites {
            let dep_point = match &spec.offset {
                Some(offset) => point.add(offset)?,
                None => point,
            };
            let dep_id = TaskId::new(spec.task_name.clone(), dep_point);
            prereq_labels.push(super::output_message(&dep_id, &spec.output));
        }
        let id = TaskId::new(name.to_string(), point);
        Ok(TaskInstance::new(
            id,
            prereq_labels,
            def.extra_outputs.clone(),
            def.quick_death,
            def.one_off,
            def.follow_on.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_instance_resolves_cotemporal_prereq() {
        let mut reg = TaskRegistry::new();
        reg.register(TaskDef::new("a", Interval::parse("P1D").unwrap()));
        reg.register(TaskDef::new("b", Interval::parse("P1D").unwrap()).depends_on("a", "finished"));
        let point = Point::parse("20000101T0000").unwrap();
        let b = reg.build_instance("b", point).unwrap();
        assert_eq!(b.prerequisites.len(), 1);
        assert_eq!(b.prerequisites[0].label, "a.20000101T000000 finished");
    }

    #[test]
    fn build_instance_resolves_offset_prereq() {
        let mut reg = TaskRegistry::new();
        reg.register(TaskDef::new("foo", Interval::parse("PT12H").unwrap()).depends_on_offset(
            "foo",
            Interval::parse("-PT12H").unwrap(),
            "finished",
        ));
        let point = Point::parse("20000101T1200").unwrap();
        let inst = reg.build_instance("foo", point).unwrap();
        assert_eq!(inst.prerequisites[0].label, "foo.20000101T000000 finished");
    }
}
