//! Admin operations (§4.6): `reset`, `insert`, `purge`, `kill`, `hold`/`unhold`.
//!
//! Grounded on `cylc/flow/task_pool.py`'s `force_spawn_children` (our
//! `purge`, generalized from "spawn one generation of children" to
//! "spawn-and-die a co-temporal subgraph, recursed forward to a stop
//! cycle") and `cylc/flow/scheduler.py`'s `command_*` handlers, which each
//! write a state-dump rotation before mutating — reproduced here as the
//! `rotate_before` call every method makes first.

use super::{Scheduler, StopMode};
use crate::cycle::Point;
use crate::error::{Result, SchedulerError};
use crate::task::TaskId;
pub use crate::task::ResetTarget;
use std::collections::HashSet;

impl Scheduler {
    /// `pause`: holds the whole workflow, same as `hold` with no cycle.
    pub fn pause(&mut self) {
        self.hold(None);
    }

    /// `resume`: reverses `pause`.
    pub fn resume(&mut self) {
        self.unhold();
    }

    /// `release`: clears only the cycle-bound hold set by `hold --cycle`,
    /// leaving a whole-workflow `pause` (if any) untouched.
    pub fn release(&mut self) {
        self.rotate_before("release");
        self.hold_cycle = None;
        self.mark_dirty();
    }

    /// `stop [--mode clean|now]` (§6).
    pub fn stop(&mut self, mode: StopMode) {
        self.rotate_before("stop");
        match mode {
            StopMode::Clean => {
                if let Some(oldest) = self.earliest_unfinished_point() {
                    self.stop_time = Some(oldest);
                }
            }
            StopMode::Now => {
                let ids: Vec<TaskId> = self.tasks.keys().cloned().collect();
                for id in &ids {
                    self.delete_task(id);
                }
                self.force_stop = true;
            }
        }
        self.mark_dirty();
    }

    /// Manual `reset(id, state)`. Writes a pre-op rotation, then applies.
    pub fn reset(&mut self, id: &TaskId, target: ResetTarget) -> Result<()> {
        self.rotate_before("reset");
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| SchedulerError::TaskNotFound(id.to_string()))?;
        task.reset(target)?;
        self.mark_dirty();
        Ok(())
    }

    /// Explicit insertion (lifecycle path (c), §3). A name/cycle collision
    /// with an already-live task is logged critical and dropped without
    /// unwinding the loop, per §7 — callers that want the error back get it
    /// as `Err`, but the scheduler itself never panics or aborts the tick
    /// over this.
    pub fn insert(&mut self, name: &str, point: Point) -> Result<()> {
        self.rotate_before("insert");
        match self.insert_instance(name, point) {
            Ok(()) => Ok(()),
            Err(SchedulerError::DuplicateTask(msg)) => {
                tracing::error!(task = %msg, "insertion collided with a live task, dropped");
                Err(SchedulerError::DuplicateTask(msg))
            }
            Err(e) => Err(e),
        }
    }

    /// `kill(id)`: four-step deletion ritual (§4.6) without spawning a
    /// successor first. Does not attempt to terminate an already-submitted
    /// external job — that is the batch system's concern (§5).
    pub fn kill(&mut self, id: &TaskId) -> Result<()> {
        self.rotate_before("kill");
        if !self.tasks.contains_key(id) {
            return Err(SchedulerError::TaskNotFound(id.to_string()));
        }
        self.delete_task(id);
        self.mark_dirty();
        Ok(())
    }

    /// `kill_cycle(cycle)`: kill every live task at the given cycle point.
    pub fn kill_cycle(&mut self, point: Point) -> Result<Vec<TaskId>> {
        self.rotate_before("kill_cycle");
        let ids: Vec<TaskId> = self
            .tasks
            .keys()
            .filter(|id| id.point.cmp(&point).map(|o| o.is_eq()).unwrap_or(false))
            .cloned()
            .collect();
        for id in &ids {
            self.delete_task(id);
        }
        if !ids.is_empty() {
            self.mark_dirty();
        }
        Ok(ids)
    }

    /// `hold(cycle?)`: with no cycle, holds the whole workflow (no task
    /// dispatches). With a cycle, holds only tasks whose cycle is strictly
    /// beyond it — tasks at or before the given point continue to run.
    pub fn hold(&mut self, cycle: Option<Point>) {
        self.rotate_before("hold");
        match cycle {
            Some(point) => self.hold_cycle = Some(point),
            None => self.held = true,
        }
        self.mark_dirty();
    }

    /// `unhold()`: clears both the whole-workflow hold and any hold-cycle.
    pub fn unhold(&mut self) {
        self.rotate_before("unhold");
        self.held = false;
        self.hold_cycle = None;
        self.mark_dirty();
    }

    /// `purge(id, until)`: recursively spawn-and-die the target and its
    /// co-temporal dependants (tasks whose definition depends on `id`'s
    /// name at zero offset), then recurse forward one cycle at a time up
    /// to and including `until`.
    ///
    /// "Spawn-and-die" means: if the task hasn't spawned its successor yet,
    /// spawn it now (so later cycles are not left dangling on an
    /// unspawned predecessor, invariant 4 of §3), then delete the instance
    /// regardless of its current state.
    pub fn purge(&mut self, id: &TaskId, until: &Point) -> Result<Vec<TaskId>> {
        self.rotate_before("purge");
        let mut deleted = Vec::new();
        let mut cursor = id.point;
        let mut visited = HashSet::new();
        loop {
            if visited.contains(&cursor.canonical()) {
                break;
            }
            visited.insert(cursor.canonical());

            let subgraph_names = self.cotemporal_subgraph(&id.name);
            for name in &subgraph_names {
                let target_id = TaskId::new(name.clone(), cursor);
                if self.tasks.contains_key(&target_id) {
                    self.spawn_and_die(&target_id)?;
                    deleted.push(target_id);
                }
            }

            let past_until = cursor.cmp(until).map(|o| o.is_ge()).unwrap_or(true);
            if past_until {
                break;
            }
            let Some(def) = self.registry().get(&id.name) else { break };
            cursor = def.next_cycle(&cursor)?;
        }
        if !deleted.is_empty() {
            self.mark_dirty();
        }
        Ok(deleted)
    }

    /// The target task's own name plus every registered task name whose
    /// definition has a co-temporal (zero-offset) dependency on it.
    fn cotemporal_subgraph(&self, root_name: &str) -> Vec<String> {
        let mut names = vec![root_name.to_string()];
        for name in self.registry().names() {
            if let Some(def) = self.registry().get(name) {
                let depends_cotemporally = def
                    .prerequisites
                    .iter()
                    .any(|p| p.offset.is_none() && p.task_name == root_name);
                if depends_cotemporally && name != root_name {
                    names.push(name.to_string());
                }
            }
        }
        names
    }

    fn spawn_and_die(&mut self, id: &TaskId) -> Result<()> {
        if let Some(task) = self.tasks.get(id) {
            if !task.spawned && !task.one_off {
                let flow = task.flow;
                if let Some(def) = self.registry().get(&id.name).cloned() {
                    let next_point = def.next_cycle(&id.point)?;
                    match self.insert_instance_with_flow(&id.name, next_point, flow) {
                        Ok(()) | Err(SchedulerError::DuplicateTask(_)) => {}
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        self.delete_task(id);
        Ok(())
    }

    /// Writes a state-dump rotation before an admin mutation, per §4.6's
    /// "rotation is produced before every admin mutation" guarantee. A
    /// no-op (logged at debug) when no state directory is configured.
    fn rotate_before(&self, op: &str) {
        match &self.state_dir {
            Some(dir) => {
                let dump = crate::state_dump::StateDump::capture(self, crate::state_dump::TimeKind::Real, String::new(), None);
                let path = dir.join(format!("rotation-{op}-{}.dump", self.tick_count()));
                if let Err(e) = std::fs::write(&path, dump.to_text()) {
                    tracing::warn!(op, error = %e, "failed to write pre-op state dump rotation");
                }
            }
            None => tracing::debug!(op, "pre-op rotation skipped: no state directory configured"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::Interval;
    use crate::remote::FakeRunner;
    use crate::task::TaskDef;
    use std::sync::Arc;

    fn scheduler() -> Scheduler {
        let mut reg = crate::task::TaskRegistry::new();
        reg.register(TaskDef::new("qd", Interval::parse("PT1H").unwrap()).quick_death());
        Scheduler::new("wf1", reg, Interval::parse("PT24H").unwrap(), Arc::new(FakeRunner::new()))
    }

    #[test]
    fn reset_waiting_clears_satisfaction() {
        let mut s = scheduler();
        let point = crate::cycle::Point::parse("20000101T0000").unwrap();
        s.load_initial("qd", point).unwrap();
        let id = TaskId::new("qd", point);
        s.reset(&id, ResetTarget::Finished).unwrap();
        assert_eq!(s.task(&id).unwrap().state, crate::task::TaskState::Finished);
    }

    #[test]
    fn reset_missing_task_errors() {
        let mut s = scheduler();
        let point = crate::cycle::Point::parse("20000101T0000").unwrap();
        let id = TaskId::new("missing", point);
        assert!(matches!(s.reset(&id, ResetTarget::Waiting), Err(SchedulerError::TaskNotFound(_))));
    }

    #[test]
    fn kill_removes_task() {
        let mut s = scheduler();
        let point = crate::cycle::Point::parse("20000101T0000").unwrap();
        s.load_initial("qd", point).unwrap();
        let id = TaskId::new("qd", point);
        s.kill(&id).unwrap();
        assert!(s.task(&id).is_none());
    }

    #[test]
    fn hold_blocks_dispatch_beyond_cycle() {
        let mut s = scheduler();
        let point = crate::cycle::Point::parse("20000101T0000").unwrap();
        s.hold(Some(point));
        assert!(s.task_count() == 0);
        s.unhold();
    }

    #[test]
    fn purge_deletes_through_until() {
        let mut s = scheduler();
        let p0 = crate::cycle::Point::parse("20000101T0000").unwrap();
        let p1 = crate::cycle::Point::parse("20000101T0100").unwrap();
        s.load_initial("qd", p0).unwrap();
        let id = TaskId::new("qd", p0);
        let deleted = s.purge(&id, &p1).unwrap();
        assert!(deleted.iter().any(|d| d.point == p0));
        assert!(s.task(&id).is_none());
    }
}
