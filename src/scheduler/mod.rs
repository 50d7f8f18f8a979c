//! Scheduler loop (C6): the driver. Each tick negotiates dependency
//! satisfaction, dispatches ready tasks, spawns successors bounded by the
//! runahead limit, and cleans up spent tasks.
//!
//! Grounded on `cylc/flow/scheduler.py`'s main loop and `task_pool.py`'s
//! `release_runahead_tasks` / `remove_if_complete`, restructured into the
//! four explicit phases the design names so their ordering invariant
//! (negotiate ≺ dispatch ≺ spawn ≺ cleanup) is visible in the code rather
//! than implied by call order deep in a monolithic method.

mod admin;
mod cleanup;

pub use admin::ResetTarget as AdminResetTarget;

use crate::broker::DependencyBroker;
use crate::cycle::{Interval, Point};
use crate::error::{Result, SchedulerError};
use crate::observability::EngineTracer;
use crate::remote::CommandRunner;
use crate::task::{TaskDef, TaskId, TaskInstance, TaskRegistry, TaskState};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Everything one tick touches: the task set, the broker, and the bounds
/// that govern spawning and admission. Held for the process lifetime; the
/// RPC layer (out of core scope) holds an `Arc<Scheduler>` and calls
/// `submit_message` / the admin methods directly.
pub struct Scheduler {
    pub workflow_id: String,
    registry: TaskRegistry,
    tasks: HashMap<TaskId, TaskInstance>,
    broker: DependencyBroker,
    inbox: Mutex<Vec<(TaskId, u8, String)>>,
    dirty: AtomicBool,
    pub max_runahead: Interval,
    pub stop_time: Option<Point>,
    hold_cycle: Option<Point>,
    held: bool,
    live_counts: HashMap<String, u64>,
    tracer: EngineTracer,
    tick_count: AtomicU64,
    runner: Arc<dyn CommandRunner>,
    /// Directory state-dump rotations are written to; `None` disables the
    /// pre-admin-mutation rotation entirely (§4.6).
    state_dir: Option<std::path::PathBuf>,
    /// Set by the admin `stop --mode now` command: forces `should_shutdown`
    /// true on the next tick regardless of outstanding work.
    force_stop: bool,
}

/// `stop [--mode clean|now]` (§6): `Clean` drains in-flight submissions and
/// admits nothing beyond the current earliest-unfinished cycle; `Now`
/// kills every live task immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    Clean,
    Now,
}

/// A snapshot summary of one completed tick, returned for logging/testing.
#[derive(Debug, Default, Clone)]
pub struct TickReport {
    pub negotiated: usize,
    pub dispatched: Vec<TaskId>,
    pub spawned: Vec<TaskId>,
    pub deleted: Vec<TaskId>,
    pub shutdown: bool,
}

impl Scheduler {
    pub fn new(
        workflow_id: impl Into<String>,
        registry: TaskRegistry,
        max_runahead: Interval,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            registry,
            tasks: HashMap::new(),
            broker: DependencyBroker::new(),
            inbox: Mutex::new(Vec::new()),
            dirty: AtomicBool::new(true),
            max_runahead,
            stop_time: None,
            hold_cycle: None,
            held: false,
            live_counts: HashMap::new(),
            tracer: EngineTracer::default(),
            tick_count: AtomicU64::new(0),
            runner,
            state_dir: None,
            force_stop: false,
        }
    }

    /// Configure the directory pre-admin-mutation state-dump rotations are
    /// written to (§4.6).
    pub fn with_state_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn register_task_def(&mut self, def: TaskDef) {
        self.registry.register(def);
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count.load(Ordering::Relaxed)
    }

    pub fn live_counts(&self) -> &HashMap<String, u64> {
        &self.live_counts
    }

    pub fn tasks_with_ids(&self) -> impl Iterator<Item = (&TaskId, &TaskInstance)> {
        self.tasks.iter()
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    pub fn hold_cycle(&self) -> Option<Point> {
        self.hold_cycle
    }

    /// Inserts an already-constructed instance directly, bypassing the
    /// registry build and duplicate check — used only by state-dump
    /// restart (§4.8), which reconstructs via the registry itself and then
    /// overwrites satisfaction flags from the dumped bitmap (`no_reset`).
    pub fn restore_task(&mut self, instance: TaskInstance) {
        *self.live_counts.entry(instance.id.name.clone()).or_insert(0) += 1;
        self.tasks.insert(instance.id, instance);
        self.mark_dirty();
    }

    /// Overwrites the bookkeeping live-instance counter for `name`, used by
    /// state-dump restart to reinstate the dumped class variables rather
    /// than trust the reconstructed instance count alone.
    pub fn set_live_count(&mut self, name: &str, count: u64) {
        self.live_counts.insert(name.to_string(), count);
    }

    pub fn task(&self, id: &TaskId) -> Option<&TaskInstance> {
        self.tasks.get(id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskInstance> {
        self.tasks.values()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn live_count(&self, name: &str) -> u64 {
        *self.live_counts.get(name).unwrap_or(&0)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Load an initial task into the pool (lifecycle path (a), §3). Fails
    /// with [`SchedulerError::DuplicateTask`] on an id collision.
    pub fn load_initial(&mut self, name: &str, point: Point) -> Result<()> {
        self.insert_instance(name, point)
    }

    pub(crate) fn insert_instance(&mut self, name: &str, point: Point) -> Result<()> {
        self.insert_instance_with_flow(name, point, None)
    }

    /// Same as [`Self::insert_instance`], but attributes the new instance to
    /// `flow` (inherited from whatever spawned it, if any) rather than
    /// leaving it flow-less. Used by the spawn phase and `purge`'s
    /// spawn-and-die step to carry a `set-outputs --flow N` attribution
    /// forward onto the successors it causes to spawn.
    pub(crate) fn insert_instance_with_flow(&mut self, name: &str, point: Point, flow: Option<u64>) -> Result<()> {
        let id = TaskId::new(name.to_string(), point);
        if self.tasks.contains_key(&id) {
            return Err(SchedulerError::DuplicateTask(id.to_string()));
        }
        let mut instance = self.registry.build_instance(name, point)?;
        instance.flow = flow;
        *self.live_counts.entry(name.to_string()).or_insert(0) += 1;
        self.tasks.insert(id, instance);
        self.mark_dirty();
        Ok(())
    }

    /// `set-outputs --flow N`: attributes an already-live task to flow `N`
    /// so that any successor the spawn phase creates from it inherits the
    /// same attribution (§6: "optional flow number attributes subsequent
    /// spawning to flow `N`").
    pub fn set_flow(&mut self, id: &TaskId, flow: u64) -> Result<()> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| SchedulerError::TaskNotFound(id.to_string()))?;
        task.flow = Some(flow);
        self.mark_dirty();
        Ok(())
    }

    /// External RPC handlers call this to enqueue an inbound output message;
    /// it only appends and flips the dirty flag, per §5's shared-state rule.
    pub fn submit_message(&self, id: TaskId, priority: u8, text: impl Into<String>) {
        self.inbox.lock().push((id, priority, text.into()));
        self.mark_dirty();
    }

    /// The cycle of the earliest task not yet in the `finished` state —
    /// `P_min` in invariant 5. `None` if the pool is empty.
    pub fn earliest_unfinished_point(&self) -> Option<Point> {
        self.tasks
            .values()
            .filter(|t| t.state != TaskState::Finished)
            .map(|t| t.id.point)
            .reduce(|a, b| if a.cmp(&b).unwrap_or(std::cmp::Ordering::Less).is_le() { a } else { b })
    }

    /// Run one full tick: drain inbox, negotiate, dispatch, spawn, cleanup.
    /// Returns a report and whether the loop should shut down.
    pub async fn tick(&mut self) -> Result<TickReport> {
        let tick_no = self.tick_count.fetch_add(1, Ordering::Relaxed);
        let _span = self.tracer.start_tick_span(&self.workflow_id, tick_no).entered();

        self.drain_inbox();

        let mut report = TickReport::default();
        report.negotiated = self.negotiate();
        report.dispatched = self.dispatch().await?;
        report.spawned = self.spawn_phase()?;
        report.deleted = self.cleanup_phase();
        report.shutdown = self.should_shutdown();

        self.dirty.store(false, Ordering::Release);
        Ok(report)
    }

    fn drain_inbox(&mut self) {
        let messages = std::mem::take(&mut *self.inbox.lock());
        for (id, priority, text) in messages {
            if let Some(task) = self.tasks.get_mut(&id) {
                task.enqueue(priority, text);
            }
        }
        for task in self.tasks.values_mut() {
            if task.process_inbox() {
                self.dirty.store(true, Ordering::Release);
            }
        }
    }

    /// Phase 1: refresh prerequisite satisfaction (C5).
    fn negotiate(&mut self) -> usize {
        let _span = self.tracer.start_negotiate_span(&self.workflow_id).entered();
        self.broker.negotiate(self.tasks.values_mut())
    }

    /// Phase 2: submit every ready task via the command runner (C7),
    /// fanning submissions out concurrently and awaiting them all before
    /// the tick proceeds (§5: in-flight submissions are awaited, not killed).
    async fn dispatch(&mut self) -> Result<Vec<TaskId>> {
        let _span = self.tracer.start_dispatch_span(&self.workflow_id).entered();
        let ready: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|(id, t)| t.ready_to_run() && self.admission_allowed(&id.point))
            .map(|(id, _)| id.clone())
            .collect();

        let mut join_set = tokio::task::JoinSet::new();
        for id in &ready {
            let runner = self.runner.clone();
            let argv = serde_json::json!([id.label(), "submit"]);
            let id = id.clone();
            join_set.spawn(async move {
                let result = runner.run(None, &argv, crate::remote::DEFAULT_TIMEOUT).await;
                (id, result)
            });
        }

        let mut dispatched = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let (id, result) = joined.map_err(|e| SchedulerError::RemoteCommandFailed(e.to_string()))?;
            match result {
                Ok(_) => {
                    if let Some(task) = self.tasks.get_mut(&id) {
                        task.state = TaskState::Submitted;
                        dispatched.push(id);
                    }
                }
                Err(e) => {
                    tracing::warn!(task = %id, error = %e, "job submission failed");
                }
            }
        }
        Ok(dispatched)
    }

    fn admission_allowed(&self, point: &Point) -> bool {
        if self.held {
            return false;
        }
        if let Some(hold_cycle) = &self.hold_cycle {
            if point.cmp(hold_cycle).map(|o| o.is_gt()).unwrap_or(false) {
                return false;
            }
        }
        if let Some(stop) = &self.stop_time {
            if point.cmp(stop).map(|o| o.is_gt()).unwrap_or(false) {
                return false;
            }
        }
        true
    }

    /// Phase 3: spawn successors of every task whose `ready_to_spawn()` is
    /// true, bounded by the runahead limit and stop time.
    fn spawn_phase(&mut self) -> Result<Vec<TaskId>> {
        let _span = self.tracer.start_spawn_span(&self.workflow_id).entered();
        let oldest = self.earliest_unfinished_point();
        let candidates: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|(_, t)| t.ready_to_spawn())
            .map(|(id, _)| id.clone())
            .collect();

        let mut spawned_ids = Vec::new();
        for id in candidates {
            let def = match self.registry.get(&id.name) {
                Some(d) => d.clone(),
                None => continue,
            };
            let next_point = def.next_cycle(&id.point)?;

            if let Some(oldest) = oldest {
                let distance = next_point.sub_point(&oldest)?;
                if distance.cmp(&self.max_runahead)?.is_gt() {
                    continue;
                }
            }

            if let Some(stop) = &self.stop_time {
                if next_point.cmp(stop)?.is_gt() {
                    tracing::info!(task = %id, next = %next_point, "stop time reached, discarding successor");
                    if let Some(task) = self.tasks.get_mut(&id) {
                        task.spawned = true;
                    }
                    continue;
                }
            }

            let parent_flow = self.tasks.get(&id).and_then(|t| t.flow);
            match self.insert_instance_with_flow(&id.name, next_point, parent_flow) {
                Ok(()) => spawned_ids.push(TaskId::new(id.name.clone(), next_point)),
                Err(SchedulerError::DuplicateTask(_)) => {}
                Err(e) => return Err(e),
            }
            if let Some(task) = self.tasks.get_mut(&id) {
                task.spawned = true;
            }
        }
        Ok(spawned_ids)
    }

    /// Phase 4: two-pass cleanup (§4.6), delegated to [`cleanup`].
    fn cleanup_phase(&mut self) -> Vec<TaskId> {
        let _span = self.tracer.start_cleanup_span(&self.workflow_id).entered();
        cleanup::run(self)
    }

    fn should_shutdown(&self) -> bool {
        if self.force_stop {
            return true;
        }
        let Some(stop) = &self.stop_time else { return false };
        self.tasks.values().all(|t| {
            matches!(t.state, TaskState::Finished | TaskState::Failed) && (t.spawned || t.one_off)
                || t.id.point.cmp(stop).map(|o| o.is_gt()).unwrap_or(false)
        })
    }

    pub(crate) fn delete_task(&mut self, id: &TaskId) {
        if let Some(count) = self.live_counts.get_mut(&id.name) {
            *count = count.saturating_sub(1);
        }
        self.tasks.remove(id);
        tracing::info!(task = %id, "deleted");
    }
}
