//! Two-pass cleanup (§4.6): bounds memory without losing the most recent
//! finished instance of each task name, which later cycles may still
//! depend on.
//!
//! Grounded on `cylc/flow/task_pool.py`'s `remove_if_complete` and its
//! quick-death short-circuit for "warning"-class tasks whose dependants are
//! all co-temporal.

use super::Scheduler;
use crate::cycle::Point;
use crate::task::{TaskId, TaskState};
use std::collections::HashMap;

pub fn run(scheduler: &mut Scheduler) -> Vec<TaskId> {
    let mut deleted = Vec::new();
    deleted.extend(quick_death_pass(scheduler));
    deleted.extend(general_pass(scheduler));
    deleted
}

fn any_failed_at(scheduler: &Scheduler, point: &Point) -> bool {
    scheduler
        .tasks
        .values()
        .any(|t| t.id.point.cmp(point).map(|o| o.is_eq()).unwrap_or(false) && t.state == TaskState::Failed)
}

fn earliest_unspawned(scheduler: &Scheduler) -> Option<Point> {
    scheduler
        .tasks
        .values()
        .filter(|t| !t.spawned)
        .map(|t| t.id.point)
        .reduce(|a, b| if a.cmp(&b).map(|o| o.is_le()).unwrap_or(true) { a } else { b })
}

fn quick_death_pass(scheduler: &mut Scheduler) -> Vec<TaskId> {
    let oldest_unspawned = earliest_unspawned(scheduler);
    let candidates: Vec<TaskId> = scheduler
        .tasks
        .iter()
        .filter(|(_, t)| t.quick_death && t.state == TaskState::Finished && t.spawned)
        .map(|(id, _)| id.clone())
        .collect();

    let mut deleted = Vec::new();
    for id in candidates {
        if any_failed_at(scheduler, &id.point) {
            continue;
        }
        let strictly_ahead = match &oldest_unspawned {
            None => true,
            Some(p) => p.cmp(&id.point).map(|o| o.is_gt()).unwrap_or(false),
        };
        if strictly_ahead {
            scheduler.delete_task(&id);
            deleted.push(id);
        }
    }
    deleted
}

fn general_pass(scheduler: &mut Scheduler) -> Vec<TaskId> {
    let Some(earliest_unfinished) = scheduler.earliest_unfinished_point() else {
        return Vec::new();
    };

    let eligible: Vec<TaskId> = scheduler
        .tasks
        .iter()
        .filter(|(id, t)| {
            t.state == TaskState::Finished
                && t.spawned
                && id.point.cmp(&earliest_unfinished).map(|o| o.is_lt()).unwrap_or(false)
                && !any_failed_at(scheduler, &id.point)
        })
        .map(|(id, _)| id.clone())
        .collect();

    // Group by name (or one-off follow-on bookkeeping name), keep the
    // latest cycle per group, delete the rest.
    let mut groups: HashMap<String, Vec<TaskId>> = HashMap::new();
    for id in eligible {
        let group_key = scheduler
            .tasks
            .get(&id)
            .and_then(|t| t.follow_on.clone())
            .unwrap_or_else(|| id.name.clone());
        groups.entry(group_key).or_default().push(id);
    }

    let mut deleted = Vec::new();
    for (_, mut ids) in groups {
        ids.sort_by(|a, b| a.point.cmp(&b.point).unwrap_or(std::cmp::Ordering::Equal));
        if let Some(latest) = ids.pop() {
            let _ = latest; // kept, not deleted
        }
        for id in ids {
            scheduler.delete_task(&id);
            deleted.push(id);
        }
    }
    deleted
}
