//! Dependency broker (C5): indexes the satisfied outputs of all live tasks
//! and, each tick, marks any unsatisfied prerequisite whose label is
//! present in that index.
//!
//! Grounded on `cylc/flow/task_pool.py`'s `_reset_task_state_and_cycle_point`
//! / output-to-prerequisite matching, rebuilt from scratch every tick rather
//! than incrementally diffed — the design explicitly calls for O(N·mean
//! prereq count) per tick rather than a persistent index, since the broker
//! "does not hold task references beyond the tick."

use crate::task::TaskInstance;
use std::collections::HashMap;

/// Where a satisfied output came from, kept only for diagnostics.
#[derive(Debug, Clone)]
pub struct OutputOrigin {
    pub producer: String,
}

/// Rebuilt every tick from the live task set; never persisted between ticks.
#[derive(Debug, Default)]
pub struct DependencyBroker {
    index: HashMap<String, OutputOrigin>,
}

impl DependencyBroker {
    pub fn new() -> Self {
        Self { index: HashMap::new() }
    }

    /// Phase 1 of the tick (§4.6): rebuild the output index from every live
    /// task, then mark matching prerequisites satisfied. Returns the number
    /// of prerequisites newly satisfied, for observability.
    pub fn negotiate<'a>(&mut self, tasks: impl Iterator<Item = &'a mut TaskInstance>) -> usize {
        let tasks: Vec<&mut TaskInstance> = tasks.collect();
        self.index.clear();
        for task in &tasks {
            for output in &task.outputs {
                if output.satisfied {
                    self.index
                        .entry(output.name.clone())
                        .or_insert_with(|| OutputOrigin { producer: task.id.to_string() });
                }
            }
        }
        let mut newly_satisfied = 0;
        for task in tasks {
            for prereq in &mut task.prerequisites {
                if !prereq.satisfied && self.index.contains_key(&prereq.label) {
                    prereq.satisfied = true;
                    newly_satisfied += 1;
                }
            }
        }
        newly_satisfied
    }

    /// Number of distinct satisfied outputs indexed as of the last `negotiate`.
    pub fn indexed_output_count(&self) -> usize {
        self.index.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::Point;
    use crate::task::{output_message, TaskId, TaskInstance};

    #[test]
    fn satisfies_prerequisite_from_another_tasks_output() {
        let point = Point::parse("20000101T0000").unwrap();
        let a_id = TaskId::new("a", point);
        let mut a = TaskInstance::new(a_id.clone(), vec![], vec![], false, false, None);
        let finished = output_message(&a_id, "finished");
        a.enqueue(1, output_message(&a_id, "started"));
        a.enqueue(1, output_message(&a_id, "completed"));
        a.enqueue(1, finished.clone());
        a.process_inbox();
        assert_eq!(a.state, crate::task::TaskState::Finished);

        let b_id = TaskId::new("b", point);
        let mut b = TaskInstance::new(b_id, vec![finished], vec![], false, false, None);
        assert!(!b.ready_to_run());

        let mut broker = DependencyBroker::new();
        let satisfied = broker.negotiate(vec![&mut a, &mut b].into_iter());
        assert_eq!(satisfied, 1);
        assert!(b.ready_to_run());
    }

    #[test]
    fn rebuild_is_idempotent_across_ticks() {
        let mut broker = DependencyBroker::new();
        assert_eq!(broker.negotiate(std::iter::empty()), 0);
        assert_eq!(broker.indexed_output_count(), 0);
    }
}
