//! State dump / restart (C8): the text serialization of §4.8 — one record
//! per line, just enough to restart the engine rather than a full
//! execution-history archive (that is explicitly out of scope, §1).
//!
//! Grounded on `cylc/flow/state_summary_mgr.py` and the legacy
//! `suite_state_dump` text format: a header line fixing the clock mode,
//! `class <name> : k=v, ...` lines for per-task-type bookkeeping, and one
//! `<cycle> : <name> : <state>|<spawned>|<outputs>|<prereqs>` line per live
//! instance.

use crate::cycle::Point;
use crate::error::{Result, SchedulerError};
use crate::scheduler::Scheduler;
use crate::task::{TaskInstance, TaskState};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Which clock the dump was taken under. A dump taken in one mode may not
/// be reloaded in the other (§4.8: "rejecting a dummy-mode dump when
/// running in real mode and vice versa").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeKind {
    Real,
    Dummy,
}

impl std::fmt::Display for TimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TimeKind::Real => "real",
            TimeKind::Dummy => "dummy",
        })
    }
}

impl FromStr for TimeKind {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "real" => Ok(TimeKind::Real),
            "dummy" => Ok(TimeKind::Dummy),
            other => Err(SchedulerError::StateDumpIncompatible(format!("unknown time kind: {other}"))),
        }
    }
}

/// One `<cycle> : <name> : state|spawned|outputs|prereqs` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRecord {
    pub point: String,
    pub name: String,
    pub state: TaskState,
    pub spawned: bool,
    /// Output satisfaction, in the task's declaration order.
    pub outputs: Vec<bool>,
    /// Prerequisite satisfaction, in the task's declaration order.
    pub prereqs: Vec<bool>,
}

/// The full parsed/capturable dump: header, per-class variables, per-instance records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDump {
    pub time_kind: TimeKind,
    pub time: String,
    pub rate: Option<String>,
    pub class_vars: BTreeMap<String, BTreeMap<String, String>>,
    pub instances: Vec<InstanceRecord>,
}

fn bitmap(bits: &[bool]) -> String {
    bits.iter().map(|b| if *b { '1' } else { '0' }).collect()
}

fn parse_bitmap(s: &str) -> Result<Vec<bool>> {
    s.chars()
        .map(|c| match c {
            '1' => Ok(true),
            '0' => Ok(false),
            other => Err(SchedulerError::StateDumpIncompatible(format!("bad bitmap char: {other}"))),
        })
        .collect()
}

impl StateDump {
    /// Snapshot the scheduler's current task population (§4.8). `time` and
    /// `rate` are caller-supplied (out of core scope: the wall-clock/rate
    /// abstraction belongs to the driving loop, not the dump format).
    pub fn capture(scheduler: &Scheduler, time_kind: TimeKind, time: String, rate: Option<String>) -> Self {
        let mut class_vars = BTreeMap::new();
        for (name, count) in scheduler.live_counts() {
            let mut vars = BTreeMap::new();
            vars.insert("live_count".to_string(), count.to_string());
            class_vars.insert(name.clone(), vars);
        }

        let mut instances: Vec<InstanceRecord> = scheduler
            .tasks_with_ids()
            .map(|(id, t)| InstanceRecord {
                point: id.point.canonical(),
                name: id.name.clone(),
                state: t.state,
                spawned: t.spawned,
                outputs: t.outputs.iter().map(|o| o.satisfied).collect(),
                prereqs: t.prerequisites.iter().map(|p| p.satisfied).collect(),
            })
            .collect();
        instances.sort_by(|a, b| (a.point.as_str(), a.name.as_str()).cmp(&(b.point.as_str(), b.name.as_str())));

        Self { time_kind, time, rate, class_vars, instances }
    }

    /// Serialize to the §4.8 text format.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        match &self.rate {
            Some(rate) => out.push_str(&format!("{} : {}, {}\n", self.time_kind, self.time, rate)),
            None => out.push_str(&format!("{} : {}\n", self.time_kind, self.time)),
        }
        for (name, vars) in &self.class_vars {
            let kv = vars.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(", ");
            out.push_str(&format!("class {name} : {kv}\n"));
        }
        for inst in &self.instances {
            out.push_str(&format!(
                "{} : {} : {}|{}|{}|{}\n",
                inst.point,
                inst.name,
                inst.state,
                inst.spawned,
                bitmap(&inst.outputs),
                bitmap(&inst.prereqs),
            ));
        }
        out
    }

    /// Parse the §4.8 text format back into a [`StateDump`].
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());

        let header = lines
            .next()
            .ok_or_else(|| SchedulerError::StateDumpIncompatible("empty state dump".into()))?;
        let (kind_part, rest) = header
            .split_once(':')
            .ok_or_else(|| SchedulerError::StateDumpIncompatible(format!("malformed header: {header}")))?;
        let time_kind = TimeKind::from_str(kind_part.trim())?;
        let (time, rate) = match rest.split_once(',') {
            Some((t, r)) => (t.trim().to_string(), Some(r.trim().to_string())),
            None => (rest.trim().to_string(), None),
        };

        let mut class_vars = BTreeMap::new();
        let mut instances = Vec::new();
        for line in lines {
            if let Some(rest) = line.strip_prefix("class ") {
                let (name, kv) = rest
                    .split_once(':')
                    .ok_or_else(|| SchedulerError::StateDumpIncompatible(format!("malformed class line: {line}")))?;
                let mut vars = BTreeMap::new();
                for pair in kv.split(',') {
                    let pair = pair.trim();
                    if pair.is_empty() {
                        continue;
                    }
                    let (k, v) = pair.split_once('=').ok_or_else(|| {
                        SchedulerError::StateDumpIncompatible(format!("malformed class var: {pair}"))
                    })?;
                    vars.insert(k.trim().to_string(), v.trim().to_string());
                }
                class_vars.insert(name.trim().to_string(), vars);
            } else {
                let parts: Vec<&str> = line.splitn(3, " : ").collect();
                if parts.len() != 3 {
                    return Err(SchedulerError::StateDumpIncompatible(format!("malformed instance line: {line}")));
                }
                let blob: Vec<&str> = parts[2].split('|').collect();
                if blob.len() != 4 {
                    return Err(SchedulerError::StateDumpIncompatible(format!("malformed state blob: {}", parts[2])));
                }
                instances.push(InstanceRecord {
                    point: parts[0].trim().to_string(),
                    name: parts[1].trim().to_string(),
                    state: TaskState::from_str(blob[0].trim())?,
                    spawned: blob[1].trim().parse().map_err(|_| {
                        SchedulerError::StateDumpIncompatible(format!("bad spawned flag: {}", blob[1]))
                    })?,
                    outputs: parse_bitmap(blob[2].trim())?,
                    prereqs: parse_bitmap(blob[3].trim())?,
                });
            }
        }
        Ok(Self { time_kind, time, rate, class_vars, instances })
    }

    /// Reload this dump into `scheduler`, rejecting a clock-mode mismatch
    /// (§4.8) before touching anything. Each instance is reconstructed via
    /// the registry's constructor (resolving its prerequisite labels
    /// afresh) and then has its satisfaction bitmap and state overwritten
    /// verbatim from the dump — the `no_reset` path the design calls for,
    /// since a freshly-built instance otherwise starts with everything
    /// unsatisfied.
    pub fn restore(&self, scheduler: &mut Scheduler, running_mode: TimeKind) -> Result<()> {
        if self.time_kind != running_mode {
            return Err(SchedulerError::StateDumpIncompatible(format!(
                "dump was taken in {} mode, engine is running in {} mode",
                self.time_kind, running_mode
            )));
        }

        for record in &self.instances {
            let point = Point::parse(&record.point)?;
            let mut instance: TaskInstance = scheduler.registry().build_instance(&record.name, point)?;
            instance.state = record.state;
            instance.spawned = record.spawned;
            for (output, satisfied) in instance.outputs.iter_mut().zip(&record.outputs) {
                output.satisfied = *satisfied;
            }
            for (prereq, satisfied) in instance.prerequisites.iter_mut().zip(&record.prereqs) {
                prereq.satisfied = *satisfied;
            }
            scheduler.restore_task(instance);
        }

        // Applied after the instance-restore loop, which itself bumps
        // `live_counts` per restored instance (`restore_task`) — these
        // dumped values are the authoritative count and must overwrite
        // that running tally, not add to it, or every capture/restore
        // cycle would inflate the count further.
        for (name, vars) in &self.class_vars {
            if let Some(count) = vars.get("live_count").and_then(|v| v.parse().ok()) {
                scheduler.set_live_count(name, count);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::Interval;
    use crate::remote::FakeRunner;
    use crate::task::{TaskDef, TaskId};
    use std::sync::Arc;

    fn scheduler() -> Scheduler {
        let mut reg = crate::task::TaskRegistry::new();
        reg.register(TaskDef::new("a", Interval::parse("P1D").unwrap()));
        reg.register(TaskDef::new("b", Interval::parse("P1D").unwrap()).depends_on("a", "finished"));
        Scheduler::new("wf1", reg, Interval::parse("P2D").unwrap(), Arc::new(FakeRunner::new()))
    }

    #[test]
    fn round_trip_preserves_task_state() {
        let mut s = scheduler();
        let point = Point::parse("20000101T0000").unwrap();
        s.load_initial("a", point).unwrap();
        s.load_initial("b", point).unwrap();
        s.reset(&TaskId::new("a", point), crate::task::ResetTarget::Finished).unwrap();

        let dump = StateDump::capture(&s, TimeKind::Real, "2026-07-28T00:00:00".to_string(), None);
        let text = dump.to_text();
        let reparsed = StateDump::parse(&text).unwrap();
        assert_eq!(reparsed, dump);

        let mut reg = crate::task::TaskRegistry::new();
        reg.register(TaskDef::new("a", Interval::parse("P1D").unwrap()));
        reg.register(TaskDef::new("b", Interval::parse("P1D").unwrap()).depends_on("a", "finished"));
        let mut fresh = Scheduler::new("wf1", reg, Interval::parse("P2D").unwrap(), Arc::new(FakeRunner::new()));
        reparsed.restore(&mut fresh, TimeKind::Real).unwrap();

        let restored_a = fresh.task(&TaskId::new("a", point)).unwrap();
        assert_eq!(restored_a.state, TaskState::Finished);
        assert!(restored_a.outputs.iter().all(|o| o.satisfied));
        let restored_b = fresh.task(&TaskId::new("b", point)).unwrap();
        assert_eq!(restored_b.state, TaskState::Waiting);
        assert!(!restored_b.prerequisites[0].satisfied);
        assert_eq!(fresh.live_count("a"), s.live_count("a"));
        assert_eq!(fresh.live_count("b"), s.live_count("b"));
    }

    #[test]
    fn repeated_restore_cycles_do_not_inflate_live_count() {
        let mut s = scheduler();
        let point = Point::parse("20000101T0000").unwrap();
        s.load_initial("a", point).unwrap();
        assert_eq!(s.live_count("a"), 1);

        for _ in 0..3 {
            let dump = StateDump::capture(&s, TimeKind::Real, "2026-07-28T00:00:00".to_string(), None);
            let mut reg = crate::task::TaskRegistry::new();
            reg.register(TaskDef::new("a", Interval::parse("P1D").unwrap()));
            reg.register(TaskDef::new("b", Interval::parse("P1D").unwrap()).depends_on("a", "finished"));
            s = Scheduler::new("wf1", reg, Interval::parse("P2D").unwrap(), Arc::new(FakeRunner::new()));
            dump.restore(&mut s, TimeKind::Real).unwrap();
            assert_eq!(s.live_count("a"), 1);
        }
    }

    #[test]
    fn rejects_mismatched_clock_mode() {
        let s = scheduler();
        let dump = StateDump::capture(&s, TimeKind::Dummy, "t".to_string(), None);
        let mut fresh = scheduler();
        let err = dump.restore(&mut fresh, TimeKind::Real).unwrap_err();
        assert!(matches!(err, SchedulerError::StateDumpIncompatible(_)));
    }

    #[test]
    fn header_with_rate_round_trips() {
        let text = "real : 2026-07-28T00:00:00, 1000\n";
        let dump = StateDump::parse(text).unwrap();
        assert_eq!(dump.rate.as_deref(), Some("1000"));
        assert_eq!(dump.to_text(), text);
    }
}
