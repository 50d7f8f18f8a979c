//! Integration tests: full scheduler-loop execution across tick boundaries.
//!
//! Each test drives `Scheduler::tick()` the way the process entry point
//! does (`src/bin/chronoloom.rs`'s `run` loop), rather than calling the
//! individual phase methods directly, so the negotiate/dispatch/spawn/
//! cleanup ordering is exercised as a whole.

use chronoloom::task::output_message;
use chronoloom::{Interval, Point, Scheduler, TaskDef, TaskId, TaskRegistry, TaskState};
use std::sync::Arc;

fn fake_runner() -> Arc<chronoloom::remote::FakeRunner> {
    Arc::new(chronoloom::remote::FakeRunner::new().with_response("localhost", serde_json::json!([])))
}

/// Drives one task instance through `started` -> `completed` -> `finished`
/// and ticks once so the scheduler observes the transition.
async fn finish_task(scheduler: &mut Scheduler, id: &TaskId) -> chronoloom::error::Result<()> {
    scheduler.submit_message(id.clone(), 1, output_message(id, "started"));
    scheduler.submit_message(id.clone(), 1, output_message(id, "completed"));
    scheduler.submit_message(id.clone(), 1, output_message(id, "finished"));
    scheduler.tick().await?;
    Ok(())
}

#[tokio::test]
async fn linear_flow_propagates_through_dependency_chain() {
    // Arrange: a => b => c, all one-off, single cycle.
    let mut registry = TaskRegistry::new();
    registry.register(TaskDef::new("a", Interval::parse("P1D").unwrap()).one_off(None));
    registry.register(
        TaskDef::new("b", Interval::parse("P1D").unwrap())
            .one_off(None)
            .depends_on("a", "finished"),
    );
    registry.register(
        TaskDef::new("c", Interval::parse("P1D").unwrap())
            .one_off(None)
            .depends_on("b", "finished"),
    );
    let point = Point::parse("20000101T0000").unwrap();
    let mut scheduler =
        Scheduler::new("wf", registry, Interval::parse("P1D").unwrap(), fake_runner());
    scheduler.load_initial("a", point).unwrap();
    scheduler.load_initial("b", point).unwrap();
    scheduler.load_initial("c", point).unwrap();
    let a = TaskId::new("a", point);
    let b = TaskId::new("b", point);
    let c = TaskId::new("c", point);

    // Act: a has no prerequisites, so the first tick dispatches it.
    scheduler.tick().await.unwrap();
    assert_eq!(scheduler.task(&a).unwrap().state, TaskState::Submitted);
    assert_eq!(scheduler.task(&b).unwrap().state, TaskState::Waiting);

    // Driving a to completion lets the same tick's negotiate phase satisfy
    // b's prerequisite and its dispatch phase submit it.
    finish_task(&mut scheduler, &a).await.unwrap();
    assert_eq!(scheduler.task(&a).unwrap().state, TaskState::Finished);
    assert_eq!(scheduler.task(&b).unwrap().state, TaskState::Submitted);
    assert_eq!(scheduler.task(&c).unwrap().state, TaskState::Waiting);

    finish_task(&mut scheduler, &b).await.unwrap();
    assert_eq!(scheduler.task(&b).unwrap().state, TaskState::Finished);
    assert_eq!(scheduler.task(&c).unwrap().state, TaskState::Submitted);

    // Assert: the whole chain finishes in dependency order.
    finish_task(&mut scheduler, &c).await.unwrap();
    assert_eq!(scheduler.task(&c).unwrap().state, TaskState::Finished);
}

#[tokio::test]
async fn recurrence_is_bounded_by_runahead() {
    // Arrange: a standalone recurring task, stepping every 12h, runahead 24h.
    let mut registry = TaskRegistry::new();
    registry.register(TaskDef::new("foo", Interval::parse("PT12H").unwrap()));
    let start = Point::parse("20000101T0000").unwrap();
    let mut scheduler = Scheduler::new(
        "wf",
        registry,
        Interval::parse("PT24H").unwrap(),
        fake_runner(),
    );
    scheduler.load_initial("foo", start).unwrap();

    // Act: tick until the runahead window stops growing (a handful of ticks
    // is enough for three successive spawns to settle).
    for _ in 0..5 {
        scheduler.tick().await.unwrap();
    }

    // Assert: T00, T12, T24 are live; T36 does not exist because it is 36h
    // ahead of the still-unfinished T00 and the runahead limit is 24h.
    let t12 = Point::parse("20000101T1200").unwrap();
    let t24 = Point::parse("20000102T0000").unwrap();
    let t36 = Point::parse("20000102T1200").unwrap();
    assert!(scheduler.task(&TaskId::new("foo", start)).is_some());
    assert!(scheduler.task(&TaskId::new("foo", t12)).is_some());
    assert!(scheduler.task(&TaskId::new("foo", t24)).is_some());
    assert!(scheduler.task(&TaskId::new("foo", t36)).is_none());

    // Finishing T00 advances the earliest-unfinished point, which lets the
    // next tick admit T36 into the runahead window.
    finish_task(&mut scheduler, &TaskId::new("foo", start)).await.unwrap();
    scheduler.tick().await.unwrap();
    assert!(scheduler.task(&TaskId::new("foo", t36)).is_some());
}

#[tokio::test]
async fn quick_death_task_is_deleted_once_its_cycle_is_behind() {
    // Arrange: a quick-death task recurring every 1 day, no successor
    // dependency, so each instance spawns and finishes independently.
    let mut registry = TaskRegistry::new();
    registry.register(TaskDef::new("qd", Interval::parse("P1D").unwrap()).quick_death());
    let t0 = Point::parse("20000101T0000").unwrap();
    let mut scheduler =
        Scheduler::new("wf", registry, Interval::parse("P2D").unwrap(), fake_runner());
    scheduler.load_initial("qd", t0).unwrap();
    let qd0 = TaskId::new("qd", t0);

    // Act: drive qd@T0 through submission, spawning its successor, then
    // completion.
    scheduler.tick().await.unwrap();
    assert_eq!(scheduler.task(&qd0).unwrap().state, TaskState::Submitted);
    finish_task(&mut scheduler, &qd0).await.unwrap();
    let t1 = Point::parse("20000102T0000").unwrap();
    let qd1 = TaskId::new("qd", t1);
    assert!(scheduler.task(&qd1).is_some(), "successor should have spawned");

    // qd1 is now the earliest unspawned instance, so qd0 is strictly behind
    // it and eligible for the quick-death pass.
    scheduler.tick().await.unwrap();

    // Assert: qd@T0 is gone once nothing unspawned remains at or before it.
    assert!(scheduler.task(&qd0).is_none());
}

#[tokio::test]
async fn failed_cycle_is_never_swept_by_quick_death_cleanup() {
    // Arrange: same quick-death setup, but qd@T0 fails instead of finishing.
    let mut registry = TaskRegistry::new();
    registry.register(TaskDef::new("qd", Interval::parse("P1D").unwrap()).quick_death());
    let t0 = Point::parse("20000101T0000").unwrap();
    let mut scheduler =
        Scheduler::new("wf", registry, Interval::parse("P2D").unwrap(), fake_runner());
    scheduler.load_initial("qd", t0).unwrap();
    let qd0 = TaskId::new("qd", t0);
    scheduler.tick().await.unwrap();

    // Act: fail qd@T0 outright (a submitted task can still spawn its
    // successor once it fails, since `ready_to_spawn` admits the failed
    // state too, but the quick-death pass only ever targets `Finished`
    // instances).
    scheduler.submit_message(qd0.clone(), 1, format!("{} failed", qd0.label()));
    scheduler.tick().await.unwrap();
    assert_eq!(scheduler.task(&qd0).unwrap().state, TaskState::Failed);

    for _ in 0..3 {
        scheduler.tick().await.unwrap();
    }

    // Assert: qd@T0 is never deleted, regardless of how far cleanup runs.
    assert!(scheduler.task(&qd0).is_some());
    assert_eq!(scheduler.task(&qd0).unwrap().state, TaskState::Failed);
}

#[tokio::test]
async fn set_flow_propagates_to_spawned_successor() {
    // Arrange: a lone recurring task, no dependants, so its own spawn is the
    // only successor the flow attribution has to survive.
    let mut registry = TaskRegistry::new();
    registry.register(TaskDef::new("foo", Interval::parse("P1D").unwrap()));
    let t0 = Point::parse("20000101T0000").unwrap();
    let mut scheduler =
        Scheduler::new("wf", registry, Interval::parse("P2D").unwrap(), fake_runner());
    scheduler.load_initial("foo", t0).unwrap();
    let foo0 = TaskId::new("foo", t0);

    // Act: attribute foo@T0 to flow 7 (as `set-outputs --flow 7` would),
    // then drive it to completion so the spawn phase creates its successor.
    scheduler.set_flow(&foo0, 7).unwrap();
    scheduler.tick().await.unwrap();
    finish_task(&mut scheduler, &foo0).await.unwrap();

    // Assert: the spawned successor inherited flow 7 from its parent.
    let t1 = Point::parse("20000102T0000").unwrap();
    let foo1 = TaskId::new("foo", t1);
    assert!(scheduler.task(&foo1).is_some(), "successor should have spawned");
    assert_eq!(scheduler.task(&foo1).unwrap().flow, Some(7));
}
