//! CLI surface (§6, C10 ambient): `clap` derive subcommands translated into
//! the admin operations of §4.6, against a running [`Scheduler`] handle.
//!
//! Grounded on `api::transport::cli::CliAdapter`'s
//! (`error_to_exit_code`/`format_error`) shape, generalized from its fixed
//! `ApiError` codes to this engine's [`SchedulerError`] variants and the
//! exit-code table of §6.

use crate::error::SchedulerError;
use crate::scheduler::{Scheduler, StopMode};
use crate::task::{ResetTarget, TaskId};
use clap::{Parser, Subcommand, ValueEnum};

/// `chronoloom <workflow_id> <command>`. Every subcommand operates against
/// the named workflow; a mismatch between this and the engine's own id is
/// reported as exit code 3 ("no running workflow") before dispatch.
#[derive(Debug, Parser)]
#[command(name = "chronoloom", about = "Cycling workflow scheduler")]
pub struct Cli {
    /// The workflow this command targets.
    pub workflow_id: String,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Mark named outputs complete on one or more task instances.
    SetOutputs {
        /// Output name to mark complete; defaults to `succeeded` if none given.
        #[arg(long = "output")]
        outputs: Vec<String>,
        /// Attribute subsequent spawning to this flow number.
        #[arg(long)]
        flow: Option<u64>,
        task_ids: Vec<String>,
    },
    /// Halt new job submissions workflow-wide.
    Pause,
    /// Reverse a `pause`.
    Resume,
    /// Shut the workflow down.
    Stop {
        #[arg(long, value_enum, default_value_t = StopModeArg::Clean)]
        mode: StopModeArg,
    },
    /// Hold tasks beyond an optional cycle point.
    Hold {
        #[arg(long)]
        cycle: Option<String>,
    },
    /// Release a cycle-bound hold set by `hold --cycle`.
    Release,
    /// Remove one or more task instances without running them.
    Kill { task_ids: Vec<String> },
    /// Insert a task instance at a given cycle.
    Insert { id: String },
    /// Recursively purge a co-temporal subgraph forward to a stop cycle.
    Purge {
        id: String,
        #[arg(long)]
        stop: String,
    },
    /// Reset one or more task instances to a given state.
    Reset {
        #[arg(long, value_enum)]
        state: ResetStateArg,
        task_ids: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StopModeArg {
    Clean,
    Now,
}

impl From<StopModeArg> for StopMode {
    fn from(value: StopModeArg) -> Self {
        match value {
            StopModeArg::Clean => StopMode::Clean,
            StopModeArg::Now => StopMode::Now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResetStateArg {
    Waiting,
    Ready,
    Finished,
}

impl From<ResetStateArg> for ResetTarget {
    fn from(value: ResetStateArg) -> Self {
        match value {
            ResetStateArg::Waiting => ResetTarget::Waiting,
            ResetStateArg::Ready => ResetTarget::WaitingSatisfied,
            ResetStateArg::Finished => ResetTarget::Finished,
        }
    }
}

/// Exit codes per §6: `0` success, `1` command failure, `2` usage error
/// (handled by `clap` itself before we're reached), `3` no running
/// workflow, `4` no matching task.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_COMMAND_FAILURE: i32 = 1;
pub const EXIT_USAGE_ERROR: i32 = 2;
pub const EXIT_NO_RUNNING_WORKFLOW: i32 = 3;
pub const EXIT_NO_MATCHING_TASK: i32 = 4;

fn exit_code_for(err: &SchedulerError) -> i32 {
    match err {
        SchedulerError::TaskNotFound(_) => EXIT_NO_MATCHING_TASK,
        _ => EXIT_COMMAND_FAILURE,
    }
}

/// Formats an error the way the CLI reports it to the user.
pub fn format_error(err: &SchedulerError) -> String {
    format!("Error: {err}")
}

/// Dispatches a parsed [`Cli`] invocation against a live [`Scheduler`],
/// returning the process exit code per §6. `scheduler` is assumed to
/// already exist for the named workflow; a caller managing multiple
/// workflows is responsible for the id -> Scheduler lookup before calling
/// this (its absence is what exit code 3 reports).
pub fn dispatch(cli: &Cli, scheduler: &mut Scheduler) -> i32 {
    if cli.workflow_id != scheduler.workflow_id {
        eprintln!("Error: no running workflow '{}'", cli.workflow_id);
        return EXIT_NO_RUNNING_WORKFLOW;
    }

    let result = run_command(&cli.command, scheduler);
    match result {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("{}", format_error(&e));
            exit_code_for(&e)
        }
    }
}

fn run_command(command: &Command, scheduler: &mut Scheduler) -> crate::error::Result<()> {
    match command {
        Command::SetOutputs { outputs, flow, task_ids } => {
            let names: Vec<&str> = if outputs.is_empty() {
                vec!["succeeded"]
            } else {
                outputs.iter().map(String::as_str).collect()
            };
            for raw_id in task_ids {
                let id = TaskId::parse(raw_id)?;
                if scheduler.task(&id).is_none() {
                    return Err(SchedulerError::TaskNotFound(id.to_string()));
                }
                for output in &names {
                    let text = if *output == "succeeded" {
                        crate::task::output_message(&id, "finished")
                    } else {
                        crate::task::output_message(&id, output)
                    };
                    scheduler.submit_message(id.clone(), 1, text);
                }
                if let Some(flow_id) = flow {
                    scheduler.set_flow(&id, *flow_id)?;
                }
            }
            Ok(())
        }
        Command::Pause => {
            scheduler.pause();
            Ok(())
        }
        Command::Resume => {
            scheduler.resume();
            Ok(())
        }
        Command::Stop { mode } => {
            scheduler.stop((*mode).into());
            Ok(())
        }
        Command::Hold { cycle } => {
            let point = cycle.as_deref().map(crate::cycle::Point::parse).transpose()?;
            scheduler.hold(point);
            Ok(())
        }
        Command::Release => {
            scheduler.release();
            Ok(())
        }
        Command::Kill { task_ids } => {
            for raw_id in task_ids {
                let id = TaskId::parse(raw_id)?;
                scheduler.kill(&id)?;
            }
            Ok(())
        }
        Command::Insert { id } => {
            let id = TaskId::parse(id)?;
            scheduler.insert(&id.name, id.point)
        }
        Command::Purge { id, stop } => {
            let id = TaskId::parse(id)?;
            let until = crate::cycle::Point::parse(stop)?;
            scheduler.purge(&id, &until).map(|_| ())
        }
        Command::Reset { state, task_ids } => {
            for raw_id in task_ids {
                let id = TaskId::parse(raw_id)?;
                scheduler.reset(&id, (*state).into())?;
            }
            Ok(())
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
        reg.register(TaskDef::new("foo", Interval::parse("P1D").unwrap()));
        Scheduler::new("wf1", reg, Interval::parse("P2D").unwrap(), Arc::new(FakeRunner::new()))
    }

    #[test]
    fn mismatched_workflow_id_exits_3() {
        let mut s = scheduler();
        let cli = Cli { workflow_id: "other".into(), command: Command::Pause };
        assert_eq!(dispatch(&cli, &mut s), EXIT_NO_RUNNING_WORKFLOW);
    }

    #[test]
    fn reset_on_missing_task_exits_4() {
        let mut s = scheduler();
        let cli = Cli {
            workflow_id: "wf1".into(),
            command: Command::Reset { state: ResetStateArg::Waiting, task_ids: vec!["foo.20000101T0000".into()] },
        };
        assert_eq!(dispatch(&cli, &mut s), EXIT_NO_MATCHING_TASK);
    }

    #[test]
    fn pause_then_resume_succeeds() {
        let mut s = scheduler();
        let cli = Cli { workflow_id: "wf1".into(), command: Command::Pause };
        assert_eq!(dispatch(&cli, &mut s), EXIT_SUCCESS);
        assert!(s.is_held());
        let cli = Cli { workflow_id: "wf1".into(), command: Command::Resume };
        assert_eq!(dispatch(&cli, &mut s), EXIT_SUCCESS);
        assert!(!s.is_held());
    }

    #[test]
    fn set_outputs_default_is_succeeded() {
        let mut s = scheduler();
        let point = crate::cycle::Point::parse("20000101T0000").unwrap();
        s.load_initial("foo", point).unwrap();
        let cli = Cli {
            workflow_id: "wf1".into(),
            command: Command::SetOutputs { outputs: vec![], flow: None, task_ids: vec!["foo.20000101T0000".into()] },
        };
        assert_eq!(dispatch(&cli, &mut s), EXIT_SUCCESS);
    }

    #[test]
    fn set_outputs_with_flow_attributes_the_task() {
        let mut s = scheduler();
        let point = crate::cycle::Point::parse("20000101T0000").unwrap();
        s.load_initial("foo", point).unwrap();
        let id = TaskId::parse("foo.20000101T0000").unwrap();
        let cli = Cli {
            workflow_id: "wf1".into(),
            command: Command::SetOutputs { outputs: vec![], flow: Some(7), task_ids: vec!["foo.20000101T0000".into()] },
        };
        assert_eq!(dispatch(&cli, &mut s), EXIT_SUCCESS);
        assert_eq!(s.task(&id).unwrap().flow, Some(7));
    }
}
