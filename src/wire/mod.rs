//! Wire protocol (§6, C10 ambient, feature `http`): a minimal JSON
//! request/response server standing in for the full GraphQL/RPC surface
//! the design treats as an external collaborator. Every mutation name maps
//! onto the same admin operations the CLI (`crate::cli`) dispatches to, so
//! the two surfaces can never drift behaviourally.
//!
//! Grounded on `api::rest::server::RestApiServer`, trimmed to the single
//! `/rpc` mutation endpoint this engine's external interface actually
//! needs, with `tower_http::trace::TraceLayer` kept for the same
//! request-level spans that router wires up.

use crate::error::{Result, SchedulerError};
use crate::scheduler::{Scheduler, StopMode};
use crate::task::{ResetTarget, TaskId};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared handle a running HTTP server holds onto; mutations take the lock
/// for the duration of a single admin operation, mirroring the scheduler
/// loop's own single-threaded-cooperative mutation model (§5).
pub type SharedScheduler = Arc<Mutex<Scheduler>>;

/// `{mutation, variables}` request body (§6: "payload is a mutation name
/// plus a variables map; variables schema mirrors CLI flags").
#[derive(Debug, Deserialize)]
pub struct MutationRequest {
    pub mutation: String,
    #[serde(default)]
    pub variables: Value,
}

#[derive(Debug, Serialize)]
struct MutationResponse {
    result: Value,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

/// Builds the router: a single `POST /rpc` endpoint, traced per-request and
/// open to cross-origin admin tooling.
pub fn router(scheduler: SharedScheduler) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());
    Router::new()
        .route("/rpc", post(handle_mutation))
        .layer(middleware)
        .with_state(scheduler)
}

async fn handle_mutation(
    State(scheduler): State<SharedScheduler>,
    Json(request): Json<MutationRequest>,
) -> (StatusCode, Json<Value>) {
    let mut scheduler = scheduler.lock();
    match apply_mutation(&request.mutation, &request.variables, &mut scheduler) {
        Ok(result) => (StatusCode::OK, Json(serde_json::to_value(MutationResponse { result }).unwrap_or(Value::Null))),
        Err(e) => {
            let status = match e {
                SchedulerError::TaskNotFound(_) => StatusCode::NOT_FOUND,
                SchedulerError::DuplicateTask(_) => StatusCode::CONFLICT,
                SchedulerError::ConfigError(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            let body = ErrorBody { error: e.to_string(), kind: error_kind(&e) };
            (status, Json(serde_json::to_value(body).unwrap_or(Value::Null)))
        }
    }
}

fn error_kind(err: &SchedulerError) -> &'static str {
    match err {
        SchedulerError::ConfigError(_) => "ConfigError",
        SchedulerError::CycleError(_) => "CycleError",
        SchedulerError::CycleKindMismatch(_) => "CycleKindMismatch",
        SchedulerError::UnsafeExpression(_) => "UnsafeExpression",
        SchedulerError::EvalError(_) => "EvalError",
        SchedulerError::NoHostsAvailable { .. } => "NoHostsAvailable",
        SchedulerError::RemoteCommandFailed(_) => "RemoteCommandFailed",
        SchedulerError::TaskNotFound(_) => "TaskNotFound",
        SchedulerError::DuplicateTask(_) => "DuplicateTask",
        SchedulerError::StateDumpIncompatible(_) => "StateDumpIncompatible",
        SchedulerError::InvalidStateTransition { .. } => "InvalidStateTransition",
        SchedulerError::Io(_) => "Io",
    }
}

fn str_var<'a>(vars: &'a Value, key: &str) -> Result<&'a str> {
    vars.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| SchedulerError::ConfigError(format!("missing variable: {key}")))
}

fn str_list_var(vars: &Value, key: &str) -> Vec<String> {
    vars.get(key)
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

/// Dispatches one `{mutation, variables}` request to the matching admin
/// operation, returning a JSON-encodable result payload.
fn apply_mutation(mutation: &str, vars: &Value, scheduler: &mut Scheduler) -> Result<Value> {
    match mutation {
        "setOutputs" => {
            let task_ids = str_list_var(vars, "taskIds");
            let outputs = str_list_var(vars, "outputs");
            let flow = vars.get("flow").and_then(Value::as_u64);
            let names: Vec<&str> = if outputs.is_empty() {
                vec!["succeeded"]
            } else {
                outputs.iter().map(String::as_str).collect()
            };
            for raw in &task_ids {
                let id = TaskId::parse(raw)?;
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
                    scheduler.set_flow(&id, flow_id)?;
                }
            }
            Ok(Value::Bool(true))
        }
        "pause" => {
            scheduler.pause();
            Ok(Value::Bool(true))
        }
        "resume" => {
            scheduler.resume();
            Ok(Value::Bool(true))
        }
        "stop" => {
            let mode = match vars.get("mode").and_then(Value::as_str) {
                Some("now") => StopMode::Now,
                _ => StopMode::Clean,
            };
            scheduler.stop(mode);
            Ok(Value::Bool(true))
        }
        "hold" => {
            let point = match vars.get("cycle").and_then(Value::as_str) {
                Some(c) => Some(crate::cycle::Point::parse(c)?),
                None => None,
            };
            scheduler.hold(point);
            Ok(Value::Bool(true))
        }
        "release" => {
            scheduler.release();
            Ok(Value::Bool(true))
        }
        "kill" => {
            for raw in str_list_var(vars, "taskIds") {
                let id = TaskId::parse(&raw)?;
                scheduler.kill(&id)?;
            }
            Ok(Value::Bool(true))
        }
        "insert" => {
            let id = TaskId::parse(str_var(vars, "id")?)?;
            scheduler.insert(&id.name, id.point)?;
            Ok(Value::Bool(true))
        }
        "purge" => {
            let id = TaskId::parse(str_var(vars, "id")?)?;
            let until = crate::cycle::Point::parse(str_var(vars, "stop")?)?;
            let deleted = scheduler.purge(&id, &until)?;
            Ok(Value::Array(deleted.into_iter().map(|d| Value::String(d.to_string())).collect()))
        }
        "reset" => {
            let state = match str_var(vars, "state")? {
                "waiting" => ResetTarget::Waiting,
                "ready" => ResetTarget::WaitingSatisfied,
                "finished" => ResetTarget::Finished,
                other => return Err(SchedulerError::ConfigError(format!("unknown reset state: {other}"))),
            };
            for raw in str_list_var(vars, "taskIds") {
                let id = TaskId::parse(&raw)?;
                scheduler.reset(&id, state)?;
            }
            Ok(Value::Bool(true))
        }
        other => Err(SchedulerError::ConfigError(format!("unknown mutation: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::Interval;
    use crate::remote::FakeRunner;
    use crate::task::TaskDef;

    fn scheduler() -> Scheduler {
        let mut reg = crate::task::TaskRegistry::new();
        reg.register(TaskDef::new("foo", Interval::parse("P1D").unwrap()));
        Scheduler::new("wf1", reg, Interval::parse("P2D").unwrap(), Arc::new(FakeRunner::new()))
    }

    #[test]
    fn pause_mutation_holds_workflow() {
        let mut s = scheduler();
        apply_mutation("pause", &Value::Null, &mut s).unwrap();
        assert!(s.is_held());
    }

    #[test]
    fn unknown_mutation_is_config_error() {
        let mut s = scheduler();
        let err = apply_mutation("frobnicate", &Value::Null, &mut s).unwrap_err();
        assert!(matches!(err, SchedulerError::ConfigError(_)));
    }

    #[test]
    fn kill_missing_task_is_task_not_found() {
        let mut s = scheduler();
        let vars = serde_json::json!({"taskIds": ["foo.20000101T0000"]});
        let err = apply_mutation("kill", &vars, &mut s).unwrap_err();
        assert!(matches!(err, SchedulerError::TaskNotFound(_)));
    }
}
