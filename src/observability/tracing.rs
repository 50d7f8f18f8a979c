//! Tracing spans for the scheduler loop, following `WorkflowTracer`'s
//! `start_*_span` convention but renamed to the tick phases and admin
//! operations this engine actually has.

use tracing::{instrument, span, Level, Span};

/// Tracing configuration, populated from [`crate::config::LoggingConfig`].
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Service name reported on every span.
    pub service_name: String,
    /// Emit JSON-formatted log lines instead of human-readable ones.
    pub json: bool,
    /// One of `trace`, `debug`, `info`, `warn`, `error`.
    pub level: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "chronoloom".to_string(),
            json: false,
            level: "info".to_string(),
        }
    }
}

impl From<&crate::config::LoggingConfig> for TracingConfig {
    fn from(cfg: &crate::config::LoggingConfig) -> Self {
        Self {
            service_name: "chronoloom".to_string(),
            json: cfg.json,
            level: cfg.level.clone(),
        }
    }
}

/// Initialize the global `tracing-subscriber` from an [`AppConfig`](crate::config::AppConfig).
/// Safe to call at most once per process; subsequent calls are no-ops.
pub fn init_subscriber(cfg: &crate::config::LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_new(&cfg.level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if cfg.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(err) = result {
        tracing::debug!("tracing subscriber already initialized: {err}");
    }
}

/// Emits the spans named in the tracer section of the design: one per tick
/// phase, plus task state transitions and host selection.
pub struct EngineTracer {
    config: TracingConfig,
}

impl EngineTracer {
    pub fn new(config: TracingConfig) -> Self {
        Self { config }
    }

    #[instrument(skip(self))]
    pub fn start_tick_span(&self, workflow_id: &str, tick: u64) -> Span {
        span!(
            Level::INFO,
            "scheduler.tick",
            workflow.id = workflow_id,
            tick,
            service = %self.config.service_name
        )
    }

    #[instrument(skip(self))]
    pub fn start_negotiate_span(&self, workflow_id: &str) -> Span {
        span!(Level::DEBUG, "scheduler.negotiate", workflow.id = workflow_id)
    }

    #[instrument(skip(self))]
    pub fn start_dispatch_span(&self, workflow_id: &str) -> Span {
        span!(Level::DEBUG, "scheduler.dispatch", workflow.id = workflow_id)
    }

    #[instrument(skip(self))]
    pub fn start_spawn_span(&self, workflow_id: &str) -> Span {
        span!(Level::DEBUG, "scheduler.spawn", workflow.id = workflow_id)
    }

    #[instrument(skip(self))]
    pub fn start_cleanup_span(&self, workflow_id: &str) -> Span {
        span!(Level::DEBUG, "scheduler.cleanup", workflow.id = workflow_id)
    }

    #[instrument(skip(self))]
    pub fn start_state_transition_span(&self, task_id: &str, from: &str, to: &str) -> Span {
        span!(
            Level::INFO,
            "task.state_transition",
            task.id = task_id,
            state.from = from,
            state.to = to
        )
    }

    #[instrument(skip(self))]
    pub fn start_host_select_span(&self, candidate_count: usize) -> Span {
        span!(Level::INFO, "host.select", candidates = candidate_count)
    }
}

impl Default for EngineTracer {
    fn default() -> Self {
        Self::new(TracingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracer_spans_are_constructible() {
        let tracer = EngineTracer::default();
        let _ = tracer.start_tick_span("wf1", 0);
        let _ = tracer.start_state_transition_span("foo.20000101T0000", "waiting", "submitted");
        let _ = tracer.start_host_select_span(3);
    }
}
