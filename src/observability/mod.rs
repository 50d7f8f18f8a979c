//! Observability for the scheduling engine: structured tracing spans over
//! the tick phases and admin operations, initialized from [`crate::config::LoggingConfig`].

pub mod tracing;

pub use tracing::{init_subscriber, EngineTracer, TracingConfig};
