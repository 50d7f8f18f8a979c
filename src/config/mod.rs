//! Configuration loading, validation, and environment overrides.

use crate::error::{Result, SchedulerError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Loads and validates [`AppConfig`] from TOML files and `CHRONOLOOM_*` env vars.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a TOML file on disk.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(&content)
    }

    /// Load configuration from a TOML string.
    pub fn load_from_str(content: &str) -> Result<AppConfig> {
        let mut config: AppConfig = toml::from_str(content)
            .map_err(|e| SchedulerError::ConfigError(format!("invalid toml: {e}")))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Build the default configuration, applying only environment overrides.
    pub fn load_from_env() -> Result<AppConfig> {
        let mut config = AppConfig::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Service identity.
    #[serde(default)]
    pub service: ServiceConfig,
    /// Logging/tracing setup.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Scheduler loop bounds.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Host-selection candidate pool.
    #[serde(default)]
    pub host_pool: HostPoolConfig,
    /// Task type declarations the binary builds its [`crate::task::TaskRegistry`]
    /// from. The graph-definition DSL itself is out of core scope (§1); this
    /// is the minimal on-disk form needed to run the engine end-to-end.
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}

impl AppConfig {
    /// Validate every sub-section, failing fast rather than at first use.
    pub fn validate(&self) -> Result<()> {
        self.service.validate()?;
        self.logging.validate()?;
        self.scheduler.validate()?;
        self.host_pool.validate()?;
        for task in &self.tasks {
            task.validate()?;
        }
        Ok(())
    }

    /// Build a [`crate::task::TaskRegistry`] from the `[[tasks]]` declarations.
    pub fn build_registry(&self) -> Result<crate::task::TaskRegistry> {
        let mut registry = crate::task::TaskRegistry::new();
        for spec in &self.tasks {
            registry.register(spec.to_task_def()?);
        }
        Ok(registry)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CHRONOLOOM_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("CHRONOLOOM_SERVICE_NAME") {
            self.service.name = val;
        }
        if let Ok(val) = std::env::var("CHRONOLOOM_SERVICE_ENV") {
            self.service.environment = val;
        }
        if let Ok(val) = std::env::var("CHRONOLOOM_MAX_RUNAHEAD") {
            self.scheduler.max_runahead = val;
        }
        if let Ok(val) = std::env::var("CHRONOLOOM_TICK_INTERVAL_MS") {
            if let Ok(ms) = val.parse() {
                self.scheduler.tick_interval_ms = ms;
            }
        }
    }
}

/// Service identity, reported in spans and log lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name, e.g. `chronoloom`.
    pub name: String,
    /// Service version (defaults to the crate version).
    pub version: String,
    /// Deployment environment: `development`, `staging`, `production`.
    pub environment: String,
}

impl ServiceConfig {
    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(SchedulerError::ConfigError(
                "service name cannot be empty".into(),
            ));
        }
        Ok(())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "chronoloom".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Logging/tracing configuration, consumed by `tracing-subscriber` at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// One of `trace`, `debug`, `info`, `warn`, `error`.
    pub level: String,
    /// Emit span/field-structured output rather than bare messages.
    pub structured: bool,
    /// Emit JSON-formatted log lines instead of human-readable ones.
    pub json: bool,
}

impl LoggingConfig {
    fn validate(&self) -> Result<()> {
        const VALID: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !VALID.contains(&self.level.as_str()) {
            return Err(SchedulerError::ConfigError(format!(
                "invalid log level: {}",
                self.level
            )));
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            structured: true,
            json: false,
        }
    }
}

/// Scheduler loop bounds: the runahead limit, tick cadence, and optional stop time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval string (e.g. `PT24H`, integer-family `P4`) bounding how far ahead tasks spawn.
    pub max_runahead: String,
    /// Delay between scheduler ticks.
    pub tick_interval_ms: u64,
    /// Optional cycle point beyond which no task is admitted.
    pub stop_time: Option<String>,
}

impl SchedulerConfig {
    fn validate(&self) -> Result<()> {
        if self.max_runahead.is_empty() {
            return Err(SchedulerError::ConfigError(
                "max_runahead cannot be empty".into(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(SchedulerError::ConfigError(
                "tick_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_runahead: "PT24H".to_string(),
            tick_interval_ms: 1000,
            stop_time: None,
        }
    }
}

/// Candidate pool for host selection (C3).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HostPoolConfig {
    /// Candidate host names or addresses.
    pub hosts: Vec<String>,
    /// Hosts excluded regardless of threshold results, with a human reason.
    pub blacklist: Vec<String>,
    /// Reason reported alongside blacklist rejections.
    pub blacklist_reason: Option<String>,
    /// Multi-line filter/rank program, `None` meaning "choose at random".
    pub thresholds: Option<String>,
}

impl HostPoolConfig {
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// One `[[tasks]]` table: a task name, its recurrence step, and dependency
/// edges in `name:output` or `name:output:offset` form (offset is an
/// interval string applied to the dependency's own cycle point).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskSpec {
    pub name: String,
    pub step: String,
    #[serde(default)]
    pub quick_death: bool,
    #[serde(default)]
    pub one_off: bool,
    #[serde(default)]
    pub follow_on: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub extra_outputs: Vec<String>,
}

impl TaskSpec {
    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(SchedulerError::ConfigError("task name cannot be empty".into()));
        }
        if self.step.is_empty() {
            return Err(SchedulerError::ConfigError(format!("task {}: step cannot be empty", self.name)));
        }
        Ok(())
    }

    fn to_task_def(&self) -> Result<crate::task::TaskDef> {
        let step = crate::cycle::Interval::parse(&self.step)?;
        let mut def = crate::task::TaskDef::new(self.name.clone(), step);
        if self.quick_death {
            def = def.quick_death();
        }
        if self.one_off {
            def = def.one_off(self.follow_on.clone());
        }
        for edge in &self.depends_on {
            let parts: Vec<&str> = edge.split(':').collect();
            match parts.as_slice() {
                [name, output] => def = def.depends_on(*name, *output),
                [name, output, offset] => {
                    def = def.depends_on_offset(*name, crate::cycle::Interval::parse(offset)?, *output)
                }
                _ => {
                    return Err(SchedulerError::ConfigError(format!(
                        "task {}: malformed depends_on entry: {edge}",
                        self.name
                    )))
                }
            }
        }
        def.extra_outputs = self.extra_outputs.clone();
        Ok(def)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_bad_log_level() {
        let mut config = AppConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn builds_registry_from_task_specs() {
        let toml = r#"
            [[tasks]]
            name = "fetch"
            step = "P1D"

            [[tasks]]
            name = "process"
            step = "P1D"
            depends_on = ["fetch:finished"]
        "#;
        let config = ConfigLoader::load_from_str(toml).unwrap();
        let registry = config.build_registry().unwrap();
        assert!(registry.get("fetch").is_some());
        let process = registry.get("process").unwrap();
        assert_eq!(process.prerequisites.len(), 1);
        assert_eq!(process.prerequisites[0].task_name, "fetch");
    }

    #[test]
    fn loads_toml_with_overrides() {
        let toml = r#"
            [service]
            name = "test-engine"
            version = "0.0.0"
            environment = "staging"

            [logging]
            level = "debug"
            structured = true
            json = true

            [scheduler]
            max_runahead = "PT12H"
            tick_interval_ms = 500
        "#;
        let config = ConfigLoader::load_from_str(toml).unwrap();
        assert_eq!(config.service.name, "test-engine");
        assert_eq!(config.scheduler.tick_interval_ms, 500);
    }
}
