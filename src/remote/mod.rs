//! Remote command runner (C7): launches a local or remote process, feeds it
//! a JSON argument vector on stdin, and parses a JSON array back from
//! stdout.
//!
//! Grounded on `cylc/flow/task_remote_mgr.py` and `cylc/flow/host_select.py`'s
//! subprocess-based metric collection: a small external program is invoked
//! once per host, wrapped (for remote hosts) in a shell template that
//! expands `%(destination)s`. No retry is performed here; `host::select`
//! (C3) decides what to do with a failed host.

use crate::error::{Result, SchedulerError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Default per-call timeout for a single host's command (§5: "remote
/// fan-outs must impose a per-call timeout").
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Abstracts over local `fork/exec` and remote shell-template launch so
/// host selection and job submission share one fan-out implementation.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `argv` (already JSON-array-encoded) against `host`, returning the
    /// parsed JSON response array. `host: None` means "run locally".
    async fn run(&self, host: Option<&str>, argv: &Value, timeout: Duration) -> Result<Value>;
}

/// Executes `program` as a local child process.
pub struct LocalRunner {
    pub program: String,
    pub args: Vec<String>,
}

impl LocalRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), args: Vec::new() }
    }
}

#[async_trait]
impl CommandRunner for LocalRunner {
    async fn run(&self, _host: Option<&str>, argv: &Value, timeout: Duration) -> Result<Value> {
        run_child(&self.program, &self.args, argv, timeout).await
    }
}

/// Wraps a remote-shell template (e.g. `"ssh %(destination)s %(command)s"`)
/// around the same JSON-in/JSON-out protocol.
pub struct RemoteRunner {
    pub shell_template: String,
    pub remote_program: String,
}

impl RemoteRunner {
    pub fn new(shell_template: impl Into<String>, remote_program: impl Into<String>) -> Self {
        Self { shell_template: shell_template.into(), remote_program: remote_program.into() }
    }

    fn expand(&self, host: &str) -> String {
        self.shell_template
            .replace("%(destination)s", host)
            .replace("%(command)s", &self.remote_program)
    }
}

#[async_trait]
impl CommandRunner for RemoteRunner {
    async fn run(&self, host: Option<&str>, argv: &Value, timeout: Duration) -> Result<Value> {
        let host = host.ok_or_else(|| {
            SchedulerError::RemoteCommandFailed("remote runner requires a host".into())
        })?;
        let expanded = self.expand(host);
        let mut parts = expanded.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| SchedulerError::RemoteCommandFailed("empty shell template".into()))?;
        let args: Vec<String> = parts.map(String::from).collect();
        run_child(program, &args, argv, timeout).await
    }
}

/// In-memory fake for tests: maps `host -> canned JSON response`, never
/// spawning a process.
#[derive(Default)]
pub struct FakeRunner {
    pub responses: HashMap<String, Value>,
    pub failures: HashMap<String, String>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, host: impl Into<String>, value: Value) -> Self {
        self.responses.insert(host.into(), value);
        self
    }

    pub fn with_failure(mut self, host: impl Into<String>, reason: impl Into<String>) -> Self {
        self.failures.insert(host.into(), reason.into());
        self
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, host: Option<&str>, _argv: &Value, _timeout: Duration) -> Result<Value> {
        let key = host.unwrap_or("localhost");
        if let Some(reason) = self.failures.get(key) {
            return Err(SchedulerError::RemoteCommandFailed(reason.clone()));
        }
        self.responses
            .get(key)
            .cloned()
            .ok_or_else(|| SchedulerError::RemoteCommandFailed(format!("no fake response for {key}")))
    }
}

async fn run_child(program: &str, args: &[String], argv: &Value, timeout: Duration) -> Result<Value> {
    let payload = serde_json::to_vec(argv)
        .map_err(|e| SchedulerError::RemoteCommandFailed(format!("encoding argv: {e}")))?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| SchedulerError::RemoteCommandFailed(format!("spawn failed: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(&payload)
            .await
            .map_err(|e| SchedulerError::RemoteCommandFailed(format!("writing stdin: {e}")))?;
    }

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| SchedulerError::RemoteCommandFailed("timed out".into()))?
        .map_err(|e| SchedulerError::RemoteCommandFailed(format!("waiting on child: {e}")))?;

    if !output.status.success() {
        let code = output.status.code().unwrap_or(-1);
        return Err(SchedulerError::RemoteCommandFailed(format!("Command failed (exit: {code})")));
    }

    parse_leading_garbage(&output.stdout)
}

/// Parses a JSON array from `bytes`, tolerating leading garbage (banner
/// text, shell motd) by scanning for the first byte that opens a JSON
/// array and parsing from there.
fn parse_leading_garbage(bytes: &[u8]) -> Result<Value> {
    let start = bytes
        .iter()
        .position(|&b| b == b'[')
        .ok_or_else(|| SchedulerError::RemoteCommandFailed("no JSON array in output".into()))?;
    serde_json::from_slice(&bytes[start..])
        .map_err(|e| SchedulerError::RemoteCommandFailed(format!("parsing response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_array_after_leading_garbage() {
        let raw = b"Last login: Tue\nWelcome to the machine\n[1, 2, 3]\n";
        let value = parse_leading_garbage(raw).unwrap();
        assert_eq!(value, serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn fails_without_any_array() {
        assert!(parse_leading_garbage(b"no json here").is_err());
    }

    #[tokio::test]
    async fn fake_runner_returns_canned_response() {
        let runner = FakeRunner::new().with_response("h1", serde_json::json!([42]));
        let result = runner.run(Some("h1"), &serde_json::json!([]), DEFAULT_TIMEOUT).await.unwrap();
        assert_eq!(result, serde_json::json!([42]));
    }

    #[tokio::test]
    async fn fake_runner_surfaces_failure() {
        let runner = FakeRunner::new().with_failure("h2", "Command failed (exit: 1)");
        let err = runner.run(Some("h2"), &serde_json::json!([]), DEFAULT_TIMEOUT).await.unwrap_err();
        assert!(matches!(err, SchedulerError::RemoteCommandFailed(_)));
    }
}
