//! External command adapters.
//!
//! The TLS cipher scan, WHOIS, P2P speed test and HTTP/2 detection all shell
//! out to host binaries. The engine only ever talks to the [`ToolRunner`]
//! port; [`SystemToolRunner`] spawns real child processes while
//! [`MockToolRunner`] replays scripted output in tests.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Error type for tool invocations.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("{program} did not finish within {timeout_secs}s")]
    Timeout { program: String, timeout_secs: u64 },
}

/// Captured output of one tool invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub status_ok: bool,
}

impl ToolOutput {
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            status_ok: true,
        }
    }
}

/// Port for running an external command with captured stdout/stderr.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        limit: Duration,
    ) -> Result<ToolOutput, ToolError>;
}

// ════════════════════════════════════════════════════════════════════════════════
// SYSTEM RUNNER
// ════════════════════════════════════════════════════════════════════════════════

/// Runs real child processes via `tokio::process`.
#[derive(Debug, Default, Clone)]
pub struct SystemToolRunner;

#[async_trait]
impl ToolRunner for SystemToolRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        limit: Duration,
    ) -> Result<ToolOutput, ToolError> {
        debug!(program, ?args, "running external tool");
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match timeout(limit, command.output()).await {
            Err(_) => {
                return Err(ToolError::Timeout {
                    program: program.to_string(),
                    timeout_secs: limit.as_secs(),
                })
            }
            Ok(Err(e)) => {
                return Err(ToolError::Spawn {
                    program: program.to_string(),
                    message: e.to_string(),
                })
            }
            Ok(Ok(output)) => output,
        };

        Ok(ToolOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status_ok: output.status.success(),
        })
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// MOCK RUNNER
// ════════════════════════════════════════════════════════════════════════════════

/// Scripted runner for tests. Responses are registered per program name and
/// every invocation is recorded so tests can assert call counts.
#[derive(Debug, Default)]
pub struct MockToolRunner {
    responses: Mutex<HashMap<String, ToolOutput>>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl MockToolRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the output returned for every invocation of `program`.
    pub fn script(&self, program: &str, output: ToolOutput) {
        self.responses.lock().insert(program.to_string(), output);
    }

    /// All recorded invocations, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().clone()
    }

    /// Number of invocations of `program`.
    #[must_use]
    pub fn call_count(&self, program: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(p, _)| p == program)
            .count()
    }
}

#[async_trait]
impl ToolRunner for MockToolRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        _limit: Duration,
    ) -> Result<ToolOutput, ToolError> {
        self.calls
            .lock()
            .push((program.to_string(), args.to_vec()));
        match self.responses.lock().get(program) {
            Some(output) => Ok(output.clone()),
            None => Err(ToolError::Spawn {
                program: program.to_string(),
                message: "not scripted".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_replays_scripted_output_and_records_calls() {
        let runner = MockToolRunner::new();
        runner.script("whois", ToolOutput::ok("Country: DE\n"));

        let out = runner
            .run("whois", &["203.0.113.5".to_string()], Duration::from_secs(5))
            .await
            .expect("scripted");
        assert!(out.status_ok);
        assert_eq!(out.stdout, "Country: DE\n");
        assert_eq!(runner.call_count("whois"), 1);
        assert_eq!(runner.calls()[0].1, vec!["203.0.113.5".to_string()]);
    }

    #[tokio::test]
    async fn mock_errors_on_unscripted_program() {
        let runner = MockToolRunner::new();
        let err = runner
            .run("nmap", &[], Duration::from_secs(5))
            .await
            .expect_err("unscripted");
        assert!(matches!(err, ToolError::Spawn { .. }));
    }

    #[tokio::test]
    async fn system_runner_captures_stdout() {
        // `sh` exists on every target we build on.
        let runner = SystemToolRunner;
        let out = runner
            .run(
                "sh",
                &["-c".to_string(), "printf hello".to_string()],
                Duration::from_secs(10),
            )
            .await
            .expect("spawn sh");
        assert!(out.status_ok);
        assert_eq!(out.stdout, "hello");
    }

    #[tokio::test]
    async fn system_runner_times_out() {
        let runner = SystemToolRunner;
        let err = runner
            .run(
                "sh",
                &["-c".to_string(), "sleep 5".to_string()],
                Duration::from_millis(100),
            )
            .await
            .expect_err("should time out");
        assert!(matches!(err, ToolError::Timeout { .. }));
    }
}
