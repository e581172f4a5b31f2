//! Concrete worker and reviewer backends built from configuration.
//!
//! # Shell protocol
//! - The command runs under `sh -c` with the project root as cwd.
//! - Workers read the `Assignment` JSON on stdin; reviewers read
//!   `{"task": …, "result": …}`.
//! - `RELAY_ROOT`, `RELAY_TASK_ID` and `RELAY_ATTEMPT` are set.
//! - Worker stdout is the result: JSON when it parses, a string otherwise.
//!   A non-zero exit is an invocation failure.
//! - Reviewer exit 0 approves; any other exit asks for improvement with
//!   stdout as feedback.

use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{RelayError, Result};
use crate::registry::Worker;
use crate::review::{ReviewDecision, Reviewer};
use crate::task::{Assignment, Task};
use crate::types::Capability;

const STDERR_HINT_CHARS: usize = 500;

struct ShellRun<'a> {
    command: &'a str,
    root: &'a std::path::Path,
    stdin: Vec<u8>,
    task_id: String,
    attempt: u32,
    timeout: Option<Duration>,
}

async fn run_shell(run: ShellRun<'_>) -> Result<Output> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(run.command)
        .current_dir(run.root)
        .env("RELAY_ROOT", run.root)
        .env("RELAY_TASK_ID", &run.task_id)
        .env("RELAY_ATTEMPT", run.attempt.to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| RelayError::WorkerInvocation(format!("failed to spawn `{}`: {e}", run.command)))?;

    // Feed stdin concurrently so a chatty command cannot fill its stdout pipe
    // while we are still writing.
    if let Some(mut stdin) = child.stdin.take() {
        let data = run.stdin;
        tokio::spawn(async move {
            // A command that ignores stdin may close it early; that is not an error.
            if let Err(e) = stdin.write_all(&data).await {
                tracing::debug!(error = %e, "stdin closed early");
            }
        });
    }

    let wait = child.wait_with_output();
    let output = match run.timeout {
        Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
            RelayError::WorkerInvocation(format!(
                "`{}` timed out after {}s",
                run.command,
                limit.as_secs()
            ))
        })?,
        None => wait.await,
    }
    .map_err(|e| RelayError::WorkerInvocation(e.to_string()))?;

    Ok(output)
}

fn stdout_value(output: &Output) -> serde_json::Value {
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
}

fn stderr_hint(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr)
        .trim()
        .chars()
        .take(STDERR_HINT_CHARS)
        .collect()
}

// ---------------------------------------------------------------------------
// ShellWorker
// ---------------------------------------------------------------------------

pub struct ShellWorker {
    pub id: String,
    pub capability: Capability,
    pub category: String,
    pub command: String,
    pub root: PathBuf,
    pub timeout: Option<Duration>,
    pub available: bool,
}

#[async_trait]
impl Worker for ShellWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn capability(&self) -> Capability {
        self.capability
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn available(&self) -> bool {
        self.available
    }

    async fn invoke(&self, assignment: Assignment) -> Result<serde_json::Value> {
        let output = run_shell(ShellRun {
            command: &self.command,
            root: &self.root,
            stdin: serde_json::to_vec(&assignment)?,
            task_id: assignment.task_id.to_string(),
            attempt: assignment.attempt,
            timeout: self.timeout,
        })
        .await?;

        if !output.status.success() {
            return Err(RelayError::WorkerInvocation(format!(
                "`{}` exited with {}: {}",
                self.command,
                output.status,
                stderr_hint(&output)
            )));
        }
        Ok(stdout_value(&output))
    }
}

// ---------------------------------------------------------------------------
// EchoWorker
// ---------------------------------------------------------------------------

/// Returns the assignment's payload unchanged.
pub struct EchoWorker {
    pub id: String,
    pub capability: Capability,
    pub category: String,
    pub available: bool,
}

#[async_trait]
impl Worker for EchoWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn capability(&self) -> Capability {
        self.capability
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn available(&self) -> bool {
        self.available
    }

    async fn invoke(&self, assignment: Assignment) -> Result<serde_json::Value> {
        Ok(assignment.payload)
    }
}

// ---------------------------------------------------------------------------
// Reviewers
// ---------------------------------------------------------------------------

pub struct ShellReviewer {
    pub id: String,
    pub command: String,
    pub root: PathBuf,
    pub timeout: Option<Duration>,
}

#[async_trait]
impl Reviewer for ShellReviewer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn review(&self, task: &Task, result: &serde_json::Value) -> Result<ReviewDecision> {
        let input = serde_json::json!({ "task": task, "result": result });
        let output = run_shell(ShellRun {
            command: &self.command,
            root: &self.root,
            stdin: serde_json::to_vec(&input)?,
            task_id: task.id.to_string(),
            attempt: task.attempt_count,
            timeout: self.timeout,
        })
        .await?;

        if output.status.success() {
            return Ok(ReviewDecision::approve());
        }
        let feedback = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let feedback = if feedback.is_empty() {
            stderr_hint(&output)
        } else {
            feedback
        };
        Ok(ReviewDecision::needs_improvement(feedback))
    }
}

pub struct AutoApproveReviewer {
    pub id: String,
}

#[async_trait]
impl Reviewer for AutoApproveReviewer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn review(&self, _task: &Task, _result: &serde_json::Value) -> Result<ReviewDecision> {
        Ok(ReviewDecision::approve())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
