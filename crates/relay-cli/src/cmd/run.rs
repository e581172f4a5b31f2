use crate::cmd::tasks::print_task;
use crate::output::print_json;
use anyhow::Context;
use relay_core::config::Config;
use relay_core::monitor::ProgressMonitor;
use relay_core::task::{FailureReason, SubmitOptions};
use relay_core::types::Capability;
use std::path::Path;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunExit: typed non-zero exit codes (no std::process::exit in library code)
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum RunExit {
    TaskFailed { id: Uuid, reason: FailureReason },
}

impl RunExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunExit::TaskFailed { .. } => 2,
        }
    }
}

impl std::fmt::Display for RunExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunExit::TaskFailed { id, reason } => write!(f, "task {id} failed: {reason}"),
        }
    }
}

impl std::error::Error for RunExit {}

/// Join the payload words and read them as JSON, falling back to plain text.
fn parse_payload(words: &[String]) -> serde_json::Value {
    let text = words.join(" ");
    serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

pub fn run(
    root: &Path,
    capability: &str,
    payload: &[String],
    no_review: bool,
    json: bool,
) -> anyhow::Result<()> {
    let capability: Capability = capability.parse()?;
    let config = Config::load(root).context("failed to load config")?;
    let options = SubmitOptions {
        review_required: !no_review,
        approval_required: false,
    };
    let payload = parse_payload(payload);

    let rt = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    let task = rt.block_on(async {
        let coordinator = config.build_coordinator(root, true)?;
        let monitor = ProgressMonitor::new(coordinator.clone(), config.monitor.budgets.clone());
        let monitor_handle =
            monitor.spawn(config.monitor.poll_interval(), config.policy.timeout_action);

        let id = coordinator.submit(capability, payload, options).await?;
        let task = coordinator.wait(id).await?;
        monitor_handle.abort();
        coordinator
            .flush_journal()
            .await
            .context("task finished but was not fully journaled")?;
        anyhow::Ok(task)
    })?;

    if json {
        print_json(&task)?;
    } else {
        print_task(&task);
    }

    match task.failure {
        Some(reason) => Err(RunExit::TaskFailed {
            id: task.id,
            reason,
        }
        .into()),
        None => Ok(()),
    }
}
