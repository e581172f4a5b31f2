use crate::review::ReviewVerdict;
use crate::task::{FailureReason, Task};
use crate::types::{Capability, TaskStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Everything observable about the coordinator, in emission order.
///
/// `ProgressCheckIn` and `HardTimeout` are advisory: emitting them never
/// changes task state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    TaskSubmitted {
        task_id: Uuid,
        capability: Capability,
        worker_id: String,
    },
    TaskUpdated {
        task_id: Uuid,
        status: TaskStatus,
        attempt_count: u32,
    },
    ProgressCheckIn {
        task_id: Uuid,
        worker_id: String,
        status: TaskStatus,
        category: String,
        elapsed_secs: u64,
        budget_max_secs: u64,
    },
    HardTimeout {
        task_id: Uuid,
        worker_id: String,
        status: TaskStatus,
        category: String,
        elapsed_secs: u64,
        budget_max_secs: u64,
    },
    TaskApproved {
        task_id: Uuid,
        attempt_count: u32,
        result: Option<serde_json::Value>,
    },
    TaskFailed {
        task_id: Uuid,
        attempt_count: u32,
        reason: FailureReason,
        last_verdict: Option<ReviewVerdict>,
    },
}

impl CoordinatorEvent {
    /// Event name used on the SSE stream.
    pub fn name(&self) -> &'static str {
        match self {
            CoordinatorEvent::TaskSubmitted { .. } => "task_submitted",
            CoordinatorEvent::TaskUpdated { .. } => "task_updated",
            CoordinatorEvent::ProgressCheckIn { .. } => "progress_check_in",
            CoordinatorEvent::HardTimeout { .. } => "hard_timeout",
            CoordinatorEvent::TaskApproved { .. } => "task_approved",
            CoordinatorEvent::TaskFailed { .. } => "task_failed",
        }
    }

    pub fn task_id(&self) -> Uuid {
        match self {
            CoordinatorEvent::TaskSubmitted { task_id, .. }
            | CoordinatorEvent::TaskUpdated { task_id, .. }
            | CoordinatorEvent::ProgressCheckIn { task_id, .. }
            | CoordinatorEvent::HardTimeout { task_id, .. }
            | CoordinatorEvent::TaskApproved { task_id, .. }
            | CoordinatorEvent::TaskFailed { task_id, .. } => *task_id,
        }
    }

    pub(crate) fn updated(task: &Task) -> Self {
        CoordinatorEvent::TaskUpdated {
            task_id: task.id,
            status: task.status,
            attempt_count: task.attempt_count,
        }
    }

    /// The terminal event for `task`, if it has reached a terminal state.
    pub(crate) fn terminal(task: &Task) -> Option<Self> {
        match task.status {
            TaskStatus::Approved => Some(CoordinatorEvent::TaskApproved {
                task_id: task.id,
                attempt_count: task.attempt_count,
                result: task.result.clone(),
            }),
            TaskStatus::Failed => Some(CoordinatorEvent::TaskFailed {
                task_id: task.id,
                attempt_count: task.attempt_count,
                reason: task.failure.clone().unwrap_or(FailureReason::Interrupted),
                last_verdict: task.last_verdict().cloned(),
            }),
            _ => None,
        }
    }
}
