use crate::error::{RelayError, Result};
use crate::review::ReviewVerdict;
use crate::types::{Capability, ReviewOutcome, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// FailureReason
// ---------------------------------------------------------------------------

/// Why a task ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureReason {
    WorkerInvocationFailure { error: String },
    ReviewerInvocationFailure { error: String },
    RetryLimitExceeded,
    Cancelled,
    Declined { reason: String },
    TimedOut,
    /// The process stopped while the task was in flight.
    Interrupted,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::WorkerInvocationFailure { error } => {
                write!(f, "worker invocation failed: {error}")
            }
            FailureReason::ReviewerInvocationFailure { error } => {
                write!(f, "reviewer invocation failed: {error}")
            }
            FailureReason::RetryLimitExceeded => f.write_str("retry limit exceeded"),
            FailureReason::Cancelled => f.write_str("cancelled"),
            FailureReason::Declined { reason } => write!(f, "declined: {reason}"),
            FailureReason::TimedOut => f.write_str("timed out"),
            FailureReason::Interrupted => f.write_str("interrupted by restart"),
        }
    }
}

// ---------------------------------------------------------------------------
// SubmitOptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOptions {
    /// Route the worker's result through the reviewer gate. Only trivial
    /// fixes and documentation-only changes should turn this off.
    #[serde(default = "default_review_required")]
    pub review_required: bool,
    /// Park the reviewed result in `AwaitingApproval` until a human signs off.
    #[serde(default)]
    pub approval_required: bool,
}

fn default_review_required() -> bool {
    true
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            review_required: true,
            approval_required: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Transition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

/// What a worker receives for one attempt.
///
/// The original payload is never rewritten. On a retry the previous result
/// and every piece of reviewer feedback so far ride along with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub task_id: Uuid,
    pub capability: Capability,
    /// Zero on the first invocation, otherwise the number of rejections so far.
    pub attempt: u32,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feedback: Vec<String>,
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub capability: Capability,
    pub worker_id: String,
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    pub attempt_count: u32,
    pub review_required: bool,
    pub approval_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub verdicts: Vec<ReviewVerdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        capability: Capability,
        worker_id: impl Into<String>,
        payload: serde_json::Value,
        options: SubmitOptions,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            capability,
            worker_id: worker_id.into(),
            payload,
            status: TaskStatus::Pending,
            attempt_count: 0,
            review_required: options.review_required,
            approval_required: options.approval_required,
            result: None,
            verdicts: Vec::new(),
            failure: None,
            transitions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`, recording the step. Illegal steps leave the task untouched.
    pub fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(RelayError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
                reason: format!("task {} is {}", self.id, self.status),
            });
        }
        let now = Utc::now();
        self.transitions.push(Transition {
            from: self.status,
            to: next,
            at: now,
        });
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn fail(&mut self, reason: FailureReason) -> Result<()> {
        self.transition(TaskStatus::Failed)?;
        self.failure = Some(reason);
        Ok(())
    }

    pub fn last_verdict(&self) -> Option<&ReviewVerdict> {
        self.verdicts.last()
    }

    /// Build the worker input for the next invocation.
    pub fn assignment(&self) -> Assignment {
        let feedback = self
            .verdicts
            .iter()
            .filter(|v| v.outcome == ReviewOutcome::NeedsImprovement)
            .filter_map(|v| v.feedback.clone())
            .collect();
        Assignment {
            task_id: self.id,
            capability: self.capability,
            attempt: self.attempt_count,
            payload: self.payload.clone(),
            previous_result: self.result.clone(),
            feedback,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn backend_task() -> Task {
        Task::new(
            Capability::Backend,
            "backend-dev",
            json!({"goal": "add endpoint"}),
            SubmitOptions::default(),
        )
    }

    #[test]
    fn new_task_is_pending_and_requires_review() {
        let task = backend_task();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempt_count, 0);
        assert!(task.review_required);
        assert!(!task.approval_required);
        assert!(task.transitions.is_empty());
    }

    #[test]
    fn transition_records_each_step() {
        let mut task = backend_task();
        task.transition(TaskStatus::InProgress).unwrap();
        task.transition(TaskStatus::AwaitingReview).unwrap();
        assert_eq!(task.transitions.len(), 2);
        assert_eq!(task.transitions[0].from, TaskStatus::Pending);
        assert_eq!(task.transitions[1].to, TaskStatus::AwaitingReview);
    }

    #[test]
    fn illegal_transition_is_rejected_without_mutation() {
        let mut task = backend_task();
        let err = task.transition(TaskStatus::Approved).unwrap_err();
        assert!(matches!(err, RelayError::InvalidTransition { .. }));
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.transitions.is_empty());
    }

    #[test]
    fn fail_sets_reason() {
        let mut task = backend_task();
        task.transition(TaskStatus::InProgress).unwrap();
        task.fail(FailureReason::Cancelled).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.failure, Some(FailureReason::Cancelled));
        assert!(task.fail(FailureReason::Cancelled).is_err());
    }

    #[test]
    fn assignment_carries_feedback_and_previous_result() {
        let mut task = backend_task();
        task.result = Some(json!("R1"));
        task.verdicts.push(ReviewVerdict::needs_improvement(
            task.id,
            0,
            "plan-reviewer",
            "F1",
        ));
        task.attempt_count = 1;

        let a = task.assignment();
        assert_eq!(a.attempt, 1);
        assert_eq!(a.payload, json!({"goal": "add endpoint"}));
        assert_eq!(a.previous_result, Some(json!("R1")));
        assert_eq!(a.feedback, vec!["F1".to_string()]);
    }

    #[test]
    fn failure_reason_json_tagged() {
        let json = serde_json::to_string(&FailureReason::RetryLimitExceeded).unwrap();
        assert!(json.contains("\"type\":\"retry_limit_exceeded\""));
        let parsed: FailureReason = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, FailureReason::RetryLimitExceeded);
    }

    #[test]
    fn submit_options_default_from_empty_json() {
        let opts: SubmitOptions = serde_json::from_str("{}").unwrap();
        assert!(opts.review_required);
        assert!(!opts.approval_required);
    }
}
