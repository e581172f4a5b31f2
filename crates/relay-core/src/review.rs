//! Reviewer gate: the mandatory quality check between a worker's result
//! and its finalization.
//!
//! The reviewer itself is opaque (an LLM call, a rule engine, a shell
//! script). It returns a [`ReviewDecision`]; the gate stamps it into an
//! immutable [`ReviewVerdict`] that is appended to the task's audit trail.

use crate::error::Result;
use crate::task::Task;
use crate::types::ReviewOutcome;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

const MISSING_FEEDBACK: &str = "reviewer gave no feedback";

// ---------------------------------------------------------------------------
// ReviewVerdict
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub task_id: Uuid,
    /// The task's attempt count when the reviewed result was produced.
    pub attempt: u32,
    pub outcome: ReviewOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    pub reviewer: String,
    pub created_at: DateTime<Utc>,
}

impl ReviewVerdict {
    pub fn approved(task_id: Uuid, attempt: u32, reviewer: impl Into<String>) -> Self {
        Self {
            task_id,
            attempt,
            outcome: ReviewOutcome::Approved,
            feedback: None,
            reviewer: reviewer.into(),
            created_at: Utc::now(),
        }
    }

    pub fn needs_improvement(
        task_id: Uuid,
        attempt: u32,
        reviewer: impl Into<String>,
        feedback: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            attempt,
            outcome: ReviewOutcome::NeedsImprovement,
            feedback: Some(feedback.into()),
            reviewer: reviewer.into(),
            created_at: Utc::now(),
        }
    }

    pub fn is_approved(&self) -> bool {
        self.outcome == ReviewOutcome::Approved
    }
}

// ---------------------------------------------------------------------------
// ReviewDecision / Reviewer
// ---------------------------------------------------------------------------

/// Raw answer from a reviewer, before the gate stamps it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewDecision {
    pub outcome: ReviewOutcome,
    pub feedback: Option<String>,
}

impl ReviewDecision {
    pub fn approve() -> Self {
        Self {
            outcome: ReviewOutcome::Approved,
            feedback: None,
        }
    }

    pub fn needs_improvement(feedback: impl Into<String>) -> Self {
        Self {
            outcome: ReviewOutcome::NeedsImprovement,
            feedback: Some(feedback.into()),
        }
    }
}

#[async_trait]
pub trait Reviewer: Send + Sync {
    fn id(&self) -> &str;
    async fn review(&self, task: &Task, result: &serde_json::Value) -> Result<ReviewDecision>;
}

// ---------------------------------------------------------------------------
// ReviewerGate
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ReviewerGate {
    reviewer: Arc<dyn Reviewer>,
}

impl ReviewerGate {
    pub fn new(reviewer: Arc<dyn Reviewer>) -> Self {
        Self { reviewer }
    }

    pub fn reviewer_id(&self) -> &str {
        self.reviewer.id()
    }

    /// Ask the reviewer about `result` and stamp the answer.
    ///
    /// Feedback is kept only on `NeedsImprovement`; a rejection without
    /// feedback gets a placeholder so the worker always has something to act on.
    pub async fn review(&self, task: &Task, result: &serde_json::Value) -> Result<ReviewVerdict> {
        let decision = self.reviewer.review(task, result).await?;
        let reviewer = self.reviewer.id();
        let verdict = match decision.outcome {
            ReviewOutcome::Approved => ReviewVerdict::approved(task.id, task.attempt_count, reviewer),
            ReviewOutcome::NeedsImprovement => {
                let feedback = decision
                    .feedback
                    .filter(|f| !f.trim().is_empty())
                    .unwrap_or_else(|| MISSING_FEEDBACK.to_string());
                ReviewVerdict::needs_improvement(task.id, task.attempt_count, reviewer, feedback)
            }
        };
        tracing::debug!(task = %task.id, outcome = %verdict.outcome, "review complete");
        Ok(verdict)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
