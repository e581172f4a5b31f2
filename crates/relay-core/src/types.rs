use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RelayError;

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// The kind of work a worker accepts. Exactly one per worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Frontend,
    Backend,
    Devops,
    Qa,
    KnowledgeManager,
}

impl Capability {
    pub fn all() -> &'static [Capability] {
        &[
            Capability::Frontend,
            Capability::Backend,
            Capability::Devops,
            Capability::Qa,
            Capability::KnowledgeManager,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Frontend => "frontend",
            Capability::Backend => "backend",
            Capability::Devops => "devops",
            Capability::Qa => "qa",
            Capability::KnowledgeManager => "knowledge-manager",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Capability {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "frontend" => Ok(Capability::Frontend),
            "backend" => Ok(Capability::Backend),
            "devops" => Ok(Capability::Devops),
            "qa" => Ok(Capability::Qa),
            "knowledge-manager" | "knowledge_manager" => Ok(Capability::KnowledgeManager),
            _ => Err(RelayError::UnknownCapability(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a task.
///
/// ```text
/// Pending          → InProgress | Failed
/// InProgress       → AwaitingReview | AwaitingApproval | Approved | Failed
/// AwaitingReview   → Rejected | AwaitingApproval | Approved | Failed
/// Rejected         → InProgress | Failed
/// AwaitingApproval → Approved | Failed
/// ```
///
/// `Approved` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    AwaitingReview,
    Rejected,
    AwaitingApproval,
    Approved,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::AwaitingReview => "awaiting_review",
            TaskStatus::Rejected => "rejected",
            TaskStatus::AwaitingApproval => "awaiting_approval",
            TaskStatus::Approved => "approved",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Approved | TaskStatus::Failed)
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Failed)
                | (InProgress, AwaitingReview)
                | (InProgress, AwaitingApproval)
                | (InProgress, Approved)
                | (InProgress, Failed)
                | (AwaitingReview, Rejected)
                | (AwaitingReview, AwaitingApproval)
                | (AwaitingReview, Approved)
                | (AwaitingReview, Failed)
                | (Rejected, InProgress)
                | (Rejected, Failed)
                | (AwaitingApproval, Approved)
                | (AwaitingApproval, Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ReviewOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewOutcome {
    Approved,
    NeedsImprovement,
}

impl fmt::Display for ReviewOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewOutcome::Approved => f.write_str("approved"),
            ReviewOutcome::NeedsImprovement => f.write_str("needs_improvement"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
