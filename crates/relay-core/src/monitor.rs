//! Progress monitor: compares how long in-flight tasks have sat in their
//! current state against per-category budgets.
//!
//! The monitor is purely observational. It emits `ProgressCheckIn` once a
//! task passes 1.5× the category's upper bound and `HardTimeout` once it
//! passes the category's hard-timeout factor, each at most once per phase.
//! What happens after a hard timeout is the caller's [`TimeoutAction`].

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::coordinator::Coordinator;
use crate::events::CoordinatorEvent;
use crate::registry::DEFAULT_CATEGORY;
use crate::task::Task;
use crate::types::TaskStatus;

pub const REVIEW_CATEGORY: &str = "review";
pub const CHECK_IN_FACTOR: f64 = 1.5;

// ---------------------------------------------------------------------------
// DurationBudget
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationBudget {
    pub min_minutes: u64,
    pub max_minutes: u64,
    /// Multiple of `max_minutes` after which a hard timeout fires (2.0–2.5).
    #[serde(default = "default_hard_timeout_factor")]
    pub hard_timeout_factor: f64,
}

fn default_hard_timeout_factor() -> f64 {
    2.0
}

impl DurationBudget {
    pub fn new(min_minutes: u64, max_minutes: u64, hard_timeout_factor: f64) -> Self {
        Self {
            min_minutes,
            max_minutes,
            hard_timeout_factor,
        }
    }

    fn max_ms(&self) -> f64 {
        self.max_minutes.saturating_mul(60_000) as f64
    }

    pub fn check_in_after(&self) -> Duration {
        Duration::milliseconds((self.max_ms() * CHECK_IN_FACTOR) as i64)
    }

    pub fn hard_timeout_after(&self) -> Duration {
        Duration::milliseconds((self.max_ms() * self.hard_timeout_factor) as i64)
    }
}

/// `implementation`: 30–120 min, `review`: 5–40 min.
pub fn default_budgets() -> BTreeMap<String, DurationBudget> {
    let mut m = BTreeMap::new();
    m.insert(DEFAULT_CATEGORY.to_string(), DurationBudget::new(30, 120, 2.0));
    m.insert(REVIEW_CATEGORY.to_string(), DurationBudget::new(5, 40, 2.5));
    m
}

// ---------------------------------------------------------------------------
// TimeoutAction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutAction {
    /// Emit the event and leave the task alone.
    #[default]
    Observe,
    /// Fail the task with `TimedOut`.
    Fail,
}

// ---------------------------------------------------------------------------
// ProgressCheckpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressCheckpoint {
    pub task_id: Uuid,
    pub worker_id: String,
    pub status: TaskStatus,
    pub category: String,
    pub phase_started_at: DateTime<Utc>,
    pub budget: DurationBudget,
    pub elapsed_secs: u64,
    pub checked_in: bool,
    pub escalated: bool,
}

// ---------------------------------------------------------------------------
// ProgressMonitor
// ---------------------------------------------------------------------------

pub struct ProgressMonitor {
    coordinator: Coordinator,
    budgets: BTreeMap<String, DurationBudget>,
    checkpoints: HashMap<Uuid, ProgressCheckpoint>,
}

impl ProgressMonitor {
    pub fn new(coordinator: Coordinator, budgets: BTreeMap<String, DurationBudget>) -> Self {
        Self {
            coordinator,
            budgets,
            checkpoints: HashMap::new(),
        }
    }

    pub fn checkpoint(&self, id: Uuid) -> Option<&ProgressCheckpoint> {
        self.checkpoints.get(&id)
    }

    fn category_for(&self, task: &Task) -> String {
        if task.status == TaskStatus::AwaitingReview {
            return REVIEW_CATEGORY.to_string();
        }
        self.coordinator
            .registry()
            .resolve(task.capability)
            .map(|w| w.category().to_string())
            .unwrap_or_else(|_| DEFAULT_CATEGORY.to_string())
    }

    /// Inspect every in-flight task as of `now`, publish and return new events.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Vec<CoordinatorEvent> {
        let in_flight = self.coordinator.in_flight().await;
        self.checkpoints
            .retain(|id, _| in_flight.iter().any(|t| t.id == *id));

        let mut events = Vec::new();
        for task in &in_flight {
            let category = self.category_for(task);
            let Some(budget) = self.budgets.get(&category).cloned() else {
                tracing::debug!(task = %task.id, category = %category, "no budget for category");
                continue;
            };

            // A status change starts a new phase with fresh flags.
            let fresh = self.checkpoints.get(&task.id).map_or(true, |cp| {
                cp.status != task.status || cp.phase_started_at != task.updated_at
            });
            if fresh {
                self.checkpoints.insert(
                    task.id,
                    ProgressCheckpoint {
                        task_id: task.id,
                        worker_id: task.worker_id.clone(),
                        status: task.status,
                        category: category.clone(),
                        phase_started_at: task.updated_at,
                        budget: budget.clone(),
                        elapsed_secs: 0,
                        checked_in: false,
                        escalated: false,
                    },
                );
            }
            let Some(cp) = self.checkpoints.get_mut(&task.id) else {
                continue;
            };

            let elapsed = (now - cp.phase_started_at).max(Duration::zero());
            cp.elapsed_secs = elapsed.num_seconds() as u64;
            let budget_max_secs = budget.max_minutes.saturating_mul(60);

            if elapsed > budget.check_in_after() && !cp.checked_in {
                cp.checked_in = true;
                tracing::warn!(
                    task = %task.id,
                    worker = %cp.worker_id,
                    elapsed_secs = cp.elapsed_secs,
                    "task over budget, check in"
                );
                events.push(CoordinatorEvent::ProgressCheckIn {
                    task_id: task.id,
                    worker_id: cp.worker_id.clone(),
                    status: cp.status,
                    category: cp.category.clone(),
                    elapsed_secs: cp.elapsed_secs,
                    budget_max_secs,
                });
            }
            if elapsed > budget.hard_timeout_after() && !cp.escalated {
                cp.escalated = true;
                tracing::warn!(
                    task = %task.id,
                    worker = %cp.worker_id,
                    elapsed_secs = cp.elapsed_secs,
                    "task hit hard timeout"
                );
                events.push(CoordinatorEvent::HardTimeout {
                    task_id: task.id,
                    worker_id: cp.worker_id.clone(),
                    status: cp.status,
                    category: cp.category.clone(),
                    elapsed_secs: cp.elapsed_secs,
                    budget_max_secs,
                });
            }
        }

        for ev in &events {
            self.coordinator.publish(ev.clone());
        }
        events
    }

    /// Apply `action` to the hard timeouts among `events`.
    pub async fn enforce(&self, events: &[CoordinatorEvent], action: TimeoutAction) {
        if action == TimeoutAction::Observe {
            return;
        }
        for ev in events {
            if let CoordinatorEvent::HardTimeout { task_id, .. } = ev {
                if let Err(e) = self.coordinator.time_out(*task_id).await {
                    tracing::error!(task = %task_id, error = %e, "failed to time out task");
                }
            }
        }
    }

    /// Run `tick` every `interval` on a background task.
    pub fn spawn(mut self, interval: std::time::Duration, action: TimeoutAction) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let events = self.tick(Utc::now()).await;
                self.enforce(&events, action).await;
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::CoordinatorPolicy;
    use crate::error::Result;
    use crate::registry::{Worker, WorkerRegistry};
    use crate::review::{ReviewDecision, Reviewer, ReviewerGate};
    use crate::task::{Assignment, FailureReason, SubmitOptions};
    use crate::types::Capability;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    struct Slow {
        instant: bool,
    }

    #[async_trait]
    impl Worker for Slow {
        fn id(&self) -> &str {
            "backend-dev"
        }

        fn capability(&self) -> Capability {
            Capability::Backend
        }

        async fn invoke(&self, _assignment: Assignment) -> Result<serde_json::Value> {
            if !self.instant {
                std::future::pending::<()>().await;
            }
            Ok(json!("done"))
        }
    }

    struct SlowReviewer;

    #[async_trait]
    impl Reviewer for SlowReviewer {
        fn id(&self) -> &str {
            "plan-reviewer"
        }

        async fn review(&self, _task: &Task, _result: &serde_json::Value) -> Result<ReviewDecision> {
            std::future::pending::<()>().await;
            Ok(ReviewDecision::approve())
        }
    }

    fn coordinator(instant_worker: bool) -> Coordinator {
        let mut registry = WorkerRegistry::new();
        registry.register(Arc::new(Slow {
            instant: instant_worker,
        }));
        let gate = ReviewerGate::new(Arc::new(SlowReviewer));
        Coordinator::new(registry, gate, CoordinatorPolicy::default())
    }

    async fn submit(c: &Coordinator) -> Task {
        let id = c
            .submit(Capability::Backend, json!("work"), SubmitOptions::default())
            .await
            .unwrap();
        c.get(id).await.unwrap()
    }

    #[test]
    fn default_budgets_match_categories() {
        let budgets = default_budgets();
        assert_eq!(budgets["implementation"].max_minutes, 120);
        assert_eq!(budgets["review"].max_minutes, 40);
        assert_eq!(budgets["review"].check_in_after(), Duration::minutes(60));
        assert_eq!(budgets["review"].hard_timeout_after(), Duration::minutes(100));
    }

    #[test]
    fn huge_budget_saturates_instead_of_overflowing() {
        let budget = DurationBudget::new(1, u64::MAX, 2.5);
        assert!(budget.check_in_after() > Duration::days(365 * 1000));
        assert!(budget.hard_timeout_after() >= budget.check_in_after());
    }

    #[tokio::test]
    async fn huge_budget_never_fires() {
        let c = coordinator(false);
        let task = submit(&c).await;
        let mut budgets = default_budgets();
        budgets.insert("implementation".into(), DurationBudget::new(1, u64::MAX, 2.0));
        let mut monitor = ProgressMonitor::new(c, budgets);

        let events = monitor.tick(task.updated_at + Duration::days(3650)).await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn within_budget_emits_nothing() {
        let c = coordinator(false);
        let task = submit(&c).await;
        let mut monitor = ProgressMonitor::new(c, default_budgets());

        let events = monitor.tick(task.updated_at + Duration::minutes(150)).await;
        assert!(events.is_empty());
        let cp = monitor.checkpoint(task.id).unwrap();
        assert_eq!(cp.category, "implementation");
        assert_eq!(cp.elapsed_secs, 150 * 60);
    }

    #[tokio::test]
    async fn check_in_fires_exactly_once_without_mutation() {
        let c = coordinator(false);
        let task = submit(&c).await;
        let mut monitor = ProgressMonitor::new(c.clone(), default_budgets());

        let first = monitor.tick(task.updated_at + Duration::minutes(181)).await;
        let second = monitor.tick(task.updated_at + Duration::minutes(200)).await;

        assert_eq!(first.len(), 1);
        assert!(matches!(
            &first[0],
            CoordinatorEvent::ProgressCheckIn { task_id, worker_id, .. }
                if *task_id == task.id && worker_id == "backend-dev"
        ));
        assert!(second.is_empty());

        let after = c.get(task.id).await.unwrap();
        assert_eq!(after.status, TaskStatus::InProgress);
        assert_eq!(after.transitions.len(), task.transitions.len());
    }

    #[tokio::test]
    async fn hard_timeout_follows_check_in() {
        let c = coordinator(false);
        let task = submit(&c).await;
        let mut monitor = ProgressMonitor::new(c, default_budgets());

        let events = monitor.tick(task.updated_at + Duration::minutes(241)).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].name(), "progress_check_in");
        assert_eq!(events[1].name(), "hard_timeout");
        assert!(monitor.checkpoint(task.id).unwrap().escalated);
    }

    #[tokio::test]
    async fn awaiting_review_uses_review_budget() {
        let c = coordinator(true);
        let id = c
            .submit(Capability::Backend, json!("work"), SubmitOptions::default())
            .await
            .unwrap();
        let mut task = c.get(id).await.unwrap();
        for _ in 0..100 {
            if task.status == TaskStatus::AwaitingReview {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            task = c.get(id).await.unwrap();
        }
        assert_eq!(task.status, TaskStatus::AwaitingReview);

        let mut monitor = ProgressMonitor::new(c, default_budgets());
        let events = monitor.tick(task.updated_at + Duration::minutes(61)).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            CoordinatorEvent::ProgressCheckIn { category, .. } if category == "review"
        ));
    }

    #[tokio::test]
    async fn terminal_tasks_drop_their_checkpoint() {
        let c = coordinator(false);
        let task = submit(&c).await;
        let mut monitor = ProgressMonitor::new(c.clone(), default_budgets());

        monitor.tick(task.updated_at).await;
        assert!(monitor.checkpoint(task.id).is_some());

        c.cancel(task.id).await.unwrap();
        let events = monitor.tick(task.updated_at + Duration::minutes(500)).await;
        assert!(events.is_empty());
        assert!(monitor.checkpoint(task.id).is_none());
    }

    #[tokio::test]
    async fn fail_action_times_out_task() {
        let c = coordinator(false);
        let task = submit(&c).await;
        let mut monitor = ProgressMonitor::new(c.clone(), default_budgets());

        let events = monitor.tick(task.updated_at + Duration::minutes(300)).await;
        monitor.enforce(&events, TimeoutAction::Observe).await;
        assert_eq!(c.get(task.id).await.unwrap().status, TaskStatus::InProgress);

        monitor.enforce(&events, TimeoutAction::Fail).await;
        let after = c.get(task.id).await.unwrap();
        assert_eq!(after.failure, Some(FailureReason::TimedOut));
    }
}
