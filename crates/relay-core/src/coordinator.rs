//! Delegation coordinator: the single owner of the task table.
//!
//! Lifecycle of one task:
//!
//! ```text
//! submit ─► InProgress ─► worker ─► on_worker_result ─► AwaitingReview ─► gate
//!                ▲                                                          │
//!                └──── Rejected ◄── NeedsImprovement ◄── on_review_verdict ◄┘
//!                                   Approved ─► Approved | AwaitingApproval
//! ```
//!
//! Worker and reviewer calls run on spawned tokio tasks and report back
//! through `on_worker_result` / `on_worker_failure` / `on_review_verdict`.
//! Workers never touch the table; they only return values. Anything that
//! arrives for a task no longer in the expected state, or for an earlier
//! attempt than the one in flight, is logged and dropped.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex};
use uuid::Uuid;

use crate::error::{RelayError, Result};
use crate::events::CoordinatorEvent;
use crate::journal::{JournalWriter, TaskJournal};
use crate::registry::{Worker, WorkerRegistry};
use crate::review::{ReviewVerdict, ReviewerGate};
use crate::task::{Assignment, FailureReason, SubmitOptions, Task};
use crate::types::{Capability, ReviewOutcome, TaskStatus};

pub const DEFAULT_RETRY_LIMIT: u32 = 3;
const EVENT_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// CoordinatorPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorPolicy {
    /// Number of `NeedsImprovement` verdicts after which a task fails.
    pub retry_limit: u32,
}

impl Default for CoordinatorPolicy {
    fn default() -> Self {
        Self {
            retry_limit: DEFAULT_RETRY_LIMIT,
        }
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

struct TaskEntry {
    task: Task,
    status_tx: watch::Sender<TaskStatus>,
}

impl TaskEntry {
    fn new(task: Task) -> Self {
        let (status_tx, _) = watch::channel(task.status);
        Self { task, status_tx }
    }
}

struct Inner {
    registry: Arc<WorkerRegistry>,
    gate: ReviewerGate,
    policy: CoordinatorPolicy,
    tasks: Mutex<HashMap<Uuid, TaskEntry>>,
    events: broadcast::Sender<CoordinatorEvent>,
    journal: Option<JournalWriter>,
}

#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn new(registry: WorkerRegistry, gate: ReviewerGate, policy: CoordinatorPolicy) -> Self {
        Self::build(registry, gate, policy, None, HashMap::new())
    }

    /// Build a coordinator that journals every transition.
    ///
    /// Tasks already in the journal are reloaded. Tasks that were mid-flight
    /// when the previous process stopped are failed with `Interrupted`; tasks
    /// parked in `AwaitingApproval` stay parked. Later snapshots are written
    /// by a [`JournalWriter`].
    pub fn with_journal(
        registry: WorkerRegistry,
        gate: ReviewerGate,
        policy: CoordinatorPolicy,
        journal: TaskJournal,
    ) -> Result<Self> {
        let mut tasks = HashMap::new();
        let mut recovered = 0u32;
        for mut task in journal.load_all()? {
            if !task.is_terminal() && task.status != TaskStatus::AwaitingApproval {
                task.fail(FailureReason::Interrupted)?;
                journal.save(&task)?;
                recovered += 1;
            }
            tasks.insert(task.id, TaskEntry::new(task));
        }
        if recovered > 0 {
            tracing::warn!(count = recovered, "failed tasks interrupted by restart");
        }
        let writer = JournalWriter::spawn(journal)?;
        Ok(Self::build(registry, gate, policy, Some(writer), tasks))
    }

    fn build(
        registry: WorkerRegistry,
        gate: ReviewerGate,
        policy: CoordinatorPolicy,
        journal: Option<JournalWriter>,
        tasks: HashMap<Uuid, TaskEntry>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let policy = CoordinatorPolicy {
            retry_limit: policy.retry_limit.max(1),
        };
        Self {
            inner: Arc::new(Inner {
                registry: Arc::new(registry),
                gate,
                policy,
                tasks: Mutex::new(tasks),
                events,
                journal,
            }),
        }
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.inner.registry
    }

    pub fn policy(&self) -> CoordinatorPolicy {
        self.inner.policy
    }

    pub fn journal(&self) -> Option<&TaskJournal> {
        self.inner.journal.as_ref().map(JournalWriter::journal)
    }

    /// Snapshots the journal failed to write. Always 0 without a journal.
    pub fn journal_failures(&self) -> u64 {
        self.inner.journal.as_ref().map_or(0, JournalWriter::failures)
    }

    /// Wait for every committed transition to reach the journal.
    pub async fn flush_journal(&self) -> Result<()> {
        match &self.inner.journal {
            Some(writer) => writer.flush().await,
            None => Ok(()),
        }
    }

    pub fn reviewer_id(&self) -> &str {
        self.inner.gate.reviewer_id()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.inner.events.subscribe()
    }

    /// Publish an event on the coordinator's stream. Used by the progress monitor.
    pub fn publish(&self, event: CoordinatorEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn get(&self, id: Uuid) -> Result<Task> {
        let tasks = self.inner.tasks.lock().await;
        tasks
            .get(&id)
            .map(|e| e.task.clone())
            .ok_or_else(|| RelayError::TaskNotFound(id.to_string()))
    }

    /// All tasks, oldest first.
    pub async fn list(&self) -> Vec<Task> {
        let tasks = self.inner.tasks.lock().await;
        let mut all: Vec<Task> = tasks.values().map(|e| e.task.clone()).collect();
        all.sort_by_key(|t| t.created_at);
        all
    }

    /// Tasks currently in `InProgress` or `AwaitingReview`.
    pub async fn in_flight(&self) -> Vec<Task> {
        let tasks = self.inner.tasks.lock().await;
        tasks
            .values()
            .filter(|e| {
                matches!(
                    e.task.status,
                    TaskStatus::InProgress | TaskStatus::AwaitingReview
                )
            })
            .map(|e| e.task.clone())
            .collect()
    }

    /// Wait until the task reaches a terminal state and return it.
    pub async fn wait(&self, id: Uuid) -> Result<Task> {
        let mut rx = {
            let tasks = self.inner.tasks.lock().await;
            let entry = tasks
                .get(&id)
                .ok_or_else(|| RelayError::TaskNotFound(id.to_string()))?;
            entry.status_tx.subscribe()
        };
        // The sender lives as long as the entry, which is never removed.
        let _ = rx.wait_for(|s| s.is_terminal()).await;
        self.get(id).await
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Create a task for `capability` and hand it to the registered worker.
    ///
    /// Fails with `UnknownCapability` before any task is created when no
    /// worker is registered for the capability.
    pub async fn submit(
        &self,
        capability: Capability,
        payload: serde_json::Value,
        options: SubmitOptions,
    ) -> Result<Uuid> {
        let worker = self.inner.registry.resolve(capability)?;
        let mut task = Task::new(capability, worker.id(), payload, options);
        task.transition(TaskStatus::InProgress)?;
        let id = task.id;
        let assignment = task.assignment();

        tracing::info!(
            task = %id,
            capability = %capability,
            worker = worker.id(),
            review_required = task.review_required,
            "task submitted"
        );

        {
            let mut tasks = self.inner.tasks.lock().await;
            let entry = TaskEntry::new(task);
            self.publish(CoordinatorEvent::TaskSubmitted {
                task_id: id,
                capability,
                worker_id: worker.id().to_string(),
            });
            self.commit(&entry);
            tasks.insert(id, entry);
        }

        self.dispatch(worker, assignment);
        Ok(id)
    }

    /// Apply a worker's result for `attempt`. Only valid while the task is
    /// `InProgress` on that same attempt.
    pub async fn on_worker_result(
        &self,
        id: Uuid,
        attempt: u32,
        result: serde_json::Value,
    ) -> Result<()> {
        let review = {
            let mut tasks = self.inner.tasks.lock().await;
            let entry = tasks
                .get_mut(&id)
                .ok_or_else(|| RelayError::TaskNotFound(id.to_string()))?;
            if entry.task.status != TaskStatus::InProgress {
                tracing::warn!(task = %id, status = %entry.task.status, "discarding late worker result");
                return Ok(());
            }
            if attempt != entry.task.attempt_count {
                tracing::warn!(task = %id, attempt, current = entry.task.attempt_count, "discarding stale worker result");
                return Ok(());
            }

            entry.task.result = Some(result.clone());
            let next = if entry.task.review_required {
                TaskStatus::AwaitingReview
            } else if entry.task.approval_required {
                TaskStatus::AwaitingApproval
            } else {
                TaskStatus::Approved
            };
            entry.task.transition(next)?;
            self.commit(entry);

            (next == TaskStatus::AwaitingReview).then(|| entry.task.clone())
        };

        if let Some(snapshot) = review {
            self.dispatch_review(snapshot, result);
        }
        Ok(())
    }

    /// Record a worker fault. Faults are terminal and never retried.
    pub async fn on_worker_failure(
        &self,
        id: Uuid,
        attempt: u32,
        error: impl Into<String>,
    ) -> Result<()> {
        let error = error.into();
        let mut tasks = self.inner.tasks.lock().await;
        let entry = tasks
            .get_mut(&id)
            .ok_or_else(|| RelayError::TaskNotFound(id.to_string()))?;
        if entry.task.status != TaskStatus::InProgress {
            tracing::warn!(task = %id, status = %entry.task.status, "discarding late worker failure");
            return Ok(());
        }
        if attempt != entry.task.attempt_count {
            tracing::warn!(task = %id, attempt, current = entry.task.attempt_count, "discarding stale worker failure");
            return Ok(());
        }
        tracing::warn!(task = %id, error = %error, "worker invocation failed");
        entry.task.fail(FailureReason::WorkerInvocationFailure { error })?;
        self.commit(entry);
        Ok(())
    }

    /// Apply the reviewer's verdict. Only valid while the task is
    /// `AwaitingReview` and the verdict is for the result under review.
    pub async fn on_review_verdict(&self, id: Uuid, verdict: ReviewVerdict) -> Result<()> {
        let retry = {
            let mut tasks = self.inner.tasks.lock().await;
            let entry = tasks
                .get_mut(&id)
                .ok_or_else(|| RelayError::TaskNotFound(id.to_string()))?;
            if entry.task.status != TaskStatus::AwaitingReview {
                tracing::warn!(task = %id, status = %entry.task.status, "discarding late review verdict");
                return Ok(());
            }
            if verdict.task_id != id {
                tracing::warn!(task = %id, verdict_task = %verdict.task_id, "discarding verdict for another task");
                return Ok(());
            }
            if verdict.attempt != entry.task.attempt_count {
                tracing::warn!(
                    task = %id,
                    attempt = verdict.attempt,
                    current = entry.task.attempt_count,
                    "discarding stale review verdict"
                );
                return Ok(());
            }

            let outcome = verdict.outcome;
            entry.task.verdicts.push(verdict);

            match outcome {
                ReviewOutcome::Approved => {
                    let next = if entry.task.approval_required {
                        TaskStatus::AwaitingApproval
                    } else {
                        TaskStatus::Approved
                    };
                    entry.task.transition(next)?;
                    tracing::info!(task = %id, attempts = entry.task.attempt_count, status = %next, "review approved");
                    self.commit(entry);
                    None
                }
                ReviewOutcome::NeedsImprovement => {
                    entry.task.attempt_count += 1;
                    entry.task.transition(TaskStatus::Rejected)?;
                    if entry.task.attempt_count >= self.inner.policy.retry_limit {
                        tracing::warn!(
                            task = %id,
                            attempts = entry.task.attempt_count,
                            "retry limit exceeded, escalating"
                        );
                        entry.task.fail(FailureReason::RetryLimitExceeded)?;
                        self.commit(entry);
                        None
                    } else {
                        entry.task.transition(TaskStatus::InProgress)?;
                        tracing::info!(task = %id, attempt = entry.task.attempt_count, "review rejected, re-delegating");
                        self.commit(entry);
                        Some((entry.task.capability, entry.task.assignment()))
                    }
                }
            }
        };

        if let Some((capability, assignment)) = retry {
            match self.inner.registry.resolve(capability) {
                Ok(worker) => self.dispatch(worker, assignment),
                Err(e) => self.on_worker_failure(id, assignment.attempt, e.to_string()).await?,
            }
        }
        Ok(())
    }

    /// Record a reviewer fault. The task fails; the result stays attached.
    pub async fn on_reviewer_failure(&self, id: Uuid, error: impl Into<String>) -> Result<()> {
        let error = error.into();
        let mut tasks = self.inner.tasks.lock().await;
        let entry = tasks
            .get_mut(&id)
            .ok_or_else(|| RelayError::TaskNotFound(id.to_string()))?;
        if entry.task.status != TaskStatus::AwaitingReview {
            tracing::warn!(task = %id, status = %entry.task.status, "discarding late reviewer failure");
            return Ok(());
        }
        tracing::warn!(task = %id, error = %error, "reviewer invocation failed");
        entry.task.fail(FailureReason::ReviewerInvocationFailure { error })?;
        self.commit(entry);
        Ok(())
    }

    /// Fail any non-terminal task with `Cancelled`. Calling it again returns
    /// the same terminal snapshot without emitting anything.
    pub async fn cancel(&self, id: Uuid) -> Result<Task> {
        self.fail_open(id, FailureReason::Cancelled).await
    }

    /// Fail a task the supervisor decided has run too long.
    pub async fn time_out(&self, id: Uuid) -> Result<Task> {
        self.fail_open(id, FailureReason::TimedOut).await
    }

    /// Human sign-off for a task parked in `AwaitingApproval`.
    pub async fn approve(&self, id: Uuid) -> Result<Task> {
        let mut tasks = self.inner.tasks.lock().await;
        let entry = awaiting_approval(&mut tasks, id)?;
        entry.task.transition(TaskStatus::Approved)?;
        tracing::info!(task = %id, "task approved by human");
        self.commit(entry);
        Ok(entry.task.clone())
    }

    /// Human refusal for a task parked in `AwaitingApproval`.
    pub async fn decline(&self, id: Uuid, reason: impl Into<String>) -> Result<Task> {
        let reason = reason.into();
        let mut tasks = self.inner.tasks.lock().await;
        let entry = awaiting_approval(&mut tasks, id)?;
        tracing::info!(task = %id, reason = %reason, "task declined by human");
        entry.task.fail(FailureReason::Declined { reason })?;
        self.commit(entry);
        Ok(entry.task.clone())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn fail_open(&self, id: Uuid, reason: FailureReason) -> Result<Task> {
        let mut tasks = self.inner.tasks.lock().await;
        let entry = tasks
            .get_mut(&id)
            .ok_or_else(|| RelayError::TaskNotFound(id.to_string()))?;
        if entry.task.is_terminal() {
            return Ok(entry.task.clone());
        }
        tracing::info!(task = %id, reason = %reason, "failing open task");
        entry.task.fail(reason)?;
        self.commit(entry);
        Ok(entry.task.clone())
    }

    /// Queue the snapshot, wake waiters and publish after a mutation. Called
    /// with the table lock held so snapshots and events for one task go out
    /// in transition order.
    fn commit(&self, entry: &TaskEntry) {
        let task = &entry.task;
        if let Some(writer) = &self.inner.journal {
            writer.queue(task);
        }
        entry.status_tx.send_replace(task.status);
        self.publish(CoordinatorEvent::updated(task));
        if let Some(terminal) = CoordinatorEvent::terminal(task) {
            self.publish(terminal);
        }
    }

    fn dispatch(&self, worker: Arc<dyn Worker>, assignment: Assignment) {
        let this = self.clone();
        tokio::spawn(async move {
            let id = assignment.task_id;
            let attempt = assignment.attempt;
            tracing::debug!(task = %id, worker = worker.id(), attempt, "invoking worker");
            let applied = match worker.invoke(assignment).await {
                Ok(result) => this.on_worker_result(id, attempt, result).await,
                Err(e) => this.on_worker_failure(id, attempt, e.to_string()).await,
            };
            if let Err(e) = applied {
                tracing::error!(task = %id, error = %e, "failed to apply worker outcome");
            }
        });
    }

    fn dispatch_review(&self, task: Task, result: serde_json::Value) {
        let this = self.clone();
        tokio::spawn(async move {
            let id = task.id;
            let applied = match this.inner.gate.review(&task, &result).await {
                Ok(verdict) => this.on_review_verdict(id, verdict).await,
                Err(e) => this.on_reviewer_failure(id, e.to_string()).await,
            };
            if let Err(e) = applied {
                tracing::error!(task = %id, error = %e, "failed to apply review outcome");
            }
        });
    }
}

fn awaiting_approval(tasks: &mut HashMap<Uuid, TaskEntry>, id: Uuid) -> Result<&mut TaskEntry> {
    let entry = tasks
        .get_mut(&id)
        .ok_or_else(|| RelayError::TaskNotFound(id.to_string()))?;
    if entry.task.status != TaskStatus::AwaitingApproval {
        return Err(RelayError::InvalidTransition {
            from: entry.task.status.to_string(),
            to: TaskStatus::Approved.to_string(),
            reason: "task is not awaiting approval".to_string(),
        });
    }
    Ok(entry)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::{ReviewDecision, Reviewer};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Returns "R{attempt+1}" and remembers every assignment it was given.
    struct Scripted {
        capability: Capability,
        seen: StdMutex<Vec<Assignment>>,
    }

    impl Scripted {
        fn new(capability: Capability) -> Arc<Self> {
            Arc::new(Self {
                capability,
                seen: StdMutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<Assignment> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Worker for Scripted {
        fn id(&self) -> &str {
            "scripted"
        }

        fn capability(&self) -> Capability {
            self.capability
        }

        async fn invoke(&self, assignment: Assignment) -> Result<serde_json::Value> {
            let attempt = assignment.attempt;
            self.seen.lock().unwrap().push(assignment);
            Ok(json!(format!("R{}", attempt + 1)))
        }
    }

    struct Hanging;

    #[async_trait]
    impl Worker for Hanging {
        fn id(&self) -> &str {
            "hanging"
        }

        fn capability(&self) -> Capability {
            Capability::Devops
        }

        async fn invoke(&self, _assignment: Assignment) -> Result<serde_json::Value> {
            std::future::pending::<()>().await;
            Ok(json!(null))
        }
    }

    struct Broken;

    #[async_trait]
    impl Worker for Broken {
        fn id(&self) -> &str {
            "broken"
        }

        fn capability(&self) -> Capability {
            Capability::Qa
        }

        async fn invoke(&self, _assignment: Assignment) -> Result<serde_json::Value> {
            Err(RelayError::WorkerInvocation("exit status 2".into()))
        }
    }

    /// Rejects with "F{n}" for the first `rejections` reviews, then approves.
    struct Strict {
        rejections: u32,
    }

    #[async_trait]
    impl Reviewer for Strict {
        fn id(&self) -> &str {
            "plan-reviewer"
        }

        async fn review(&self, task: &Task, _result: &serde_json::Value) -> Result<ReviewDecision> {
            if task.attempt_count < self.rejections {
                Ok(ReviewDecision::needs_improvement(format!("F{}", task.attempt_count + 1)))
            } else {
                Ok(ReviewDecision::approve())
            }
        }
    }

    /// Never answers; verdicts are injected by the test.
    struct Silent;

    #[async_trait]
    impl Reviewer for Silent {
        fn id(&self) -> &str {
            "plan-reviewer"
        }

        async fn review(&self, _task: &Task, _result: &serde_json::Value) -> Result<ReviewDecision> {
            std::future::pending::<()>().await;
            Ok(ReviewDecision::approve())
        }
    }

    struct Faulty;

    #[async_trait]
    impl Reviewer for Faulty {
        fn id(&self) -> &str {
            "plan-reviewer"
        }

        async fn review(&self, _task: &Task, _result: &serde_json::Value) -> Result<ReviewDecision> {
            Err(RelayError::WorkerInvocation("reviewer exited with status 3".into()))
        }
    }

    struct Offline;

    #[async_trait]
    impl Worker for Offline {
        fn id(&self) -> &str {
            "offline"
        }

        fn capability(&self) -> Capability {
            Capability::Frontend
        }

        fn available(&self) -> bool {
            false
        }

        async fn invoke(&self, _assignment: Assignment) -> Result<serde_json::Value> {
            Ok(json!(null))
        }
    }

    fn coordinator(workers: Vec<Arc<dyn Worker>>, rejections: u32) -> Coordinator {
        coordinator_with(workers, Arc::new(Strict { rejections }))
    }

    fn coordinator_with(workers: Vec<Arc<dyn Worker>>, reviewer: Arc<dyn Reviewer>) -> Coordinator {
        let mut registry = WorkerRegistry::new();
        for w in workers {
            registry.register(w);
        }
        Coordinator::new(registry, ReviewerGate::new(reviewer), CoordinatorPolicy::default())
    }

    async fn wait_for(c: &Coordinator, id: Uuid, status: TaskStatus, attempt_count: u32) -> Task {
        for _ in 0..500 {
            let task = c.get(id).await.unwrap();
            if task.status == status && task.attempt_count == attempt_count {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task never reached {status} on attempt {attempt_count}");
    }

    async fn settle(c: &Coordinator, id: Uuid) -> Task {
        tokio::time::timeout(Duration::from_secs(5), c.wait(id))
            .await
            .expect("task did not settle")
            .unwrap()
    }

    fn assert_legal_path(task: &Task) {
        let mut current = TaskStatus::Pending;
        for t in &task.transitions {
            assert_eq!(t.from, current);
            assert!(t.from.can_transition_to(t.to), "{} -> {}", t.from, t.to);
            current = t.to;
        }
        assert_eq!(current, task.status);
    }

    #[tokio::test]
    async fn rejection_then_approval_redelegates_with_feedback() {
        let backend = Scripted::new(Capability::Backend);
        let c = coordinator(vec![backend.clone()], 1);

        let id = c
            .submit(Capability::Backend, json!({"goal": "api"}), SubmitOptions::default())
            .await
            .unwrap();
        let task = settle(&c, id).await;

        assert_eq!(task.status, TaskStatus::Approved);
        assert_eq!(task.attempt_count, 1);
        assert_eq!(task.verdicts.len(), 2);
        assert_eq!(task.verdicts[0].outcome, ReviewOutcome::NeedsImprovement);
        assert!(task.verdicts[1].is_approved());
        assert_eq!(task.result, Some(json!("R2")));

        let seen = backend.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].payload, json!({"goal": "api"}));
        assert_eq!(seen[1].previous_result, Some(json!("R1")));
        assert_eq!(seen[1].feedback, vec!["F1".to_string()]);
        assert_legal_path(&task);
    }

    #[tokio::test]
    async fn unregistered_capability_creates_no_task() {
        let c = coordinator(vec![Scripted::new(Capability::Backend)], 0);
        let err = c
            .submit(Capability::Frontend, json!("x"), SubmitOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::UnknownCapability(ref s) if s == "frontend"));
        assert!(c.list().await.is_empty());
    }

    #[tokio::test]
    async fn unavailable_worker_rejects_submission_without_creating_a_task() {
        let c = coordinator(vec![Arc::new(Offline)], 0);
        let err = c
            .submit(Capability::Frontend, json!("x"), SubmitOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::WorkerUnavailable(ref w) if w == "offline"));
        assert!(c.list().await.is_empty());
    }

    #[tokio::test]
    async fn three_rejections_exhaust_retry_limit() {
        let backend = Scripted::new(Capability::Backend);
        let c = coordinator(vec![backend.clone()], u32::MAX);

        let id = c
            .submit(Capability::Backend, json!("x"), SubmitOptions::default())
            .await
            .unwrap();
        let task = settle(&c, id).await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.failure, Some(FailureReason::RetryLimitExceeded));
        assert_eq!(task.attempt_count, 3);
        assert_eq!(task.verdicts.len(), 3);
        assert_eq!(backend.seen().len(), 3);
        assert_legal_path(&task);
    }

    #[tokio::test]
    async fn approved_is_preceded_by_exactly_one_approving_verdict() {
        let c = coordinator(vec![Scripted::new(Capability::Frontend)], 2);
        let id = c
            .submit(Capability::Frontend, json!("ui"), SubmitOptions::default())
            .await
            .unwrap();
        let task = settle(&c, id).await;

        assert_eq!(task.status, TaskStatus::Approved);
        let approvals = task.verdicts.iter().filter(|v| v.is_approved()).count();
        assert_eq!(approvals, 1);
        assert!(task.last_verdict().unwrap().is_approved());
        let n = task.transitions.len();
        assert_eq!(task.transitions[n - 1].from, TaskStatus::AwaitingReview);
    }

    #[tokio::test]
    async fn review_can_be_skipped_at_submission() {
        let c = coordinator(vec![Scripted::new(Capability::KnowledgeManager)], u32::MAX);
        let opts = SubmitOptions {
            review_required: false,
            approval_required: false,
        };
        let id = c.submit(Capability::KnowledgeManager, json!("docs"), opts).await.unwrap();
        let task = settle(&c, id).await;

        assert_eq!(task.status, TaskStatus::Approved);
        assert!(task.verdicts.is_empty());
        assert_legal_path(&task);
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_emits_once() {
        let c = coordinator(vec![Arc::new(Hanging)], 0);
        let mut events = c.subscribe();
        let id = c
            .submit(Capability::Devops, json!("deploy"), SubmitOptions::default())
            .await
            .unwrap();

        let first = c.cancel(id).await.unwrap();
        let second = c.cancel(id).await.unwrap();
        assert_eq!(first.status, TaskStatus::Failed);
        assert_eq!(second.status, TaskStatus::Failed);
        assert_eq!(second.failure, Some(FailureReason::Cancelled));
        assert_eq!(first.transitions.len(), second.transitions.len());

        let mut failed = 0;
        while let Ok(ev) = events.try_recv() {
            if matches!(ev, CoordinatorEvent::TaskFailed { .. }) {
                failed += 1;
            }
        }
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn late_result_after_cancel_is_discarded() {
        let c = coordinator(vec![Arc::new(Hanging)], 0);
        let id = c
            .submit(Capability::Devops, json!("deploy"), SubmitOptions::default())
            .await
            .unwrap();
        c.cancel(id).await.unwrap();

        c.on_worker_result(id, 0, json!("too late")).await.unwrap();
        let task = c.get(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.result.is_none());
    }

    #[tokio::test]
    async fn verdict_outside_review_is_discarded() {
        let c = coordinator(vec![Arc::new(Hanging)], 0);
        let id = c
            .submit(Capability::Devops, json!("deploy"), SubmitOptions::default())
            .await
            .unwrap();

        c.on_review_verdict(id, ReviewVerdict::approved(id, 0, "plan-reviewer"))
            .await
            .unwrap();
        let task = c.get(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert!(task.verdicts.is_empty());
    }

    #[tokio::test]
    async fn stale_verdict_from_earlier_round_is_discarded() {
        let c = coordinator_with(vec![Scripted::new(Capability::Backend)], Arc::new(Silent));
        let id = c
            .submit(Capability::Backend, json!("api"), SubmitOptions::default())
            .await
            .unwrap();
        wait_for(&c, id, TaskStatus::AwaitingReview, 0).await;

        c.on_review_verdict(id, ReviewVerdict::needs_improvement(id, 0, "plan-reviewer", "F1"))
            .await
            .unwrap();
        wait_for(&c, id, TaskStatus::AwaitingReview, 1).await;

        // A repeat of the round-0 verdict must not approve the unreviewed R2.
        c.on_review_verdict(id, ReviewVerdict::approved(id, 0, "plan-reviewer"))
            .await
            .unwrap();
        let task = c.get(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::AwaitingReview);
        assert_eq!(task.verdicts.len(), 1);
        assert_eq!(task.result, Some(json!("R2")));

        c.on_review_verdict(id, ReviewVerdict::approved(id, 1, "plan-reviewer"))
            .await
            .unwrap();
        let task = c.get(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Approved);
        let attempts: Vec<u32> = task.verdicts.iter().map(|v| v.attempt).collect();
        assert_eq!(attempts, vec![0, 1]);
        assert_legal_path(&task);
    }

    #[tokio::test]
    async fn stale_worker_outcome_is_discarded() {
        let c = coordinator_with(vec![Arc::new(Hanging)], Arc::new(Silent));
        let id = c
            .submit(Capability::Devops, json!("deploy"), SubmitOptions::default())
            .await
            .unwrap();

        c.on_worker_result(id, 1, json!("from the future")).await.unwrap();
        c.on_worker_failure(id, 1, "boom").await.unwrap();
        let task = c.get(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert!(task.result.is_none());

        c.on_worker_result(id, 0, json!("R1")).await.unwrap();
        let task = c.get(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::AwaitingReview);
        assert_eq!(task.result, Some(json!("R1")));
    }

    #[tokio::test]
    async fn reviewer_failure_fails_task_and_keeps_result() {
        let c = coordinator_with(vec![Scripted::new(Capability::Qa)], Arc::new(Faulty));
        let id = c
            .submit(Capability::Qa, json!("suite"), SubmitOptions::default())
            .await
            .unwrap();
        let task = settle(&c, id).await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.result, Some(json!("R1")));
        assert!(task.verdicts.is_empty());
        match task.failure {
            Some(FailureReason::ReviewerInvocationFailure { error }) => {
                assert!(error.contains("status 3"), "{error}")
            }
            other => panic!("unexpected failure: {other:?}"),
        }
        assert_eq!(task.transitions.last().unwrap().from, TaskStatus::AwaitingReview);
    }

    #[tokio::test]
    async fn worker_failure_is_terminal_and_not_retried() {
        let c = coordinator(vec![Arc::new(Broken)], 0);
        let id = c
            .submit(Capability::Qa, json!("test"), SubmitOptions::default())
            .await
            .unwrap();
        let task = settle(&c, id).await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.attempt_count, 0);
        match task.failure {
            Some(FailureReason::WorkerInvocationFailure { error }) => {
                assert!(error.contains("exit status 2"))
            }
            other => panic!("unexpected failure: {other:?}"),
        }
    }

    #[tokio::test]
    async fn human_approval_parks_then_finalizes() {
        let c = coordinator(vec![Scripted::new(Capability::KnowledgeManager)], 0);
        let opts = SubmitOptions {
            review_required: true,
            approval_required: true,
        };
        let id = c.submit(Capability::KnowledgeManager, json!("index"), opts).await.unwrap();

        let mut parked = false;
        for _ in 0..100 {
            if c.get(id).await.unwrap().status == TaskStatus::AwaitingApproval {
                parked = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(parked, "task never reached awaiting_approval");

        let task = c.approve(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Approved);
        assert_legal_path(&task);
        assert!(c.approve(id).await.is_err());
    }

    #[tokio::test]
    async fn decline_fails_parked_task() {
        let c = coordinator(vec![Scripted::new(Capability::KnowledgeManager)], 0);
        let opts = SubmitOptions {
            review_required: false,
            approval_required: true,
        };
        let id = c.submit(Capability::KnowledgeManager, json!("index"), opts).await.unwrap();
        for _ in 0..100 {
            if c.get(id).await.unwrap().status == TaskStatus::AwaitingApproval {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let task = c.decline(id, "wrong directory").await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(
            task.failure,
            Some(FailureReason::Declined {
                reason: "wrong directory".into()
            })
        );
    }

    #[tokio::test]
    async fn unknown_task_operations_fail() {
        let c = coordinator(vec![], 0);
        let id = Uuid::new_v4();
        assert!(matches!(c.get(id).await, Err(RelayError::TaskNotFound(_))));
        assert!(matches!(c.cancel(id).await, Err(RelayError::TaskNotFound(_))));
        assert!(matches!(
            c.on_worker_result(id, 0, json!(1)).await,
            Err(RelayError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn journal_recovery_fails_interrupted_tasks() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tasks.redb");

        let mut interrupted = Task::new(Capability::Backend, "scripted", json!(1), SubmitOptions::default());
        interrupted.transition(TaskStatus::InProgress).unwrap();
        let mut parked = Task::new(Capability::Backend, "scripted", json!(2), SubmitOptions::default());
        parked.transition(TaskStatus::InProgress).unwrap();
        parked.transition(TaskStatus::AwaitingApproval).unwrap();
        {
            let journal = TaskJournal::open(&path).unwrap();
            journal.save(&interrupted).unwrap();
            journal.save(&parked).unwrap();
        }

        let gate = ReviewerGate::new(Arc::new(Strict { rejections: 0 }));
        let c = Coordinator::with_journal(
            WorkerRegistry::new(),
            gate,
            CoordinatorPolicy::default(),
            TaskJournal::open(&path).unwrap(),
        )
        .unwrap();

        let t = c.get(interrupted.id).await.unwrap();
        assert_eq!(t.failure, Some(FailureReason::Interrupted));
        let p = c.get(parked.id).await.unwrap();
        assert_eq!(p.status, TaskStatus::AwaitingApproval);
    }

    #[tokio::test]
    async fn journal_tracks_latest_state() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tasks.redb");
        let mut registry = WorkerRegistry::new();
        registry.register(Scripted::new(Capability::Backend));
        let gate = ReviewerGate::new(Arc::new(Strict { rejections: 0 }));
        let c = Coordinator::with_journal(
            registry,
            gate,
            CoordinatorPolicy::default(),
            TaskJournal::open(&path).unwrap(),
        )
        .unwrap();

        let id = c
            .submit(Capability::Backend, json!("x"), SubmitOptions::default())
            .await
            .unwrap();
        settle(&c, id).await;

        c.flush_journal().await.unwrap();
        let saved = c.journal().unwrap().get(id).unwrap().unwrap();
        assert_eq!(c.journal_failures(), 0);
        assert_eq!(saved.status, TaskStatus::Approved);
        assert_eq!(saved.verdicts.len(), 1);
    }
}
