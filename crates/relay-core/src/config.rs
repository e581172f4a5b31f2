use crate::backend::{AutoApproveReviewer, EchoWorker, ShellReviewer, ShellWorker};
use crate::coordinator::{Coordinator, CoordinatorPolicy, DEFAULT_RETRY_LIMIT};
use crate::error::{RelayError, Result};
use crate::journal::TaskJournal;
use crate::monitor::{default_budgets, DurationBudget, TimeoutAction};
use crate::paths;
use crate::registry::{WorkerRegistry, DEFAULT_CATEGORY};
use crate::review::ReviewerGate;
use crate::types::Capability;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Commands `which` cannot find because the shell provides them.
const SHELL_BUILTINS: &[&str] = &[
    ":", ".", "[", "cd", "echo", "eval", "exec", "exit", "export", "false", "printf", "read",
    "set", "source", "test", "true",
];

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerBackend {
    Shell {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_seconds: Option<u64>,
    },
    Echo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReviewerBackend {
    Shell {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_seconds: Option<u64>,
    },
    AutoApprove,
}

// ---------------------------------------------------------------------------
// WorkerConfig / ReviewerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    pub id: String,
    pub capability: Capability,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_available")]
    pub available: bool,
    pub backend: WorkerBackend,
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

fn default_available() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewerConfig {
    #[serde(default = "default_reviewer_id")]
    pub id: String,
    pub backend: ReviewerBackend,
}

fn default_reviewer_id() -> String {
    "plan-reviewer".to_string()
}

impl Default for ReviewerConfig {
    fn default() -> Self {
        Self {
            id: default_reviewer_id(),
            backend: ReviewerBackend::AutoApprove,
        }
    }
}

// ---------------------------------------------------------------------------
// PolicyConfig / MonitorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyConfig {
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    #[serde(default)]
    pub timeout_action: TimeoutAction,
}

fn default_retry_limit() -> u32 {
    DEFAULT_RETRY_LIMIT
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            retry_limit: default_retry_limit(),
            timeout_action: TimeoutAction::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_budgets")]
    pub budgets: BTreeMap<String, DurationBudget>,
}

fn default_poll_interval() -> u64 {
    30
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval(),
            budgets: default_budgets(),
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }
}

// ---------------------------------------------------------------------------
// ProjectConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    pub project: ProjectConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub workers: Vec<WorkerConfig>,
    #[serde(default)]
    pub reviewer: ReviewerConfig,
}

fn default_version() -> u32 {
    1
}

impl Config {
    /// A fresh config with one echo worker per capability and an
    /// auto-approving reviewer.
    pub fn new(project_name: impl Into<String>) -> Self {
        let workers = Capability::all()
            .iter()
            .map(|&capability| WorkerConfig {
                id: format!("{}-worker", capability.as_str()),
                capability,
                category: default_category(),
                available: true,
                backend: WorkerBackend::Echo,
            })
            .collect();
        Self {
            version: 1,
            project: ProjectConfig {
                name: project_name.into(),
                description: None,
            },
            policy: PolicyConfig::default(),
            monitor: MonitorConfig::default(),
            workers,
            reviewer: ReviewerConfig::default(),
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(RelayError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Assembly
    // -----------------------------------------------------------------------

    /// Instantiate every configured worker. Shell commands run with `root`
    /// as their working directory.
    pub fn build_registry(&self, root: &Path) -> Result<WorkerRegistry> {
        let mut registry = WorkerRegistry::new();
        for w in &self.workers {
            paths::validate_id(&w.id)?;
            match &w.backend {
                WorkerBackend::Shell {
                    command,
                    timeout_seconds,
                } => registry.register(Arc::new(ShellWorker {
                    id: w.id.clone(),
                    capability: w.capability,
                    category: w.category.clone(),
                    command: command.clone(),
                    root: root.to_path_buf(),
                    timeout: timeout_seconds.map(Duration::from_secs),
                    available: w.available,
                })),
                WorkerBackend::Echo => registry.register(Arc::new(EchoWorker {
                    id: w.id.clone(),
                    capability: w.capability,
                    category: w.category.clone(),
                    available: w.available,
                })),
            }
        }
        Ok(registry)
    }

    pub fn build_gate(&self, root: &Path) -> Result<ReviewerGate> {
        let r = &self.reviewer;
        paths::validate_id(&r.id)?;
        let gate = match &r.backend {
            ReviewerBackend::Shell {
                command,
                timeout_seconds,
            } => ReviewerGate::new(Arc::new(ShellReviewer {
                id: r.id.clone(),
                command: command.clone(),
                root: root.to_path_buf(),
                timeout: timeout_seconds.map(Duration::from_secs),
            })),
            ReviewerBackend::AutoApprove => ReviewerGate::new(Arc::new(AutoApproveReviewer {
                id: r.id.clone(),
            })),
        };
        Ok(gate)
    }

    pub fn coordinator_policy(&self) -> CoordinatorPolicy {
        CoordinatorPolicy {
            retry_limit: self.policy.retry_limit,
        }
    }

    /// Build a coordinator for `root`, journaling to `.relay/tasks.redb`
    /// when `journaled` is set.
    pub fn build_coordinator(&self, root: &Path, journaled: bool) -> Result<Coordinator> {
        let registry = self.build_registry(root)?;
        let gate = self.build_gate(root)?;
        let policy = self.coordinator_policy();
        if journaled {
            let journal = TaskJournal::open(&paths::journal_path(root))?;
            Coordinator::with_journal(registry, gate, policy, journal)
        } else {
            Ok(Coordinator::new(registry, gate, policy))
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut push = |level: WarnLevel, message: String| {
            warnings.push(ConfigWarning { level, message });
        };

        // Workers: ids, one worker per capability, commands.
        let mut seen_ids = HashSet::new();
        let mut seen_caps = HashSet::new();
        for w in &self.workers {
            if let Err(e) = paths::validate_id(&w.id) {
                push(WarnLevel::Error, e.to_string());
            }
            if !seen_ids.insert(w.id.as_str()) {
                push(WarnLevel::Error, format!("worker id '{}' is used more than once", w.id));
            }
            if !seen_caps.insert(w.capability) {
                push(
                    WarnLevel::Error,
                    format!(
                        "capability '{}' has more than one worker; '{}' would replace the earlier one",
                        w.capability, w.id
                    ),
                );
            }
            if !self.monitor.budgets.contains_key(&w.category) {
                push(
                    WarnLevel::Warning,
                    format!(
                        "worker '{}' uses category '{}' with no budget; it will not be monitored",
                        w.id, w.category
                    ),
                );
            }
            if let WorkerBackend::Shell { command, .. } = &w.backend {
                check_command(&format!("worker '{}'", w.id), command, &mut push);
            }
        }

        if let ReviewerBackend::Shell { command, .. } = &self.reviewer.backend {
            check_command(&format!("reviewer '{}'", self.reviewer.id), command, &mut push);
        }

        // Policy
        if self.policy.retry_limit == 0 {
            push(
                WarnLevel::Error,
                "policy.retry_limit is 0; it will be treated as 1".to_string(),
            );
        } else if self.policy.retry_limit > 10 {
            push(
                WarnLevel::Warning,
                format!(
                    "policy.retry_limit={} (>10 is unusual)",
                    self.policy.retry_limit
                ),
            );
        }

        // Budgets
        for (category, budget) in &self.monitor.budgets {
            if budget.min_minutes > budget.max_minutes {
                push(
                    WarnLevel::Error,
                    format!(
                        "budget '{}' has min_minutes={} greater than max_minutes={}",
                        category, budget.min_minutes, budget.max_minutes
                    ),
                );
            }
            if !(2.0..=2.5).contains(&budget.hard_timeout_factor) {
                push(
                    WarnLevel::Warning,
                    format!(
                        "budget '{}' has hard_timeout_factor={} (expected 2.0 to 2.5)",
                        category, budget.hard_timeout_factor
                    ),
                );
            }
        }

        warnings
    }
}

fn check_command(owner: &str, command: &str, push: &mut impl FnMut(WarnLevel, String)) {
    let Some(program) = command.split_whitespace().next() else {
        push(WarnLevel::Error, format!("{owner} has an empty command"));
        return;
    };
    if SHELL_BUILTINS.contains(&program) || program.contains('=') {
        return;
    }
    if which::which(program).is_err() {
        push(
            WarnLevel::Warning,
            format!("{owner} runs '{program}', which was not found on PATH"),
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
