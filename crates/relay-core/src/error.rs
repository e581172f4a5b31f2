use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("not initialized: run 'relay init'")]
    NotInitialized,

    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    #[error("worker unavailable: {0}")]
    WorkerUnavailable(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("worker invocation failed: {0}")]
    WorkerInvocation(String),

    #[error("task journal error: {0}")]
    Journal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
