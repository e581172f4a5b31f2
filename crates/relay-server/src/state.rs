use relay_core::coordinator::Coordinator;
use std::path::PathBuf;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub root: PathBuf,
    pub coordinator: Coordinator,
}

impl AppState {
    pub fn new(root: PathBuf, coordinator: Coordinator) -> Self {
        Self { root, coordinator }
    }
}
