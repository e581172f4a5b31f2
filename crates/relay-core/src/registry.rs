//! Worker registry: the static roster mapping capabilities to workers.
//!
//! Built once at startup and then shared read-only behind an `Arc`, so
//! resolution needs no locking.

use crate::error::{RelayError, Result};
use crate::task::Assignment;
use crate::types::Capability;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const DEFAULT_CATEGORY: &str = "implementation";

#[async_trait]
pub trait Worker: Send + Sync {
    fn id(&self) -> &str;
    fn capability(&self) -> Capability;

    /// Expected-duration category the progress monitor uses for this worker.
    fn category(&self) -> &str {
        DEFAULT_CATEGORY
    }

    fn available(&self) -> bool {
        true
    }

    async fn invoke(&self, assignment: Assignment) -> Result<serde_json::Value>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerInfo {
    pub id: String,
    pub capability: Capability,
    pub category: String,
    pub available: bool,
}

#[derive(Default)]
pub struct WorkerRegistry {
    workers: BTreeMap<Capability, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, worker: Arc<dyn Worker>) {
        let capability = worker.capability();
        if let Some(previous) = self.workers.insert(capability, worker) {
            tracing::warn!(
                capability = %capability,
                replaced = previous.id(),
                "worker replaced an existing registration"
            );
        }
    }

    pub fn resolve(&self, capability: Capability) -> Result<Arc<dyn Worker>> {
        let worker = self
            .workers
            .get(&capability)
            .ok_or_else(|| RelayError::UnknownCapability(capability.to_string()))?;
        if !worker.available() {
            return Err(RelayError::WorkerUnavailable(worker.id().to_string()));
        }
        Ok(Arc::clone(worker))
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.workers.contains_key(&capability)
    }

    /// Roster in capability order.
    pub fn list(&self) -> Vec<WorkerInfo> {
        self.workers
            .values()
            .map(|w| WorkerInfo {
                id: w.id().to_string(),
                capability: w.capability(),
                category: w.category().to_string(),
                available: w.available(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
