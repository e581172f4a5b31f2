//! Durable task journal backed by redb.
//!
//! One `TASKS` table keyed by the 16 raw bytes of the task id, holding the
//! latest JSON-encoded `Task` snapshot. The coordinator overwrites the entry
//! on every transition, so the journal always reflects the last committed
//! state, verdict history included.
//!
//! Writes go through [`JournalWriter`], which owns a dedicated thread so redb
//! commits never run on an async worker thread.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::error::{RelayError, Result};
use crate::task::Task;

const TASKS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("tasks");

fn journal_err(e: impl std::fmt::Display) -> RelayError {
    RelayError::Journal(e.to_string())
}

pub struct TaskJournal {
    db: Database,
}

impl TaskJournal {
    /// Open or create the journal at `path`, creating the table if needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(journal_err)?;
        let wt = db.begin_write().map_err(journal_err)?;
        wt.open_table(TASKS).map_err(journal_err)?;
        wt.commit().map_err(journal_err)?;
        Ok(Self { db })
    }

    /// Insert or overwrite the snapshot for `task.id`.
    pub fn save(&self, task: &Task) -> Result<()> {
        let value = serde_json::to_vec(task)?;
        let wt = self.db.begin_write().map_err(journal_err)?;
        {
            let mut table = wt.open_table(TASKS).map_err(journal_err)?;
            table
                .insert(task.id.as_bytes().as_slice(), value.as_slice())
                .map_err(journal_err)?;
        }
        wt.commit().map_err(journal_err)?;
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<Option<Task>> {
        let rt = self.db.begin_read().map_err(journal_err)?;
        let table = rt.open_table(TASKS).map_err(journal_err)?;
        let entry = table.get(id.as_bytes().as_slice()).map_err(journal_err)?;
        match entry {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    /// All journaled tasks, oldest first.
    pub fn load_all(&self) -> Result<Vec<Task>> {
        let rt = self.db.begin_read().map_err(journal_err)?;
        let table = rt.open_table(TASKS).map_err(journal_err)?;
        let mut tasks = Vec::new();
        for entry in table.iter().map_err(journal_err)? {
            let (_, v) = entry.map_err(journal_err)?;
            let task: Task = serde_json::from_slice(v.value())?;
            tasks.push(task);
        }
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }
}

// ---------------------------------------------------------------------------
// JournalWriter
// ---------------------------------------------------------------------------

enum JournalOp {
    Save(Box<Task>),
    Flush(oneshot::Sender<u64>),
}

/// Applies queued snapshots on the `relay-journal` thread, in queue order.
pub struct JournalWriter {
    journal: Arc<TaskJournal>,
    tx: mpsc::UnboundedSender<JournalOp>,
    failures: Arc<AtomicU64>,
}

impl JournalWriter {
    /// Start the writer thread. It exits once the writer is dropped and the
    /// queue is drained.
    pub fn spawn(journal: TaskJournal) -> Result<Self> {
        let journal = Arc::new(journal);
        let failures = Arc::new(AtomicU64::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let db = Arc::clone(&journal);
        let failed = Arc::clone(&failures);
        std::thread::Builder::new()
            .name("relay-journal".into())
            .spawn(move || {
                while let Some(op) = rx.blocking_recv() {
                    match op {
                        JournalOp::Save(task) => {
                            if let Err(e) = db.save(&task) {
                                failed.fetch_add(1, Ordering::Relaxed);
                                tracing::error!(task = %task.id, error = %e, "failed to journal task");
                            }
                        }
                        JournalOp::Flush(done) => {
                            let _ = done.send(failed.load(Ordering::Relaxed));
                        }
                    }
                }
            })?;

        Ok(Self {
            journal,
            tx,
            failures,
        })
    }

    pub fn journal(&self) -> &TaskJournal {
        &self.journal
    }

    /// Queue a snapshot. Never blocks.
    pub fn queue(&self, task: &Task) {
        if self.tx.send(JournalOp::Save(Box::new(task.clone()))).is_err() {
            self.failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(task = %task.id, "journal writer stopped, snapshot dropped");
        }
    }

    /// Snapshots that could not be written since the writer started.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Wait until everything queued so far is written. Fails when any write
    /// has failed since the writer started.
    pub async fn flush(&self) -> Result<()> {
        let stopped = || RelayError::Journal("journal writer stopped".into());
        let (done, rx) = oneshot::channel();
        self.tx.send(JournalOp::Flush(done)).map_err(|_| stopped())?;
        let failures = rx.await.map_err(|_| stopped())?;
        if failures > 0 {
            return Err(RelayError::Journal(format!(
                "{failures} task snapshot(s) failed to write"
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
