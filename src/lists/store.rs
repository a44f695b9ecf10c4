//! List storage.
//!
//! Same open/close interval discipline as classification state: appending a
//! run's delta rows closes any current row for the same entity key, and both
//! sides of that exchange happen in one atomic batch. Nothing is deleted in
//! normal operation; `replace_all` exists only for full list rebuild/reset.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::error::{ComplyError, InvariantViolation, StorageError, ValidationError};
use crate::run::RunId;
use crate::triplet::OperatorId;

use super::entry::{EntityKey, ListEntry, ListKind};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

type OpenKey = (ListKind, Option<OperatorId>, EntityKey);

/// Storage trait for materialized list entries.
///
/// # Invariants
/// - At most one open row per (kind, operator, entity key).
/// - `apply_run` is atomic and run ids are strictly increasing.
/// - Reads observe a consistent snapshot: strictly pre-run or post-run state,
///   never a mix.
pub trait ListStore: Send + Sync {
    /// Snapshot of all rows of a kind, optionally narrowed to one operator.
    fn entries(
        &self,
        kind: ListKind,
        operator: Option<&OperatorId>,
    ) -> Result<Vec<ListEntry>, StorageError>;

    /// The highest run id applied so far.
    fn latest_run_id(&self) -> Result<Option<RunId>, StorageError>;

    /// Applies one run's delta rows: closes the current row for each appended
    /// entity key, then inserts the new rows, all atomically.
    ///
    /// # Errors
    ///
    /// `ValidationError::NonMonotonicRunId` if the run id does not advance;
    /// `InvariantViolation::DuplicateOpenEntry` if the batch carries two rows
    /// for one entity key. Either way nothing applies.
    fn apply_run(&self, run_id: RunId, appended: Vec<ListEntry>) -> Result<usize, ComplyError>;

    /// Full rebuild: discards everything and installs the given rows.
    fn replace_all(&self, entries: Vec<ListEntry>) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
struct ListInner {
    entries: Vec<ListEntry>,
    open_idx: HashMap<OpenKey, usize>,
    latest_run_id: Option<RunId>,
}

impl ListInner {
    fn rebuild_index(&mut self) {
        self.open_idx.clear();
        self.latest_run_id = None;
        for (idx, entry) in self.entries.iter().enumerate() {
            if entry.is_open() {
                self.open_idx.insert(
                    (entry.kind, entry.operator_id.clone(), entry.entity_key()),
                    idx,
                );
            }
            let run = entry.end_run_id.unwrap_or(entry.start_run_id);
            self.latest_run_id = Some(self.latest_run_id.map_or(run, |l: RunId| l.max(run)));
        }
    }
}

/// Thread-safe in-memory list store.
#[derive(Debug, Default)]
pub struct InMemoryListStore {
    inner: RwLock<ListInner>,
}

impl InMemoryListStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ListStore for InMemoryListStore {
    fn entries(
        &self,
        kind: ListKind,
        operator: Option<&OperatorId>,
    ) -> Result<Vec<ListEntry>, StorageError> {
        let inner = self.inner.read().map_err(|_| lock_err("lists.entries"))?;
        Ok(inner
            .entries
            .iter()
            .filter(|e| e.kind == kind)
            .filter(|e| operator.map_or(true, |op| e.operator_id.as_ref() == Some(op)))
            .cloned()
            .collect())
    }

    fn latest_run_id(&self) -> Result<Option<RunId>, StorageError> {
        let inner = self.inner.read().map_err(|_| lock_err("lists.latest_run_id"))?;
        Ok(inner.latest_run_id)
    }

    fn apply_run(&self, run_id: RunId, appended: Vec<ListEntry>) -> Result<usize, ComplyError> {
        let mut inner = self.inner.write().map_err(|_| lock_err("lists.apply_run"))?;

        // Validate the whole batch before touching anything.
        if let Some(latest) = inner.latest_run_id {
            if run_id <= latest {
                return Err(ValidationError::NonMonotonicRunId { run_id, latest }.into());
            }
        }
        let mut keys_in_batch: HashSet<OpenKey> = HashSet::new();
        for entry in &appended {
            let key = (entry.kind, entry.operator_id.clone(), entry.entity_key());
            if !keys_in_batch.insert(key) {
                return Err(InvariantViolation::DuplicateOpenEntry {
                    kind: entry.kind.as_str().to_string(),
                    key: entry.entity_key().to_string(),
                }
                .into());
            }
        }

        // Close the current row for every appended entity key, then insert.
        for entry in &appended {
            let key = (entry.kind, entry.operator_id.clone(), entry.entity_key());
            if let Some(idx) = inner.open_idx.remove(&key) {
                inner.entries[idx].end_run_id = Some(run_id);
            }
        }
        let count = appended.len();
        for mut entry in appended {
            entry.start_run_id = run_id;
            entry.end_run_id = None;
            let key = (entry.kind, entry.operator_id.clone(), entry.entity_key());
            let idx = inner.entries.len();
            inner.entries.push(entry);
            inner.open_idx.insert(key, idx);
        }
        inner.latest_run_id = Some(run_id);
        Ok(count)
    }

    fn replace_all(&self, entries: Vec<ListEntry>) -> Result<(), StorageError> {
        let mut inner = self.inner.write().map_err(|_| lock_err("lists.replace_all"))?;
        inner.entries = entries;
        inner.rebuild_index();
        Ok(())
    }
}
