//! Triplet storage traits and the in-memory backend.
//!
//! The triplet store is append-only: observation rows are never edited in
//! place. Rows for the same identity key and month are merged at read time by
//! OR-ing their day bitmasks and widening first/last seen, which is how
//! repeated daily uploads accumulate into one monthly row.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::StorageError;
use crate::presence::AnalysisWindow;

use super::{Triplet, TripletKey, ValidatedObservation};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Append-only storage for authoritative triplets.
pub trait TripletStore: Send + Sync {
    /// Appends one observation row.
    fn append(&self, triplet: Triplet) -> Result<(), StorageError>;

    /// Merged monthly rows for a normalized device id.
    fn rows_for_imei(&self, imei_norm: &str) -> Result<Vec<Triplet>, StorageError>;

    /// Merged monthly rows whose observed span overlaps the window.
    fn rows_in_window(&self, window: &AnalysisWindow) -> Result<Vec<Triplet>, StorageError>;

    /// True if the device was present on at least one day inside the window.
    fn imei_seen_in_window(
        &self,
        imei_norm: &str,
        window: &AnalysisWindow,
    ) -> Result<bool, StorageError>;
}

/// Receives observations excluded from authoritative storage, for auditing.
///
/// The staging area itself is an external collaborator; this trait is the
/// seam the ingest path hands rejected records through.
pub trait StagingSink: Send + Sync {
    /// Records one rejected observation.
    fn stage(&self, observation: &ValidatedObservation) -> Result<(), StorageError>;
}

/// Thread-safe in-memory triplet store.
#[derive(Debug, Default)]
pub struct InMemoryTripletStore {
    rows: RwLock<Vec<Triplet>>,
}

impl InMemoryTripletStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn merged(rows: &[Triplet]) -> Vec<Triplet> {
        let mut by_month: BTreeMap<(TripletKey, i32, u32), Triplet> = BTreeMap::new();
        for row in rows {
            let slot = by_month.entry((row.key(), row.year, row.month));
            match slot {
                std::collections::btree_map::Entry::Vacant(v) => {
                    v.insert(row.clone());
                }
                std::collections::btree_map::Entry::Occupied(mut o) => {
                    let merged = o.get_mut();
                    merged.day_bitmask = merged.day_bitmask.union(row.day_bitmask);
                    merged.first_seen = merged.first_seen.min(row.first_seen);
                    merged.last_seen = merged.last_seen.max(row.last_seen);
                }
            }
        }
        by_month.into_values().collect()
    }
}

impl TripletStore for InMemoryTripletStore {
    fn append(&self, triplet: Triplet) -> Result<(), StorageError> {
        let mut rows = self.rows.write().map_err(|_| lock_err("triplet.append"))?;
        rows.push(triplet);
        Ok(())
    }

    fn rows_for_imei(&self, imei_norm: &str) -> Result<Vec<Triplet>, StorageError> {
        let rows = self.rows.read().map_err(|_| lock_err("triplet.rows_for_imei"))?;
        let matching: Vec<Triplet> = rows
            .iter()
            .filter(|row| row.imei_norm == imei_norm)
            .cloned()
            .collect();
        Ok(Self::merged(&matching))
    }

    fn rows_in_window(&self, window: &AnalysisWindow) -> Result<Vec<Triplet>, StorageError> {
        let rows = self.rows.read().map_err(|_| lock_err("triplet.rows_in_window"))?;
        let merged = Self::merged(&rows);
        Ok(merged
            .into_iter()
            .filter(|row| window.overlaps_span(row.first_seen, row.last_seen))
            .collect())
    }

    fn imei_seen_in_window(
        &self,
        imei_norm: &str,
        window: &AnalysisWindow,
    ) -> Result<bool, StorageError> {
        let rows = self.rows_for_imei(imei_norm)?;
        Ok(rows.iter().any(|row| {
            window.overlaps_span(row.first_seen, row.last_seen)
                && !row
                    .day_bitmask
                    .within_window(row.first_seen, row.last_seen, window)
                    .is_empty()
        }))
    }
}

/// Thread-safe in-memory staging sink, for tests and embedded use.
#[derive(Debug, Default)]
pub struct InMemoryStagingSink {
    staged: RwLock<Vec<ValidatedObservation>>,
}

impl InMemoryStagingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything staged so far.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the lock is poisoned.
    pub fn staged(&self) -> Result<Vec<ValidatedObservation>, StorageError> {
        Ok(self
            .staged
            .read()
            .map_err(|_| lock_err("staging.staged"))?
            .clone())
    }
}

impl StagingSink for InMemoryStagingSink {
    fn stage(&self, observation: &ValidatedObservation) -> Result<(), StorageError> {
        let mut staged = self.staged.write().map_err(|_| lock_err("staging.stage"))?;
        staged.push(observation.clone());
        Ok(())
    }
}
