//! Classification state storage.
//!
//! The store is an append-only interval log with SCD-style open/close
//! discipline: a state change closes the open record and inserts a new open
//! one; a refresh mutates the still-open row's policy fields. One run's
//! transitions are applied as a single atomic batch: the in-memory backend
//! validates the whole batch under the write lock before mutating anything,
//! so a rejected batch leaves the pre-run state untouched.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::NaiveDate;

use crate::error::{ComplyError, InvariantViolation, StorageError};
use crate::run::RunId;

use super::record::{ClassificationStateRecord, ConditionName, RecordId};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// One state-machine transition for a (device, condition) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateTransition {
    /// not-meeting → meeting: insert a new open record.
    Open {
        /// Normalized device id.
        imei_norm: String,
        /// Condition the device now meets.
        condition: ConditionName,
        /// First date of the interval.
        start_date: NaiveDate,
        /// Scheduled block date, if any.
        block_date: Option<NaiveDate>,
        /// Whether amnesty is granted.
        amnesty_granted: bool,
    },
    /// meeting → not-meeting: close the open record.
    Close {
        /// Normalized device id.
        imei_norm: String,
        /// Condition the device no longer meets.
        condition: ConditionName,
        /// End date of the interval.
        end_date: NaiveDate,
    },
    /// meeting → meeting: recompute policy fields on the still-open record.
    Refresh {
        /// Normalized device id.
        imei_norm: String,
        /// Condition the device keeps meeting.
        condition: ConditionName,
        /// New scheduled block date, if any.
        block_date: Option<NaiveDate>,
        /// New amnesty flag.
        amnesty_granted: bool,
    },
}

impl StateTransition {
    fn pair(&self) -> (&str, &ConditionName) {
        match self {
            Self::Open {
                imei_norm,
                condition,
                ..
            }
            | Self::Close {
                imei_norm,
                condition,
                ..
            }
            | Self::Refresh {
                imei_norm,
                condition,
                ..
            } => (imei_norm, condition),
        }
    }
}

/// Counts of the changes one applied run produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppliedStateChanges {
    /// Intervals opened.
    pub opened: usize,
    /// Intervals closed.
    pub closed: usize,
    /// Open intervals whose policy fields were refreshed.
    pub refreshed: usize,
}

/// Storage trait for classification state records.
///
/// # Invariants
/// - At most one open record exists per (imei_norm, condition) pair at any
///   committed point in time.
/// - `apply_run` is atomic: either every transition in the batch applies or
///   none does.
pub trait ClassificationStateStore: Send + Sync {
    /// The open record for a pair, if any.
    fn open_record(
        &self,
        imei_norm: &str,
        condition: &ConditionName,
    ) -> Result<Option<ClassificationStateRecord>, StorageError>;

    /// All open records for one condition.
    fn open_records_for_condition(
        &self,
        condition: &ConditionName,
    ) -> Result<Vec<ClassificationStateRecord>, StorageError>;

    /// All open records.
    fn open_records(&self) -> Result<Vec<ClassificationStateRecord>, StorageError>;

    /// Open and historical records for a device, optionally narrowed to one
    /// condition and to records visible at a run id.
    fn records_for_imei(
        &self,
        imei_norm: &str,
        condition: Option<&ConditionName>,
        at_run_id: Option<RunId>,
    ) -> Result<Vec<ClassificationStateRecord>, StorageError>;

    /// Applies one run's transitions as a single atomic batch.
    ///
    /// # Errors
    ///
    /// Returns an `InvariantViolation` (and applies nothing) if the batch
    /// would open a second record for a pair, close or refresh a pair with no
    /// open record, or silently move a block date earlier.
    fn apply_run(
        &self,
        run_id: RunId,
        transitions: &[StateTransition],
    ) -> Result<AppliedStateChanges, ComplyError>;
}

#[derive(Debug, Default)]
struct StateInner {
    records: Vec<ClassificationStateRecord>,
    open_idx: HashMap<(String, ConditionName), usize>,
}

/// Thread-safe in-memory classification state store.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    inner: RwLock<StateInner>,
}

impl InMemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn validate_batch(
        inner: &StateInner,
        transitions: &[StateTransition],
    ) -> Result<(), InvariantViolation> {
        // Pairs may appear at most once per run; a second transition for the
        // same pair means the upstream evaluation produced conflicting
        // outcomes.
        let mut seen: HashSet<(String, String)> = HashSet::new();
        for transition in transitions {
            let (imei_norm, condition) = transition.pair();
            if !seen.insert((imei_norm.to_string(), condition.as_str().to_string())) {
                return Err(InvariantViolation::DuplicateOpenState {
                    imei_norm: imei_norm.to_string(),
                    condition: condition.as_str().to_string(),
                });
            }

            let open = inner
                .open_idx
                .get(&(imei_norm.to_string(), condition.clone()))
                .map(|&idx| &inner.records[idx]);
            match transition {
                StateTransition::Open { .. } => {
                    if open.is_some() {
                        return Err(InvariantViolation::DuplicateOpenState {
                            imei_norm: imei_norm.to_string(),
                            condition: condition.as_str().to_string(),
                        });
                    }
                }
                StateTransition::Close { .. } => {
                    if open.is_none() {
                        return Err(InvariantViolation::CloseWithoutOpenState {
                            imei_norm: imei_norm.to_string(),
                            condition: condition.as_str().to_string(),
                        });
                    }
                }
                StateTransition::Refresh {
                    block_date,
                    amnesty_granted,
                    ..
                } => {
                    let Some(record) = open else {
                        return Err(InvariantViolation::RefreshWithoutOpenState {
                            imei_norm: imei_norm.to_string(),
                            condition: condition.as_str().to_string(),
                        });
                    };
                    // A block date may only move earlier with an explicit
                    // reason: an amnesty transition on the row.
                    if let (Some(old), Some(new)) = (record.block_date, *block_date) {
                        if new < old
                            && *amnesty_granted == record.amnesty_granted
                            && !record.amnesty_granted
                        {
                            return Err(InvariantViolation::BlockDateRegression {
                                imei_norm: imei_norm.to_string(),
                                condition: condition.as_str().to_string(),
                                from: old,
                                to: new,
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl ClassificationStateStore for InMemoryStateStore {
    fn open_record(
        &self,
        imei_norm: &str,
        condition: &ConditionName,
    ) -> Result<Option<ClassificationStateRecord>, StorageError> {
        let inner = self.inner.read().map_err(|_| lock_err("state.open_record"))?;
        Ok(inner
            .open_idx
            .get(&(imei_norm.to_string(), condition.clone()))
            .map(|&idx| inner.records[idx].clone()))
    }

    fn open_records_for_condition(
        &self,
        condition: &ConditionName,
    ) -> Result<Vec<ClassificationStateRecord>, StorageError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| lock_err("state.open_records_for_condition"))?;
        Ok(inner
            .records
            .iter()
            .filter(|r| r.is_open() && &r.condition == condition)
            .cloned()
            .collect())
    }

    fn open_records(&self) -> Result<Vec<ClassificationStateRecord>, StorageError> {
        let inner = self.inner.read().map_err(|_| lock_err("state.open_records"))?;
        Ok(inner.records.iter().filter(|r| r.is_open()).cloned().collect())
    }

    fn records_for_imei(
        &self,
        imei_norm: &str,
        condition: Option<&ConditionName>,
        at_run_id: Option<RunId>,
    ) -> Result<Vec<ClassificationStateRecord>, StorageError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| lock_err("state.records_for_imei"))?;
        Ok(inner
            .records
            .iter()
            .filter(|r| r.imei_norm == imei_norm)
            .filter(|r| condition.map_or(true, |c| &r.condition == c))
            .filter(|r| at_run_id.map_or(true, |run| r.run_id <= run))
            .cloned()
            .collect())
    }

    fn apply_run(
        &self,
        run_id: RunId,
        transitions: &[StateTransition],
    ) -> Result<AppliedStateChanges, ComplyError> {
        let mut inner = self.inner.write().map_err(|_| lock_err("state.apply_run"))?;

        // Validate the entire batch first; nothing below may fail, so a
        // rejected batch leaves the store exactly as it was.
        Self::validate_batch(&inner, transitions)?;

        let mut changes = AppliedStateChanges::default();
        for transition in transitions {
            match transition {
                StateTransition::Open {
                    imei_norm,
                    condition,
                    start_date,
                    block_date,
                    amnesty_granted,
                } => {
                    let record = ClassificationStateRecord {
                        row_id: RecordId::new(),
                        run_id,
                        imei_norm: imei_norm.clone(),
                        condition: condition.clone(),
                        start_date: *start_date,
                        end_date: None,
                        block_date: *block_date,
                        amnesty_granted: *amnesty_granted,
                    };
                    let idx = inner.records.len();
                    inner
                        .open_idx
                        .insert((imei_norm.clone(), condition.clone()), idx);
                    inner.records.push(record);
                    changes.opened += 1;
                }
                StateTransition::Close {
                    imei_norm,
                    condition,
                    end_date,
                } => {
                    let idx = inner
                        .open_idx
                        .remove(&(imei_norm.clone(), condition.clone()))
                        .ok_or_else(|| lock_err("state.apply_run: open index out of sync"))?;
                    inner.records[idx].end_date = Some(*end_date);
                    changes.closed += 1;
                }
                StateTransition::Refresh {
                    imei_norm,
                    condition,
                    block_date,
                    amnesty_granted,
                } => {
                    let idx = *inner
                        .open_idx
                        .get(&(imei_norm.clone(), condition.clone()))
                        .ok_or_else(|| lock_err("state.apply_run: open index out of sync"))?;
                    let record = &mut inner.records[idx];
                    record.block_date = *block_date;
                    record.amnesty_granted = *amnesty_granted;
                    changes.refreshed += 1;
                }
            }
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure the trait is object-safe
    fn _assert_state_store_object_safe(_: &dyn ClassificationStateStore) {}

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn cond(name: &str) -> ConditionName {
        ConditionName::new(name).unwrap()
    }

    fn open(imei: &str, condition: &str, start: NaiveDate) -> StateTransition {
        StateTransition::Open {
            imei_norm: imei.to_string(),
            condition: cond(condition),
            start_date: start,
            block_date: Some(date(2024, 4, 30)),
            amnesty_granted: false,
        }
    }

    #[test]
    fn test_open_then_close_interval() {
        let store = InMemoryStateStore::new();
        store
            .apply_run(
                RunId::new(1),
                &[open("35847904123456", "local_stolen", date(2024, 3, 1))],
            )
            .unwrap();

        let record = store
            .open_record("35847904123456", &cond("local_stolen"))
            .unwrap()
            .unwrap();
        assert!(record.is_open());
        assert_eq!(record.run_id, RunId::new(1));

        store
            .apply_run(
                RunId::new(2),
                &[StateTransition::Close {
                    imei_norm: "35847904123456".to_string(),
                    condition: cond("local_stolen"),
                    end_date: date(2024, 4, 1),
                }],
            )
            .unwrap();

        assert!(store
            .open_record("35847904123456", &cond("local_stolen"))
            .unwrap()
            .is_none());
        let history = store
            .records_for_imei("35847904123456", None, None)
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].end_date, Some(date(2024, 4, 1)));
    }

    #[test]
    fn test_duplicate_open_is_fatal_and_atomic() {
        let store = InMemoryStateStore::new();
        store
            .apply_run(
                RunId::new(1),
                &[open("35847904123456", "local_stolen", date(2024, 3, 1))],
            )
            .unwrap();

        // A batch with a valid open for another device plus a duplicate open
        // must be rejected wholesale.
        let err = store
            .apply_run(
                RunId::new(2),
                &[
                    open("49015420323751", "local_stolen", date(2024, 4, 1)),
                    open("35847904123456", "local_stolen", date(2024, 4, 1)),
                ],
            )
            .unwrap_err();
        assert!(err.is_fatal());

        // Nothing from the rejected batch applied.
        assert!(store
            .open_record("49015420323751", &cond("local_stolen"))
            .unwrap()
            .is_none());
        assert_eq!(store.open_records().unwrap().len(), 1);
    }

    #[test]
    fn test_close_without_open_is_fatal() {
        let store = InMemoryStateStore::new();
        let err = store
            .apply_run(
                RunId::new(1),
                &[StateTransition::Close {
                    imei_norm: "35847904123456".to_string(),
                    condition: cond("local_stolen"),
                    end_date: date(2024, 4, 1),
                }],
            )
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_refresh_updates_open_row_in_place() {
        let store = InMemoryStateStore::new();
        store
            .apply_run(
                RunId::new(1),
                &[open("35847904123456", "local_stolen", date(2024, 3, 1))],
            )
            .unwrap();

        store
            .apply_run(
                RunId::new(2),
                &[StateTransition::Refresh {
                    imei_norm: "35847904123456".to_string(),
                    condition: cond("local_stolen"),
                    block_date: Some(date(2024, 5, 15)),
                    amnesty_granted: false,
                }],
            )
            .unwrap();

        let record = store
            .open_record("35847904123456", &cond("local_stolen"))
            .unwrap()
            .unwrap();
        // The row keeps its identity and opening run id.
        assert_eq!(record.run_id, RunId::new(1));
        assert_eq!(record.block_date, Some(date(2024, 5, 15)));
        assert_eq!(
            store
                .records_for_imei("35847904123456", None, None)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_block_date_regression_rejected() {
        let store = InMemoryStateStore::new();
        store
            .apply_run(
                RunId::new(1),
                &[open("35847904123456", "local_stolen", date(2024, 3, 1))],
            )
            .unwrap();

        let err = store
            .apply_run(
                RunId::new(2),
                &[StateTransition::Refresh {
                    imei_norm: "35847904123456".to_string(),
                    condition: cond("local_stolen"),
                    block_date: Some(date(2024, 3, 15)),
                    amnesty_granted: false,
                }],
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ComplyError::Invariant(InvariantViolation::BlockDateRegression { .. })
        ));
    }

    #[test]
    fn test_records_for_imei_at_run_id() {
        let store = InMemoryStateStore::new();
        store
            .apply_run(
                RunId::new(1),
                &[open("35847904123456", "local_stolen", date(2024, 3, 1))],
            )
            .unwrap();
        store
            .apply_run(
                RunId::new(3),
                &[open("35847904123456", "gsma_not_found", date(2024, 5, 1))],
            )
            .unwrap();

        let at_two = store
            .records_for_imei("35847904123456", None, Some(RunId::new(2)))
            .unwrap();
        assert_eq!(at_two.len(), 1);
        assert_eq!(at_two[0].condition, cond("local_stolen"));

        let narrowed = store
            .records_for_imei("35847904123456", Some(&cond("gsma_not_found")), None)
            .unwrap();
        assert_eq!(narrowed.len(), 1);
    }
}
