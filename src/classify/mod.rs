//! Per-(device, condition) classification state tracking.
//!
//! Interval-versioned records of whether each device currently satisfies each
//! compliance condition, with append-only open/close discipline and one-run
//! atomic transitions.

mod record;
mod store;
mod tracker;

pub use record::{ClassificationStateRecord, ConditionName, RecordId};
pub use store::{
    AppliedStateChanges, ClassificationStateStore, InMemoryStateStore, StateTransition,
};
pub use tracker::{sticky_block_date, StateTracker};
