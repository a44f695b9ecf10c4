//! # complycore - temporal classification and delta-list engine
//!
//! complycore is the reconciliation core of a regulatory device-compliance
//! system for mobile networks. It tracks, run over run, whether each device
//! satisfies each compliance condition, reconciles device presence within
//! arbitrary calendar windows from compact per-month bitmasks, and resolves a
//! noisy sequence of per-run add/remove/change events into one authoritative
//! "what changed" answer for any two points in time.
//!
//! ## Core Concepts
//!
//! - **Triplet**: one observed (device, subscriber, line) association in a
//!   month, with a day-presence bitmask
//! - **ClassificationStateRecord**: an interval during which a device met a
//!   condition; append-only, at most one open interval per pair
//! - **Run**: one classification or list-generation execution under a
//!   strictly increasing run id
//! - **Delta reason**: the resolved explanation (added/removed/changed/none)
//!   for an entity's net status change between two runs
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use complycore::{
//!     ComplianceEngine, EngineConfig, InMemoryListStore, InMemoryStateStore,
//!     InMemoryTripletStore, ListKind, SequenceAllocator,
//! };
//!
//! let engine = ComplianceEngine::new(
//!     EngineConfig::default(),
//!     Arc::new(SequenceAllocator::default()),
//!     Arc::new(InMemoryTripletStore::new()),
//!     Arc::new(InMemoryStateStore::new()),
//!     Arc::new(InMemoryListStore::new()),
//! );
//!
//! let (run_id, changes) = engine.classify_run(curr_date, &outcomes)?;
//! let blacklist = engine.current_list(ListKind::Blacklist, None, None)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod classify;
pub mod config;
pub mod delta;
pub mod error;
pub mod presence;
pub mod run;
pub mod triplet;

// Lists and the assembled engine
pub mod engine;
pub mod lists;

// Re-export primary types at crate root for convenience
pub use classify::{
    AppliedStateChanges, ClassificationStateRecord, ClassificationStateStore, ConditionName,
    InMemoryStateStore, RecordId, StateTracker, StateTransition,
};
pub use config::{
    AmnestyConfig, AmnestyFlags, ConditionConfig, EngineConfig, ListGenConfig, OperatorConfig,
    RegionConfig,
};
pub use delta::{resolve_sequence, DeltaResolver, ReasonClass, ReasonVocabulary};
pub use engine::{ComplianceEngine, ConditionOutcomes};
pub use error::{ComplyError, ComplyResult, InvariantViolation, StorageError, ValidationError};
pub use lists::{
    EntityKey, InMemoryListStore, ListEntry, ListGenSummary, ListGenerator, ListKind,
    ListMaterializer, ListStore, Pairing,
};
pub use presence::{AnalysisWindow, DayBitmask};
pub use run::{RunContext, RunId, RunIdAllocator, SequenceAllocator};
pub use triplet::{
    ingest, InMemoryStagingSink, InMemoryTripletStore, IngestSummary, OperatorId, RawObservation,
    StagingSink, Triplet, TripletKey, TripletStore, TripletValidator, ValidatedObservation,
    ValidationFlags,
};
