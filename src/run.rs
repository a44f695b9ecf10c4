//! Run identity and run context.
//!
//! Every classification or list-generation execution is a *run*, identified by
//! a strictly increasing `RunId`. Run ids are allocated by an external
//! job-metadata collaborator; the engine only consumes them through the
//! `RunIdAllocator` trait so tests can supply deterministic sequences.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::presence::AnalysisWindow;

/// Strictly increasing run identifier. Never reused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct RunId(i64);

impl RunId {
    /// Wraps a raw run id value.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw run id value.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Allocates run ids, monotonically increasing, never reused.
///
/// The production implementation sits on the job-metadata store; the engine
/// never allocates run ids itself.
pub trait RunIdAllocator: Send + Sync {
    /// Returns the next run id.
    fn next_run_id(&self) -> Result<RunId, StorageError>;
}

/// Deterministic in-process allocator for tests and embedded use.
#[derive(Debug)]
pub struct SequenceAllocator {
    next: AtomicI64,
}

impl SequenceAllocator {
    /// Creates an allocator that hands out `first, first + 1, ...`.
    #[must_use]
    pub const fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first),
        }
    }
}

impl Default for SequenceAllocator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl RunIdAllocator for SequenceAllocator {
    fn next_run_id(&self) -> Result<RunId, StorageError> {
        Ok(RunId::new(self.next.fetch_add(1, Ordering::SeqCst)))
    }
}

/// One run's identity plus the dates it analyzes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    /// The run's identifier.
    pub run_id: RunId,
    /// The date the run executes on; block dates are computed from it.
    pub curr_date: NaiveDate,
    /// The calendar window the run analyzes observations over.
    pub analysis_window: AnalysisWindow,
}

impl RunContext {
    /// Creates a run context.
    #[must_use]
    pub const fn new(run_id: RunId, curr_date: NaiveDate, analysis_window: AnalysisWindow) -> Self {
        Self {
            run_id,
            curr_date,
            analysis_window,
        }
    }
}
