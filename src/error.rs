//! Error types for complycore.
//!
//! Errors are partitioned along the taxonomy the engine is built around:
//! caller misuse (`ValidationError`) is surfaced before any work begins and is
//! never retried; a broken internal invariant (`InvariantViolation`) aborts the
//! current run's batch wholesale and signals an upstream defect; storage
//! backend failures are `StorageError`. Data-integrity failures on individual
//! observations are *not* errors; they are staged and counted (see
//! `triplet::IngestSummary`).

use chrono::NaiveDate;
use thiserror::Error;

use crate::run::RunId;

/// Caller-misuse errors, detected before any aggregation work.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("base run id {base_run_id} is greater than run id {run_id}")]
    BaseRunAfterTarget { base_run_id: RunId, run_id: RunId },

    #[error("unknown list kind: {kind}")]
    UnknownListKind { kind: String },

    #[error("list kind {kind} is not partitioned per operator")]
    OperatorFilterNotApplicable { kind: String },

    #[error("analysis window start ({start}) must be before end ({end})")]
    InvalidAnalysisWindow { start: NaiveDate, end: NaiveDate },

    #[error("day of month {day} is out of range [1, 31]")]
    DayOutOfRange { day: u32 },

    #[error("condition name cannot be empty")]
    EmptyConditionName,

    #[error("operator id cannot be empty")]
    EmptyOperatorId,

    #[error("reason {reason:?} appears in more than one reason class")]
    OverlappingReasonClasses { reason: String },

    #[error("canonical change reason {reason:?} is not in the change reason set")]
    CanonicalChangeNotInChangeSet { reason: String },

    #[error("run id {run_id} is not greater than the latest applied run id {latest}")]
    NonMonotonicRunId { run_id: RunId, latest: RunId },
}

/// Fatal internal-consistency defects.
///
/// These indicate corrupted upstream event generation, never user error. The
/// run's whole batch is rolled back and the error propagates; it must not be
/// swallowed or auto-corrected.
#[derive(Debug, Error)]
pub enum InvariantViolation {
    #[error("duplicate open classification state for imei {imei_norm} and condition {condition}")]
    DuplicateOpenState { imei_norm: String, condition: String },

    #[error("close requested for imei {imei_norm} and condition {condition} with no open record")]
    CloseWithoutOpenState { imei_norm: String, condition: String },

    #[error("refresh requested for imei {imei_norm} and condition {condition} with no open record")]
    RefreshWithoutOpenState { imei_norm: String, condition: String },

    #[error(
        "block date for imei {imei_norm} and condition {condition} would move earlier \
         ({from} -> {to}) without an amnesty transition"
    )]
    BlockDateRegression {
        imei_norm: String,
        condition: String,
        from: NaiveDate,
        to: NaiveDate,
    },

    #[error("multiple add reasons in a row (net adds {net_adds})")]
    MultipleAddReasons { net_adds: i64 },

    #[error("multiple remove reasons in a row (net adds {net_adds})")]
    MultipleRemoveReasons { net_adds: i64 },

    #[error("non-zero net adds {net_adds} with no add or remove reason seen")]
    NetAddsWithoutReason { net_adds: i64 },

    #[error("unknown delta reason {reason:?}: not an add, remove or change reason")]
    UnknownDeltaReason { reason: String },

    #[error("duplicate open {kind} list entry for key {key}")]
    DuplicateOpenEntry { kind: String, key: String },
}

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend failure (poisoned lock, connection loss, ...).
    #[error("storage backend error: {0}")]
    BackendError(String),
}

/// Top-level error type for complycore operations.
#[derive(Debug, Error)]
pub enum ComplyError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ComplyError {
    /// Returns true if this is a caller-misuse error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this error signals a fatal internal defect.
    ///
    /// A fatal error means the run must be aborted and re-attempted from
    /// scratch with a fresh run id, never resumed mid-way.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Invariant(_))
    }
}

/// Result type alias for complycore operations.
pub type ComplyResult<T> = Result<T, ComplyError>;
