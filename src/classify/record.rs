//! Classification state records.
//!
//! Each record is one interval of a (device, condition) pair meeting a
//! condition. A pair is "meeting" while it has exactly one open record
//! (`end_date = None`); closing an interval never deletes it, so the full
//! classification history stays queryable.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::run::RunId;

/// Globally unique, stable row identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Creates a new random record id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a record id from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a tracked classification condition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConditionName(String);

impl ConditionName {
    /// Creates a condition name from a non-empty string.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyConditionName` for an empty or
    /// whitespace-only value.
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyConditionName);
        }
        Ok(Self(name))
    }

    /// The condition name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ConditionName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ConditionName> for String {
    fn from(name: ConditionName) -> Self {
        name.0
    }
}

impl fmt::Display for ConditionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One interval of a (device, condition) pair meeting a condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationStateRecord {
    /// Stable row identifier.
    pub row_id: RecordId,
    /// Run that opened the interval. A refresh keeps the opening run id.
    pub run_id: RunId,
    /// Normalized device id.
    pub imei_norm: String,
    /// Condition the device met.
    pub condition: ConditionName,
    /// First date the pair was classified as meeting (inclusive).
    pub start_date: NaiveDate,
    /// Date the pair stopped meeting, `None` while the interval is open.
    pub end_date: Option<NaiveDate>,
    /// Scheduled block date, `None` while no blocking is scheduled.
    pub block_date: Option<NaiveDate>,
    /// Whether amnesty was granted for this interval.
    pub amnesty_granted: bool,
}

impl ClassificationStateRecord {
    /// True while the interval is open (currently meeting).
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.end_date.is_none()
    }
}
