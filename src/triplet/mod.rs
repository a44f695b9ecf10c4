//! Network triplets and their identity.
//!
//! A triplet is one observed (device, subscriber, line) association in a given
//! month: IMEI, IMSI and MSISDN plus the operator that reported it and a
//! per-month day-presence bitmask. Triplets are immutable once written;
//! corrections arrive as new rows and observation rows for the same identity
//! and month are merged at read time.

mod validate;
pub(crate) mod store;

use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{ComplyResult, ValidationError};
use crate::presence::DayBitmask;

pub use store::{InMemoryStagingSink, InMemoryTripletStore, StagingSink, TripletStore};
pub use validate::{RawObservation, TripletValidator, ValidatedObservation, ValidationFlags};

/// Identifier of a mobile network operator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OperatorId(String);

impl OperatorId {
    /// Creates an operator id from a non-empty string.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyOperatorId` for an empty or
    /// whitespace-only value.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::EmptyOperatorId);
        }
        Ok(Self(id))
    }

    /// The operator id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OperatorId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<OperatorId> for String {
    fn from(id: OperatorId) -> Self {
        id.0
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content-addressed identity of a (device, subscriber, line) association.
///
/// The key is a blake3 hash over the normalized identifier fields with
/// explicit field separators, so the same association always hashes to the
/// same key regardless of which operator or month reported it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TripletKey([u8; 32]);

impl TripletKey {
    /// Computes the key for the given normalized identifier fields.
    ///
    /// Absent fields hash differently from empty strings.
    #[must_use]
    pub fn compute(imei_norm: Option<&str>, imsi: Option<&str>, msisdn: Option<&str>) -> Self {
        let mut hasher = blake3::Hasher::new();
        for field in [imei_norm, imsi, msisdn] {
            match field {
                Some(value) => {
                    hasher.update(&[1]);
                    hasher.update(&(value.len() as u64).to_le_bytes());
                    hasher.update(value.as_bytes());
                }
                None => {
                    hasher.update(&[0]);
                }
            }
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// The key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for TripletKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// One month of observations for a (device, subscriber, line) association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triplet {
    /// Normalized device id.
    pub imei_norm: String,
    /// Subscriber id as reported.
    pub imsi: Option<String>,
    /// Line number as reported.
    pub msisdn: Option<String>,
    /// Operator that reported the observation.
    pub operator_id: OperatorId,
    /// Calendar year of the encoded month.
    pub year: i32,
    /// Calendar month (1-12) of the encoded month.
    pub month: u32,
    /// First date actually observed in the month.
    pub first_seen: NaiveDate,
    /// Last date actually observed in the month.
    pub last_seen: NaiveDate,
    /// Which days of the month the triplet was seen on.
    pub day_bitmask: DayBitmask,
}

impl Triplet {
    /// The triplet's content-hash identity key.
    #[must_use]
    pub fn key(&self) -> TripletKey {
        TripletKey::compute(
            Some(&self.imei_norm),
            self.imsi.as_deref(),
            self.msisdn.as_deref(),
        )
    }
}

/// Counters produced by one `ingest` call.
///
/// Flag counters are per failure mode so callers can report on each mode
/// separately; a single observation may increment several of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    /// Observations received.
    pub received: usize,
    /// Observations stored in the authoritative triplet store.
    pub stored: usize,
    /// Observations routed to the staging sink (any null flag).
    pub staged: usize,
    /// Observations with a null device id.
    pub null_imei: usize,
    /// Observations whose device id did not normalize cleanly.
    pub unclean_imei: usize,
    /// Observations with a null subscriber id.
    pub null_imsi: usize,
    /// Observations whose subscriber id length is out of range.
    pub unclean_imsi: usize,
    /// Observations with a null line number.
    pub null_msisdn: usize,
    /// Observations whose subscriber or line prefix is out of region.
    pub out_of_region: usize,
}

/// Validates raw observations and routes them to the authoritative store or
/// the staging sink.
///
/// Observations carrying any null flag are excluded from authoritative
/// storage and staged for auditing; everything else is stored, unclean or
/// not. The run continues regardless of how many records fail; integrity
/// failures are counted, not fatal.
///
/// # Errors
///
/// Returns a storage error if the triplet store or staging sink fails.
pub fn ingest<I>(
    validator: &TripletValidator,
    store: &dyn TripletStore,
    staging: &dyn StagingSink,
    observations: I,
) -> ComplyResult<IngestSummary>
where
    I: IntoIterator<Item = RawObservation>,
{
    let mut summary = IngestSummary::default();
    for raw in observations {
        summary.received += 1;
        let validated = validator.validate(&raw);
        let flags = validated.flags;
        summary.null_imei += usize::from(flags.null_imei);
        summary.unclean_imei += usize::from(flags.unclean_imei);
        summary.null_imsi += usize::from(flags.null_imsi);
        summary.unclean_imsi += usize::from(flags.unclean_imsi);
        summary.null_msisdn += usize::from(flags.null_msisdn);
        summary.out_of_region += usize::from(flags.out_of_region());

        if flags.has_null() {
            summary.staged += 1;
            staging.stage(&validated)?;
            continue;
        }

        let date = raw.connection_date;
        let triplet = Triplet {
            imei_norm: validated
                .imei_norm
                .clone()
                .unwrap_or_default(),
            imsi: validated.imsi.clone(),
            msisdn: validated.msisdn.clone(),
            operator_id: raw.operator_id.clone(),
            year: date.year(),
            month: date.month(),
            first_seen: date,
            last_seen: date,
            day_bitmask: DayBitmask::from_days([date.day()])?,
        };
        store.append(triplet)?;
        summary.stored += 1;
    }
    tracing::debug!(
        received = summary.received,
        stored = summary.stored,
        staged = summary.staged,
        "triplet ingest finished"
    );
    Ok(summary)
}
