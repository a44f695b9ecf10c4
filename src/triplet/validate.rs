//! Normalization and flagging of raw observations.
//!
//! Every flag is computed independently, with no short-circuiting, so callers
//! can report on each failure mode separately. Only null flags exclude a
//! record from authoritative storage; unclean and out-of-region records are
//! stored and merely counted.

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::RegionConfig;

use super::OperatorId;

/// One raw observation as reported by an operator, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawObservation {
    /// Device id as reported (IMEI).
    pub imei: Option<String>,
    /// Subscriber id as reported (IMSI).
    pub imsi: Option<String>,
    /// Line number as reported (MSISDN).
    pub msisdn: Option<String>,
    /// Operator that reported the observation.
    pub operator_id: OperatorId,
    /// The date the association was observed on.
    pub connection_date: NaiveDate,
}

/// Independent quality flags for one observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFlags {
    /// Device id absent or blank.
    pub null_imei: bool,
    /// Device id did not normalize to a 14-digit numeric prefix.
    pub unclean_imei: bool,
    /// Subscriber id absent or blank.
    pub null_imsi: bool,
    /// Subscriber id length outside `[14, 15]`.
    pub unclean_imsi: bool,
    /// Line number absent or blank.
    pub null_msisdn: bool,
    /// Subscriber id prefix matches none of the configured region prefixes.
    pub out_of_region_imsi: bool,
    /// Line number prefix matches none of the configured country codes.
    pub out_of_region_msisdn: bool,
}

impl ValidationFlags {
    /// True if any identifier field is null.
    ///
    /// Null records are excluded from authoritative triplet storage and
    /// retained in a staging area for auditing.
    #[must_use]
    pub const fn has_null(&self) -> bool {
        self.null_imei || self.null_imsi || self.null_msisdn
    }

    /// True if the subscriber or line prefix is out of region.
    #[must_use]
    pub const fn out_of_region(&self) -> bool {
        self.out_of_region_imsi || self.out_of_region_msisdn
    }

    /// True if no flag is raised at all.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        !self.has_null()
            && !self.unclean_imei
            && !self.unclean_imsi
            && !self.out_of_region()
    }
}

/// A raw observation after normalization and flagging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedObservation {
    /// Normalized device id, if one was reported.
    pub imei_norm: Option<String>,
    /// Trimmed subscriber id, if one was reported.
    pub imsi: Option<String>,
    /// Trimmed line number, if one was reported.
    pub msisdn: Option<String>,
    /// The computed quality flags.
    pub flags: ValidationFlags,
    /// The observation as originally reported.
    pub original: RawObservation,
}

/// Normalizes and flags raw observations against the configured region.
#[derive(Debug)]
pub struct TripletValidator {
    region: RegionConfig,
    clean_imei: Regex,
}

impl TripletValidator {
    /// Creates a validator for the given region configuration.
    #[must_use]
    pub fn new(region: RegionConfig) -> Self {
        // A clean device id starts with at least 14 digits.
        let clean_imei = Regex::new(r"^\d{14}").expect("static regex");
        Self { region, clean_imei }
    }

    /// Normalizes a device id.
    ///
    /// A value matching a 14+-digit numeric prefix is truncated to the
    /// 14-digit prefix (clean); anything else is uppercased as-is (unclean).
    /// Returns the normalized form and whether it was clean.
    #[must_use]
    pub fn normalize_imei(&self, raw: &str) -> (String, bool) {
        if self.clean_imei.is_match(raw) {
            (raw[..14].to_string(), true)
        } else {
            (raw.to_ascii_uppercase(), false)
        }
    }

    /// Normalizes the observation and computes all flags.
    ///
    /// Flags are independent: a record with a null subscriber id still gets
    /// its device id normalized and its line prefix checked.
    #[must_use]
    pub fn validate(&self, raw: &RawObservation) -> ValidatedObservation {
        let mut flags = ValidationFlags::default();

        let imei = non_blank(raw.imei.as_deref());
        let imsi = non_blank(raw.imsi.as_deref());
        let msisdn = non_blank(raw.msisdn.as_deref());

        flags.null_imei = imei.is_none();
        flags.null_imsi = imsi.is_none();
        flags.null_msisdn = msisdn.is_none();

        let imei_norm = imei.map(|value| {
            let (norm, clean) = self.normalize_imei(value);
            flags.unclean_imei = !clean;
            norm
        });

        if let Some(imsi) = imsi {
            flags.unclean_imsi = !(14..=15).contains(&imsi.chars().count());
            flags.out_of_region_imsi = !self.region.imsi_in_region(imsi);
        }
        if let Some(msisdn) = msisdn {
            flags.out_of_region_msisdn = !self.region.msisdn_in_region(msisdn);
        }

        ValidatedObservation {
            imei_norm,
            imsi: imsi.map(str::to_string),
            msisdn: msisdn.map(str::to_string),
            flags,
            original: raw.clone(),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
