//! Engine configuration.
//!
//! Mirrors the shape an operator deployment supplies: the home region's
//! number prefixes, the operators whose lists are partitioned, the
//! classification conditions with their blocking policy, the amnesty window,
//! and list-generation settings. Everything derives serde so the surrounding
//! system can load it from whatever format its config layer uses.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::classify::ConditionName;
use crate::triplet::OperatorId;

/// Valid number prefixes for the home region.
///
/// An empty prefix list disables the corresponding check: everything counts
/// as in-region.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Valid MCC-MNC prefixes for subscriber ids.
    #[serde(default)]
    pub mcc_mnc_prefixes: Vec<String>,
    /// Valid country-code prefixes for line numbers.
    #[serde(default)]
    pub country_codes: Vec<String>,
}

impl RegionConfig {
    /// True if the subscriber id starts with a configured MCC-MNC prefix.
    #[must_use]
    pub fn imsi_in_region(&self, imsi: &str) -> bool {
        self.mcc_mnc_prefixes.is_empty()
            || self.mcc_mnc_prefixes.iter().any(|p| imsi.starts_with(p))
    }

    /// True if the line number starts with a configured country code.
    #[must_use]
    pub fn msisdn_in_region(&self, msisdn: &str) -> bool {
        self.country_codes.is_empty() || self.country_codes.iter().any(|p| msisdn.starts_with(p))
    }
}

/// One operator whose notification/exception lists are generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Operator identifier used to partition per-operator lists.
    pub id: OperatorId,
    /// Human-readable operator name.
    #[serde(default)]
    pub name: String,
    /// MCC-MNC prefixes identifying subscribers homed on this operator.
    #[serde(default)]
    pub mcc_mnc_prefixes: Vec<String>,
}

impl OperatorConfig {
    /// True if the subscriber id is homed on this operator.
    #[must_use]
    pub fn is_home_imsi(&self, imsi: &str) -> bool {
        self.mcc_mnc_prefixes.iter().any(|p| imsi.starts_with(p))
    }
}

/// One classification condition's tracking policy.
///
/// The condition rule language itself lives in the evaluator collaborator;
/// this only carries what the state tracker needs to record an outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionConfig {
    /// The condition's name, used as the state-record key.
    pub name: ConditionName,
    /// Reason string emitted on lists for devices meeting this condition.
    pub reason: String,
    /// Whether meeting this condition schedules blocking.
    #[serde(default)]
    pub blocking: bool,
    /// Days of grace between classification and the block date.
    #[serde(default = "default_grace_period_days")]
    pub grace_period_days: u32,
    /// Whether devices meeting this condition may be granted amnesty.
    #[serde(default)]
    pub amnesty_eligible: bool,
}

fn default_grace_period_days() -> u32 {
    30
}

/// Flags describing where a date falls relative to the amnesty windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AmnestyFlags {
    /// The date is inside the amnesty evaluation period.
    pub in_evaluation_period: bool,
    /// The date is past evaluation but inside the amnesty period itself.
    pub in_amnesty_period: bool,
}

/// Amnesty programme configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmnestyConfig {
    /// Whether an amnesty programme is active at all.
    #[serde(default)]
    pub enabled: bool,
    /// Last date of the evaluation period (inclusive).
    pub evaluation_period_end_date: NaiveDate,
    /// Last date of the amnesty period (inclusive); becomes the block date
    /// for amnesty-granted devices once evaluation ends.
    pub amnesty_period_end_date: NaiveDate,
}

impl AmnestyConfig {
    /// A disabled amnesty programme.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            evaluation_period_end_date: NaiveDate::MIN,
            amnesty_period_end_date: NaiveDate::MIN,
        }
    }

    /// Where `curr_date` falls relative to the amnesty windows.
    #[must_use]
    pub fn flags(&self, curr_date: NaiveDate) -> AmnestyFlags {
        if !self.enabled {
            return AmnestyFlags::default();
        }
        AmnestyFlags {
            in_evaluation_period: curr_date <= self.evaluation_period_end_date,
            in_amnesty_period: curr_date > self.evaluation_period_end_date
                && curr_date <= self.amnesty_period_end_date,
        }
    }
}

impl Default for AmnestyConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

/// List-generation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListGenConfig {
    /// Days of observations a list-generation run looks back over.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    /// If true, a pairing exempts a triplet only when the IMSI matches; if
    /// false, a matching MSISDN exempts it as well.
    #[serde(default)]
    pub notify_imsi_change: bool,
    /// If true, only pairings whose device is on the new blacklist appear on
    /// exception lists; if false, every pairing does.
    #[serde(default)]
    pub restrict_exceptions_to_blacklist: bool,
    /// Worker threads for per-operator list partitions.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_lookback_days() -> u32 {
    30
}

fn default_workers() -> usize {
    4
}

impl Default for ListGenConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            notify_imsi_change: false,
            restrict_exceptions_to_blacklist: false,
            workers: default_workers(),
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Home-region prefixes for validation.
    #[serde(default)]
    pub region: RegionConfig,
    /// Operators whose per-operator lists are generated.
    #[serde(default)]
    pub operators: Vec<OperatorConfig>,
    /// Tracked classification conditions.
    #[serde(default)]
    pub conditions: Vec<ConditionConfig>,
    /// Amnesty programme.
    #[serde(default)]
    pub amnesty: AmnestyConfig,
    /// List-generation settings.
    #[serde(default)]
    pub listgen: ListGenConfig,
}

impl EngineConfig {
    /// Looks up a condition by name.
    #[must_use]
    pub fn condition(&self, name: &ConditionName) -> Option<&ConditionConfig> {
        self.conditions.iter().find(|c| &c.name == name)
    }
}
