//! List kinds, entity keys and list entries.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::classify::RecordId;
use crate::error::ValidationError;
use crate::run::RunId;
use crate::triplet::OperatorId;

/// The three list kinds the engine materializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListKind {
    /// Devices whose block date has arrived. Region-wide, not per operator.
    Blacklist,
    /// Triplets to warn ahead of blocking. Partitioned per operator.
    Notifications,
    /// Paired triplets exempted from blocking. Partitioned per operator.
    Exceptions,
}

impl ListKind {
    /// The kind's canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Blacklist => "blacklist",
            Self::Notifications => "notifications",
            Self::Exceptions => "exceptions",
        }
    }

    /// Whether this kind's entries are partitioned per operator.
    #[must_use]
    pub const fn is_per_operator(self) -> bool {
        matches!(self, Self::Notifications | Self::Exceptions)
    }

    /// Delta reasons that remove an entry from the kind's *current* view.
    ///
    /// Rows carrying these reasons stay in the log (removed-but-visible
    /// history) but are not part of the current list. `no_longer_seen`
    /// notifications deliberately stay visible: the subscriber should still
    /// be warned even if the triplet dropped off the network.
    #[must_use]
    pub const fn terminal_reasons(self) -> &'static [&'static str] {
        match self {
            Self::Blacklist => &["unblocked"],
            Self::Notifications => &["resolved", "blacklisted"],
            Self::Exceptions => &["removed"],
        }
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ListKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blacklist" => Ok(Self::Blacklist),
            "notifications" => Ok(Self::Notifications),
            "exceptions" => Ok(Self::Exceptions),
            other => Err(ValidationError::UnknownListKind {
                kind: other.to_string(),
            }),
        }
    }
}

/// The identity a list entry is keyed and grouped by.
///
/// Blacklist entries are keyed by device alone; notification and exception
/// entries by the full triplet.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    /// Normalized device id.
    pub imei_norm: String,
    /// Subscriber id, when the kind is triplet-keyed.
    pub imsi: Option<String>,
    /// Line number, when the kind is triplet-keyed.
    pub msisdn: Option<String>,
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.imei_norm)?;
        if let Some(imsi) = &self.imsi {
            write!(f, "/{imsi}")?;
        }
        if let Some(msisdn) = &self.msisdn {
            write!(f, "/{msisdn}")?;
        }
        Ok(())
    }
}

/// One interval row of a materialized list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    /// Stable row identifier.
    pub row_id: RecordId,
    /// Which list the row belongs to.
    pub kind: ListKind,
    /// Owning operator for per-operator kinds, `None` for the blacklist.
    pub operator_id: Option<OperatorId>,
    /// Normalized device id.
    pub imei_norm: String,
    /// Subscriber id for triplet-keyed kinds.
    pub imsi: Option<String>,
    /// Line number for triplet-keyed kinds.
    pub msisdn: Option<String>,
    /// Scheduled block date, where the kind carries one.
    pub block_date: Option<NaiveDate>,
    /// Ordered set of condition reasons behind the entry.
    pub reasons: Vec<String>,
    /// Whether amnesty applies (notifications).
    pub amnesty_granted: bool,
    /// Run that produced the row.
    pub start_run_id: RunId,
    /// Run that superseded the row, `None` while current.
    pub end_run_id: Option<RunId>,
    /// Why the row was produced (add/remove/change vocabulary).
    pub delta_reason: String,
}

impl ListEntry {
    /// The entry's grouping key.
    #[must_use]
    pub fn entity_key(&self) -> EntityKey {
        match self.kind {
            ListKind::Blacklist => EntityKey {
                imei_norm: self.imei_norm.clone(),
                imsi: None,
                msisdn: None,
            },
            ListKind::Notifications | ListKind::Exceptions => EntityKey {
                imei_norm: self.imei_norm.clone(),
                imsi: self.imsi.clone(),
                msisdn: self.msisdn.clone(),
            },
        }
    }

    /// True while no later run has superseded the row.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.end_run_id.is_none()
    }

    /// True if the row is part of the kind's current view at `run_id`.
    #[must_use]
    pub fn visible_at(&self, run_id: RunId) -> bool {
        self.start_run_id <= run_id
            && self.end_run_id.map_or(true, |end| run_id < end)
            && !self
                .kind
                .terminal_reasons()
                .contains(&self.delta_reason.as_str())
    }
}
