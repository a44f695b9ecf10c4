//! The delta-reason vocabulary.
//!
//! Reason strings are configuration-versioned data, not a hardcoded enum:
//! the vocabulary has drifted across deployments ("change" vs "changed",
//! REMOVE sets with and without `no_longer_seen`), and stored historical
//! reasons must keep resolving under whichever vocabulary wrote them. The
//! default is the latest vocabulary.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{InvariantViolation, ValidationError};

/// The three disjoint classes a delta reason belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonClass {
    /// The entity appeared on a list.
    Add,
    /// The entity left a list.
    Remove,
    /// The entity's payload changed while staying on a list.
    Change,
}

/// A versioned partition of reason strings into add/remove/change classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawReasonVocabulary", into = "RawReasonVocabulary")]
pub struct ReasonVocabulary {
    add_reasons: BTreeSet<String>,
    remove_reasons: BTreeSet<String>,
    change_reasons: BTreeSet<String>,
    canonical_change: String,
}

/// Serde mirror of `ReasonVocabulary`, validated on deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawReasonVocabulary {
    add_reasons: BTreeSet<String>,
    remove_reasons: BTreeSet<String>,
    change_reasons: BTreeSet<String>,
    canonical_change: String,
}

impl TryFrom<RawReasonVocabulary> for ReasonVocabulary {
    type Error = ValidationError;

    fn try_from(raw: RawReasonVocabulary) -> Result<Self, Self::Error> {
        Self::new(
            raw.add_reasons,
            raw.remove_reasons,
            raw.change_reasons,
            raw.canonical_change,
        )
    }
}

impl From<ReasonVocabulary> for RawReasonVocabulary {
    fn from(vocab: ReasonVocabulary) -> Self {
        Self {
            add_reasons: vocab.add_reasons,
            remove_reasons: vocab.remove_reasons,
            change_reasons: vocab.change_reasons,
            canonical_change: vocab.canonical_change,
        }
    }
}

impl ReasonVocabulary {
    /// Builds a vocabulary, checking the classes are disjoint and the
    /// canonical change reason belongs to the change set.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::OverlappingReasonClasses` or
    /// `ValidationError::CanonicalChangeNotInChangeSet`.
    pub fn new(
        add_reasons: BTreeSet<String>,
        remove_reasons: BTreeSet<String>,
        change_reasons: BTreeSet<String>,
        canonical_change: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        for reason in add_reasons.iter().chain(&remove_reasons) {
            let in_adds = add_reasons.contains(reason);
            let in_removes = remove_reasons.contains(reason);
            let in_changes = change_reasons.contains(reason);
            if usize::from(in_adds) + usize::from(in_removes) + usize::from(in_changes) > 1 {
                return Err(ValidationError::OverlappingReasonClasses {
                    reason: reason.clone(),
                });
            }
        }
        let canonical_change = canonical_change.into();
        if !change_reasons.contains(&canonical_change) {
            return Err(ValidationError::CanonicalChangeNotInChangeSet {
                reason: canonical_change,
            });
        }
        Ok(Self {
            add_reasons,
            remove_reasons,
            change_reasons,
            canonical_change,
        })
    }

    /// The latest vocabulary.
    #[must_use]
    pub fn latest() -> Self {
        let to_set = |reasons: &[&str]| reasons.iter().map(|r| (*r).to_string()).collect();
        Self::new(
            to_set(&["new", "blocked", "added"]),
            to_set(&["resolved", "blacklisted", "removed", "unblocked", "no_longer_seen"]),
            to_set(&["changed"]),
            "changed",
        )
        .expect("static vocabulary is valid")
    }

    /// Classifies a reason string.
    ///
    /// # Errors
    ///
    /// An unknown reason is an `InvariantViolation`: the upstream event
    /// generation wrote a string outside the vocabulary.
    pub fn classify(&self, reason: &str) -> Result<ReasonClass, InvariantViolation> {
        if self.add_reasons.contains(reason) {
            Ok(ReasonClass::Add)
        } else if self.remove_reasons.contains(reason) {
            Ok(ReasonClass::Remove)
        } else if self.change_reasons.contains(reason) {
            Ok(ReasonClass::Change)
        } else {
            Err(InvariantViolation::UnknownDeltaReason {
                reason: reason.to_string(),
            })
        }
    }

    /// The canonical change reason string ("changed" in the latest
    /// vocabulary).
    #[must_use]
    pub fn canonical_change(&self) -> &str {
        &self.canonical_change
    }
}

impl Default for ReasonVocabulary {
    fn default() -> Self {
        Self::latest()
    }
}
