//! The delta reason resolver.
//!
//! Reduces one entity's sequence of per-run change events, consumed in
//! descending run-id order (most recent first), into the single net delta
//! reason describing what happened between two runs. Re-expressed from the
//! original fold-then-finalize aggregate as a plain reducer with `step` and
//! `resolve`, so it unit-tests without any store behind it.

use crate::error::InvariantViolation;

use super::vocabulary::{ReasonClass, ReasonVocabulary};

/// Reducer over one entity's delta-reason events.
///
/// Feed events newest-first with [`step`](Self::step), then call
/// [`resolve`](Self::resolve):
///
/// - a non-zero net add/remove count wins and reports the most recent
///   add/remove reason;
/// - otherwise, interleaved changes surface as the canonical change reason if
///   the entity is still present (most recent relevant event was an add, or
///   there was none);
/// - otherwise there is nothing to report.
#[derive(Debug)]
pub struct DeltaResolver<'a> {
    vocabulary: &'a ReasonVocabulary,
    net_adds: i64,
    has_change_reason: bool,
    most_recent_add_remove: Option<(String, ReasonClass)>,
}

impl<'a> DeltaResolver<'a> {
    /// Creates a resolver in its initial state.
    #[must_use]
    pub fn new(vocabulary: &'a ReasonVocabulary) -> Self {
        Self {
            vocabulary,
            net_adds: 0,
            has_change_reason: false,
            most_recent_add_remove: None,
        }
    }

    /// Consumes one event. Events must arrive in descending run-id order.
    ///
    /// # Errors
    ///
    /// Returns an `InvariantViolation` on an unknown reason, or when the
    /// running net-adds count leaves the bounds its reason class permits;
    /// both signal corrupted upstream event generation and must abort the
    /// run, never be clamped.
    pub fn step(&mut self, reason: &str) -> Result<(), InvariantViolation> {
        let class = self.vocabulary.classify(reason)?;
        match class {
            ReasonClass::Change => self.has_change_reason = true,
            ReasonClass::Add | ReasonClass::Remove => {
                if self.most_recent_add_remove.is_none() {
                    self.most_recent_add_remove = Some((reason.to_string(), class));
                }
                self.net_adds += match class {
                    ReasonClass::Add => 1,
                    ReasonClass::Remove => -1,
                    ReasonClass::Change => 0,
                };
            }
        }
        self.check_bounds()
    }

    fn check_bounds(&self) -> Result<(), InvariantViolation> {
        let (lower, upper) = match self.most_recent_add_remove {
            Some((_, ReasonClass::Add)) => (0, 1),
            Some((_, ReasonClass::Remove)) => (-1, 0),
            Some((_, ReasonClass::Change)) | None => (0, 0),
        };
        if self.net_adds > upper {
            return Err(InvariantViolation::MultipleAddReasons {
                net_adds: self.net_adds,
            });
        }
        if self.net_adds < lower {
            return Err(InvariantViolation::MultipleRemoveReasons {
                net_adds: self.net_adds,
            });
        }
        if self.most_recent_add_remove.is_none() && self.net_adds != 0 {
            return Err(InvariantViolation::NetAddsWithoutReason {
                net_adds: self.net_adds,
            });
        }
        Ok(())
    }

    /// The running net add count: count(ADD) − count(REMOVE) so far.
    #[must_use]
    pub const fn net_adds(&self) -> i64 {
        self.net_adds
    }

    /// Finalizes the reduction.
    ///
    /// `None` means the entity had no visible net effect and is excluded
    /// from delta output entirely.
    #[must_use]
    pub fn resolve(&self) -> Option<&str> {
        if self.net_adds != 0 {
            // An unresolved net add/remove dominates any interleaved changes.
            return self
                .most_recent_add_remove
                .as_ref()
                .map(|(reason, _)| reason.as_str());
        }
        if !self.has_change_reason {
            return None;
        }
        match self.most_recent_add_remove {
            None | Some((_, ReasonClass::Add)) => Some(self.vocabulary.canonical_change()),
            Some(_) => None,
        }
    }
}

/// Reduces a complete newest-first reason sequence in one call.
///
/// # Errors
///
/// Propagates `step`'s invariant violations.
pub fn resolve_sequence<'r, I>(
    vocabulary: &ReasonVocabulary,
    reasons: I,
) -> Result<Option<String>, InvariantViolation>
where
    I: IntoIterator<Item = &'r str>,
{
    let mut resolver = DeltaResolver::new(vocabulary);
    for reason in reasons {
        resolver.step(reason)?;
    }
    Ok(resolver.resolve().map(str::to_string))
}
