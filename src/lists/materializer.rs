//! Point-in-time and between-run list views.
//!
//! The materializer is the engine's external-facing read API. It never
//! writes: `current_list` filters the interval log to what a run id sees, and
//! `delta_list` reduces each entity's event sequence through the delta
//! resolver to one net reason per entity.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::delta::{DeltaResolver, ReasonVocabulary};
use crate::error::{ComplyResult, ValidationError};
use crate::run::RunId;
use crate::triplet::OperatorId;

use super::entry::{EntityKey, ListEntry, ListKind};
use super::store::ListStore;

/// Read-only views over the list store.
pub struct ListMaterializer {
    store: Arc<dyn ListStore>,
    vocabulary: ReasonVocabulary,
}

impl ListMaterializer {
    /// Creates a materializer with the given reason vocabulary.
    #[must_use]
    pub fn new(store: Arc<dyn ListStore>, vocabulary: ReasonVocabulary) -> Self {
        Self { store, vocabulary }
    }

    /// The vocabulary delta reasons resolve under.
    #[must_use]
    pub fn vocabulary(&self) -> &ReasonVocabulary {
        &self.vocabulary
    }

    fn check_operator_filter(
        kind: ListKind,
        operator: Option<&OperatorId>,
    ) -> Result<(), ValidationError> {
        if operator.is_some() && !kind.is_per_operator() {
            return Err(ValidationError::OperatorFilterNotApplicable {
                kind: kind.as_str().to_string(),
            });
        }
        Ok(())
    }

    /// The full list of a kind as of `run_id` (default: latest applied run).
    ///
    /// Entries whose own delta reason is terminal for the kind are excluded;
    /// the result is ordered by entity key.
    ///
    /// # Errors
    ///
    /// `ValidationError::OperatorFilterNotApplicable` for an operator filter
    /// on the blacklist; storage errors from the backing store.
    pub fn current_list(
        &self,
        kind: ListKind,
        operator: Option<&OperatorId>,
        run_id: Option<RunId>,
    ) -> ComplyResult<Vec<ListEntry>> {
        Self::check_operator_filter(kind, operator)?;
        let Some(run_id) = run_id_or_latest(run_id, self.store.as_ref())? else {
            return Ok(Vec::new());
        };
        let mut entries: Vec<ListEntry> = self
            .store
            .entries(kind, operator)?
            .into_iter()
            .filter(|e| e.visible_at(run_id))
            .collect();
        entries.sort_by(|a, b| {
            (a.entity_key(), a.start_run_id).cmp(&(b.entity_key(), b.start_run_id))
        });
        Ok(entries)
    }

    /// Net changes per entity between `base_run_id` (exclusive) and `run_id`
    /// (inclusive, default: latest applied run).
    ///
    /// For each entity key the most recent payload is paired with the reason
    /// the delta resolver reduces its event sequence to; entities whose
    /// sequence resolves to nothing are excluded entirely. Ordered by entity
    /// key.
    ///
    /// # Errors
    ///
    /// Fails fast with `ValidationError::BaseRunAfterTarget` before any
    /// aggregation work if `base_run_id > run_id`; propagates resolver
    /// invariant violations and storage errors.
    pub fn delta_list(
        &self,
        kind: ListKind,
        operator: Option<&OperatorId>,
        base_run_id: RunId,
        run_id: Option<RunId>,
    ) -> ComplyResult<Vec<(ListEntry, String)>> {
        Self::check_operator_filter(kind, operator)?;
        let run_id = run_id_or_latest(run_id, self.store.as_ref())?.unwrap_or(base_run_id);
        if base_run_id > run_id {
            return Err(ValidationError::BaseRunAfterTarget {
                base_run_id,
                run_id,
            }
            .into());
        }

        let mut groups: BTreeMap<EntityKey, Vec<ListEntry>> = BTreeMap::new();
        for entry in self.store.entries(kind, operator)? {
            if entry.start_run_id > base_run_id && entry.start_run_id <= run_id {
                groups.entry(entry.entity_key()).or_default().push(entry);
            }
        }

        let mut resolved = Vec::new();
        for (_, mut entries) in groups {
            // Most recent first, the order the resolver consumes events in.
            entries.sort_by(|a, b| b.start_run_id.cmp(&a.start_run_id));
            let mut resolver = DeltaResolver::new(&self.vocabulary);
            for entry in &entries {
                resolver.step(&entry.delta_reason)?;
            }
            if let Some(reason) = resolver.resolve() {
                let reason = reason.to_string();
                let most_recent = entries.swap_remove(0);
                resolved.push((most_recent, reason));
            }
        }
        Ok(resolved)
    }
}

fn run_id_or_latest(
    run_id: Option<RunId>,
    store: &dyn ListStore,
) -> ComplyResult<Option<RunId>> {
    match run_id {
        Some(run_id) => Ok(Some(run_id)),
        None => Ok(store.latest_run_id()?),
    }
}
