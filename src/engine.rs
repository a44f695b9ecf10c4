//! The compliance engine facade.
//!
//! Wires the components together behind the library-level contract the
//! surrounding system (API server, CLI, reporting) consumes: triplet ingest,
//! classification runs, list-generation runs, and the read API over state and
//! lists. Run ids come from the injected allocator; each run's writes commit
//! as one atomic batch against its store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::NaiveDate;

use crate::classify::{
    AppliedStateChanges, ClassificationStateRecord, ClassificationStateStore, ConditionName,
    StateTracker, StateTransition,
};
use crate::config::EngineConfig;
use crate::delta::ReasonVocabulary;
use crate::error::ComplyResult;
use crate::lists::{
    ListEntry, ListGenSummary, ListGenerator, ListKind, ListMaterializer, ListStore, Pairing,
};
use crate::presence::AnalysisWindow;
use crate::run::{RunContext, RunId, RunIdAllocator};
use crate::triplet::{
    ingest, IngestSummary, OperatorId, RawObservation, StagingSink, TripletStore, TripletValidator,
};

/// The set of devices meeting each condition, as reported by the condition
/// evaluator oracle for one run.
pub type ConditionOutcomes = BTreeMap<ConditionName, BTreeSet<String>>;

/// The assembled temporal classification and delta-list engine.
pub struct ComplianceEngine {
    config: EngineConfig,
    allocator: Arc<dyn RunIdAllocator>,
    triplets: Arc<dyn TripletStore>,
    state: Arc<dyn ClassificationStateStore>,
    lists: Arc<dyn ListStore>,
    validator: TripletValidator,
    tracker: StateTracker,
    materializer: ListMaterializer,
    generator: ListGenerator,
}

impl ComplianceEngine {
    /// Assembles an engine over the given collaborators.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        allocator: Arc<dyn RunIdAllocator>,
        triplets: Arc<dyn TripletStore>,
        state: Arc<dyn ClassificationStateStore>,
        lists: Arc<dyn ListStore>,
    ) -> Self {
        let vocabulary = ReasonVocabulary::latest();
        let validator = TripletValidator::new(config.region.clone());
        let tracker = StateTracker::new(Arc::clone(&state));
        let materializer = ListMaterializer::new(Arc::clone(&lists), vocabulary.clone());
        let generator = ListGenerator::new(
            Arc::clone(&state),
            Arc::clone(&triplets),
            Arc::clone(&lists),
            config.conditions.clone(),
            config.operators.clone(),
            config.listgen.clone(),
            vocabulary,
        );
        Self {
            config,
            allocator,
            triplets,
            state,
            lists,
            validator,
            tracker,
            materializer,
            generator,
        }
    }

    /// The engine's configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validates raw observations and stores the authoritative ones.
    ///
    /// Records failing a null check are staged, counted and skipped; the run
    /// continues.
    ///
    /// # Errors
    ///
    /// Returns storage errors from the triplet store or staging sink.
    pub fn ingest<I>(&self, staging: &dyn StagingSink, observations: I) -> ComplyResult<IngestSummary>
    where
        I: IntoIterator<Item = RawObservation>,
    {
        ingest(&self.validator, self.triplets.as_ref(), staging, observations)
    }

    /// Runs one classification pass over the evaluator's outcomes.
    ///
    /// Every configured condition is processed: a condition absent from
    /// `outcomes` is treated as met by no device, closing its open intervals.
    /// All conditions' transitions commit as one atomic batch under a fresh
    /// run id.
    ///
    /// # Errors
    ///
    /// Propagates invariant violations (the batch then applies nothing) and
    /// storage errors.
    pub fn classify_run(
        &self,
        curr_date: NaiveDate,
        outcomes: &ConditionOutcomes,
    ) -> ComplyResult<(RunId, AppliedStateChanges)> {
        let run = self.run_context(curr_date)?;
        let empty = BTreeSet::new();

        let mut transitions: Vec<StateTransition> = Vec::new();
        for condition in &self.config.conditions {
            let met = outcomes.get(&condition.name).unwrap_or(&empty);
            transitions.extend(self.tracker.plan(&run, condition, &self.config.amnesty, met)?);
        }
        let changes = self.state.apply_run(run.run_id, &transitions)?;
        tracing::info!(
            run_id = run.run_id.value(),
            opened = changes.opened,
            closed = changes.closed,
            refreshed = changes.refreshed,
            "classification run committed"
        );
        Ok((run.run_id, changes))
    }

    /// Runs one list generation against the current classification state.
    ///
    /// # Errors
    ///
    /// Propagates storage errors and batch rejections; a failed run appends
    /// nothing and must be retried with a fresh run id.
    pub fn generate_lists(
        &self,
        curr_date: NaiveDate,
        pairings: &[Pairing],
    ) -> ComplyResult<(RunId, ListGenSummary)> {
        let run = self.run_context(curr_date)?;
        let summary = self.generator.generate(&run, pairings)?;
        Ok((run.run_id, summary))
    }

    /// The full list of a kind as of `run_id` (default: latest).
    ///
    /// # Errors
    ///
    /// See [`ListMaterializer::current_list`].
    pub fn current_list(
        &self,
        kind: ListKind,
        operator_id: Option<&OperatorId>,
        run_id: Option<RunId>,
    ) -> ComplyResult<Vec<ListEntry>> {
        self.materializer.current_list(kind, operator_id, run_id)
    }

    /// Net changes per entity between `base_run_id` (exclusive) and `run_id`
    /// (inclusive, default: latest).
    ///
    /// # Errors
    ///
    /// See [`ListMaterializer::delta_list`].
    pub fn delta_list(
        &self,
        kind: ListKind,
        operator_id: Option<&OperatorId>,
        base_run_id: RunId,
        run_id: Option<RunId>,
    ) -> ComplyResult<Vec<(ListEntry, String)>> {
        self.materializer
            .delta_list(kind, operator_id, base_run_id, run_id)
    }

    /// Open and historical classification state for a device.
    ///
    /// # Errors
    ///
    /// Returns storage errors from the state store.
    pub fn classification_state(
        &self,
        imei_norm: &str,
        condition: Option<&ConditionName>,
        at_run_id: Option<RunId>,
    ) -> ComplyResult<Vec<ClassificationStateRecord>> {
        Ok(self.state.records_for_imei(imei_norm, condition, at_run_id)?)
    }

    /// Full list rebuild: discards every list row and resets run history.
    ///
    /// The only bulk replacement the engine performs; everything else is
    /// append-only.
    ///
    /// # Errors
    ///
    /// Returns storage errors from the list store.
    pub fn reset_lists(&self) -> ComplyResult<()> {
        Ok(self.lists.replace_all(Vec::new())?)
    }

    fn run_context(&self, curr_date: NaiveDate) -> ComplyResult<RunContext> {
        let run_id = self.allocator.next_run_id()?;
        let window = AnalysisWindow::lookback(curr_date, self.config.listgen.lookback_days)?;
        Ok(RunContext::new(run_id, curr_date, window))
    }
}
