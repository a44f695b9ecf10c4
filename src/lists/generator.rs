//! Run-side list generation.
//!
//! Each list-generation run recomputes the full desired membership of every
//! list from classification state, windowed triplets and the pairing
//! reference list, diffs it against the current view, and appends one delta
//! row per changed entity. Appending closes the superseded row; the whole
//! run commits as one atomic batch.
//!
//! The diff baseline excludes rows whose own delta reason is a removal, so
//! an entity that stays absent produces exactly one removal row. Sequences
//! per entity therefore alternate between add and remove, which the delta
//! resolver's bounds invariant depends on.
//!
//! Per-operator notification and exception partitions never share rows, so
//! they are computed in parallel on a small worker fan-out before the single
//! commit.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use chrono::NaiveDate;
use crossbeam_channel::unbounded;
use serde::{Deserialize, Serialize};

use crate::classify::{ClassificationStateStore, RecordId};
use crate::config::{ConditionConfig, ListGenConfig, OperatorConfig};
use crate::delta::{ReasonClass, ReasonVocabulary};
use crate::error::ComplyResult;
use crate::run::RunContext;
use crate::triplet::{OperatorId, Triplet, TripletStore};

use super::entry::{EntityKey, ListEntry, ListKind};
use super::store::ListStore;

/// One entry of the read-only pairing reference list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pairing {
    /// Normalized device id.
    pub imei_norm: String,
    /// Subscriber id the device is paired with.
    pub imsi: String,
    /// Line number, where the pairing records one.
    pub msisdn: Option<String>,
}

/// Row counts one list-generation run appended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListGenSummary {
    /// Blacklist delta rows.
    pub blacklist_rows: usize,
    /// Notification delta rows across operators.
    pub notification_rows: usize,
    /// Exception delta rows across operators.
    pub exception_rows: usize,
}

impl ListGenSummary {
    /// Total delta rows appended.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.blacklist_rows + self.notification_rows + self.exception_rows
    }
}

/// Shared payload fields of a desired list membership.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Payload {
    block_date: Option<NaiveDate>,
    reasons: Vec<String>,
    amnesty_granted: bool,
}

/// Generates list deltas for one run.
pub struct ListGenerator {
    state: Arc<dyn ClassificationStateStore>,
    triplets: Arc<dyn TripletStore>,
    lists: Arc<dyn ListStore>,
    conditions: Vec<ConditionConfig>,
    operators: Vec<OperatorConfig>,
    config: ListGenConfig,
    vocabulary: ReasonVocabulary,
}

impl ListGenerator {
    /// Creates a generator over the given stores and configuration.
    #[must_use]
    pub fn new(
        state: Arc<dyn ClassificationStateStore>,
        triplets: Arc<dyn TripletStore>,
        lists: Arc<dyn ListStore>,
        conditions: Vec<ConditionConfig>,
        operators: Vec<OperatorConfig>,
        config: ListGenConfig,
        vocabulary: ReasonVocabulary,
    ) -> Self {
        Self {
            state,
            triplets,
            lists,
            conditions,
            operators,
            config,
            vocabulary,
        }
    }

    /// Runs one list generation: recompute, diff, append, commit.
    ///
    /// # Errors
    ///
    /// Propagates storage errors and the list store's batch rejections; a
    /// rejected batch appends nothing.
    pub fn generate(&self, run: &RunContext, pairings: &[Pairing]) -> ComplyResult<ListGenSummary> {
        let (blocked, notified) = self.desired_membership(run)?;
        let window_rows = self.triplets.rows_in_window(&run.analysis_window)?;

        let mut appended = self.blacklist_delta(&blocked)?;
        let mut summary = ListGenSummary {
            blacklist_rows: appended.len(),
            ..ListGenSummary::default()
        };

        let per_operator = self.operator_deltas(run, &blocked, &notified, &window_rows, pairings)?;
        for (_, mut rows) in per_operator {
            for row in &rows {
                match row.kind {
                    ListKind::Notifications => summary.notification_rows += 1,
                    ListKind::Exceptions => summary.exception_rows += 1,
                    ListKind::Blacklist => {}
                }
            }
            appended.append(&mut rows);
        }

        self.lists.apply_run(run.run_id, appended)?;
        tracing::info!(
            run_id = run.run_id.value(),
            blacklist = summary.blacklist_rows,
            notifications = summary.notification_rows,
            exceptions = summary.exception_rows,
            "list generation committed"
        );
        Ok(summary)
    }

    /// Desired per-device membership from open classification state:
    /// past-due block dates go on the blacklist, future ones get notified.
    fn desired_membership(
        &self,
        run: &RunContext,
    ) -> ComplyResult<(BTreeMap<String, Payload>, BTreeMap<String, Payload>)> {
        let mut blocked: BTreeMap<String, Payload> = BTreeMap::new();
        let mut notified: BTreeMap<String, Payload> = BTreeMap::new();

        for record in self.state.open_records()? {
            let Some(block_date) = record.block_date else {
                continue;
            };
            let reason = self
                .conditions
                .iter()
                .find(|c| c.name == record.condition)
                .map_or_else(|| record.condition.as_str().to_string(), |c| c.reason.clone());

            let target = if block_date <= run.curr_date {
                &mut blocked
            } else {
                &mut notified
            };
            match target.get_mut(&record.imei_norm) {
                None => {
                    target.insert(
                        record.imei_norm.clone(),
                        Payload {
                            block_date: Some(block_date),
                            reasons: vec![reason],
                            amnesty_granted: record.amnesty_granted,
                        },
                    );
                }
                Some(payload) => {
                    payload.block_date = payload.block_date.min(Some(block_date));
                    if !payload.reasons.contains(&reason) {
                        payload.reasons.push(reason);
                    }
                    payload.amnesty_granted |= record.amnesty_granted;
                }
            }
        }
        // A device due for blocking is past warning.
        for imei_norm in blocked.keys() {
            notified.remove(imei_norm);
        }
        for payload in blocked.values_mut().chain(notified.values_mut()) {
            payload.reasons.sort();
        }
        Ok((blocked, notified))
    }

    /// The diff baseline: open rows whose own delta reason is not a removal.
    ///
    /// Removal rows stay open in the log until superseded, but an entity
    /// already removed must not produce another removal row.
    fn diff_baseline(
        &self,
        kind: ListKind,
        operator: Option<&OperatorId>,
    ) -> ComplyResult<BTreeMap<EntityKey, ListEntry>> {
        let mut baseline = BTreeMap::new();
        for entry in self.lists.entries(kind, operator)? {
            if !entry.is_open() {
                continue;
            }
            if self.vocabulary.classify(&entry.delta_reason)? == ReasonClass::Remove {
                continue;
            }
            baseline.insert(entry.entity_key(), entry);
        }
        Ok(baseline)
    }

    fn blacklist_delta(&self, blocked: &BTreeMap<String, Payload>) -> ComplyResult<Vec<ListEntry>> {
        let old = self.diff_baseline(ListKind::Blacklist, None)?;
        let mut delta = Vec::new();

        for (imei_norm, payload) in blocked {
            let key = EntityKey {
                imei_norm: imei_norm.clone(),
                imsi: None,
                msisdn: None,
            };
            match old.get(&key) {
                None => delta.push(blacklist_entry(imei_norm, payload, "blocked")),
                Some(entry)
                    if entry.block_date != payload.block_date || entry.reasons != payload.reasons =>
                {
                    delta.push(blacklist_entry(imei_norm, payload, "changed"));
                }
                Some(_) => {}
            }
        }
        for (key, entry) in &old {
            if !blocked.contains_key(&key.imei_norm) {
                let payload = Payload {
                    block_date: entry.block_date,
                    reasons: entry.reasons.clone(),
                    amnesty_granted: entry.amnesty_granted,
                };
                delta.push(blacklist_entry(&key.imei_norm, &payload, "unblocked"));
            }
        }
        Ok(delta)
    }

    /// Computes every operator's notification and exception deltas on a
    /// worker fan-out. Results come back keyed by operator so the commit
    /// order stays deterministic.
    fn operator_deltas(
        &self,
        run: &RunContext,
        blocked: &BTreeMap<String, Payload>,
        notified: &BTreeMap<String, Payload>,
        window_rows: &[Triplet],
        pairings: &[Pairing],
    ) -> ComplyResult<BTreeMap<OperatorId, Vec<ListEntry>>> {
        let workers = self.config.workers.max(1).min(self.operators.len().max(1));
        let (job_tx, job_rx) = unbounded::<&OperatorConfig>();
        for operator in &self.operators {
            // Bounded by the operator count, so sending never blocks.
            let _ = job_tx.send(operator);
        }
        drop(job_tx);

        let (result_tx, result_rx) = unbounded::<(OperatorId, ComplyResult<Vec<ListEntry>>)>();

        thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    while let Ok(operator) = job_rx.recv() {
                        let rows = self
                            .notifications_delta(run, operator, blocked, notified, window_rows, pairings)
                            .and_then(|mut rows| {
                                rows.extend(self.exceptions_delta(operator, blocked, pairings)?);
                                Ok(rows)
                            });
                        let _ = result_tx.send((operator.id.clone(), rows));
                    }
                });
            }
            drop(result_tx);
        });

        let mut deltas = BTreeMap::new();
        for (operator_id, rows) in result_rx {
            deltas.insert(operator_id, rows?);
        }
        Ok(deltas)
    }

    /// A triplet is notified on its home operator (by IMSI prefix); with no
    /// home operator it falls back to the operators that observed it.
    fn notified_on_operator(&self, operator: &OperatorConfig, row: &Triplet) -> bool {
        let home = row.imsi.as_deref().and_then(|imsi| {
            self.operators.iter().find(|op| op.is_home_imsi(imsi))
        });
        match home {
            Some(op) => op.id == operator.id,
            None => row.operator_id == operator.id,
        }
    }

    fn notifications_delta(
        &self,
        run: &RunContext,
        operator: &OperatorConfig,
        blocked: &BTreeMap<String, Payload>,
        notified: &BTreeMap<String, Payload>,
        window_rows: &[Triplet],
        pairings: &[Pairing],
    ) -> ComplyResult<Vec<ListEntry>> {
        // Desired membership: triplets seen inside the window whose device
        // awaits a future block date, minus pairings. Triplets without an
        // IMSI or MSISDN are skipped: there is no subscriber to contact.
        let mut new: BTreeMap<EntityKey, (Payload, ListEntry)> = BTreeMap::new();
        for row in window_rows {
            let (Some(_), Some(_)) = (&row.imsi, &row.msisdn) else {
                continue;
            };
            let Some(payload) = notified.get(&row.imei_norm) else {
                continue;
            };
            if !self.notified_on_operator(operator, row) {
                continue;
            }
            if row
                .day_bitmask
                .within_window(row.first_seen, row.last_seen, &run.analysis_window)
                .is_empty()
            {
                continue;
            }
            if self.is_paired(pairings, &row.imei_norm, row.imsi.as_deref(), row.msisdn.as_deref()) {
                continue;
            }
            let entry = notification_entry(&operator.id, row, payload, "new");
            new.entry(entry.entity_key()).or_insert((payload.clone(), entry));
        }

        let old = self.diff_baseline(ListKind::Notifications, Some(&operator.id))?;
        let mut delta = Vec::new();
        for (key, (payload, entry)) in &new {
            match old.get(key) {
                None => delta.push(entry.clone()),
                Some(current)
                    if current.block_date != payload.block_date
                        || current.reasons != payload.reasons =>
                {
                    let mut changed = entry.clone();
                    changed.delta_reason = "changed".to_string();
                    delta.push(changed);
                }
                Some(_) => {}
            }
        }
        for (key, current) in &old {
            if new.contains_key(key) {
                continue;
            }
            let reason = if self.is_paired(
                pairings,
                &current.imei_norm,
                current.imsi.as_deref(),
                current.msisdn.as_deref(),
            ) {
                "resolved"
            } else if blocked.contains_key(&current.imei_norm) {
                "blacklisted"
            } else if notified.contains_key(&current.imei_norm) {
                // Device still notified elsewhere; this triplet dropped off
                // the network.
                "no_longer_seen"
            } else {
                "resolved"
            };
            let mut removal = current.clone();
            removal.row_id = RecordId::new();
            removal.end_run_id = None;
            removal.delta_reason = reason.to_string();
            delta.push(removal);
        }
        Ok(delta)
    }

    fn exceptions_delta(
        &self,
        operator: &OperatorConfig,
        blocked: &BTreeMap<String, Payload>,
        pairings: &[Pairing],
    ) -> ComplyResult<Vec<ListEntry>> {
        let mut kept: BTreeMap<EntityKey, &Pairing> = BTreeMap::new();
        for pairing in pairings {
            if self.config.restrict_exceptions_to_blacklist
                && !blocked.contains_key(&pairing.imei_norm)
            {
                continue;
            }
            // A pairing goes to its home operator; one with no home operator
            // goes to every operator.
            let home = self
                .operators
                .iter()
                .find(|op| op.is_home_imsi(&pairing.imsi));
            if home.is_some_and(|op| op.id != operator.id) {
                continue;
            }
            let key = EntityKey {
                imei_norm: pairing.imei_norm.clone(),
                imsi: Some(pairing.imsi.clone()),
                msisdn: pairing.msisdn.clone(),
            };
            kept.insert(key, pairing);
        }

        let old = self.diff_baseline(ListKind::Exceptions, Some(&operator.id))?;
        let mut delta = Vec::new();
        for (key, pairing) in &kept {
            if !old.contains_key(key) {
                delta.push(exception_entry(&operator.id, pairing, "added"));
            }
        }
        for (key, current) in &old {
            if !kept.contains_key(key) {
                let mut removal = current.clone();
                removal.row_id = RecordId::new();
                removal.end_run_id = None;
                removal.delta_reason = "removed".to_string();
                delta.push(removal);
            }
        }
        Ok(delta)
    }

    fn is_paired(
        &self,
        pairings: &[Pairing],
        imei_norm: &str,
        imsi: Option<&str>,
        msisdn: Option<&str>,
    ) -> bool {
        pairings.iter().any(|p| {
            p.imei_norm == imei_norm
                && (Some(p.imsi.as_str()) == imsi
                    || (!self.config.notify_imsi_change
                        && p.msisdn.is_some()
                        && p.msisdn.as_deref() == msisdn))
        })
    }
}

fn blacklist_entry(imei_norm: &str, payload: &Payload, delta_reason: &str) -> ListEntry {
    ListEntry {
        row_id: RecordId::new(),
        kind: ListKind::Blacklist,
        operator_id: None,
        imei_norm: imei_norm.to_string(),
        imsi: None,
        msisdn: None,
        block_date: payload.block_date,
        reasons: payload.reasons.clone(),
        amnesty_granted: payload.amnesty_granted,
        start_run_id: crate::run::RunId::default(),
        end_run_id: None,
        delta_reason: delta_reason.to_string(),
    }
}

fn notification_entry(
    operator_id: &OperatorId,
    row: &Triplet,
    payload: &Payload,
    delta_reason: &str,
) -> ListEntry {
    ListEntry {
        row_id: RecordId::new(),
        kind: ListKind::Notifications,
        operator_id: Some(operator_id.clone()),
        imei_norm: row.imei_norm.clone(),
        imsi: row.imsi.clone(),
        msisdn: row.msisdn.clone(),
        block_date: payload.block_date,
        reasons: payload.reasons.clone(),
        amnesty_granted: payload.amnesty_granted,
        start_run_id: crate::run::RunId::default(),
        end_run_id: None,
        delta_reason: delta_reason.to_string(),
    }
}

fn exception_entry(operator_id: &OperatorId, pairing: &Pairing, delta_reason: &str) -> ListEntry {
    ListEntry {
        row_id: RecordId::new(),
        kind: ListKind::Exceptions,
        operator_id: Some(operator_id.clone()),
        imei_norm: pairing.imei_norm.clone(),
        imsi: Some(pairing.imsi.clone()),
        msisdn: pairing.msisdn.clone(),
        block_date: None,
        reasons: Vec::new(),
        amnesty_granted: false,
        start_run_id: crate::run::RunId::default(),
        end_run_id: None,
        delta_reason: delta_reason.to_string(),
    }
}
