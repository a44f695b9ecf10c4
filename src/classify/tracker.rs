//! The classification state tracker.
//!
//! Each run, the condition evaluator (an opaque oracle) supplies the set of
//! devices currently meeting each condition. The tracker turns those outcomes
//! into state transitions against the interval store: new pairs open an
//! interval, vanished pairs close theirs, and surviving pairs may have their
//! block date or amnesty flag refreshed.
//!
//! Block dates are sticky: once set they do not slide later run over run.
//! They change only on a null ↔ not-null policy transition or when the
//! amnesty programme moves a granted device onto the amnesty end date.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Days, NaiveDate};

use crate::config::{AmnestyConfig, ConditionConfig};
use crate::error::ComplyResult;
use crate::run::RunContext;

use super::store::{AppliedStateChanges, ClassificationStateStore, StateTransition};

/// Plans and applies per-run classification state transitions.
pub struct StateTracker {
    store: Arc<dyn ClassificationStateStore>,
}

impl StateTracker {
    /// Creates a tracker over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn ClassificationStateStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ClassificationStateStore> {
        &self.store
    }

    /// Plans the transitions one condition's outcomes produce, without
    /// applying them.
    ///
    /// `met_imeis` is the full set of devices the evaluator reports as
    /// meeting the condition this run; every open pair absent from the set is
    /// closed.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the state store cannot be read.
    pub fn plan(
        &self,
        run: &RunContext,
        condition: &ConditionConfig,
        amnesty: &AmnestyConfig,
        met_imeis: &BTreeSet<String>,
    ) -> ComplyResult<Vec<StateTransition>> {
        let flags = amnesty.flags(run.curr_date);
        let sticky_block_date = sticky_block_date(condition, amnesty, run.curr_date);
        let grants_amnesty = condition.amnesty_eligible && flags.in_evaluation_period;

        let mut transitions = Vec::new();
        for imei_norm in met_imeis {
            match self.store.open_record(imei_norm, &condition.name)? {
                None => transitions.push(StateTransition::Open {
                    imei_norm: imei_norm.clone(),
                    condition: condition.name.clone(),
                    start_date: run.analysis_window.start(),
                    block_date: sticky_block_date,
                    amnesty_granted: grants_amnesty,
                }),
                Some(record) => {
                    let desired_amnesty = if flags.in_evaluation_period {
                        condition.amnesty_eligible
                    } else {
                        record.amnesty_granted
                    };
                    let desired_block = if flags.in_amnesty_period && record.amnesty_granted {
                        Some(amnesty.amnesty_period_end_date)
                    } else {
                        match (record.block_date, sticky_block_date) {
                            // Block dates are sticky; an already-scheduled
                            // date stays put.
                            (Some(_), Some(_)) => record.block_date,
                            _ => sticky_block_date,
                        }
                    };
                    if desired_block != record.block_date
                        || desired_amnesty != record.amnesty_granted
                    {
                        transitions.push(StateTransition::Refresh {
                            imei_norm: imei_norm.clone(),
                            condition: condition.name.clone(),
                            block_date: desired_block,
                            amnesty_granted: desired_amnesty,
                        });
                    }
                }
            }
        }

        for record in self.store.open_records_for_condition(&condition.name)? {
            if !met_imeis.contains(&record.imei_norm) {
                transitions.push(StateTransition::Close {
                    imei_norm: record.imei_norm,
                    condition: condition.name.clone(),
                    end_date: run.analysis_window.start(),
                });
            }
        }
        Ok(transitions)
    }

    /// Plans and applies one condition's outcomes as a single atomic batch.
    ///
    /// # Errors
    ///
    /// Propagates planning errors and the store's invariant violations; a
    /// rejected batch applies nothing.
    pub fn apply_outcomes(
        &self,
        run: &RunContext,
        condition: &ConditionConfig,
        amnesty: &AmnestyConfig,
        met_imeis: &BTreeSet<String>,
    ) -> ComplyResult<AppliedStateChanges> {
        let transitions = self.plan(run, condition, amnesty, met_imeis)?;
        let changes = self.store.apply_run(run.run_id, &transitions)?;
        tracing::debug!(
            run_id = run.run_id.value(),
            condition = condition.name.as_str(),
            opened = changes.opened,
            closed = changes.closed,
            refreshed = changes.refreshed,
            "classification state updated"
        );
        Ok(changes)
    }
}

/// The block date a newly-opened interval gets under the condition's policy.
///
/// Blocking conditions get `curr_date + grace_period_days`, except while an
/// amnesty-eligible condition is inside the evaluation period, where the
/// block date stays unset.
#[must_use]
pub fn sticky_block_date(
    condition: &ConditionConfig,
    amnesty: &AmnestyConfig,
    curr_date: NaiveDate,
) -> Option<NaiveDate> {
    let flags = amnesty.flags(curr_date);
    if condition.blocking && !(condition.amnesty_eligible && flags.in_evaluation_period) {
        curr_date.checked_add_days(Days::new(u64::from(condition.grace_period_days)))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{ConditionName, InMemoryStateStore};
    use crate::presence::AnalysisWindow;
    use crate::run::RunId;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn run(id: i64, curr: NaiveDate) -> RunContext {
        let window = AnalysisWindow::lookback(curr, 30).unwrap();
        RunContext::new(RunId::new(id), curr, window)
    }

    fn blocking_condition() -> ConditionConfig {
        ConditionConfig {
            name: ConditionName::new("local_stolen").unwrap(),
            reason: "IMEI found on local stolen list".to_string(),
            blocking: true,
            grace_period_days: 30,
            amnesty_eligible: false,
        }
    }

    fn tracker() -> StateTracker {
        StateTracker::new(Arc::new(InMemoryStateStore::new()))
    }

    fn met(imeis: &[&str]) -> BTreeSet<String> {
        imeis.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_first_meeting_opens_interval_with_block_date() {
        let tracker = tracker();
        let amnesty = AmnestyConfig::disabled();
        let changes = tracker
            .apply_outcomes(
                &run(1, date(2024, 3, 31)),
                &blocking_condition(),
                &amnesty,
                &met(&["35847904123456"]),
            )
            .unwrap();
        assert_eq!(changes.opened, 1);

        let record = tracker
            .store()
            .open_record("35847904123456", &ConditionName::new("local_stolen").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(record.start_date, date(2024, 3, 1));
        assert_eq!(record.block_date, Some(date(2024, 4, 30)));
        assert!(!record.amnesty_granted);
    }

    #[test]
    fn test_no_longer_meeting_closes_interval() {
        let tracker = tracker();
        let amnesty = AmnestyConfig::disabled();
        let condition = blocking_condition();
        tracker
            .apply_outcomes(
                &run(1, date(2024, 3, 31)),
                &condition,
                &amnesty,
                &met(&["35847904123456"]),
            )
            .unwrap();

        let changes = tracker
            .apply_outcomes(&run(2, date(2024, 4, 30)), &condition, &amnesty, &met(&[]))
            .unwrap();
        assert_eq!(changes.closed, 1);
        assert_eq!(changes.opened, 0);

        let history = tracker
            .store()
            .records_for_imei("35847904123456", None, None)
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].end_date, Some(date(2024, 3, 31)));
    }

    #[test]
    fn test_block_date_is_sticky_across_runs() {
        let tracker = tracker();
        let amnesty = AmnestyConfig::disabled();
        let condition = blocking_condition();
        tracker
            .apply_outcomes(
                &run(1, date(2024, 3, 31)),
                &condition,
                &amnesty,
                &met(&["35847904123456"]),
            )
            .unwrap();

        // Still meeting a month later: the already-scheduled block date must
        // not slide.
        let changes = tracker
            .apply_outcomes(
                &run(2, date(2024, 4, 30)),
                &condition,
                &amnesty,
                &met(&["35847904123456"]),
            )
            .unwrap();
        assert_eq!(changes.refreshed, 0);

        let record = tracker
            .store()
            .open_record("35847904123456", &condition.name)
            .unwrap()
            .unwrap();
        assert_eq!(record.block_date, Some(date(2024, 4, 30)));
    }

    #[test]
    fn test_condition_turning_blocking_refreshes_block_date() {
        let tracker = tracker();
        let amnesty = AmnestyConfig::disabled();
        let mut condition = blocking_condition();
        condition.blocking = false;
        tracker
            .apply_outcomes(
                &run(1, date(2024, 3, 31)),
                &condition,
                &amnesty,
                &met(&["35847904123456"]),
            )
            .unwrap();
        assert!(tracker
            .store()
            .open_record("35847904123456", &condition.name)
            .unwrap()
            .unwrap()
            .block_date
            .is_none());

        condition.blocking = true;
        let changes = tracker
            .apply_outcomes(
                &run(2, date(2024, 4, 30)),
                &condition,
                &amnesty,
                &met(&["35847904123456"]),
            )
            .unwrap();
        assert_eq!(changes.refreshed, 1);
        assert_eq!(
            tracker
                .store()
                .open_record("35847904123456", &condition.name)
                .unwrap()
                .unwrap()
                .block_date,
            Some(date(2024, 5, 30))
        );
    }

    #[test]
    fn test_amnesty_lifecycle() {
        let tracker = tracker();
        let amnesty = AmnestyConfig {
            enabled: true,
            evaluation_period_end_date: date(2024, 3, 31),
            amnesty_period_end_date: date(2024, 6, 30),
        };
        let mut condition = blocking_condition();
        condition.amnesty_eligible = true;

        // Inside the evaluation period: no block date, amnesty granted.
        tracker
            .apply_outcomes(
                &run(1, date(2024, 3, 15)),
                &condition,
                &amnesty,
                &met(&["35847904123456"]),
            )
            .unwrap();
        let record = tracker
            .store()
            .open_record("35847904123456", &condition.name)
            .unwrap()
            .unwrap();
        assert!(record.amnesty_granted);
        assert!(record.block_date.is_none());

        // Inside the amnesty period: granted devices get the amnesty end
        // date as their block date.
        let changes = tracker
            .apply_outcomes(
                &run(2, date(2024, 4, 15)),
                &condition,
                &amnesty,
                &met(&["35847904123456"]),
            )
            .unwrap();
        assert_eq!(changes.refreshed, 1);
        let record = tracker
            .store()
            .open_record("35847904123456", &condition.name)
            .unwrap()
            .unwrap();
        assert!(record.amnesty_granted);
        assert_eq!(record.block_date, Some(date(2024, 6, 30)));
    }
}
