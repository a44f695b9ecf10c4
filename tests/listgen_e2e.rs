//! End-to-end list generation: classification runs feeding blacklist,
//! notification and exception lists, with point-in-time and delta views.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::NaiveDate;
use complycore::{
    ComplianceEngine, ConditionConfig, ConditionName, ConditionOutcomes, EngineConfig,
    InMemoryListStore, InMemoryStagingSink, InMemoryStateStore, InMemoryTripletStore, ListKind,
    OperatorConfig, OperatorId, Pairing, RawObservation, ReasonClass, ReasonVocabulary,
    RegionConfig, RunId, SequenceAllocator,
};

const IMEI_A: &str = "35847904123456";
const IMEI_B: &str = "49015420323751";
const IMSI_A: &str = "11101400135251";
const IMSI_B: &str = "11102400135252";

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn engine() -> ComplianceEngine {
    let config = EngineConfig {
        region: RegionConfig {
            mcc_mnc_prefixes: vec!["11101".to_string(), "11102".to_string()],
            country_codes: vec!["22".to_string()],
        },
        operators: vec![
            OperatorConfig {
                id: OperatorId::new("operator1").unwrap(),
                name: "Operator One".to_string(),
                mcc_mnc_prefixes: vec!["11101".to_string()],
            },
            OperatorConfig {
                id: OperatorId::new("operator2").unwrap(),
                name: "Operator Two".to_string(),
                mcc_mnc_prefixes: vec!["11102".to_string()],
            },
        ],
        conditions: vec![ConditionConfig {
            name: ConditionName::new("local_stolen").unwrap(),
            reason: "IMEI found on local stolen list".to_string(),
            blocking: true,
            grace_period_days: 30,
            amnesty_eligible: false,
        }],
        ..EngineConfig::default()
    };
    ComplianceEngine::new(
        config,
        Arc::new(SequenceAllocator::default()),
        Arc::new(InMemoryTripletStore::new()),
        Arc::new(InMemoryStateStore::new()),
        Arc::new(InMemoryListStore::new()),
    )
}

fn observation(imei: &str, imsi: &str, msisdn: &str, op: &str, seen: NaiveDate) -> RawObservation {
    RawObservation {
        imei: Some(imei.to_string()),
        imsi: Some(imsi.to_string()),
        msisdn: Some(msisdn.to_string()),
        operator_id: OperatorId::new(op).unwrap(),
        connection_date: seen,
    }
}

fn outcomes(imeis: &[&str]) -> ConditionOutcomes {
    let mut map = BTreeMap::new();
    map.insert(
        ConditionName::new("local_stolen").unwrap(),
        imeis.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
    );
    map
}

fn op(id: &str) -> OperatorId {
    OperatorId::new(id).unwrap()
}

/// Drives the shared scenario:
/// run 1 classifies both devices as stolen, run 2 notifies them, run 3
/// blocks both (device A paired meanwhile), run 4 clears device B, run 5
/// unblocks it. Returns the engine plus the list-generation run ids.
fn scenario() -> (ComplianceEngine, RunId, RunId, RunId) {
    let engine = engine();
    let staging = InMemoryStagingSink::new();

    let summary = engine
        .ingest(
            &staging,
            vec![
                observation(IMEI_A, IMSI_A, "22300825", "operator1", date(2024, 3, 10)),
                observation(IMEI_B, IMSI_B, "22300826", "operator2", date(2024, 3, 12)),
                // Null IMSI: staged, not stored.
                RawObservation {
                    imei: Some(IMEI_A.to_string()),
                    imsi: None,
                    msisdn: Some("22300825".to_string()),
                    operator_id: op("operator1"),
                    connection_date: date(2024, 3, 10),
                },
            ],
        )
        .unwrap();
    assert_eq!(summary.stored, 2);
    assert_eq!(summary.staged, 1);
    assert_eq!(summary.null_imsi, 1);

    engine
        .classify_run(date(2024, 3, 31), &outcomes(&[IMEI_A, IMEI_B]))
        .unwrap();

    let (run2, summary2) = engine.generate_lists(date(2024, 3, 31), &[]).unwrap();
    assert_eq!(summary2.blacklist_rows, 0);
    assert_eq!(summary2.notification_rows, 2);

    let pairings = vec![Pairing {
        imei_norm: IMEI_A.to_string(),
        imsi: IMSI_A.to_string(),
        msisdn: Some("22300825".to_string()),
    }];
    let (run3, summary3) = engine.generate_lists(date(2024, 4, 30), &pairings).unwrap();
    assert_eq!(summary3.blacklist_rows, 2);
    assert_eq!(summary3.notification_rows, 2);
    assert_eq!(summary3.exception_rows, 1);

    engine
        .classify_run(date(2024, 5, 31), &outcomes(&[IMEI_A]))
        .unwrap();
    let (run5, summary5) = engine.generate_lists(date(2024, 5, 31), &pairings).unwrap();
    assert_eq!(summary5.blacklist_rows, 1);

    (engine, run2, run3, run5)
}

#[test]
fn notifications_precede_blocking_and_resolve_on_pairing() {
    let (engine, run2, _, _) = scenario();

    // At run 2 both devices are notified on their home operators.
    let op1_notifications = engine
        .current_list(ListKind::Notifications, Some(&op("operator1")), Some(run2))
        .unwrap();
    assert_eq!(op1_notifications.len(), 1);
    assert_eq!(op1_notifications[0].imei_norm, IMEI_A);
    assert_eq!(op1_notifications[0].block_date, Some(date(2024, 4, 30)));
    assert_eq!(
        op1_notifications[0].reasons,
        vec!["IMEI found on local stolen list".to_string()]
    );

    // After run 3 device A's notification resolved (paired) and device B's
    // was superseded by blocking; neither remains on the current view.
    assert!(engine
        .current_list(ListKind::Notifications, Some(&op("operator1")), None)
        .unwrap()
        .is_empty());
    assert!(engine
        .current_list(ListKind::Notifications, Some(&op("operator2")), None)
        .unwrap()
        .is_empty());

    // The removal reasons are recorded on the log.
    let delta = engine
        .delta_list(ListKind::Notifications, Some(&op("operator1")), run2, None)
        .unwrap();
    assert_eq!(delta.len(), 1);
    assert_eq!(delta[0].1, "resolved");
    let delta = engine
        .delta_list(ListKind::Notifications, Some(&op("operator2")), run2, None)
        .unwrap();
    assert_eq!(delta.len(), 1);
    assert_eq!(delta[0].1, "blacklisted");
}

#[test]
fn blacklist_current_and_delta_views_agree() {
    let (engine, run2, run3, run5) = scenario();

    let at_run3: Vec<String> = engine
        .current_list(ListKind::Blacklist, None, Some(run3))
        .unwrap()
        .into_iter()
        .map(|e| e.imei_norm)
        .collect();
    assert_eq!(at_run3, vec![IMEI_A.to_string(), IMEI_B.to_string()]);

    // Device B was cleared by run 5.
    let latest: Vec<String> = engine
        .current_list(ListKind::Blacklist, None, None)
        .unwrap()
        .into_iter()
        .map(|e| e.imei_norm)
        .collect();
    assert_eq!(latest, vec![IMEI_A.to_string()]);

    // Between run 3 and run 5 only the unblocking is visible.
    let delta = engine
        .delta_list(ListKind::Blacklist, None, run3, Some(run5))
        .unwrap();
    assert_eq!(delta.len(), 1);
    assert_eq!(delta[0].0.imei_norm, IMEI_B);
    assert_eq!(delta[0].1, "unblocked");

    // Between run 2 and run 5, device B's block and unblock cancel out and
    // only device A's addition remains.
    let delta = engine
        .delta_list(ListKind::Blacklist, None, run2, Some(run5))
        .unwrap();
    assert_eq!(delta.len(), 1);
    assert_eq!(delta[0].0.imei_norm, IMEI_A);
    assert_eq!(delta[0].1, "blocked");
}

#[test]
fn delta_applied_to_base_membership_reproduces_current_membership() {
    let (engine, run2, _, run5) = scenario();
    let vocabulary = ReasonVocabulary::latest();

    for kind in [ListKind::Blacklist, ListKind::Notifications, ListKind::Exceptions] {
        let operator = kind.is_per_operator().then(|| op("operator1"));

        let mut membership: BTreeSet<_> = engine
            .current_list(kind, operator.as_ref(), Some(run2))
            .unwrap()
            .into_iter()
            .map(|e| e.entity_key())
            .collect();

        for (entry, reason) in engine
            .delta_list(kind, operator.as_ref(), run2, Some(run5))
            .unwrap()
        {
            match vocabulary.classify(&reason).unwrap() {
                ReasonClass::Add => {
                    membership.insert(entry.entity_key());
                }
                ReasonClass::Remove => {
                    membership.remove(&entry.entity_key());
                }
                ReasonClass::Change => {}
            }
        }

        let current: BTreeSet<_> = engine
            .current_list(kind, operator.as_ref(), Some(run5))
            .unwrap()
            .into_iter()
            .map(|e| e.entity_key())
            .collect();
        assert_eq!(membership, current, "membership mismatch for {kind}");
    }
}

#[test]
fn zero_width_delta_is_empty_for_every_kind() {
    let (engine, _, _, run5) = scenario();
    for kind in [ListKind::Blacklist, ListKind::Notifications, ListKind::Exceptions] {
        let operator = kind.is_per_operator().then(|| op("operator1"));
        let delta = engine
            .delta_list(kind, operator.as_ref(), run5, Some(run5))
            .unwrap();
        assert!(delta.is_empty(), "zero-width delta not empty for {kind}");
    }
}

#[test]
fn base_run_after_target_fails_fast() {
    let (engine, _, _, run5) = scenario();
    let base = RunId::new(run5.value() + 10);
    let err = engine
        .delta_list(ListKind::Blacklist, None, base, Some(run5))
        .unwrap_err();
    assert!(err.is_validation());
}

#[test]
fn exceptions_follow_the_pairing_list() {
    let (engine, _, run3, _) = scenario();

    let exceptions = engine
        .current_list(ListKind::Exceptions, Some(&op("operator1")), None)
        .unwrap();
    assert_eq!(exceptions.len(), 1);
    assert_eq!(exceptions[0].imei_norm, IMEI_A);
    assert_eq!(exceptions[0].imsi.as_deref(), Some(IMSI_A));

    let delta = engine
        .delta_list(ListKind::Exceptions, Some(&op("operator1")), RunId::new(0), Some(run3))
        .unwrap();
    assert_eq!(delta.len(), 1);
    assert_eq!(delta[0].1, "added");

    // Nothing for the other operator.
    assert!(engine
        .current_list(ListKind::Exceptions, Some(&op("operator2")), None)
        .unwrap()
        .is_empty());
}

#[test]
fn notification_removal_of_unseen_device_stays_visible() {
    // A device with a future block date whose triplet drops off the network
    // is marked no_longer_seen but stays on the current notifications view.
    let engine = engine();
    let staging = InMemoryStagingSink::new();
    engine
        .ingest(
            &staging,
            vec![observation(IMEI_A, IMSI_A, "22300825", "operator1", date(2024, 3, 10))],
        )
        .unwrap();
    engine
        .classify_run(date(2024, 3, 31), &outcomes(&[IMEI_A]))
        .unwrap();
    // Long grace period keeps the device in the warning phase.
    let (_, summary) = engine.generate_lists(date(2024, 3, 31), &[]).unwrap();
    assert_eq!(summary.notification_rows, 1);

    // Re-classify so the block date stays in the future, then generate with
    // the triplet outside the lookback window.
    engine
        .classify_run(date(2024, 4, 20), &outcomes(&[IMEI_A]))
        .unwrap();
    let (_, summary) = engine.generate_lists(date(2024, 4, 25), &[]).unwrap();
    assert_eq!(summary.notification_rows, 1);

    let notifications = engine
        .current_list(ListKind::Notifications, Some(&op("operator1")), None)
        .unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].delta_reason, "no_longer_seen");
}
