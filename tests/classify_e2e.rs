//! End-to-end classification runs through the assembled engine.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::NaiveDate;
use complycore::{
    ComplianceEngine, ConditionConfig, ConditionName, ConditionOutcomes, EngineConfig,
    InMemoryListStore, InMemoryStateStore, InMemoryTripletStore, SequenceAllocator,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn engine() -> ComplianceEngine {
    let config = EngineConfig {
        conditions: vec![
            ConditionConfig {
                name: ConditionName::new("local_stolen").unwrap(),
                reason: "IMEI found on local stolen list".to_string(),
                blocking: true,
                grace_period_days: 30,
                amnesty_eligible: false,
            },
            ConditionConfig {
                name: ConditionName::new("gsma_not_found").unwrap(),
                reason: "TAC not found in GSMA TAC database".to_string(),
                blocking: false,
                grace_period_days: 30,
                amnesty_eligible: false,
            },
        ],
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

fn outcomes(per_condition: &[(&str, &[&str])]) -> ConditionOutcomes {
    let mut map = BTreeMap::new();
    for (condition, imeis) in per_condition {
        map.insert(
            ConditionName::new(*condition).unwrap(),
            imeis.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
        );
    }
    map
}

#[test]
fn state_intervals_follow_condition_outcomes_across_runs() {
    let engine = engine();

    // Run 1: both devices meet the blocking condition.
    let (run1, changes) = engine
        .classify_run(
            date(2024, 3, 31),
            &outcomes(&[("local_stolen", &["35847904123456", "49015420323751"])]),
        )
        .unwrap();
    assert_eq!(changes.opened, 2);
    assert_eq!(changes.closed, 0);

    // Run 2: one device drops off the stolen list.
    let (_, changes) = engine
        .classify_run(
            date(2024, 4, 30),
            &outcomes(&[("local_stolen", &["35847904123456"])]),
        )
        .unwrap();
    assert_eq!(changes.opened, 0);
    assert_eq!(changes.closed, 1);

    let still_open = engine
        .classification_state("35847904123456", None, None)
        .unwrap();
    assert_eq!(still_open.len(), 1);
    assert!(still_open[0].is_open());
    assert_eq!(still_open[0].block_date, Some(date(2024, 4, 30)));

    let closed = engine
        .classification_state("49015420323751", None, None)
        .unwrap();
    assert_eq!(closed.len(), 1);
    assert!(!closed[0].is_open());
    // Closed at run 2's analysis start date.
    assert_eq!(closed[0].end_date, Some(date(2024, 3, 31)));

    // The historical view at run 1 still shows the record that later closed.
    let at_run1 = engine
        .classification_state("49015420323751", None, Some(run1))
        .unwrap();
    assert_eq!(at_run1.len(), 1);
}

#[test]
fn at_most_one_open_record_per_pair_after_every_run() {
    let engine = engine();
    let devices: &[&str] = &["35847904123456", "49015420323751", "86753090123456"];

    // Devices flap in and out of both conditions over several runs.
    let memberships: &[&[&str]] = &[
        &["35847904123456", "49015420323751"],
        &["35847904123456", "86753090123456"],
        &[],
        &["35847904123456", "49015420323751", "86753090123456"],
    ];
    let mut day = 1;
    for &met in memberships {
        engine
            .classify_run(
                date(2024, 4, day),
                &outcomes(&[("local_stolen", met), ("gsma_not_found", met)]),
            )
            .unwrap();
        day += 7;

        for device in devices {
            for condition in ["local_stolen", "gsma_not_found"] {
                let records = engine
                    .classification_state(device, Some(&ConditionName::new(condition).unwrap()), None)
                    .unwrap();
                let open = records.iter().filter(|r| r.is_open()).count();
                assert!(open <= 1, "{device}/{condition} has {open} open records");
            }
        }
    }
}

#[test]
fn condition_absent_from_outcomes_closes_its_intervals() {
    let engine = engine();
    engine
        .classify_run(
            date(2024, 3, 31),
            &outcomes(&[("local_stolen", &["35847904123456"])]),
        )
        .unwrap();

    // The evaluator reports nothing at all next run.
    let (_, changes) = engine.classify_run(date(2024, 4, 30), &BTreeMap::new()).unwrap();
    assert_eq!(changes.closed, 1);

    let records = engine
        .classification_state("35847904123456", None, None)
        .unwrap();
    assert!(records.iter().all(|r| !r.is_open()));
}

#[test]
fn non_blocking_condition_opens_without_block_date() {
    let engine = engine();
    engine
        .classify_run(
            date(2024, 3, 31),
            &outcomes(&[("gsma_not_found", &["35847904123456"])]),
        )
        .unwrap();

    let records = engine
        .classification_state(
            "35847904123456",
            Some(&ConditionName::new("gsma_not_found").unwrap()),
            None,
        )
        .unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].block_date.is_none());
}
