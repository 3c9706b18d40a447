//! End-to-end engine scenarios: resolution, learning, bin tracking and
//! actuation through the public library API.

use std::collections::HashMap;
use std::path::Path;

use proptest::prelude::*;
use smart_bin::actuator::serial::{CommandWriter, MemoryWriter, PortOpener};
use smart_bin::prelude::*;

fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.paths.database = dir.join("waste_items.sqlite3");
    config.paths.activity_log = dir.join("activity.jsonl");
    config.actuator.sort_duration_ms = 0;
    config.actuator.settle_ms = 0;
    config
}

fn bin<'a>(bins: &'a [BinStatus], color: &str) -> &'a BinStatus {
    bins.iter()
        .find(|b| b.color.as_str() == color)
        .unwrap_or_else(|| panic!("bin {color} missing"))
}

fn usage(engine: &SortingEngine, item: &str) -> Option<i64> {
    engine
        .usage_stats()
        .unwrap()
        .into_iter()
        .find(|s| s.item_name == item)
        .map(|s| s.usage_count)
}

#[test]
fn plastic_bottle_is_learned_and_counted() {
    let dir = tempfile::tempdir().unwrap();
    let writer = MemoryWriter::new();
    let engine =
        SortingEngine::start_with_opener(test_config(dir.path()), writer.opener()).unwrap();
    assert_eq!(engine.link_state(), LinkState::Connected);

    let first = engine
        .classify("plastic_bottle", 0.92, ResolveMode::Auto, &mut NoOperator)
        .unwrap();
    let ClassifyOutcome::Sorted {
        bin: first_bin,
        source,
        bin_status,
        actuation,
        ..
    } = first
    else {
        panic!("expected sorted, got {first:?}");
    };
    assert_eq!(first_bin.as_str(), "yellow");
    assert_eq!(source, ResolutionSource::StaticDefault);
    assert_eq!(actuation, ActuationStatus::Delivered);
    assert_eq!(bin_status.item_count, 1);
    assert!((bin_status.fill_level - 0.5).abs() < 1e-9);
    assert_eq!(usage(&engine, "plastic_bottle"), Some(1));
    assert_eq!(engine.detection_count().unwrap(), 1);

    let second = engine
        .classify("plastic_bottle", 0.92, ResolveMode::Auto, &mut NoOperator)
        .unwrap();
    let ClassifyOutcome::Sorted {
        bin: second_bin,
        source,
        bin_status,
        ..
    } = second
    else {
        panic!("expected sorted, got {second:?}");
    };
    assert_eq!(second_bin.as_str(), "yellow");
    assert_eq!(source, ResolutionSource::Learned);
    assert_eq!(bin_status.item_count, 2);
    assert!((bin_status.fill_level - 1.0).abs() < 1e-9);
    assert_eq!(usage(&engine, "plastic_bottle"), Some(2));

    assert_eq!(writer.lines(), vec!["yellow".to_string(), "yellow".to_string()]);
}

#[test]
fn unknown_item_in_auto_mode_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let writer = MemoryWriter::new();
    let engine =
        SortingEngine::start_with_opener(test_config(dir.path()), writer.opener()).unwrap();

    let outcome = engine
        .classify("mystery_object", 0.7, ResolveMode::Auto, &mut NoOperator)
        .unwrap();
    assert_eq!(
        outcome,
        ClassifyOutcome::Unresolved {
            item_name: "mystery_object".to_string(),
            confidence: 0.7,
        }
    );
    assert!(outcome.bin().is_none());
    assert_eq!(engine.detection_count().unwrap(), 0);
    assert!(engine.usage_stats().unwrap().is_empty());
    for status in engine.bin_status().unwrap() {
        assert_eq!(status.item_count, 0);
        assert!(status.fill_level.abs() < f64::EPSILON);
    }
    assert!(writer.lines().is_empty());
}

#[test]
fn emptying_a_bin_is_visible_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let engine = SortingEngine::open(test_config(dir.path())).unwrap();
    for _ in 0..2 {
        engine
            .classify("plastic_bottle", 0.92, ResolveMode::Auto, &mut NoOperator)
            .unwrap();
    }
    engine
        .classify("food", 0.9, ResolveMode::Auto, &mut NoOperator)
        .unwrap();

    let emptied = engine.empty_bin("yellow").unwrap();
    assert_eq!(emptied.item_count, 0);
    assert!(emptied.fill_level.abs() < f64::EPSILON);

    let bins = engine.bin_status().unwrap();
    let yellow = bin(&bins, "yellow");
    assert_eq!(yellow.item_count, 0);
    assert_eq!(yellow.last_emptied, emptied.last_emptied);
    assert_eq!(bin(&bins, "green").item_count, 1);

    // History and learned mappings survive emptying.
    assert_eq!(engine.history(None).unwrap().len(), 3);
    assert_eq!(usage(&engine, "plastic_bottle"), Some(2));
}

#[test]
fn emptying_unknown_color_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let engine = SortingEngine::open(test_config(dir.path())).unwrap();
    let err = engine.empty_bin("purple").unwrap_err();
    assert!(err.code().starts_with("SBIN-2"), "{err}");
}

#[test]
fn operator_answer_is_learned_for_next_time() {
    let dir = tempfile::tempdir().unwrap();
    let engine = SortingEngine::open(test_config(dir.path())).unwrap();

    let mut asked = Vec::new();
    let mut operator = |item: &str, bins: &[BinColor]| {
        asked.push(item.to_string());
        bins.iter().find(|b| b.as_str() == "brown").cloned()
    };
    let outcome = engine
        .classify("jar_lid", 0.8, ResolveMode::Interactive, &mut operator)
        .unwrap();
    assert_eq!(outcome.bin().map(BinColor::as_str), Some("brown"));
    assert_eq!(asked, vec!["jar_lid".to_string()]);

    // Known now: auto mode finds it without asking anybody.
    let outcome = engine
        .classify("jar_lid", 0.8, ResolveMode::Auto, &mut NoOperator)
        .unwrap();
    let ClassifyOutcome::Sorted { source, .. } = outcome else {
        panic!("expected sorted");
    };
    assert_eq!(source, ResolutionSource::Learned);
    assert_eq!(usage(&engine, "jar_lid"), Some(2));
}

#[test]
fn operator_cancel_leaves_item_unresolved() {
    let dir = tempfile::tempdir().unwrap();
    let engine = SortingEngine::open(test_config(dir.path())).unwrap();
    let mut cancel = |_: &str, _: &[BinColor]| None;
    let outcome = engine
        .classify("jar_lid", 0.8, ResolveMode::Interactive, &mut cancel)
        .unwrap();
    assert!(matches!(outcome, ClassifyOutcome::Unresolved { .. }));
    assert_eq!(engine.detection_count().unwrap(), 0);
}

#[test]
fn taught_mapping_overrides_static_default() {
    let dir = tempfile::tempdir().unwrap();
    let engine = SortingEngine::open(test_config(dir.path())).unwrap();
    engine.teach("paper", "brown").unwrap();
    let outcome = engine
        .classify("paper", 0.85, ResolveMode::Auto, &mut NoOperator)
        .unwrap();
    assert_eq!(outcome.bin().map(BinColor::as_str), Some("brown"));
    assert!(engine.teach("paper", "purple").is_err());
}

#[test]
fn invalid_detections_are_rejected_before_any_write() {
    let dir = tempfile::tempdir().unwrap();
    let engine = SortingEngine::open(test_config(dir.path())).unwrap();
    assert!(
        engine
            .classify("   ", 0.9, ResolveMode::Auto, &mut NoOperator)
            .is_err()
    );
    assert!(
        engine
            .classify("paper", 1.5, ResolveMode::Auto, &mut NoOperator)
            .is_err()
    );
    assert!(
        engine
            .classify("paper", f64::NAN, ResolveMode::Auto, &mut NoOperator)
            .is_err()
    );
    assert_eq!(engine.detection_count().unwrap(), 0);
    assert!(engine.usage_stats().unwrap().is_empty());
}

#[test]
fn full_bin_is_flagged_and_percent_clamped() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.bins.capacity_overrides.insert("yellow".to_string(), 1.0);
    let engine = SortingEngine::open(config).unwrap();

    engine
        .classify("can", 0.9, ResolveMode::Auto, &mut NoOperator)
        .unwrap();
    assert!(engine.bins_needing_emptying().unwrap().is_empty());

    for _ in 0..2 {
        engine
            .classify("can", 0.9, ResolveMode::Auto, &mut NoOperator)
            .unwrap();
    }
    let bins = engine.bin_status().unwrap();
    let yellow = bin(&bins, "yellow");
    assert!((yellow.fill_level - 1.5).abs() < 1e-9);
    assert!((yellow.fill_percent - 100.0).abs() < f64::EPSILON);
    assert!(yellow.needs_emptying);
    let full: Vec<_> = engine
        .bins_needing_emptying()
        .unwrap()
        .into_iter()
        .map(|b| b.color.to_string())
        .collect();
    assert_eq!(full, vec!["yellow".to_string()]);
}

#[test]
fn missing_hardware_degrades_to_simulation() {
    let dir = tempfile::tempdir().unwrap();
    let opener: PortOpener = Box::new(|cfg: &smart_bin::core::config::ActuatorConfig| {
        Err::<Box<dyn CommandWriter>, _>(SbinError::HardwareUnavailable {
            port: cfg.port.clone(),
            details: "no such device".to_string(),
        })
    });
    let engine = SortingEngine::start_with_opener(test_config(dir.path()), opener).unwrap();
    assert_eq!(engine.link_state(), LinkState::Simulated);

    let outcome = engine
        .classify("glass", 0.95, ResolveMode::Auto, &mut NoOperator)
        .unwrap();
    let ClassifyOutcome::Sorted { actuation, .. } = outcome else {
        panic!("expected sorted");
    };
    assert!(matches!(actuation, ActuationStatus::Simulated { .. }));
    assert_eq!(engine.detection_count().unwrap(), 1);
}

#[test]
fn state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut engine = SortingEngine::open(test_config(dir.path())).unwrap();
        engine
            .classify("banana_peel", 0.88, ResolveMode::Auto, &mut NoOperator)
            .unwrap();
        engine.shutdown("test restart");
    }
    let engine = SortingEngine::open(test_config(dir.path())).unwrap();
    let bins = engine.bin_status().unwrap();
    assert_eq!(bin(&bins, "green").item_count, 1);
    assert_eq!(usage(&engine, "banana_peel"), Some(1));
    let history = engine.history(Some(5)).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].item_name, "banana_peel");
}

#[test]
fn failed_detection_leaves_no_partial_state() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let mut store = Store::open(&config.paths.database, &config.bins).unwrap();

    // Remove the brown row behind the store's back so the bin update fails
    // after the log insert.
    let side = rusqlite::Connection::open(&config.paths.database).unwrap();
    side.execute("DELETE FROM bin_state WHERE bin_color = 'brown'", [])
        .unwrap();
    drop(side);

    assert!(store.record_detection("brown", "tissue", 0.89).is_err());
    assert_eq!(store.detection_count().unwrap(), 0);
    assert!(store.get_history(10).unwrap().is_empty());

    let record = store.record_detection("yellow", "paper", 0.85).unwrap();
    assert_eq!(record.bin_color.as_str(), "yellow");
    assert_eq!(store.detection_count().unwrap(), 1);
    store.shutdown().unwrap();
}

#[test]
fn activity_log_records_engine_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let log_path = config.paths.activity_log.clone();
    let mut engine = SortingEngine::open(config).unwrap();
    engine
        .classify("paper", 0.85, ResolveMode::Auto, &mut NoOperator)
        .unwrap();
    engine
        .classify("mystery_object", 0.5, ResolveMode::Auto, &mut NoOperator)
        .unwrap();
    engine.shutdown("test");

    let raw = std::fs::read_to_string(log_path).unwrap();
    let events: Vec<String> = raw
        .lines()
        .map(|line| {
            let v: serde_json::Value = serde_json::from_str(line).unwrap();
            v["event"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(
        events,
        vec!["engine_start", "item_sorted", "item_unresolved", "engine_stop"]
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn usage_counts_track_repeat_classifications(
        items in prop::collection::vec(
            prop::sample::select(vec!["paper", "food", "glass", "tissue", "can"]),
            1..12,
        )
    ) {
        let dir = tempfile::tempdir().unwrap();
        let engine = SortingEngine::open(test_config(dir.path())).unwrap();
        let mut expected: HashMap<&str, i64> = HashMap::new();
        let mut bins_seen: HashMap<&str, String> = HashMap::new();

        for item in &items {
            let outcome = engine
                .classify(item, 0.9, ResolveMode::Auto, &mut NoOperator)
                .unwrap();
            let color = outcome.bin().map(ToString::to_string).unwrap();
            let before = expected.get(item).copied().unwrap_or(0);
            let now = usage(&engine, item).unwrap();
            prop_assert!(now > before);
            expected.insert(item, now);

            let first = bins_seen.entry(item).or_insert_with(|| color.clone());
            prop_assert_eq!(&*first, &color);
        }

        let total: i64 = expected.values().sum();
        prop_assert_eq!(total, i64::try_from(items.len()).unwrap());
        prop_assert_eq!(engine.detection_count().unwrap(), total);
    }
}
