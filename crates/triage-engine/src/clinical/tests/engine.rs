use std::sync::Arc;

use chrono::Duration;

use super::common::*;
use crate::clinical::engine::{EngineError, RuleEngine, UNCONDITIONAL_RULE_CONFIDENCE};
use crate::clinical::rulepack::{
    CoverageGrade, CoverageLevel, LoadSource, PackSource, RuleLoadResult, TriageColor,
};

fn engine(store: MemoryStore) -> (Arc<MemoryStore>, Arc<ManualClock>, RuleEngine<MemoryStore>) {
    let store = Arc::new(store);
    let clock = Arc::new(ManualClock::new(at(10, 9)));
    let engine = RuleEngine::with_clock(store.clone(), &engine_config(), clock.clone());
    (store, clock, engine)
}

/// `matching` conditions that hold for the chest pain fixture, padded to ten.
fn conditions(matching: usize) -> Vec<&'static str> {
    let mut conditions = vec!["tachycardia"; matching];
    conditions.resize(10, "fever");
    conditions
}

#[test]
fn recommendations_rank_by_priority_then_confidence() {
    let store = MemoryStore::default();
    let mut pack = pack(
        "curated-chest_pain",
        &["chest_pain"],
        vec![
            rule("a", 3, &conditions(9), TriageColor::Green),
            rule("b", 1, &conditions(5), TriageColor::Red),
            rule("c", 2, &conditions(7), TriageColor::Yellow),
        ],
    );
    if let Some(metadata) = pack.metadata.as_mut() {
        metadata
            .coverage
            .insert("chest_pain".to_string(), CoverageLevel::Partial);
    }
    store.put(PackSource::Primary, "chest_pain", pack);
    let (_, _, engine) = engine(store);

    let result = engine
        .apply_rules("chest pain", &chest_pain_assessment())
        .expect("rules apply");

    let order = result
        .recommendations
        .iter()
        .map(|recommendation| (recommendation.priority, recommendation.confidence))
        .collect::<Vec<_>>();
    assert_eq!(order.len(), 3);
    let expected = [(1, 0.5), (2, 0.7), (3, 0.9)];
    for ((priority, confidence), (want_priority, want_confidence)) in order.iter().zip(expected) {
        assert_eq!(*priority, want_priority);
        assert!((confidence - want_confidence).abs() < 1e-9);
    }
    assert_eq!(result.rule_pack_id.as_deref(), Some("curated-chest_pain"));
}

#[test]
fn inapplicable_rules_are_dropped_and_unconditional_rules_kept() {
    let store = MemoryStore::default();
    store.put(
        PackSource::Primary,
        "chest_pain",
        declared_pack("curated-chest_pain", "chest_pain", CoverageLevel::Full),
    );
    let (_, _, engine) = engine(store);

    let result = engine
        .apply_rules("chest_pain", &chest_pain_assessment())
        .expect("rules apply");

    // cp-001 matches "chest pain", cp-002 "tachycardia", cp-003 has no conditions.
    let ids = result
        .recommendations
        .iter()
        .map(|recommendation| recommendation.rule_id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["cp-001", "cp-002", "cp-003"]);
    assert!((result.recommendations[0].confidence - 0.5).abs() < 1e-9);
    assert!((result.recommendations[2].confidence - UNCONDITIONAL_RULE_CONFIDENCE).abs() < 1e-9);
    assert_eq!(
        result.most_urgent().map(|recommendation| recommendation.triage),
        Some(TriageColor::Red)
    );

    let mut calm = chest_pain_assessment();
    calm.vitals.hr = Some(80);
    calm.socrates.site = Some("left shoulder".to_string());
    let result = engine.apply_rules("chest_pain", &calm).expect("rules apply");
    assert_eq!(result.rules.len(), 1);
    assert_eq!(result.rules[0].id, "cp-003");
}

#[test]
fn cache_hit_within_ttl_skips_storage() {
    let store = MemoryStore::default();
    store.put(
        PackSource::Primary,
        "chest_pain",
        declared_pack("curated-chest_pain", "chest_pain", CoverageLevel::Full),
    );
    let (store, clock, engine) = engine(store);

    let first = engine.load_rule_pack("chest_pain", false).expect("loads");
    let reads = store.reads();

    clock.advance(Duration::seconds(299));
    let second = engine.load_rule_pack("Chest Pain", false).expect("loads");
    assert_eq!(store.reads(), reads);
    assert_eq!(first, second);
}

#[test]
fn expiry_and_force_refresh_reread_storage() {
    let store = MemoryStore::default();
    store.put(
        PackSource::Primary,
        "chest_pain",
        declared_pack("curated-chest_pain", "chest_pain", CoverageLevel::Full),
    );
    let (store, clock, engine) = engine(store);

    engine.load_rule_pack("chest_pain", false).expect("loads");
    let after_first = store.reads();

    engine.load_rule_pack("chest_pain", true).expect("loads");
    let after_forced = store.reads();
    assert!(after_forced > after_first);

    clock.advance(Duration::seconds(300));
    engine.load_rule_pack("chest_pain", false).expect("loads");
    assert!(store.reads() > after_forced);
}

#[test]
fn misses_are_cached_too() {
    let (store, _, engine) = engine(MemoryStore::default());

    let result = engine.load_rule_pack("rash", false).expect("loads");
    assert_eq!(result.source, LoadSource::FallbackNeeded);
    let reads = store.reads();

    engine.load_rule_pack("rash", false).expect("loads");
    assert_eq!(store.reads(), reads);
    assert_eq!(engine.cache().len(), 1);
}

#[test]
fn preloaded_packs_apply_like_memoized_ones() {
    let store = MemoryStore::default();
    store.put(
        PackSource::Primary,
        "chest_pain",
        declared_pack("curated-chest_pain", "chest_pain", CoverageLevel::Full),
    );
    let (_, _, engine) = engine(store);
    let assessment = chest_pain_assessment();

    let load = engine.load_rule_pack("chest_pain", false).expect("resolves");
    let applied = engine
        .apply_rules("chest_pain", &assessment)
        .expect("rules apply");
    assert_eq!(engine.apply_loaded(&load, &assessment), applied);
    assert!(applied.message.starts_with("3 of 3 rules applicable"));

    let timed_out = engine.apply_loaded(
        &RuleLoadResult::fallback_needed("resolution timed out"),
        &assessment,
    );
    assert!(!timed_out.success);
    assert!(timed_out.recommendations.is_empty());
    assert_eq!(timed_out.source, LoadSource::FallbackNeeded);
    assert_eq!(timed_out.message, "resolution timed out");
}

#[test]
fn unresolved_topic_degrades_to_empty_result() {
    let (_, _, engine) = engine(MemoryStore::default());

    let result = engine
        .apply_rules("rash", &chest_pain_assessment())
        .expect("a miss is not an error");
    assert!(!result.success);
    assert!(result.rules.is_empty());
    assert!(result.recommendations.is_empty());
    assert_eq!(result.coverage, CoverageGrade::None);
    assert_eq!(result.source, LoadSource::FallbackNeeded);
    assert!(result.rule_pack_id.is_none());
}

#[test]
fn unavailable_storage_surfaces_as_engine_error() {
    let store = MemoryStore::default();
    store.set_offline(true);
    let (_, _, engine) = engine(store);

    assert!(matches!(
        engine.apply_rules("fever", &chest_pain_assessment()),
        Err(EngineError::Resolve(_))
    ));
    assert!(engine.cache().is_empty());
}
