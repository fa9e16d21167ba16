//! End-to-end mutation cycle tests.
//!
//! Each test builds a registry, runs whole cycles against a small tree,
//! and checks the tree afterwards. Randomness is seeded wherever a test
//! depends on which nodes fire.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use morphfeed_morph::{MorphError, MorphRegistry, MorphRule, donor_source, regenerator};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::{Value, json};

/// Regenerator that adds one to the previous integer value.
fn increment() -> morphfeed_morph::Regenerator {
    regenerator(|previous: Option<Value>| async move {
        let current = previous.as_ref().and_then(Value::as_i64).unwrap_or(0);
        Ok::<_, MorphError>(json!(current + 1))
    })
}

fn constant_donor(tree: Value) -> morphfeed_morph::DonorSource {
    donor_source(move || {
        let tree = tree.clone();
        async move { Ok::<_, MorphError>(tree) }
    })
}

fn sorted(list: &Value) -> Vec<i64> {
    let mut values: Vec<i64> = list.as_array().unwrap().iter().filter_map(Value::as_i64).collect();
    values.sort_unstable();
    values
}

#[tokio::test]
async fn updates_top_level_fields() {
    let registry = MorphRegistry::new();
    registry.register(MorphRule::scalar("data", 1.0, "$", "data", increment()).unwrap());
    let mut tree = json!({"data": 10});

    registry.cycle(&mut tree).await;

    assert_eq!(tree, json!({"data": 11}));
}

#[tokio::test]
async fn updates_nested_fields() {
    let registry = MorphRegistry::new();
    registry.register(MorphRule::scalar("nested", 1.0, "$.nested", "data", increment()).unwrap());
    let mut tree = json!({"nested": {"data": 10}});

    registry.cycle(&mut tree).await;

    assert_eq!(tree, json!({"nested": {"data": 11}}));
}

#[tokio::test]
async fn updates_every_array_element_once() {
    let registry = MorphRegistry::new();
    registry.register(MorphRule::scalar("bar", 1.0, "$.nested[*]", "bar", increment()).unwrap());
    let mut tree = json!({"nested": [{"bar": 10}, {"bar": 20}]});

    let report = registry.cycle(&mut tree).await;

    assert_eq!(tree, json!({"nested": [{"bar": 11}, {"bar": 21}]}));
    assert_eq!(report.applied, 2);
}

#[tokio::test]
async fn is_benign_on_non_matching_data() {
    let registry = MorphRegistry::new();
    registry.register(MorphRule::scalar("data", 1.0, "$.nested[*]", "data", increment()).unwrap());
    let mut tree = json!({"foo": [{"bar": 10}]});

    let report = registry.cycle(&mut tree).await;

    assert_eq!(tree, json!({"foo": [{"bar": 10}]}));
    assert_eq!(report.matched, 0);
}

#[tokio::test]
async fn zero_threshold_never_fires() {
    let registry = MorphRegistry::new();
    registry.register(MorphRule::scalar("data", 0.0, "$", "data", increment()).unwrap());
    registry.register(MorphRule::list_delete("del", 0.0, "$.list", 0).unwrap());
    let mut tree = json!({"data": 10, "list": [1, 2, 3]});

    for _ in 0..100 {
        registry.cycle(&mut tree).await;
    }

    assert_eq!(tree, json!({"data": 10, "list": [1, 2, 3]}));
}

#[tokio::test]
async fn threshold_controls_firing_rate() {
    let registry = MorphRegistry::new();
    registry.register(MorphRule::scalar("data", 0.5, "$", "data", increment()).unwrap());
    let mut tree = json!({"data": 0});
    let mut rng = StdRng::seed_from_u64(42);

    for _ in 0..1_000 {
        registry.cycle_with(&mut tree, &mut rng).await;
    }

    let fired = tree["data"].as_i64().unwrap();
    assert!((400..=600).contains(&fired), "fired {fired} times");
}

#[tokio::test]
async fn each_matched_node_triggers_independently() {
    let registry = MorphRegistry::new();
    registry.register(MorphRule::scalar("v", 0.5, "$[*]", "v", increment()).unwrap());
    let mut tree = json!([{"v": 0}, {"v": 0}, {"v": 0}, {"v": 0}]);
    let mut rng = StdRng::seed_from_u64(3);

    for _ in 0..400 {
        registry.cycle_with(&mut tree, &mut rng).await;
    }

    let counts: Vec<i64> = tree.as_array().unwrap().iter().map(|n| n["v"].as_i64().unwrap()).collect();
    assert!(counts.iter().all(|c| (140..=260).contains(c)), "counts {counts:?}");
    assert!(counts.windows(2).any(|w| w[0] != w[1]), "nodes fired in lockstep: {counts:?}");
}

#[tokio::test]
async fn deletes_down_to_the_floor() {
    let registry = MorphRegistry::new();
    registry.register(MorphRule::list_delete("del", 1.0, "$", 3).unwrap());
    let mut list = json!([1, 2, 3, 4, 5]);

    registry.cycle(&mut list).await;
    assert_eq!(list.as_array().unwrap().len(), 4);

    for _ in 0..10 {
        registry.cycle(&mut list).await;
        assert!(list.as_array().unwrap().len() >= 3);
    }
    assert_eq!(list.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn deletes_from_nested_and_multiple_lists() {
    let registry = MorphRegistry::new();
    registry.register(MorphRule::list_delete("del", 1.0, "$.foo[*].data", 3).unwrap());
    let mut tree = json!({"foo": [{"data": [1, 2, 3, 4, 5]}, {"data": [1, 2, 3, 4, 5]}]});

    registry.cycle(&mut tree).await;

    assert_eq!(tree["foo"][0]["data"].as_array().unwrap().len(), 4);
    assert_eq!(tree["foo"][1]["data"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn inserts_up_to_the_ceiling() {
    let registry = MorphRegistry::new();
    registry.register(MorphRule::list_insert("add", 1.0, "$", 3, constant_donor(json!([1, 2, 3]))).unwrap());
    let mut list = json!([]);

    registry.cycle(&mut list).await;
    assert_eq!(list, json!([1]));
    registry.cycle(&mut list).await;
    assert_eq!(sorted(&list), vec![1, 2]);
    registry.cycle(&mut list).await;
    assert_eq!(sorted(&list), vec![1, 2, 3]);

    for _ in 0..5 {
        registry.cycle(&mut list).await;
        assert_eq!(list.as_array().unwrap().len(), 3);
    }
}

#[tokio::test]
async fn insert_regenerates_donor_when_drained() {
    let registry = MorphRegistry::new();
    let source = constant_donor(json!({"data": [1, 2, 3]}));
    registry.register(MorphRule::list_insert("add", 1.0, "$.data", 10, source).unwrap());
    let mut tree = json!({"data": []});

    for _ in 0..6 {
        registry.cycle(&mut tree).await;
    }

    assert_eq!(sorted(&tree["data"]), vec![1, 1, 2, 2, 3, 3]);
}

#[tokio::test]
async fn inserts_into_deeply_nested_lists() {
    let registry = MorphRegistry::new();
    let source = constant_donor(json!({"data": [{"foo": [1, 2, 3]}]}));
    registry.register(MorphRule::list_insert("add", 1.0, "$.data[*].foo", 10, source).unwrap());
    let mut tree = json!({"data": [{"foo": []}]});

    registry.cycle(&mut tree).await;
    assert_eq!(tree["data"][0], json!({"foo": [1]}));

    registry.cycle(&mut tree).await;
    assert_eq!(sorted(&tree["data"][0]["foo"]), vec![1, 2]);
}

#[tokio::test]
async fn insert_and_delete_on_one_list_respect_both_bounds() {
    let registry = MorphRegistry::new();
    let source = constant_donor(json!({"items": [7, 8, 9]}));
    registry.register(MorphRule::list_insert("add:$.items", 0.7, "$.items", 6, source).unwrap());
    registry.register(MorphRule::list_delete("del:$.items", 0.6, "$.items", 2).unwrap());
    let mut tree = json!({"items": [1, 2, 3, 4]});
    let mut rng = StdRng::seed_from_u64(11);

    for _ in 0..300 {
        registry.cycle_with(&mut tree, &mut rng).await;
        let len = tree["items"].as_array().unwrap().len();
        assert!((2..=6).contains(&len), "length {len} escaped [2, 6]");
    }
}

#[tokio::test]
async fn failing_effect_does_not_block_siblings() {
    let registry = MorphRegistry::new();
    let broken = regenerator(|_| async { Err::<Value, _>(MorphError::generator("faker offline")) });
    registry.register(MorphRule::scalar("broken", 1.0, "$", "a", broken).unwrap());
    registry.register(MorphRule::scalar("working", 1.0, "$", "b", increment()).unwrap());
    let mut tree = json!({"a": 1, "b": 1});

    let report = registry.cycle(&mut tree).await;

    assert_eq!(report.failed, 1);
    assert_eq!(tree, json!({"a": 1, "b": 2}));
}

#[tokio::test]
async fn re_registration_takes_effect_next_cycle() {
    let registry = MorphRegistry::new();
    registry.register(MorphRule::scalar("data", 1.0, "$", "data", increment()).unwrap());
    let mut tree = json!({"data": 0});
    registry.cycle(&mut tree).await;

    let reset = regenerator(|_| async { Ok::<_, MorphError>(json!(-1)) });
    registry.register(MorphRule::scalar("data", 1.0, "$", "data", reset).unwrap());
    registry.cycle(&mut tree).await;

    assert_eq!(registry.len(), 1);
    assert_eq!(tree, json!({"data": -1}));
}

#[tokio::test]
async fn effects_of_one_cycle_run_concurrently() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let registry = MorphRegistry::new();

    let (flight, high) = (Arc::clone(&in_flight), Arc::clone(&peak));
    let slow = regenerator(move |previous| {
        let (flight, high) = (Arc::clone(&flight), Arc::clone(&high));
        async move {
            let now = flight.fetch_add(1, Ordering::SeqCst) + 1;
            high.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            flight.fetch_sub(1, Ordering::SeqCst);
            Ok::<_, MorphError>(previous.unwrap_or(Value::Null))
        }
    });
    registry.register(MorphRule::scalar("slow", 1.0, "$[*]", "v", slow).unwrap());
    let mut tree = json!([{"v": 1}, {"v": 2}, {"v": 3}]);

    registry.cycle(&mut tree).await;

    assert_eq!(peak.load(Ordering::SeqCst), 3);
    assert_eq!(in_flight.load(Ordering::SeqCst), 0);
}
