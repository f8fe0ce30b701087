//! End-to-end scenarios from the cache's testable-properties list, run
//! against `MemoryCacheEngine` with `FixedClock`/`FixedRandom` so every
//! assertion is made at an exact, reproducible instant.

use kvlite::clock::FixedClock;
use kvlite::engine::memory::MemoryCacheEngine;
use kvlite::engine::CacheEngine;
use kvlite::entry::{CountMode, ParentRef};
use kvlite::hash::KeyHasher;
use kvlite::settings::Settings;
use serial_test::serial;
use std::sync::Arc;

fn engine_at(start: i64, settings: Settings) -> (MemoryCacheEngine, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::new(start));
    let engine = MemoryCacheEngine::builder(settings)
        .with_clock(Arc::clone(&clock) as Arc<dyn kvlite::Clock>)
        .build();
    (engine, clock)
}

#[tokio::test]
#[serial]
async fn static_round_trip_bumps_then_expires() {
    let settings = Settings::builder().static_interval_in_days(10).build();
    let (engine, clock) = engine_at(0, settings);

    engine.add_static(Some("P"), "K", &"hello", &[]).await.unwrap();
    let value = engine.peek_item(Some("P"), "K").await.unwrap().unwrap();
    assert_eq!(value.utc_expiry, 10 * 86_400);

    clock.set(9 * 86_400);
    let got: Option<String> = engine.get(Some("P"), "K").await.unwrap();
    assert_eq!(got.as_deref(), Some("hello"));
    let bumped = engine.peek_item(Some("P"), "K").await.unwrap().unwrap();
    assert_eq!(bumped.utc_expiry, 9 * 86_400 + 10 * 86_400);

    clock.set(30 * 86_400);
    let got: Option<String> = engine.get(Some("P"), "K").await.unwrap();
    assert_eq!(got, None);
    assert_eq!(engine.count(Some("P"), CountMode::ConsiderExpiry).await.unwrap(), 0);
}

#[tokio::test]
#[serial]
async fn timed_expiry_does_not_bump_on_read() {
    let (engine, clock) = engine_at(0, Settings::default());
    engine.add_timed(Some("P"), "K", &"v", 60, &[]).await.unwrap();

    clock.set(30);
    let got: Option<String> = engine.get(Some("P"), "K").await.unwrap();
    assert_eq!(got.as_deref(), Some("v"));
    let value = engine.peek_item(Some("P"), "K").await.unwrap().unwrap();
    assert_eq!(value.utc_expiry, 60);

    clock.set(61);
    let got: Option<String> = engine.get(Some("P"), "K").await.unwrap();
    assert_eq!(got, None);
}

#[tokio::test]
#[serial]
async fn sliding_bump_extends_expiry_then_lapses() {
    let (engine, clock) = engine_at(0, Settings::default());
    engine.add_sliding(Some("P"), "K", &"v", 10, &[]).await.unwrap();

    clock.set(5);
    let got: Option<String> = engine.get(Some("P"), "K").await.unwrap();
    assert_eq!(got.as_deref(), Some("v"));
    let value = engine.peek_item(Some("P"), "K").await.unwrap().unwrap();
    assert!(value.utc_expiry >= 15);

    clock.set(20);
    let got: Option<String> = engine.get(Some("P"), "K").await.unwrap();
    assert_eq!(got, None);
}

#[tokio::test]
#[serial]
async fn parent_removal_cascades_transitively() {
    let (engine, _clock) = engine_at(0, Settings::default());
    engine.add_static(Some("P"), "parent", &"x", &[]).await.unwrap();
    let parent_hash = kvlite::hash::XxHasher64.hash("P", "parent");
    engine
        .add_static(
            Some("P"),
            "child",
            &"y",
            &[ParentRef { hash: parent_hash, key: "parent".into() }],
        )
        .await
        .unwrap();
    let child_hash = kvlite::hash::XxHasher64.hash("P", "child");
    engine
        .add_static(
            Some("P"),
            "grandchild",
            &"z",
            &[ParentRef { hash: child_hash, key: "child".into() }],
        )
        .await
        .unwrap();

    engine.remove(Some("P"), "parent").await.unwrap();
    assert!(!engine.contains(Some("P"), "child").await.unwrap());
    assert!(!engine.contains(Some("P"), "grandchild").await.unwrap());
}

#[tokio::test]
#[serial]
async fn second_write_overwrites_the_first() {
    let (engine, _clock) = engine_at(0, Settings::default());
    engine.add_static(Some("P"), "K", &"first", &[]).await.unwrap();
    engine.add_static(Some("P"), "K", &"second", &[]).await.unwrap();

    let got: Option<String> = engine.get(Some("P"), "K").await.unwrap();
    assert_eq!(got.as_deref(), Some("second"));
    assert_eq!(engine.count(Some("P"), CountMode::ConsiderExpiry).await.unwrap(), 1);
}

#[tokio::test]
#[serial]
async fn count_over_partitions_sums_to_the_global_count() {
    let (engine, _clock) = engine_at(0, Settings::default());
    engine.add_static(Some("a"), "k1", &"v", &[]).await.unwrap();
    engine.add_static(Some("a"), "k2", &"v", &[]).await.unwrap();
    engine.add_static(Some("b"), "k1", &"v", &[]).await.unwrap();

    let a = engine.count(Some("a"), CountMode::ConsiderExpiry).await.unwrap();
    let b = engine.count(Some("b"), CountMode::ConsiderExpiry).await.unwrap();
    let total = engine.count(None, CountMode::ConsiderExpiry).await.unwrap();
    assert_eq!(a + b, total);
}

#[tokio::test]
#[serial]
async fn clear_with_consider_expiry_never_removes_a_live_row() {
    let (engine, clock) = engine_at(0, Settings::default());
    engine.add_timed(Some("P"), "expired", &"v", 10, &[]).await.unwrap();
    engine.add_timed(Some("P"), "alive", &"v", 1_000, &[]).await.unwrap();
    clock.set(20);

    let removed = engine.clear(Some("P"), CountMode::ConsiderExpiry).await.unwrap();
    assert_eq!(removed, 1);
    assert!(engine.contains(Some("P"), "alive").await.unwrap());
    assert!(!engine.contains(Some("P"), "expired").await.unwrap());
}

#[tokio::test]
#[serial]
async fn clear_with_ignore_expiry_removes_everything_in_scope() {
    let (engine, _clock) = engine_at(0, Settings::default());
    engine.add_static(Some("P"), "k1", &"v", &[]).await.unwrap();
    engine.add_static(Some("P"), "k2", &"v", &[]).await.unwrap();
    engine.add_static(Some("Q"), "k1", &"v", &[]).await.unwrap();

    let removed = engine.clear(Some("P"), CountMode::IgnoreExpiry).await.unwrap();
    assert_eq!(removed, 2);
    assert!(engine.contains(Some("Q"), "k1").await.unwrap());
}

#[tokio::test]
#[serial]
async fn size_eviction_keeps_size_under_the_soft_limit() {
    let settings = Settings::builder()
        .max_cache_size_in_mb(1)
        .insertion_count_before_cleanup(1)
        .build();
    let (engine, _clock) = engine_at(0, settings);

    let payload = vec![0u8; 2048];
    for i in 0..2_000 {
        engine
            .add_timed(Some("P"), &format!("k{i}"), &payload, 1_000_000 + i as i64, &[])
            .await
            .unwrap();
    }
    engine.run_eviction_pass();

    let size = engine.get_cache_size_in_bytes().await.unwrap();
    assert!(size <= 1024 * 1024, "expected <= 1 MiB, got {size}");
}

#[tokio::test]
#[serial]
async fn get_or_add_static_only_invokes_the_factory_once() {
    let (engine, _clock) = engine_at(0, Settings::default());
    let calls = std::sync::atomic::AtomicUsize::new(0);

    let first = engine
        .get_or_add_static(Some("P"), "K", &[], || async {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok("computed".to_string())
        })
        .await
        .unwrap();
    assert_eq!(first, "computed");

    let second: String = engine
        .get_or_add_static(Some("P"), "K", &[], || async {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok("recomputed".to_string())
        })
        .await
        .unwrap();
    assert_eq!(second, "computed");
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}
