//! Same scenario coverage as `memory_engine.rs`, run against a SQLite-backed
//! `DbCacheEngine` to exercise the `dialect`/`connection` layer end to end.

use kvlite::clock::FixedClock;
use kvlite::connection::{ConnectionFactory, SqlxConnectionFactory};
use kvlite::engine::db::DbCacheEngine;
use kvlite::engine::CacheEngine;
use kvlite::entry::{CountMode, ParentRef};
use kvlite::hash::{KeyHasher, XxHasher64};
use kvlite::settings::{Settings, SettingsHandle};
use serial_test::serial;
use std::sync::Arc;

async fn engine_at(start: i64, mut settings: Settings) -> (DbCacheEngine, Arc<FixedClock>) {
    settings.connection_string = "sqlite::memory:".to_string();
    let handle = SettingsHandle::new(settings.clone());
    let connection = Arc::new(
        SqlxConnectionFactory::connect(handle)
            .await
            .expect("sqlite::memory: always connects"),
    );
    connection.ensure_schema().await.expect("schema creation succeeds");

    let clock = Arc::new(FixedClock::new(start));
    let engine = DbCacheEngine::builder(connection, settings)
        .with_clock(Arc::clone(&clock) as Arc<dyn kvlite::Clock>)
        .build();
    (engine, clock)
}

#[tokio::test]
#[serial]
async fn static_round_trip_bumps_then_expires() {
    let settings = Settings::builder().static_interval_in_days(10).build();
    let (engine, clock) = engine_at(0, settings).await;

    engine.add_static(Some("P"), "K", &"hello", &[]).await.unwrap();
    let value = engine.peek_item(Some("P"), "K").await.unwrap().unwrap();
    assert_eq!(value.utc_expiry, 10 * 86_400);

    clock.set(9 * 86_400);
    let got: Option<String> = engine.get(Some("P"), "K").await.unwrap();
    assert_eq!(got.as_deref(), Some("hello"));

    clock.set(30 * 86_400);
    let got: Option<String> = engine.get(Some("P"), "K").await.unwrap();
    assert_eq!(got, None);
}

#[tokio::test]
#[serial]
async fn timed_expiry_does_not_bump_on_read() {
    let (engine, clock) = engine_at(0, Settings::default()).await;
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
async fn parent_removal_cascades_transitively() {
    let (engine, _clock) = engine_at(0, Settings::default()).await;
    engine.add_static(Some("P"), "parent", &"x", &[]).await.unwrap();
    let parent_hash = XxHasher64.hash("P", "parent");
    engine
        .add_static(
            Some("P"),
            "child",
            &"y",
            &[ParentRef { hash: parent_hash, key: "parent".into() }],
        )
        .await
        .unwrap();

    engine.remove(Some("P"), "parent").await.unwrap();
    assert!(!engine.contains(Some("P"), "child").await.unwrap());
}

#[tokio::test]
#[serial]
async fn second_write_overwrites_the_first() {
    let (engine, _clock) = engine_at(0, Settings::default()).await;
    engine.add_static(Some("P"), "K", &"first", &[]).await.unwrap();
    engine.add_static(Some("P"), "K", &"second", &[]).await.unwrap();

    let got: Option<String> = engine.get(Some("P"), "K").await.unwrap();
    assert_eq!(got.as_deref(), Some("second"));
    assert_eq!(engine.count(Some("P"), CountMode::ConsiderExpiry).await.unwrap(), 1);
}

#[tokio::test]
#[serial]
async fn clear_with_consider_expiry_never_removes_a_live_row() {
    let (engine, clock) = engine_at(0, Settings::default()).await;
    engine.add_timed(Some("P"), "expired", &"v", 10, &[]).await.unwrap();
    engine.add_timed(Some("P"), "alive", &"v", 1_000, &[]).await.unwrap();
    clock.set(20);

    let removed = engine.clear(Some("P"), CountMode::ConsiderExpiry).await.unwrap();
    assert_eq!(removed, 1);
    assert!(engine.contains(Some("P"), "alive").await.unwrap());
}

#[tokio::test]
#[serial]
async fn get_items_returns_every_visible_entry_in_partition() {
    let (engine, _clock) = engine_at(0, Settings::default()).await;
    engine.add_static(Some("P"), "k1", &"v1".to_string(), &[]).await.unwrap();
    engine.add_static(Some("P"), "k2", &"v2".to_string(), &[]).await.unwrap();
    engine.add_static(Some("Q"), "k3", &"v3".to_string(), &[]).await.unwrap();

    let mut items: Vec<String> = engine.get_items(Some("P")).await.unwrap();
    items.sort();
    assert_eq!(items, vec!["v1".to_string(), "v2".to_string()]);
}
