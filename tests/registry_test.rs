mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use analysis_engine::{EngineRegistry, Variant};
use common::{fake_engine, settings};

#[tokio::test]
async fn test_lazy_pool_startup_does_not_block_other_variant() {
    let registry = Arc::new(EngineRegistry::new(
        fake_engine("normal"),
        fake_engine("slowstart"),
        settings(1),
    ));
    registry.pool(Variant::Primary).await;

    let starting = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.pool(Variant::Alternate).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let primary = registry.pool(Variant::Primary).await;
    let alternate_stats = registry.stats(Variant::Alternate).await;
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(primary.variant(), Variant::Primary);
    assert!(!alternate_stats.initialized);

    let alternate = starting.await.unwrap();
    assert_eq!(alternate.stats().idle, 1);
    assert!(registry.stats(Variant::Alternate).await.initialized);

    registry.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_first_use_builds_one_pool() {
    let registry = Arc::new(EngineRegistry::new(
        fake_engine("normal"),
        fake_engine("normal"),
        settings(2),
    ));

    let (a, b) = tokio::join!(registry.pool(Variant::Alternate), registry.pool(Variant::Alternate));
    assert_eq!(a.stats(), b.stats());
    assert_eq!(registry.stats(Variant::Alternate).await.idle, 2);

    registry.shutdown().await;
    assert!(a.is_shutting_down());
    assert!(b.is_shutting_down());
}
