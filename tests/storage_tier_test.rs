//! Cross-tier storage tests: eviction against durable retention, range
//! reads, sweeping and export through the hybrid facade.

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use solarlink::{AcquisitionSample, HybridStore, HybridStoreConfig};
use tempfile::TempDir;

fn sample_at(address: u16, raw: u16, offset_secs: i64) -> AcquisitionSample {
    AcquisitionSample {
        timestamp: Utc::now() + ChronoDuration::seconds(offset_secs),
        register_address: address,
        register_name: "Vac1".to_string(),
        raw_value: raw,
        scaled_value: f64::from(raw) / 10.0,
        unit: "V".to_string(),
    }
}

fn config_for(dir: &TempDir, memory_capacity: usize) -> HybridStoreConfig {
    HybridStoreConfig {
        memory_capacity,
        enable_durable: true,
        cleanup_interval: Duration::from_secs(3_600),
        retention_days: 30,
        durable_path: dir.path().join("tier.db").to_string_lossy().to_string(),
    }
}

#[tokio::test]
async fn test_memory_evicts_while_durable_retains() {
    let dir = TempDir::new().unwrap();
    let store = HybridStore::new(config_for(&dir, 5)).await.unwrap();

    for i in 0..20u16 {
        store.store(&sample_at(0, i, i64::from(i))).await.unwrap();
    }

    // Memory ring holds the newest five
    let recent = store.recent(0, 0);
    assert_eq!(recent.len(), 5);
    let raws: Vec<u16> = recent.iter().map(|s| s.raw_value).collect();
    assert_eq!(raws, vec![19, 18, 17, 16, 15]);

    // The durable log kept everything
    let durable = store.durable_store().unwrap();
    assert_eq!(durable.samples(0, 0).await.unwrap().len(), 20);
}

#[tokio::test]
async fn test_historical_reads_from_durable() {
    let dir = TempDir::new().unwrap();
    let store = HybridStore::new(config_for(&dir, 2)).await.unwrap();

    let base = Utc::now();
    for i in 0..10u16 {
        let mut sample = sample_at(4, i, 0);
        sample.timestamp = base + ChronoDuration::seconds(i64::from(i));
        store.store(&sample).await.unwrap();
    }

    // Memory only holds two entries, the range read still sees the rest
    let hits = store
        .historical(4, base, base + ChronoDuration::seconds(4))
        .await
        .unwrap();
    assert_eq!(hits.len(), 5);
    // Newest first
    assert_eq!(hits[0].raw_value, 4);
    assert_eq!(hits[4].raw_value, 0);
}

#[tokio::test]
async fn test_store_batch_reaches_both_tiers() {
    let dir = TempDir::new().unwrap();
    let store = HybridStore::new(config_for(&dir, 100)).await.unwrap();

    let batch: Vec<_> = (0..8u16).map(|i| sample_at(2, i, i64::from(i))).collect();
    store.store_batch(&batch).await.unwrap();

    assert_eq!(store.recent(2, 0).len(), 8);
    let durable = store.durable_store().unwrap();
    assert_eq!(durable.samples(2, 0).await.unwrap().len(), 8);

    let stats = store.stats().await;
    assert_eq!(stats.memory.total_samples, 8);
    assert_eq!(stats.durable.unwrap().total_samples, 8);
}

#[tokio::test]
async fn test_sweeper_removes_expired_samples() {
    let dir = TempDir::new().unwrap();
    let mut config = config_for(&dir, 100);
    config.cleanup_interval = Duration::from_millis(50);
    config.retention_days = 30;

    let store = HybridStore::new(config).await.unwrap();
    let durable = store.durable_store().unwrap();

    // One expired sample, one fresh
    durable
        .store(&sample_at(0, 1, -40 * 24 * 60 * 60))
        .await
        .unwrap();
    durable.store(&sample_at(0, 2, 0)).await.unwrap();

    store.start_sweeper();
    tokio::time::sleep(Duration::from_millis(300)).await;
    store.stop_sweeper().await;

    let remaining = durable.samples(0, 0).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].raw_value, 2);
}

#[tokio::test]
async fn test_export_through_durable_tier() {
    let dir = TempDir::new().unwrap();
    let store = HybridStore::new(config_for(&dir, 100)).await.unwrap();

    let base = Utc::now();
    for i in 0..3u16 {
        store.store(&sample_at(1, 100 + i, i64::from(i))).await.unwrap();
    }

    let durable = store.durable_store().unwrap();
    let csv_path = dir.path().join("window.csv");
    let exported = durable
        .export_csv(
            &csv_path,
            &[],
            base - ChronoDuration::seconds(10),
            base + ChronoDuration::seconds(10),
        )
        .await
        .unwrap();
    assert_eq!(exported, 3);

    let body = std::fs::read_to_string(&csv_path).unwrap();
    assert!(body.starts_with("Timestamp,Register,Name,RawValue,ScaledValue,Unit\n"));
    assert_eq!(body.lines().count(), 4);
}
