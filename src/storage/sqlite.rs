//! Durable sample store
//!
//! Append-only time-indexed log backed by SQLite (WAL journal, tuned for
//! edge deployment). Writes are durable before the call returns; range
//! queries come back newest first. Also persists the register catalogue and
//! implements the CSV/JSON export contract.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::error::{LinkError, Result};
use crate::registry::{AccessType, RegisterConfig};
use crate::sample::AcquisitionSample;
use crate::storage::StorageStats;

const EXPORT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// SQLite-backed durable store
pub struct SqliteStore {
    pool: SqlitePool,
    db_path: String,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run the schema migration.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db_path = path.as_ref().to_string_lossy().to_string();

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool, db_path };
        store.initialize_schema().await?;

        info!("Durable store opened: {}", store.db_path);
        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                register_address INTEGER NOT NULL,
                register_name TEXT NOT NULL,
                raw_value INTEGER NOT NULL,
                scaled_value REAL NOT NULL,
                unit TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_samples_register_time
             ON samples(register_address, timestamp_ms)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS register_configs (
                register_address INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                unit TEXT,
                gain REAL NOT NULL,
                access TEXT NOT NULL,
                description TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Append one sample. Durable once this returns.
    pub async fn store(&self, sample: &AcquisitionSample) -> Result<()> {
        sqlx::query(
            "INSERT INTO samples
             (register_address, register_name, raw_value, scaled_value, unit, timestamp_ms)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(i64::from(sample.register_address))
        .bind(&sample.register_name)
        .bind(i64::from(sample.raw_value))
        .bind(sample.scaled_value)
        .bind(&sample.unit)
        .bind(sample.timestamp.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Append a batch of samples in one transaction.
    pub async fn store_batch(&self, samples: &[AcquisitionSample]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for sample in samples {
            sqlx::query(
                "INSERT INTO samples
                 (register_address, register_name, raw_value, scaled_value, unit, timestamp_ms)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(i64::from(sample.register_address))
            .bind(&sample.register_name)
            .bind(i64::from(sample.raw_value))
            .bind(sample.scaled_value)
            .bind(&sample.unit)
            .bind(sample.timestamp.timestamp_millis())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    /// Last `count` samples for a register, newest first (`0` = unlimited).
    pub async fn samples(
        &self,
        register_address: u16,
        count: usize,
    ) -> Result<Vec<AcquisitionSample>> {
        let limit = if count == 0 { -1 } else { count as i64 };
        let rows = sqlx::query(
            "SELECT register_address, register_name, raw_value, scaled_value, unit, timestamp_ms
             FROM samples WHERE register_address = ?
             ORDER BY timestamp_ms DESC LIMIT ?",
        )
        .bind(i64::from(register_address))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_sample).collect()
    }

    /// Samples with `start <= timestamp <= end`, newest first.
    pub async fn samples_in_range(
        &self,
        register_address: u16,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AcquisitionSample>> {
        let rows = sqlx::query(
            "SELECT register_address, register_name, raw_value, scaled_value, unit, timestamp_ms
             FROM samples WHERE register_address = ? AND timestamp_ms BETWEEN ? AND ?
             ORDER BY timestamp_ms DESC",
        )
        .bind(i64::from(register_address))
        .bind(start.timestamp_millis())
        .bind(end.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_sample).collect()
    }

    /// Delete samples older than the retention horizon. Returns the number
    /// of deleted rows.
    pub async fn cleanup(&self, retention_days: u32) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
        let result = sqlx::query("DELETE FROM samples WHERE timestamp_ms < ?")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            info!("Retention sweep deleted {deleted} samples older than {retention_days} days");
        } else {
            debug!("Retention sweep found nothing to delete");
        }
        Ok(deleted)
    }

    /// Persist the register catalogue alongside the samples.
    pub async fn store_register_configs(
        &self,
        configs: &BTreeMap<u16, RegisterConfig>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (address, config) in configs {
            sqlx::query(
                "INSERT OR REPLACE INTO register_configs
                 (register_address, name, unit, gain, access, description)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(i64::from(*address))
            .bind(&config.name)
            .bind(&config.unit)
            .bind(config.gain)
            .bind(access_label(config.access))
            .bind(&config.description)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    /// Export samples in a time window to CSV. Empty `register_filter`
    /// exports every register. Returns the number of exported rows.
    pub async fn export_csv(
        &self,
        path: impl AsRef<Path>,
        register_filter: &[u16],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64> {
        let samples = self.export_window(register_filter, start, end).await?;

        let mut out = String::from("Timestamp,Register,Name,RawValue,ScaledValue,Unit\n");
        for sample in &samples {
            let local = sample.timestamp.with_timezone(&Local);
            out.push_str(&format!(
                "{},{},{},{},{:.2},{}\n",
                local.format(EXPORT_TIMESTAMP_FORMAT),
                sample.register_address,
                sample.register_name,
                sample.raw_value,
                sample.scaled_value,
                sample.unit
            ));
        }
        std::fs::write(path.as_ref(), out)?;

        info!(
            "Exported {} samples to {} (CSV)",
            samples.len(),
            path.as_ref().display()
        );
        Ok(samples.len() as u64)
    }

    /// Export samples in a time window to JSON (`{"samples": [...]}`).
    pub async fn export_json(
        &self,
        path: impl AsRef<Path>,
        register_filter: &[u16],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64> {
        let samples = self.export_window(register_filter, start, end).await?;

        let entries: Vec<serde_json::Value> = samples
            .iter()
            .map(|sample| {
                let local = sample.timestamp.with_timezone(&Local);
                serde_json::json!({
                    "timestamp": local.format(EXPORT_TIMESTAMP_FORMAT).to_string(),
                    "register_address": sample.register_address,
                    "register_name": sample.register_name,
                    "raw_value": sample.raw_value,
                    "scaled_value": (sample.scaled_value * 100.0).round() / 100.0,
                    "unit": sample.unit,
                })
            })
            .collect();

        let document = serde_json::json!({ "samples": entries });
        let body = serde_json::to_string_pretty(&document)
            .map_err(|e| LinkError::storage(format!("JSON export failed: {e}")))?;
        std::fs::write(path.as_ref(), body)?;

        info!(
            "Exported {} samples to {} (JSON)",
            samples.len(),
            path.as_ref().display()
        );
        Ok(samples.len() as u64)
    }

    async fn export_window(
        &self,
        register_filter: &[u16],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AcquisitionSample>> {
        let rows = sqlx::query(
            "SELECT register_address, register_name, raw_value, scaled_value, unit, timestamp_ms
             FROM samples WHERE timestamp_ms BETWEEN ? AND ?
             ORDER BY timestamp_ms ASC",
        )
        .bind(start.timestamp_millis())
        .bind(end.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        let filter: HashSet<u16> = register_filter.iter().copied().collect();
        rows.iter()
            .map(row_to_sample)
            .filter(|result| match result {
                Ok(sample) => filter.is_empty() || filter.contains(&sample.register_address),
                Err(_) => true,
            })
            .collect()
    }

    pub async fn stats(&self) -> Result<StorageStats> {
        let mut stats = StorageStats::default();

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM samples")
            .fetch_one(&self.pool)
            .await?;
        stats.total_samples = total as u64;

        let rows = sqlx::query(
            "SELECT register_address, COUNT(*) AS n FROM samples GROUP BY register_address",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in &rows {
            let address: i64 = row.try_get("register_address")?;
            let count: i64 = row.try_get("n")?;
            stats
                .samples_by_register
                .insert(address as u16, count as u64);
        }

        let row = sqlx::query("SELECT MIN(timestamp_ms) AS oldest, MAX(timestamp_ms) AS newest FROM samples")
            .fetch_one(&self.pool)
            .await?;
        let oldest: Option<i64> = row.try_get("oldest")?;
        let newest: Option<i64> = row.try_get("newest")?;
        stats.oldest_sample_time = oldest.and_then(DateTime::from_timestamp_millis);
        stats.newest_sample_time = newest.and_then(DateTime::from_timestamp_millis);

        stats.storage_size_bytes = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(stats)
    }
}

fn access_label(access: AccessType) -> &'static str {
    match access {
        AccessType::ReadOnly => "Read",
        AccessType::WriteOnly => "Write",
        AccessType::ReadWrite => "Read/Write",
    }
}

fn row_to_sample(row: &sqlx::sqlite::SqliteRow) -> Result<AcquisitionSample> {
    let address: i64 = row.try_get("register_address")?;
    let name: String = row.try_get("register_name")?;
    let raw: i64 = row.try_get("raw_value")?;
    let scaled: f64 = row.try_get("scaled_value")?;
    let unit: String = row.try_get("unit")?;
    let timestamp_ms: i64 = row.try_get("timestamp_ms")?;

    let timestamp = DateTime::from_timestamp_millis(timestamp_ms)
        .ok_or_else(|| LinkError::storage(format!("invalid stored timestamp: {timestamp_ms}")))?;

    Ok(AcquisitionSample {
        timestamp,
        register_address: address as u16,
        register_name: name,
        raw_value: raw as u16,
        scaled_value: scaled,
        unit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    fn sample_at(addr: u16, raw: u16, timestamp: DateTime<Utc>) -> AcquisitionSample {
        AcquisitionSample {
            timestamp,
            register_address: addr,
            register_name: "Vac1".to_string(),
            raw_value: raw,
            scaled_value: f64::from(raw) / 10.0,
            unit: "V".to_string(),
        }
    }

    async fn open_store(dir: &TempDir) -> SqliteStore {
        SqliteStore::open(dir.path().join("test.db")).await.unwrap()
    }

    #[tokio::test]
    async fn test_store_and_query_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let base = Utc::now();

        for i in 0..5u16 {
            store
                .store(&sample_at(0, i, base + ChronoDuration::seconds(i64::from(i))))
                .await
                .unwrap();
        }

        let samples = store.samples(0, 3).await.unwrap();
        let raws: Vec<u16> = samples.iter().map(|s| s.raw_value).collect();
        assert_eq!(raws, vec![4, 3, 2]);

        // Zero means unlimited
        assert_eq!(store.samples(0, 0).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_batch_and_range_query() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let base = Utc::now();

        let batch: Vec<_> = (0..10u16)
            .map(|i| sample_at(9, i, base + ChronoDuration::seconds(i64::from(i))))
            .collect();
        store.store_batch(&batch).await.unwrap();

        let hits = store
            .samples_in_range(9, base + ChronoDuration::seconds(2), base + ChronoDuration::seconds(4))
            .await
            .unwrap();
        let raws: Vec<u16> = hits.iter().map(|s| s.raw_value).collect();
        assert_eq!(raws, vec![4, 3, 2]);
    }

    #[tokio::test]
    async fn test_cleanup_removes_expired() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let now = Utc::now();

        store
            .store(&sample_at(0, 1, now - ChronoDuration::days(40)))
            .await
            .unwrap();
        store.store(&sample_at(0, 2, now)).await.unwrap();

        let deleted = store.cleanup(30).await.unwrap();
        assert_eq!(deleted, 1);

        let remaining = store.samples(0, 0).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].raw_value, 2);
    }

    #[tokio::test]
    async fn test_stats() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let base = Utc::now();

        store.store(&sample_at(0, 1, base)).await.unwrap();
        store
            .store(&sample_at(0, 2, base + ChronoDuration::seconds(1)))
            .await
            .unwrap();
        store
            .store(&sample_at(3, 7, base + ChronoDuration::seconds(2)))
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_samples, 3);
        assert_eq!(stats.samples_by_register.get(&0), Some(&2));
        assert_eq!(stats.samples_by_register.get(&3), Some(&1));
        assert!(stats.oldest_sample_time.unwrap() <= stats.newest_sample_time.unwrap());
        assert!(stats.storage_size_bytes > 0);
    }

    #[tokio::test]
    async fn test_export_csv_contract() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let base = Utc::now();

        store.store(&sample_at(0, 2308, base)).await.unwrap();
        store
            .store(&sample_at(5, 100, base + ChronoDuration::seconds(1)))
            .await
            .unwrap();

        let csv_path = dir.path().join("export.csv");
        let exported = store
            .export_csv(
                &csv_path,
                &[],
                base - ChronoDuration::seconds(10),
                base + ChronoDuration::seconds(10),
            )
            .await
            .unwrap();
        assert_eq!(exported, 2);

        let body = std::fs::read_to_string(&csv_path).unwrap();
        let mut lines = body.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Timestamp,Register,Name,RawValue,ScaledValue,Unit"
        );
        let first = lines.next().unwrap();
        assert!(first.contains(",0,Vac1,2308,230.80,V"), "line was: {first}");
    }

    #[tokio::test]
    async fn test_export_csv_register_filter() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let base = Utc::now();

        store.store(&sample_at(0, 1, base)).await.unwrap();
        store.store(&sample_at(5, 2, base)).await.unwrap();

        let csv_path = dir.path().join("filtered.csv");
        let exported = store
            .export_csv(
                &csv_path,
                &[5],
                base - ChronoDuration::seconds(10),
                base + ChronoDuration::seconds(10),
            )
            .await
            .unwrap();
        assert_eq!(exported, 1);
    }

    #[tokio::test]
    async fn test_export_json_contract() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let base = Utc::now();

        store.store(&sample_at(7, 2308, base)).await.unwrap();

        let json_path = dir.path().join("export.json");
        store
            .export_json(
                &json_path,
                &[],
                base - ChronoDuration::seconds(10),
                base + ChronoDuration::seconds(10),
            )
            .await
            .unwrap();

        let body = std::fs::read_to_string(&json_path).unwrap();
        let document: serde_json::Value = serde_json::from_str(&body).unwrap();
        let samples = document["samples"].as_array().unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0]["register_address"], 7);
        assert_eq!(samples[0]["register_name"], "Vac1");
        assert_eq!(samples[0]["raw_value"], 2308);
        assert_eq!(samples[0]["scaled_value"], 230.8);
    }

    #[tokio::test]
    async fn test_register_configs_persisted() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let mut configs = BTreeMap::new();
        configs.insert(
            8,
            RegisterConfig {
                address: 8,
                name: "Export power".to_string(),
                unit: "%".to_string(),
                gain: 1.0,
                access: AccessType::ReadWrite,
                description: "Export power setpoint".to_string(),
            },
        );
        store.store_register_configs(&configs).await.unwrap();

        // Replacing is allowed
        store.store_register_configs(&configs).await.unwrap();
    }
}
