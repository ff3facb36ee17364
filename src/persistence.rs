use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{PtsError, Result};
use crate::pts::command::PresetType;

pub const DEFAULT_TRANSACTIONS_PATH: &str = "fuel_transactions.jsonl";

/// Durable record of a finalized fueling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuelTransactionRecord {
    pub station_id: u64,
    pub pump_number: u32,
    pub nozzle_number: u32,
    pub volume: f64,
    pub amount: f64,
    pub price: Option<f64>,
    pub employee_id: u64,
    pub pts_transaction_id: Option<u64>,
    pub preset_type: PresetType,
    pub preset_dose: Option<f64>,
    pub authorized_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Where finalized transactions go; returns the assigned identifier.
#[async_trait]
pub trait TransactionSink: Send + Sync {
    async fn persist(&self, record: &FuelTransactionRecord) -> Result<u64>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    id: u64,
    #[serde(flatten)]
    record: FuelTransactionRecord,
}

/// Append-only JSON-lines file of transaction records.
pub struct JsonlTransactionStore {
    path: PathBuf,
    last_id: Mutex<u64>,
}

impl JsonlTransactionStore {
    /// Opens (or prepares to create) the file, resuming id numbering.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let last_id = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents
                .lines()
                .filter(|l| !l.trim().is_empty())
                .filter_map(|l| serde_json::from_str::<StoredRecord>(l).ok())
                .map(|r| r.id)
                .max()
                .unwrap_or(0),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => {
                return Err(PtsError::Persistence(format!(
                    "cannot read {}: {e}",
                    path.display()
                )))
            }
        };

        log::info!(
            "[STORE] transaction file {} (last id {})",
            path.display(),
            last_id
        );
        Ok(Self {
            path,
            last_id: Mutex::new(last_id),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TransactionSink for JsonlTransactionStore {
    async fn persist(&self, record: &FuelTransactionRecord) -> Result<u64> {
        let mut last_id = self.last_id.lock().await;
        let id = *last_id + 1;

        let mut line = serde_json::to_string(&StoredRecord {
            id,
            record: record.clone(),
        })?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| PtsError::Persistence(format!("cannot open {}: {e}", self.path.display())))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| PtsError::Persistence(format!("cannot append to {}: {e}", self.path.display())))?;
        file.flush()
            .await
            .map_err(|e| PtsError::Persistence(e.to_string()))?;

        *last_id = id;
        Ok(id)
    }
}

/// Collects records in memory; can be told to fail.
#[cfg(test)]
#[derive(Default)]
pub struct MemorySink {
    pub records: parking_lot::Mutex<Vec<FuelTransactionRecord>>,
    next: std::sync::atomic::AtomicU64,
    pub fail: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
#[async_trait]
impl TransactionSink for MemorySink {
    async fn persist(&self, record: &FuelTransactionRecord) -> Result<u64> {
        use std::sync::atomic::Ordering;
        if self.fail.load(Ordering::SeqCst) {
            return Err(PtsError::Persistence("database unavailable".into()));
        }
        self.records.lock().push(record.clone());
        Ok(self.next.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pump: u32) -> FuelTransactionRecord {
        let now = Utc::now();
        FuelTransactionRecord {
            station_id: 1,
            pump_number: pump,
            nozzle_number: 1,
            volume: 10.0,
            amount: 16.2,
            price: Some(1.62),
            employee_id: 7,
            pts_transaction_id: Some(100),
            preset_type: PresetType::Volume,
            preset_dose: Some(10.0),
            authorized_at: now,
            completed_at: now,
        }
    }

    #[tokio::test]
    async fn assigns_sequential_ids_and_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tx.jsonl");

        let store = JsonlTransactionStore::open(&path).await.unwrap();
        assert_eq!(store.persist(&record(1)).await.unwrap(), 1);
        assert_eq!(store.persist(&record(2)).await.unwrap(), 2);

        let reopened = JsonlTransactionStore::open(&path).await.unwrap();
        assert_eq!(reopened.persist(&record(3)).await.unwrap(), 3);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["id"], 1);
        assert_eq!(first["pumpNumber"], 1);
        assert_eq!(first["ptsTransactionId"], 100);
    }
}
