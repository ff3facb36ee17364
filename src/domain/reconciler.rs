use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::config::{AuthorizationPolicy, ReconcileConfig};
use crate::error::{PtsError, Result};
use crate::persistence::{FuelTransactionRecord, TransactionSink};
use crate::pts::command::PresetType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingState {
    Authorized,
    InProgress,
    /// Being persisted; the slot stays taken until the write settles.
    Completing,
}

/// What the route layer knows at authorization time.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationRequest {
    pub employee_id: u64,
    pub station_id: u64,
    pub pump_number: u32,
    pub nozzle_number: u32,
    pub preset_type: PresetType,
    pub preset_dose: Option<f64>,
    pub price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransaction {
    pub pump_number: u32,
    pub employee_id: u64,
    pub station_id: u64,
    pub nozzle_number: u32,
    pub preset_type: PresetType,
    pub preset_dose: Option<f64>,
    pub price: Option<f64>,
    pub authorized_at: DateTime<Utc>,
    pub volume: f64,
    pub amount: f64,
    pub pts_transaction_id: Option<u64>,
    pub status: PendingState,
}

/// Values supplied when closing; anything present wins over cached values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionData {
    pub volume: Option<f64>,
    pub amount: Option<f64>,
    pub price: Option<f64>,
    pub nozzle_number: Option<u32>,
    pub pts_transaction_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletedTransaction {
    pub id: u64,
    pub record: FuelTransactionRecord,
}

/// Tracks authorized-but-unfinished transactions, one per pump.
///
/// Every operation for a pump takes the entry out of (or puts it into) the map
/// under the lock, so authorize, update and complete for one pump cannot
/// interleave. The lock is never held across the persistence call.
pub struct TransactionReconciler {
    pending: Mutex<HashMap<u32, PendingTransaction>>,
    sink: Arc<dyn TransactionSink>,
    config: ReconcileConfig,
}

impl TransactionReconciler {
    pub fn new(sink: Arc<dyn TransactionSink>, config: ReconcileConfig) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            sink,
            config,
        }
    }

    pub fn create_pending_transaction(&self, request: AuthorizationRequest) -> Result<PendingTransaction> {
        self.reserve(request).map(|(pending, _)| pending)
    }

    /// Creates the pump's pending entry, returning any entry it displaced.
    pub fn reserve(
        &self,
        request: AuthorizationRequest,
    ) -> Result<(PendingTransaction, Option<PendingTransaction>)> {
        validate(&request)?;

        let pending = PendingTransaction {
            pump_number: request.pump_number,
            employee_id: request.employee_id,
            station_id: request.station_id,
            nozzle_number: request.nozzle_number,
            preset_type: request.preset_type,
            preset_dose: request.preset_dose,
            price: request.price,
            authorized_at: Utc::now(),
            volume: 0.0,
            amount: 0.0,
            pts_transaction_id: None,
            status: PendingState::Authorized,
        };

        let pump = request.pump_number;
        let mut map = self.pending.lock();
        if let Some(existing) = map.get(&pump) {
            if existing.status == PendingState::Completing
                || self.config.policy == AuthorizationPolicy::Reject
            {
                log::warn!(
                    "[RECONCILE] pump {} already authorized at {}, rejecting",
                    pump,
                    existing.authorized_at
                );
                return Err(PtsError::Conflict { pump });
            }
            log::warn!(
                "[RECONCILE] pump {} superseding pending transaction from {}",
                pump,
                existing.authorized_at
            );
        }
        let displaced = map.insert(pump, pending.clone());
        log::info!(
            "[RECONCILE] pump {} authorized by employee {}",
            pump,
            pending.employee_id
        );
        Ok((pending, displaced))
    }

    /// Undoes a [`reserve`](Self::reserve) whose device command failed.
    ///
    /// Puts back the displaced entry (or frees the slot) as long as the
    /// reservation is still the current entry. Returns whether it was.
    pub fn release(&self, reserved: &PendingTransaction, displaced: Option<PendingTransaction>) -> bool {
        let pump = reserved.pump_number;
        let mut map = self.pending.lock();
        let current = map.get(&pump).is_some_and(|tx| {
            tx.authorized_at == reserved.authorized_at && tx.status != PendingState::Completing
        });
        if !current {
            return false;
        }
        match displaced {
            Some(previous) => {
                log::info!("[RECONCILE] pump {} restored previous pending transaction", pump);
                map.insert(pump, previous);
            }
            None => {
                map.remove(&pump);
                log::info!("[RECONCILE] pump {} reservation released", pump);
            }
        }
        true
    }

    /// Overwrites volume/amount with the device's latest report.
    ///
    /// Returns the updated entry, or `None` when no transaction is pending.
    pub fn observe(
        &self,
        pump: u32,
        volume: Option<f64>,
        amount: Option<f64>,
        pts_transaction_id: Option<u64>,
    ) -> Option<PendingTransaction> {
        let mut map = self.pending.lock();
        let entry = map
            .get_mut(&pump)
            .filter(|tx| tx.status != PendingState::Completing)?;
        if let Some(v) = volume {
            entry.volume = v;
        }
        if let Some(a) = amount {
            entry.amount = a;
        }
        if pts_transaction_id.is_some() {
            entry.pts_transaction_id = pts_transaction_id;
        }
        entry.status = PendingState::InProgress;
        Some(entry.clone())
    }

    /// Persists the merged record; the entry is removed only once stored.
    pub async fn complete_transaction(&self, pump: u32, data: CompletionData) -> Result<CompletedTransaction> {
        let (pending, prior) = {
            let mut map = self.pending.lock();
            let entry = map.get_mut(&pump).ok_or(PtsError::NotFound { pump })?;
            if entry.status == PendingState::Completing {
                return Err(PtsError::Conflict { pump });
            }
            let prior = entry.status;
            entry.status = PendingState::Completing;
            (entry.clone(), prior)
        };

        let record = FuelTransactionRecord {
            station_id: pending.station_id,
            pump_number: pump,
            nozzle_number: data.nozzle_number.unwrap_or(pending.nozzle_number),
            volume: data.volume.unwrap_or(pending.volume),
            amount: data.amount.unwrap_or(pending.amount),
            price: data.price.or(pending.price),
            employee_id: pending.employee_id,
            pts_transaction_id: data.pts_transaction_id.or(pending.pts_transaction_id),
            preset_type: pending.preset_type,
            preset_dose: pending.preset_dose,
            authorized_at: pending.authorized_at,
            completed_at: Utc::now(),
        };

        let result = self.sink.persist(&record).await;

        let mut map = self.pending.lock();
        match result {
            Ok(id) => {
                map.remove(&pump);
                log::info!(
                    "[RECONCILE] pump {} completed as record {} ({} / {})",
                    pump,
                    id,
                    record.volume,
                    record.amount
                );
                Ok(CompletedTransaction { id, record })
            }
            Err(e) => {
                log::error!("[RECONCILE] pump {} persist failed: {}", pump, e);
                if let Some(entry) = map.get_mut(&pump) {
                    entry.status = prior;
                }
                Err(e)
            }
        }
    }

    pub fn cancel_transaction(&self, pump: u32) -> Result<PendingTransaction> {
        let mut map = self.pending.lock();
        match map.get(&pump) {
            None => return Err(PtsError::NotFound { pump }),
            Some(tx) if tx.status == PendingState::Completing => {
                return Err(PtsError::Conflict { pump })
            }
            Some(_) => {}
        }
        let cancelled = map.remove(&pump).ok_or(PtsError::NotFound { pump })?;
        log::info!("[RECONCILE] pump {} pending transaction cancelled", pump);
        Ok(cancelled)
    }

    pub fn sweep_expired(&self) -> Vec<PendingTransaction> {
        self.sweep_expired_at(Utc::now())
    }

    /// Drops entries older than the configured max age as of `now`.
    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> Vec<PendingTransaction> {
        let max_age = chrono::Duration::from_std(self.config.max_age).unwrap_or(chrono::Duration::MAX);
        let mut expired = Vec::new();

        self.pending.lock().retain(|pump, tx| {
            if tx.status != PendingState::Completing
                && now.signed_duration_since(tx.authorized_at) > max_age
            {
                log::warn!(
                    "[RECONCILE] pump {} pending transaction expired (authorized {})",
                    pump,
                    tx.authorized_at
                );
                expired.push(tx.clone());
                false
            } else {
                true
            }
        });

        expired
    }

    /// Periodic expiry sweep at the configured interval.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let expired = this.sweep_expired();
                if !expired.is_empty() {
                    log::debug!("[RECONCILE] sweep removed {} entries", expired.len());
                }
            }
        })
    }

    pub fn pending_transaction(&self, pump: u32) -> Option<PendingTransaction> {
        self.pending.lock().get(&pump).cloned()
    }

    pub fn pending_transactions(&self) -> Vec<PendingTransaction> {
        let mut all: Vec<_> = self.pending.lock().values().cloned().collect();
        all.sort_by_key(|t| t.pump_number);
        all
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, pump: u32, authorized_at: DateTime<Utc>) {
        if let Some(tx) = self.pending.lock().get_mut(&pump) {
            tx.authorized_at = authorized_at;
        }
    }
}

fn validate(request: &AuthorizationRequest) -> Result<()> {
    if request.pump_number == 0 {
        return Err(PtsError::Validation("pump number must be >= 1".into()));
    }
    if request.nozzle_number == 0 {
        return Err(PtsError::Validation("nozzle number must be >= 1".into()));
    }
    for (field, value) in [("price", request.price), ("dose", request.preset_dose)] {
        if let Some(v) = value {
            if !v.is_finite() || v < 0.0 {
                return Err(PtsError::Validation(format!("{field} must be a finite non-negative number")));
            }
        }
    }
    Ok(())
}
