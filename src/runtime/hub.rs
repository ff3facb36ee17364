use std::sync::Arc;

use serde_json::Value;

use crate::domain::TransactionReconciler;
use crate::engine::logic::TransactionReport;
use crate::engine::{PumpState, PumpStatus, StateStore, TankStatus};
use crate::runtime::events::{EventBus, ForecourtEvent};

/// Outcome of applying one pump report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpTransition {
    pub changed: bool,
    /// Set when the pump moved into a new state class.
    pub entered: Option<PumpState>,
}

/// The single mutation path for device reports.
///
/// Polling and push both funnel through here, so either deployment mode ends
/// up with the same store contents, events and pending-transaction updates.
pub struct StationHub {
    store: StateStore,
    reconciler: Arc<TransactionReconciler>,
    events: EventBus,
}

impl StationHub {
    pub fn new(store: StateStore, reconciler: Arc<TransactionReconciler>, events: EventBus) -> Self {
        Self {
            store,
            reconciler,
            events,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn reconciler(&self) -> &Arc<TransactionReconciler> {
        &self.reconciler
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn apply_pump_status(&self, status: PumpStatus) -> PumpTransition {
        let write = self.store.upsert_pump(status.clone());

        let entered = match &write.previous {
            Some(prev) if prev.status != status.status => Some(status.status),
            _ => None,
        };

        if status.is_delivering() {
            if let Some(tx) = self.reconciler.observe(
                status.pump_number,
                status.volume,
                status.amount,
                status.transaction_number,
            ) {
                log::trace!(
                    "[HUB] pump {} pending now {} / {}",
                    tx.pump_number,
                    tx.volume,
                    tx.amount
                );
            }
        }

        self.events.emit(ForecourtEvent::StatusUpdate {
            pump_number: status.pump_number,
            status: status.clone(),
        });
        if entered.is_some() {
            log::debug!("[HUB] pump {} entered {:?}", status.pump_number, status.status);
            self.events.emit(ForecourtEvent::class_change(&status));
        }

        PumpTransition {
            changed: write.changed,
            entered,
        }
    }

    pub fn apply_tank_status(&self, status: TankStatus) -> bool {
        let write = self.store.upsert_tank(status.clone());
        self.events.emit(ForecourtEvent::TankUpdate {
            tank_number: status.tank_number,
            status,
        });
        write.changed
    }

    /// Detailed transaction information from the controller.
    pub fn apply_transaction_report(&self, report: &TransactionReport, data: Value) {
        self.reconciler
            .observe(report.pump, report.volume, report.amount, report.transaction);
        self.events.emit(ForecourtEvent::TransactionUpdate {
            pump_number: report.pump,
            transaction_number: report.transaction,
            data,
        });
    }
}
