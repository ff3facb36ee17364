use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::engine::{PumpState, PumpStatus, TankStatus};

const EVENT_CAPACITY: usize = 1024;

/// Notifications for the websocket layer, serialized verbatim.
///
/// `StatusUpdate` and `TankUpdate` fire on every successful report; the
/// class events fire only when a pump's state class changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ForecourtEvent {
    StatusUpdate {
        pump_number: u32,
        status: PumpStatus,
    },
    TankUpdate {
        tank_number: u32,
        status: TankStatus,
    },
    TransactionUpdate {
        pump_number: u32,
        transaction_number: Option<u64>,
        data: Value,
    },
    PumpFilling {
        pump_number: u32,
    },
    TransactionComplete {
        pump_number: u32,
        transaction_number: Option<u64>,
    },
    PumpIdle {
        pump_number: u32,
    },
    PumpOffline {
        pump_number: u32,
    },
}

impl ForecourtEvent {
    /// Class event for a pump entering `status`.
    pub fn class_change(status: &PumpStatus) -> Self {
        let pump_number = status.pump_number;
        match status.status {
            PumpState::Idle => ForecourtEvent::PumpIdle { pump_number },
            PumpState::Filling => ForecourtEvent::PumpFilling { pump_number },
            PumpState::EndOfTransaction => ForecourtEvent::TransactionComplete {
                pump_number,
                transaction_number: status.transaction_number,
            },
            PumpState::Offline => ForecourtEvent::PumpOffline { pump_number },
        }
    }

    pub fn is_class_change(&self) -> bool {
        matches!(
            self,
            ForecourtEvent::PumpFilling { .. }
                | ForecourtEvent::TransactionComplete { .. }
                | ForecourtEvent::PumpIdle { .. }
                | ForecourtEvent::PumpOffline { .. }
        )
    }
}

/// Fan-out of [`ForecourtEvent`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ForecourtEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ForecourtEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ForecourtEvent) {
        if self.tx.send(event).is_err() {
            log::trace!("[HUB] event dropped, no subscribers");
        }
    }
}
