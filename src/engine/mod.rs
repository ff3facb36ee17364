//! Authoritative in-memory view of pump and tank state.
//!
//! Pumps and tanks live in separate namespaces keyed by device number. Nothing
//! is persisted: after a restart the state is re-learned from the controller on
//! the next poll or push.

pub mod logic;
pub mod types;


use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

pub use types::{PumpState, PumpStatus, TankStatus, Upsert};

#[derive(Debug, Default)]
struct Inner {
    pumps: BTreeMap<u32, PumpStatus>,
    tanks: BTreeMap<u32, TankStatus>,
}

/// Shared store; clones refer to the same state.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    inner: Arc<RwLock<Inner>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes the latest status and reports whether it differs from the cached one.
    pub fn upsert_pump(&self, status: PumpStatus) -> Upsert<PumpStatus> {
        let mut inner = self.inner.write();
        let previous = inner.pumps.insert(status.pump_number, status.clone());
        let changed = previous.as_ref() != Some(&status);
        if changed {
            log::trace!("[STORE] pump {} -> {:?}", status.pump_number, status.status);
        }
        Upsert { previous, changed }
    }

    pub fn upsert_tank(&self, status: TankStatus) -> Upsert<TankStatus> {
        let mut inner = self.inner.write();
        let previous = inner.tanks.insert(status.tank_number, status.clone());
        let changed = previous.as_ref() != Some(&status);
        Upsert { previous, changed }
    }

    pub fn pump(&self, pump: u32) -> Option<PumpStatus> {
        self.inner.read().pumps.get(&pump).cloned()
    }

    pub fn tank(&self, tank: u32) -> Option<TankStatus> {
        self.inner.read().tanks.get(&tank).cloned()
    }

    pub fn pumps(&self) -> BTreeMap<u32, PumpStatus> {
        self.inner.read().pumps.clone()
    }

    pub fn tanks(&self) -> BTreeMap<u32, TankStatus> {
        self.inner.read().tanks.clone()
    }
}
