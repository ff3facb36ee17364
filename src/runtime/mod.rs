//! Shared runtime: event bus, the hub every device report flows through, and
//! the facade exposed to the route layer.

pub mod events;
pub mod forecourt;
pub mod hub;

#[cfg(test)]
mod tests;

pub use events::{EventBus, ForecourtEvent};
pub use forecourt::Forecourt;
pub use hub::{PumpTransition, StationHub};

use std::sync::Arc;

use crate::config::ReconcileConfig;
use crate::domain::TransactionReconciler;
use crate::engine::StateStore;
use crate::persistence::TransactionSink;

/// Wires a fresh store, reconciler and event bus together.
pub fn build_hub(sink: Arc<dyn TransactionSink>, config: ReconcileConfig) -> Arc<StationHub> {
    let reconciler = Arc::new(TransactionReconciler::new(sink, config));
    Arc::new(StationHub::new(StateStore::new(), reconciler, EventBus::new()))
}
