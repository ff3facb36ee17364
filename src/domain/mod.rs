//! Pump transaction reconciliation.
//!
//! Lifecycle per pump: none → authorized → in_progress → completed |
//! cancelled | expired. Only completion persists anything.

pub mod reconciler;


pub use reconciler::{
    AuthorizationRequest, CompletedTransaction, CompletionData, PendingState, PendingTransaction,
    TransactionReconciler,
};
