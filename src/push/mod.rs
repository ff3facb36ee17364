//! Controller-initiated uploads.

pub mod ingest;
pub mod signature;

#[cfg(test)]
mod tests;

pub use ingest::{Disposition, PushEntry, PushIngestor, PushReport};
pub use signature::{HmacVerifier, PushVerifier};
