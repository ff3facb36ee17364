//! jsonPTS forecourt controller core.
//!
//! Talks to a PTS controller over HTTP with digest authentication, keeps an
//! in-memory view of pump and tank state fed by polling or pushes, and turns
//! authorized pump deliveries into persisted transaction records.

pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod persistence;
pub mod polling;
pub mod pts;
pub mod push;
pub mod runtime;

pub use error::{ErrorKind, PtsError, Result};
