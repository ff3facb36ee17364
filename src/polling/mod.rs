//! Timer-driven status polling.

pub mod poller;


pub use poller::{CycleReport, PollStats, Poller};
