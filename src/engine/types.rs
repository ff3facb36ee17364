use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PumpState {
    Idle,
    Filling,
    EndOfTransaction,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PumpStatus {
    pub pump_number: u32,
    pub status: PumpState,
    pub transaction_number: Option<u64>,
    pub nozzle: Option<u32>,
    pub volume: Option<f64>,
    pub amount: Option<f64>,
    pub price: Option<f64>,
}

impl PumpStatus {
    pub fn new(pump_number: u32, status: PumpState) -> Self {
        Self {
            pump_number,
            status,
            transaction_number: None,
            nozzle: None,
            volume: None,
            amount: None,
            price: None,
        }
    }

    /// Filling and end-of-transaction reports carry the live delivery.
    pub fn is_delivering(&self) -> bool {
        matches!(self.status, PumpState::Filling | PumpState::EndOfTransaction)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TankStatus {
    pub tank_number: u32,
    pub status: Option<String>,
    pub height: Option<f64>,
    pub water_height: Option<f64>,
    pub volume: Option<f64>,
    pub water_volume: Option<f64>,
    pub ullage: Option<f64>,
    pub temperature: Option<f64>,
    pub fuel_grade_id: Option<u32>,
    pub fuel_grade_name: Option<String>,
}

/// Result of a store write.
#[derive(Debug, Clone, PartialEq)]
pub struct Upsert<T> {
    pub previous: Option<T>,
    pub changed: bool,
}
