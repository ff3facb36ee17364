//! Interpretation of controller packet data.
//!
//! Pure functions shared by the polling and push paths, so both end up with
//! the same status values for the same device report.

use serde_json::Value;

use crate::engine::types::{PumpState, PumpStatus, TankStatus};

pub const PUMP_IDLE: &str = "PumpIdleStatus";
pub const PUMP_FILLING: &str = "PumpFillingStatus";
pub const PUMP_END_OF_TRANSACTION: &str = "PumpEndOfTransactionStatus";
pub const PUMP_OFFLINE: &str = "PumpOfflineStatus";
pub const PROBE_MEASUREMENTS: &str = "ProbeMeasurements";
pub const UPLOAD_TANK_MEASUREMENT: &str = "UploadTankMeasurement";
pub const PUMP_TRANSACTION_INFORMATION: &str = "PumpTransactionInformation";
pub const UPLOAD_PUMP_TRANSACTION: &str = "UploadPumpTransaction";

pub fn pump_state_for(kind: &str) -> Option<PumpState> {
    match kind {
        PUMP_IDLE => Some(PumpState::Idle),
        PUMP_FILLING => Some(PumpState::Filling),
        PUMP_END_OF_TRANSACTION => Some(PumpState::EndOfTransaction),
        PUMP_OFFLINE => Some(PumpState::Offline),
        _ => None,
    }
}

fn num(data: Option<&Value>, key: &str) -> Option<f64> {
    data?.get(key)?.as_f64()
}

fn uint(data: Option<&Value>, key: &str) -> Option<u64> {
    data?.get(key)?.as_u64()
}

fn small(data: Option<&Value>, key: &str) -> Option<u32> {
    uint(data, key).and_then(|v| u32::try_from(v).ok())
}

/// Builds a pump status from a `Pump*Status` packet.
///
/// `fallback_pump` is used when the packet data does not name the pump (the
/// poller knows which pump each request id was for).
pub fn pump_status_from_packet(
    kind: &str,
    data: Option<&Value>,
    fallback_pump: Option<u32>,
) -> Option<PumpStatus> {
    let state = pump_state_for(kind)?;
    let pump = small(data, "Pump").filter(|p| *p > 0).or(fallback_pump)?;

    let mut status = PumpStatus::new(pump, state);
    match state {
        PumpState::Idle => {
            status.nozzle = small(data, "NozzleUp").filter(|n| *n > 0);
            status.transaction_number = uint(data, "LastTransaction").filter(|t| *t > 0);
            status.volume = num(data, "LastVolume");
            status.amount = num(data, "LastAmount");
            status.price = num(data, "LastPrice");
        }
        PumpState::Filling | PumpState::EndOfTransaction => {
            status.nozzle = small(data, "Nozzle").filter(|n| *n > 0);
            status.transaction_number = uint(data, "Transaction").filter(|t| *t > 0);
            status.volume = num(data, "Volume");
            status.amount = num(data, "Amount");
            status.price = num(data, "Price");
        }
        PumpState::Offline => {}
    }
    Some(status)
}

pub fn tank_status_from_packet(data: Option<&Value>, fallback_probe: Option<u32>) -> Option<TankStatus> {
    let tank = small(data, "Probe").filter(|p| *p > 0).or(fallback_probe)?;
    Some(TankStatus {
        tank_number: tank,
        status: data
            .and_then(|d| d.get("Status"))
            .and_then(Value::as_str)
            .map(str::to_string),
        height: num(data, "ProductHeight"),
        water_height: num(data, "WaterHeight"),
        volume: num(data, "ProductVolume"),
        water_volume: num(data, "WaterVolume"),
        ullage: num(data, "ProductUllage"),
        temperature: num(data, "Temperature"),
        fuel_grade_id: small(data, "FuelGradeId"),
        fuel_grade_name: data
            .and_then(|d| d.get("FuelGradeName"))
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Pump, transaction, volume and amount out of a transaction-information or
/// uploaded-transaction packet.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionReport {
    pub pump: u32,
    pub transaction: Option<u64>,
    pub nozzle: Option<u32>,
    pub volume: Option<f64>,
    pub amount: Option<f64>,
    pub price: Option<f64>,
}

pub fn transaction_report(data: Option<&Value>, fallback_pump: Option<u32>) -> Option<TransactionReport> {
    let pump = small(data, "Pump").filter(|p| *p > 0).or(fallback_pump)?;
    Some(TransactionReport {
        pump,
        transaction: uint(data, "Transaction").filter(|t| *t > 0),
        nozzle: small(data, "Nozzle").filter(|n| *n > 0),
        volume: num(data, "Volume"),
        amount: num(data, "Amount"),
        price: num(data, "Price"),
    })
}
