use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{PtsError, Result};

/// How a pump authorization limits the delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresetType {
    Volume,
    Amount,
    FullTank,
}

impl PresetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresetType::Volume => "Volume",
            PresetType::Amount => "Amount",
            PresetType::FullTank => "FullTank",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizeParams {
    pub pump: u32,
    pub nozzle: u32,
    pub preset_type: PresetType,
    pub preset_dose: Option<f64>,
    pub price: Option<f64>,
    pub user: Option<String>,
}

/// Every command this build sends to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    GetConfigurationIdentifier,
    PumpGetStatus { pump: u32 },
    PumpAuthorize(AuthorizeParams),
    PumpStop { pump: u32 },
    PumpEmergencyStop { pump: u32 },
    PumpGetTotals { pump: u32, nozzle: u32 },
    PumpGetPrices { pump: u32 },
    PumpSetPrices { pump: u32, prices: Vec<f64> },
    PumpGetTransactionInformation { pump: u32 },
    PumpCloseTransaction { pump: u32, transaction: u64 },
    ProbeGetMeasurements { probe: u32 },
}

impl DeviceCommand {
    /// Packet `Type` on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            DeviceCommand::GetConfigurationIdentifier => "GetConfigurationIdentifier",
            DeviceCommand::PumpGetStatus { .. } => "PumpGetStatus",
            DeviceCommand::PumpAuthorize(_) => "PumpAuthorize",
            DeviceCommand::PumpStop { .. } => "PumpStop",
            DeviceCommand::PumpEmergencyStop { .. } => "PumpEmergencyStop",
            DeviceCommand::PumpGetTotals { .. } => "PumpGetTotals",
            DeviceCommand::PumpGetPrices { .. } => "PumpGetPrices",
            DeviceCommand::PumpSetPrices { .. } => "PumpSetPrices",
            DeviceCommand::PumpGetTransactionInformation { .. } => "PumpGetTransactionInformation",
            DeviceCommand::PumpCloseTransaction { .. } => "PumpCloseTransaction",
            DeviceCommand::ProbeGetMeasurements { .. } => "ProbeGetMeasurements",
        }
    }

    /// Packet `Data`; `None` for parameterless commands.
    pub fn payload(&self) -> Option<Value> {
        match self {
            DeviceCommand::GetConfigurationIdentifier => None,
            DeviceCommand::PumpGetStatus { pump }
            | DeviceCommand::PumpStop { pump }
            | DeviceCommand::PumpEmergencyStop { pump }
            | DeviceCommand::PumpGetPrices { pump }
            | DeviceCommand::PumpGetTransactionInformation { pump } => {
                Some(json!({ "Pump": pump }))
            }
            DeviceCommand::PumpAuthorize(p) => {
                let mut data = json!({
                    "Pump": p.pump,
                    "Nozzle": p.nozzle,
                    "Type": p.preset_type.as_str(),
                });
                if let Some(dose) = p.preset_dose {
                    data["Dose"] = json!(dose);
                }
                if let Some(price) = p.price {
                    data["Price"] = json!(price);
                }
                if let Some(user) = &p.user {
                    data["User"] = json!(user);
                }
                Some(data)
            }
            DeviceCommand::PumpGetTotals { pump, nozzle } => {
                Some(json!({ "Pump": pump, "Nozzle": nozzle }))
            }
            DeviceCommand::PumpSetPrices { pump, prices } => {
                Some(json!({ "Pump": pump, "Prices": prices }))
            }
            DeviceCommand::PumpCloseTransaction { pump, transaction } => {
                Some(json!({ "Pump": pump, "Transaction": transaction }))
            }
            DeviceCommand::ProbeGetMeasurements { probe } => Some(json!({ "Probe": probe })),
        }
    }

    /// Rejects identifiers and amounts the controller would misinterpret.
    pub fn validate(&self) -> Result<()> {
        match self {
            DeviceCommand::GetConfigurationIdentifier => Ok(()),
            DeviceCommand::PumpGetStatus { pump }
            | DeviceCommand::PumpStop { pump }
            | DeviceCommand::PumpEmergencyStop { pump }
            | DeviceCommand::PumpGetPrices { pump }
            | DeviceCommand::PumpGetTransactionInformation { pump }
            | DeviceCommand::PumpCloseTransaction { pump, .. } => positive("pump", *pump),
            DeviceCommand::PumpGetTotals { pump, nozzle } => {
                positive("pump", *pump)?;
                positive("nozzle", *nozzle)
            }
            DeviceCommand::PumpSetPrices { pump, prices } => {
                positive("pump", *pump)?;
                if prices.is_empty() {
                    return Err(PtsError::Validation("price list is empty".into()));
                }
                prices.iter().try_for_each(|p| non_negative("price", Some(*p)))
            }
            DeviceCommand::PumpAuthorize(p) => {
                positive("pump", p.pump)?;
                positive("nozzle", p.nozzle)?;
                non_negative("price", p.price)?;
                non_negative("dose", p.preset_dose)?;
                match (p.preset_type, p.preset_dose) {
                    (PresetType::Volume | PresetType::Amount, None) => Err(PtsError::Validation(
                        format!("{} preset requires a dose", p.preset_type.as_str()),
                    )),
                    _ => Ok(()),
                }
            }
            DeviceCommand::ProbeGetMeasurements { probe } => positive("probe", *probe),
        }
    }
}

fn positive(field: &str, value: u32) -> Result<()> {
    if value == 0 {
        return Err(PtsError::Validation(format!("{field} number must be >= 1")));
    }
    Ok(())
}

fn non_negative(field: &str, value: Option<f64>) -> Result<()> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => {
            Err(PtsError::Validation(format!("{field} must be a finite non-negative number")))
        }
        _ => Ok(()),
    }
}
