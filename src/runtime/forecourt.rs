use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::domain::{AuthorizationRequest, PendingTransaction};
use crate::engine::logic;
use crate::engine::{PumpStatus, TankStatus};
use crate::error::{PtsError, Result};
use crate::pts::codec::{PacketOutcome, ResponsePacket};
use crate::pts::command::{AuthorizeParams, DeviceCommand};
use crate::pts::PtsApi;
use crate::runtime::hub::StationHub;

/// Operations the route layer calls.
///
/// Reads come from the state store and device commands go straight to the
/// controller. Pending transactions are reached through `hub().reconciler()`.
pub struct Forecourt<C: PtsApi> {
    client: Arc<C>,
    hub: Arc<StationHub>,
}

impl<C: PtsApi> Clone for Forecourt<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            hub: self.hub.clone(),
        }
    }
}

impl<C: PtsApi> Forecourt<C> {
    pub fn new(client: Arc<C>, hub: Arc<StationHub>) -> Self {
        Self { client, hub }
    }

    pub fn hub(&self) -> &Arc<StationHub> {
        &self.hub
    }

    /// Sends one command and unwraps its packet outcome.
    async fn execute_one(&self, command: DeviceCommand) -> Result<ResponsePacket> {
        let name = command.name();
        let response = self.client.execute(std::slice::from_ref(&command)).await?;
        let packet = response
            .packet(1)
            .ok_or_else(|| PtsError::protocol(format!("no response packet for {name}")))?;

        match packet.outcome() {
            PacketOutcome::Success(_) => Ok(packet.clone()),
            PacketOutcome::NotConfigured => Err(PtsError::NotConfigured {
                command: name.to_string(),
            }),
            PacketOutcome::Failed(message) => Err(PtsError::Protocol {
                message: format!("{name}: {message}"),
                data: packet.data.clone(),
            }),
        }
    }

    // ---------------------------------------------------------------------
    // Cached state
    // ---------------------------------------------------------------------

    pub fn pump_statuses(&self) -> BTreeMap<u32, PumpStatus> {
        self.hub.store().pumps()
    }

    pub fn tank_statuses(&self) -> BTreeMap<u32, TankStatus> {
        self.hub.store().tanks()
    }

    // ---------------------------------------------------------------------
    // Device commands
    // ---------------------------------------------------------------------

    /// Asks the controller for one pump's status and applies it like a poll.
    pub async fn pump_status(&self, pump: u32) -> Result<PumpStatus> {
        let packet = self.execute_one(DeviceCommand::PumpGetStatus { pump }).await?;
        let status = logic::pump_status_from_packet(&packet.kind, packet.payload(), Some(pump))
            .ok_or_else(|| PtsError::protocol(format!("unexpected status type {}", packet.kind)))?;
        self.hub.apply_pump_status(status.clone());
        Ok(status)
    }

    pub async fn configuration_identifier(&self) -> Result<Value> {
        let packet = self.execute_one(DeviceCommand::GetConfigurationIdentifier).await?;
        Ok(packet.payload().cloned().unwrap_or(Value::Null))
    }

    /// Reserves the pump's pending slot, then authorizes on the controller.
    ///
    /// If the device refuses, the reservation is released and any entry it
    /// superseded is put back.
    pub async fn authorize_pump(
        &self,
        request: AuthorizationRequest,
        user: Option<String>,
    ) -> Result<PendingTransaction> {
        let command = DeviceCommand::PumpAuthorize(AuthorizeParams {
            pump: request.pump_number,
            nozzle: request.nozzle_number,
            preset_type: request.preset_type,
            preset_dose: request.preset_dose,
            price: request.price,
            user,
        });
        command.validate()?;

        let (pending, displaced) = self.hub.reconciler().reserve(request)?;

        if let Err(e) = self.execute_one(command).await {
            log::warn!("[RECONCILE] authorize failed on pump {}: {}", pending.pump_number, e);
            if !self.hub.reconciler().release(&pending, displaced) {
                log::warn!(
                    "[RECONCILE] pump {} reservation changed while authorizing, left as is",
                    pending.pump_number
                );
            }
            return Err(e);
        }
        Ok(pending)
    }

    pub async fn stop_pump(&self, pump: u32) -> Result<()> {
        self.execute_one(DeviceCommand::PumpStop { pump }).await?;
        Ok(())
    }

    pub async fn emergency_stop_pump(&self, pump: u32) -> Result<()> {
        log::warn!("[CLIENT] emergency stop on pump {}", pump);
        self.execute_one(DeviceCommand::PumpEmergencyStop { pump }).await?;
        Ok(())
    }

    pub async fn pump_totals(&self, pump: u32, nozzle: u32) -> Result<Value> {
        let packet = self
            .execute_one(DeviceCommand::PumpGetTotals { pump, nozzle })
            .await?;
        Ok(packet.payload().cloned().unwrap_or(Value::Null))
    }

    pub async fn pump_prices(&self, pump: u32) -> Result<Vec<f64>> {
        let packet = self.execute_one(DeviceCommand::PumpGetPrices { pump }).await?;
        let prices = packet
            .payload()
            .and_then(|d| d.get("Prices"))
            .and_then(Value::as_array)
            .ok_or_else(|| PtsError::protocol("price response without Prices"))?;
        Ok(prices.iter().filter_map(Value::as_f64).collect())
    }

    pub async fn set_pump_prices(&self, pump: u32, prices: Vec<f64>) -> Result<()> {
        self.execute_one(DeviceCommand::PumpSetPrices { pump, prices })
            .await?;
        Ok(())
    }

    /// Releases a finished transaction on the controller side.
    pub async fn close_pump_transaction(&self, pump: u32, transaction: u64) -> Result<()> {
        self.execute_one(DeviceCommand::PumpCloseTransaction { pump, transaction })
            .await?;
        Ok(())
    }
}
