use std::sync::Arc;

use serde_json::Value;

use crate::config::PushConfig;
use crate::engine::logic::{
    self, PROBE_MEASUREMENTS, PUMP_END_OF_TRANSACTION, PUMP_FILLING, PUMP_IDLE, PUMP_OFFLINE,
    PUMP_TRANSACTION_INFORMATION, UPLOAD_PUMP_TRANSACTION, UPLOAD_TANK_MEASUREMENT,
};
use crate::error::{PtsError, Result};
use crate::pts::codec::{self, ResponseEnvelope, ResponsePacket};
use crate::push::signature::{HmacVerifier, PushVerifier};
use crate::runtime::StationHub;

const ACK_MESSAGE: &str = "OK";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Processed,
    /// Type not understood by this build, or a packet the device flagged.
    Unprocessed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEntry {
    pub id: u32,
    pub kind: String,
    pub disposition: Disposition,
}

/// Per-packet result of one push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    pub entries: Vec<PushEntry>,
}

impl PushReport {
    fn count(&self, f: impl Fn(&Disposition) -> bool) -> usize {
        self.entries.iter().filter(|e| f(&e.disposition)).count()
    }

    pub fn processed(&self) -> usize {
        self.count(|d| *d == Disposition::Processed)
    }

    pub fn unprocessed(&self) -> usize {
        self.count(|d| *d == Disposition::Unprocessed)
    }

    pub fn failed(&self) -> usize {
        self.count(|d| matches!(d, Disposition::Failed(_)))
    }

    /// Response body for the controller, one packet per pushed packet.
    pub fn ack_envelope(&self) -> ResponseEnvelope {
        let packets = self
            .entries
            .iter()
            .map(|entry| {
                let (error, message) = match &entry.disposition {
                    Disposition::Failed(reason) => (true, reason.clone()),
                    _ => (false, ACK_MESSAGE.to_string()),
                };
                ResponsePacket {
                    id: entry.id,
                    kind: entry.kind.clone(),
                    data: None,
                    error,
                    message: Some(message),
                }
            })
            .collect();
        ResponseEnvelope::new(packets)
    }
}

/// Entry point for envelopes the controller pushes on its own.
pub struct PushIngestor {
    hub: Arc<StationHub>,
    verifier: Option<Arc<dyn PushVerifier>>,
}

impl PushIngestor {
    pub fn new(hub: Arc<StationHub>) -> Self {
        Self {
            hub,
            verifier: None,
        }
    }

    pub fn from_config(hub: Arc<StationHub>, config: &PushConfig) -> Result<Self> {
        let ingestor = Self::new(hub);
        Ok(match &config.secret {
            Some(secret) => ingestor.with_verifier(Arc::new(HmacVerifier::new(secret)?)),
            None => ingestor,
        })
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn PushVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Checks the signature (when configured), decodes and ingests.
    pub fn ingest_raw(&self, body: &[u8], signature: Option<&str>) -> Result<PushReport> {
        if let Some(verifier) = &self.verifier {
            let Some(signature) = signature else {
                log::warn!("[PUSH] rejected unsigned push");
                return Err(PtsError::Signature("missing signature".into()));
            };
            if !verifier.verify(body, signature) {
                log::warn!("[PUSH] rejected push with bad signature");
                return Err(PtsError::Signature("signature mismatch".into()));
            }
        }

        let envelope = codec::decode(body)?;
        Ok(self.ingest(&envelope))
    }

    pub fn ingest(&self, envelope: &ResponseEnvelope) -> PushReport {
        let entries: Vec<PushEntry> = envelope
            .packets
            .iter()
            .map(|packet| PushEntry {
                id: packet.id,
                kind: packet.kind.clone(),
                disposition: self.route(packet),
            })
            .collect();

        let report = PushReport { entries };
        log::debug!(
            "[PUSH] {} packets: {} processed, {} unprocessed, {} failed",
            report.entries.len(),
            report.processed(),
            report.unprocessed(),
            report.failed()
        );
        report
    }

    fn route(&self, packet: &ResponsePacket) -> Disposition {
        if packet.error {
            log::info!("[PUSH] packet {} ({}) flagged by device", packet.id, packet.kind);
            return Disposition::Unprocessed;
        }
        let data = packet.payload();

        match packet.kind.as_str() {
            PUMP_IDLE | PUMP_FILLING | PUMP_END_OF_TRANSACTION | PUMP_OFFLINE => {
                match logic::pump_status_from_packet(&packet.kind, data, None) {
                    Some(status) => {
                        self.hub.apply_pump_status(status);
                        Disposition::Processed
                    }
                    None => failed(packet, "missing pump number"),
                }
            }
            PROBE_MEASUREMENTS | UPLOAD_TANK_MEASUREMENT => {
                match logic::tank_status_from_packet(data, None) {
                    Some(tank) => {
                        self.hub.apply_tank_status(tank);
                        Disposition::Processed
                    }
                    None => failed(packet, "missing probe number"),
                }
            }
            PUMP_TRANSACTION_INFORMATION | UPLOAD_PUMP_TRANSACTION => {
                match logic::transaction_report(data, None) {
                    Some(report) => {
                        self.hub
                            .apply_transaction_report(&report, data.cloned().unwrap_or(Value::Null));
                        Disposition::Processed
                    }
                    None => failed(packet, "missing pump number"),
                }
            }
            other => {
                log::info!("[PUSH] ignoring packet type {}", other);
                Disposition::Unprocessed
            }
        }
    }
}

fn failed(packet: &ResponsePacket, reason: &str) -> Disposition {
    log::warn!("[PUSH] packet {} ({}): {}", packet.id, packet.kind, reason);
    Disposition::Failed(reason.to_string())
}
