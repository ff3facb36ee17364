//! jsonPTS envelope codec.
//!
//! Requests are an ordered batch of packets with dense 1-based ids. Responses
//! are matched back by `Id`, never by array position. Per-packet failures are
//! collected on the envelope; only envelope-level problems are returned as
//! errors.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PtsError, Result};
use crate::pts::command::DeviceCommand;

pub const PROTOCOL: &str = "jsonPTS";

/// Packet error meaning "this pump/probe is not configured on the controller".
pub const NOT_CONFIGURED: &str = "JSONPTS_ERROR_NOT_FOUND";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestPacket {
    pub id: u32,
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestEnvelope {
    pub protocol: String,
    pub packets: Vec<RequestPacket>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponsePacket {
    pub id: u32,
    #[serde(rename = "Type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Result of a single packet.
#[derive(Debug, Clone, PartialEq)]
pub enum PacketOutcome<'a> {
    Success(Option<&'a Value>),
    /// `JSONPTS_ERROR_NOT_FOUND`: expected for unconfigured devices.
    NotConfigured,
    Failed(&'a str),
}

impl ResponsePacket {
    /// `Data` with an empty object or `null` treated as absent.
    pub fn payload(&self) -> Option<&Value> {
        match &self.data {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) if map.is_empty() => None,
            Some(v) => Some(v),
        }
    }

    pub fn outcome(&self) -> PacketOutcome<'_> {
        if !self.error {
            return PacketOutcome::Success(self.payload());
        }
        match self.message.as_deref() {
            Some(NOT_CONFIGURED) => PacketOutcome::NotConfigured,
            Some(msg) => PacketOutcome::Failed(msg),
            None => PacketOutcome::Failed("unspecified packet error"),
        }
    }
}

/// Decoded response, packets ordered by `Id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseEnvelope {
    #[serde(default = "protocol_name")]
    pub protocol: String,
    pub packets: Vec<ResponsePacket>,
    #[serde(default)]
    pub error: bool,
}

fn protocol_name() -> String {
    PROTOCOL.to_string()
}

impl ResponseEnvelope {
    pub fn new(mut packets: Vec<ResponsePacket>) -> Self {
        packets.sort_by_key(|p| p.id);
        Self {
            protocol: protocol_name(),
            packets,
            error: false,
        }
    }

    pub fn packet(&self, id: u32) -> Option<&ResponsePacket> {
        self.packets
            .binary_search_by_key(&id, |p| p.id)
            .ok()
            .map(|idx| &self.packets[idx])
    }

    /// (hard failures, not-configured) packet counts.
    pub fn error_counts(&self) -> (usize, usize) {
        self.packets
            .iter()
            .fold((0, 0), |(hard, benign), p| match p.outcome() {
                PacketOutcome::Success(_) => (hard, benign),
                PacketOutcome::NotConfigured => (hard, benign + 1),
                PacketOutcome::Failed(_) => (hard + 1, benign),
            })
    }
}

/// Builds the envelope for a batch; `Id` is the 1-based submission index.
pub fn encode(commands: &[DeviceCommand]) -> Result<RequestEnvelope> {
    if commands.is_empty() {
        return Err(PtsError::Validation("empty command batch".into()));
    }

    let mut packets = Vec::with_capacity(commands.len());
    for (idx, cmd) in commands.iter().enumerate() {
        cmd.validate()?;
        packets.push(RequestPacket {
            id: idx as u32 + 1,
            kind: cmd.name().to_string(),
            data: cmd.payload(),
        });
    }

    Ok(RequestEnvelope {
        protocol: PROTOCOL.to_string(),
        packets,
    })
}

pub fn decode(raw: &[u8]) -> Result<ResponseEnvelope> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|e| PtsError::protocol(format!("response is not valid JSON: {e}")))?;
    decode_value(value)
}

pub fn decode_value(value: Value) -> Result<ResponseEnvelope> {
    let Value::Object(mut obj) = value else {
        return Err(PtsError::protocol("response is not a JSON object"));
    };

    if obj.get("Error").and_then(Value::as_bool).unwrap_or(false) {
        let message = obj
            .get("Message")
            .and_then(Value::as_str)
            .unwrap_or("request failed")
            .to_string();
        return Err(PtsError::Protocol {
            message,
            data: obj.remove("Data"),
        });
    }

    let packets = match obj.remove("Packets") {
        Some(Value::Array(items)) => items,
        Some(_) => return Err(PtsError::protocol("Packets is not an array")),
        None => return Err(PtsError::protocol("response has no Packets")),
    };

    let mut decoded = Vec::with_capacity(packets.len());
    for item in packets {
        match serde_json::from_value::<ResponsePacket>(item) {
            Ok(packet) => decoded.push(packet),
            Err(e) => log::warn!("[CODEC] skipping malformed packet: {}", e),
        }
    }
    decoded.sort_by_key(|p| p.id);

    for packet in &decoded {
        match packet.outcome() {
            PacketOutcome::Success(_) => {}
            PacketOutcome::NotConfigured => {
                log::debug!("[CODEC] packet {} ({}) not configured", packet.id, packet.kind);
            }
            PacketOutcome::Failed(msg) => {
                log::warn!("[CODEC] packet {} ({}) failed: {}", packet.id, packet.kind, msg);
            }
        }
    }

    let protocol = obj
        .get("Protocol")
        .and_then(Value::as_str)
        .unwrap_or(PROTOCOL)
        .to_string();

    Ok(ResponseEnvelope {
        protocol,
        packets: decoded,
        error: false,
    })
}
