//! jsonPTS controller protocol: commands, envelope codec, digest auth and the
//! HTTP device client.

pub mod api;
pub mod client;
pub mod codec;
pub mod command;
pub mod digest;
pub mod transport;

#[cfg(test)]
pub mod mock_client;


pub use api::PtsApi;
pub use client::PtsClient;
pub use codec::{PacketOutcome, RequestEnvelope, ResponseEnvelope, ResponsePacket};
pub use command::{AuthorizeParams, DeviceCommand, PresetType};
