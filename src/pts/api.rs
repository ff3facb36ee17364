use async_trait::async_trait;

use crate::error::Result;
use crate::pts::codec::{self, RequestEnvelope, ResponseEnvelope};
use crate::pts::command::DeviceCommand;

/// Minimal controller interface used by the poller and the facade.
#[async_trait]
pub trait PtsApi: Send + Sync {
    /// Sends one envelope and returns the decoded response.
    async fn send(&self, envelope: &RequestEnvelope) -> Result<ResponseEnvelope>;

    /// Encodes a command batch and sends it.
    async fn execute(&self, commands: &[DeviceCommand]) -> Result<ResponseEnvelope> {
        let envelope = codec::encode(commands)?;
        self.send(&envelope).await
    }
}
