use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{PtsError, Result};
use crate::pts::api::PtsApi;
use crate::pts::codec::{RequestEnvelope, ResponseEnvelope, ResponsePacket};
use crate::pts::transport::{HttpReply, HttpTransport};

type Handler = Box<dyn Fn(&RequestEnvelope) -> Result<ResponseEnvelope> + Send + Sync>;

/// In-memory controller for tests.
pub struct MockPtsClient {
    handler: Handler,
    delay: Option<Duration>,
    pub requests: Mutex<Vec<RequestEnvelope>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MockPtsClient {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&RequestEnvelope) -> Result<ResponseEnvelope> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            delay: None,
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Packet types of every request seen so far, one vec per envelope.
    pub fn sent_types(&self) -> Vec<Vec<String>> {
        self.requests
            .lock()
            .iter()
            .map(|e| e.packets.iter().map(|p| p.kind.clone()).collect())
            .collect()
    }
}

#[async_trait]
impl PtsApi for MockPtsClient {
    async fn send(&self, envelope: &RequestEnvelope) -> Result<ResponseEnvelope> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.requests.lock().push(envelope.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = (self.handler)(envelope);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub fn ok_packet(id: u32, kind: &str, data: Value) -> ResponsePacket {
    ResponsePacket {
        id,
        kind: kind.to_string(),
        data: Some(data),
        error: false,
        message: None,
    }
}

pub fn error_packet(id: u32, kind: &str, message: &str) -> ResponsePacket {
    ResponsePacket {
        id,
        kind: kind.to_string(),
        data: None,
        error: true,
        message: Some(message.to_string()),
    }
}

/// Transport replaying a fixed script of replies.
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<HttpReply>>>,
    pub authorizations: Mutex<Vec<Option<String>>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Result<HttpReply>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            authorizations: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.authorizations.lock().len()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn post(&self, _body: Bytes, authorization: Option<String>) -> Result<HttpReply> {
        self.authorizations.lock().push(authorization);
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(PtsError::Network("script exhausted".into())))
    }
}

pub fn reply(status: u16, www_authenticate: Option<&str>, body: &str) -> Result<HttpReply> {
    Ok(HttpReply {
        status,
        www_authenticate: www_authenticate.map(str::to_string),
        body: Bytes::from(body.to_string()),
    })
}
