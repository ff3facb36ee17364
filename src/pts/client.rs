use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::PtsConfig;
use crate::error::{PtsError, Result};
use crate::pts::api::PtsApi;
use crate::pts::codec::{self, RequestEnvelope, ResponseEnvelope};
use crate::pts::digest::{DigestChallenge, DigestCredentials, DigestSession};
use crate::pts::transport::{HttpReply, HttpTransport, ReqwestTransport};

const METHOD: &str = "POST";
const MAX_BODY_IN_ERROR: usize = 256;

/// Device client: one endpoint, one credential pair, digest retry on 401.
pub struct PtsClient {
    transport: Arc<dyn HttpTransport>,
    digest: DigestSession,
    uri: String,
}

impl PtsClient {
    pub fn new(config: &PtsConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(config)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: &PtsConfig, transport: Arc<dyn HttpTransport>) -> Self {
        log::info!("[CLIENT] controller endpoint {}", config.url);
        Self {
            transport,
            digest: DigestSession::new(DigestCredentials {
                username: config.username.clone(),
                password: config.password.clone(),
            }),
            uri: config.digest_uri(),
        }
    }

    pub fn digest(&self) -> &DigestSession {
        &self.digest
    }

    async fn post(&self, body: &Bytes) -> Result<HttpReply> {
        let authorization = self.digest.authorize(METHOD, &self.uri);
        log::trace!(
            "[CLIENT] POST {} (authenticated: {})",
            self.uri,
            authorization.is_some()
        );
        self.transport.post(body.clone(), authorization).await
    }

    fn adopt_challenge(&self, reply: &HttpReply) -> Result<()> {
        let header = reply.www_authenticate.as_deref().ok_or_else(|| {
            PtsError::Authentication("401 without a digest challenge".into())
        })?;
        let challenge = DigestChallenge::parse(header)?;
        self.digest.adopt(challenge);
        Ok(())
    }
}

#[async_trait]
impl PtsApi for PtsClient {
    async fn send(&self, envelope: &RequestEnvelope) -> Result<ResponseEnvelope> {
        let body = Bytes::from(serde_json::to_vec(envelope)?);

        let mut reply = self.post(&body).await?;
        if reply.status == 401 {
            log::debug!("[CLIENT] challenged, retrying with digest credentials");
            self.adopt_challenge(&reply)?;
            reply = self.post(&body).await?;
            if reply.status == 401 {
                log::error!("[CLIENT] controller rejected digest credentials");
                return Err(PtsError::Authentication(
                    "credentials rejected after digest retry".into(),
                ));
            }
        }

        if !(200..300).contains(&reply.status) {
            let text = String::from_utf8_lossy(&reply.body);
            let body: String = text.chars().take(MAX_BODY_IN_ERROR).collect();
            return Err(PtsError::Http {
                status: reply.status,
                body,
            });
        }

        codec::decode(&reply.body)
    }
}
