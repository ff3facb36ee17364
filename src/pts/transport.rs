use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};

use crate::config::PtsConfig;
use crate::error::{PtsError, Result};

/// Raw HTTP reply, before any jsonPTS decoding.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub www_authenticate: Option<String>,
    pub body: Bytes,
}

/// One POST to the controller endpoint.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post(&self, body: Bytes, authorization: Option<String>) -> Result<HttpReply>;
}

/// reqwest-backed transport bound to the configured endpoint.
pub struct ReqwestTransport {
    http: reqwest::Client,
    url: url::Url,
}

impl ReqwestTransport {
    pub fn new(config: &PtsConfig) -> Result<Self> {
        let relax = config.relax_tls();
        if relax {
            log::warn!(
                "[CLIENT] accepting invalid TLS certificates for {}",
                config.url
            );
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(relax)
            .build()
            .map_err(|e| PtsError::Network(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            url: config.url.clone(),
        })
    }
}

fn classify(err: reqwest::Error) -> PtsError {
    if err.is_timeout() {
        PtsError::Timeout
    } else {
        PtsError::Network(err.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post(&self, body: Bytes, authorization: Option<String>) -> Result<HttpReply> {
        let mut request = self
            .http
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(auth) = authorization {
            request = request.header(AUTHORIZATION, auth);
        }

        let response = request.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let www_authenticate = response
            .headers()
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.trim_start().to_ascii_lowercase().starts_with("digest"))
            .map(str::to_string);
        let body = response.bytes().await.map_err(classify)?;

        Ok(HttpReply {
            status,
            www_authenticate,
            body,
        })
    }
}
