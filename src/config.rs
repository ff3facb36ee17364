use std::time::Duration;

use url::Url;

use crate::error::{PtsError, Result};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1_000);
pub const DEFAULT_TANK_INTERVAL: Duration = Duration::from_millis(5_000);
pub const DEFAULT_MAX_PENDING_AGE: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Connection settings for the single upstream controller.
#[derive(Debug, Clone)]
pub struct PtsConfig {
    /// Full endpoint, e.g. `https://192.168.1.117/jsonPTS`.
    pub url: Url,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
    /// `None`: accept self-signed certificates only when the scheme is https.
    pub accept_invalid_certs: Option<bool>,
}

impl PtsConfig {
    pub fn new(url: &str, username: impl Into<String>, password: impl Into<String>) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| PtsError::Validation(format!("invalid controller url {url}: {e}")))?;
        Ok(Self {
            url,
            username: username.into(),
            password: password.into(),
            timeout: DEFAULT_TIMEOUT,
            accept_invalid_certs: None,
        })
    }

    pub fn relax_tls(&self) -> bool {
        self.accept_invalid_certs
            .unwrap_or_else(|| self.url.scheme() == "https")
    }

    /// Request-URI used in the digest computation.
    pub fn digest_uri(&self) -> String {
        match self.url.query() {
            Some(q) => format!("{}?{}", self.url.path(), q),
            None => self.url.path().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    pub tank_interval: Duration,
    pub pumps: Vec<u32>,
    pub probes: Vec<u32>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            tank_interval: DEFAULT_TANK_INTERVAL,
            pumps: (1..=10).collect(),
            probes: (1..=4).collect(),
        }
    }
}

impl PollerConfig {
    /// Tank measurements are requested on ticks where `tick % n == 0`.
    pub fn tank_every_ticks(&self) -> u64 {
        let interval = self.interval.as_millis().max(1);
        ((self.tank_interval.as_millis() / interval) as u64).max(1)
    }
}

/// What happens when a pump is authorized while a pending transaction exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthorizationPolicy {
    #[default]
    Reject,
    Supersede,
}

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub max_age: Duration,
    pub sweep_interval: Duration,
    pub policy: AuthorizationPolicy,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_MAX_PENDING_AGE,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            policy: AuthorizationPolicy::Reject,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PushConfig {
    /// HMAC-SHA256 key; pushes are unsigned when absent.
    pub secret: Option<String>,
}
