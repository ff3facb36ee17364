//! HTTP Digest authentication (RFC 2617, MD5 only).

use std::sync::atomic::{AtomicU64, Ordering};

use md5::{Digest, Md5};
use parking_lot::Mutex;

use crate::error::{PtsError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestCredentials {
    pub username: String,
    pub password: String,
}

/// Parameters of a `WWW-Authenticate: Digest ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub qop: Option<String>,
    pub algorithm: Option<String>,
    pub opaque: Option<String>,
}

impl DigestChallenge {
    pub fn parse(header: &str) -> Result<Self> {
        let header = header.trim();
        let rest = match header.get(..6) {
            Some(scheme) if scheme.eq_ignore_ascii_case("digest") => &header[6..],
            _ => {
                return Err(PtsError::Authentication(format!(
                    "unsupported authentication scheme: {header}"
                )))
            }
        };

        let mut challenge = DigestChallenge::default();
        let mut nonce = None;
        for (key, value) in parse_params(rest) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => challenge.realm = value,
                "nonce" => nonce = Some(value),
                "qop" => challenge.qop = Some(value),
                "algorithm" => challenge.algorithm = Some(value),
                "opaque" => challenge.opaque = Some(value),
                _ => {}
            }
        }

        challenge.nonce =
            nonce.ok_or_else(|| PtsError::Authentication("digest challenge has no nonce".into()))?;

        if let Some(alg) = &challenge.algorithm {
            if !alg.eq_ignore_ascii_case("MD5") {
                return Err(PtsError::Authentication(format!(
                    "unsupported digest algorithm {alg}"
                )));
            }
        }

        // The controller may offer "auth,auth-int"; only "auth" is spoken here.
        if let Some(qop) = challenge.qop.take() {
            if qop.split(',').any(|q| q.trim() == "auth") {
                challenge.qop = Some("auth".to_string());
            } else {
                return Err(PtsError::Authentication(format!("unsupported qop {qop}")));
            }
        }

        Ok(challenge)
    }
}

fn parse_params(input: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ',') {
            chars.next();
        }
        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' {
                break;
            }
            key.push(c);
            chars.next();
        }
        if chars.next().is_none() {
            break;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => break,
                    _ => value.push(c),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }
        out.push((key.trim().to_string(), value.trim().to_string()));
    }

    out
}

fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

/// Counter rendered as an 8-wide zero-padded decimal, matching the controller.
pub fn format_nonce_count(nc: u32) -> String {
    format!("{nc:08}")
}

pub fn client_nonce() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

/// The `response` field of the authorization header.
pub fn compute_response(
    challenge: &DigestChallenge,
    credentials: &DigestCredentials,
    method: &str,
    uri: &str,
    nonce_count: u32,
    cnonce: &str,
) -> String {
    let ha1 = md5_hex(&format!(
        "{}:{}:{}",
        credentials.username, challenge.realm, credentials.password
    ));
    let ha2 = md5_hex(&format!("{method}:{uri}"));

    match &challenge.qop {
        Some(qop) => md5_hex(&format!(
            "{ha1}:{}:{}:{cnonce}:{qop}:{ha2}",
            challenge.nonce,
            format_nonce_count(nonce_count)
        )),
        None => md5_hex(&format!("{ha1}:{}:{ha2}", challenge.nonce)),
    }
}

/// Full `Authorization` header value.
pub fn authorization_header(
    challenge: &DigestChallenge,
    credentials: &DigestCredentials,
    method: &str,
    uri: &str,
    nonce_count: u32,
    cnonce: &str,
) -> String {
    let response = compute_response(challenge, credentials, method, uri, nonce_count, cnonce);

    let mut header = format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
        credentials.username, challenge.realm, challenge.nonce, uri, response
    );
    if let Some(qop) = &challenge.qop {
        header.push_str(&format!(
            ", qop={qop}, nc={}, cnonce=\"{cnonce}\"",
            format_nonce_count(nonce_count)
        ));
    }
    if let Some(opaque) = &challenge.opaque {
        header.push_str(&format!(", opaque=\"{opaque}\""));
    }
    if let Some(algorithm) = &challenge.algorithm {
        header.push_str(&format!(", algorithm={algorithm}"));
    }
    header
}

#[derive(Debug)]
struct ChallengeState {
    challenge: DigestChallenge,
    nonce_count: u32,
}

/// Cached challenge plus nonce counter for one upstream connection.
///
/// Header computation and counter increment happen under one lock, so two
/// concurrent requests never share a nonce count.
#[derive(Debug)]
pub struct DigestSession {
    credentials: DigestCredentials,
    state: Mutex<Option<ChallengeState>>,
    adopted: AtomicU64,
}

impl DigestSession {
    pub fn new(credentials: DigestCredentials) -> Self {
        Self {
            credentials,
            state: Mutex::new(None),
            adopted: AtomicU64::new(0),
        }
    }

    /// Replaces the cached challenge; the next request is sent with nc=1.
    pub fn adopt(&self, challenge: DigestChallenge) {
        log::debug!(
            "[DIGEST] adopting challenge realm={} nonce={}",
            challenge.realm,
            challenge.nonce
        );
        *self.state.lock() = Some(ChallengeState {
            challenge,
            nonce_count: 0,
        });
        self.adopted.fetch_add(1, Ordering::SeqCst);
    }

    /// `None` until a challenge has been adopted.
    pub fn authorize(&self, method: &str, uri: &str) -> Option<String> {
        self.authorize_with_cnonce(method, uri, &client_nonce())
    }

    pub fn authorize_with_cnonce(&self, method: &str, uri: &str, cnonce: &str) -> Option<String> {
        let mut guard = self.state.lock();
        let state = guard.as_mut()?;
        state.nonce_count += 1;
        Some(authorization_header(
            &state.challenge,
            &self.credentials,
            method,
            uri,
            state.nonce_count,
            cnonce,
        ))
    }

    pub fn has_challenge(&self) -> bool {
        self.state.lock().is_some()
    }

    pub fn nonce_count(&self) -> Option<u32> {
        self.state.lock().as_ref().map(|s| s.nonce_count)
    }

    /// Number of challenges adopted over the session lifetime.
    pub fn challenges_adopted(&self) -> u64 {
        self.adopted.load(Ordering::SeqCst)
    }
}
