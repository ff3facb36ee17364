use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{PtsError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Decides whether a pushed body is accepted.
pub trait PushVerifier: Send + Sync {
    fn verify(&self, body: &[u8], signature: &str) -> bool;
}

impl<F> PushVerifier for F
where
    F: Fn(&[u8], &str) -> bool + Send + Sync,
{
    fn verify(&self, body: &[u8], signature: &str) -> bool {
        self(body, signature)
    }
}

/// HMAC-SHA256 over the raw body, hex encoded.
pub struct HmacVerifier {
    keyed: HmacSha256,
}

impl HmacVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self> {
        let keyed = HmacSha256::new_from_slice(secret.as_ref())
            .map_err(|e| PtsError::Signature(format!("unusable push secret: {e}")))?;
        Ok(Self { keyed })
    }

    pub fn sign(&self, body: &[u8]) -> String {
        let mut mac = self.keyed.clone();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }
}

impl PushVerifier for HmacVerifier {
    fn verify(&self, body: &[u8], signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature.trim()) else {
            return false;
        };
        let mut mac = self.keyed.clone();
        mac.update(body);
        mac.verify_slice(&expected).is_ok()
    }
}
