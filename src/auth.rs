//! Judge authentication.
//!
//! The handshake presents `(id, key)`; the concrete verification scheme is
//! pluggable so deployments can swap in token lookups or per-judge secrets.

use base64::prelude::{Engine, BASE64_STANDARD};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verifies a judge's handshake credential.
pub trait Authenticator: Send + Sync {
    fn verify(&self, id: &str, key: &str) -> bool;
}

/// Shared-secret authenticator: the key is the base64 HMAC-SHA256 of the
/// judge id under the bridge secret.
pub struct HmacAuthenticator {
    secret: Vec<u8>,
}

impl HmacAuthenticator {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// The key a judge with this id is expected to present. Used by
    /// deployment tooling and tests to mint judge credentials.
    pub fn key_for(&self, id: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(id.as_bytes());
        BASE64_STANDARD.encode(mac.finalize().into_bytes())
    }
}

impl Authenticator for HmacAuthenticator {
    fn verify(&self, id: &str, key: &str) -> bool {
        let Ok(presented) = BASE64_STANDARD.decode(key) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.secret) else {
            return false;
        };
        mac.update(id.as_bytes());
        // Constant-time comparison.
        mac.verify_slice(&presented).is_ok()
    }
}
