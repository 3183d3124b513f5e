//! Request signing.
//!
//! The exchange authenticates every private call with
//! `hex(HMAC_SHA256(secret, method + path + nonce + body))`, where `path`
//! includes the `/api/v1` prefix and the query string. The WebSocket auth
//! frame signs the fixed challenge `GET/realtime` followed by the nonce.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{ApiError, ApiResult};
use crate::nonce::NonceManager;

type HmacSha256 = Hmac<Sha256>;

const WS_CHALLENGE: &str = "GET/realtime";

/// Keyed MAC producing lowercase hex digests.
///
/// The secret is validated once here; signing itself cannot fail.
pub struct Signer {
    keyed: HmacSha256,
}

impl Signer {
    pub fn new(secret: impl Into<String>) -> ApiResult<Self> {
        let secret = Zeroizing::new(secret.into());
        if secret.is_empty() {
            return Err(ApiError::Configuration("API secret is empty".to_string()));
        }
        if secret
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(ApiError::Configuration(
                "API secret contains whitespace or control characters".to_string(),
            ));
        }
        let keyed = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| ApiError::Configuration(format!("invalid API secret: {e}")))?;
        Ok(Self { keyed })
    }

    /// Digest for a REST request.
    pub fn sign(&self, method: &str, path: &str, nonce: u64, body: &str) -> String {
        self.digest(&format!("{method}{path}{nonce}{body}"))
    }

    /// Digest for the WebSocket `authKeyExpires` frame.
    pub fn sign_ws_challenge(&self, nonce: u64) -> String {
        self.digest(&format!("{WS_CHALLENGE}{nonce}"))
    }

    fn digest(&self, payload: &str) -> String {
        let mut mac = self.keyed.clone();
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").field("secret", &"<redacted>").finish()
    }
}

/// Header values for one signed REST call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub api_key: String,
    pub expires: u64,
    pub signature: String,
}

/// API key, signer and the nonce source bound to that key.
#[derive(Debug, Clone)]
pub struct Credentials {
    api_key: String,
    signer: Arc<Signer>,
    nonce: Arc<NonceManager>,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, signer: Signer, nonce: Arc<NonceManager>) -> Self {
        Self {
            api_key: api_key.into(),
            signer: Arc::new(signer),
            nonce,
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Draws a fresh nonce and signs the request.
    pub fn sign_request(&self, method: &str, path: &str, body: &str) -> SignedHeaders {
        let expires = self.nonce.next();
        SignedHeaders {
            api_key: self.api_key.clone(),
            expires,
            signature: self.signer.sign(method, path, expires, body),
        }
    }

    /// Arguments for `{"op": "authKeyExpires", "args": [key, expires, signature]}`.
    pub fn ws_auth_args(&self) -> (String, u64, String) {
        let expires = self.nonce.next();
        (
            self.api_key.clone(),
            expires,
            self.signer.sign_ws_challenge(expires),
        )
    }
}
