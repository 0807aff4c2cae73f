//! Operator API tokens.
//!
//! A token is `hex(claims-json) . hex(hmac-sha256(claims-json))` under a
//! shared secret. The CLI mints them; the admin API verifies them. There is
//! no expiry claim: operator tokens are revoked by rotating the secret.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Errors from minting or verifying operator tokens.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,

    #[error("token signature mismatch")]
    InvalidSignature,

    #[error("token claims unreadable: {0}")]
    Claims(String),
}

/// Claims carried by an operator API token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiTokenClaims {
    pub user: String,
    pub roles: Vec<String>,
    pub issued_at: u64,
}

impl ApiTokenClaims {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Mint a signed token for the given claims.
pub fn mint(claims: &ApiTokenClaims, secret: &str) -> Result<String, TokenError> {
    let payload = serde_json::to_vec(claims).map_err(|e| TokenError::Claims(e.to_string()))?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| TokenError::Claims(e.to_string()))?;
    mac.update(&payload);
    let signature = mac.finalize().into_bytes();
    Ok(format!("{}.{}", hex::encode(payload), hex::encode(signature)))
}

/// Verify a token and return its claims.
pub fn verify(token: &str, secret: &str) -> Result<ApiTokenClaims, TokenError> {
    let (payload_hex, signature_hex) = token.split_once('.').ok_or(TokenError::Malformed)?;
    let payload = hex::decode(payload_hex).map_err(|_| TokenError::Malformed)?;
    let signature = hex::decode(signature_hex).map_err(|_| TokenError::Malformed)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| TokenError::Claims(e.to_string()))?;
    mac.update(&payload);
    // verify_slice is constant-time.
    mac.verify_slice(&signature)
        .map_err(|_| TokenError::InvalidSignature)?;

    serde_json::from_slice(&payload).map_err(|e| TokenError::Claims(e.to_string()))
}
