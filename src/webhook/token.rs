//! Callback token minting and verification: an opaque, process-scoped,
//! HMAC-signed bearer that lets a webhook consumer call back into the claim
//! endpoint without the server tracking per-callback state.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_TTL_SECONDS: i64 = 3600;
pub const REFRESH_WINDOW_SECONDS: i64 = 300;

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenPayload {
    pub sub: String,
    pub epoch: u64,
    pub exp: i64,
    pub jti: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is malformed")]
    Invalid,
    #[error("token has expired")]
    Expired,
}

pub fn mint(consumer_id: &str, epoch: u64, key: &[u8; 32]) -> String {
    let payload = TokenPayload {
        sub: consumer_id.to_string(),
        epoch,
        exp: Utc::now().timestamp() + TOKEN_TTL_SECONDS,
        jti: random_jti(),
    };
    let payload_json = serde_json::to_vec(&payload).expect("TokenPayload always serializes");
    let payload_b64 = URL_SAFE_NO_PAD.encode(&payload_json);

    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(&payload_json);
    let sig_b64 = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    format!("{payload_b64}.{sig_b64}")
}

pub fn verify(token: &str, key: &[u8; 32], expected_sub: &str) -> Result<TokenPayload, TokenError> {
    let (payload_b64, sig_b64) = token.split_once('.').ok_or(TokenError::Invalid)?;
    let payload_json = URL_SAFE_NO_PAD.decode(payload_b64).map_err(|_| TokenError::Invalid)?;
    let sig = URL_SAFE_NO_PAD.decode(sig_b64).map_err(|_| TokenError::Invalid)?;

    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(&payload_json);
    mac.verify_slice(&sig).map_err(|_| TokenError::Invalid)?;

    let payload: TokenPayload = serde_json::from_slice(&payload_json).map_err(|_| TokenError::Invalid)?;
    if payload.sub != expected_sub {
        return Err(TokenError::Invalid);
    }
    if payload.exp <= Utc::now().timestamp() {
        return Err(TokenError::Expired);
    }
    Ok(payload)
}

pub fn needs_refresh(payload: &TokenPayload) -> bool {
    payload.exp - Utc::now().timestamp() <= REFRESH_WINDOW_SECONDS
}

fn random_jti() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
