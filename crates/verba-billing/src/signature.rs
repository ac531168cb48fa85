//! Webhook signature verification.
//!
//! The provider signs each delivery with a header of the form
//! `t=<unix-ts>,v1=<hex hmac>`, where the MAC is HMAC-SHA256 over
//! `"{t}.{raw body}"`. Verification happens on the raw bytes before any
//! JSON parsing, and rejects timestamps outside the tolerance window to
//! bound replay.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use verba_types::SIGNATURE_TOLERANCE_SECS;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("malformed signature header")]
    Malformed,

    #[error("timestamp outside tolerance window")]
    TimestampOutOfRange,

    #[error("signature mismatch")]
    Mismatch,
}

/// Parsed `t=...,v1=...` header.
#[derive(Debug, Clone)]
pub struct SignatureHeader {
    pub timestamp: u64,
    pub signature: Vec<u8>,
}

/// Parse the signature header. Unknown `k=v` pairs are ignored so the
/// provider can add schemes without breaking us.
pub fn parse_header(header: &str) -> Result<SignatureHeader, SignatureError> {
    let mut timestamp = None;
    let mut signature = None;

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            return Err(SignatureError::Malformed);
        };
        match key {
            "t" => timestamp = value.parse::<u64>().ok(),
            "v1" => signature = hex::decode(value).ok(),
            _ => {}
        }
    }

    match (timestamp, signature) {
        (Some(timestamp), Some(signature)) if !signature.is_empty() => Ok(SignatureHeader {
            timestamp,
            signature,
        }),
        _ => Err(SignatureError::Malformed),
    }
}

/// Verify a raw webhook body against its signature header.
pub fn verify(
    secret: &str,
    payload: &[u8],
    header: &str,
    now: u64,
) -> Result<(), SignatureError> {
    let parsed = parse_header(header)?;

    let drift = now.abs_diff(parsed.timestamp);
    if drift > SIGNATURE_TOLERANCE_SECS {
        return Err(SignatureError::TimestampOutOfRange);
    }

    let expected = compute(secret, parsed.timestamp, payload);
    if expected.ct_eq(&parsed.signature).into() {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Compute the MAC for a (timestamp, payload) pair. Exposed so tests and
/// tooling can produce valid deliveries.
pub fn compute(secret: &str, timestamp: u64, payload: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Render a valid signature header for a payload.
pub fn sign(secret: &str, timestamp: u64, payload: &[u8]) -> String {
    let mac = compute(secret, timestamp, payload);
    format!("t={timestamp},v1={}", hex::encode(mac))
}
