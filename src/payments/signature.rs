//! Webhook signature checks shared by the gateway adapters.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

pub fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> Result<String, ServiceError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("invalid HMAC key: {}", e)))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// Plain hex HMAC over the raw body (Razorpay style).
pub fn verify_body_signature(
    secret: &str,
    payload: &[u8],
    provided: &str,
) -> Result<(), ServiceError> {
    let expected = hmac_sha256_hex(secret, payload)?;
    if constant_time_eq(&expected, provided.trim()) {
        Ok(())
    } else {
        Err(ServiceError::InvalidSignature("signature mismatch".into()))
    }
}

/// Parsed `Stripe-Signature` header: `t=<unix>,v1=<hex>[,v1=<hex>...]`.
#[derive(Debug, PartialEq, Eq)]
pub struct TimestampedSignature {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

impl TimestampedSignature {
    pub fn parse(header: &str) -> Result<Self, ServiceError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) if !value.is_empty() => signatures.push(value.to_string()),
                _ => {}
            }
        }

        match timestamp {
            Some(timestamp) if !signatures.is_empty() => Ok(Self {
                timestamp,
                signatures,
            }),
            _ => Err(ServiceError::InvalidSignature(
                "malformed signature header".into(),
            )),
        }
    }
}

/// HMAC over `"{t}.{body}"`, rejecting timestamps outside `tolerance_secs` of `now`.
pub fn verify_timestamped_signature(
    secret: &str,
    header: &str,
    payload: &[u8],
    now: i64,
    tolerance_secs: u64,
) -> Result<(), ServiceError> {
    let parsed = TimestampedSignature::parse(header)?;
    let skewed = now
        .checked_sub(parsed.timestamp)
        .map_or(true, |age| age.unsigned_abs() > tolerance_secs);
    if skewed {
        return Err(ServiceError::InvalidSignature(
            "signature timestamp outside tolerance".into(),
        ));
    }

    let mut signed = format!("{}.", parsed.timestamp).into_bytes();
    signed.extend_from_slice(payload);
    let expected = hmac_sha256_hex(secret, &signed)?;

    if parsed
        .signatures
        .iter()
        .any(|candidate| constant_time_eq(&expected, candidate))
    {
        Ok(())
    } else {
        Err(ServiceError::InvalidSignature("signature mismatch".into()))
    }
}
