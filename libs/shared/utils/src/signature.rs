use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC-SHA256 of the raw webhook body
pub const SIGNATURE_HEADER: &str = "x-conferencing-signature";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("shared secret is not configured")]
    MissingSecret,
    #[error("signature header is missing")]
    MissingSignature,
    #[error("signature is not valid hex")]
    Encoding,
    #[error("signature does not match payload")]
    Mismatch,
}

fn compute(secret: &str, body: &[u8]) -> Result<Vec<u8>, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::MissingSecret)?;
    mac.update(body);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Hex signature for `body`, as the conferencing provider computes it
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String, SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::MissingSecret);
    }
    compute(secret, body).map(hex::encode)
}

/// Verifies `signature` (hex, optionally prefixed with `sha256=`) in constant time
pub fn verify_signature(secret: &str, body: &[u8], signature: Option<&str>) -> Result<(), SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::MissingSecret);
    }

    let raw = signature
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(SignatureError::MissingSignature)?;
    let hex_value = raw.strip_prefix("sha256=").unwrap_or(raw);
    let provided = hex::decode(hex_value).map_err(|_| SignatureError::Encoding)?;
    let expected = compute(secret, body)?;

    if provided.len() == expected.len() && bool::from(provided.ct_eq(&expected)) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}
