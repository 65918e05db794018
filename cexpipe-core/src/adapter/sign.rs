//! HMAC request signatures, hex encoded.

use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384};

use super::AdapterError;

pub fn hmac_sha256_hex(secret: &str, message: &str) -> Result<String, AdapterError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| AdapterError::Sign(e.to_string()))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub fn hmac_sha384_hex(secret: &str, message: &str) -> Result<String, AdapterError> {
    let mut mac = Hmac::<Sha384>::new_from_slice(secret.as_bytes())
        .map_err(|e| AdapterError::Sign(e.to_string()))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
