use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::api::ApiError;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 signature over the urlencoded query string, hex-encoded,
/// as the venue expects it appended as `signature=`
pub fn sign_query(query: &str, api_secret: &str) -> Result<String, ApiError> {
    let mut mac = HmacSha256::new_from_slice(api_secret.as_bytes())
        .map_err(|e| ApiError::Signing(e.to_string()))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
