//! HMAC signatures of webhook payloads

use super::WebhookError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex encoded HMAC-SHA256 of `payload` keyed with `key`
pub fn sign(payload: &[u8], key: &str) -> Result<String, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).map_err(|e| WebhookError::Signing(e.to_string()))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check a signature produced by [`sign`] in constant time
pub fn verify(payload: &[u8], key: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    match HmacSha256::new_from_slice(key.as_bytes()) {
        Ok(mut mac) => {
            mac.update(payload);
            mac.verify_slice(&expected).is_ok()
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_matches_rfc4231_vector() {
        // RFC 4231 test case 2
        let signature = sign(b"what do ya want for nothing?", "Jefe").unwrap();
        assert_eq!(
            signature,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_verify() {
        let signature = sign(b"{\"id\":\"1\"}", "secret").unwrap();
        assert!(verify(b"{\"id\":\"1\"}", "secret", &signature));
        assert!(!verify(b"{\"id\":\"2\"}", "secret", &signature));
        assert!(!verify(b"{\"id\":\"1\"}", "other", &signature));
        assert!(!verify(b"{\"id\":\"1\"}", "secret", "not-hex"));
    }
}
