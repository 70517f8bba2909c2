//! Webhook signature verification for C1 (Webhook Ingress).
//!
//! Each source (tracker, VCS) signs its delivery with HMAC-SHA256 over the
//! raw request body, carried in an `X-Signature` header. Verification uses
//! a constant-time comparison to avoid leaking timing information about
//! how much of the signature matched.

pub mod guard;

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Errors that can occur during webhook signature verification.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("missing X-Signature header")]
    MissingSignature,

    #[error("signature is not valid hex: {0}")]
    InvalidHex(String),

    #[error("signature verification failed")]
    Mismatch,

    #[error("missing webhook secret")]
    MissingSecret,
}

/// The shared secret used to sign/verify deliveries from one source.
#[derive(Debug, Clone)]
pub struct WebhookSecret(Vec<u8>);

impl WebhookSecret {
    pub fn new(secret: Vec<u8>) -> Self {
        Self(secret)
    }

    /// Load from the `WEBHOOK_SECRET` environment variable (hex-encoded).
    pub fn from_env() -> Result<Self, SignatureError> {
        let hex_secret = std::env::var("WEBHOOK_SECRET").map_err(|_| SignatureError::MissingSecret)?;
        let bytes = hex::decode(&hex_secret)
            .map_err(|e| SignatureError::InvalidHex(format!("WEBHOOK_SECRET is not valid hex: {e}")))?;
        Ok(Self(bytes))
    }
}

/// Compute the hex-encoded HMAC-SHA256 signature for a raw body.
pub fn sign(secret: &WebhookSecret, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(&secret.0).expect("HMAC accepts a key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex-encoded `X-Signature` header value against the raw body,
/// using a constant-time comparison.
pub fn verify(secret: &WebhookSecret, body: &[u8], signature_hex: &str) -> Result<(), SignatureError> {
    let provided = hex::decode(signature_hex).map_err(|e| SignatureError::InvalidHex(e.to_string()))?;

    let mut mac = HmacSha256::new_from_slice(&secret.0).expect("HMAC accepts a key of any size");
    mac.update(body);
    mac.verify_slice(&provided).map_err(|_| SignatureError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_secret() -> WebhookSecret {
        WebhookSecret::new(b"devrelay-webhook-test-secret".to_vec())
    }

    #[test]
    fn sign_then_verify_roundtrip() {
        let secret = test_secret();
        let body = br#"{"event":"issue.updated"}"#;
        let sig = sign(&secret, body);
        assert!(verify(&secret, body, &sig).is_ok());
    }

    #[test]
    fn reject_tampered_body() {
        let secret = test_secret();
        let body = br#"{"event":"issue.updated"}"#;
        let sig = sign(&secret, body);
        let tampered = br#"{"event":"issue.deleted"}"#;
        assert!(matches!(verify(&secret, tampered, &sig), Err(SignatureError::Mismatch)));
    }

    #[test]
    fn reject_wrong_secret() {
        let secret = test_secret();
        let body = br#"{"event":"issue.updated"}"#;
        let sig = sign(&secret, body);
        let other = WebhookSecret::new(b"different-secret".to_vec());
        assert!(matches!(verify(&other, body, &sig), Err(SignatureError::Mismatch)));
    }

    #[test]
    fn reject_non_hex_signature() {
        let secret = test_secret();
        let body = b"payload";
        let result = verify(&secret, body, "not-hex!!");
        assert!(matches!(result, Err(SignatureError::InvalidHex(_))));
    }

    #[test]
    fn different_bodies_produce_different_signatures() {
        let secret = test_secret();
        let sig_a = sign(&secret, b"a");
        let sig_b = sign(&secret, b"b");
        assert_ne!(sig_a, sig_b);
    }
}
