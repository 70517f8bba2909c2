//! Request-level signature guard for the `POST /webhook/<source>` endpoint.

use super::{SignatureError, WebhookSecret, verify};

/// Name of the header carrying the hex-encoded HMAC-SHA256 signature.
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Verify an inbound webhook delivery: look up the signature header and
/// check it against the raw body.
///
/// `header_value` is `None` when the header was absent from the request.
pub fn check_request(
    secret: &WebhookSecret,
    header_value: Option<&str>,
    body: &[u8],
) -> Result<(), SignatureError> {
    let signature = header_value.ok_or(SignatureError::MissingSignature)?;
    verify(secret, body, signature)
}

#[cfg(test)]
mod tests {
    use super::super::sign;
    use super::*;

    fn test_secret() -> WebhookSecret {
        WebhookSecret::new(b"guard-test-secret".to_vec())
    }

    #[test]
    fn accepts_matching_signature_header() {
        let secret = test_secret();
        let body = b"{\"ok\":true}";
        let sig = sign(&secret, body);
        assert!(check_request(&secret, Some(&sig), body).is_ok());
    }

    #[test]
    fn rejects_missing_header() {
        let secret = test_secret();
        let result = check_request(&secret, None, b"body");
        assert!(matches!(result, Err(SignatureError::MissingSignature)));
    }

    #[test]
    fn rejects_wrong_signature() {
        let secret = test_secret();
        let result = check_request(&secret, Some("deadbeef"), b"body");
        assert!(matches!(result, Err(SignatureError::Mismatch)));
    }
}
