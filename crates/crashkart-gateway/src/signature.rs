//! HMAC-SHA256 signature checks for gateway webhooks and checkout callbacks.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::GatewayError;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `payload` under `secret`.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidSignature`] if the secret is rejected as a
/// key (HMAC accepts any length, so this only guards the API contract).
pub fn sign(secret: &str, payload: &[u8]) -> Result<String, GatewayError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| GatewayError::InvalidSignature(e.to_string()))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify the `x-gateway-signature` header of a webhook delivery against
/// the raw request body.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidSignature`] on mismatch.
pub fn verify_webhook_signature(
    secret: &str,
    body: &[u8],
    signature: &str,
) -> Result<(), GatewayError> {
    let expected = sign(secret, body)?;
    compare(&expected, signature)
}

/// Verify the signature returned to the browser after checkout, computed
/// over `"{gateway_order_id}|{gateway_payment_id}"` with the key secret.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidSignature`] on mismatch.
pub fn verify_checkout_signature(
    key_secret: &str,
    gateway_order_id: &str,
    gateway_payment_id: &str,
    signature: &str,
) -> Result<(), GatewayError> {
    let payload = format!("{gateway_order_id}|{gateway_payment_id}");
    let expected = sign(key_secret, payload.as_bytes())?;
    compare(&expected, signature)
}

fn compare(expected: &str, provided: &str) -> Result<(), GatewayError> {
    let provided = provided.trim().to_ascii_lowercase();
    if expected.len() == provided.len()
        && bool::from(expected.as_bytes().ct_eq(provided.as_bytes()))
    {
        tracing::debug!("gateway signature verified");
        Ok(())
    } else {
        Err(GatewayError::InvalidSignature("signature mismatch".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_matches_known_vector() {
        // RFC 4231 test case 2
        let sig = sign("Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn webhook_signature_round_trips() {
        let body = br#"{"event":"payment.captured"}"#;
        let sig = sign("whsec", body).unwrap();
        assert!(verify_webhook_signature("whsec", body, &sig).is_ok());
    }

    #[test]
    fn uppercase_hex_is_accepted() {
        let body = b"payload";
        let sig = sign("whsec", body).unwrap().to_ascii_uppercase();
        assert!(verify_webhook_signature("whsec", body, &sig).is_ok());
    }

    #[test]
    fn tampered_body_is_rejected() {
        let sig = sign("whsec", b"amount=100").unwrap();
        let err = verify_webhook_signature("whsec", b"amount=900", &sig).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidSignature(_)));
    }

    #[test]
    fn truncated_signature_is_rejected() {
        let sig = sign("whsec", b"body").unwrap();
        assert!(verify_webhook_signature("whsec", b"body", &sig[..10]).is_err());
    }

    #[test]
    fn checkout_signature_binds_order_and_payment() {
        let sig = sign("key_secret", b"order_1|pay_1").unwrap();
        assert!(verify_checkout_signature("key_secret", "order_1", "pay_1", &sig).is_ok());
        assert!(verify_checkout_signature("key_secret", "order_1", "pay_2", &sig).is_err());
    }
}
