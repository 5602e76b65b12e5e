//! HMAC-SHA256 signatures on payment callbacks and webhooks.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Verifies payment assertions against the secret shared with the gateway.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Vec<u8>,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Hex signature over arbitrary bytes.
    pub fn sign(&self, payload: &[u8]) -> String {
        // HMAC accepts keys of any length
        let mut mac = match HmacSha256::new_from_slice(&self.secret) {
            Ok(mac) => mac,
            Err(_) => return String::new(),
        };
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Signature the client sends with a payment confirmation.
    pub fn sign_confirmation(&self, payment_intent_id: &str, payment_ref: &str) -> String {
        self.sign(format!("{payment_intent_id}|{payment_ref}").as_bytes())
    }

    pub fn verify_confirmation(&self, payment_intent_id: &str, payment_ref: &str, signature: &str) -> bool {
        let expected = self.sign_confirmation(payment_intent_id, payment_ref);
        constant_time_eq(&expected, signature)
    }

    /// Webhooks are signed over the raw request body.
    pub fn verify_body(&self, body: &[u8], signature: &str) -> bool {
        constant_time_eq(&self.sign(body), signature)
    }
}

fn constant_time_eq(expected: &str, provided: &str) -> bool {
    let provided = provided.trim().to_ascii_lowercase();
    !expected.is_empty()
        && expected.len() == provided.len()
        && bool::from(expected.as_bytes().ct_eq(provided.as_bytes()))
}
