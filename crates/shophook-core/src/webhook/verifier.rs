//! Webhook signature verification.

use secrecy::{ExposeSecret, SecretString};

use crate::crypto::verify_hmac_base64;

/// Header carrying the base64 HMAC-SHA256 of the raw body.
pub const HEADER_HMAC: &str = "X-Shopify-Hmac-SHA256";

/// Verifies `provided_signature` against the HMAC of `raw_body` keyed with `shared_secret`.
///
/// Returns false on any mismatch and on empty inputs.
pub fn verify(raw_body: &[u8], provided_signature: &str, shared_secret: &str) -> bool {
    verify_hmac_base64(shared_secret, provided_signature, raw_body)
}

/// Verifier for Shopify webhook signatures.
///
/// Holds the current shared secret and, during a rotation window, the
/// previous one.
#[derive(Clone)]
pub struct ShopifyVerifier {
    secret: SecretString,
    previous_secret: Option<SecretString>,
}

impl ShopifyVerifier {
    /// Creates a new verifier with the shared secret.
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            previous_secret: None,
        }
    }

    /// Also accepts signatures made with a secret that is being rotated out.
    pub fn with_previous_secret(mut self, previous: Option<SecretString>) -> Self {
        self.previous_secret = previous;
        self
    }

    /// Verifies a webhook signature.
    ///
    /// # Arguments
    /// * `signature` - The X-Shopify-Hmac-SHA256 header value, if present
    /// * `body` - The raw request body
    pub fn verify(&self, signature: Option<&str>, body: &[u8]) -> bool {
        let Some(signature) = signature else {
            return false;
        };

        if verify(body, signature, self.secret.expose_secret()) {
            return true;
        }

        match &self.previous_secret {
            Some(previous) => verify(body, signature, previous.expose_secret()),
            None => false,
        }
    }
}

impl std::fmt::Debug for ShopifyVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShopifyVerifier")
            .field("rotating", &self.previous_secret.is_some())
            .finish()
    }
}
