//! Gateway callback signature verification.
//!
//! Callbacks carry an HMAC-SHA256 signature over the raw request body,
//! hex-encoded, keyed with the webhook signing secret. Comparison is
//! constant-time. Verification happens on the raw bytes before any JSON
//! parsing.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::DeploymentMode;
use crate::ledger::LedgerError;

type HmacSha256 = Hmac<Sha256>;

/// Trait for verifying callback signatures.
///
/// Providers differ in signature scheme; implement this to support yours.
#[async_trait]
pub trait WebhookVerifier: Send + Sync {
    /// Verify the signature over the raw payload bytes.
    ///
    /// `Ok(true)` on a valid signature, `Ok(false)` on an invalid one, `Err`
    /// only for configuration problems.
    async fn verify_signature(&self, payload: &[u8], signature: &str)
        -> Result<bool, LedgerError>;
}

/// HMAC-SHA256 verifier with timing-safe comparison.
pub struct HmacSha256Verifier {
    secret: SecretString,
}

impl HmacSha256Verifier {
    /// Create a verifier keyed with the webhook signing secret.
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    fn compute(&self, payload: &[u8]) -> Option<Vec<u8>> {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes()).ok()?;
        mac.update(payload);
        Some(mac.finalize().into_bytes().to_vec())
    }
}

#[async_trait]
impl WebhookVerifier for HmacSha256Verifier {
    async fn verify_signature(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<bool, LedgerError> {
        let Ok(provided) = hex::decode(signature) else {
            tracing::debug!(target: "gymledger::webhooks", "callback signature is not valid hex");
            return Ok(false);
        };
        let Some(expected) = self.compute(payload) else {
            return Err(LedgerError::ConfigurationError {
                message: "webhook secret is not a usable HMAC key".to_string(),
            });
        };

        if expected.len() != provided.len() {
            return Ok(false);
        }
        Ok(expected.ct_eq(&provided).into())
    }
}

/// Verifier for the configured deployment.
///
/// With a secret configured it delegates to [`HmacSha256Verifier`]. Without
/// one, development deployments accept everything (with a warning on every
/// callback); production deployments fail closed with a configuration error
/// rather than silently accepting unsigned callbacks.
pub struct CallbackVerifier {
    inner: Option<HmacSha256Verifier>,
    mode: DeploymentMode,
}

impl CallbackVerifier {
    /// Create a verifier from the optional webhook secret and deployment mode.
    #[must_use]
    pub fn new(secret: Option<SecretString>, mode: DeploymentMode) -> Self {
        Self {
            inner: secret.map(HmacSha256Verifier::new),
            mode,
        }
    }
}

#[async_trait]
impl WebhookVerifier for CallbackVerifier {
    async fn verify_signature(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<bool, LedgerError> {
        match &self.inner {
            Some(verifier) => verifier.verify_signature(payload, signature).await,
            None if self.mode.is_development() => {
                tracing::warn!(
                    target: "gymledger::webhooks",
                    "no webhook secret configured, accepting callback unverified (development mode)"
                );
                Ok(true)
            }
            None => Err(LedgerError::ConfigurationError {
                message: "webhook secret is not configured".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &[u8], payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret).unwrap();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    fn secret() -> SecretString {
        SecretString::new("whsec_test".to_string())
    }

    #[tokio::test]
    async fn test_valid_signature() {
        let verifier = HmacSha256Verifier::new(secret());
        let payload = br#"{"event":"payment.captured"}"#;
        let signature = sign(b"whsec_test", payload);
        assert!(verifier.verify_signature(payload, &signature).await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let verifier = HmacSha256Verifier::new(secret());
        let payload = b"payload";
        let signature = sign(b"other_secret", payload);
        assert!(!verifier.verify_signature(payload, &signature).await.unwrap());
    }

    #[tokio::test]
    async fn test_modified_payload_rejected() {
        let verifier = HmacSha256Verifier::new(secret());
        let signature = sign(b"whsec_test", b"original");
        assert!(!verifier.verify_signature(b"modified", &signature).await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_signatures_rejected() {
        let verifier = HmacSha256Verifier::new(secret());
        for bad in ["", "not-hex", "abc", "zz00"] {
            assert!(
                !verifier.verify_signature(b"payload", bad).await.unwrap(),
                "signature {:?} should be rejected",
                bad
            );
        }
    }

    #[tokio::test]
    async fn test_no_secret_development_accepts() {
        let verifier = CallbackVerifier::new(None, DeploymentMode::Development);
        assert!(verifier.verify_signature(b"payload", "").await.unwrap());
    }

    #[tokio::test]
    async fn test_no_secret_production_fails_closed() {
        let verifier = CallbackVerifier::new(None, DeploymentMode::Production);
        let result = verifier.verify_signature(b"payload", "sig").await;
        assert!(matches!(result, Err(LedgerError::ConfigurationError { .. })));
    }

    #[tokio::test]
    async fn test_configured_callback_verifier_delegates() {
        let verifier = CallbackVerifier::new(Some(secret()), DeploymentMode::Production);
        let payload = b"payload";
        let signature = sign(b"whsec_test", payload);
        assert!(verifier.verify_signature(payload, &signature).await.unwrap());
        assert!(!verifier.verify_signature(payload, "deadbeef").await.unwrap());
    }
}
