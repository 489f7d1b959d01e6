//! Runtime configuration.
//!
//! Configuration is read from the environment once at startup. Secrets are
//! held as [`SecretString`] so they never land in debug output or logs.

use secrecy::SecretString;

use crate::error::{GymLedgerError, Result};

/// Deployment mode, driven by `GYMLEDGER_ENV`.
///
/// The mode decides how missing gateway secrets are treated: development
/// deployments may run without a webhook secret (with a loud warning),
/// production deployments fail closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeploymentMode {
    /// Local development. Permissive about missing gateway secrets.
    Development,
    /// Production. Missing secrets are a configuration error.
    #[default]
    Production,
}

impl DeploymentMode {
    /// Read the mode from `GYMLEDGER_ENV`. Anything other than
    /// "development"/"dev" is treated as production.
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var("GYMLEDGER_ENV").as_deref() {
            Ok("development") | Ok("dev") => Self::Development,
            _ => Self::Production,
        }
    }

    /// Whether this is a development deployment.
    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }
}

/// Payment gateway credentials and webhook verification settings.
#[derive(Clone)]
pub struct GatewayConfig {
    /// Public API key id.
    pub key_id: Option<String>,
    /// API key secret, used to sign orders and verify checkout signatures.
    pub key_secret: Option<SecretString>,
    /// Webhook signing secret, used to verify inbound callbacks.
    pub webhook_secret: Option<SecretString>,
    /// Deployment mode.
    pub mode: DeploymentMode,
}

impl GatewayConfig {
    /// Read gateway configuration from the environment.
    ///
    /// Variables: `GYMLEDGER_GATEWAY_KEY_ID`, `GYMLEDGER_GATEWAY_KEY_SECRET`,
    /// `GYMLEDGER_GATEWAY_WEBHOOK_SECRET`, `GYMLEDGER_ENV`.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            key_id: std::env::var("GYMLEDGER_GATEWAY_KEY_ID").ok(),
            key_secret: std::env::var("GYMLEDGER_GATEWAY_KEY_SECRET")
                .ok()
                .map(SecretString::new),
            webhook_secret: std::env::var("GYMLEDGER_GATEWAY_WEBHOOK_SECRET")
                .ok()
                .map(SecretString::new),
            mode: DeploymentMode::from_env(),
        }
    }

    /// Configuration for a deployment with no gateway at all (cash only).
    #[must_use]
    pub fn unconfigured(mode: DeploymentMode) -> Self {
        Self {
            key_id: None,
            key_secret: None,
            webhook_secret: None,
            mode,
        }
    }

    /// Require API credentials to be present, for code paths that call out
    /// to the gateway.
    pub fn require_credentials(&self) -> Result<(&str, &SecretString)> {
        match (self.key_id.as_deref(), self.key_secret.as_ref()) {
            (Some(id), Some(secret)) => Ok((id, secret)),
            _ => Err(GymLedgerError::Internal(
                "gateway API credentials are not configured".to_string(),
            )),
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("key_id", &self.key_id)
            .field("key_secret", &self.key_secret.as_ref().map(|_| "<redacted>"))
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_defaults_to_production() {
        assert_eq!(DeploymentMode::default(), DeploymentMode::Production);
        assert!(!DeploymentMode::Production.is_development());
        assert!(DeploymentMode::Development.is_development());
    }

    #[test]
    fn test_require_credentials() {
        let config = GatewayConfig {
            key_id: Some("key_1".to_string()),
            key_secret: Some(SecretString::new("s3cret".to_string())),
            webhook_secret: None,
            mode: DeploymentMode::Production,
        };
        assert!(config.require_credentials().is_ok());

        let config = GatewayConfig::unconfigured(DeploymentMode::Production);
        assert!(config.require_credentials().is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = GatewayConfig {
            key_id: Some("key_1".to_string()),
            key_secret: Some(SecretString::new("s3cret".to_string())),
            webhook_secret: Some(SecretString::new("whsec".to_string())),
            mode: DeploymentMode::Production,
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("s3cret"));
        assert!(!debug.contains("whsec"));
    }
}
