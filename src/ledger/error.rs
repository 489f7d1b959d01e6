//! Ledger-specific error types.
//!
//! Provides granular error types for payment and invoice operations, enabling
//! better error handling and more informative error messages for API consumers.

use std::fmt;

/// Ledger-specific errors.
///
/// These errors provide more context than generic errors and can be
/// converted to `GymLedgerError` for HTTP responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    // Lookup errors
    /// Invoice not found or doesn't belong to the caller's tenant.
    InvoiceNotFound { invoice_id: String },
    /// Payment not found or doesn't belong to the caller's tenant.
    PaymentNotFound { payment_id: String },

    // State errors
    /// The entity is not in a state that permits the requested operation.
    InvalidState { message: String },

    // Webhook errors
    /// Webhook or payment signature verification failed.
    SignatureInvalid,
    /// Callback payload is malformed.
    InvalidPayload { message: String },

    // Identifier allocation
    /// Identifier allocation exhausted all attempts, including the fallback.
    IdExhausted { family: String },
    /// A storage uniqueness constraint fired on insert.
    DuplicateKey { constraint: String },

    // Upstream errors
    /// The payment gateway call failed.
    GatewayError { operation: String, message: String },
    /// Gateway credentials or another required setting is missing.
    ConfigurationError { message: String },

    // General errors
    /// An unexpected internal error occurred.
    Internal { message: String },
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvoiceNotFound { invoice_id } => {
                write!(f, "Invoice not found: {}", invoice_id)
            }
            Self::PaymentNotFound { payment_id } => {
                write!(f, "Payment not found: {}", payment_id)
            }
            Self::InvalidState { message } => {
                write!(f, "Invalid state: {}", message)
            }
            Self::SignatureInvalid => {
                write!(f, "Invalid signature")
            }
            Self::InvalidPayload { message } => {
                write!(f, "Invalid callback payload: {}", message)
            }
            Self::IdExhausted { family } => {
                write!(f, "Identifier allocation exhausted for '{}'", family)
            }
            Self::DuplicateKey { constraint } => {
                write!(f, "Duplicate key on constraint '{}'", constraint)
            }
            Self::GatewayError { operation, message } => {
                write!(f, "Gateway error during '{}': {}", operation, message)
            }
            Self::ConfigurationError { message } => {
                write!(f, "Configuration error: {}", message)
            }
            Self::Internal { message } => {
                write!(f, "Internal ledger error: {}", message)
            }
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<LedgerError> for crate::error::GymLedgerError {
    fn from(err: LedgerError) -> Self {
        match &err {
            // Map to NotFound
            LedgerError::InvoiceNotFound { .. } | LedgerError::PaymentNotFound { .. } => {
                crate::error::GymLedgerError::NotFound(err.to_string())
            }

            // Map to Unauthorized (the gateway's retry machinery must not see a 5xx here)
            LedgerError::SignatureInvalid => {
                crate::error::GymLedgerError::Unauthorized(err.to_string())
            }

            // Map to BadRequest (client errors)
            LedgerError::InvalidState { .. }
            | LedgerError::InvalidPayload { .. }
            | LedgerError::DuplicateKey { .. } => {
                crate::error::GymLedgerError::BadRequest(err.to_string())
            }

            // Map to Internal (server errors; gateway is expected to redeliver webhooks)
            LedgerError::IdExhausted { .. }
            | LedgerError::GatewayError { .. }
            | LedgerError::ConfigurationError { .. }
            | LedgerError::Internal { .. } => {
                crate::error::GymLedgerError::Internal(err.to_string())
            }
        }
    }
}

impl LedgerError {
    /// Check if this is a client error (4xx).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvoiceNotFound { .. }
                | Self::PaymentNotFound { .. }
                | Self::InvalidState { .. }
                | Self::SignatureInvalid
                | Self::InvalidPayload { .. }
                | Self::DuplicateKey { .. }
        )
    }

    /// Check if this error is retryable by the caller.
    ///
    /// Duplicate-key violations are retryable with a freshly allocated
    /// identifier; gateway errors are retryable once the upstream recovers.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. } | Self::GatewayError { .. })
    }
}
