//! Payment confirmation notifications.
//!
//! Notification delivery is an external collaborator behind the
//! [`NotificationSender`] trait. Sends are strictly best-effort: callers log
//! and swallow failures, because a down SMS provider must never fail a
//! webhook or a payment entry. The trait is async so a queue-backed
//! implementation can enqueue and return immediately.

use async_trait::async_trait;

use crate::ledger::LedgerError;

/// A payment confirmation message for a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentConfirmation {
    /// Destination phone number.
    pub phone: String,
    /// Member display name.
    pub payer_name: String,
    /// Amount paid in minor units.
    pub amount: i64,
    /// Invoice the payment settled.
    pub invoice_number: String,
    /// Receipt number issued.
    pub receipt_number: String,
}

/// Trait for notification delivery backends.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Send a payment confirmation.
    async fn send_payment_confirmation(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<(), LedgerError>;
}

/// Notifier that only logs. The default for deployments without a
/// messaging provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationSender for TracingNotifier {
    async fn send_payment_confirmation(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<(), LedgerError> {
        tracing::info!(
            target: "gymledger::notify",
            phone = %confirmation.phone,
            receipt = %confirmation.receipt_number,
            amount = confirmation.amount,
            "payment confirmation (no provider configured)"
        );
        Ok(())
    }
}

/// Test notifiers.
#[cfg(any(test, feature = "test-ledger"))]
pub mod test {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    /// Notifier that captures confirmations for assertions.
    #[derive(Default, Clone)]
    pub struct RecordingNotifier {
        sent: Arc<Mutex<Vec<PaymentConfirmation>>>,
    }

    impl RecordingNotifier {
        /// Create a new recording notifier.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Confirmations sent so far.
        pub async fn sent(&self) -> Vec<PaymentConfirmation> {
            self.sent.lock().await.clone()
        }
    }

    #[async_trait]
    impl NotificationSender for RecordingNotifier {
        async fn send_payment_confirmation(
            &self,
            confirmation: &PaymentConfirmation,
        ) -> Result<(), LedgerError> {
            self.sent.lock().await.push(confirmation.clone());
            Ok(())
        }
    }

    /// Notifier that always fails, for exercising the best-effort contract.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct FailingNotifier;

    #[async_trait]
    impl NotificationSender for FailingNotifier {
        async fn send_payment_confirmation(
            &self,
            _confirmation: &PaymentConfirmation,
        ) -> Result<(), LedgerError> {
            Err(LedgerError::Internal {
                message: "notification provider unavailable".to_string(),
            })
        }
    }
}
