//! Audit logging for money-path operations.
//!
//! The audit sink is an external, append-only collaborator consumed through
//! the [`AuditLogger`] trait. Writes are best-effort: implementations must
//! handle their own failures and never disrupt the payment flow that emitted
//! the event. A queue-backed implementation can consume events asynchronously
//! so a slow sink never affects webhook response latency.

use std::fmt;

use async_trait::async_trait;

/// Audit event types for ledger operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditEvent {
    /// Operator-entered or callback-derived payment recorded.
    PaymentRecorded {
        tenant_id: String,
        payment_id: String,
        invoice_id: String,
        receipt_number: String,
        amount: i64,
    },
    /// Payment fully or partially refunded.
    PaymentRefunded {
        tenant_id: String,
        payment_id: String,
        refund_amount: i64,
    },
    /// Gateway callback received and durably recorded.
    WebhookReceived {
        event_id: String,
        event_type: String,
    },
    /// Gateway callback finished processing.
    WebhookProcessed {
        event_id: String,
        event_type: String,
        outcome: String,
    },
    /// Membership activated from a paid invoice.
    MembershipActivated {
        tenant_id: String,
        member_id: String,
        plan_id: String,
    },
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PaymentRecorded {
                tenant_id,
                payment_id,
                invoice_id,
                receipt_number,
                amount,
            } => {
                write!(
                    f,
                    "Payment recorded: tenant={}, payment={}, invoice={}, receipt={}, amount={}",
                    tenant_id, payment_id, invoice_id, receipt_number, amount
                )
            }
            Self::PaymentRefunded {
                tenant_id,
                payment_id,
                refund_amount,
            } => {
                write!(
                    f,
                    "Payment refunded: tenant={}, payment={}, amount={}",
                    tenant_id, payment_id, refund_amount
                )
            }
            Self::WebhookReceived { event_id, event_type } => {
                write!(f, "Webhook received: event={}, type={}", event_id, event_type)
            }
            Self::WebhookProcessed {
                event_id,
                event_type,
                outcome,
            } => {
                write!(
                    f,
                    "Webhook processed: event={}, type={}, outcome={}",
                    event_id, event_type, outcome
                )
            }
            Self::MembershipActivated {
                tenant_id,
                member_id,
                plan_id,
            } => {
                write!(
                    f,
                    "Membership activated: tenant={}, member={}, plan={}",
                    tenant_id, member_id, plan_id
                )
            }
        }
    }
}

/// Trait for audit logging backends.
///
/// Implementations should handle failures gracefully to avoid disrupting
/// ledger operations.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    /// Log an audit event.
    async fn log(&self, event: AuditEvent);
}

/// No-op audit logger that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpAuditLogger;

#[async_trait]
impl AuditLogger for NoOpAuditLogger {
    async fn log(&self, _event: AuditEvent) {
        // No-op
    }
}

/// Tracing-based audit logger.
///
/// Logs audit events using the `tracing` crate at INFO level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, event: AuditEvent) {
        tracing::info!(
            target: "gymledger::audit",
            event_type = %event_kind(&event),
            "{}", event
        );
    }
}

/// Get the event kind as a string for structured logging.
fn event_kind(event: &AuditEvent) -> &'static str {
    match event {
        AuditEvent::PaymentRecorded { .. } => "payment_recorded",
        AuditEvent::PaymentRefunded { .. } => "payment_refunded",
        AuditEvent::WebhookReceived { .. } => "webhook_received",
        AuditEvent::WebhookProcessed { .. } => "webhook_processed",
        AuditEvent::MembershipActivated { .. } => "membership_activated",
    }
}

/// Recording audit logger for testing.
#[cfg(any(test, feature = "test-ledger"))]
pub mod test {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    /// Audit logger that captures events for assertions.
    #[derive(Default, Clone)]
    pub struct RecordingAuditLogger {
        events: Arc<Mutex<Vec<AuditEvent>>>,
    }

    impl RecordingAuditLogger {
        /// Create a new recording logger.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// All events logged so far.
        pub async fn events(&self) -> Vec<AuditEvent> {
            self.events.lock().await.clone()
        }
    }

    #[async_trait]
    impl AuditLogger for RecordingAuditLogger {
        async fn log(&self, event: AuditEvent) {
            self.events.lock().await.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test::RecordingAuditLogger;
    use super::*;

    #[tokio::test]
    async fn test_noop_logger() {
        let logger = NoOpAuditLogger;
        logger
            .log(AuditEvent::WebhookReceived {
                event_id: "evt_1".to_string(),
                event_type: "payment.captured".to_string(),
            })
            .await;
        // Just verifies it doesn't panic
    }

    #[tokio::test]
    async fn test_recording_logger() {
        let logger = RecordingAuditLogger::new();

        logger
            .log(AuditEvent::PaymentRecorded {
                tenant_id: "tenant_1".to_string(),
                payment_id: "pay_1".to_string(),
                invoice_id: "inv_1".to_string(),
                receipt_number: "RCP0001".to_string(),
                amount: 2000,
            })
            .await;
        logger
            .log(AuditEvent::PaymentRefunded {
                tenant_id: "tenant_1".to_string(),
                payment_id: "pay_1".to_string(),
                refund_amount: 400,
            })
            .await;

        let events = logger.events().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], AuditEvent::PaymentRecorded { .. }));
        assert!(matches!(events[1], AuditEvent::PaymentRefunded { .. }));
    }

    #[test]
    fn test_event_display() {
        let event = AuditEvent::PaymentRecorded {
            tenant_id: "tenant_1".to_string(),
            payment_id: "pay_1".to_string(),
            invoice_id: "inv_1".to_string(),
            receipt_number: "RCP0001".to_string(),
            amount: 2000,
        };
        let display = format!("{}", event);
        assert!(display.contains("tenant_1"));
        assert!(display.contains("RCP0001"));
        assert!(display.contains("2000"));
    }

    #[test]
    fn test_event_kind() {
        assert_eq!(
            event_kind(&AuditEvent::WebhookReceived {
                event_id: String::new(),
                event_type: String::new(),
            }),
            "webhook_received"
        );
        assert_eq!(
            event_kind(&AuditEvent::MembershipActivated {
                tenant_id: String::new(),
                member_id: String::new(),
                plan_id: String::new(),
            }),
            "membership_activated"
        );
    }
}
