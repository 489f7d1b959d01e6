//! Operator-entered payment creation.
//!
//! Records a payment against an invoice, allocates a receipt number, and
//! immediately reconciles the invoice. Receipt allocation is optimistic:
//! a uniqueness violation on insert is retried with a freshly allocated
//! number, the same bounded pattern enquiry and member creation use.

use uuid::Uuid;

use super::audit::{AuditEvent, AuditLogger};
use super::error::LedgerError;
use super::invoice::InvoiceReconciler;
use super::activation::MembershipActivator;
use super::model::{
    unix_now, GatewayCorrelation, Payment, PaymentMethod, PaymentStatus,
};
use super::sequence::{
    insert_with_retry, CodeFormat, SequenceGenerator, INSERT_ATTEMPTS, INSERT_BACKOFF,
};
use super::storage::{CodeFamily, LedgerStore};

/// Default receipt number format.
pub(crate) fn default_receipt_format() -> CodeFormat {
    CodeFormat::new("RCP", 6)
}

/// Allocate a receipt number and insert the payment, retrying on receipt
/// collisions. Shared by operator entry and webhook ingestion.
pub(crate) async fn insert_payment_with_receipt<S: LedgerStore>(
    store: &S,
    sequence: &SequenceGenerator<S>,
    format: &CodeFormat,
    tenant_id: &str,
    template: Payment,
) -> Result<Payment, LedgerError> {
    let template = &template;
    insert_with_retry(
        INSERT_ATTEMPTS,
        INSERT_BACKOFF,
        |attempt| async move {
            if attempt + 1 == INSERT_ATTEMPTS {
                // Last resort: coarse timestamp code guarantees progress.
                Ok(format.fallback())
            } else {
                sequence
                    .next_counted(tenant_id, CodeFamily::Receipt, format)
                    .await
            }
        },
        |receipt_number| {
            let mut payment = template.clone();
            payment.receipt_number = receipt_number;
            async move {
                store.insert_payment(&payment).await?;
                Ok(payment)
            }
        },
    )
    .await
}

/// Request to record an operator-entered payment.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RecordPaymentRequest {
    /// Invoice the payment applies to.
    pub invoice_id: String,
    /// Amount in minor units. Must be positive.
    pub amount: i64,
    /// How the money arrived.
    pub payment_method: PaymentMethod,
    /// Gateway transaction id, when the operator is keying in an online
    /// payment made out-of-band.
    #[serde(default)]
    pub transaction_id: Option<String>,
    /// Operator notes.
    #[serde(default)]
    pub notes: Option<String>,
}

/// Records operator-entered payments.
pub struct PaymentRecorder<S: LedgerStore + Clone, A: AuditLogger> {
    store: S,
    sequence: SequenceGenerator<S>,
    audit: A,
    receipt_format: CodeFormat,
}

impl<S: LedgerStore + Clone, A: AuditLogger> PaymentRecorder<S, A> {
    /// Create a new recorder with the default receipt format.
    #[must_use]
    pub fn new(store: S, audit: A) -> Self {
        Self {
            sequence: SequenceGenerator::new(store.clone()),
            store,
            audit,
            receipt_format: default_receipt_format(),
        }
    }

    /// Record a payment against an invoice and reconcile it.
    ///
    /// Non-gateway methods record a `Completed` payment with `paid_at` now;
    /// gateway-initiated methods record `Pending` and leave `paid_at` unset
    /// until callback confirmation arrives.
    pub async fn record_payment(
        &self,
        tenant_id: &str,
        request: RecordPaymentRequest,
    ) -> Result<Payment, LedgerError> {
        if request.amount <= 0 {
            return Err(LedgerError::InvalidState {
                message: "payment amount must be positive".to_string(),
            });
        }

        let invoice = self
            .store
            .get_invoice(tenant_id, &request.invoice_id)
            .await?
            .ok_or_else(|| LedgerError::InvoiceNotFound {
                invoice_id: request.invoice_id.clone(),
            })?;

        let now = unix_now();
        let (status, paid_at) = if request.payment_method.is_gateway() {
            (PaymentStatus::Pending, None)
        } else {
            (PaymentStatus::Completed, Some(now))
        };

        let template = Payment {
            id: format!("pay_{}", Uuid::new_v4().simple()),
            tenant_id: tenant_id.to_string(),
            invoice_id: invoice.id.clone(),
            member_id: invoice.member_id.clone(),
            amount: request.amount,
            currency: "inr".to_string(),
            method: request.payment_method,
            status,
            receipt_number: String::new(),
            gateway: request.transaction_id.map(|t| GatewayCorrelation {
                order_id: invoice.gateway_order_id.clone(),
                payment_id: Some(t),
                signature: None,
            }),
            notes: request.notes,
            paid_at,
            refund: None,
            created_at: now,
        };

        let payment = self.insert_with_receipt(tenant_id, template).await?;

        // Reconciliation is always the immediate next step after payment
        // creation within the same logical operation.
        let reconciler = InvoiceReconciler::new(self.store.clone());
        let result = reconciler.reconcile(tenant_id, &invoice.id).await?;
        if result.newly_paid {
            MembershipActivator::new(self.store.clone())
                .activate_for_invoice(&result.invoice)
                .await;
        }

        self.audit
            .log(AuditEvent::PaymentRecorded {
                tenant_id: tenant_id.to_string(),
                payment_id: payment.id.clone(),
                invoice_id: payment.invoice_id.clone(),
                receipt_number: payment.receipt_number.clone(),
                amount: payment.amount,
            })
            .await;

        Ok(payment)
    }

    async fn insert_with_receipt(
        &self,
        tenant_id: &str,
        template: Payment,
    ) -> Result<Payment, LedgerError> {
        insert_payment_with_receipt(
            &self.store,
            &self.sequence,
            &self.receipt_format,
            tenant_id,
            template,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::audit::test::RecordingAuditLogger;
    use crate::ledger::model::{
        Invoice, InvoiceLineItem, InvoiceStatus, MemberSnapshot, MembershipStatus,
        ServiceReference,
    };
    use crate::ledger::storage::test::InMemoryLedgerStore;

    fn sent_invoice(total: i64) -> Invoice {
        Invoice {
            id: "inv_1".to_string(),
            tenant_id: "tenant_1".to_string(),
            member_id: Some("mbr_1".to_string()),
            invoice_number: "INV0001".to_string(),
            line_items: vec![InvoiceLineItem {
                description: "Gold Quarterly".to_string(),
                amount: total,
                service: Some(ServiceReference::Plan {
                    plan_id: "plan_gold".to_string(),
                    name: "Gold Quarterly".to_string(),
                    session_total: None,
                }),
                start_date: None,
                end_date: None,
            }],
            subtotal: total,
            discount: 0,
            tax: 0,
            total,
            pending: total,
            status: InvoiceStatus::Sent,
            due_date: None,
            paid_date: None,
            gateway_order_id: None,
            gateway_payment_id: None,
            updated_at: 0,
        }
    }

    fn member() -> MemberSnapshot {
        MemberSnapshot {
            id: "mbr_1".to_string(),
            tenant_id: "tenant_1".to_string(),
            name: "Asha Rao".to_string(),
            phone: None,
            membership_status: MembershipStatus::Pending,
            current_plan: None,
        }
    }

    fn cash_request(amount: i64) -> RecordPaymentRequest {
        RecordPaymentRequest {
            invoice_id: "inv_1".to_string(),
            amount,
            payment_method: PaymentMethod::Cash,
            transaction_id: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_cash_payment_completes_and_reconciles() {
        let store = InMemoryLedgerStore::new();
        store.seed_invoice(sent_invoice(5000));
        store.seed_member(member());

        let recorder = PaymentRecorder::new(store.clone(), RecordingAuditLogger::new());
        let payment = recorder
            .record_payment("tenant_1", cash_request(5000))
            .await
            .unwrap();

        assert_eq!(payment.status, PaymentStatus::Completed);
        assert!(payment.paid_at.is_some());
        assert_eq!(payment.receipt_number, "RCP000001");

        let invoice = store.get_invoice("tenant_1", "inv_1").await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
        assert_eq!(invoice.pending, 0);

        // Full payment activated the membership.
        let member = store.get_member("tenant_1", "mbr_1").await.unwrap().unwrap();
        assert_eq!(member.membership_status, MembershipStatus::Active);
    }

    #[tokio::test]
    async fn test_gateway_payment_stays_pending() {
        let store = InMemoryLedgerStore::new();
        store.seed_invoice(sent_invoice(5000));

        let recorder = PaymentRecorder::new(store.clone(), RecordingAuditLogger::new());
        let payment = recorder
            .record_payment(
                "tenant_1",
                RecordPaymentRequest {
                    invoice_id: "inv_1".to_string(),
                    amount: 5000,
                    payment_method: PaymentMethod::Gateway,
                    transaction_id: Some("gw_pay_1".to_string()),
                    notes: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(payment.status, PaymentStatus::Pending);
        assert!(payment.paid_at.is_none());
        assert_eq!(
            payment.gateway.unwrap().payment_id,
            Some("gw_pay_1".to_string())
        );

        // Pending money doesn't reconcile the invoice.
        let invoice = store.get_invoice("tenant_1", "inv_1").await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Sent);
        assert_eq!(invoice.pending, 5000);
    }

    #[tokio::test]
    async fn test_missing_invoice() {
        let store = InMemoryLedgerStore::new();
        let recorder = PaymentRecorder::new(store, RecordingAuditLogger::new());
        let result = recorder.record_payment("tenant_1", cash_request(100)).await;
        assert!(matches!(result, Err(LedgerError::InvoiceNotFound { .. })));
    }

    #[tokio::test]
    async fn test_cross_tenant_invoice_not_found() {
        let store = InMemoryLedgerStore::new();
        store.seed_invoice(sent_invoice(5000));

        let recorder = PaymentRecorder::new(store, RecordingAuditLogger::new());
        let result = recorder
            .record_payment("tenant_other", cash_request(100))
            .await;
        assert!(matches!(result, Err(LedgerError::InvoiceNotFound { .. })));
    }

    #[tokio::test]
    async fn test_non_positive_amount_rejected() {
        let store = InMemoryLedgerStore::new();
        store.seed_invoice(sent_invoice(5000));

        let recorder = PaymentRecorder::new(store, RecordingAuditLogger::new());
        let result = recorder.record_payment("tenant_1", cash_request(0)).await;
        assert!(matches!(result, Err(LedgerError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_receipt_collision_falls_back_to_timestamp() {
        let store = InMemoryLedgerStore::new();
        store.seed_invoice(sent_invoice(5000));

        // One existing payment holding RCP000002: the count is 1, so the
        // counted family renders RCP000002 on every attempt and collides
        // until the final attempt's timestamp fallback.
        let occupant = Payment {
            id: "pay_occupant".to_string(),
            tenant_id: "tenant_1".to_string(),
            invoice_id: "inv_other".to_string(),
            member_id: None,
            amount: 100,
            currency: "inr".to_string(),
            method: PaymentMethod::Cash,
            status: PaymentStatus::Completed,
            receipt_number: "RCP000002".to_string(),
            gateway: None,
            notes: None,
            paid_at: Some(1),
            refund: None,
            created_at: 1,
        };
        store.insert_payment(&occupant).await.unwrap();

        let recorder = PaymentRecorder::new(store.clone(), RecordingAuditLogger::new());
        let payment = recorder
            .record_payment("tenant_1", cash_request(5000))
            .await
            .unwrap();

        assert!(payment.receipt_number.starts_with("RCP"));
        let suffix: u64 = payment.receipt_number["RCP".len()..].parse().unwrap();
        assert!(suffix > 1_000_000_000_000, "expected millis suffix, got {}", suffix);
    }

    #[tokio::test]
    async fn test_audit_event_emitted() {
        let store = InMemoryLedgerStore::new();
        store.seed_invoice(sent_invoice(5000));
        let audit = RecordingAuditLogger::new();

        let recorder = PaymentRecorder::new(store, audit.clone());
        recorder
            .record_payment("tenant_1", cash_request(2000))
            .await
            .unwrap();

        let events = audit.events().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            AuditEvent::PaymentRecorded { amount: 2000, .. }
        ));
    }

    #[tokio::test]
    async fn test_partial_then_full_payment() {
        let store = InMemoryLedgerStore::new();
        store.seed_invoice(sent_invoice(5000));
        store.seed_member(member());

        let recorder = PaymentRecorder::new(store.clone(), RecordingAuditLogger::new());
        recorder
            .record_payment("tenant_1", cash_request(2000))
            .await
            .unwrap();

        let invoice = store.get_invoice("tenant_1", "inv_1").await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Partial);
        // A partial invoice never activates a membership.
        let m = store.get_member("tenant_1", "mbr_1").await.unwrap().unwrap();
        assert_eq!(m.membership_status, MembershipStatus::Pending);

        recorder
            .record_payment("tenant_1", cash_request(3000))
            .await
            .unwrap();

        let invoice = store.get_invoice("tenant_1", "inv_1").await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
        let m = store.get_member("tenant_1", "mbr_1").await.unwrap().unwrap();
        assert_eq!(m.membership_status, MembershipStatus::Active);
    }
}
