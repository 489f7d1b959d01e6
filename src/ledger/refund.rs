//! Refund processing.
//!
//! Owns the "money removed" path of the ledger. Ordering is the load-bearing
//! property: for gateway payments the provider refund is issued BEFORE any
//! local mutation, so a gateway failure leaves the ledger untouched and the
//! operator can simply retry. The reverse order could mark money refunded
//! locally that the provider never returned.

use super::audit::{AuditEvent, AuditLogger};
use super::error::LedgerError;
use super::model::{unix_now, InvoiceStatus, Payment, PaymentStatus, RefundRecord};
use super::storage::LedgerStore;
use crate::gateway::PaymentGateway;

/// Request to refund a payment.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct RefundRequest {
    /// Amount to refund in minor units. Defaults to the full payment amount.
    /// Amounts above the payment amount are rejected, not clamped to a full
    /// refund.
    #[serde(default)]
    pub amount: Option<i64>,
    /// Free-form reason recorded on the payment.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Processes refunds against recorded payments.
pub struct RefundProcessor<S: LedgerStore, G: PaymentGateway, A: AuditLogger> {
    store: S,
    gateway: G,
    audit: A,
}

impl<S: LedgerStore, G: PaymentGateway, A: AuditLogger> RefundProcessor<S, G, A> {
    /// Create a new refund processor.
    #[must_use]
    pub fn new(store: S, gateway: G, audit: A) -> Self {
        Self { store, gateway, audit }
    }

    /// Refund a payment, fully or partially.
    ///
    /// Only `Completed` payments are refundable; anything else (pending,
    /// in-flight, already refunded) is an invalid-state error. A full refund
    /// moves the payment to `Refunded` and its invoice to the terminal
    /// `Refunded` status when no cleared money remains; a partial refund
    /// moves the payment to `PartialRefund` and leaves the invoice alone.
    pub async fn refund_payment(
        &self,
        tenant_id: &str,
        payment_id: &str,
        request: RefundRequest,
    ) -> Result<Payment, LedgerError> {
        let mut payment = self
            .store
            .get_payment(tenant_id, payment_id)
            .await?
            .ok_or_else(|| LedgerError::PaymentNotFound {
                payment_id: payment_id.to_string(),
            })?;

        if payment.status != PaymentStatus::Completed {
            return Err(LedgerError::InvalidState {
                message: format!(
                    "only completed payments can be refunded, payment is {}",
                    payment.status
                ),
            });
        }

        let amount = request.amount.unwrap_or(payment.amount);
        if amount <= 0 || amount > payment.amount {
            return Err(LedgerError::InvalidState {
                message: format!(
                    "refund amount {} must be positive and at most the payment amount {}",
                    amount, payment.amount
                ),
            });
        }

        // Gateway first. No local state changes until the provider has
        // actually returned the money.
        let gateway_refund_id = match payment
            .gateway
            .as_ref()
            .and_then(|g| g.payment_id.clone())
        {
            Some(gw_payment_id) if payment.method.is_gateway() => {
                let refund = self.gateway.create_refund(&gw_payment_id, amount).await?;
                Some(refund.refund_id)
            }
            _ => None,
        };

        let now = unix_now();
        let full = amount == payment.amount;
        payment.status = if full {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartialRefund
        };
        payment.refund = Some(RefundRecord {
            amount,
            reason: request.reason,
            gateway_refund_id,
            refunded_at: now,
        });
        self.store.update_payment(&payment).await?;

        if full {
            self.mark_invoice_refunded(&payment, now).await?;
        }

        tracing::info!(
            target: "gymledger::refund",
            tenant_id,
            payment_id,
            amount,
            full,
            "payment refunded"
        );
        self.audit
            .log(AuditEvent::PaymentRefunded {
                tenant_id: tenant_id.to_string(),
                payment_id: payment_id.to_string(),
                refund_amount: amount,
            })
            .await;

        Ok(payment)
    }

    /// After a full refund, move the invoice to terminal `Refunded` when no
    /// cleared money remains against it.
    async fn mark_invoice_refunded(
        &self,
        payment: &Payment,
        now: u64,
    ) -> Result<(), LedgerError> {
        let Some(mut invoice) = self
            .store
            .get_invoice(&payment.tenant_id, &payment.invoice_id)
            .await?
        else {
            return Ok(());
        };
        if invoice.status.is_terminal() {
            return Ok(());
        }

        let payments = self.store.payments_for_invoice(&invoice.id).await?;
        let remaining: i64 = payments
            .iter()
            .filter(|p| p.status.counts_as_paid())
            .map(|p| p.amount)
            .sum();

        invoice.pending = (invoice.total - remaining).max(0);
        invoice.updated_at = now;
        if remaining == 0 {
            invoice.status = InvoiceStatus::Refunded;
        }
        self.store.update_invoice(&invoice).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::test::MockGateway;
    use crate::ledger::audit::test::RecordingAuditLogger;
    use crate::ledger::model::{GatewayCorrelation, Invoice, PaymentMethod};
    use crate::ledger::storage::test::InMemoryLedgerStore;

    fn paid_invoice(total: i64) -> Invoice {
        Invoice {
            id: "inv_1".to_string(),
            tenant_id: "tenant_1".to_string(),
            member_id: Some("mbr_1".to_string()),
            invoice_number: "INV0001".to_string(),
            line_items: vec![],
            subtotal: total,
            discount: 0,
            tax: 0,
            total,
            pending: 0,
            status: InvoiceStatus::Paid,
            due_date: None,
            paid_date: Some(1_700_000_000),
            gateway_order_id: None,
            gateway_payment_id: None,
            updated_at: 1_700_000_000,
        }
    }

    fn completed_payment(amount: i64, gateway: bool) -> Payment {
        Payment {
            id: "pay_1".to_string(),
            tenant_id: "tenant_1".to_string(),
            invoice_id: "inv_1".to_string(),
            member_id: Some("mbr_1".to_string()),
            amount,
            currency: "inr".to_string(),
            method: if gateway {
                PaymentMethod::Gateway
            } else {
                PaymentMethod::Cash
            },
            status: PaymentStatus::Completed,
            receipt_number: "RCP0001".to_string(),
            gateway: gateway.then(|| GatewayCorrelation {
                order_id: Some("order_1".to_string()),
                payment_id: Some("gw_pay_1".to_string()),
                signature: None,
            }),
            notes: None,
            paid_at: Some(1_700_000_000),
            refund: None,
            created_at: 1_700_000_000,
        }
    }

    fn processor(
        store: &InMemoryLedgerStore,
        gateway: &MockGateway,
    ) -> RefundProcessor<InMemoryLedgerStore, MockGateway, RecordingAuditLogger> {
        RefundProcessor::new(store.clone(), gateway.clone(), RecordingAuditLogger::new())
    }

    #[tokio::test]
    async fn test_full_refund_of_cash_payment() {
        let store = InMemoryLedgerStore::new();
        store.seed_invoice(paid_invoice(1000));
        store.insert_payment(&completed_payment(1000, false)).await.unwrap();

        let gateway = MockGateway::new();
        let payment = processor(&store, &gateway)
            .refund_payment("tenant_1", "pay_1", RefundRequest::default())
            .await
            .unwrap();

        assert_eq!(payment.status, PaymentStatus::Refunded);
        let refund = payment.refund.unwrap();
        assert_eq!(refund.amount, 1000);
        assert!(refund.gateway_refund_id.is_none());
        // Cash refunds never touch the gateway.
        assert!(gateway.refund_calls().is_empty());

        let invoice = store.get_invoice("tenant_1", "inv_1").await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Refunded);
        assert_eq!(invoice.pending, 1000);
    }

    #[tokio::test]
    async fn test_partial_refund() {
        let store = InMemoryLedgerStore::new();
        store.seed_invoice(paid_invoice(1000));
        store.insert_payment(&completed_payment(1000, false)).await.unwrap();

        let payment = processor(&store, &MockGateway::new())
            .refund_payment(
                "tenant_1",
                "pay_1",
                RefundRequest {
                    amount: Some(400),
                    reason: Some("overcharged".to_string()),
                },
            )
            .await
            .unwrap();

        assert_eq!(payment.status, PaymentStatus::PartialRefund);
        assert_eq!(payment.refund.unwrap().amount, 400);

        // Partial refunds leave the invoice alone.
        let invoice = store.get_invoice("tenant_1", "inv_1").await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
    }

    #[tokio::test]
    async fn test_gateway_refund_goes_through_gateway() {
        let store = InMemoryLedgerStore::new();
        store.seed_invoice(paid_invoice(1000));
        store.insert_payment(&completed_payment(1000, true)).await.unwrap();

        let gateway = MockGateway::new();
        let payment = processor(&store, &gateway)
            .refund_payment("tenant_1", "pay_1", RefundRequest::default())
            .await
            .unwrap();

        assert_eq!(gateway.refund_calls(), vec![("gw_pay_1".to_string(), 1000)]);
        assert_eq!(
            payment.refund.unwrap().gateway_refund_id,
            Some("rfnd_1".to_string())
        );
    }

    #[tokio::test]
    async fn test_gateway_failure_leaves_ledger_untouched() {
        let store = InMemoryLedgerStore::new();
        store.seed_invoice(paid_invoice(1000));
        store.insert_payment(&completed_payment(1000, true)).await.unwrap();

        let gateway = MockGateway::new();
        gateway.fail_next();
        let result = processor(&store, &gateway)
            .refund_payment("tenant_1", "pay_1", RefundRequest::default())
            .await;
        assert!(matches!(result, Err(LedgerError::GatewayError { .. })));

        let payment = store.get_payment("tenant_1", "pay_1").await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert!(payment.refund.is_none());
        let invoice = store.get_invoice("tenant_1", "inv_1").await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
    }

    #[tokio::test]
    async fn test_non_completed_payment_rejected() {
        let store = InMemoryLedgerStore::new();
        store.seed_invoice(paid_invoice(1000));
        let mut payment = completed_payment(1000, false);
        payment.status = PaymentStatus::Pending;
        store.insert_payment(&payment).await.unwrap();

        let result = processor(&store, &MockGateway::new())
            .refund_payment("tenant_1", "pay_1", RefundRequest::default())
            .await;
        assert!(matches!(result, Err(LedgerError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_double_refund_rejected() {
        let store = InMemoryLedgerStore::new();
        store.seed_invoice(paid_invoice(1000));
        store.insert_payment(&completed_payment(1000, false)).await.unwrap();

        let processor = processor(&store, &MockGateway::new());
        processor
            .refund_payment("tenant_1", "pay_1", RefundRequest::default())
            .await
            .unwrap();
        let result = processor
            .refund_payment("tenant_1", "pay_1", RefundRequest::default())
            .await;
        assert!(matches!(result, Err(LedgerError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_refund_amount_bounds() {
        let store = InMemoryLedgerStore::new();
        store.seed_invoice(paid_invoice(1000));
        store.insert_payment(&completed_payment(1000, false)).await.unwrap();

        let processor = processor(&store, &MockGateway::new());
        for bad in [0i64, -5, 1001] {
            let result = processor
                .refund_payment(
                    "tenant_1",
                    "pay_1",
                    RefundRequest {
                        amount: Some(bad),
                        reason: None,
                    },
                )
                .await;
            assert!(matches!(result, Err(LedgerError::InvalidState { .. })));
        }
    }

    #[tokio::test]
    async fn test_missing_payment() {
        let store = InMemoryLedgerStore::new();
        let result = processor(&store, &MockGateway::new())
            .refund_payment("tenant_1", "pay_missing", RefundRequest::default())
            .await;
        assert!(matches!(result, Err(LedgerError::PaymentNotFound { .. })));
    }

    #[tokio::test]
    async fn test_full_refund_with_other_money_keeps_invoice_open() {
        let store = InMemoryLedgerStore::new();
        store.seed_invoice(paid_invoice(2000));
        store.insert_payment(&completed_payment(1000, false)).await.unwrap();
        let mut other = completed_payment(1000, false);
        other.id = "pay_2".to_string();
        other.receipt_number = "RCP0002".to_string();
        store.insert_payment(&other).await.unwrap();

        processor(&store, &MockGateway::new())
            .refund_payment("tenant_1", "pay_1", RefundRequest::default())
            .await
            .unwrap();

        // Cleared money remains, so the invoice does not go terminal.
        let invoice = store.get_invoice("tenant_1", "inv_1").await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
        assert_eq!(invoice.pending, 1000);
    }
}
