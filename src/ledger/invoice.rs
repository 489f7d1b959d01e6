//! Invoice reconciliation.
//!
//! Recomputes an invoice's paid/pending amounts and status from the payment
//! ledger. Reconciliation is a pure function of current ledger state: safe to
//! call repeatedly, commutative under replay, and owns only the "money added"
//! path. The "money removed" path belongs to the refund processor, which sets
//! terminal statuses directly.

use super::error::LedgerError;
use super::model::{unix_now, Invoice, InvoiceStatus, Payment};
use super::storage::LedgerStore;

/// Result of a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileResult {
    /// The invoice after recomputation.
    pub invoice: Invoice,
    /// True when this pass transitioned the invoice into `Paid`.
    pub newly_paid: bool,
}

/// Recompute an invoice's paid amount, pending amount and status from its
/// payments.
///
/// Counts payments whose status is `Completed` or `Processing` (money that has
/// cleared or is in flight); `Pending` and refunded statuses are excluded
/// outright. Refund netting is handled by the refund processor, not here.
///
/// Status transitions, in order:
/// - paid >= total: `Paid`, `paid_date` set once.
/// - 0 < paid < total: `Partial`.
/// - zero paid: status left untouched, so `Draft`/`Sent`/`Overdue` survive a
///   zero-payment recompute.
///
/// Terminal invoices (`Cancelled`, `Refunded`) are never transitioned back.
/// Returns true when the invoice newly became `Paid`.
pub fn recompute(invoice: &mut Invoice, payments: &[Payment], now: u64) -> bool {
    let paid_amount: i64 = payments
        .iter()
        .filter(|p| p.status.counts_as_paid())
        .map(|p| p.amount)
        .sum();

    invoice.pending = (invoice.total - paid_amount).max(0);
    invoice.updated_at = now;

    if invoice.status.is_terminal() {
        return false;
    }

    if paid_amount >= invoice.total {
        let newly_paid = invoice.status != InvoiceStatus::Paid;
        invoice.status = InvoiceStatus::Paid;
        if invoice.paid_date.is_none() {
            invoice.paid_date = Some(now);
        }
        newly_paid
    } else if paid_amount > 0 {
        invoice.status = InvoiceStatus::Partial;
        false
    } else {
        false
    }
}

/// Reconciles invoices against the payment ledger.
pub struct InvoiceReconciler<S: LedgerStore> {
    store: S,
}

impl<S: LedgerStore> InvoiceReconciler<S> {
    /// Create a new reconciler.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Reload the invoice and its full payment ledger, recompute, and save.
    ///
    /// Concurrent payment inserts can race on the final invoice write; the
    /// last writer's view of the ledger wins, which is sound because every
    /// pass recomputes from the full ledger rather than incrementing.
    pub async fn reconcile(
        &self,
        tenant_id: &str,
        invoice_id: &str,
    ) -> Result<ReconcileResult, LedgerError> {
        let mut invoice = self
            .store
            .get_invoice(tenant_id, invoice_id)
            .await?
            .ok_or_else(|| LedgerError::InvoiceNotFound {
                invoice_id: invoice_id.to_string(),
            })?;

        let payments = self.store.payments_for_invoice(invoice_id).await?;
        let newly_paid = recompute(&mut invoice, &payments, unix_now());
        self.store.update_invoice(&invoice).await?;

        tracing::debug!(
            target: "gymledger::invoice",
            tenant_id,
            invoice_id,
            status = %invoice.status,
            pending = invoice.pending,
            newly_paid,
            "invoice reconciled"
        );

        Ok(ReconcileResult { invoice, newly_paid })
    }
}
