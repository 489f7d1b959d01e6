//! Storage traits for ledger data.
//!
//! Implement [`LedgerStore`] to persist ledger state to your database. The
//! uniqueness constraints documented on `insert_payment` and
//! `insert_webhook_event` are the idempotency guards of the whole payment
//! pipeline and MUST be enforced at the storage layer (unique indexes), not
//! merely checked-then-inserted: two concurrent deliveries of the same
//! callback are a realistic race.
//!
//! An in-memory implementation is provided for testing.

use async_trait::async_trait;

use super::error::LedgerError;
use super::model::{Invoice, MemberSnapshot, Payment, ServiceReference, WebhookEventRecord};

/// Identifier families the sequential generator allocates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeFamily {
    /// Receipt numbers on payments.
    Receipt,
    /// Enquiry codes.
    Enquiry,
    /// Member codes.
    Member,
}

impl CodeFamily {
    /// Convert to string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Receipt => "receipt",
            Self::Enquiry => "enquiry",
            Self::Member => "member",
        }
    }
}

/// Trait for storing ledger data.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // Invoices

    /// Get an invoice by id, scoped to a tenant.
    async fn get_invoice(
        &self,
        tenant_id: &str,
        invoice_id: &str,
    ) -> Result<Option<Invoice>, LedgerError>;

    /// Find the invoice correlated to a gateway order id.
    async fn find_invoice_by_order_id(
        &self,
        order_id: &str,
    ) -> Result<Option<Invoice>, LedgerError>;

    /// Save an updated invoice. Last writer wins; reconciliation always
    /// recomputes from the full ledger rather than incrementing.
    async fn update_invoice(&self, invoice: &Invoice) -> Result<(), LedgerError>;

    // Payments

    /// Insert a new payment.
    ///
    /// Returns [`LedgerError::DuplicateKey`] if the receipt number collides
    /// within the tenant, or if a payment already exists for the same gateway
    /// payment id. Both must be backed by unique indexes.
    async fn insert_payment(&self, payment: &Payment) -> Result<(), LedgerError>;

    /// Save an updated payment (refund fields, status).
    async fn update_payment(&self, payment: &Payment) -> Result<(), LedgerError>;

    /// Get a payment by id, scoped to a tenant.
    async fn get_payment(
        &self,
        tenant_id: &str,
        payment_id: &str,
    ) -> Result<Option<Payment>, LedgerError>;

    /// Find a payment by its gateway payment id (the callback idempotency key).
    async fn find_payment_by_gateway_id(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<Payment>, LedgerError>;

    /// All payments recorded against an invoice, voided or not.
    async fn payments_for_invoice(&self, invoice_id: &str) -> Result<Vec<Payment>, LedgerError>;

    // Webhook events

    /// Durably record an inbound callback before any business effect.
    ///
    /// Returns [`LedgerError::DuplicateKey`] if an event with this id already
    /// exists; ingestion treats that as an idempotent replay.
    async fn insert_webhook_event(&self, event: &WebhookEventRecord) -> Result<(), LedgerError>;

    /// Save an updated webhook event (status, retry count, error).
    async fn update_webhook_event(&self, event: &WebhookEventRecord) -> Result<(), LedgerError>;

    /// Get a webhook event by its source-assigned id.
    async fn get_webhook_event(
        &self,
        event_id: &str,
    ) -> Result<Option<WebhookEventRecord>, LedgerError>;

    // Members

    /// Get the membership snapshot for a member, scoped to a tenant.
    async fn get_member(
        &self,
        tenant_id: &str,
        member_id: &str,
    ) -> Result<Option<MemberSnapshot>, LedgerError>;

    /// Save an updated membership snapshot.
    async fn update_member(&self, member: &MemberSnapshot) -> Result<(), LedgerError>;

    // Service resolution

    /// Resolve a service reference id against the plan and ad-hoc service
    /// collections, once, at the boundary.
    async fn resolve_service(
        &self,
        tenant_id: &str,
        reference_id: &str,
    ) -> Result<Option<ServiceReference>, LedgerError>;

    // Identifier allocation support

    /// The highest code allocated for a family within a tenant, if any.
    async fn highest_code(
        &self,
        tenant_id: &str,
        family: CodeFamily,
    ) -> Result<Option<String>, LedgerError>;

    /// Whether a candidate code is already taken.
    async fn code_exists(
        &self,
        tenant_id: &str,
        family: CodeFamily,
        code: &str,
    ) -> Result<bool, LedgerError>;

    /// Number of records carrying a code in this family (the "count + 1"
    /// numbering input).
    async fn code_count(&self, tenant_id: &str, family: CodeFamily) -> Result<u64, LedgerError>;

    /// Register an allocated code so later probes see it.
    ///
    /// `insert_payment` registers receipt numbers itself; enquiry and member
    /// creation flows (outside this crate) call this directly.
    async fn register_code(
        &self,
        tenant_id: &str,
        family: CodeFamily,
        code: &str,
    ) -> Result<(), LedgerError>;
}

/// In-memory ledger store for testing.
#[cfg(any(test, feature = "test-ledger"))]
pub mod test {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, RwLock};

    /// In-memory ledger store for testing.
    ///
    /// Wraps data in `Arc` for cheap cloning; the uniqueness constraints the
    /// trait documents are enforced under a single write lock, which gives the
    /// same check-and-insert atomicity a unique index would.
    #[derive(Default, Clone)]
    pub struct InMemoryLedgerStore {
        inner: Arc<Inner>,
    }

    #[derive(Default)]
    struct Inner {
        invoices: RwLock<HashMap<String, Invoice>>,
        payments: RwLock<HashMap<String, Payment>>,
        webhook_events: RwLock<HashMap<String, WebhookEventRecord>>,
        members: RwLock<HashMap<String, MemberSnapshot>>,
        services: RwLock<HashMap<String, ServiceReference>>,
        // (tenant_id, family) -> allocated codes
        codes: RwLock<HashMap<(String, CodeFamily), HashSet<String>>>,
        fail_next_invoice_update: AtomicBool,
    }

    impl InMemoryLedgerStore {
        /// Create a new in-memory store.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed an invoice for testing.
        pub fn seed_invoice(&self, invoice: Invoice) {
            self.inner
                .invoices
                .write()
                .unwrap()
                .insert(invoice.id.clone(), invoice);
        }

        /// Seed a member for testing.
        pub fn seed_member(&self, member: MemberSnapshot) {
            self.inner
                .members
                .write()
                .unwrap()
                .insert(member.id.clone(), member);
        }

        /// Seed a resolvable service reference for testing.
        pub fn seed_service(&self, reference_id: &str, service: ServiceReference) {
            self.inner
                .services
                .write()
                .unwrap()
                .insert(reference_id.to_string(), service);
        }

        /// Make the next `update_invoice` fail with an internal error, once.
        /// Simulates a store dying mid-pipeline.
        pub fn fail_next_invoice_update(&self) {
            self.inner
                .fail_next_invoice_update
                .store(true, Ordering::SeqCst);
        }

        /// All payments in the store (for assertions).
        pub fn all_payments(&self) -> Vec<Payment> {
            self.inner.payments.read().unwrap().values().cloned().collect()
        }

        /// All webhook events in the store (for assertions).
        pub fn all_webhook_events(&self) -> Vec<WebhookEventRecord> {
            self.inner
                .webhook_events
                .read()
                .unwrap()
                .values()
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl LedgerStore for InMemoryLedgerStore {
        async fn get_invoice(
            &self,
            tenant_id: &str,
            invoice_id: &str,
        ) -> Result<Option<Invoice>, LedgerError> {
            Ok(self
                .inner
                .invoices
                .read()
                .unwrap()
                .get(invoice_id)
                .filter(|i| i.tenant_id == tenant_id)
                .cloned())
        }

        async fn find_invoice_by_order_id(
            &self,
            order_id: &str,
        ) -> Result<Option<Invoice>, LedgerError> {
            Ok(self
                .inner
                .invoices
                .read()
                .unwrap()
                .values()
                .find(|i| i.gateway_order_id.as_deref() == Some(order_id))
                .cloned())
        }

        async fn update_invoice(&self, invoice: &Invoice) -> Result<(), LedgerError> {
            if self
                .inner
                .fail_next_invoice_update
                .swap(false, Ordering::SeqCst)
            {
                return Err(LedgerError::Internal {
                    message: "injected storage failure".to_string(),
                });
            }
            self.inner
                .invoices
                .write()
                .unwrap()
                .insert(invoice.id.clone(), invoice.clone());
            Ok(())
        }

        async fn insert_payment(&self, payment: &Payment) -> Result<(), LedgerError> {
            let mut payments = self.inner.payments.write().unwrap();

            let receipt_taken = payments.values().any(|p| {
                p.tenant_id == payment.tenant_id && p.receipt_number == payment.receipt_number
            });
            if receipt_taken {
                return Err(LedgerError::DuplicateKey {
                    constraint: "payments_tenant_receipt_number".to_string(),
                });
            }

            if let Some(gw_id) = payment.gateway.as_ref().and_then(|g| g.payment_id.as_deref()) {
                let gateway_taken = payments.values().any(|p| {
                    p.gateway.as_ref().and_then(|g| g.payment_id.as_deref()) == Some(gw_id)
                });
                if gateway_taken {
                    return Err(LedgerError::DuplicateKey {
                        constraint: "payments_gateway_payment_id".to_string(),
                    });
                }
            }

            payments.insert(payment.id.clone(), payment.clone());
            drop(payments);

            // Receipt numbers participate in the code probe space.
            self.inner
                .codes
                .write()
                .unwrap()
                .entry((payment.tenant_id.clone(), CodeFamily::Receipt))
                .or_default()
                .insert(payment.receipt_number.clone());
            Ok(())
        }

        async fn update_payment(&self, payment: &Payment) -> Result<(), LedgerError> {
            self.inner
                .payments
                .write()
                .unwrap()
                .insert(payment.id.clone(), payment.clone());
            Ok(())
        }

        async fn get_payment(
            &self,
            tenant_id: &str,
            payment_id: &str,
        ) -> Result<Option<Payment>, LedgerError> {
            Ok(self
                .inner
                .payments
                .read()
                .unwrap()
                .get(payment_id)
                .filter(|p| p.tenant_id == tenant_id)
                .cloned())
        }

        async fn find_payment_by_gateway_id(
            &self,
            gateway_payment_id: &str,
        ) -> Result<Option<Payment>, LedgerError> {
            Ok(self
                .inner
                .payments
                .read()
                .unwrap()
                .values()
                .find(|p| {
                    p.gateway.as_ref().and_then(|g| g.payment_id.as_deref())
                        == Some(gateway_payment_id)
                })
                .cloned())
        }

        async fn payments_for_invoice(
            &self,
            invoice_id: &str,
        ) -> Result<Vec<Payment>, LedgerError> {
            let mut payments: Vec<Payment> = self
                .inner
                .payments
                .read()
                .unwrap()
                .values()
                .filter(|p| p.invoice_id == invoice_id)
                .cloned()
                .collect();
            payments.sort_by_key(|p| p.created_at);
            Ok(payments)
        }

        async fn insert_webhook_event(
            &self,
            event: &WebhookEventRecord,
        ) -> Result<(), LedgerError> {
            let mut events = self.inner.webhook_events.write().unwrap();
            if events.contains_key(&event.event_id) {
                return Err(LedgerError::DuplicateKey {
                    constraint: "webhook_events_event_id".to_string(),
                });
            }
            events.insert(event.event_id.clone(), event.clone());
            Ok(())
        }

        async fn update_webhook_event(
            &self,
            event: &WebhookEventRecord,
        ) -> Result<(), LedgerError> {
            self.inner
                .webhook_events
                .write()
                .unwrap()
                .insert(event.event_id.clone(), event.clone());
            Ok(())
        }

        async fn get_webhook_event(
            &self,
            event_id: &str,
        ) -> Result<Option<WebhookEventRecord>, LedgerError> {
            Ok(self
                .inner
                .webhook_events
                .read()
                .unwrap()
                .get(event_id)
                .cloned())
        }

        async fn get_member(
            &self,
            tenant_id: &str,
            member_id: &str,
        ) -> Result<Option<MemberSnapshot>, LedgerError> {
            Ok(self
                .inner
                .members
                .read()
                .unwrap()
                .get(member_id)
                .filter(|m| m.tenant_id == tenant_id)
                .cloned())
        }

        async fn update_member(&self, member: &MemberSnapshot) -> Result<(), LedgerError> {
            self.inner
                .members
                .write()
                .unwrap()
                .insert(member.id.clone(), member.clone());
            Ok(())
        }

        async fn resolve_service(
            &self,
            _tenant_id: &str,
            reference_id: &str,
        ) -> Result<Option<ServiceReference>, LedgerError> {
            Ok(self
                .inner
                .services
                .read()
                .unwrap()
                .get(reference_id)
                .cloned())
        }

        async fn highest_code(
            &self,
            tenant_id: &str,
            family: CodeFamily,
        ) -> Result<Option<String>, LedgerError> {
            Ok(self
                .inner
                .codes
                .read()
                .unwrap()
                .get(&(tenant_id.to_string(), family))
                .and_then(|codes| codes.iter().max().cloned()))
        }

        async fn code_exists(
            &self,
            tenant_id: &str,
            family: CodeFamily,
            code: &str,
        ) -> Result<bool, LedgerError> {
            Ok(self
                .inner
                .codes
                .read()
                .unwrap()
                .get(&(tenant_id.to_string(), family))
                .is_some_and(|codes| codes.contains(code)))
        }

        async fn code_count(
            &self,
            tenant_id: &str,
            family: CodeFamily,
        ) -> Result<u64, LedgerError> {
            Ok(self
                .inner
                .codes
                .read()
                .unwrap()
                .get(&(tenant_id.to_string(), family))
                .map(|codes| codes.len() as u64)
                .unwrap_or(0))
        }

        async fn register_code(
            &self,
            tenant_id: &str,
            family: CodeFamily,
            code: &str,
        ) -> Result<(), LedgerError> {
            self.inner
                .codes
                .write()
                .unwrap()
                .entry((tenant_id.to_string(), family))
                .or_default()
                .insert(code.to_string());
            Ok(())
        }
    }
}
