//! Payment and invoice ledger.
//!
//! The money core of the system: recording payments, reconciling invoices,
//! processing refunds, activating memberships from paid invoices, and
//! allocating the human-readable identifiers receipts and invoices carry.
//!
//! # Example
//!
//! ```rust,ignore
//! use gymledger::ledger::{
//!     PaymentRecorder, RecordPaymentRequest, RefundProcessor, RefundRequest,
//! };
//!
//! // Record a cash payment an operator keyed in at the front desk.
//! let recorder = PaymentRecorder::new(store.clone(), audit.clone());
//! let payment = recorder.record_payment(&tenant_id, RecordPaymentRequest {
//!     invoice_id: invoice.id.clone(),
//!     amount: 5000,
//!     payment_method: PaymentMethod::Cash,
//!     transaction_id: None,
//!     notes: None,
//! }).await?;
//!
//! // Later, refund it.
//! let refunds = RefundProcessor::new(store, gateway, audit);
//! refunds.refund_payment(&tenant_id, &payment.id, RefundRequest::default()).await?;
//! ```
//!
//! Invariants the module holds:
//! - an invoice's paid/pending amounts are always recomputed from the full
//!   payment ledger, never incremented in place;
//! - `paid_date` is set exactly once; cancelled and refunded invoices never
//!   transition back;
//! - receipt numbers are unique per tenant, enforced by the storage layer
//!   and retried on collision;
//! - one gateway payment id yields at most one payment row.

pub mod activation;
pub mod audit;
pub mod error;
pub mod invoice;
pub mod model;
pub mod payment;
pub mod refund;
pub mod sequence;
pub mod storage;

pub use activation::{ActivationOutcome, MembershipActivator};
pub use audit::{AuditEvent, AuditLogger, NoOpAuditLogger, TracingAuditLogger};
pub use error::LedgerError;
pub use invoice::{recompute, InvoiceReconciler, ReconcileResult};
pub use model::{
    GatewayCorrelation, Invoice, InvoiceLineItem, InvoiceStatus, MemberSnapshot,
    MembershipStatus, Payment, PaymentMethod, PaymentStatus, PlanAssignment, RefundRecord,
    ServiceReference, WebhookEventRecord, WebhookEventStatus,
};
pub use payment::{PaymentRecorder, RecordPaymentRequest};
pub use refund::{RefundProcessor, RefundRequest};
pub use sequence::{insert_with_retry, CodeFormat, SequenceGenerator};
pub use storage::{CodeFamily, LedgerStore};
