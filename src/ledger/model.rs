//! Core ledger data types.
//!
//! Invoices, payments, webhook event records and the membership snapshot.
//! Monetary amounts are integer minor units (cents/paise); timestamps are
//! Unix seconds.

use serde::{Deserialize, Serialize};

/// Current Unix timestamp in seconds.
#[must_use]
pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// =============================================================================
// Invoice
// =============================================================================

/// A billable document for a member.
///
/// Mutated only by invoice reconciliation and the refund processor; never
/// deleted, only cancelled or refunded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Invoice {
    /// Invoice ID.
    pub id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Member the invoice bills, if any.
    pub member_id: Option<String>,
    /// Human-readable invoice number.
    pub invoice_number: String,
    /// Line items.
    pub line_items: Vec<InvoiceLineItem>,
    /// Sum of line item amounts before discount and tax.
    pub subtotal: i64,
    /// Discount applied.
    pub discount: i64,
    /// Tax applied.
    pub tax: i64,
    /// Amount owed in total.
    pub total: i64,
    /// Derived: amount still owed. Never negative.
    pub pending: i64,
    /// Lifecycle status.
    pub status: InvoiceStatus,
    /// Optional due date.
    pub due_date: Option<u64>,
    /// Set once, when the invoice first reaches `Paid`.
    pub paid_date: Option<u64>,
    /// Gateway order id correlating callbacks to this invoice.
    pub gateway_order_id: Option<String>,
    /// Gateway payment id recorded when a callback settles the invoice.
    pub gateway_payment_id: Option<String>,
    /// Last updated timestamp.
    pub updated_at: u64,
}

/// A single line on an invoice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvoiceLineItem {
    /// Display description.
    pub description: String,
    /// Line amount in minor units.
    pub amount: i64,
    /// What this line bills, resolved once at the boundary.
    pub service: Option<ServiceReference>,
    /// Plan start date, when the line carries one.
    pub start_date: Option<u64>,
    /// Plan end/expiry date, when the line carries one.
    pub end_date: Option<u64>,
}

/// What an invoice line refers to.
///
/// Resolved once when the invoice is built, instead of probing multiple
/// collections at every call site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceReference {
    /// A membership plan.
    Plan {
        plan_id: String,
        name: String,
        /// Number of sessions included, for session-counted plans.
        session_total: Option<u32>,
    },
    /// A one-off service (day pass, personal training session, merchandise).
    AdHocService { service_id: String, name: String },
}

impl ServiceReference {
    /// Display name of the referenced service.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Plan { name, .. } | Self::AdHocService { name, .. } => name,
        }
    }
}

/// Invoice lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// Not yet issued.
    Draft,
    /// Issued to the member.
    Sent,
    /// Fully covered by cleared payments.
    Paid,
    /// Partially covered.
    Partial,
    /// Past its due date.
    Overdue,
    /// Cancelled; terminal.
    Cancelled,
    /// Refunded; terminal.
    Refunded,
}

impl InvoiceStatus {
    /// Convert to string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Paid => "paid",
            Self::Partial => "partial",
            Self::Overdue => "overdue",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }

    /// Terminal statuses never transition back to `Paid`/`Partial`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Refunded)
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Payment
// =============================================================================

/// A single recorded transfer of money against an invoice.
///
/// Amount and receipt number are immutable after creation; refund fields are
/// set exactly once by the refund processor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payment {
    /// Payment ID.
    pub id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Invoice this payment applies to.
    pub invoice_id: String,
    /// Member who paid, if known.
    pub member_id: Option<String>,
    /// Amount in minor units. Always positive.
    pub amount: i64,
    /// ISO currency code.
    pub currency: String,
    /// How the money arrived.
    pub method: PaymentMethod,
    /// Lifecycle status.
    pub status: PaymentStatus,
    /// Receipt number, unique per tenant.
    pub receipt_number: String,
    /// Gateway correlation, for gateway-originated payments.
    pub gateway: Option<GatewayCorrelation>,
    /// Operator notes.
    pub notes: Option<String>,
    /// When the money actually moved. For gateway payments this is the
    /// gateway's event timestamp, not wall-clock receipt time.
    pub paid_at: Option<u64>,
    /// Refund record, set once by the refund processor.
    pub refund: Option<RefundRecord>,
    /// Creation timestamp.
    pub created_at: u64,
}

/// Gateway identifiers tying a payment to the upstream charge.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayCorrelation {
    /// Gateway order id.
    pub order_id: Option<String>,
    /// Gateway payment id. The idempotency key for callback-derived payments.
    pub payment_id: Option<String>,
    /// Signature supplied with the payment, if any.
    pub signature: Option<String>,
}

/// Refund details recorded on a payment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefundRecord {
    /// Amount refunded in minor units.
    pub amount: i64,
    /// Free-form reason.
    pub reason: Option<String>,
    /// Gateway refund id, for gateway-originated payments.
    pub gateway_refund_id: Option<String>,
    /// When the refund was recorded.
    pub refunded_at: u64,
}

/// Payment lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Awaiting gateway confirmation. Not counted as money received.
    Pending,
    /// Cleared.
    Completed,
    /// In flight (captured but not settled). Counted as money received.
    Processing,
    /// Fully refunded.
    Refunded,
    /// Partially refunded.
    PartialRefund,
}

impl PaymentStatus {
    /// Convert to string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Processing => "processing",
            Self::Refunded => "refunded",
            Self::PartialRefund => "partial_refund",
        }
    }

    /// Whether this payment counts toward an invoice's paid amount.
    ///
    /// Refunded amounts are netted out by the refund processor, not here.
    #[must_use]
    pub fn counts_as_paid(&self) -> bool {
        matches!(self, Self::Completed | Self::Processing)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a payment was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    BankTransfer,
    Cheque,
    /// Online payment through the gateway. Confirmation arrives by callback.
    Gateway,
}

impl PaymentMethod {
    /// Convert to string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Card => "card",
            Self::BankTransfer => "bank_transfer",
            Self::Cheque => "cheque",
            Self::Gateway => "gateway",
        }
    }

    /// Gateway-initiated methods settle asynchronously via callback.
    #[must_use]
    pub fn is_gateway(&self) -> bool {
        matches!(self, Self::Gateway)
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Webhook event record
// =============================================================================

/// A durably recorded inbound gateway callback.
///
/// The source-assigned event id is the sole idempotency guard for callbacks.
/// Records are never deleted; they form the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookEventRecord {
    /// Source-assigned event id. Unique.
    pub event_id: String,
    /// Which integration sent this event.
    pub source: String,
    /// Event type (e.g. "payment.captured").
    pub event_type: String,
    /// Raw payload as received.
    pub payload: serde_json::Value,
    /// Signature header as received.
    pub signature: Option<String>,
    /// Processing status.
    pub status: WebhookEventStatus,
    /// Number of failed processing attempts.
    pub retry_count: u32,
    /// Attempt ceiling before the event is parked.
    pub max_retries: u32,
    /// Message from the most recent failure.
    pub last_error: Option<String>,
    /// Receipt timestamp.
    pub received_at: u64,
    /// Set when processing completes.
    pub processed_at: Option<u64>,
}

impl WebhookEventRecord {
    /// Create a pending record for a freshly received callback.
    #[must_use]
    pub fn pending(
        event_id: impl Into<String>,
        source: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        signature: Option<String>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            source: source.into(),
            event_type: event_type.into(),
            payload,
            signature,
            status: WebhookEventStatus::Pending,
            retry_count: 0,
            max_retries: 5,
            last_error: None,
            received_at: unix_now(),
            processed_at: None,
        }
    }
}

/// Webhook event processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventStatus {
    /// Recorded, not yet processed.
    Pending,
    /// Business effect applied.
    Processed,
    /// Processing failed; the gateway is expected to redeliver.
    Failed,
    /// Queued for another local attempt.
    Retrying,
}

impl WebhookEventStatus {
    /// Convert to string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
        }
    }
}

// =============================================================================
// Membership snapshot
// =============================================================================

/// The subset of a member record the activation trigger reads and writes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberSnapshot {
    /// Member ID.
    pub id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Display name.
    pub name: String,
    /// Phone number for payment confirmations.
    pub phone: Option<String>,
    /// Membership lifecycle status.
    pub membership_status: MembershipStatus,
    /// Currently effective plan, if any.
    pub current_plan: Option<PlanAssignment>,
}

/// The plan currently assigned to a member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanAssignment {
    /// Plan reference.
    pub plan_id: String,
    /// Plan display name.
    pub name: String,
    /// Effective start date.
    pub start_date: u64,
    /// Expiry date, if the plan has one.
    pub end_date: Option<u64>,
    /// Session allowance, for session-counted plans.
    pub session_total: Option<u32>,
}

/// Membership lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    /// Signed up, no active plan yet.
    Pending,
    /// Plan in effect.
    Active,
    /// Plan lapsed.
    Expired,
    /// Membership frozen by the operator.
    Suspended,
}

impl MembershipStatus {
    /// Convert to string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Suspended => "suspended",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_status_counts_as_paid() {
        assert!(PaymentStatus::Completed.counts_as_paid());
        assert!(PaymentStatus::Processing.counts_as_paid());
        assert!(!PaymentStatus::Pending.counts_as_paid());
        assert!(!PaymentStatus::Refunded.counts_as_paid());
        assert!(!PaymentStatus::PartialRefund.counts_as_paid());
    }

    #[test]
    fn test_invoice_status_terminal() {
        assert!(InvoiceStatus::Cancelled.is_terminal());
        assert!(InvoiceStatus::Refunded.is_terminal());
        assert!(!InvoiceStatus::Paid.is_terminal());
        assert!(!InvoiceStatus::Sent.is_terminal());
    }

    #[test]
    fn test_payment_method_is_gateway() {
        assert!(PaymentMethod::Gateway.is_gateway());
        assert!(!PaymentMethod::Cash.is_gateway());
        assert!(!PaymentMethod::BankTransfer.is_gateway());
    }

    #[test]
    fn test_service_reference_serde_tagging() {
        let plan = ServiceReference::Plan {
            plan_id: "plan_gold".to_string(),
            name: "Gold Quarterly".to_string(),
            session_total: Some(36),
        };
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["kind"], "plan");

        let adhoc = ServiceReference::AdHocService {
            service_id: "svc_daypass".to_string(),
            name: "Day Pass".to_string(),
        };
        let json = serde_json::to_value(&adhoc).unwrap();
        assert_eq!(json["kind"], "ad_hoc_service");
    }

    #[test]
    fn test_pending_webhook_record() {
        let record = WebhookEventRecord::pending(
            "evt_1",
            "gateway",
            "payment.captured",
            serde_json::json!({}),
            Some("sig".to_string()),
        );
        assert_eq!(record.status, WebhookEventStatus::Pending);
        assert_eq!(record.retry_count, 0);
        assert!(record.processed_at.is_none());
    }
}
