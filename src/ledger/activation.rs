//! Membership activation trigger.
//!
//! A one-way gate that turns a paid invoice into an active membership period.
//! Activation is invoked synchronously from the paid-transition path, so every
//! failure here is caught and logged internally: a membership-activation
//! defect must never block payment confirmation to the payer.

use chrono::{DateTime, NaiveDate, Utc};

use super::error::LedgerError;
use super::model::{
    unix_now, Invoice, InvoiceLineItem, InvoiceStatus, MembershipStatus, PlanAssignment,
    ServiceReference,
};
use super::storage::LedgerStore;

/// What the trigger decided to do for an invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationOutcome {
    /// Membership status and current plan were written.
    Activated { member_id: String, plan_id: String },
    /// The plan's start date has not arrived; a scheduled process re-evaluates
    /// deferred activations as dates arrive.
    Deferred { starts_at: u64 },
    /// Nothing to do: invoice not paid, no member reference, member missing,
    /// or the matching plan is already active.
    Skipped { reason: &'static str },
}

/// Activates memberships from paid invoices.
pub struct MembershipActivator<S: LedgerStore> {
    store: S,
}

impl<S: LedgerStore> MembershipActivator<S> {
    /// Create a new activator.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Activate the membership a paid invoice bought, if its start date has
    /// arrived.
    ///
    /// Never returns an error: all failures are caught and logged so the
    /// payment flow that invoked the trigger cannot be aborted by it.
    pub async fn activate_for_invoice(&self, invoice: &Invoice) -> ActivationOutcome {
        self.activate_for_invoice_at(invoice, unix_now()).await
    }

    /// Deterministic-clock variant of [`Self::activate_for_invoice`].
    pub async fn activate_for_invoice_at(&self, invoice: &Invoice, now: u64) -> ActivationOutcome {
        match self.try_activate(invoice, now).await {
            Ok(outcome) => {
                match &outcome {
                    ActivationOutcome::Activated { member_id, plan_id } => {
                        tracing::info!(
                            target: "gymledger::activation",
                            tenant_id = %invoice.tenant_id,
                            invoice_id = %invoice.id,
                            member_id = %member_id,
                            plan_id = %plan_id,
                            "membership activated"
                        );
                    }
                    ActivationOutcome::Deferred { starts_at } => {
                        tracing::info!(
                            target: "gymledger::activation",
                            tenant_id = %invoice.tenant_id,
                            invoice_id = %invoice.id,
                            starts_at,
                            "membership activation deferred until plan start date"
                        );
                    }
                    ActivationOutcome::Skipped { reason } => {
                        tracing::debug!(
                            target: "gymledger::activation",
                            invoice_id = %invoice.id,
                            reason,
                            "membership activation skipped"
                        );
                    }
                }
                outcome
            }
            Err(err) => {
                tracing::warn!(
                    target: "gymledger::activation",
                    tenant_id = %invoice.tenant_id,
                    invoice_id = %invoice.id,
                    error = %err,
                    "membership activation failed, payment flow continues"
                );
                ActivationOutcome::Skipped { reason: "internal error" }
            }
        }
    }

    async fn try_activate(
        &self,
        invoice: &Invoice,
        now: u64,
    ) -> Result<ActivationOutcome, LedgerError> {
        if invoice.status != InvoiceStatus::Paid {
            return Ok(ActivationOutcome::Skipped {
                reason: "invoice not paid",
            });
        }

        let Some(member_id) = invoice.member_id.as_deref() else {
            return Ok(ActivationOutcome::Skipped {
                reason: "invoice carries no member reference",
            });
        };

        let Some(mut member) = self.store.get_member(&invoice.tenant_id, member_id).await? else {
            return Ok(ActivationOutcome::Skipped {
                reason: "member record not found",
            });
        };

        let Some(item) = plan_line_item(invoice) else {
            return Ok(ActivationOutcome::Skipped {
                reason: "invoice has no line items",
            });
        };

        let start_date = item.start_date.unwrap_or(now);
        if day_of(start_date) > day_of(now) {
            return Ok(ActivationOutcome::Deferred {
                starts_at: start_date,
            });
        }

        let assignment = plan_assignment(item, start_date);

        // Re-running the trigger on an already-active matching plan is a no-op.
        if member.membership_status == MembershipStatus::Active
            && member.current_plan.as_ref() == Some(&assignment)
        {
            return Ok(ActivationOutcome::Skipped {
                reason: "matching plan already active",
            });
        }

        let plan_id = assignment.plan_id.clone();
        member.membership_status = MembershipStatus::Active;
        member.current_plan = Some(assignment);
        self.store.update_member(&member).await?;

        Ok(ActivationOutcome::Activated {
            member_id: member.id,
            plan_id,
        })
    }
}

/// Select the line item carrying plan date information: the first with a start
/// or expiry date, else the first item.
fn plan_line_item(invoice: &Invoice) -> Option<&InvoiceLineItem> {
    invoice
        .line_items
        .iter()
        .find(|item| item.start_date.is_some() || item.end_date.is_some())
        .or_else(|| invoice.line_items.first())
}

/// Build the plan assignment written onto the member.
fn plan_assignment(item: &InvoiceLineItem, start_date: u64) -> PlanAssignment {
    match &item.service {
        Some(ServiceReference::Plan {
            plan_id,
            name,
            session_total,
        }) => PlanAssignment {
            plan_id: plan_id.clone(),
            name: name.clone(),
            start_date,
            end_date: item.end_date,
            session_total: *session_total,
        },
        Some(ServiceReference::AdHocService { service_id, name }) => PlanAssignment {
            plan_id: service_id.clone(),
            name: name.clone(),
            start_date,
            end_date: item.end_date,
            session_total: None,
        },
        None => PlanAssignment {
            plan_id: String::new(),
            name: item.description.clone(),
            start_date,
            end_date: item.end_date,
            session_total: None,
        },
    }
}

/// Calendar day of a Unix timestamp. Start-date comparisons happen at day
/// granularity, not instant granularity.
fn day_of(timestamp: u64) -> NaiveDate {
    DateTime::<Utc>::from_timestamp(timestamp as i64, 0)
        .unwrap_or_else(|| DateTime::<Utc>::UNIX_EPOCH)
        .date_naive()
}
