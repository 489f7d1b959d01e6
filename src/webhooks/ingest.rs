//! Gateway callback ingestion.
//!
//! The pipeline is strictly ordered: verify the signature on the raw bytes,
//! durably record the event, then apply the business effect. The recorded
//! event's unique id is the sole idempotency guard: a redelivery of a
//! processed event short-circuits to success without touching the ledger,
//! while a redelivery of a failed event gets another processing attempt
//! until its retries are exhausted. A failure while applying the effect
//! marks the event failed and bubbles up as a server error so the gateway
//! redelivers.

use serde::Deserialize;

use crate::ledger::audit::{AuditEvent, AuditLogger};
use crate::ledger::model::{
    unix_now, GatewayCorrelation, Invoice, Payment, PaymentMethod, PaymentStatus,
    WebhookEventRecord, WebhookEventStatus,
};
use crate::ledger::payment::{default_receipt_format, insert_payment_with_receipt};
use crate::ledger::sequence::{CodeFormat, SequenceGenerator};
use crate::ledger::storage::LedgerStore;
use crate::ledger::{
    ActivationOutcome, InvoiceReconciler, LedgerError, MembershipActivator,
};
use crate::notify::{NotificationSender, PaymentConfirmation};

use super::verification::WebhookVerifier;

/// Event source tag recorded on ingested events.
const SOURCE: &str = "gateway";

/// Callback envelope as the gateway sends it.
#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    /// Source-assigned event id.
    id: String,
    /// Event type, e.g. "payment.captured".
    event: String,
    /// Event payload; shape depends on the event type.
    #[serde(default)]
    payload: serde_json::Value,
}

/// The payment entity carried by payment events.
#[derive(Debug, Deserialize)]
struct PaymentEntity {
    /// Gateway payment id.
    id: String,
    /// Order the payment was made against.
    order_id: Option<String>,
    /// Amount in minor units.
    amount: i64,
    /// ISO currency code.
    #[serde(default)]
    currency: Option<String>,
    /// When the gateway recorded the payment, Unix seconds.
    #[serde(default)]
    created_at: Option<u64>,
}

/// How an ingested callback was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Business effect applied.
    Processed { event_id: String },
    /// Event id seen before; nothing done.
    AlreadyProcessed { event_id: String },
    /// Event type this system does not act on.
    Ignored { event_id: String, event_type: String },
    /// Payment event whose order matches no invoice. Recorded and parked.
    Orphaned { event_id: String, order_id: String },
}

impl IngestOutcome {
    /// Short status string for logs and acknowledgement bodies.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed { .. } => "processed",
            Self::AlreadyProcessed { .. } => "already_processed",
            Self::Ignored { .. } => "ignored",
            Self::Orphaned { .. } => "orphaned",
        }
    }
}

/// Ingests gateway callbacks end to end.
pub struct WebhookIngestor<S, V, N, A>
where
    S: LedgerStore + Clone,
    V: WebhookVerifier,
    N: NotificationSender,
    A: AuditLogger,
{
    store: S,
    verifier: V,
    notifier: N,
    audit: A,
    sequence: SequenceGenerator<S>,
    receipt_format: CodeFormat,
}

impl<S, V, N, A> WebhookIngestor<S, V, N, A>
where
    S: LedgerStore + Clone,
    V: WebhookVerifier,
    N: NotificationSender,
    A: AuditLogger,
{
    /// Create a new ingestor.
    #[must_use]
    pub fn new(store: S, verifier: V, notifier: N, audit: A) -> Self {
        Self {
            sequence: SequenceGenerator::new(store.clone()),
            store,
            verifier,
            notifier,
            audit,
            receipt_format: default_receipt_format(),
        }
    }

    /// Ingest a raw callback.
    ///
    /// `signature` is the value of the signature header, absent when the
    /// caller sent none (which fails verification unless the verifier is
    /// permissive).
    pub async fn ingest(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<IngestOutcome, LedgerError> {
        let signature = signature.unwrap_or("");
        if !self.verifier.verify_signature(body, signature).await? {
            tracing::warn!(
                target: "gymledger::webhooks",
                "callback rejected: signature verification failed"
            );
            return Err(LedgerError::SignatureInvalid);
        }

        let envelope: WebhookEnvelope =
            serde_json::from_slice(body).map_err(|e| LedgerError::InvalidPayload {
                message: format!("malformed callback body: {}", e),
            })?;

        let record = WebhookEventRecord::pending(
            envelope.id.clone(),
            SOURCE,
            envelope.event.clone(),
            envelope.payload.clone(),
            (!signature.is_empty()).then(|| signature.to_string()),
        );
        if let Err(err) = self.store.insert_webhook_event(&record).await {
            return match err {
                LedgerError::DuplicateKey { .. } => self.handle_redelivery(&envelope).await,
                other => Err(other),
            };
        }
        self.audit
            .log(AuditEvent::WebhookReceived {
                event_id: envelope.id.clone(),
                event_type: envelope.event.clone(),
            })
            .await;

        self.apply(record, &envelope).await
    }

    /// A redelivered event id.
    ///
    /// Processed (or in-flight) events short-circuit to success. Failed
    /// events get another processing attempt until their retries are
    /// exhausted, which is how a transient mid-processing failure gets
    /// completed by the gateway's redelivery.
    async fn handle_redelivery(
        &self,
        envelope: &WebhookEnvelope,
    ) -> Result<IngestOutcome, LedgerError> {
        let Some(mut record) = self.store.get_webhook_event(&envelope.id).await? else {
            return Err(LedgerError::Internal {
                message: format!(
                    "webhook event {} reported duplicate but could not be loaded",
                    envelope.id
                ),
            });
        };

        match record.status {
            WebhookEventStatus::Processed
            | WebhookEventStatus::Pending
            | WebhookEventStatus::Retrying => {
                tracing::info!(
                    target: "gymledger::webhooks",
                    event_id = %record.event_id,
                    status = record.status.as_str(),
                    "callback replayed, already recorded"
                );
                Ok(IngestOutcome::AlreadyProcessed {
                    event_id: record.event_id,
                })
            }
            WebhookEventStatus::Failed if record.retry_count >= record.max_retries => {
                tracing::warn!(
                    target: "gymledger::webhooks",
                    event_id = %record.event_id,
                    retry_count = record.retry_count,
                    "retries exhausted, event stays parked"
                );
                Ok(IngestOutcome::AlreadyProcessed {
                    event_id: record.event_id,
                })
            }
            WebhookEventStatus::Failed => {
                record.status = WebhookEventStatus::Retrying;
                self.store.update_webhook_event(&record).await?;
                tracing::info!(
                    target: "gymledger::webhooks",
                    event_id = %record.event_id,
                    attempt = record.retry_count + 1,
                    "reprocessing previously failed event"
                );
                self.apply(record, envelope).await
            }
        }
    }

    /// Run the business effect and mark the event record accordingly.
    async fn apply(
        &self,
        mut record: WebhookEventRecord,
        envelope: &WebhookEnvelope,
    ) -> Result<IngestOutcome, LedgerError> {
        match self.process(envelope).await {
            Ok(outcome) => {
                record.status = WebhookEventStatus::Processed;
                record.processed_at = Some(unix_now());
                self.store.update_webhook_event(&record).await?;
                self.audit
                    .log(AuditEvent::WebhookProcessed {
                        event_id: record.event_id,
                        event_type: record.event_type,
                        outcome: outcome.as_str().to_string(),
                    })
                    .await;
                Ok(outcome)
            }
            Err(err) => {
                record.status = WebhookEventStatus::Failed;
                record.retry_count += 1;
                record.last_error = Some(err.to_string());
                // Best effort; the original failure is the one to surface.
                if let Err(mark_err) = self.store.update_webhook_event(&record).await {
                    tracing::error!(
                        target: "gymledger::webhooks",
                        event_id = %record.event_id,
                        error = %mark_err,
                        "failed to mark webhook event as failed"
                    );
                }
                // Once the event is recorded, any failure must read as a
                // server error so the gateway redelivers and the retry path
                // above can finish the work.
                Err(if err.is_client_error() {
                    LedgerError::Internal {
                        message: format!(
                            "processing callback {} failed: {}",
                            record.event_id, err
                        ),
                    }
                } else {
                    err
                })
            }
        }
    }

    async fn process(&self, envelope: &WebhookEnvelope) -> Result<IngestOutcome, LedgerError> {
        match envelope.event.as_str() {
            "payment.captured" | "payment.authorized" => {
                self.process_payment_event(envelope).await
            }
            other => {
                tracing::debug!(
                    target: "gymledger::webhooks",
                    event_id = %envelope.id,
                    event_type = other,
                    "ignoring unhandled event type"
                );
                Ok(IngestOutcome::Ignored {
                    event_id: envelope.id.clone(),
                    event_type: envelope.event.clone(),
                })
            }
        }
    }

    async fn process_payment_event(
        &self,
        envelope: &WebhookEnvelope,
    ) -> Result<IngestOutcome, LedgerError> {
        let entity: PaymentEntity =
            serde_json::from_value(envelope.payload["payment"]["entity"].clone()).map_err(
                |e| LedgerError::InvalidPayload {
                    message: format!("malformed payment entity: {}", e),
                },
            )?;

        let Some(order_id) = entity.order_id.as_deref() else {
            return Err(LedgerError::InvalidPayload {
                message: "payment entity carries no order id".to_string(),
            });
        };

        let Some(invoice) = self.store.find_invoice_by_order_id(order_id).await? else {
            // Not an error: another system may own this order. The event
            // record keeps the evidence.
            tracing::warn!(
                target: "gymledger::webhooks",
                event_id = %envelope.id,
                order_id,
                "payment event matches no invoice"
            );
            return Ok(IngestOutcome::Orphaned {
                event_id: envelope.id.clone(),
                order_id: order_id.to_string(),
            });
        };

        if let Some(existing) = self.store.find_payment_by_gateway_id(&entity.id).await? {
            tracing::info!(
                target: "gymledger::webhooks",
                event_id = %envelope.id,
                payment_id = %existing.id,
                gateway_payment_id = %entity.id,
                "payment already recorded for this gateway payment"
            );
            // An earlier attempt may have recorded the payment and died
            // before reconciling; settling again makes the redelivery
            // finish that work.
            self.settle_invoice(invoice, &existing, &entity.id).await?;
            return Ok(IngestOutcome::AlreadyProcessed {
                event_id: envelope.id.clone(),
            });
        }

        let now = unix_now();
        let template = Payment {
            id: format!("pay_{}", uuid::Uuid::new_v4().simple()),
            tenant_id: invoice.tenant_id.clone(),
            invoice_id: invoice.id.clone(),
            member_id: invoice.member_id.clone(),
            amount: entity.amount,
            currency: entity.currency.clone().unwrap_or_else(|| "inr".to_string()),
            method: PaymentMethod::Gateway,
            status: PaymentStatus::Completed,
            receipt_number: String::new(),
            gateway: Some(GatewayCorrelation {
                order_id: Some(order_id.to_string()),
                payment_id: Some(entity.id.clone()),
                signature: None,
            }),
            notes: None,
            // The gateway's clock, not ours: redeliveries must not move it.
            paid_at: Some(entity.created_at.unwrap_or(now)),
            refund: None,
            created_at: now,
        };

        let payment = match insert_payment_with_receipt(
            &self.store,
            &self.sequence,
            &self.receipt_format,
            &invoice.tenant_id,
            template,
        )
        .await
        {
            Ok(payment) => payment,
            // Concurrent delivery of the same gateway payment lost the race.
            Err(LedgerError::DuplicateKey { .. }) => {
                return Ok(IngestOutcome::AlreadyProcessed {
                    event_id: envelope.id.clone(),
                })
            }
            Err(other) => return Err(other),
        };

        self.audit
            .log(AuditEvent::PaymentRecorded {
                tenant_id: payment.tenant_id.clone(),
                payment_id: payment.id.clone(),
                invoice_id: payment.invoice_id.clone(),
                receipt_number: payment.receipt_number.clone(),
                amount: payment.amount,
            })
            .await;

        self.settle_invoice(invoice, &payment, &entity.id).await?;

        Ok(IngestOutcome::Processed {
            event_id: envelope.id.clone(),
        })
    }

    /// Everything downstream of a recorded gateway payment: correlate the
    /// invoice, reconcile, activate on a newly paid invoice, confirm.
    ///
    /// Runs on duplicate deliveries too, so an attempt that recorded the
    /// payment but died before this point is completed by redelivery.
    async fn settle_invoice(
        &self,
        mut invoice: Invoice,
        payment: &Payment,
        gateway_payment_id: &str,
    ) -> Result<(), LedgerError> {
        invoice.gateway_payment_id = Some(gateway_payment_id.to_string());
        invoice.updated_at = unix_now();
        self.store.update_invoice(&invoice).await?;

        let reconciler = InvoiceReconciler::new(self.store.clone());
        let result = reconciler.reconcile(&invoice.tenant_id, &invoice.id).await?;

        if result.newly_paid {
            let outcome = MembershipActivator::new(self.store.clone())
                .activate_for_invoice(&result.invoice)
                .await;
            if let ActivationOutcome::Activated { member_id, plan_id } = &outcome {
                self.audit
                    .log(AuditEvent::MembershipActivated {
                        tenant_id: invoice.tenant_id.clone(),
                        member_id: member_id.clone(),
                        plan_id: plan_id.clone(),
                    })
                    .await;
            }
        }
        // Every applied payment gets a confirmation attempt, partial or
        // settling alike.
        self.send_confirmation(&result.invoice, payment).await;
        Ok(())
    }

    /// Best-effort payment confirmation. A down provider never fails the
    /// callback.
    async fn send_confirmation(&self, invoice: &Invoice, payment: &Payment) {
        let Some(member_id) = invoice.member_id.as_deref() else {
            return;
        };
        let member = match self.store.get_member(&invoice.tenant_id, member_id).await {
            Ok(Some(member)) => member,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(
                    target: "gymledger::webhooks",
                    member_id,
                    error = %err,
                    "could not load member for payment confirmation"
                );
                return;
            }
        };
        let Some(phone) = member.phone else {
            return;
        };

        let confirmation = PaymentConfirmation {
            phone,
            payer_name: member.name,
            amount: payment.amount,
            invoice_number: invoice.invoice_number.clone(),
            receipt_number: payment.receipt_number.clone(),
        };
        if let Err(err) = self.notifier.send_payment_confirmation(&confirmation).await {
            tracing::warn!(
                target: "gymledger::webhooks",
                receipt = %confirmation.receipt_number,
                error = %err,
                "payment confirmation failed"
            );
        }
    }
}
