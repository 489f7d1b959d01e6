//! HTTP surface for the ledger.
//!
//! Three thin handlers over the domain components. Handlers extract, call
//! into the domain, and map [`LedgerError`] onto HTTP statuses at this
//! boundary only:
//!
//! - `POST /webhooks/gateway`: 200 on processed or replayed events, 401 on a
//!   bad signature, 400 on a malformed body, 500 on processing failures (so
//!   the gateway redelivers);
//! - `POST /invoices/:invoice_id/payments`: 404 for an unknown invoice;
//! - `POST /payments/:payment_id/refund`: 400 for unrefundable payments.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::{GymLedgerError, Result};
use crate::gateway::PaymentGateway;
use crate::ledger::audit::AuditLogger;
use crate::ledger::{
    LedgerStore, Payment, PaymentMethod, PaymentRecorder, RecordPaymentRequest,
    RefundProcessor, RefundRequest,
};
use crate::notify::NotificationSender;
use crate::webhooks::{WebhookIngestor, WebhookVerifier};

/// Header carrying the caller's tenant.
const TENANT_HEADER: &str = "x-tenant-id";
/// Header carrying the gateway's callback signature.
const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// The assembled ledger application: every domain component wired to one
/// store, gateway, verifier, notifier and audit sink.
pub struct LedgerApp<S, G, V, N, A>
where
    S: LedgerStore + Clone,
    G: PaymentGateway,
    V: WebhookVerifier,
    N: NotificationSender,
    A: AuditLogger + Clone,
{
    /// Operator payment entry.
    pub payments: PaymentRecorder<S, A>,
    /// Refund processing.
    pub refunds: RefundProcessor<S, G, A>,
    /// Gateway callback ingestion.
    pub webhooks: WebhookIngestor<S, V, N, A>,
}

impl<S, G, V, N, A> LedgerApp<S, G, V, N, A>
where
    S: LedgerStore + Clone,
    G: PaymentGateway,
    V: WebhookVerifier,
    N: NotificationSender,
    A: AuditLogger + Clone,
{
    /// Wire up the application from its collaborators.
    #[must_use]
    pub fn new(store: S, gateway: G, verifier: V, notifier: N, audit: A) -> Self {
        Self {
            payments: PaymentRecorder::new(store.clone(), audit.clone()),
            refunds: RefundProcessor::new(store.clone(), gateway, audit.clone()),
            webhooks: WebhookIngestor::new(store, verifier, notifier, audit),
        }
    }
}

/// Build the router for the ledger's HTTP surface.
pub fn router<S, G, V, N, A>(app: Arc<LedgerApp<S, G, V, N, A>>) -> Router
where
    S: LedgerStore + Clone + Send + Sync + 'static,
    G: PaymentGateway + 'static,
    V: WebhookVerifier + 'static,
    N: NotificationSender + 'static,
    A: AuditLogger + Clone + 'static,
{
    Router::new()
        .route("/webhooks/gateway", post(handle_webhook::<S, G, V, N, A>))
        .route(
            "/invoices/:invoice_id/payments",
            post(handle_record_payment::<S, G, V, N, A>),
        )
        .route(
            "/payments/:payment_id/refund",
            post(handle_refund::<S, G, V, N, A>),
        )
        .with_state(app)
}

fn tenant_from(headers: &HeaderMap) -> Result<String> {
    headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| GymLedgerError::BadRequest("missing x-tenant-id header".to_string()))
}

/// Acknowledgement body returned to the gateway.
#[derive(Debug, Serialize)]
struct WebhookAck {
    status: &'static str,
}

async fn handle_webhook<S, G, V, N, A>(
    State(app): State<Arc<LedgerApp<S, G, V, N, A>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>>
where
    S: LedgerStore + Clone + Send + Sync + 'static,
    G: PaymentGateway + 'static,
    V: WebhookVerifier + 'static,
    N: NotificationSender + 'static,
    A: AuditLogger + Clone + 'static,
{
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let outcome = app.webhooks.ingest(&body, signature).await?;
    Ok(Json(WebhookAck {
        status: outcome.as_str(),
    }))
}

/// Operator payment entry body. The invoice comes from the path.
#[derive(Debug, Deserialize)]
struct PaymentBody {
    amount: i64,
    payment_method: PaymentMethod,
    #[serde(default)]
    transaction_id: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

async fn handle_record_payment<S, G, V, N, A>(
    State(app): State<Arc<LedgerApp<S, G, V, N, A>>>,
    Path(invoice_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<PaymentBody>,
) -> Result<Json<Payment>>
where
    S: LedgerStore + Clone + Send + Sync + 'static,
    G: PaymentGateway + 'static,
    V: WebhookVerifier + 'static,
    N: NotificationSender + 'static,
    A: AuditLogger + Clone + 'static,
{
    let tenant_id = tenant_from(&headers)?;
    let payment = app
        .payments
        .record_payment(
            &tenant_id,
            RecordPaymentRequest {
                invoice_id,
                amount: body.amount,
                payment_method: body.payment_method,
                transaction_id: body.transaction_id,
                notes: body.notes,
            },
        )
        .await?;
    Ok(Json(payment))
}

async fn handle_refund<S, G, V, N, A>(
    State(app): State<Arc<LedgerApp<S, G, V, N, A>>>,
    Path(payment_id): Path<String>,
    headers: HeaderMap,
    body: Option<Json<RefundRequest>>,
) -> Result<Json<Payment>>
where
    S: LedgerStore + Clone + Send + Sync + 'static,
    G: PaymentGateway + 'static,
    V: WebhookVerifier + 'static,
    N: NotificationSender + 'static,
    A: AuditLogger + Clone + 'static,
{
    let tenant_id = tenant_from(&headers)?;
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let payment = app
        .refunds
        .refund_payment(&tenant_id, &payment_id, request)
        .await?;
    Ok(Json(payment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeploymentMode;
    use crate::gateway::test::MockGateway;
    use crate::ledger::audit::test::RecordingAuditLogger;
    use crate::ledger::model::{Invoice, InvoiceStatus, PaymentStatus};
    use crate::ledger::storage::test::InMemoryLedgerStore;
    use crate::notify::test::RecordingNotifier;
    use crate::webhooks::CallbackVerifier;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use hmac::{Hmac, Mac};
    use secrecy::SecretString;
    use sha2::Sha256;
    use tower::util::ServiceExt;

    fn sign(payload: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(b"whsec_test").unwrap();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    fn test_router(store: InMemoryLedgerStore) -> Router {
        let app = LedgerApp::new(
            store,
            MockGateway::new(),
            CallbackVerifier::new(
                Some(SecretString::new("whsec_test".to_string())),
                DeploymentMode::Production,
            ),
            RecordingNotifier::new(),
            RecordingAuditLogger::new(),
        );
        router(Arc::new(app))
    }

    fn sent_invoice(total: i64) -> Invoice {
        Invoice {
            id: "inv_1".to_string(),
            tenant_id: "tenant_1".to_string(),
            member_id: None,
            invoice_number: "INV0001".to_string(),
            line_items: vec![],
            subtotal: total,
            discount: 0,
            tax: 0,
            total,
            pending: total,
            status: InvoiceStatus::Sent,
            due_date: None,
            paid_date: None,
            gateway_order_id: Some("order_1".to_string()),
            gateway_payment_id: None,
            updated_at: 0,
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_record_payment_endpoint() {
        let store = InMemoryLedgerStore::new();
        store.seed_invoice(sent_invoice(5000));
        let router = test_router(store.clone());

        let request = Request::builder()
            .method("POST")
            .uri("/invoices/inv_1/payments")
            .header("content-type", "application/json")
            .header("x-tenant-id", "tenant_1")
            .body(Body::from(r#"{"amount":5000,"payment_method":"cash"}"#))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "completed");
        assert_eq!(json["amount"], 5000);

        let invoice = store.get_invoice("tenant_1", "inv_1").await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
    }

    #[tokio::test]
    async fn test_record_payment_unknown_invoice_is_404() {
        let router = test_router(InMemoryLedgerStore::new());
        let request = Request::builder()
            .method("POST")
            .uri("/invoices/inv_missing/payments")
            .header("content-type", "application/json")
            .header("x-tenant-id", "tenant_1")
            .body(Body::from(r#"{"amount":5000,"payment_method":"cash"}"#))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_record_payment_requires_tenant_header() {
        let store = InMemoryLedgerStore::new();
        store.seed_invoice(sent_invoice(5000));
        let router = test_router(store);

        let request = Request::builder()
            .method("POST")
            .uri("/invoices/inv_1/payments")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"amount":5000,"payment_method":"cash"}"#))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_webhook_endpoint_accepts_signed_callback() {
        let store = InMemoryLedgerStore::new();
        store.seed_invoice(sent_invoice(5000));
        let router = test_router(store.clone());

        let payload = serde_json::to_vec(&serde_json::json!({
            "id": "evt_1",
            "event": "payment.captured",
            "payload": { "payment": { "entity": {
                "id": "gw_pay_1", "order_id": "order_1", "amount": 5000
            }}}
        }))
        .unwrap();

        let request = Request::builder()
            .method("POST")
            .uri("/webhooks/gateway")
            .header("x-webhook-signature", sign(&payload))
            .body(Body::from(payload))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "processed");
    }

    #[tokio::test]
    async fn test_webhook_endpoint_rejects_bad_signature() {
        let router = test_router(InMemoryLedgerStore::new());
        let request = Request::builder()
            .method("POST")
            .uri("/webhooks/gateway")
            .header("x-webhook-signature", "deadbeef")
            .body(Body::from(r#"{"id":"evt_1","event":"x","payload":{}}"#))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_webhook_replay_returns_200() {
        let store = InMemoryLedgerStore::new();
        store.seed_invoice(sent_invoice(5000));
        let router = test_router(store);

        let payload = serde_json::to_vec(&serde_json::json!({
            "id": "evt_1",
            "event": "payment.captured",
            "payload": { "payment": { "entity": {
                "id": "gw_pay_1", "order_id": "order_1", "amount": 5000
            }}}
        }))
        .unwrap();
        let signature = sign(&payload);

        for expected_status in ["processed", "already_processed"] {
            let request = Request::builder()
                .method("POST")
                .uri("/webhooks/gateway")
                .header("x-webhook-signature", signature.clone())
                .body(Body::from(payload.clone()))
                .unwrap();
            let response = router.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let json = body_json(response).await;
            assert_eq!(json["status"], expected_status);
        }
    }

    #[tokio::test]
    async fn test_refund_endpoint() {
        let store = InMemoryLedgerStore::new();
        let mut invoice = sent_invoice(1000);
        invoice.status = InvoiceStatus::Paid;
        invoice.pending = 0;
        store.seed_invoice(invoice);
        store
            .insert_payment(&Payment {
                id: "pay_1".to_string(),
                tenant_id: "tenant_1".to_string(),
                invoice_id: "inv_1".to_string(),
                member_id: None,
                amount: 1000,
                currency: "inr".to_string(),
                method: PaymentMethod::Cash,
                status: PaymentStatus::Completed,
                receipt_number: "RCP0001".to_string(),
                gateway: None,
                notes: None,
                paid_at: Some(1),
                refund: None,
                created_at: 1,
            })
            .await
            .unwrap();
        let router = test_router(store);

        let request = Request::builder()
            .method("POST")
            .uri("/payments/pay_1/refund")
            .header("content-type", "application/json")
            .header("x-tenant-id", "tenant_1")
            .body(Body::from(r#"{"amount":400,"reason":"overcharged"}"#))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "partial_refund");
    }

    #[tokio::test]
    async fn test_refund_pending_payment_is_400() {
        let store = InMemoryLedgerStore::new();
        store.seed_invoice(sent_invoice(1000));
        store
            .insert_payment(&Payment {
                id: "pay_1".to_string(),
                tenant_id: "tenant_1".to_string(),
                invoice_id: "inv_1".to_string(),
                member_id: None,
                amount: 1000,
                currency: "inr".to_string(),
                method: PaymentMethod::Gateway,
                status: PaymentStatus::Pending,
                receipt_number: "RCP0001".to_string(),
                gateway: None,
                notes: None,
                paid_at: None,
                refund: None,
                created_at: 1,
            })
            .await
            .unwrap();
        let router = test_router(store);

        let request = Request::builder()
            .method("POST")
            .uri("/payments/pay_1/refund")
            .header("content-type", "application/json")
            .header("x-tenant-id", "tenant_1")
            .body(Body::from("{}"))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
