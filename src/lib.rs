//! GymLedger - payment and invoice reconciliation for multi-tenant
//! gym and studio management.
//!
//! The crate owns the money path: recording payments, ingesting gateway
//! callbacks, reconciling invoices, activating memberships from paid
//! invoices, and processing refunds. Persistence, the payment gateway,
//! notifications and audit are all external collaborators consumed through
//! traits, so the core works against any backend.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use gymledger::config::GatewayConfig;
//! use gymledger::gateway::UnconfiguredGateway;
//! use gymledger::http::{router, LedgerApp};
//! use gymledger::ledger::TracingAuditLogger;
//! use gymledger::notify::TracingNotifier;
//! use gymledger::webhooks::CallbackVerifier;
//!
//! #[tokio::main]
//! async fn main() {
//!     gymledger::init_tracing();
//!
//!     let config = GatewayConfig::from_env();
//!     let app = LedgerApp::new(
//!         my_store,                   // your LedgerStore implementation
//!         UnconfiguredGateway,        // or your PaymentGateway client
//!         CallbackVerifier::new(config.webhook_secret.clone(), config.mode),
//!         TracingNotifier,
//!         TracingAuditLogger,
//!     );
//!
//!     let router = router(Arc::new(app));
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

pub mod config;
mod error;
pub mod gateway;
pub mod http;
pub mod ledger;
pub mod notify;
pub mod webhooks;

// Re-exports for public API
pub use config::{DeploymentMode, GatewayConfig};
pub use error::{GymLedgerError, Result};
pub use gateway::{GatewayOrder, GatewayPayment, GatewayRefund, PaymentGateway};
pub use http::{router, LedgerApp};
pub use ledger::{
    ActivationOutcome, AuditEvent, AuditLogger, Invoice, InvoiceReconciler, InvoiceStatus,
    LedgerError, LedgerStore, MembershipActivator, Payment, PaymentMethod, PaymentRecorder,
    PaymentStatus, RecordPaymentRequest, RefundProcessor, RefundRequest, ServiceReference,
};
pub use notify::{NotificationSender, PaymentConfirmation, TracingNotifier};
pub use webhooks::{CallbackVerifier, IngestOutcome, WebhookIngestor, WebhookVerifier};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging with sensible defaults
///
/// This should be called early in your application, typically in main().
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "info", "debug", "gymledger=debug")
/// - `GYMLEDGER_LOG_JSON`: Set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("GYMLEDGER_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
