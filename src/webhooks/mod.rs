//! Gateway callback handling.
//!
//! Signature verification and the ingestion pipeline for payment callbacks:
//! verify on the raw bytes, record the event durably, then apply the
//! business effect idempotently.

pub mod ingest;
pub mod verification;

pub use ingest::{IngestOutcome, WebhookIngestor};
pub use verification::{CallbackVerifier, HmacSha256Verifier, WebhookVerifier};
