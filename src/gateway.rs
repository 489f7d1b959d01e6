//! Payment gateway client seam.
//!
//! The gateway is an external collaborator consumed through the
//! [`PaymentGateway`] trait; this crate never talks HTTP to it directly.
//! Deployments plug in a client for their provider, tests plug in
//! [`test::MockGateway`], and an unconfigured deployment gets
//! [`UnconfiguredGateway`], which refuses every call with a configuration
//! error instead of panicking at startup.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::ledger::LedgerError;

/// An order created at the gateway ahead of an online payment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayOrder {
    /// Gateway-assigned order id.
    pub order_id: String,
    /// Amount in minor units.
    pub amount: i64,
    /// ISO currency code.
    pub currency: String,
}

/// A refund issued at the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayRefund {
    /// Gateway-assigned refund id.
    pub refund_id: String,
    /// Amount refunded in minor units.
    pub amount: i64,
    /// Gateway-side status string.
    pub status: String,
}

/// A payment as the gateway sees it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayPayment {
    /// Gateway-assigned payment id.
    pub payment_id: String,
    /// Order the payment was made against.
    pub order_id: Option<String>,
    /// Amount in minor units.
    pub amount: i64,
    /// Gateway-side status string.
    pub status: String,
}

/// Client for the upstream payment gateway.
///
/// Every method maps provider failures to [`LedgerError::GatewayError`] with
/// the failing operation named.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create an order the member pays against.
    async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, LedgerError>;

    /// Issue a refund against a captured payment.
    async fn create_refund(
        &self,
        gateway_payment_id: &str,
        amount: i64,
    ) -> Result<GatewayRefund, LedgerError>;

    /// Fetch the current state of a payment.
    async fn fetch_payment(
        &self,
        gateway_payment_id: &str,
    ) -> Result<GatewayPayment, LedgerError>;
}

/// Verify the checkout signature a gateway hands back with a completed
/// payment: HMAC-SHA256 over `"{order_id}|{payment_id}"` keyed with the API
/// secret, hex-encoded. Comparison is constant-time.
#[must_use]
pub fn verify_payment_signature(
    order_id: &str,
    payment_id: &str,
    signature: &str,
    secret: &SecretString,
) -> bool {
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.expose_secret().as_bytes()) else {
        return false;
    };
    mac.update(order_id.as_bytes());
    mac.update(b"|");
    mac.update(payment_id.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    expected.as_bytes().ct_eq(signature.as_bytes()).into()
}

/// Gateway stub used when no provider credentials are configured.
///
/// Every call fails with [`LedgerError::ConfigurationError`] so the rest of
/// the system keeps working for cash-only deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredGateway;

impl UnconfiguredGateway {
    fn unconfigured() -> LedgerError {
        LedgerError::ConfigurationError {
            message: "payment gateway credentials are not configured".to_string(),
        }
    }
}

#[async_trait]
impl PaymentGateway for UnconfiguredGateway {
    async fn create_order(
        &self,
        _amount: i64,
        _currency: &str,
        _receipt: &str,
    ) -> Result<GatewayOrder, LedgerError> {
        Err(Self::unconfigured())
    }

    async fn create_refund(
        &self,
        _gateway_payment_id: &str,
        _amount: i64,
    ) -> Result<GatewayRefund, LedgerError> {
        Err(Self::unconfigured())
    }

    async fn fetch_payment(
        &self,
        _gateway_payment_id: &str,
    ) -> Result<GatewayPayment, LedgerError> {
        Err(Self::unconfigured())
    }
}

/// Mock gateway for testing.
#[cfg(any(test, feature = "test-ledger"))]
pub mod test {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    /// Scriptable in-memory gateway.
    ///
    /// Records refund calls for assertions and can be told to fail the next
    /// operation.
    #[derive(Default, Clone)]
    pub struct MockGateway {
        inner: Arc<MockInner>,
    }

    #[derive(Default)]
    struct MockInner {
        fail_next: AtomicBool,
        next_id: AtomicU64,
        refunds: Mutex<Vec<(String, i64)>>,
    }

    impl MockGateway {
        /// Create a new mock gateway.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Fail the next gateway call with a gateway error.
        pub fn fail_next(&self) {
            self.inner.fail_next.store(true, Ordering::SeqCst);
        }

        /// Refund calls made so far, as (gateway payment id, amount).
        pub fn refund_calls(&self) -> Vec<(String, i64)> {
            self.inner.refunds.lock().unwrap().clone()
        }

        fn take_failure(&self, operation: &str) -> Result<(), LedgerError> {
            if self.inner.fail_next.swap(false, Ordering::SeqCst) {
                return Err(LedgerError::GatewayError {
                    operation: operation.to_string(),
                    message: "simulated gateway failure".to_string(),
                });
            }
            Ok(())
        }

        fn next_id(&self, prefix: &str) -> String {
            let n = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            format!("{}_{}", prefix, n)
        }
    }

    #[async_trait]
    impl PaymentGateway for MockGateway {
        async fn create_order(
            &self,
            amount: i64,
            currency: &str,
            _receipt: &str,
        ) -> Result<GatewayOrder, LedgerError> {
            self.take_failure("create_order")?;
            Ok(GatewayOrder {
                order_id: self.next_id("order"),
                amount,
                currency: currency.to_string(),
            })
        }

        async fn create_refund(
            &self,
            gateway_payment_id: &str,
            amount: i64,
        ) -> Result<GatewayRefund, LedgerError> {
            self.take_failure("create_refund")?;
            self.inner
                .refunds
                .lock()
                .unwrap()
                .push((gateway_payment_id.to_string(), amount));
            Ok(GatewayRefund {
                refund_id: self.next_id("rfnd"),
                amount,
                status: "processed".to_string(),
            })
        }

        async fn fetch_payment(
            &self,
            gateway_payment_id: &str,
        ) -> Result<GatewayPayment, LedgerError> {
            self.take_failure("fetch_payment")?;
            Ok(GatewayPayment {
                payment_id: gateway_payment_id.to_string(),
                order_id: None,
                amount: 0,
                status: "captured".to_string(),
            })
        }
    }
}
