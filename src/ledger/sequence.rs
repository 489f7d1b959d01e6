//! Collision-safe sequential identifier generation.
//!
//! Produces human-readable, zero-padded codes (receipt numbers, enquiry codes,
//! member codes) scoped to a tenant. Two numbering families exist:
//!
//! - a strict probe-and-retry family ([`SequenceGenerator::next_probed`]) that
//!   existence-checks each candidate before handing it out, and
//! - a simpler "count + 1" family ([`SequenceGenerator::next_counted`]) that
//!   does not re-probe and is therefore weaker under concurrent creation.
//!
//! Neither family is a transactional counter: the read and the subsequent
//! insert are separate operations, so creation call sites must retry on a
//! uniqueness violation via [`insert_with_retry`] rather than trust the
//! generator alone.

use std::future::Future;
use std::time::Duration;

use super::error::LedgerError;
use super::storage::{CodeFamily, LedgerStore};

/// Probe attempts before the probed family falls back to a timestamp code.
const PROBE_ATTEMPTS: u64 = 10;

/// Insert attempts the retry combinator makes before giving up.
pub const INSERT_ATTEMPTS: u32 = 5;

/// Backoff between insert attempts.
pub const INSERT_BACKOFF: Duration = Duration::from_millis(25);

/// Shape of a generated code: a fixed prefix and a zero-padded numeric suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeFormat {
    /// Code prefix (e.g. "RCP", "ENQ").
    pub prefix: String,
    /// Zero-padded width of the numeric suffix.
    pub width: usize,
}

impl CodeFormat {
    /// Create a new format.
    #[must_use]
    pub fn new(prefix: impl Into<String>, width: usize) -> Self {
        Self {
            prefix: prefix.into(),
            width,
        }
    }

    /// Render a sequence number as a code.
    #[must_use]
    pub fn render(&self, n: u64) -> String {
        format!("{}{:0width$}", self.prefix, n, width = self.width)
    }

    /// Parse the numeric suffix out of an existing code.
    ///
    /// Tolerates codes whose suffix has outgrown the configured width, and
    /// codes carrying an unexpected prefix (the trailing digit run wins).
    #[must_use]
    pub fn parse_suffix(&self, code: &str) -> Option<u64> {
        let tail = code.strip_prefix(self.prefix.as_str()).unwrap_or(code);
        let digits: String = tail
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        digits.parse().ok()
    }

    /// Coarse timestamp-derived code used when all sequential candidates are
    /// taken. Trades strict sequentiality for liveness.
    #[must_use]
    pub fn fallback(&self) -> String {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        format!("{}{}", self.prefix, millis)
    }
}

/// Sequential identifier generator backed by a ledger store.
pub struct SequenceGenerator<S: LedgerStore> {
    store: S,
}

impl<S: LedgerStore> SequenceGenerator<S> {
    /// Create a new generator.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Allocate the next code in the probe-and-retry family.
    ///
    /// Reads the highest existing code, increments, and existence-checks each
    /// candidate. After [`PROBE_ATTEMPTS`] colliding probes it falls back to a
    /// timestamp-derived code; only a collision on the fallback itself yields
    /// [`LedgerError::IdExhausted`].
    pub async fn next_probed(
        &self,
        tenant_id: &str,
        family: CodeFamily,
        format: &CodeFormat,
    ) -> Result<String, LedgerError> {
        let start = match self.store.highest_code(tenant_id, family).await? {
            Some(highest) => format.parse_suffix(&highest).unwrap_or(0) + 1,
            None => 1,
        };

        for offset in 0..PROBE_ATTEMPTS {
            let candidate = format.render(start + offset);
            if !self.store.code_exists(tenant_id, family, &candidate).await? {
                return Ok(candidate);
            }
        }

        let fallback = format.fallback();
        if self.store.code_exists(tenant_id, family, &fallback).await? {
            return Err(LedgerError::IdExhausted {
                family: family.as_str().to_string(),
            });
        }
        tracing::warn!(
            target: "gymledger::sequence",
            tenant_id,
            family = family.as_str(),
            code = %fallback,
            "sequential probes exhausted, using timestamp fallback code"
        );
        Ok(fallback)
    }

    /// Allocate the next code in the "count + 1" family.
    ///
    /// Does not probe for existence, so it can hand out a taken code when
    /// records were created concurrently or deleted historically. Callers
    /// must pair it with [`insert_with_retry`].
    pub async fn next_counted(
        &self,
        tenant_id: &str,
        family: CodeFamily,
        format: &CodeFormat,
    ) -> Result<String, LedgerError> {
        let count = self.store.code_count(tenant_id, family).await?;
        Ok(format.render(count + 1))
    }
}

/// Bounded insert-retry combinator for optimistically allocated identifiers.
///
/// Calls `generate` with the attempt number (0-based), then `insert` with the
/// candidate. A [`LedgerError::DuplicateKey`] from `insert` triggers a backoff
/// and a fresh candidate; any other error is returned as-is. Callers are
/// expected to have `generate` produce a timestamp-derived code on the final
/// attempt to guarantee forward progress.
///
/// Returns [`LedgerError::IdExhausted`] when every attempt collided.
pub async fn insert_with_retry<T, G, GF, I, IF>(
    max_attempts: u32,
    backoff: Duration,
    mut generate: G,
    mut insert: I,
) -> Result<T, LedgerError>
where
    G: FnMut(u32) -> GF,
    GF: Future<Output = Result<String, LedgerError>>,
    I: FnMut(String) -> IF,
    IF: Future<Output = Result<T, LedgerError>>,
{
    let mut last_constraint = String::new();
    for attempt in 0..max_attempts {
        let candidate = generate(attempt).await?;
        match insert(candidate).await {
            Ok(record) => return Ok(record),
            Err(LedgerError::DuplicateKey { constraint }) => {
                tracing::debug!(
                    target: "gymledger::sequence",
                    attempt,
                    constraint = %constraint,
                    "insert collided on unique constraint, regenerating"
                );
                last_constraint = constraint;
                if attempt + 1 < max_attempts {
                    tokio::time::sleep(backoff).await;
                }
            }
            Err(other) => return Err(other),
        }
    }
    Err(LedgerError::IdExhausted {
        family: last_constraint,
    })
}
