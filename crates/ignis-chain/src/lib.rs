//! Chain adapter contract used by the ignis executor.
//!
//! The executor never talks to a network directly: transactions, receipts and
//! read-only calls all go through [`ChainAdapter`]. [`SimulatedChain`] is a
//! deterministic in-process implementation with scriptable faults.

use std::fmt;

use async_trait::async_trait;
use ignis_types::{EmittedEvent, FutureId, PendingHandle};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

mod simulated;

pub use simulated::{SimulatedChain, SimulatedChainStats};

/// Result type for adapter calls.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Classification of adapter-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterErrorKind {
    Timeout,
    ConnectionReset,
    NonceContention,
    Underpriced,
    InsufficientFunds,
    /// The adapter has never seen (or has dropped) the transaction.
    UnknownTransaction,
    Other,
}

impl AdapterErrorKind {
    /// Worth retrying with the same nonce after a backoff.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::ConnectionReset | Self::NonceContention
        )
    }

    /// Funds or pricing problems that a retry cannot fix.
    pub fn is_unrecoverable(self) -> bool {
        matches!(self, Self::Underpriced | Self::InsufficientFunds)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ConnectionReset => "connection_reset",
            Self::NonceContention => "nonce_contention",
            Self::Underpriced => "underpriced",
            Self::InsufficientFunds => "insufficient_funds",
            Self::UnknownTransaction => "unknown_transaction",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for AdapterErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error reported by a chain adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub message: String,
}

impl AdapterError {
    pub fn new(kind: AdapterErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// What a transaction does once its arguments are resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionKind {
    Deploy {
        contract_name: String,
        args: Vec<Value>,
    },
    Call {
        contract: String,
        function: String,
        args: Vec<Value>,
    },
    Transfer {
        to: String,
    },
}

/// Fully resolved transaction ready for signing and broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub future_id: FutureId,
    pub nonce: u64,
    pub kind: TransactionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// A transaction the signer sent, with the future that sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedTransaction {
    pub future_id: FutureId,
    pub handle: PendingHandle,
}

/// Read-only call; never consumes a nonce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticCallRequest {
    pub future_id: FutureId,
    pub contract: String,
    pub function: String,
    pub args: Vec<Value>,
}

/// Receipt of a confirmed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub transaction_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    #[serde(default)]
    pub events: Vec<EmittedEvent>,
}

/// Observed status of a submitted transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    Pending,
    Confirmed(Receipt),
    Reverted { reason: String },
}

/// Outcome of a read-only call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Returned(Value),
    Reverted { reason: String },
}

/// Network access used by the executor.
///
/// Every call may be slow and may fail transiently.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Network identifier, used in logs.
    fn network(&self) -> &str;

    /// Next nonce the signing account would use, counting pending transactions.
    async fn pending_nonce(&self) -> AdapterResult<u64>;

    async fn submit(&self, request: TransactionRequest) -> AdapterResult<PendingHandle>;

    async fn poll(&self, handle: &PendingHandle) -> AdapterResult<PollStatus>;

    /// Looks up a transaction the signer sent with `nonce`, if one landed.
    ///
    /// The submitting future lets callers tell their own broadcast apart from
    /// a sibling's that took the same nonce.
    async fn find_submission(&self, nonce: u64) -> AdapterResult<Option<SubmittedTransaction>>;

    async fn call(&self, request: StaticCallRequest) -> AdapterResult<CallOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_error_kinds_split_transient_and_unrecoverable() {
        for kind in [
            AdapterErrorKind::Timeout,
            AdapterErrorKind::ConnectionReset,
            AdapterErrorKind::NonceContention,
        ] {
            assert!(kind.is_transient(), "{kind}");
            assert!(!kind.is_unrecoverable(), "{kind}");
        }
        for kind in [AdapterErrorKind::Underpriced, AdapterErrorKind::InsufficientFunds] {
            assert!(kind.is_unrecoverable(), "{kind}");
            assert!(!kind.is_transient(), "{kind}");
        }
        assert!(!AdapterErrorKind::UnknownTransaction.is_transient());
        assert!(!AdapterErrorKind::Other.is_unrecoverable());
    }

    #[test]
    fn unit_adapter_error_display_names_kind() {
        let error = AdapterError::new(AdapterErrorKind::ConnectionReset, "peer went away");
        assert_eq!(error.to_string(), "connection_reset: peer went away");
    }
}
