//! Results captured from the chain and the persisted journal record shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::{FailureKind, FutureId, FutureKind, FutureState, ResultField};

/// Event decoded from a transaction receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmittedEvent {
    pub name: String,
    #[serde(default)]
    pub args: BTreeMap<String, Value>,
}

impl EmittedEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: BTreeMap::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

/// Concrete result of a successfully executed future.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FutureResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EmittedEvent>,
}

impl FutureResult {
    /// Reads one field of the result as plain JSON.
    pub fn field(&self, field: ResultField) -> Option<Value> {
        match field {
            ResultField::Address => self.address.clone().map(Value::String),
            ResultField::Value => self.value.clone(),
            ResultField::TransactionHash => self.transaction_hash.clone().map(Value::String),
        }
    }

    /// Value surfaced to callers for a future of `kind` in the output mapping.
    pub fn output_value(&self, kind: FutureKind) -> Value {
        let field = match kind {
            FutureKind::Deploy | FutureKind::ContractAt => ResultField::Address,
            FutureKind::Call | FutureKind::SendValue => ResultField::TransactionHash,
            FutureKind::StaticCall | FutureKind::ReadEventArgument => ResultField::Value,
        };
        self.field(field).unwrap_or(Value::Null)
    }

    /// Finds argument `argument` of the `event_index`-th event named `event`.
    pub fn event_argument(&self, event: &str, argument: &str, event_index: usize) -> Option<&Value> {
        self.events
            .iter()
            .filter(|candidate| candidate.name == event)
            .nth(event_index)
            .and_then(|candidate| candidate.args.get(argument))
    }
}

/// Handle returned by a chain adapter for a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingHandle {
    pub transaction_hash: String,
    pub nonce: u64,
}

/// Failure classification plus a human readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub message: String,
}

/// One append-only journal entry.
///
/// Later entries for the same `future_id` supersede earlier ones on replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub sequence: u64,
    pub future_id: FutureId,
    pub attempt: u32,
    pub state: FutureState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<FutureResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Operator reset: the future returns to `NotStarted`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub wiped: bool,
    pub recorded_at: DateTime<Utc>,
}
