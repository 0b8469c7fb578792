//! Future identifiers, actions, and deferred argument values.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Separator between the module name and the local id of a future.
pub const FUTURE_ID_SEPARATOR: char = '#';

/// Error returned when a future identifier is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FutureIdError {
    #[error("future id '{0}' must have the form <module>#<local-id>")]
    Malformed(String),
    #[error("module name cannot be empty")]
    EmptyModuleName,
    #[error("local future id cannot be empty")]
    EmptyLocalId,
    #[error("'{0}' cannot contain '#'")]
    ContainsSeparator(String),
}

/// Deterministic identifier of a future, e.g. `SupplyChainModule#SupplyChain`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FutureId(String);

impl FutureId {
    /// Builds an id from its module name and module-local id.
    pub fn new(module_name: &str, local_id: &str) -> Result<Self, FutureIdError> {
        let module_name = module_name.trim();
        let local_id = local_id.trim();
        if module_name.is_empty() {
            return Err(FutureIdError::EmptyModuleName);
        }
        if local_id.is_empty() {
            return Err(FutureIdError::EmptyLocalId);
        }
        for part in [module_name, local_id] {
            if part.contains(FUTURE_ID_SEPARATOR) {
                return Err(FutureIdError::ContainsSeparator(part.to_string()));
            }
        }
        Ok(Self(format!("{module_name}{FUTURE_ID_SEPARATOR}{local_id}")))
    }

    /// Parses a fully-qualified id.
    pub fn parse(raw: &str) -> Result<Self, FutureIdError> {
        let Some((module_name, local_id)) = raw.split_once(FUTURE_ID_SEPARATOR) else {
            return Err(FutureIdError::Malformed(raw.to_string()));
        };
        if module_name.trim() != module_name || local_id.trim() != local_id {
            return Err(FutureIdError::Malformed(raw.to_string()));
        }
        Self::new(module_name, local_id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn module_name(&self) -> &str {
        self.0
            .split_once(FUTURE_ID_SEPARATOR)
            .map(|(module, _)| module)
            .unwrap_or_default()
    }

    pub fn local_id(&self) -> &str {
        self.0
            .split_once(FUTURE_ID_SEPARATOR)
            .map(|(_, local)| local)
            .unwrap_or_default()
    }
}

impl fmt::Display for FutureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for FutureId {
    type Err = FutureIdError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

impl TryFrom<String> for FutureId {
    type Error = FutureIdError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<FutureId> for String {
    fn from(id: FutureId) -> Self {
        id.0
    }
}

/// Which part of a dependency's result a deferred value reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResultField {
    #[default]
    Address,
    Value,
    TransactionHash,
}

impl ResultField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Address => "address",
            Self::Value => "value",
            Self::TransactionHash => "transaction_hash",
        }
    }
}

/// Reference to a field of another future's not-yet-known result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FutureReference {
    pub id: FutureId,
    #[serde(default)]
    pub field: ResultField,
}

/// Action parameter that may embed deferred values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentValue {
    Literal(Value),
    Future(FutureReference),
    Array(Vec<ArgumentValue>),
    Object(BTreeMap<String, ArgumentValue>),
}

impl ArgumentValue {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// Deferred reference to the deployed address of `id`.
    pub fn address_of(id: &FutureId) -> Self {
        Self::reference(id, ResultField::Address)
    }

    /// Deferred reference to the returned value of `id`.
    pub fn value_of(id: &FutureId) -> Self {
        Self::reference(id, ResultField::Value)
    }

    /// Deferred reference to the transaction hash of `id`.
    pub fn transaction_hash_of(id: &FutureId) -> Self {
        Self::reference(id, ResultField::TransactionHash)
    }

    pub fn reference(id: &FutureId, field: ResultField) -> Self {
        Self::Future(FutureReference {
            id: id.clone(),
            field,
        })
    }

    /// Adds every future referenced by this value to `out`.
    pub fn collect_references(&self, out: &mut BTreeSet<FutureId>) {
        match self {
            Self::Literal(_) => {}
            Self::Future(reference) => {
                out.insert(reference.id.clone());
            }
            Self::Array(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            Self::Object(fields) => {
                for item in fields.values() {
                    item.collect_references(out);
                }
            }
        }
    }

    /// Substitutes every deferred reference using `lookup`, producing plain JSON.
    pub fn resolve_with<E, F>(&self, lookup: &mut F) -> Result<Value, E>
    where
        F: FnMut(&FutureReference) -> Result<Value, E>,
    {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Future(reference) => lookup(reference),
            Self::Array(items) => {
                let mut resolved = Vec::with_capacity(items.len());
                for item in items {
                    resolved.push(item.resolve_with(lookup)?);
                }
                Ok(Value::Array(resolved))
            }
            Self::Object(fields) => {
                let mut resolved = serde_json::Map::new();
                for (key, item) in fields {
                    resolved.insert(key.clone(), item.resolve_with(lookup)?);
                }
                Ok(Value::Object(resolved))
            }
        }
    }
}

/// Closed set of action kinds a future can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FutureKind {
    Deploy,
    Call,
    StaticCall,
    SendValue,
    ReadEventArgument,
    ContractAt,
}

impl FutureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deploy => "deploy",
            Self::Call => "call",
            Self::StaticCall => "static_call",
            Self::SendValue => "send_value",
            Self::ReadEventArgument => "read_event_argument",
            Self::ContractAt => "contract_at",
        }
    }

    /// Returns true when executing this kind sends a transaction.
    pub fn submits_transaction(self) -> bool {
        matches!(self, Self::Deploy | Self::Call | Self::SendValue)
    }
}

impl fmt::Display for FutureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action-specific parameter bundle of a future.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FutureAction {
    Deploy {
        contract_name: String,
        #[serde(default)]
        args: Vec<ArgumentValue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<ArgumentValue>,
    },
    Call {
        contract: ArgumentValue,
        function: String,
        #[serde(default)]
        args: Vec<ArgumentValue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<ArgumentValue>,
    },
    StaticCall {
        contract: ArgumentValue,
        function: String,
        #[serde(default)]
        args: Vec<ArgumentValue>,
    },
    SendValue {
        to: ArgumentValue,
        value: ArgumentValue,
    },
    ReadEventArgument {
        emitter: FutureId,
        event: String,
        argument: String,
        #[serde(default)]
        event_index: usize,
    },
    ContractAt {
        contract_name: String,
        address: ArgumentValue,
    },
}

impl FutureAction {
    pub fn kind(&self) -> FutureKind {
        match self {
            Self::Deploy { .. } => FutureKind::Deploy,
            Self::Call { .. } => FutureKind::Call,
            Self::StaticCall { .. } => FutureKind::StaticCall,
            Self::SendValue { .. } => FutureKind::SendValue,
            Self::ReadEventArgument { .. } => FutureKind::ReadEventArgument,
            Self::ContractAt { .. } => FutureKind::ContractAt,
        }
    }

    /// Futures whose results this action reads.
    pub fn references(&self) -> BTreeSet<FutureId> {
        let mut out = BTreeSet::new();
        match self {
            Self::Deploy { args, value, .. } => {
                args.iter().for_each(|arg| arg.collect_references(&mut out));
                if let Some(value) = value {
                    value.collect_references(&mut out);
                }
            }
            Self::Call {
                contract,
                args,
                value,
                ..
            } => {
                contract.collect_references(&mut out);
                args.iter().for_each(|arg| arg.collect_references(&mut out));
                if let Some(value) = value {
                    value.collect_references(&mut out);
                }
            }
            Self::StaticCall { contract, args, .. } => {
                contract.collect_references(&mut out);
                args.iter().for_each(|arg| arg.collect_references(&mut out));
            }
            Self::SendValue { to, value } => {
                to.collect_references(&mut out);
                value.collect_references(&mut out);
            }
            Self::ReadEventArgument { emitter, .. } => {
                out.insert(emitter.clone());
            }
            Self::ContractAt { address, .. } => address.collect_references(&mut out),
        }
        out
    }
}

/// Deferred, dependency-ordered unit of on-chain action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Future {
    pub id: FutureId,
    pub action: FutureAction,
    /// Explicit ordering dependencies in addition to argument references.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub after: BTreeSet<FutureId>,
}

impl Future {
    pub fn new(id: FutureId, action: FutureAction) -> Self {
        Self {
            id,
            action,
            after: BTreeSet::new(),
        }
    }

    pub fn kind(&self) -> FutureKind {
        self.action.kind()
    }

    /// Explicit dependencies plus every future referenced by the action.
    pub fn dependencies(&self) -> BTreeSet<FutureId> {
        let mut dependencies = self.action.references();
        dependencies.extend(self.after.iter().cloned());
        dependencies
    }
}
