//! Substitution of deferred values with cached dependency results.

use std::collections::BTreeMap;

use ignis_chain::TransactionKind;
use ignis_types::{
    ArgumentValue, FailureKind, Future, FutureAction, FutureId, FutureReference, FutureResult,
};
use serde_json::Value;

/// An action with every deferred value replaced by a concrete one.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ResolvedAction {
    Transaction {
        kind: TransactionKind,
        value: Option<Value>,
    },
    StaticCall {
        contract: String,
        function: String,
        args: Vec<Value>,
    },
    /// Result known without touching the chain (`contract_at`, event reads).
    Known(FutureResult),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolutionFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ResolutionFailure {
    fn unresolved(message: String) -> Self {
        Self {
            kind: FailureKind::UnresolvedDependency,
            message,
        }
    }
}

/// Resolves `future` against `results`, the cached results of its successful dependencies.
pub(crate) fn resolve_action(
    future: &Future,
    results: &BTreeMap<FutureId, FutureResult>,
) -> Result<ResolvedAction, ResolutionFailure> {
    let mut lookup = |reference: &FutureReference| -> Result<Value, ResolutionFailure> {
        let result = results.get(&reference.id).ok_or_else(|| {
            ResolutionFailure::unresolved(format!(
                "dependency {} has no successful result",
                reference.id
            ))
        })?;
        result.field(reference.field).ok_or_else(|| {
            ResolutionFailure::unresolved(format!(
                "dependency {} has no {} in its result",
                reference.id,
                reference.field.as_str()
            ))
        })
    };

    match &future.action {
        FutureAction::Deploy {
            contract_name,
            args,
            value,
        } => Ok(ResolvedAction::Transaction {
            kind: TransactionKind::Deploy {
                contract_name: contract_name.clone(),
                args: resolve_all(args, &mut lookup)?,
            },
            value: resolve_optional(value.as_ref(), &mut lookup)?,
        }),
        FutureAction::Call {
            contract,
            function,
            args,
            value,
        } => Ok(ResolvedAction::Transaction {
            kind: TransactionKind::Call {
                contract: resolve_address(contract, &mut lookup)?,
                function: function.clone(),
                args: resolve_all(args, &mut lookup)?,
            },
            value: resolve_optional(value.as_ref(), &mut lookup)?,
        }),
        FutureAction::SendValue { to, value } => Ok(ResolvedAction::Transaction {
            kind: TransactionKind::Transfer {
                to: resolve_address(to, &mut lookup)?,
            },
            value: Some(value.resolve_with(&mut lookup)?),
        }),
        FutureAction::StaticCall {
            contract,
            function,
            args,
        } => Ok(ResolvedAction::StaticCall {
            contract: resolve_address(contract, &mut lookup)?,
            function: function.clone(),
            args: resolve_all(args, &mut lookup)?,
        }),
        FutureAction::ContractAt { address, .. } => Ok(ResolvedAction::Known(FutureResult {
            address: Some(resolve_address(address, &mut lookup)?),
            ..FutureResult::default()
        })),
        FutureAction::ReadEventArgument {
            emitter,
            event,
            argument,
            event_index,
        } => {
            let emitted = results.get(emitter).ok_or_else(|| {
                ResolutionFailure::unresolved(format!(
                    "emitter {emitter} has no successful result"
                ))
            })?;
            let value = emitted
                .event_argument(event, argument, *event_index)
                .cloned()
                .ok_or_else(|| ResolutionFailure {
                    kind: FailureKind::EventArgumentNotFound,
                    message: format!(
                        "{emitter} emitted no {event}[{event_index}].{argument}"
                    ),
                })?;
            Ok(ResolvedAction::Known(FutureResult {
                value: Some(value),
                ..FutureResult::default()
            }))
        }
    }
}

fn resolve_all<F>(args: &[ArgumentValue], lookup: &mut F) -> Result<Vec<Value>, ResolutionFailure>
where
    F: FnMut(&FutureReference) -> Result<Value, ResolutionFailure>,
{
    let mut resolved = Vec::with_capacity(args.len());
    for arg in args {
        resolved.push(arg.resolve_with(&mut *lookup)?);
    }
    Ok(resolved)
}

fn resolve_optional<F>(
    value: Option<&ArgumentValue>,
    lookup: &mut F,
) -> Result<Option<Value>, ResolutionFailure>
where
    F: FnMut(&FutureReference) -> Result<Value, ResolutionFailure>,
{
    match value {
        Some(value) => value.resolve_with(lookup).map(Some),
        None => Ok(None),
    }
}

fn resolve_address<F>(value: &ArgumentValue, lookup: &mut F) -> Result<String, ResolutionFailure>
where
    F: FnMut(&FutureReference) -> Result<Value, ResolutionFailure>,
{
    match value.resolve_with(lookup)? {
        Value::String(address) if !address.trim().is_empty() => Ok(address),
        other => Err(ResolutionFailure::unresolved(format!(
            "expected an address, found {other}"
        ))),
    }
}
