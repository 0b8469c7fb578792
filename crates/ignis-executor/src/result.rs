//! Caller-facing outcome of a deployment run.

use std::collections::BTreeMap;

use ignis_graph::{ExecutionPlan, FutureGraph};
use ignis_journal::ExecutionState;
use ignis_types::{FailureKind, FutureId, FutureState};
use serde::Serialize;
use serde_json::Value;

/// A future that ended the run in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedFuture {
    pub future_id: FutureId,
    pub kind: FailureKind,
    pub message: String,
}

/// Structured report of a deployment that did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    /// Earliest failed future in plan order.
    pub first_failure: FailedFuture,
    pub failures: Vec<FailedFuture>,
    /// Futures that never started because something they depend on failed.
    pub not_started: Vec<FutureId>,
    pub succeeded: Vec<FutureId>,
}

/// Overall result of [`crate::Executor::run`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeploymentResult {
    /// Every future succeeded; the module outputs resolved to concrete values.
    Completed { outputs: BTreeMap<String, Value> },
    Failed(FailureReport),
    /// Stopped by the caller before every future ran.
    Cancelled {
        succeeded: Vec<FutureId>,
        not_started: Vec<FutureId>,
    },
}

impl DeploymentResult {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn failure_report(&self) -> Option<&FailureReport> {
        match self {
            Self::Failed(report) => Some(report),
            _ => None,
        }
    }

    /// Folds the final journal state into a result; plan order drives every list.
    pub(crate) fn summarize(
        graph: &FutureGraph,
        plan: &ExecutionPlan,
        state: &ExecutionState,
        cancelled: bool,
    ) -> Self {
        let mut succeeded = Vec::new();
        let mut failures = Vec::new();
        let mut not_started = Vec::new();
        for future_id in plan.ordered_ids() {
            let Some(execution) = state.get(future_id) else {
                not_started.push(future_id.clone());
                continue;
            };
            match execution.state {
                FutureState::Success => succeeded.push(future_id.clone()),
                FutureState::Failed => {
                    let (kind, message) = execution
                        .error
                        .as_ref()
                        .map(|error| (error.kind, error.message.clone()))
                        .unwrap_or((FailureKind::ExecutionReverted, String::new()));
                    failures.push(FailedFuture {
                        future_id: future_id.clone(),
                        kind,
                        message,
                    });
                }
                FutureState::NotStarted | FutureState::InProgress => {
                    not_started.push(future_id.clone())
                }
            }
        }

        if let Some(first_failure) = failures.first().cloned() {
            return Self::Failed(FailureReport {
                first_failure,
                failures,
                not_started,
                succeeded,
            });
        }
        if cancelled || !not_started.is_empty() {
            return Self::Cancelled {
                succeeded,
                not_started,
            };
        }

        let outputs = graph
            .outputs()
            .iter()
            .map(|(key, future_id)| {
                let value = match (graph.future(future_id), state.result_of(future_id)) {
                    (Some(future), Some(result)) => result.output_value(future.kind()),
                    _ => Value::Null,
                };
                (key.clone(), value)
            })
            .collect();
        Self::Completed { outputs }
    }
}
