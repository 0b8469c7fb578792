//! Idempotent, journal-backed execution of deployment modules.
//!
//! The [`Executor`] walks an [`ignis_graph::ExecutionPlan`] batch by batch,
//! resolves deferred arguments from journaled dependency results, and drives
//! each future through a [`ignis_chain::ChainAdapter`]. Every transition is
//! appended to the [`ignis_journal::JournalStore`] before the next step, so a
//! re-run with the same journal never repeats a successful future.

use ignis_graph::FuturesError;
use ignis_journal::JournalError;
use ignis_types::FutureId;
use thiserror::Error;

mod config;
mod executor;
mod nonce;
mod reconcile;
mod resolve;
mod result;

pub use config::{ExecutorConfig, RetryPolicy};
pub use executor::Executor;
pub use nonce::{NonceGuard, NonceManager};
pub use reconcile::{reconcile, FingerprintMismatch};
pub use result::{DeploymentResult, FailedFuture, FailureReport};

/// Failures that stop a run before or outside of per-future failure handling.
///
/// Chain-level failures of individual futures are recorded in the journal
/// and surface through [`DeploymentResult::Failed`] instead.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("invalid executor config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Plan(#[from] FuturesError),
    #[error("journal {journal} does not belong to module {module}")]
    ModuleMismatch { journal: String, module: String },
    #[error("module no longer matches its journal: {}", join_mismatches(.mismatches))]
    Reconciliation { mismatches: Vec<FingerprintMismatch> },
    #[error(transparent)]
    Journal(#[from] JournalError),
    #[error("future {0} is not part of the module")]
    UnknownFuture(FutureId),
    #[error("executor task failed: {0}")]
    Task(String),
}

fn join_mismatches(mismatches: &[FingerprintMismatch]) -> String {
    mismatches
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
