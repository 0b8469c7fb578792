//! Future graph construction and execution planning for ignis modules.
//!
//! A [`ModuleDescription`] (usually produced by an external builder) is
//! validated into an immutable [`FutureGraph`], which [`plan`] layers into
//! batches of mutually independent futures.

mod fingerprint;
mod graph;
mod module;
mod planner;

use ignis_types::{FutureId, FutureIdError};
use thiserror::Error;

pub use fingerprint::fingerprint;
pub use graph::FutureGraph;
pub use module::{ModuleBuilder, ModuleDescription};
pub use planner::{plan, ExecutionPlan};

/// Build-time errors; none of them touch the journal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FuturesError {
    #[error("invalid module description: {0}")]
    InvalidDescription(String),
    #[error("failed to read module description {path}: {message}")]
    Read { path: String, message: String },
    #[error(transparent)]
    InvalidFutureId(#[from] FutureIdError),
    #[error("module name cannot be empty")]
    EmptyModuleName,
    #[error("future '{future}' does not belong to module '{module}'")]
    ForeignFuture { future: FutureId, module: String },
    #[error("duplicate future id '{0}'")]
    DuplicateFuture(FutureId),
    #[error("unknown future '{0}'")]
    UnknownFuture(FutureId),
    #[error("future '{future}' depends on unknown future '{dependency}'")]
    DanglingDependency {
        future: FutureId,
        dependency: FutureId,
    },
    #[error("future '{future}' reads events from '{emitter}', which sends no transaction")]
    InvalidEmitter { future: FutureId, emitter: FutureId },
    #[error("output '{key}' refers to unknown future '{future}'")]
    UnknownOutput { key: String, future: FutureId },
    #[error("cyclic dependency detected: {}", render_cycle(.cycle))]
    CyclicDependency { cycle: Vec<FutureId> },
}

fn render_cycle(cycle: &[FutureId]) -> String {
    cycle
        .iter()
        .map(FutureId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Convenience: parse, build, and plan in one step.
pub fn build_and_plan(
    description: ModuleDescription,
) -> Result<(FutureGraph, ExecutionPlan), FuturesError> {
    let graph = FutureGraph::build(description)?;
    let plan = plan(&graph)?;
    Ok((graph, plan))
}
