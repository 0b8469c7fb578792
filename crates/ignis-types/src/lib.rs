//! Shared data types for ignis deployments.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

mod future;
mod record;

pub use future::{
    ArgumentValue, Future, FutureAction, FutureId, FutureIdError, FutureKind, FutureReference,
    ResultField, FUTURE_ID_SEPARATOR,
};
pub use record::{EmittedEvent, FailureRecord, FutureResult, JournalRecord, PendingHandle};

/// Error returned when a status transition is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusTransitionError {
    #[error("invalid {kind} transition: {from:?} -> {to:?}")]
    Invalid {
        kind: &'static str,
        from: String,
        to: String,
    },
}

/// Lifecycle state of a future as folded from the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FutureState {
    #[default]
    NotStarted,
    InProgress,
    Success,
    Failed,
}

impl FutureState {
    /// Returns true when this state can transition to `next`.
    ///
    /// `InProgress -> InProgress` covers both annotating an attempt with its
    /// submission handle and moving on to the next attempt.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::InProgress)
                | (Self::InProgress, Self::InProgress)
                | (Self::InProgress, Self::Success)
                | (Self::InProgress, Self::Failed)
                | (Self::Failed, Self::InProgress)
        )
    }

    /// Returns an error if transitioning to `next` is not allowed.
    pub fn ensure_transition(self, next: Self) -> Result<(), StatusTransitionError> {
        if self.can_transition_to(next) {
            return Ok(());
        }

        Err(StatusTransitionError::Invalid {
            kind: "future_state",
            from: format!("{self:?}"),
            to: format!("{next:?}"),
        })
    }

    /// Returns true when no further execution is expected within a run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for FutureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a failed future.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The action itself failed on-chain.
    ExecutionReverted,
    /// Transient adapter errors outlasted the retry policy.
    TransientFailureExhausted,
    /// Funds or pricing problem; never retried automatically.
    UnrecoverableSubmission,
    /// A deferred value had no successful dependency result to read.
    UnresolvedDependency,
    /// The emitter's receipt did not carry the requested event argument.
    EventArgumentNotFound,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExecutionReverted => "execution_reverted",
            Self::TransientFailureExhausted => "transient_failure_exhausted",
            Self::UnrecoverableSubmission => "unrecoverable_submission",
            Self::UnresolvedDependency => "unresolved_dependency",
            Self::EventArgumentNotFound => "event_argument_not_found",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
