//! Append-only execution journal for ignis deployments.
//!
//! The journal is the source of idempotency: every future transition is
//! durably appended before the executor moves on, and replaying the records
//! on start reconstructs the [`ExecutionState`] of a deployment.

use ignis_types::{FutureId, FutureState, StatusTransitionError};
use std::fmt;
use thiserror::Error;

mod backend;
mod jsonl;
mod layout;
mod locking;
mod sqlite;
mod state;
mod store;

pub use backend::{
    resolve_journal_backend, InMemoryJournalBackend, JournalBackend, JournalBackendKind,
    ResolvedJournalBackend, JOURNAL_BACKEND_ENV,
};
pub use jsonl::JsonlJournalBackend;
pub use layout::{open_journal_store, write_deployed_addresses, DeploymentLayout};
pub use sqlite::SqliteJournalBackend;
pub use state::{ExecutionState, FutureExecution};
pub use store::{JournalStore, Transition};

/// Current on-disk journal schema version.
pub const JOURNAL_SCHEMA_VERSION: u32 = 1;

/// Result type for journal operations.
pub type JournalResult<T> = Result<T, JournalError>;

/// Errors returned by the journal and its backends.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("invalid journal key: {0}")]
    InvalidKey(String),
    #[error("invalid transition for '{future_id}': {source}")]
    InvalidTransition {
        future_id: FutureId,
        #[source]
        source: StatusTransitionError,
    },
    #[error("future '{future_id}' already has attempt {attempt} in flight")]
    AttemptInFlight { future_id: FutureId, attempt: u32 },
    #[error("future '{future_id}' attempt {found} does not follow attempt {current}")]
    AttemptOutOfOrder {
        future_id: FutureId,
        current: u32,
        found: u32,
    },
    #[error("future '{future_id}' is {state} and cannot accept {transition}")]
    UnexpectedState {
        future_id: FutureId,
        state: FutureState,
        transition: &'static str,
    },
    #[error("future '{0}' has no journal entry")]
    UnknownFuture(FutureId),
    #[error("journal record {found} is out of order (expected {expected})")]
    SequenceGap { expected: u64, found: u64 },
    #[error("corrupt journal record at {location}: {message}")]
    CorruptRecord { location: String, message: String },
    #[error("unsupported journal schema version {found} in {path} (supported up to {supported})")]
    UnsupportedSchema {
        path: String,
        found: u32,
        supported: u32,
    },
    #[error("journal at {path} belongs to '{found}', expected '{expected}'")]
    KeyMismatch {
        path: String,
        expected: String,
        found: String,
    },
    #[error("timed out acquiring journal lock {0}")]
    LockTimeout(String),
    #[error("journal lock {0} was reclaimed by another writer")]
    LockLost(String),
    #[error("unsupported journal backend '{0}' (expected auto|jsonl|sqlite)")]
    UnsupportedBackend(String),
    #[error("{0}")]
    File(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl JournalError {
    pub(crate) fn file(error: impl fmt::Display) -> Self {
        Self::File(error.to_string())
    }
}

/// Stable external key of one deployment: `(network, module)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JournalKey {
    network: String,
    module: String,
}

impl JournalKey {
    /// Both halves become path segments, so separators and `..` are rejected.
    pub fn new(network: impl Into<String>, module: impl Into<String>) -> JournalResult<Self> {
        let network = network.into();
        let module = module.into();
        for (label, value) in [("network", &network), ("module", &module)] {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err(JournalError::InvalidKey(format!("{label} cannot be empty")));
            }
            if trimmed != value
                || value.contains(['/', '\\'])
                || value == "."
                || value == ".."
            {
                return Err(JournalError::InvalidKey(format!(
                    "{label} '{value}' is not a valid path segment"
                )));
            }
        }
        Ok(Self { network, module })
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn module(&self) -> &str {
        &self.module
    }
}

impl fmt::Display for JournalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.module)
    }
}
