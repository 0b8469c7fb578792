//! The explicitly passed journal handle used by the executor.

use chrono::Utc;
use ignis_types::{
    FailureKind, FailureRecord, FutureId, FutureResult, FutureState, JournalRecord, PendingHandle,
};
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

use crate::backend::{InMemoryJournalBackend, JournalBackend, JournalBackendKind};
use crate::state::{ExecutionState, FutureExecution};
use crate::{JournalError, JournalKey, JournalResult};

/// One requested state change for a future.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Opens attempt `attempt`; written before anything reaches the chain.
    Started {
        attempt: u32,
        nonce: Option<u64>,
        fingerprint: String,
    },
    /// Annotates the in-flight attempt with the adapter's handle.
    Submitted { handle: PendingHandle },
    Succeeded { result: FutureResult },
    Failed { kind: FailureKind, message: String },
    /// Operator reset back to `NotStarted`.
    Wiped,
}

impl Transition {
    fn label(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Submitted { .. } => "submitted",
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
            Self::Wiped => "wiped",
        }
    }
}

/// Journal of one deployment: replayed on open, appended durably on every transition.
pub struct JournalStore {
    key: JournalKey,
    backend: Box<dyn JournalBackend>,
    state: RwLock<ExecutionState>,
    append_lock: Mutex<()>,
}

impl std::fmt::Debug for JournalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalStore")
            .field("key", &self.key)
            .field("backend", &self.backend.describe())
            .finish_non_exhaustive()
    }
}

impl JournalStore {
    /// Replays every record of `backend` into a fresh [`ExecutionState`].
    pub async fn open(
        key: JournalKey,
        backend: impl JournalBackend + 'static,
    ) -> JournalResult<Self> {
        let records = backend.load().await?;
        let state = ExecutionState::fold(&records)?;
        tracing::info!(
            journal = %key,
            backend = %backend.kind(),
            location = %backend.describe(),
            records = records.len(),
            futures = state.len(),
            "journal replayed"
        );
        Ok(Self {
            key,
            backend: Box::new(backend),
            state: RwLock::new(state),
            append_lock: Mutex::new(()),
        })
    }

    /// Volatile journal; nothing survives the process.
    pub async fn in_memory(key: JournalKey) -> JournalResult<Self> {
        Self::open(key, InMemoryJournalBackend::new()).await
    }

    pub fn key(&self) -> &JournalKey {
        &self.key
    }

    pub fn backend_kind(&self) -> JournalBackendKind {
        self.backend.kind()
    }

    pub fn location(&self) -> String {
        self.backend.describe()
    }

    /// Validates `transition`, appends it durably, then folds it into memory.
    ///
    /// Appends are serialized; readers never observe a record before it is
    /// persisted.
    #[instrument(skip(self, transition), fields(journal = %self.key, future = %future_id, transition = transition.label()))]
    pub async fn record(
        &self,
        future_id: &FutureId,
        transition: Transition,
    ) -> JournalResult<JournalRecord> {
        let _append = self.append_lock.lock().await;
        let record = {
            let state = self.state.read().await;
            let record = build_record(&state, future_id, transition)?;
            state.validate(&record)?;
            record
        };
        self.backend.append(&record).await?;
        self.state.write().await.apply(&record)?;
        tracing::debug!(
            sequence = record.sequence,
            attempt = record.attempt,
            state = %record.state,
            "journal record appended"
        );
        Ok(record)
    }

    pub async fn status(&self, future_id: &FutureId) -> FutureState {
        self.state.read().await.status(future_id)
    }

    pub async fn entry(&self, future_id: &FutureId) -> Option<FutureExecution> {
        self.state.read().await.get(future_id).cloned()
    }

    /// Cached result of a `Success` future.
    pub async fn result_of(&self, future_id: &FutureId) -> Option<FutureResult> {
        self.state.read().await.result_of(future_id).cloned()
    }

    pub async fn snapshot(&self) -> ExecutionState {
        self.state.read().await.clone()
    }

    /// Resets `future_id` to `NotStarted` so the next run executes it again.
    pub async fn wipe_future(&self, future_id: &FutureId) -> JournalResult<JournalRecord> {
        self.record(future_id, Transition::Wiped).await
    }

    /// Deletes every record of this deployment.
    pub async fn erase(&self) -> JournalResult<()> {
        let _append = self.append_lock.lock().await;
        self.backend.erase().await?;
        *self.state.write().await = ExecutionState::default();
        tracing::warn!(journal = %self.key, "journal erased");
        Ok(())
    }

    /// Releases the backend (and any lock file it holds).
    pub async fn close(self) {
        let _append = self.append_lock.lock().await;
        tracing::debug!(journal = %self.key, "journal closed");
    }
}

fn build_record(
    state: &ExecutionState,
    future_id: &FutureId,
    transition: Transition,
) -> JournalResult<JournalRecord> {
    let current = state.get(future_id);
    let mut record = JournalRecord {
        sequence: state.next_sequence(),
        future_id: future_id.clone(),
        attempt: current.map(|execution| execution.attempt).unwrap_or(0),
        state: FutureState::InProgress,
        nonce: None,
        pending: None,
        result: None,
        error: None,
        fingerprint: current.and_then(|execution| execution.fingerprint.clone()),
        wiped: false,
        recorded_at: Utc::now(),
    };

    let label = transition.label();
    match transition {
        Transition::Started {
            attempt,
            nonce,
            fingerprint,
        } => {
            record.attempt = attempt;
            record.nonce = nonce;
            record.fingerprint = Some(fingerprint);
        }
        Transition::Submitted { handle } => {
            require_in_flight(current, future_id, label)?;
            record.nonce = Some(handle.nonce);
            record.pending = Some(handle);
        }
        Transition::Succeeded { result } => {
            let current = require_in_flight(current, future_id, label)?;
            record.state = FutureState::Success;
            record.nonce = current.nonce;
            record.pending = current.pending.clone();
            record.result = Some(result);
        }
        Transition::Failed { kind, message } => {
            let current = require_in_flight(current, future_id, label)?;
            record.state = FutureState::Failed;
            // The handle survives only when the transaction may still land.
            if kind == FailureKind::TransientFailureExhausted {
                record.nonce = current.nonce;
                record.pending = current.pending.clone();
            }
            record.error = Some(FailureRecord { kind, message });
        }
        Transition::Wiped => {
            if current.is_none() {
                return Err(JournalError::UnknownFuture(future_id.clone()));
            }
            record.state = FutureState::NotStarted;
            record.fingerprint = None;
            record.wiped = true;
        }
    }
    Ok(record)
}

fn require_in_flight<'a>(
    current: Option<&'a FutureExecution>,
    future_id: &FutureId,
    transition: &'static str,
) -> JournalResult<&'a FutureExecution> {
    match current {
        Some(execution) if execution.state == FutureState::InProgress => Ok(execution),
        other => Err(JournalError::UnexpectedState {
            future_id: future_id.clone(),
            state: other.map(|execution| execution.state).unwrap_or_default(),
            transition,
        }),
    }
}
