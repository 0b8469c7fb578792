//! Replay of journal records into per-future execution state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ignis_types::{
    FailureRecord, FutureId, FutureResult, FutureState, JournalRecord, PendingHandle,
};

use crate::{JournalError, JournalResult};

/// Latest known execution details for one future.
#[derive(Debug, Clone, PartialEq)]
pub struct FutureExecution {
    pub state: FutureState,
    /// Number of attempts started so far; survives wipes.
    pub attempt: u32,
    pub nonce: Option<u64>,
    pub pending: Option<PendingHandle>,
    pub result: Option<FutureResult>,
    pub error: Option<FailureRecord>,
    pub fingerprint: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl FutureExecution {
    fn from_record(record: &JournalRecord) -> Self {
        Self {
            state: record.state,
            attempt: record.attempt,
            nonce: record.nonce,
            pending: record.pending.clone(),
            result: record.result.clone(),
            error: record.error.clone(),
            fingerprint: record.fingerprint.clone(),
            updated_at: record.recorded_at,
        }
    }
}

/// Folded view of a journal: the last record per future wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionState {
    futures: BTreeMap<FutureId, FutureExecution>,
    last_sequence: u64,
}

impl ExecutionState {
    /// Replays `records` in order, rejecting gaps and illegal transitions.
    pub fn fold<'a>(records: impl IntoIterator<Item = &'a JournalRecord>) -> JournalResult<Self> {
        let mut state = Self::default();
        for record in records {
            state.apply(record)?;
        }
        Ok(state)
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn next_sequence(&self) -> u64 {
        self.last_sequence + 1
    }

    pub fn get(&self, id: &FutureId) -> Option<&FutureExecution> {
        self.futures.get(id)
    }

    /// `NotStarted` for futures the journal has never seen.
    pub fn status(&self, id: &FutureId) -> FutureState {
        self.futures
            .get(id)
            .map(|execution| execution.state)
            .unwrap_or_default()
    }

    pub fn result_of(&self, id: &FutureId) -> Option<&FutureResult> {
        self.futures
            .get(id)
            .filter(|execution| execution.state == FutureState::Success)
            .and_then(|execution| execution.result.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FutureId, &FutureExecution)> {
        self.futures.iter()
    }

    pub fn len(&self) -> usize {
        self.futures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.futures.is_empty()
    }

    /// Ids currently `InProgress`; non-empty only after an interrupted run.
    pub fn in_flight(&self) -> Vec<FutureId> {
        self.futures
            .iter()
            .filter(|(_, execution)| execution.state == FutureState::InProgress)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Validates `record` against the current state and folds it in.
    pub fn apply(&mut self, record: &JournalRecord) -> JournalResult<()> {
        self.validate(record)?;
        self.futures
            .insert(record.future_id.clone(), FutureExecution::from_record(record));
        self.last_sequence = record.sequence;
        Ok(())
    }

    pub(crate) fn validate(&self, record: &JournalRecord) -> JournalResult<()> {
        let expected = self.next_sequence();
        if record.sequence != expected {
            return Err(JournalError::SequenceGap {
                expected,
                found: record.sequence,
            });
        }

        let current = self.futures.get(&record.future_id);
        let current_state = current.map(|execution| execution.state).unwrap_or_default();
        let current_attempt = current.map(|execution| execution.attempt).unwrap_or(0);

        if record.wiped {
            if current.is_none() {
                return Err(JournalError::UnknownFuture(record.future_id.clone()));
            }
            if record.state != FutureState::NotStarted || record.attempt != current_attempt {
                return Err(JournalError::CorruptRecord {
                    location: format!("sequence {}", record.sequence),
                    message: "wipe must reset to not_started and keep the attempt counter"
                        .to_string(),
                });
            }
            return Ok(());
        }

        current_state
            .ensure_transition(record.state)
            .map_err(|source| JournalError::InvalidTransition {
                future_id: record.future_id.clone(),
                source,
            })?;

        // Submission handles annotate the attempt already in flight.
        let annotation = current_state == FutureState::InProgress
            && record.state == FutureState::InProgress
            && record.pending.is_some()
            && record.attempt == current_attempt;
        if annotation {
            return Ok(());
        }
        if record.state.is_terminal() {
            if record.attempt != current_attempt {
                return Err(JournalError::AttemptOutOfOrder {
                    future_id: record.future_id.clone(),
                    current: current_attempt,
                    found: record.attempt,
                });
            }
            return Ok(());
        }

        if current_state == FutureState::InProgress && record.attempt <= current_attempt {
            return Err(JournalError::AttemptInFlight {
                future_id: record.future_id.clone(),
                attempt: current_attempt,
            });
        }
        if record.attempt != current_attempt + 1 {
            return Err(JournalError::AttemptOutOfOrder {
                future_id: record.future_id.clone(),
                current: current_attempt,
                found: record.attempt,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ignis_types::FailureKind;

    fn id(raw: &str) -> FutureId {
        FutureId::parse(raw).expect("id")
    }

    fn record(sequence: u64, future: &str, attempt: u32, state: FutureState) -> JournalRecord {
        JournalRecord {
            sequence,
            future_id: id(future),
            attempt,
            state,
            nonce: None,
            pending: None,
            result: None,
            error: None,
            fingerprint: None,
            wiped: false,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn unit_fold_keeps_last_record_per_future() {
        let mut success = record(3, "M#Token", 1, FutureState::Success);
        success.result = Some(FutureResult {
            address: Some("0xabc".to_string()),
            ..FutureResult::default()
        });
        let records = vec![
            record(1, "M#Token", 1, FutureState::InProgress),
            record(2, "M#Vault", 1, FutureState::InProgress),
            success,
        ];
        let state = ExecutionState::fold(&records).expect("fold");
        assert_eq!(state.last_sequence(), 3);
        assert_eq!(state.status(&id("M#Token")), FutureState::Success);
        assert_eq!(state.status(&id("M#Vault")), FutureState::InProgress);
        assert_eq!(state.status(&id("M#Other")), FutureState::NotStarted);
        assert_eq!(
            state.result_of(&id("M#Token")).and_then(|r| r.address.as_deref()),
            Some("0xabc")
        );
        assert_eq!(state.in_flight(), vec![id("M#Vault")]);
    }

    #[test]
    fn regression_fold_rejects_sequence_gap() {
        let records = vec![
            record(1, "M#Token", 1, FutureState::InProgress),
            record(3, "M#Token", 1, FutureState::Success),
        ];
        assert!(matches!(
            ExecutionState::fold(&records),
            Err(JournalError::SequenceGap {
                expected: 2,
                found: 3
            })
        ));
    }

    #[test]
    fn regression_fold_rejects_success_without_attempt() {
        let records = vec![record(1, "M#Token", 1, FutureState::Success)];
        assert!(matches!(
            ExecutionState::fold(&records),
            Err(JournalError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn unit_retry_after_failure_requires_next_attempt() {
        let mut failed = record(2, "M#Token", 1, FutureState::Failed);
        failed.error = Some(FailureRecord {
            kind: FailureKind::ExecutionReverted,
            message: "boom".to_string(),
        });
        let mut state =
            ExecutionState::fold(&[record(1, "M#Token", 1, FutureState::InProgress), failed])
                .expect("fold");

        let skipped = record(3, "M#Token", 3, FutureState::InProgress);
        assert!(matches!(
            state.apply(&skipped),
            Err(JournalError::AttemptOutOfOrder {
                current: 1,
                found: 3,
                ..
            })
        ));
        state
            .apply(&record(3, "M#Token", 2, FutureState::InProgress))
            .expect("retry");
        assert_eq!(state.get(&id("M#Token")).map(|e| e.attempt), Some(2));
    }

    #[test]
    fn regression_stale_attempt_cannot_restart_while_in_flight() {
        let mut state = ExecutionState::fold(&[
            record(1, "M#Token", 1, FutureState::InProgress),
            record(2, "M#Token", 2, FutureState::InProgress),
        ])
        .expect("fold");
        assert!(matches!(
            state.apply(&record(3, "M#Token", 1, FutureState::InProgress)),
            Err(JournalError::AttemptInFlight { attempt: 2, .. })
        ));
    }

    #[test]
    fn functional_wipe_resets_state_but_keeps_attempt_counter() {
        let mut wipe = record(3, "M#Token", 1, FutureState::NotStarted);
        wipe.wiped = true;
        let state = ExecutionState::fold(&[
            record(1, "M#Token", 1, FutureState::InProgress),
            record(2, "M#Token", 1, FutureState::Failed),
            wipe,
            record(4, "M#Token", 2, FutureState::InProgress),
        ])
        .expect("fold");
        let execution = state.get(&id("M#Token")).expect("entry");
        assert_eq!(execution.state, FutureState::InProgress);
        assert_eq!(execution.attempt, 2);
    }

    #[test]
    fn regression_wipe_of_unknown_future_is_rejected() {
        let mut wipe = record(1, "M#Token", 0, FutureState::NotStarted);
        wipe.wiped = true;
        assert!(matches!(
            ExecutionState::fold(&[wipe]),
            Err(JournalError::UnknownFuture(_))
        ));
    }
}
