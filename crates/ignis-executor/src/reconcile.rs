//! Checks a module description against the journal of an existing deployment.

use std::fmt;

use ignis_graph::{fingerprint, FutureGraph};
use ignis_journal::ExecutionState;
use ignis_types::{FutureId, FutureState};

/// A journaled future whose definition no longer matches the module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintMismatch {
    pub future_id: FutureId,
    pub journaled: String,
    pub current: String,
}

impl fmt::Display for FingerprintMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} changed since it was first executed (journal {}, module {})",
            self.future_id,
            short(&self.journaled),
            short(&self.current)
        )
    }
}

fn short(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}

/// Compares stored fingerprints with the current graph.
///
/// Wiped or never-started futures are free to change. Journaled futures that
/// left the module are only logged.
pub fn reconcile(graph: &FutureGraph, state: &ExecutionState) -> Vec<FingerprintMismatch> {
    let mut mismatches = Vec::new();
    for (future_id, execution) in state.iter() {
        if execution.state == FutureState::NotStarted {
            continue;
        }
        let Some(journaled) = execution.fingerprint.as_deref() else {
            continue;
        };
        let Some(future) = graph.future(future_id) else {
            tracing::warn!(future = %future_id, "journaled future is no longer part of the module");
            continue;
        };
        let current = fingerprint(future);
        if current != journaled {
            mismatches.push(FingerprintMismatch {
                future_id: future_id.clone(),
                journaled: journaled.to_string(),
                current,
            });
        }
    }
    mismatches
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ignis_graph::ModuleBuilder;
    use ignis_types::{ArgumentValue, JournalRecord};

    fn graph(token_arg: &str) -> FutureGraph {
        let mut m = ModuleBuilder::new("M").expect("builder");
        m.contract("Token", vec![ArgumentValue::literal(token_arg)])
            .expect("token");
        m.contract("Vault", Vec::new()).expect("vault");
        FutureGraph::build(m.build()).expect("graph")
    }

    fn started(sequence: u64, future: &FutureId, fingerprint: String) -> JournalRecord {
        JournalRecord {
            sequence,
            future_id: future.clone(),
            attempt: 1,
            state: FutureState::InProgress,
            nonce: None,
            pending: None,
            result: None,
            error: None,
            fingerprint: Some(fingerprint),
            wiped: false,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn functional_reconcile_accepts_unchanged_module() {
        let original = graph("TKN");
        let token = FutureId::parse("M#Token").expect("id");
        let record = started(1, &token, fingerprint(original.future(&token).expect("token")));
        let state = ExecutionState::fold([&record]).expect("fold");
        assert!(reconcile(&graph("TKN"), &state).is_empty());
    }

    #[test]
    fn regression_reconcile_flags_changed_constructor_arguments() {
        let original = graph("TKN");
        let token = FutureId::parse("M#Token").expect("id");
        let record = started(1, &token, fingerprint(original.future(&token).expect("token")));
        let state = ExecutionState::fold([&record]).expect("fold");

        let mismatches = reconcile(&graph("OTHER"), &state);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].future_id, token);
        assert!(mismatches[0].to_string().contains("M#Token changed"));
    }

    #[test]
    fn unit_reconcile_ignores_wiped_and_removed_futures() {
        let token = FutureId::parse("M#Token").expect("id");
        let ghost = FutureId::parse("M#Ghost").expect("id");
        let mut wipe = started(3, &token, String::new());
        wipe.state = FutureState::NotStarted;
        wipe.fingerprint = None;
        wipe.wiped = true;
        let records = vec![
            started(1, &token, "stale".to_string()),
            started(2, &ghost, "ghost".to_string()),
            wipe,
        ];
        let state = ExecutionState::fold(&records).expect("fold");
        assert!(reconcile(&graph("TKN"), &state).is_empty());
    }
}
