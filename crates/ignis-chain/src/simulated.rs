//! Deterministic in-process chain with scriptable faults.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use ignis_core::write_text_atomic;
use ignis_types::{EmittedEvent, FutureId, PendingHandle};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::{
    AdapterError, AdapterErrorKind, AdapterResult, CallOutcome, ChainAdapter, PollStatus, Receipt,
    StaticCallRequest, SubmittedTransaction, TransactionKind, TransactionRequest,
};

/// Persisted ledger: everything that survives a process restart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Ledger {
    next_nonce: u64,
    transactions: BTreeMap<u64, LedgerTransaction>,
    contracts: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerTransaction {
    hash: String,
    future_id: FutureId,
    kind: TransactionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    contract_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    revert_reason: Option<String>,
    #[serde(default)]
    events: Vec<EmittedEvent>,
    #[serde(default)]
    pending_polls: u32,
}

#[derive(Debug, Default)]
struct FaultScript {
    reverts: HashMap<FutureId, String>,
    submit_errors: HashMap<FutureId, VecDeque<AdapterErrorKind>>,
    lost_submit_responses: HashMap<FutureId, u32>,
    poll_errors: HashMap<FutureId, VecDeque<AdapterErrorKind>>,
    confirmation_polls: HashMap<FutureId, u32>,
    dropped: HashSet<FutureId>,
    static_results: HashMap<String, CallOutcome>,
    events: HashMap<FutureId, Vec<EmittedEvent>>,
}

/// Call counters for assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatedChainStats {
    /// Every `submit` invocation, failed ones included.
    pub submit_calls: usize,
    /// Transactions that reached the ledger.
    pub landed: usize,
    pub polls: usize,
    pub static_calls: usize,
    /// Most transactions ever landed but not yet confirmed or reverted at once.
    pub peak_unconfirmed: usize,
}

#[derive(Debug, Default)]
struct Inner {
    ledger: Ledger,
    faults: FaultScript,
    stats: SimulatedChainStats,
    landed_by_future: HashMap<FutureId, usize>,
    unconfirmed: HashSet<u64>,
}

/// In-process [`ChainAdapter`] with deterministic SHA-256 derived hashes and addresses.
#[derive(Debug)]
pub struct SimulatedChain {
    network: String,
    persist_path: Option<PathBuf>,
    inner: Mutex<Inner>,
}

impl SimulatedChain {
    /// Volatile chain; state is lost with the value.
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            persist_path: None,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Chain whose ledger is loaded from and saved to `path` as JSON.
    pub fn open(network: impl Into<String>, path: impl AsRef<Path>) -> AdapterResult<Self> {
        let path = path.as_ref().to_path_buf();
        let ledger = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|error| {
                AdapterError::new(
                    AdapterErrorKind::Other,
                    format!("failed to read chain state {}: {error}", path.display()),
                )
            })?;
            serde_json::from_str(&raw).map_err(|error| {
                AdapterError::new(
                    AdapterErrorKind::Other,
                    format!("invalid chain state {}: {error}", path.display()),
                )
            })?
        } else {
            Ledger::default()
        };
        Ok(Self {
            network: network.into(),
            persist_path: Some(path),
            inner: Mutex::new(Inner {
                ledger,
                ..Inner::default()
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, ledger: &Ledger) -> AdapterResult<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        let rendered = serde_json::to_string_pretty(ledger)
            .map_err(|error| AdapterError::new(AdapterErrorKind::Other, error.to_string()))?;
        write_text_atomic(path, &rendered)
            .map_err(|error| AdapterError::new(AdapterErrorKind::Other, format!("{error:#}")))
    }

    /// Every transaction sent for `future` reverts until [`Self::clear_revert`].
    pub fn revert_on(&self, future: &FutureId, reason: impl Into<String>) {
        self.lock().faults.reverts.insert(future.clone(), reason.into());
    }

    pub fn clear_revert(&self, future: &FutureId) {
        self.lock().faults.reverts.remove(future);
    }

    /// The next `times` submissions for `future` fail with `kind` before landing.
    pub fn fail_submit(&self, future: &FutureId, kind: AdapterErrorKind, times: usize) {
        self.lock()
            .faults
            .submit_errors
            .entry(future.clone())
            .or_default()
            .extend(std::iter::repeat(kind).take(times));
    }

    /// The next `times` submissions for `future` land but report a timeout.
    pub fn lose_submit_response(&self, future: &FutureId, times: u32) {
        *self
            .lock()
            .faults
            .lost_submit_responses
            .entry(future.clone())
            .or_default() += times;
    }

    /// The next `times` polls of `future`'s transaction fail with `kind`.
    pub fn fail_poll(&self, future: &FutureId, kind: AdapterErrorKind, times: usize) {
        self.lock()
            .faults
            .poll_errors
            .entry(future.clone())
            .or_default()
            .extend(std::iter::repeat(kind).take(times));
    }

    /// Transactions for `future` report `Pending` for `polls` polls first.
    pub fn confirm_after_polls(&self, future: &FutureId, polls: u32) {
        self.lock()
            .faults
            .confirmation_polls
            .insert(future.clone(), polls);
    }

    /// The next submission for `future` is accepted but never mined.
    pub fn drop_next_submission(&self, future: &FutureId) {
        self.lock().faults.dropped.insert(future.clone());
    }

    pub fn set_static_result(&self, function: impl Into<String>, value: Value) {
        self.lock()
            .faults
            .static_results
            .insert(function.into(), CallOutcome::Returned(value));
    }

    pub fn revert_static(&self, function: impl Into<String>, reason: impl Into<String>) {
        self.lock().faults.static_results.insert(
            function.into(),
            CallOutcome::Reverted {
                reason: reason.into(),
            },
        );
    }

    /// Receipts of `future`'s transactions carry `event`.
    pub fn emit_on(&self, future: &FutureId, event: EmittedEvent) {
        self.lock()
            .faults
            .events
            .entry(future.clone())
            .or_default()
            .push(event);
    }

    /// Makes `address` callable, as if deployed outside this deployment.
    pub fn register_contract(&self, address: impl Into<String>, contract_name: impl Into<String>) {
        self.lock()
            .ledger
            .contracts
            .insert(address.into(), contract_name.into());
    }

    pub fn contract_name_at(&self, address: &str) -> Option<String> {
        self.lock().ledger.contracts.get(address).cloned()
    }

    pub fn stats(&self) -> SimulatedChainStats {
        self.lock().stats
    }

    /// Transactions for `future` that reached the ledger in this process.
    pub fn submissions_for(&self, future: &FutureId) -> usize {
        self.lock()
            .landed_by_future
            .get(future)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ChainAdapter for SimulatedChain {
    fn network(&self) -> &str {
        &self.network
    }

    async fn pending_nonce(&self) -> AdapterResult<u64> {
        Ok(self.lock().ledger.next_nonce)
    }

    async fn submit(&self, request: TransactionRequest) -> AdapterResult<PendingHandle> {
        let mut inner = self.lock();
        inner.stats.submit_calls += 1;

        if let Some(kind) = inner
            .faults
            .submit_errors
            .get_mut(&request.future_id)
            .and_then(VecDeque::pop_front)
        {
            return Err(AdapterError::new(
                kind,
                format!("scripted submit failure for {}", request.future_id),
            ));
        }

        let expected = inner.ledger.next_nonce;
        if request.nonce != expected {
            let message = if request.nonce < expected {
                format!("nonce {} already used", request.nonce)
            } else {
                format!("nonce {} leaves a gap (expected {expected})", request.nonce)
            };
            return Err(AdapterError::new(AdapterErrorKind::NonceContention, message));
        }

        let handle = PendingHandle {
            transaction_hash: transaction_hash(&self.network, request.nonce, &request.future_id),
            nonce: request.nonce,
        };
        if inner.faults.dropped.remove(&request.future_id) {
            tracing::debug!(future = %request.future_id, nonce = request.nonce, "simulated chain dropped transaction");
            return Ok(handle);
        }

        let revert_reason = match &request.kind {
            TransactionKind::Call { contract, .. }
                if !inner.ledger.contracts.contains_key(contract) =>
            {
                Some(format!("no contract at {contract}"))
            }
            _ => inner.faults.reverts.get(&request.future_id).cloned(),
        };
        let contract_address = match (&request.kind, &revert_reason) {
            (TransactionKind::Deploy { contract_name, .. }, None) => {
                let address = contract_address(&self.network, request.nonce);
                inner
                    .ledger
                    .contracts
                    .insert(address.clone(), contract_name.clone());
                Some(address)
            }
            _ => None,
        };
        let transaction = LedgerTransaction {
            hash: handle.transaction_hash.clone(),
            future_id: request.future_id.clone(),
            kind: request.kind,
            contract_address,
            revert_reason,
            events: inner
                .faults
                .events
                .get(&request.future_id)
                .cloned()
                .unwrap_or_default(),
            pending_polls: inner
                .faults
                .confirmation_polls
                .get(&request.future_id)
                .copied()
                .unwrap_or(0),
        };
        inner.ledger.transactions.insert(request.nonce, transaction);
        inner.ledger.next_nonce += 1;
        inner.stats.landed += 1;
        inner.unconfirmed.insert(request.nonce);
        inner.stats.peak_unconfirmed = inner.stats.peak_unconfirmed.max(inner.unconfirmed.len());
        *inner
            .landed_by_future
            .entry(request.future_id.clone())
            .or_default() += 1;
        self.persist(&inner.ledger)?;

        if let Some(remaining) = inner
            .faults
            .lost_submit_responses
            .get_mut(&request.future_id)
            .filter(|remaining| **remaining > 0)
        {
            *remaining -= 1;
            return Err(AdapterError::new(
                AdapterErrorKind::Timeout,
                format!("response for {} lost after broadcast", request.future_id),
            ));
        }
        Ok(handle)
    }

    async fn poll(&self, handle: &PendingHandle) -> AdapterResult<PollStatus> {
        let mut inner = self.lock();
        inner.stats.polls += 1;

        let Some(transaction) = inner
            .ledger
            .transactions
            .get(&handle.nonce)
            .filter(|transaction| transaction.hash == handle.transaction_hash)
            .cloned()
        else {
            return Err(AdapterError::new(
                AdapterErrorKind::UnknownTransaction,
                format!("transaction {} not found", handle.transaction_hash),
            ));
        };

        if let Some(kind) = inner
            .faults
            .poll_errors
            .get_mut(&transaction.future_id)
            .and_then(VecDeque::pop_front)
        {
            return Err(AdapterError::new(
                kind,
                format!("scripted poll failure for {}", transaction.future_id),
            ));
        }

        if transaction.pending_polls > 0 {
            if let Some(stored) = inner.ledger.transactions.get_mut(&handle.nonce) {
                stored.pending_polls -= 1;
            }
            self.persist(&inner.ledger)?;
            return Ok(PollStatus::Pending);
        }

        inner.unconfirmed.remove(&handle.nonce);
        Ok(match transaction.revert_reason {
            Some(reason) => PollStatus::Reverted { reason },
            None => PollStatus::Confirmed(Receipt {
                transaction_hash: transaction.hash,
                contract_address: transaction.contract_address,
                events: transaction.events,
            }),
        })
    }

    async fn find_submission(&self, nonce: u64) -> AdapterResult<Option<SubmittedTransaction>> {
        Ok(self
            .lock()
            .ledger
            .transactions
            .get(&nonce)
            .map(|transaction| SubmittedTransaction {
                future_id: transaction.future_id.clone(),
                handle: PendingHandle {
                    transaction_hash: transaction.hash.clone(),
                    nonce,
                },
            }))
    }

    async fn call(&self, request: StaticCallRequest) -> AdapterResult<CallOutcome> {
        let mut inner = self.lock();
        inner.stats.static_calls += 1;
        if !inner.ledger.contracts.contains_key(&request.contract) {
            return Ok(CallOutcome::Reverted {
                reason: format!("no contract at {}", request.contract),
            });
        }
        Ok(inner
            .faults
            .static_results
            .get(&request.function)
            .cloned()
            .unwrap_or(CallOutcome::Returned(Value::Null)))
    }
}

fn digest_hex(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

fn transaction_hash(network: &str, nonce: u64, future_id: &FutureId) -> String {
    format!("0x{}", digest_hex(&format!("tx:{network}:{nonce}:{future_id}")))
}

fn contract_address(network: &str, nonce: u64) -> String {
    let digest = digest_hex(&format!("create:{network}:{nonce}"));
    format!("0x{}", &digest[..40])
}
