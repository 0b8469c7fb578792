//! Batch-by-batch execution of a future graph against a chain adapter.

use std::collections::BTreeMap;
use std::sync::Arc;

use ignis_chain::{
    AdapterError, AdapterErrorKind, CallOutcome, ChainAdapter, PollStatus, Receipt,
    StaticCallRequest, SubmittedTransaction, TransactionKind, TransactionRequest,
};
use ignis_graph::{fingerprint, plan, ExecutionPlan, FutureGraph};
use ignis_journal::{ExecutionState, JournalStore, Transition};
use ignis_types::{
    FailureKind, Future, FutureId, FutureKind, FutureResult, FutureState, PendingHandle,
};
use serde_json::Value;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::nonce::NonceManager;
use crate::reconcile::reconcile;
use crate::resolve::{resolve_action, ResolvedAction};
use crate::{DeploymentResult, ExecutorConfig, ExecutorError};

/// Terminal disposition of one future within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FutureOutcome {
    Skipped,
    Succeeded,
    Failed(FailureKind),
}

/// What became of a submitted transaction.
#[derive(Debug)]
enum Outcome {
    Confirmed(Receipt),
    Reverted(String),
    /// The adapter no longer knows the transaction; its nonce is free again.
    Dropped(String),
    Exhausted(String),
}

/// Result of one submission attempt.
#[derive(Debug)]
enum Submission {
    Landed(PendingHandle),
    Transient(AdapterError),
    Rejected(AdapterError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Readiness {
    Done,
    Blocked(FutureId),
    Ready,
}

/// Drives every future of a module to a terminal journal state.
pub struct Executor {
    context: Arc<ExecutionContext>,
    plan: ExecutionPlan,
}

struct ExecutionContext {
    graph: Arc<FutureGraph>,
    journal: Arc<JournalStore>,
    chain: Arc<dyn ChainAdapter>,
    config: ExecutorConfig,
    nonces: NonceManager,
}

impl Executor {
    /// Validates `config`, checks the journal belongs to the module, and plans the graph.
    pub fn new(
        graph: Arc<FutureGraph>,
        journal: Arc<JournalStore>,
        chain: Arc<dyn ChainAdapter>,
        config: ExecutorConfig,
    ) -> Result<Self, ExecutorError> {
        config.validate()?;
        if journal.key().module() != graph.module_name() {
            return Err(ExecutorError::ModuleMismatch {
                journal: journal.key().to_string(),
                module: graph.module_name().to_string(),
            });
        }
        let plan = plan(&graph)?;
        Ok(Self {
            context: Arc::new(ExecutionContext {
                graph,
                journal,
                chain,
                config,
                nonces: NonceManager::new(),
            }),
            plan,
        })
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn graph(&self) -> &FutureGraph {
        &self.context.graph
    }

    /// Runs without an external cancellation signal.
    pub async fn run_to_completion(&self) -> Result<DeploymentResult, ExecutorError> {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        self.run(shutdown_rx).await
    }

    /// Executes the plan until every future is terminal, blocked, or `shutdown` flips.
    ///
    /// Cancellation only stops new launches; futures already running are
    /// awaited until the journal holds a terminal state for them.
    #[instrument(skip_all, fields(module = %self.context.graph.module_name(), network = %self.context.chain.network()))]
    pub async fn run(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<DeploymentResult, ExecutorError> {
        let context = &self.context;
        let snapshot = context.journal.snapshot().await;
        let mismatches = reconcile(&context.graph, &snapshot);
        if !mismatches.is_empty() {
            return Err(ExecutorError::Reconciliation { mismatches });
        }
        context.recover_in_flight(&snapshot).await?;

        let semaphore = Arc::new(Semaphore::new(context.config.max_in_flight));
        let mut cancelled = false;
        let mut first_error = None;

        for (index, batch) in self.plan.batches().iter().enumerate() {
            if *shutdown.borrow() {
                cancelled = true;
                break;
            }
            debug!(batch = index + 1, size = batch.len(), "starting batch");

            let mut tasks = JoinSet::new();
            for future_id in batch {
                match context.readiness(future_id).await {
                    Readiness::Done => {
                        debug!(future = %future_id, "already succeeded; using journaled result");
                        continue;
                    }
                    Readiness::Blocked(dependency) => {
                        debug!(future = %future_id, dependency = %dependency, "dependency not successful; leaving future not started");
                        continue;
                    }
                    Readiness::Ready => {}
                }

                let permit = tokio::select! {
                    permit = Arc::clone(&semaphore).acquire_owned() => {
                        permit.map_err(|error| ExecutorError::Task(error.to_string()))?
                    }
                    _ = wait_for_shutdown(&mut shutdown) => {
                        cancelled = true;
                        break;
                    }
                };
                if *shutdown.borrow() {
                    cancelled = true;
                    break;
                }

                let task_context = Arc::clone(context);
                let future_id = future_id.clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    let outcome = task_context.execute_future(&future_id).await;
                    (future_id, outcome)
                });
            }

            // Drain every task so no in-flight future is abandoned on error.
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((future_id, Ok(FutureOutcome::Failed(kind)))) => {
                        debug!(future = %future_id, failure = %kind, "future settled as failed");
                    }
                    Ok((future_id, Ok(outcome))) => {
                        debug!(future = %future_id, ?outcome, "future settled");
                    }
                    Ok((future_id, Err(error))) => {
                        warn!(future = %future_id, %error, "future aborted");
                        first_error.get_or_insert(error);
                    }
                    Err(error) => {
                        first_error.get_or_insert(ExecutorError::Task(error.to_string()));
                    }
                }
            }
            if let Some(error) = first_error.take() {
                return Err(error);
            }
            if cancelled {
                break;
            }
        }

        if cancelled {
            warn!("deployment cancelled; no further futures will be launched");
        }
        let state = context.journal.snapshot().await;
        let result = DeploymentResult::summarize(&context.graph, &self.plan, &state, cancelled);
        info!(completed = result.is_completed(), "deployment run finished");
        Ok(result)
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl ExecutionContext {
    async fn readiness(&self, future_id: &FutureId) -> Readiness {
        if self.journal.status(future_id).await == FutureState::Success {
            return Readiness::Done;
        }
        for dependency in self.graph.dependencies_of(future_id).into_iter().flatten() {
            if self.journal.status(dependency).await != FutureState::Success {
                return Readiness::Blocked(dependency.clone());
            }
        }
        Readiness::Ready
    }

    /// Attaches handles to attempts interrupted between journaling and
    /// recording the submission, before anything new is broadcast.
    async fn recover_in_flight(&self, snapshot: &ExecutionState) -> Result<(), ExecutorError> {
        for (future_id, execution) in snapshot.iter() {
            if execution.state != FutureState::InProgress || execution.pending.is_some() {
                continue;
            }
            let Some(nonce) = execution.nonce else {
                continue;
            };
            if !self.graph.contains(future_id) {
                continue;
            }
            match self.find_submission_with_retry(nonce).await {
                Ok(Some(found)) if found.future_id == *future_id => {
                    let handle = found.handle;
                    info!(future = %future_id, nonce, tx = %handle.transaction_hash, "recovered submission of interrupted attempt");
                    self.journal
                        .record(future_id, Transition::Submitted { handle })
                        .await?;
                }
                Ok(Some(found)) => {
                    debug!(future = %future_id, nonce, sender = %found.future_id, "nonce of interrupted attempt was used by another transaction");
                }
                Ok(None) => {
                    debug!(future = %future_id, nonce, "interrupted attempt never reached the chain");
                }
                Err(error) => {
                    warn!(future = %future_id, nonce, %error, "could not look up interrupted attempt");
                }
            }
        }
        Ok(())
    }

    async fn find_submission_with_retry(
        &self,
        nonce: u64,
    ) -> Result<Option<SubmittedTransaction>, AdapterError> {
        let mut failures = 0u32;
        loop {
            match self.chain.find_submission(nonce).await {
                Ok(found) => return Ok(found),
                Err(error) if error.kind.is_transient() => {
                    failures += 1;
                    if self.config.retry.is_exhausted(failures) {
                        return Err(error);
                    }
                    tokio::time::sleep(self.config.retry.delay_for(failures)).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// The transaction at `nonce`, if `future_id` is the one that sent it.
    async fn own_submission(&self, future_id: &FutureId, nonce: u64) -> Option<PendingHandle> {
        match self.chain.find_submission(nonce).await {
            Ok(Some(found)) if found.future_id == *future_id => Some(found.handle),
            Ok(_) => None,
            Err(error) => {
                debug!(future = %future_id, nonce, %error, "submission lookup failed");
                None
            }
        }
    }

    #[instrument(skip_all, fields(future = %future_id))]
    async fn execute_future(&self, future_id: &FutureId) -> Result<FutureOutcome, ExecutorError> {
        let future = self
            .graph
            .future(future_id)
            .ok_or_else(|| ExecutorError::UnknownFuture(future_id.clone()))?;
        let entry = self.journal.entry(future_id).await;
        if entry
            .as_ref()
            .is_some_and(|execution| execution.state == FutureState::Success)
        {
            return Ok(FutureOutcome::Skipped);
        }

        let fingerprint = fingerprint(future);
        let mut attempt = entry.as_ref().map(|execution| execution.attempt).unwrap_or(0) + 1;

        if let Some(execution) = &entry {
            if let Some(handle) = execution.pending.clone() {
                if execution.state == FutureState::Failed {
                    // Re-adopt a transaction that may have landed after we gave up on it.
                    self.journal
                        .record(
                            future_id,
                            Transition::Started {
                                attempt,
                                nonce: Some(handle.nonce),
                                fingerprint: fingerprint.clone(),
                            },
                        )
                        .await?;
                    self.journal
                        .record(
                            future_id,
                            Transition::Submitted {
                                handle: handle.clone(),
                            },
                        )
                        .await?;
                    attempt += 1;
                }
                info!(tx = %handle.transaction_hash, nonce = handle.nonce, "resuming in-flight transaction");
                match self.await_outcome(&handle).await {
                    Outcome::Dropped(message) => {
                        warn!(%message, "in-flight transaction unknown to the chain; submitting a new attempt");
                        self.resync_nonce().await;
                    }
                    outcome => return self.settle(future, outcome).await,
                }
            }
        }

        let results = self.dependency_results(future_id).await;
        let resolved = match resolve_action(future, &results) {
            Ok(resolved) => resolved,
            Err(failure) => {
                self.start(future_id, attempt, None, &fingerprint).await?;
                return self.fail(future_id, failure.kind, failure.message).await;
            }
        };

        match resolved {
            ResolvedAction::Known(result) => {
                self.start(future_id, attempt, None, &fingerprint).await?;
                self.succeed(future_id, result).await
            }
            ResolvedAction::StaticCall {
                contract,
                function,
                args,
            } => {
                self.start(future_id, attempt, None, &fingerprint).await?;
                let request = StaticCallRequest {
                    future_id: future_id.clone(),
                    contract,
                    function,
                    args,
                };
                self.run_static_call(request).await
            }
            ResolvedAction::Transaction { kind, value } => {
                self.run_transaction(future, attempt, &fingerprint, kind, value)
                    .await
            }
        }
    }

    async fn dependency_results(&self, future_id: &FutureId) -> BTreeMap<FutureId, FutureResult> {
        let mut results = BTreeMap::new();
        for dependency in self.graph.dependencies_of(future_id).into_iter().flatten() {
            if let Some(result) = self.journal.result_of(dependency).await {
                results.insert(dependency.clone(), result);
            }
        }
        results
    }

    async fn run_static_call(
        &self,
        request: StaticCallRequest,
    ) -> Result<FutureOutcome, ExecutorError> {
        let future_id = request.future_id.clone();
        let mut failures = 0u32;
        loop {
            match self.chain.call(request.clone()).await {
                Ok(CallOutcome::Returned(value)) => {
                    let result = FutureResult {
                        value: Some(value),
                        ..FutureResult::default()
                    };
                    return self.succeed(&future_id, result).await;
                }
                Ok(CallOutcome::Reverted { reason }) => {
                    return self
                        .fail(&future_id, FailureKind::ExecutionReverted, reason)
                        .await;
                }
                Err(error) if error.kind.is_unrecoverable() => {
                    return self
                        .fail(
                            &future_id,
                            FailureKind::UnrecoverableSubmission,
                            error.to_string(),
                        )
                        .await;
                }
                Err(error) => {
                    failures += 1;
                    if self.config.retry.is_exhausted(failures) {
                        return self
                            .fail(
                                &future_id,
                                FailureKind::TransientFailureExhausted,
                                error.to_string(),
                            )
                            .await;
                    }
                    warn!(future = %future_id, %error, failures, "static call failed; retrying");
                    tokio::time::sleep(self.config.retry.delay_for(failures)).await;
                }
            }
        }
    }

    async fn run_transaction(
        &self,
        future: &Future,
        mut attempt: u32,
        fingerprint: &str,
        kind: TransactionKind,
        value: Option<Value>,
    ) -> Result<FutureOutcome, ExecutorError> {
        let mut failures = 0u32;
        let mut previous_nonce = None;
        loop {
            let submission = self
                .submit_once(future, attempt, fingerprint, &kind, &value, previous_nonce)
                .await?;
            let error = match submission {
                Submission::Landed(handle) => match self.await_outcome(&handle).await {
                    Outcome::Dropped(message) => {
                        self.resync_nonce().await;
                        AdapterError::new(AdapterErrorKind::UnknownTransaction, message)
                    }
                    outcome => return self.settle(future, outcome).await,
                },
                Submission::Rejected(error) => {
                    return self
                        .fail(
                            &future.id,
                            FailureKind::UnrecoverableSubmission,
                            error.to_string(),
                        )
                        .await;
                }
                Submission::Transient(error) => {
                    previous_nonce = self
                        .journal
                        .entry(&future.id)
                        .await
                        .and_then(|execution| execution.nonce);
                    error
                }
            };

            failures += 1;
            if self.config.retry.is_exhausted(failures) {
                return self
                    .fail(
                        &future.id,
                        FailureKind::TransientFailureExhausted,
                        format!("gave up after {failures} attempts: {error}"),
                    )
                    .await;
            }
            let delay = self.config.retry.delay_for(failures);
            warn!(future = %future.id, %error, attempt, delay_ms = delay.as_millis() as u64, "transient failure; retrying");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Journals the attempt and broadcasts it while holding the nonce.
    async fn submit_once(
        &self,
        future: &Future,
        attempt: u32,
        fingerprint: &str,
        kind: &TransactionKind,
        value: &Option<Value>,
        previous_nonce: Option<u64>,
    ) -> Result<Submission, ExecutorError> {
        let mut guard = match self.nonces.lock(self.chain.as_ref()).await {
            Ok(guard) => guard,
            Err(error) => {
                self.start(&future.id, attempt, None, fingerprint).await?;
                return Ok(classify(error));
            }
        };

        // A previous attempt may have landed even though its submit call failed.
        if let Some(nonce) = previous_nonce {
            if let Some(handle) = self.own_submission(&future.id, nonce).await {
                if nonce == guard.nonce() {
                    guard.advance();
                }
                self.start(&future.id, attempt, Some(nonce), fingerprint)
                    .await?;
                self.journal
                    .record(
                        &future.id,
                        Transition::Submitted {
                            handle: handle.clone(),
                        },
                    )
                    .await?;
                return Ok(Submission::Landed(handle));
            }
        }

        let nonce = guard.nonce();
        self.start(&future.id, attempt, Some(nonce), fingerprint)
            .await?;
        let request = TransactionRequest {
            future_id: future.id.clone(),
            nonce,
            kind: kind.clone(),
            value: value.clone(),
        };
        let error = match self.chain.submit(request).await {
            Ok(handle) => {
                guard.advance();
                self.journal
                    .record(
                        &future.id,
                        Transition::Submitted {
                            handle: handle.clone(),
                        },
                    )
                    .await?;
                debug!(future = %future.id, nonce, tx = %handle.transaction_hash, "transaction submitted");
                return Ok(Submission::Landed(handle));
            }
            Err(error) => error,
        };

        if error.kind.is_unrecoverable() {
            return Ok(Submission::Rejected(error));
        }
        // The broadcast may have landed before the error surfaced.
        if let Some(handle) = self.own_submission(&future.id, nonce).await {
            guard.advance();
            self.journal
                .record(
                    &future.id,
                    Transition::Submitted {
                        handle: handle.clone(),
                    },
                )
                .await?;
            info!(future = %future.id, nonce, %error, "submission landed despite adapter error");
            return Ok(Submission::Landed(handle));
        }
        if error.kind == AdapterErrorKind::NonceContention {
            if let Err(resync_error) = guard.resync(self.chain.as_ref()).await {
                warn!(%resync_error, "failed to resync nonce after contention");
            }
        }
        Ok(classify(error))
    }

    /// A dropped transaction frees its nonce; the cached counter is stale.
    async fn resync_nonce(&self) {
        match self.nonces.lock(self.chain.as_ref()).await {
            Ok(mut guard) => {
                if let Err(error) = guard.resync(self.chain.as_ref()).await {
                    warn!(%error, "failed to resync nonce");
                }
            }
            Err(error) => warn!(%error, "failed to lock nonce for resync"),
        }
    }

    async fn await_outcome(&self, handle: &PendingHandle) -> Outcome {
        let deadline = Instant::now() + self.config.confirmation_timeout;
        let mut failures = 0u32;
        loop {
            match self.chain.poll(handle).await {
                Ok(PollStatus::Confirmed(receipt)) => return Outcome::Confirmed(receipt),
                Ok(PollStatus::Reverted { reason }) => return Outcome::Reverted(reason),
                Ok(PollStatus::Pending) => {
                    if Instant::now() >= deadline {
                        return Outcome::Exhausted(format!(
                            "no receipt for {} within {}ms",
                            handle.transaction_hash,
                            self.config.confirmation_timeout.as_millis()
                        ));
                    }
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Err(error) if error.kind == AdapterErrorKind::UnknownTransaction => {
                    return Outcome::Dropped(error.to_string());
                }
                Err(error) => {
                    failures += 1;
                    if self.config.retry.is_exhausted(failures) {
                        return Outcome::Exhausted(format!(
                            "polling {} failed {failures} times: {error}",
                            handle.transaction_hash
                        ));
                    }
                    debug!(tx = %handle.transaction_hash, %error, failures, "poll failed; backing off");
                    tokio::time::sleep(self.config.retry.delay_for(failures)).await;
                }
            }
        }
    }

    async fn settle(&self, future: &Future, outcome: Outcome) -> Result<FutureOutcome, ExecutorError> {
        match outcome {
            Outcome::Confirmed(receipt) => {
                let result = result_from_receipt(future.kind(), receipt);
                self.succeed(&future.id, result).await
            }
            Outcome::Reverted(reason) => {
                self.fail(&future.id, FailureKind::ExecutionReverted, reason)
                    .await
            }
            Outcome::Dropped(message) | Outcome::Exhausted(message) => {
                self.fail(&future.id, FailureKind::TransientFailureExhausted, message)
                    .await
            }
        }
    }

    async fn start(
        &self,
        future_id: &FutureId,
        attempt: u32,
        nonce: Option<u64>,
        fingerprint: &str,
    ) -> Result<(), ExecutorError> {
        self.journal
            .record(
                future_id,
                Transition::Started {
                    attempt,
                    nonce,
                    fingerprint: fingerprint.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    async fn succeed(
        &self,
        future_id: &FutureId,
        result: FutureResult,
    ) -> Result<FutureOutcome, ExecutorError> {
        self.journal
            .record(future_id, Transition::Succeeded { result })
            .await?;
        info!(future = %future_id, "future succeeded");
        Ok(FutureOutcome::Succeeded)
    }

    async fn fail(
        &self,
        future_id: &FutureId,
        kind: FailureKind,
        message: String,
    ) -> Result<FutureOutcome, ExecutorError> {
        warn!(future = %future_id, failure = %kind, %message, "future failed");
        self.journal
            .record(future_id, Transition::Failed { kind, message })
            .await?;
        Ok(FutureOutcome::Failed(kind))
    }
}

fn classify(error: AdapterError) -> Submission {
    if error.kind.is_unrecoverable() {
        Submission::Rejected(error)
    } else {
        Submission::Transient(error)
    }
}

fn result_from_receipt(kind: FutureKind, receipt: Receipt) -> FutureResult {
    FutureResult {
        address: match kind {
            FutureKind::Deploy => receipt.contract_address,
            _ => None,
        },
        value: None,
        transaction_hash: Some(receipt.transaction_hash),
        events: receipt.events,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ignis_chain::SimulatedChain;
    use ignis_graph::ModuleBuilder;
    use ignis_journal::JournalKey;
    use ignis_types::{ArgumentValue, EmittedEvent};
    use serde_json::json;
    use std::time::Duration;

    use crate::RetryPolicy;

    fn id(raw: &str) -> FutureId {
        FutureId::parse(raw).expect("id")
    }

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig {
            max_in_flight: 4,
            retry: RetryPolicy {
                max_attempts: 3,
                backoff_initial: Duration::from_millis(1),
                backoff_max: Duration::from_millis(4),
            },
            poll_interval: Duration::from_millis(1),
            confirmation_timeout: Duration::from_secs(5),
        }
    }

    /// Token <- Vault <- Vault.setToken, plus an unrelated Registry.
    fn vault_module() -> Arc<FutureGraph> {
        let mut m = ModuleBuilder::new("M").expect("builder");
        let token = m
            .contract("Token", vec![ArgumentValue::literal("TKN")])
            .expect("token");
        let vault = m
            .contract("Vault", vec![ArgumentValue::address_of(&token)])
            .expect("vault");
        m.call(&vault, "setToken", vec![ArgumentValue::address_of(&token)])
            .expect("call");
        let registry = m.contract("Registry", Vec::new()).expect("registry");
        m.output("token", &token);
        m.output("vault", &vault);
        m.output("registry", &registry);
        Arc::new(FutureGraph::build(m.build()).expect("graph"))
    }

    async fn journal() -> Arc<JournalStore> {
        let key = JournalKey::new("localhost", "M").expect("key");
        Arc::new(JournalStore::in_memory(key).await.expect("journal"))
    }

    fn executor(
        graph: &Arc<FutureGraph>,
        journal: &Arc<JournalStore>,
        chain: &Arc<SimulatedChain>,
    ) -> Executor {
        Executor::new(
            Arc::clone(graph),
            Arc::clone(journal),
            Arc::clone(chain) as Arc<dyn ChainAdapter>,
            fast_config(),
        )
        .expect("executor")
    }

    #[tokio::test]
    async fn functional_run_deploys_module_and_rerun_submits_nothing() {
        let graph = vault_module();
        let journal = journal().await;
        let chain = Arc::new(SimulatedChain::new("localhost"));

        let result = executor(&graph, &journal, &chain)
            .run_to_completion()
            .await
            .expect("run");
        let DeploymentResult::Completed { outputs } = &result else {
            panic!("expected completion, got {result:?}");
        };
        let vault = outputs["vault"].as_str().expect("vault address");
        assert_eq!(chain.contract_name_at(vault).as_deref(), Some("Vault"));
        assert_eq!(chain.stats().landed, 4);

        let before = chain.stats();
        let rerun = executor(&graph, &journal, &chain)
            .run_to_completion()
            .await
            .expect("rerun");
        assert_eq!(rerun, result);
        assert_eq!(chain.stats().submit_calls, before.submit_calls);
        assert_eq!(chain.stats().polls, before.polls);
    }

    #[tokio::test]
    async fn regression_failed_future_blocks_only_its_dependents() {
        let graph = vault_module();
        let journal = journal().await;
        let chain = Arc::new(SimulatedChain::new("localhost"));
        chain.revert_on(&id("M#Vault"), "constructor reverted");

        let result = executor(&graph, &journal, &chain)
            .run_to_completion()
            .await
            .expect("run");
        let report = result.failure_report().expect("failure report");
        assert_eq!(report.first_failure.future_id, id("M#Vault"));
        assert_eq!(report.first_failure.kind, FailureKind::ExecutionReverted);
        assert_eq!(report.not_started, vec![id("M#Vault.setToken")]);
        assert!(report.succeeded.contains(&id("M#Token")));
        assert!(report.succeeded.contains(&id("M#Registry")));
        assert_eq!(
            journal.status(&id("M#Vault.setToken")).await,
            FutureState::NotStarted
        );

        chain.clear_revert(&id("M#Vault"));
        let resumed = executor(&graph, &journal, &chain)
            .run_to_completion()
            .await
            .expect("resume");
        assert!(resumed.is_completed());
        assert_eq!(chain.submissions_for(&id("M#Token")), 1);
        assert_eq!(chain.submissions_for(&id("M#Registry")), 1);
        assert_eq!(
            journal.entry(&id("M#Vault")).await.expect("vault").attempt,
            2
        );
    }

    #[tokio::test]
    async fn functional_transient_submit_failures_are_retried() {
        let graph = vault_module();
        let journal = journal().await;
        let chain = Arc::new(SimulatedChain::new("localhost"));
        chain.fail_submit(&id("M#Token"), AdapterErrorKind::Timeout, 2);

        let result = executor(&graph, &journal, &chain)
            .run_to_completion()
            .await
            .expect("run");
        assert!(result.is_completed());
        let token = journal.entry(&id("M#Token")).await.expect("token");
        assert_eq!(token.state, FutureState::Success);
        assert_eq!(token.attempt, 3);
        assert_eq!(chain.submissions_for(&id("M#Token")), 1);
    }

    #[tokio::test]
    async fn regression_transient_failures_exhaust_retry_budget() {
        let graph = vault_module();
        let journal = journal().await;
        let chain = Arc::new(SimulatedChain::new("localhost"));
        chain.fail_submit(&id("M#Token"), AdapterErrorKind::ConnectionReset, 10);

        let result = executor(&graph, &journal, &chain)
            .run_to_completion()
            .await
            .expect("run");
        let report = result.failure_report().expect("failure report");
        assert_eq!(report.first_failure.future_id, id("M#Token"));
        assert_eq!(
            report.first_failure.kind,
            FailureKind::TransientFailureExhausted
        );
        assert!(report.not_started.contains(&id("M#Vault")));
        assert_eq!(chain.submissions_for(&id("M#Token")), 0);
    }

    #[tokio::test]
    async fn functional_unrecoverable_submission_is_not_retried() {
        let graph = vault_module();
        let journal = journal().await;
        let chain = Arc::new(SimulatedChain::new("localhost"));
        chain.fail_submit(&id("M#Registry"), AdapterErrorKind::InsufficientFunds, 1);

        let result = executor(&graph, &journal, &chain)
            .run_to_completion()
            .await
            .expect("run");
        let report = result.failure_report().expect("failure report");
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.first_failure.future_id, id("M#Registry"));
        assert_eq!(
            report.first_failure.kind,
            FailureKind::UnrecoverableSubmission
        );
        assert_eq!(
            journal.entry(&id("M#Registry")).await.expect("registry").attempt,
            1
        );
        assert!(report.succeeded.contains(&id("M#Vault.setToken")));
    }

    #[tokio::test]
    async fn integration_lost_submit_response_is_not_broadcast_twice() {
        let graph = vault_module();
        let journal = journal().await;
        let chain = Arc::new(SimulatedChain::new("localhost"));
        chain.lose_submit_response(&id("M#Token"), 1);

        let result = executor(&graph, &journal, &chain)
            .run_to_completion()
            .await
            .expect("run");
        assert!(result.is_completed());
        assert_eq!(chain.submissions_for(&id("M#Token")), 1);
        assert_eq!(chain.stats().landed, 4);
    }

    #[tokio::test]
    async fn integration_resume_attaches_interrupted_submission() {
        let graph = vault_module();
        let journal = journal().await;
        let chain = Arc::new(SimulatedChain::new("localhost"));
        let token = id("M#Token");

        // A previous process journaled the attempt and broadcast it, then died.
        journal
            .record(
                &token,
                Transition::Started {
                    attempt: 1,
                    nonce: Some(0),
                    fingerprint: fingerprint(graph.future(&token).expect("token")),
                },
            )
            .await
            .expect("start");
        chain
            .submit(TransactionRequest {
                future_id: token.clone(),
                nonce: 0,
                kind: TransactionKind::Deploy {
                    contract_name: "Token".to_string(),
                    args: vec![json!("TKN")],
                },
                value: None,
            })
            .await
            .expect("broadcast");

        let result = executor(&graph, &journal, &chain)
            .run_to_completion()
            .await
            .expect("resume");
        assert!(result.is_completed());
        assert_eq!(chain.submissions_for(&token), 1);
        let entry = journal.entry(&token).await.expect("token");
        assert_eq!(entry.attempt, 1);
        assert_eq!(entry.nonce, Some(0));
    }

    #[tokio::test]
    async fn regression_resume_ignores_foreign_transaction_at_journaled_nonce() {
        let graph = vault_module();
        let journal = journal().await;
        let chain = Arc::new(SimulatedChain::new("localhost"));
        let token = id("M#Token");

        // The interrupted attempt never broadcast; another sender used its nonce.
        journal
            .record(
                &token,
                Transition::Started {
                    attempt: 1,
                    nonce: Some(0),
                    fingerprint: fingerprint(graph.future(&token).expect("token")),
                },
            )
            .await
            .expect("start");
        chain
            .submit(TransactionRequest {
                future_id: id("Other#Contract"),
                nonce: 0,
                kind: TransactionKind::Deploy {
                    contract_name: "Other".to_string(),
                    args: Vec::new(),
                },
                value: None,
            })
            .await
            .expect("foreign broadcast");

        let result = executor(&graph, &journal, &chain)
            .run_to_completion()
            .await
            .expect("resume");
        assert!(result.is_completed());
        assert_eq!(chain.submissions_for(&token), 1);
        let entry = journal.entry(&token).await.expect("token");
        assert_eq!(entry.attempt, 2);
        assert_eq!(entry.nonce, Some(1));
        let DeploymentResult::Completed { outputs } = result else {
            panic!("expected completion");
        };
        let address = outputs["token"].as_str().expect("token address");
        assert_eq!(chain.contract_name_at(address).as_deref(), Some("Token"));
    }

    #[tokio::test]
    async fn regression_retry_does_not_adopt_sibling_transaction_on_reused_nonce() {
        let mut m = ModuleBuilder::new("M").expect("builder");
        m.contract("Alpha", Vec::new()).expect("alpha");
        m.contract("Beta", Vec::new()).expect("beta");
        let graph = Arc::new(FutureGraph::build(m.build()).expect("graph"));
        let journal = journal().await;
        let chain = Arc::new(SimulatedChain::new("localhost"));
        let alpha = id("M#Alpha");
        let beta = id("M#Beta");
        // Alpha's first broadcast never lands, so Beta may take its nonce.
        chain.fail_submit(&alpha, AdapterErrorKind::Timeout, 1);
        chain.revert_on(&beta, "beta reverted");

        let config = ExecutorConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                backoff_initial: Duration::from_millis(50),
                backoff_max: Duration::from_millis(50),
            },
            ..fast_config()
        };
        let result = Executor::new(
            graph,
            Arc::clone(&journal),
            Arc::clone(&chain) as Arc<dyn ChainAdapter>,
            config,
        )
        .expect("executor")
        .run_to_completion()
        .await
        .expect("run");

        let report = result.failure_report().expect("failure report");
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.first_failure.future_id, beta);
        assert_eq!(report.first_failure.kind, FailureKind::ExecutionReverted);
        assert_eq!(report.first_failure.message, "beta reverted");
        assert_eq!(report.succeeded, vec![alpha.clone()]);

        let entry = journal.entry(&alpha).await.expect("alpha");
        assert_eq!(entry.state, FutureState::Success);
        assert_eq!(entry.attempt, 2);
        assert_eq!(chain.submissions_for(&alpha), 1);
        assert_eq!(chain.stats().landed, 2);
    }

    #[tokio::test]
    async fn regression_dropped_transaction_is_resubmitted_on_same_nonce() {
        let graph = vault_module();
        let journal = journal().await;
        let chain = Arc::new(SimulatedChain::new("localhost"));
        chain.drop_next_submission(&id("M#Token"));

        let result = executor(&graph, &journal, &chain)
            .run_to_completion()
            .await
            .expect("run");
        assert!(result.is_completed());
        let token = journal.entry(&id("M#Token")).await.expect("token");
        assert_eq!(token.attempt, 2);
        assert_eq!(chain.submissions_for(&id("M#Token")), 1);
    }

    #[tokio::test]
    async fn regression_exhausted_poll_keeps_handle_for_next_run() {
        let graph = vault_module();
        let journal = journal().await;
        let chain = Arc::new(SimulatedChain::new("localhost"));
        chain.fail_poll(&id("M#Token"), AdapterErrorKind::Timeout, 3);

        let first = executor(&graph, &journal, &chain)
            .run_to_completion()
            .await
            .expect("run");
        let report = first.failure_report().expect("failure report");
        assert_eq!(
            report.first_failure.kind,
            FailureKind::TransientFailureExhausted
        );
        let failed = journal.entry(&id("M#Token")).await.expect("token");
        assert!(failed.pending.is_some());

        let second = executor(&graph, &journal, &chain)
            .run_to_completion()
            .await
            .expect("rerun");
        assert!(second.is_completed());
        assert_eq!(chain.submissions_for(&id("M#Token")), 1);
    }

    #[tokio::test]
    async fn functional_static_calls_and_event_reads_resolve_outputs() {
        let mut m = ModuleBuilder::new("M").expect("builder");
        let factory = m.contract("Factory", Vec::new()).expect("factory");
        let create = m.call(&factory, "create", Vec::new()).expect("create");
        let child = m
            .read_event_argument(&create, "Created", "child")
            .expect("event");
        let owner = m.static_call(&factory, "owner", Vec::new()).expect("owner");
        m.output("child", &child);
        m.output("owner", &owner);
        let graph = Arc::new(FutureGraph::build(m.build()).expect("graph"));

        let journal = journal().await;
        let chain = Arc::new(SimulatedChain::new("localhost"));
        chain.emit_on(&create, EmittedEvent::new("Created").with_arg("child", "0xc0ffee"));
        chain.set_static_result("owner", json!("0x0wner"));

        let result = executor(&graph, &journal, &chain)
            .run_to_completion()
            .await
            .expect("run");
        let DeploymentResult::Completed { outputs } = result else {
            panic!("expected completion");
        };
        assert_eq!(outputs["child"], json!("0xc0ffee"));
        assert_eq!(outputs["owner"], json!("0x0wner"));
        assert_eq!(chain.stats().landed, 2);
        assert_eq!(chain.stats().static_calls, 1);
    }

    #[tokio::test]
    async fn regression_changed_module_is_refused_before_any_write() {
        let graph = vault_module();
        let journal = journal().await;
        let chain = Arc::new(SimulatedChain::new("localhost"));
        executor(&graph, &journal, &chain)
            .run_to_completion()
            .await
            .expect("run");
        let sequence = journal.snapshot().await.last_sequence();

        let mut m = ModuleBuilder::new("M").expect("builder");
        m.contract("Token", vec![ArgumentValue::literal("RENAMED")])
            .expect("token");
        let changed = Arc::new(FutureGraph::build(m.build()).expect("graph"));
        let error = executor(&changed, &journal, &chain)
            .run_to_completion()
            .await
            .expect_err("mismatch");
        let ExecutorError::Reconciliation { mismatches } = &error else {
            panic!("expected reconciliation error, got {error}");
        };
        assert_eq!(mismatches[0].future_id, id("M#Token"));
        assert_eq!(journal.snapshot().await.last_sequence(), sequence);
    }

    #[tokio::test]
    async fn functional_cancelled_run_launches_nothing() {
        let graph = vault_module();
        let journal = journal().await;
        let chain = Arc::new(SimulatedChain::new("localhost"));
        let (_shutdown_tx, shutdown_rx) = watch::channel(true);

        let result = executor(&graph, &journal, &chain)
            .run(shutdown_rx)
            .await
            .expect("run");
        let DeploymentResult::Cancelled {
            succeeded,
            not_started,
        } = result
        else {
            panic!("expected cancellation");
        };
        assert!(succeeded.is_empty());
        assert_eq!(not_started.len(), 4);
        assert_eq!(chain.stats().submit_calls, 0);
    }

    #[tokio::test]
    async fn integration_cancel_mid_run_finishes_in_flight_and_launches_nothing_more() {
        let graph = vault_module();
        let journal = journal().await;
        let chain = Arc::new(SimulatedChain::new("localhost"));
        let token = id("M#Token");
        chain.confirm_after_polls(&token, 200);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let observed = Arc::clone(&journal);
        let observed_token = token.clone();
        let observer = tokio::spawn(async move {
            while observed.status(&observed_token).await != FutureState::InProgress {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            let _ = shutdown_tx.send(true);
        });

        let result = executor(&graph, &journal, &chain)
            .run(shutdown_rx)
            .await
            .expect("run");
        observer.await.expect("observer");

        let DeploymentResult::Cancelled {
            succeeded,
            not_started,
        } = result
        else {
            panic!("expected cancellation");
        };
        assert!(succeeded.contains(&token));
        assert!(not_started.contains(&id("M#Vault")));
        assert!(not_started.contains(&id("M#Vault.setToken")));
        assert_eq!(journal.status(&token).await, FutureState::Success);
        assert_eq!(journal.status(&id("M#Vault")).await, FutureState::NotStarted);
        assert_eq!(chain.submissions_for(&id("M#Vault")), 0);
    }

    #[tokio::test]
    async fn regression_in_flight_transactions_never_exceed_window() {
        let mut m = ModuleBuilder::new("M").expect("builder");
        let mut leaves = Vec::new();
        for index in 0..6 {
            leaves.push(m.contract(&format!("Leaf{index}"), Vec::new()).expect("leaf"));
        }
        let graph = Arc::new(FutureGraph::build(m.build()).expect("graph"));
        let journal = journal().await;
        let chain = Arc::new(SimulatedChain::new("localhost"));
        for leaf in &leaves {
            chain.confirm_after_polls(leaf, 20);
        }

        let config = ExecutorConfig {
            max_in_flight: 2,
            ..fast_config()
        };
        let result = Executor::new(
            graph,
            Arc::clone(&journal),
            Arc::clone(&chain) as Arc<dyn ChainAdapter>,
            config,
        )
        .expect("executor")
        .run_to_completion()
        .await
        .expect("run");
        assert!(result.is_completed());
        assert_eq!(chain.stats().landed, 6);
        assert_eq!(chain.stats().peak_unconfirmed, 2);
    }

    #[tokio::test]
    async fn integration_wide_batch_gets_distinct_nonces_under_concurrency() {
        let mut m = ModuleBuilder::new("M").expect("builder");
        for index in 0..6 {
            m.contract(&format!("Leaf{index}"), Vec::new()).expect("leaf");
        }
        let graph = Arc::new(FutureGraph::build(m.build()).expect("graph"));
        let journal = journal().await;
        let chain = Arc::new(SimulatedChain::new("localhost"));

        let result = executor(&graph, &journal, &chain)
            .run_to_completion()
            .await
            .expect("run");
        assert!(result.is_completed());
        assert_eq!(chain.stats().landed, 6);
        let snapshot = journal.snapshot().await;
        let mut nonces: Vec<u64> = snapshot
            .iter()
            .filter_map(|(_, execution)| execution.nonce)
            .collect();
        nonces.sort_unstable();
        assert_eq!(nonces, (0..6).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn unit_new_rejects_journal_of_another_module() {
        let graph = vault_module();
        let key = JournalKey::new("localhost", "Other").expect("key");
        let journal = Arc::new(JournalStore::in_memory(key).await.expect("journal"));
        let chain: Arc<dyn ChainAdapter> = Arc::new(SimulatedChain::new("localhost"));
        let Err(error) = Executor::new(graph, journal, chain, fast_config()) else {
            panic!("expected module mismatch");
        };
        assert!(matches!(error, ExecutorError::ModuleMismatch { .. }));
    }
}
