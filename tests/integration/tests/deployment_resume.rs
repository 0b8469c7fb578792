use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ignis_chain::{ChainAdapter, SimulatedChain, TransactionKind, TransactionRequest};
use ignis_executor::{DeploymentResult, Executor, ExecutorConfig, RetryPolicy};
use ignis_graph::{fingerprint, FutureGraph, ModuleBuilder};
use ignis_journal::{
    open_journal_store, write_deployed_addresses, DeploymentLayout, JournalBackendKind, JournalKey,
    JournalStore, Transition,
};
use ignis_types::{ArgumentValue, FailureKind, FutureId, FutureState};
use serde_json::{json, Value};
use tempfile::tempdir;

fn id(raw: &str) -> FutureId {
    FutureId::parse(raw).expect("id")
}

fn config() -> ExecutorConfig {
    ExecutorConfig {
        max_in_flight: 2,
        retry: RetryPolicy {
            max_attempts: 3,
            backoff_initial: Duration::from_millis(1),
            backoff_max: Duration::from_millis(5),
        },
        poll_interval: Duration::from_millis(1),
        confirmation_timeout: Duration::from_secs(5),
    }
}

/// Token, Vault(Token), Vault.setToken(Token).
fn vault_module() -> Arc<FutureGraph> {
    let mut m = ModuleBuilder::new("VaultModule").expect("builder");
    let token = m
        .contract("Token", vec![ArgumentValue::literal("TKN")])
        .expect("token");
    let vault = m
        .contract("Vault", vec![ArgumentValue::address_of(&token)])
        .expect("vault");
    m.call(&vault, "setToken", vec![ArgumentValue::address_of(&token)])
        .expect("setToken");
    m.output("Token", &token);
    m.output("Vault", &vault);
    Arc::new(FutureGraph::build(m.build()).expect("graph"))
}

fn layout(root: &Path) -> DeploymentLayout {
    DeploymentLayout::new(
        root.join("deployments"),
        JournalKey::new("localhost", "VaultModule").expect("key"),
    )
}

async fn run_once(
    graph: &Arc<FutureGraph>,
    layout: &DeploymentLayout,
    backend: Option<&str>,
    chain: &Arc<SimulatedChain>,
) -> DeploymentResult {
    let journal = Arc::new(open_journal_store(layout, backend).await.expect("journal"));
    let executor = Executor::new(
        Arc::clone(graph),
        Arc::clone(&journal),
        Arc::clone(chain) as Arc<dyn ChainAdapter>,
        config(),
    )
    .expect("executor");
    let result = executor.run_to_completion().await.expect("run");
    write_deployed_addresses(&layout.deployment_dir(), &journal.snapshot().await)
        .expect("addresses");
    drop(executor);
    Arc::try_unwrap(journal)
        .expect("sole journal owner")
        .close()
        .await;
    result
}

async fn reopen(layout: &DeploymentLayout, backend: Option<&str>) -> JournalStore {
    open_journal_store(layout, backend).await.expect("reopen")
}

#[tokio::test]
async fn integration_reverted_call_fails_subtree_and_resume_runs_only_that_call() {
    let temp = tempdir().expect("tempdir");
    let graph = vault_module();
    let layout = layout(temp.path());
    let chain_path = temp.path().join("chain.json");
    let set_token = id("VaultModule#Vault.setToken");

    let chain = Arc::new(SimulatedChain::open("localhost", &chain_path).expect("chain"));
    chain.revert_on(&set_token, "token already set");
    let first = run_once(&graph, &layout, None, &chain).await;
    let report = first.failure_report().expect("failure report");
    assert_eq!(report.first_failure.future_id, set_token);
    assert_eq!(report.first_failure.kind, FailureKind::ExecutionReverted);
    assert_eq!(report.first_failure.message, "token already set");
    assert_eq!(
        report.succeeded,
        vec![id("VaultModule#Token"), id("VaultModule#Vault")]
    );
    drop(chain);

    // A fresh process: the chain is reloaded from disk without the scripted revert.
    let chain = Arc::new(SimulatedChain::open("localhost", &chain_path).expect("chain"));
    let second = run_once(&graph, &layout, None, &chain).await;
    let DeploymentResult::Completed { outputs } = &second else {
        panic!("expected completion, got {second:?}");
    };
    assert_eq!(chain.stats().submit_calls, 1);
    assert_eq!(chain.submissions_for(&set_token), 1);

    let journal = reopen(&layout, None).await;
    assert_eq!(journal.backend_kind(), JournalBackendKind::Jsonl);
    let entry = journal.entry(&set_token).await.expect("entry");
    assert_eq!(entry.state, FutureState::Success);
    assert_eq!(entry.attempt, 2);

    let addresses: Value = serde_json::from_str(
        &std::fs::read_to_string(layout.deployed_addresses_path()).expect("addresses"),
    )
    .expect("json");
    assert_eq!(addresses["VaultModule#Vault"], outputs["Vault"]);
    assert!(addresses.get("VaultModule#Vault.setToken").is_none());
}

#[tokio::test]
async fn integration_sqlite_journal_rerun_submits_nothing() {
    let temp = tempdir().expect("tempdir");
    let graph = vault_module();
    let layout = layout(temp.path());
    let chain = Arc::new(SimulatedChain::new("localhost"));

    let first = run_once(&graph, &layout, Some("sqlite"), &chain).await;
    assert!(first.is_completed());
    let submitted = chain.stats().submit_calls;
    assert_eq!(submitted, 3);

    // Auto-detection now finds the existing sqlite journal.
    let second = run_once(&graph, &layout, None, &chain).await;
    assert_eq!(second, first);
    assert_eq!(chain.stats().submit_calls, submitted);
    assert!(layout.deployment_dir().join("journal.sqlite").exists());
    assert!(!layout.deployment_dir().join("journal.jsonl").exists());
}

#[tokio::test]
async fn integration_crash_after_broadcast_recovers_without_resubmitting() {
    let temp = tempdir().expect("tempdir");
    let graph = vault_module();
    let layout = layout(temp.path());
    let chain_path = temp.path().join("chain.json");
    let token = id("VaultModule#Token");

    {
        // The crashed process journaled its attempt and broadcast it, but never
        // recorded the handle.
        let chain = SimulatedChain::open("localhost", &chain_path).expect("chain");
        let journal = reopen(&layout, None).await;
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
            .expect("started");
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
        journal.close().await;
    }

    let chain = Arc::new(SimulatedChain::open("localhost", &chain_path).expect("chain"));
    let result = run_once(&graph, &layout, None, &chain).await;
    assert!(result.is_completed());
    assert_eq!(chain.submissions_for(&token), 0);
    assert_eq!(chain.stats().submit_calls, 2);

    let journal = reopen(&layout, None).await;
    let entry = journal.entry(&token).await.expect("token");
    assert_eq!(entry.attempt, 1);
    assert_eq!(entry.nonce, Some(0));
    assert!(entry.pending.is_some());
}

#[tokio::test]
async fn regression_changed_module_is_refused_against_existing_journal() {
    let temp = tempdir().expect("tempdir");
    let layout = layout(temp.path());
    let chain = Arc::new(SimulatedChain::new("localhost"));
    run_once(&vault_module(), &layout, None, &chain).await;

    let mut m = ModuleBuilder::new("VaultModule").expect("builder");
    m.contract("Token", vec![ArgumentValue::literal("OTHER")])
        .expect("token");
    let changed = Arc::new(FutureGraph::build(m.build()).expect("graph"));

    let journal = Arc::new(reopen(&layout, None).await);
    let executor = Executor::new(
        changed,
        Arc::clone(&journal),
        chain as Arc<dyn ChainAdapter>,
        config(),
    )
    .expect("executor");
    let error = executor.run_to_completion().await.expect_err("refused");
    assert!(error.to_string().contains("VaultModule#Token changed"));
}
