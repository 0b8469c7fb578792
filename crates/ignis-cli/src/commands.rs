use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use ignis_chain::{ChainAdapter, SimulatedChain};
use ignis_executor::{DeploymentResult, Executor};
use ignis_graph::{plan, FutureGraph, ModuleDescription};
use ignis_journal::{
    open_journal_store, write_deployed_addresses, DeploymentLayout, FutureExecution, JournalKey,
};
use ignis_types::{FutureId, FutureState};
use tokio::sync::watch;

use crate::cli_args::{Cli, Command, DeployArgs, DeploymentArgs};

pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Plan { module } => execute_plan_command(&module),
        Command::Deploy(args) => execute_deploy_command(args).await,
        Command::Status {
            module_name,
            deployment,
        } => execute_status_command(&module_name, &deployment).await,
        Command::Wipe {
            module,
            future_id,
            force,
            deployment,
        } => execute_wipe_command(&module, &future_id, force, &deployment).await,
        Command::Erase {
            module_name,
            deployment,
        } => execute_erase_command(&module_name, &deployment).await,
    }
}

fn load_graph(path: &Path) -> Result<FutureGraph> {
    let description = ModuleDescription::from_path(path)
        .with_context(|| format!("failed to load module description {}", path.display()))?;
    FutureGraph::build(description)
        .with_context(|| format!("invalid module description {}", path.display()))
}

fn layout_for(module_name: &str, deployment: &DeploymentArgs) -> Result<DeploymentLayout> {
    let key = JournalKey::new(deployment.network.clone(), module_name)
        .context("invalid deployment key")?;
    Ok(DeploymentLayout::new(&deployment.deployments_dir, key))
}

fn require_existing(layout: &DeploymentLayout) -> Result<()> {
    if !layout.deployment_dir().is_dir() {
        bail!(
            "no deployment of {} found under {}",
            layout.key(),
            layout.deployment_dir().display()
        );
    }
    Ok(())
}

fn execute_plan_command(module: &Path) -> Result<()> {
    let graph = load_graph(module)?;
    let plan = plan(&graph)?;
    println!(
        "ignis trace: plan module={} futures={} batches={}",
        graph.module_name(),
        graph.len(),
        plan.len()
    );
    print!("{plan}");
    Ok(())
}

async fn execute_deploy_command(args: DeployArgs) -> Result<()> {
    let graph = Arc::new(load_graph(&args.module)?);
    let layout = layout_for(graph.module_name(), &args.deployment)?;
    let journal = Arc::new(
        open_journal_store(&layout, args.deployment.journal_backend.as_deref())
            .await
            .with_context(|| format!("failed to open journal for {}", layout.key()))?,
    );
    let chain: Arc<dyn ChainAdapter> = match &args.chain_state {
        Some(path) => Arc::new(
            SimulatedChain::open(args.deployment.network.clone(), path)
                .map_err(|error| anyhow!("failed to open chain state: {error}"))?,
        ),
        None => Arc::new(SimulatedChain::new(args.deployment.network.clone())),
    };
    let executor = Executor::new(
        Arc::clone(&graph),
        Arc::clone(&journal),
        chain,
        args.executor_config(),
    )?;
    println!(
        "ignis trace: deploy module={} network={} journal={} backend={} batches={} futures={}",
        graph.module_name(),
        args.deployment.network,
        journal.location(),
        journal.backend_kind(),
        executor.plan().len(),
        graph.len()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("ignis trace: deploy cancel requested; waiting for in-flight futures");
            let _ = shutdown_tx.send(true);
        }
    });
    let outcome = executor.run(shutdown_rx).await;
    signal_task.abort();
    let result = outcome?;

    let state = journal.snapshot().await;
    let addresses_path = write_deployed_addresses(&layout.deployment_dir(), &state)
        .context("failed to write deployed addresses")?;
    drop(executor);
    if let Ok(journal) = Arc::try_unwrap(journal) {
        journal.close().await;
    }

    match &result {
        DeploymentResult::Completed { outputs } => {
            println!(
                "ignis trace: deploy status=completed outputs={} addresses={}",
                outputs.len(),
                addresses_path.display()
            );
            println!("{}", serde_json::to_string_pretty(outputs)?);
            Ok(())
        }
        DeploymentResult::Failed(report) => {
            println!(
                "ignis trace: deploy status=failed first_failure={} kind={} failures={} not_started={}",
                report.first_failure.future_id,
                report.first_failure.kind,
                report.failures.len(),
                report.not_started.len()
            );
            println!("{}", serde_json::to_string_pretty(report)?);
            bail!(
                "deployment failed at {}: {}",
                report.first_failure.future_id,
                report.first_failure.message
            )
        }
        DeploymentResult::Cancelled {
            succeeded,
            not_started,
        } => {
            println!(
                "ignis trace: deploy status=cancelled succeeded={} not_started={}",
                succeeded.len(),
                not_started.len()
            );
            bail!("deployment cancelled; re-run deploy to resume")
        }
    }
}

async fn execute_status_command(module_name: &str, deployment: &DeploymentArgs) -> Result<()> {
    let layout = layout_for(module_name, deployment)?;
    require_existing(&layout)?;
    let journal = open_journal_store(&layout, deployment.journal_backend.as_deref())
        .await
        .with_context(|| format!("failed to open journal for {}", layout.key()))?;
    let state = journal.snapshot().await;
    println!(
        "ignis trace: status journal={} futures={} last_sequence={}",
        layout.key(),
        state.len(),
        state.last_sequence()
    );
    for (future_id, execution) in state.iter() {
        let mut line = format!(
            "{future_id} state={} attempt={}",
            execution.state, execution.attempt
        );
        if let Some(nonce) = execution.nonce {
            line.push_str(&format!(" nonce={nonce}"));
        }
        if let Some(result) = &execution.result {
            if let Some(address) = &result.address {
                line.push_str(&format!(" address={address}"));
            }
            if let Some(hash) = &result.transaction_hash {
                line.push_str(&format!(" tx={hash}"));
            }
        } else if let Some(pending) = &execution.pending {
            line.push_str(&format!(" pending_tx={}", pending.transaction_hash));
        }
        if let Some(error) = &execution.error {
            line.push_str(&format!(" error={}: {}", error.kind, error.message));
        }
        println!("{line}");
    }
    journal.close().await;
    Ok(())
}

async fn execute_wipe_command(
    module: &Path,
    future_id: &str,
    force: bool,
    deployment: &DeploymentArgs,
) -> Result<()> {
    let graph = load_graph(module)?;
    let future_id = FutureId::parse(future_id).context("invalid future id")?;
    if !graph.contains(&future_id) {
        bail!("{future_id} is not part of module {}", graph.module_name());
    }
    let layout = layout_for(graph.module_name(), deployment)?;
    require_existing(&layout)?;
    let journal = open_journal_store(&layout, deployment.journal_backend.as_deref())
        .await
        .with_context(|| format!("failed to open journal for {}", layout.key()))?;

    let mut blocking = Vec::new();
    for dependent in graph.transitive_dependents(&future_id) {
        if journal.status(&dependent).await != FutureState::NotStarted {
            blocking.push(dependent.to_string());
        }
    }
    if !blocking.is_empty() {
        bail!(
            "cannot wipe {future_id}: dependents already executed ({}); wipe them first",
            blocking.join(", ")
        );
    }
    let Some(entry) = journal.entry(&future_id).await else {
        bail!("{future_id} has no journal entry to wipe");
    };
    if let Some(pending) = in_flight_transaction(&entry) {
        if !force {
            bail!(
                "cannot wipe {future_id}: it is {} and transaction {} may still land; \
                 deploy again to settle it, or pass --force",
                entry.state,
                pending
            );
        }
        eprintln!("ignis: wiping {future_id} while transaction {pending} may still land");
    }

    let record = journal
        .wipe_future(&future_id)
        .await
        .with_context(|| format!("failed to wipe {future_id}"))?;
    println!(
        "ignis trace: wipe future={future_id} sequence={} state={}",
        record.sequence, record.state
    );
    journal.close().await;
    Ok(())
}

/// A broadcast of `entry` that may still be mined.
fn in_flight_transaction(entry: &FutureExecution) -> Option<String> {
    match (entry.state, &entry.pending, entry.nonce) {
        (FutureState::InProgress | FutureState::Failed, Some(pending), _) => {
            Some(pending.transaction_hash.clone())
        }
        (FutureState::InProgress, None, Some(nonce)) => Some(format!("at nonce {nonce}")),
        _ => None,
    }
}

async fn execute_erase_command(module_name: &str, deployment: &DeploymentArgs) -> Result<()> {
    let layout = layout_for(module_name, deployment)?;
    require_existing(&layout)?;
    layout
        .erase()
        .with_context(|| format!("failed to erase {}", layout.key()))?;
    println!(
        "ignis trace: erase journal={} dir={}",
        layout.key(),
        layout.deployment_dir().display()
    );
    Ok(())
}
