//! On-disk layout of deployments: `<root>/<network>/<module>/`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use ignis_core::write_text_atomic;
use ignis_types::FutureState;

use crate::backend::{
    resolve_journal_backend, JournalBackendKind, ResolvedJournalBackend, JSONL_FILE_NAME,
};
use crate::jsonl::{DEFAULT_LOCK_STALE_AFTER, DEFAULT_LOCK_TIMEOUT};
use crate::locking::acquire_journal_lock;
use crate::{
    ExecutionState, InMemoryJournalBackend, JournalError, JournalKey, JournalResult,
    JournalStore, JsonlJournalBackend, SqliteJournalBackend,
};

const DEPLOYED_ADDRESSES_FILE_NAME: &str = "deployed_addresses.json";

/// Paths belonging to one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentLayout {
    root: PathBuf,
    key: JournalKey,
}

impl DeploymentLayout {
    pub fn new(deployments_dir: impl Into<PathBuf>, key: JournalKey) -> Self {
        Self {
            root: deployments_dir.into(),
            key,
        }
    }

    pub fn key(&self) -> &JournalKey {
        &self.key
    }

    pub fn deployment_dir(&self) -> PathBuf {
        self.root.join(self.key.network()).join(self.key.module())
    }

    pub fn deployed_addresses_path(&self) -> PathBuf {
        self.deployment_dir().join(DEPLOYED_ADDRESSES_FILE_NAME)
    }

    pub fn resolve_backend(&self, requested: Option<&str>) -> JournalResult<ResolvedJournalBackend> {
        resolve_journal_backend(&self.deployment_dir(), requested)
    }

    /// Deletes the journal, the address file and, when empty, the directory.
    ///
    /// Files are removed without replaying them, so a corrupt journal can
    /// still be erased. A live JSONL writer holds the lock and makes this
    /// fail with [`JournalError::LockTimeout`].
    pub fn erase(&self) -> JournalResult<()> {
        let dir = self.deployment_dir();
        if !dir.exists() {
            return Ok(());
        }
        let jsonl_path = dir.join(JSONL_FILE_NAME);
        let lock = acquire_journal_lock(
            &jsonl_path.with_extension("lock"),
            DEFAULT_LOCK_TIMEOUT,
            DEFAULT_LOCK_STALE_AFTER,
        )?;

        remove_if_exists(&self.deployed_addresses_path())?;
        for kind in [JournalBackendKind::Jsonl, JournalBackendKind::Sqlite] {
            if let Some(file_name) = kind.file_name() {
                let path = dir.join(file_name);
                remove_if_exists(&path)?;
                for suffix in ["-wal", "-shm"] {
                    remove_if_exists(&PathBuf::from(format!("{}{suffix}", path.display())))?;
                }
            }
        }
        drop(lock);

        if fs::read_dir(&dir).map(|mut entries| entries.next().is_none()).unwrap_or(false) {
            fs::remove_dir(&dir)?;
        }
        tracing::info!(journal = %self.key, "erased deployment");
        Ok(())
    }
}

/// Resolves the backend for `layout` and replays its journal.
pub async fn open_journal_store(
    layout: &DeploymentLayout,
    requested_backend: Option<&str>,
) -> JournalResult<JournalStore> {
    let resolved = layout.resolve_backend(requested_backend)?;
    tracing::debug!(
        journal = %layout.key(),
        backend = %resolved.kind,
        reason_code = %resolved.reason_code,
        "resolved journal backend"
    );
    let key = layout.key().clone();
    match resolved.kind {
        JournalBackendKind::Jsonl => {
            let backend = JsonlJournalBackend::open(&resolved.path, key.clone())?;
            JournalStore::open(key, backend).await
        }
        JournalBackendKind::Sqlite => {
            let backend = SqliteJournalBackend::open(&resolved.path, key.clone())?;
            JournalStore::open(key, backend).await
        }
        JournalBackendKind::InMemory => JournalStore::open(key, InMemoryJournalBackend::new()).await,
    }
}

/// Writes `{future_id: address}` for every successful future that produced one.
pub fn write_deployed_addresses(
    deployment_dir: &Path,
    state: &ExecutionState,
) -> JournalResult<PathBuf> {
    let addresses: BTreeMap<&str, &str> = state
        .iter()
        .filter(|(_, execution)| execution.state == FutureState::Success)
        .filter_map(|(id, execution)| {
            execution
                .result
                .as_ref()
                .and_then(|result| result.address.as_deref())
                .map(|address| (id.as_str(), address))
        })
        .collect();
    let path = deployment_dir.join(DEPLOYED_ADDRESSES_FILE_NAME);
    let mut rendered = serde_json::to_string_pretty(&addresses)?;
    rendered.push('\n');
    write_text_atomic(&path, &rendered).map_err(JournalError::file)?;
    Ok(path)
}

fn remove_if_exists(path: &Path) -> JournalResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error.into()),
    }
}
