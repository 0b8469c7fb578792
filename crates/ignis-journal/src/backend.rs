//! Journal backend contract, the in-memory backend, and backend resolution.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ignis_types::JournalRecord;
use tokio::sync::RwLock;

use crate::{JournalError, JournalResult};

/// Env override for the on-disk journal format (`auto|jsonl|sqlite`).
pub const JOURNAL_BACKEND_ENV: &str = "IGNIS_JOURNAL_BACKEND";

pub(crate) const JSONL_FILE_NAME: &str = "journal.jsonl";
const SQLITE_FILE_NAME: &str = "journal.sqlite";

/// Storage format of a journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalBackendKind {
    InMemory,
    Jsonl,
    Sqlite,
}

impl JournalBackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InMemory => "memory",
            Self::Jsonl => "jsonl",
            Self::Sqlite => "sqlite",
        }
    }

    /// Journal file name inside a deployment directory.
    pub fn file_name(self) -> Option<&'static str> {
        match self {
            Self::InMemory => None,
            Self::Jsonl => Some(JSONL_FILE_NAME),
            Self::Sqlite => Some(SQLITE_FILE_NAME),
        }
    }
}

impl fmt::Display for JournalBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable append-only record log behind a [`crate::JournalStore`].
///
/// `append` must not return until the record survives a process crash.
#[async_trait]
pub trait JournalBackend: Send + Sync {
    fn kind(&self) -> JournalBackendKind;

    /// Human readable location, used in logs and CLI output.
    fn describe(&self) -> String;

    /// Every persisted record in append order.
    async fn load(&self) -> JournalResult<Vec<JournalRecord>>;

    async fn append(&self, record: &JournalRecord) -> JournalResult<()>;

    /// Deletes all persisted records.
    async fn erase(&self) -> JournalResult<()>;
}

/// Volatile backend for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryJournalBackend {
    records: RwLock<Vec<JournalRecord>>,
}

impl InMemoryJournalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the backend, e.g. to simulate a journal left behind by a crash.
    pub fn with_records(records: Vec<JournalRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    pub async fn records(&self) -> Vec<JournalRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl JournalBackend for InMemoryJournalBackend {
    fn kind(&self) -> JournalBackendKind {
        JournalBackendKind::InMemory
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn load(&self) -> JournalResult<Vec<JournalRecord>> {
        Ok(self.records.read().await.clone())
    }

    async fn append(&self, record: &JournalRecord) -> JournalResult<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn erase(&self) -> JournalResult<()> {
        self.records.write().await.clear();
        Ok(())
    }
}

/// Backend choice plus the reason it was picked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedJournalBackend {
    pub kind: JournalBackendKind,
    pub path: PathBuf,
    pub reason_code: String,
}

/// Resolves the journal format for a deployment directory.
///
/// `requested` wins when given; otherwise [`JOURNAL_BACKEND_ENV`] is read.
/// `auto` (or nothing) prefers an existing journal file and defaults to JSONL.
pub fn resolve_journal_backend(
    deployment_dir: &Path,
    requested: Option<&str>,
) -> JournalResult<ResolvedJournalBackend> {
    let env_value = match requested {
        Some(value) => Some(value.to_string()),
        None => env::var(JOURNAL_BACKEND_ENV).ok(),
    };
    if let Some(raw) = env_value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        match raw.to_ascii_lowercase().as_str() {
            "auto" => {}
            "jsonl" => {
                return Ok(resolved(
                    deployment_dir,
                    JournalBackendKind::Jsonl,
                    "journal_backend_env_jsonl",
                ))
            }
            "sqlite" => {
                return Ok(resolved(
                    deployment_dir,
                    JournalBackendKind::Sqlite,
                    "journal_backend_env_sqlite",
                ))
            }
            _ => return Err(JournalError::UnsupportedBackend(raw.to_string())),
        }
    }

    infer_journal_backend(deployment_dir)
}

fn infer_journal_backend(deployment_dir: &Path) -> JournalResult<ResolvedJournalBackend> {
    let sqlite_exists = deployment_dir.join(SQLITE_FILE_NAME).exists();
    let jsonl_exists = deployment_dir.join(JSONL_FILE_NAME).exists();
    if sqlite_exists && jsonl_exists {
        return Err(JournalError::File(format!(
            "deployment {} holds both {JSONL_FILE_NAME} and {SQLITE_FILE_NAME}; set {JOURNAL_BACKEND_ENV} to pick one",
            deployment_dir.display()
        )));
    }
    if sqlite_exists {
        return Ok(resolved(
            deployment_dir,
            JournalBackendKind::Sqlite,
            "journal_backend_existing_sqlite",
        ));
    }
    if jsonl_exists {
        return Ok(resolved(
            deployment_dir,
            JournalBackendKind::Jsonl,
            "journal_backend_existing_jsonl",
        ));
    }
    Ok(resolved(
        deployment_dir,
        JournalBackendKind::Jsonl,
        "journal_backend_default_jsonl",
    ))
}

fn resolved(
    deployment_dir: &Path,
    kind: JournalBackendKind,
    reason_code: &str,
) -> ResolvedJournalBackend {
    let file_name = kind.file_name().unwrap_or(JSONL_FILE_NAME);
    ResolvedJournalBackend {
        kind,
        path: deployment_dir.join(file_name),
        reason_code: reason_code.to_string(),
    }
}
