//! JSONL journal backend: one `meta` line followed by one `entry` line per record.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use ignis_core::{append_line_durable, read_nonblank_lines};
use ignis_types::JournalRecord;
use serde::{Deserialize, Serialize};

use crate::backend::{JournalBackend, JournalBackendKind};
use crate::locking::{acquire_journal_lock, JournalLock};
use crate::{JournalError, JournalKey, JournalResult, JOURNAL_SCHEMA_VERSION};

pub(crate) const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
pub(crate) const DEFAULT_LOCK_STALE_AFTER: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct JournalMeta {
    schema_version: u32,
    network: String,
    module: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record_type", rename_all = "snake_case")]
enum JournalLine {
    Meta(JournalMeta),
    Entry(JournalRecord),
}

/// Append-only JSONL journal guarded by a sibling `.lock` file.
#[derive(Debug)]
pub struct JsonlJournalBackend {
    path: PathBuf,
    key: JournalKey,
    lock: JournalLock,
}

impl JsonlJournalBackend {
    /// Opens (or creates) the journal at `path` for `key`.
    pub fn open(path: impl AsRef<Path>, key: JournalKey) -> JournalResult<Self> {
        Self::open_with_lock_policy(path, key, DEFAULT_LOCK_TIMEOUT, DEFAULT_LOCK_STALE_AFTER)
    }

    pub fn open_with_lock_policy(
        path: impl AsRef<Path>,
        key: JournalKey,
        lock_timeout: Duration,
        lock_stale_after: Duration,
    ) -> JournalResult<Self> {
        let path = path.as_ref().to_path_buf();
        let lock = acquire_journal_lock(&path.with_extension("lock"), lock_timeout, lock_stale_after)?;
        let backend = Self { path, key, lock };
        backend.repair_torn_tail()?;
        backend.ensure_header()?;
        Ok(backend)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        self.lock.path()
    }

    fn meta(&self) -> JournalMeta {
        JournalMeta {
            schema_version: JOURNAL_SCHEMA_VERSION,
            network: self.key.network().to_string(),
            module: self.key.module().to_string(),
        }
    }

    fn ensure_header(&self) -> JournalResult<()> {
        let lines = read_nonblank_lines(&self.path).map_err(JournalError::file)?;
        let Some((line_number, first)) = lines.first() else {
            let header = serde_json::to_string(&JournalLine::Meta(self.meta()))?;
            return append_line_durable(&self.path, &header).map_err(JournalError::file);
        };
        match self.parse_line(*line_number, first)? {
            JournalLine::Meta(meta) => self.check_meta(&meta),
            JournalLine::Entry(_) => Err(self.corrupt(*line_number, "first line must be meta")),
        }
    }

    fn check_meta(&self, meta: &JournalMeta) -> JournalResult<()> {
        if meta.schema_version > JOURNAL_SCHEMA_VERSION {
            return Err(JournalError::UnsupportedSchema {
                path: self.path.display().to_string(),
                found: meta.schema_version,
                supported: JOURNAL_SCHEMA_VERSION,
            });
        }
        if meta.network != self.key.network() || meta.module != self.key.module() {
            return Err(JournalError::KeyMismatch {
                path: self.path.display().to_string(),
                expected: self.key.to_string(),
                found: format!("{}/{}", meta.network, meta.module),
            });
        }
        Ok(())
    }

    /// Drops a partial trailing line left by a crash during append.
    fn repair_torn_tail(&self) -> JournalResult<()> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(error) => return Err(error.into()),
        };
        if raw.is_empty() || raw.ends_with(b"\n") {
            return Ok(());
        }

        let tail_start = raw
            .iter()
            .rposition(|byte| *byte == b'\n')
            .map(|index| index + 1)
            .unwrap_or(0);
        let tail = String::from_utf8_lossy(&raw[tail_start..]);
        if serde_json::from_str::<JournalLine>(tail.trim()).is_ok() {
            let mut file = OpenOptions::new().append(true).open(&self.path)?;
            file.write_all(b"\n")?;
            file.sync_data()?;
            return Ok(());
        }

        tracing::warn!(
            journal = %self.path.display(),
            dropped_bytes = raw.len() - tail_start,
            "discarding torn journal tail"
        );
        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(tail_start as u64)?;
        file.sync_data()?;
        Ok(())
    }

    fn parse_line(&self, line_number: usize, line: &str) -> JournalResult<JournalLine> {
        serde_json::from_str(line).map_err(|error| self.corrupt(line_number, &error.to_string()))
    }

    fn corrupt(&self, line_number: usize, message: &str) -> JournalError {
        JournalError::CorruptRecord {
            location: format!("{}:{line_number}", self.path.display()),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl JournalBackend for JsonlJournalBackend {
    fn kind(&self) -> JournalBackendKind {
        JournalBackendKind::Jsonl
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn load(&self) -> JournalResult<Vec<JournalRecord>> {
        let lines = read_nonblank_lines(&self.path).map_err(JournalError::file)?;
        let mut records = Vec::with_capacity(lines.len().saturating_sub(1));
        for (index, (line_number, line)) in lines.iter().enumerate() {
            match self.parse_line(*line_number, line)? {
                JournalLine::Meta(meta) if index == 0 => self.check_meta(&meta)?,
                JournalLine::Meta(_) => {
                    return Err(self.corrupt(*line_number, "unexpected meta line"));
                }
                JournalLine::Entry(_) if index == 0 => {
                    return Err(self.corrupt(*line_number, "first line must be meta"));
                }
                JournalLine::Entry(record) => records.push(record),
            }
        }
        Ok(records)
    }

    async fn append(&self, record: &JournalRecord) -> JournalResult<()> {
        self.lock.touch()?;
        if !self.path.exists() {
            self.ensure_header()?;
        }
        let line = serde_json::to_string(&JournalLine::Entry(record.clone()))?;
        append_line_durable(&self.path, &line).map_err(JournalError::file)
    }

    async fn erase(&self) -> JournalResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}
