//! SQLite-backed journal with durable, fully synchronous appends.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ignis_types::{FutureState, JournalRecord};
use rusqlite::{params, Connection, OptionalExtension};

use crate::backend::{JournalBackend, JournalBackendKind};
use crate::{JournalError, JournalKey, JournalResult, JOURNAL_SCHEMA_VERSION};

/// Persistent journal stored in a single SQLite database file.
#[derive(Debug)]
pub struct SqliteJournalBackend {
    db_path: PathBuf,
    key: JournalKey,
}

impl SqliteJournalBackend {
    /// Opens the database at `path`, creating schema and meta rows if needed.
    pub fn open(path: impl AsRef<Path>, key: JournalKey) -> JournalResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let backend = Self { db_path, key };
        let connection = backend.open_connection()?;
        backend.initialize_schema(&connection)?;
        backend.check_meta(&connection)?;
        Ok(backend)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open_connection(&self) -> JournalResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            "#,
        )?;
        Ok(connection)
    }

    fn initialize_schema(&self, connection: &Connection) -> JournalResult<()> {
        connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS journal_meta (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                schema_version INTEGER NOT NULL,
                network TEXT NOT NULL,
                module TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS journal_records (
                sequence INTEGER PRIMARY KEY,
                future_id TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                state TEXT NOT NULL,
                record_json TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_journal_records_future
                ON journal_records (future_id, sequence);
            "#,
        )?;
        connection.execute(
            "INSERT OR IGNORE INTO journal_meta (id, schema_version, network, module)
             VALUES (1, ?1, ?2, ?3)",
            params![
                JOURNAL_SCHEMA_VERSION,
                self.key.network(),
                self.key.module()
            ],
        )?;
        Ok(())
    }

    fn check_meta(&self, connection: &Connection) -> JournalResult<()> {
        let meta = connection
            .query_row(
                "SELECT schema_version, network, module FROM journal_meta WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((schema_version, network, module)) = meta else {
            return Err(JournalError::CorruptRecord {
                location: self.db_path.display().to_string(),
                message: "missing journal_meta row".to_string(),
            });
        };
        if schema_version > JOURNAL_SCHEMA_VERSION {
            return Err(JournalError::UnsupportedSchema {
                path: self.db_path.display().to_string(),
                found: schema_version,
                supported: JOURNAL_SCHEMA_VERSION,
            });
        }
        if network != self.key.network() || module != self.key.module() {
            return Err(JournalError::KeyMismatch {
                path: self.db_path.display().to_string(),
                expected: self.key.to_string(),
                found: format!("{network}/{module}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl JournalBackend for SqliteJournalBackend {
    fn kind(&self) -> JournalBackendKind {
        JournalBackendKind::Sqlite
    }

    fn describe(&self) -> String {
        self.db_path.display().to_string()
    }

    async fn load(&self) -> JournalResult<Vec<JournalRecord>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(
            "SELECT sequence, record_json FROM journal_records ORDER BY sequence ASC",
        )?;
        let rows = statement.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (sequence, record_json) = row?;
            let record: JournalRecord =
                serde_json::from_str(&record_json).map_err(|error| JournalError::CorruptRecord {
                    location: format!("{}#{sequence}", self.db_path.display()),
                    message: error.to_string(),
                })?;
            if i64::try_from(record.sequence).ok() != Some(sequence) {
                return Err(JournalError::CorruptRecord {
                    location: format!("{}#{sequence}", self.db_path.display()),
                    message: format!("row holds record with sequence {}", record.sequence),
                });
            }
            records.push(record);
        }
        Ok(records)
    }

    async fn append(&self, record: &JournalRecord) -> JournalResult<()> {
        let connection = self.open_connection()?;
        let sequence =
            i64::try_from(record.sequence).map_err(|_| JournalError::CorruptRecord {
                location: self.db_path.display().to_string(),
                message: format!("sequence {} exceeds sqlite integer range", record.sequence),
            })?;
        connection.execute(
            r#"
            INSERT INTO journal_records (
                sequence, future_id, attempt, state, record_json, recorded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                sequence,
                record.future_id.as_str(),
                record.attempt,
                state_to_db(record.state),
                serde_json::to_string(record)?,
                timestamp_to_db(record.recorded_at),
            ],
        )?;
        Ok(())
    }

    async fn erase(&self) -> JournalResult<()> {
        let connection = self.open_connection()?;
        connection.execute("DELETE FROM journal_records", [])?;
        Ok(())
    }
}

fn state_to_db(state: FutureState) -> &'static str {
    state.as_str()
}

fn timestamp_to_db(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}
