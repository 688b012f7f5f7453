//! Per-subject persisted progress: run order and last completed run.
//!
//! The record keeps a subject resumable across sessions: the run order is
//! written once and never changes, and `last_run_completed` only moves
//! forward. A corrupt stored row is treated as absent so generation can
//! fail open to a fresh permutation.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Subject identifier, integer >= 1. The storage key is the zero-padded
/// decimal form (`"07"`), matching the artifact naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subject(u32);

impl Subject {
    pub fn new(n: u32) -> Option<Self> {
        (n >= 1).then_some(Self(n))
    }

    pub fn number(self) -> u32 {
        self.0
    }

    pub fn key(self) -> String {
        format!("{:02}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub run_order: Vec<u32>,
    pub last_run_completed: u32,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("progress store lock poisoned")]
    Poisoned,
}

/// Persistence contract for subject progress.
///
/// `save` is only ever called for a subject with no existing record (the
/// generator checks `load` first); `advance` is the sole mutation after
/// that and never regresses `last_run_completed`.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn load(&self, subject: Subject) -> Result<Option<ProgressRecord>, ProgressError>;
    async fn save(&self, subject: Subject, record: &ProgressRecord) -> Result<(), ProgressError>;
    async fn advance(
        &self,
        subject: Subject,
        completed_run_index: u32,
    ) -> Result<(), ProgressError>;
    /// Removes the subject's record. Operator tooling only.
    async fn reset(&self, subject: Subject) -> Result<(), ProgressError>;
}

pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

// =============================================================================
// SQLite store
// =============================================================================

#[derive(Clone)]
pub struct SqliteProgressStore {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteProgressStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, ProgressError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA synchronous=NORMAL;\
             CREATE TABLE IF NOT EXISTS subject_progress (\
               subject_key TEXT PRIMARY KEY,\
               run_order TEXT NOT NULL,\
               last_run_completed INTEGER NOT NULL,\
               created_at_ms INTEGER NOT NULL,\
               updated_at_ms INTEGER NOT NULL\
             );",
        )?;
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ProgressStore for SqliteProgressStore {
    async fn load(&self, subject: Subject) -> Result<Option<ProgressRecord>, ProgressError> {
        let conn = self.conn.lock().map_err(|_| ProgressError::Poisoned)?;
        let row: Option<(String, i64, i64, i64)> = conn
            .query_row(
                "SELECT run_order, last_run_completed, created_at_ms, updated_at_ms \
                 FROM subject_progress WHERE subject_key = ?1",
                params![subject.key()],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((run_order_json, last, created, updated)) = row else {
            return Ok(None);
        };

        // Corrupt rows decode as absent: the generator then regenerates and
        // overwrites. Never fatal.
        let run_order: Vec<u32> = match serde_json::from_str(&run_order_json) {
            Ok(order) => order,
            Err(err) => {
                tracing::warn!(
                    subject = %subject.key(),
                    error = %err,
                    "corrupt run_order in progress store, treating record as absent"
                );
                return Ok(None);
            }
        };
        if last < 0 {
            tracing::warn!(
                subject = %subject.key(),
                last_run_completed = last,
                "negative last_run_completed in progress store, treating record as absent"
            );
            return Ok(None);
        }

        Ok(Some(ProgressRecord {
            run_order,
            last_run_completed: last as u32,
            created_at_ms: created,
            updated_at_ms: updated,
        }))
    }

    async fn save(&self, subject: Subject, record: &ProgressRecord) -> Result<(), ProgressError> {
        let run_order_json =
            serde_json::to_string(&record.run_order).unwrap_or_else(|_| "[]".to_string());
        let conn = self.conn.lock().map_err(|_| ProgressError::Poisoned)?;
        conn.execute(
            "INSERT OR REPLACE INTO subject_progress \
             (subject_key, run_order, last_run_completed, created_at_ms, updated_at_ms) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                subject.key(),
                run_order_json,
                record.last_run_completed,
                record.created_at_ms,
                record.updated_at_ms
            ],
        )?;
        Ok(())
    }

    async fn advance(
        &self,
        subject: Subject,
        completed_run_index: u32,
    ) -> Result<(), ProgressError> {
        let conn = self.conn.lock().map_err(|_| ProgressError::Poisoned)?;
        conn.execute(
            "UPDATE subject_progress \
             SET last_run_completed = MAX(last_run_completed, ?2), updated_at_ms = ?3 \
             WHERE subject_key = ?1",
            params![subject.key(), completed_run_index, now_epoch_ms()],
        )?;
        Ok(())
    }

    async fn reset(&self, subject: Subject) -> Result<(), ProgressError> {
        let conn = self.conn.lock().map_err(|_| ProgressError::Poisoned)?;
        conn.execute(
            "DELETE FROM subject_progress WHERE subject_key = ?1",
            params![subject.key()],
        )?;
        Ok(())
    }
}

// =============================================================================
// In-memory store
// =============================================================================

/// HashMap-backed store for tests and headless simulation.
#[derive(Default)]
pub struct MemoryProgressStore {
    records: Mutex<HashMap<String, ProgressRecord>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn load(&self, subject: Subject) -> Result<Option<ProgressRecord>, ProgressError> {
        let records = self.records.lock().map_err(|_| ProgressError::Poisoned)?;
        Ok(records.get(&subject.key()).cloned())
    }

    async fn save(&self, subject: Subject, record: &ProgressRecord) -> Result<(), ProgressError> {
        let mut records = self.records.lock().map_err(|_| ProgressError::Poisoned)?;
        records.insert(subject.key(), record.clone());
        Ok(())
    }

    async fn advance(
        &self,
        subject: Subject,
        completed_run_index: u32,
    ) -> Result<(), ProgressError> {
        let mut records = self.records.lock().map_err(|_| ProgressError::Poisoned)?;
        if let Some(record) = records.get_mut(&subject.key()) {
            record.last_run_completed = record.last_run_completed.max(completed_run_index);
            record.updated_at_ms = now_epoch_ms();
        }
        Ok(())
    }

    async fn reset(&self, subject: Subject) -> Result<(), ProgressError> {
        let mut records = self.records.lock().map_err(|_| ProgressError::Poisoned)?;
        records.remove(&subject.key());
        Ok(())
    }
}
