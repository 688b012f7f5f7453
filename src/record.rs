//! Run record assembly and output artifacts.
//!
//! One immutable record per completed run, plus an optional parameter
//! snapshot of the whole session plan. Artifacts are plain JSON files
//! named after the subject and execution index, matching the historical
//! naming (`mathometer_subjXX_run_N.json`).

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::assignment::Side;
use crate::plan::{RunPlan, SessionPlan};
use crate::progress::{now_epoch_ms, ProgressError, ProgressStore, Subject};
use crate::response::mapping_string;
use crate::trial::RunQuestions;

/// Snapshot of one completed run. Written once, never revised.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub subject_number: u32,
    pub run_index: u32,
    pub run_number: u32,
    pub run_order: Vec<u32>,
    pub true_side: Side,
    pub mapping: String,
    #[serde(rename = "TTLonset_ms")]
    pub ttl_onset_ms: i64,
    pub questions: RunQuestions,
}

/// The per-subject plan minus runtime-only fields, emitted at session
/// start (and optionally after each run).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamsSnapshot {
    pub subject_number: u32,
    pub run_order: Vec<u32>,
    pub last_run_completed: u32,
    pub runs: Vec<RunParamsSnapshot>,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunParamsSnapshot {
    pub run_index: u32,
    pub run_number: u32,
    pub true_side: Side,
    #[serde(flatten)]
    pub params: crate::plan::RunParams,
}

impl ParamsSnapshot {
    pub fn from_plan(plan: &SessionPlan) -> Self {
        Self {
            subject_number: plan.subject.number(),
            run_order: plan.run_order.clone(),
            last_run_completed: plan.last_run_completed,
            runs: plan
                .runs
                .iter()
                .map(|run| RunParamsSnapshot {
                    run_index: run.run_index,
                    run_number: run.run_number,
                    true_side: run.true_side,
                    params: run.params.clone(),
                })
                .collect(),
            created_at_ms: now_epoch_ms(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("record sink lock poisoned")]
    Poisoned,
    #[error("progress store error: {0}")]
    Progress(#[from] ProgressError),
}

/// Destination for session artifacts.
pub trait RecordSink: Send + Sync {
    fn record_run(&self, record: &RunRecord) -> Result<(), RecordError>;
    fn record_params(&self, snapshot: &ParamsSnapshot) -> Result<(), RecordError>;
    /// Per-run refresh of the params snapshot, named after the run it
    /// followed. Only called when the session is configured for it.
    fn record_params_after_run(
        &self,
        snapshot: &ParamsSnapshot,
        run_index: u32,
    ) -> Result<(), RecordError>;
}

// =============================================================================
// Directory sink
// =============================================================================

/// Writes pretty JSON artifacts into an output directory.
pub struct DirRecordSink {
    dir: PathBuf,
}

impl DirRecordSink {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, RecordError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|source| RecordError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        Ok(Self { dir })
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<(), RecordError> {
        let path = self.dir.join(name);
        let body = serde_json::to_string_pretty(value)?;
        std::fs::write(&path, body).map_err(|source| RecordError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

impl RecordSink for DirRecordSink {
    fn record_run(&self, record: &RunRecord) -> Result<(), RecordError> {
        let name = format!(
            "mathometer_subj{:02}_run_{}.json",
            record.subject_number, record.run_index
        );
        self.write_json(&name, record)
    }

    fn record_params(&self, snapshot: &ParamsSnapshot) -> Result<(), RecordError> {
        let name = format!("mathometer_subj{:02}_params.json", snapshot.subject_number);
        self.write_json(&name, snapshot)
    }

    fn record_params_after_run(
        &self,
        snapshot: &ParamsSnapshot,
        run_index: u32,
    ) -> Result<(), RecordError> {
        let name = format!(
            "mathometer_subj{:02}_params_after_run_{}.json",
            snapshot.subject_number, run_index
        );
        self.write_json(&name, snapshot)
    }
}

// =============================================================================
// In-memory sink
// =============================================================================

/// Collects artifacts in memory. Tests and dry runs.
#[derive(Default)]
pub struct MemoryRecordSink {
    runs: Mutex<Vec<RunRecord>>,
    params: Mutex<Vec<ParamsSnapshot>>,
    params_after_runs: Mutex<Vec<(u32, ParamsSnapshot)>>,
}

impl MemoryRecordSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        self.runs.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn params(&self) -> Vec<ParamsSnapshot> {
        self.params.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn params_after_runs(&self) -> Vec<(u32, ParamsSnapshot)> {
        self.params_after_runs
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

impl RecordSink for MemoryRecordSink {
    fn record_run(&self, record: &RunRecord) -> Result<(), RecordError> {
        self.runs
            .lock()
            .map_err(|_| RecordError::Poisoned)?
            .push(record.clone());
        Ok(())
    }

    fn record_params(&self, snapshot: &ParamsSnapshot) -> Result<(), RecordError> {
        self.params
            .lock()
            .map_err(|_| RecordError::Poisoned)?
            .push(snapshot.clone());
        Ok(())
    }

    fn record_params_after_run(
        &self,
        snapshot: &ParamsSnapshot,
        run_index: u32,
    ) -> Result<(), RecordError> {
        self.params_after_runs
            .lock()
            .map_err(|_| RecordError::Poisoned)?
            .push((run_index, snapshot.clone()));
        Ok(())
    }
}

// =============================================================================
// Run finalization
// =============================================================================

/// Advances the progress store (monotonic, idempotent), assembles the
/// immutable run record and emits it. Consumes the live buffer; nothing
/// can touch it afterwards.
pub async fn finalize_run(
    store: &dyn ProgressStore,
    sink: &dyn RecordSink,
    subject: Subject,
    run: &RunPlan,
    run_order: &[u32],
    ttl_onset_ms: i64,
    questions: RunQuestions,
) -> Result<(), RecordError> {
    store.advance(subject, run.run_index).await?;

    let record = RunRecord {
        subject_number: subject.number(),
        run_index: run.run_index,
        run_number: run.run_number,
        run_order: run_order.to_vec(),
        true_side: run.true_side,
        mapping: mapping_string(run.true_side),
        ttl_onset_ms,
        questions,
    };
    sink.record_run(&record)?;
    tracing::info!(
        subject = %subject.key(),
        run_index = run.run_index,
        run_number = run.run_number,
        trials = record.questions.trial_count(),
        "run record written"
    );
    Ok(())
}
