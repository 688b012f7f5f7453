//! Session runner: resume, per-run confirmation, anchoring, run loop.
//!
//! A session executes every run the subject has not yet completed, in
//! execution order. Each run goes through operator confirmation and a
//! ready step, gets anchored per the configured policy, runs its trials
//! through the state machine, then finalizes into one run record. A
//! session interrupted between trials discards the partial run; resumption
//! restarts at the next un-completed run, never mid-run.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use crate::clock::{FrameSync, TrialClock};
use crate::config::{AnchorPolicy, ExperimentConfig};
use crate::plan::SessionPlan;
use crate::progress::ProgressStore;
use crate::record::{finalize_run, ParamsSnapshot, RecordError, RecordSink};
use crate::response::{InputEvent, ResponseArbiter};
use crate::trial::{run_trial, MediaPlayer, RunQuestions, TrialContext, TrialError};

/// Stand-in for the confirmation and ready screens. Real deployments block
/// on operator/subject input; simulation proceeds immediately.
#[async_trait]
pub trait Operator: Send + Sync {
    async fn confirm_run(&self, run_index: u32, run_number: u32);
    /// Returning from `ready` is the instant the run is (re)anchored.
    async fn ready(&self, run_index: u32);
}

/// Operator that never waits.
pub struct AutoOperator;

#[async_trait]
impl Operator for AutoOperator {
    async fn confirm_run(&self, run_index: u32, run_number: u32) {
        tracing::info!(run_index, run_number, "run confirmed");
    }

    async fn ready(&self, run_index: u32) {
        tracing::info!(run_index, "ready");
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("trial error: {0}")]
    Trial(#[from] TrialError),
    #[error("record error: {0}")]
    Record(#[from] RecordError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The subject had already completed every run; nothing executed.
    AlreadyComplete,
    Completed { runs_executed: u32 },
}

/// External collaborators for one session, threaded explicitly.
pub struct SessionDeps {
    pub store: Arc<dyn ProgressStore>,
    pub sink: Arc<dyn RecordSink>,
    pub player: Arc<dyn MediaPlayer>,
    pub operator: Arc<dyn Operator>,
    pub frame_sync: Arc<dyn FrameSync>,
    pub input_rx: mpsc::Receiver<InputEvent>,
}

/// Runs every remaining run of the plan. Returns without executing
/// anything when the subject is already done.
pub async fn run_session(
    deps: SessionDeps,
    plan: &SessionPlan,
    config: &ExperimentConfig,
) -> Result<SessionOutcome, SessionError> {
    if plan.last_run_completed >= config.total_runs {
        tracing::info!(
            subject = %plan.subject.key(),
            "subject has already completed all runs"
        );
        return Ok(SessionOutcome::AlreadyComplete);
    }

    deps.sink.record_params(&ParamsSnapshot::from_plan(plan))?;

    let mut clock = TrialClock::new(deps.frame_sync.clone());
    let mut arbiter = ResponseArbiter::new(deps.input_rx);
    let mut runs_executed = 0u32;

    for run in &plan.runs {
        if run.run_index <= plan.last_run_completed {
            continue;
        }

        deps.operator.confirm_run(run.run_index, run.run_number).await;
        deps.operator.ready(run.run_index).await;

        match config.anchor_policy {
            AnchorPolicy::PerRun => clock.anchor(),
            AnchorPolicy::PerSession => {
                if !clock.is_anchored() {
                    clock.anchor();
                }
            }
        }

        // Fixation before the first cue of the run.
        tokio::time::sleep(config.scaled(config.timing.fixation_s)).await;

        let mut questions = RunQuestions::new();
        for trial in &run.trials {
            let mut ctx = TrialContext {
                clock: &clock,
                arbiter: &mut arbiter,
                player: deps.player.as_ref(),
                config,
            };
            run_trial(&mut ctx, trial, &mut questions).await?;
        }

        let ttl_onset_ms = clock.anchor_epoch_ms().unwrap_or(-1);
        finalize_run(
            deps.store.as_ref(),
            deps.sink.as_ref(),
            plan.subject,
            run,
            &plan.run_order,
            ttl_onset_ms,
            questions,
        )
        .await?;
        runs_executed += 1;

        if config.params_snapshot_each_run {
            let mut snapshot = ParamsSnapshot::from_plan(plan);
            snapshot.last_run_completed = run.run_index;
            deps.sink.record_params_after_run(&snapshot, run.run_index)?;
        }
    }

    tracing::info!(
        subject = %plan.subject.key(),
        runs_executed,
        "session complete"
    );
    Ok(SessionOutcome::Completed { runs_executed })
}

/// Spawns a headless responder that presses the given keys in rotation at
/// a fixed cadence. Exits once the session drops the receiving end.
pub fn spawn_scripted_responder(
    tx: mpsc::Sender<InputEvent>,
    cadence: Duration,
    keys: Vec<char>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if keys.is_empty() {
            return;
        }
        let mut i = 0usize;
        loop {
            tokio::time::sleep(cadence).await;
            let event = InputEvent::key(keys[i % keys.len()], Instant::now());
            if tx.send(event).await.is_err() {
                break;
            }
            i += 1;
        }
    })
}
