//! The per-trial state machine.
//!
//! One trial walks six strictly ordered phases:
//! cue → stimulus → response window → feedback → post gap → rest.
//! Phases never overlap and never loop back; each phase's timestamps are
//! captured before the next phase starts. The machine is the only writer
//! of the live [`RunQuestions`] buffer.
//!
//! Media playback sits behind [`MediaPlayer`]. A failed or hung asset is
//! logged and treated as phase completion (bounded by the configured
//! fallback timeout) so the experiment can never stall on a missing file.

use async_trait::async_trait;
use serde::Serialize;
use std::future::Future;
use tokio::time::Duration;

use crate::clock::TrialClock;
use crate::config::ExperimentConfig;
use crate::plan::TrialConfig;
use crate::response::{judge, Capture, ResponseArbiter, RESPONSE_NONE, RT_NONE};

/// Value every onset slot holds until its phase writes it.
pub const ONSET_SENTINEL: f64 = -1.0;

/// Onset vector layout: indices into the 6-slot per-trial vector.
pub mod onset {
    /// Cue end, frame-synchronized.
    pub const CUE: usize = 0;
    /// Stimulus start, immediate.
    pub const STIMULUS: usize = 1;
    /// Response-window start, frame-synchronized.
    pub const RESPONSE: usize = 2;
    /// Feedback start, immediate.
    pub const FEEDBACK: usize = 3;
    /// Rest start, frame-synchronized.
    pub const REST_START: usize = 4;
    /// Rest end, frame-synchronized.
    pub const REST_END: usize = 5;
}

// =============================================================================
// Run buffer
// =============================================================================

/// Mutable per-run data buffer: parallel arrays indexed by 0-based trial
/// row. Allocated at run start, flushed into a run record at run end.
#[derive(Debug, Clone, Serialize)]
pub struct RunQuestions {
    pub onsets: Vec<[f64; 6]>,
    pub response: Vec<String>,
    pub rt: Vec<f64>,
    #[serde(rename = "sentenceNames")]
    pub sentence_names: Vec<String>,
    #[serde(rename = "truthValue")]
    pub truth_value: Vec<String>,
    #[serde(rename = "type")]
    pub category: Vec<String>,
    #[serde(rename = "gotResp")]
    pub got_resp: Vec<bool>,

    #[serde(skip)]
    onset_writes: Vec<[u8; 6]>,
}

impl RunQuestions {
    pub fn new() -> Self {
        Self {
            onsets: Vec::new(),
            response: Vec::new(),
            rt: Vec::new(),
            sentence_names: Vec::new(),
            truth_value: Vec::new(),
            category: Vec::new(),
            got_resp: Vec::new(),
            onset_writes: Vec::new(),
        }
    }

    pub fn trial_count(&self) -> usize {
        self.onsets.len()
    }

    /// Opens a row for the trial: onsets at the sentinel, bookkeeping
    /// fields from the trial config. Returns the row index.
    pub fn begin_trial(&mut self, cfg: &TrialConfig) -> usize {
        self.onsets.push([ONSET_SENTINEL; 6]);
        self.response.push(RESPONSE_NONE.to_string());
        self.rt.push(RT_NONE);
        self.sentence_names.push(cfg.audio_file.clone());
        self.truth_value.push(cfg.truth_value.clone());
        self.category.push(cfg.category.clone());
        self.got_resp.push(false);
        self.onset_writes.push([0; 6]);
        self.onsets.len() - 1
    }

    fn set_onset(&mut self, row: usize, slot: usize, value: f64) {
        self.onsets[row][slot] = value;
        self.onset_writes[row][slot] += 1;
    }

    /// How many times each onset slot of `row` was written. Exactly one
    /// write per slot is the invariant a completed trial must satisfy.
    pub fn onset_write_counts(&self, row: usize) -> [u8; 6] {
        self.onset_writes[row]
    }
}

impl Default for RunQuestions {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Media boundary
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("media unavailable: {path}")]
    Unavailable { path: String },
    #[error("playback failed for {path}: {message}")]
    Playback { path: String, message: String },
}

/// External collaborator for stimulus playback. Real deployments bridge
/// this to an actual audio/video stack; simulation sleeps the natural
/// durations instead.
#[async_trait]
pub trait MediaPlayer: Send + Sync {
    /// Plays an audio asset; resolves at its natural end.
    async fn play_audio(&self, path: &str) -> Result<(), MediaError>;
    /// Plays a sentence/video pair; resolves when the audio track ends
    /// (the video may continue independently).
    async fn play_audio_with_video(&self, audio: &str, video: &str) -> Result<(), MediaError>;
    /// Starts a looping video backdrop; resolves once playback started.
    async fn start_video_loop(&self, path: &str) -> Result<(), MediaError>;
}

/// Headless player: audio "plays" for a configured duration, video loops
/// start instantly.
pub struct SimulatedMediaPlayer {
    cue_duration: Duration,
    sentence_duration: Duration,
}

impl SimulatedMediaPlayer {
    pub fn new(cue_duration: Duration, sentence_duration: Duration) -> Self {
        Self {
            cue_duration,
            sentence_duration,
        }
    }

    pub fn from_config(config: &ExperimentConfig) -> Self {
        // Sentence recordings average ~2.5 s in the catalogue.
        Self::new(config.scaled(config.timing.beep_s), config.scaled(2.5))
    }
}

#[async_trait]
impl MediaPlayer for SimulatedMediaPlayer {
    async fn play_audio(&self, path: &str) -> Result<(), MediaError> {
        let duration = if path.contains("beep") {
            self.cue_duration
        } else {
            self.sentence_duration
        };
        tokio::time::sleep(duration).await;
        Ok(())
    }

    async fn play_audio_with_video(&self, audio: &str, _video: &str) -> Result<(), MediaError> {
        self.play_audio(audio).await
    }

    async fn start_video_loop(&self, _path: &str) -> Result<(), MediaError> {
        Ok(())
    }
}

// =============================================================================
// State machine
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TrialError {
    #[error("trial started without an anchored clock (run {run_index}, trial {trial_index})")]
    NotAnchored { run_index: u32, trial_index: usize },
}

/// Everything one trial needs, threaded explicitly instead of shared
/// globals. The mutable borrows make the single-writer discipline a
/// compile-time fact.
pub struct TrialContext<'a> {
    pub clock: &'a TrialClock,
    pub arbiter: &'a mut ResponseArbiter,
    pub player: &'a dyn MediaPlayer,
    pub config: &'a ExperimentConfig,
}

/// Awaits a playback future, treating failure or a hang as completion.
async fn play_guarded<F>(label: &str, path: &str, cap: Duration, fut: F)
where
    F: Future<Output = Result<(), MediaError>>,
{
    match tokio::time::timeout(cap, fut).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::warn!(phase = label, path, error = %err, "media failed, advancing phase");
        }
        Err(_) => {
            tracing::warn!(phase = label, path, "media did not complete in time, advancing phase");
        }
    }
}

/// Drives one trial through its phases, filling `row` of `questions`.
pub async fn run_trial(
    ctx: &mut TrialContext<'_>,
    cfg: &TrialConfig,
    questions: &mut RunQuestions,
) -> Result<(), TrialError> {
    let not_anchored = || TrialError::NotAnchored {
        run_index: cfg.run_index,
        trial_index: cfg.trial_index,
    };
    if !ctx.clock.is_anchored() {
        return Err(not_anchored());
    }

    let row = questions.begin_trial(cfg);
    let timing = &ctx.config.timing;
    let cap = ctx.config.scaled(ctx.config.media_fallback_s);
    tracing::debug!(
        run_index = cfg.run_index,
        run_number = cfg.run_number,
        trial_index = cfg.trial_index,
        "trial start"
    );

    // Cue: audibly bounded beep; its natural end is the trial's first
    // frame-synchronized onset.
    play_guarded("cue", &cfg.cue_file, cap, ctx.player.play_audio(&cfg.cue_file)).await;
    let t = ctx.clock.stamp_next_frame().await.ok_or_else(not_anchored)?;
    questions.set_onset(row, onset::CUE, t);

    // Stimulus: sentence audio with the speaking animation; the phase ends
    // with the audio track.
    let t = ctx.clock.stamp_now().ok_or_else(not_anchored)?;
    questions.set_onset(row, onset::STIMULUS, t);
    play_guarded(
        "stimulus",
        &cfg.audio_file,
        cap,
        ctx.player.play_audio_with_video(&cfg.audio_file, &cfg.anim_sentence_file),
    )
    .await;

    // Response window: fixed duration, wait animation looping behind it.
    play_guarded(
        "response_window",
        &cfg.anim_wait_file,
        cap,
        ctx.player.start_video_loop(&cfg.anim_wait_file),
    )
    .await;
    let t = ctx.clock.stamp_next_frame().await.ok_or_else(not_anchored)?;
    questions.set_onset(row, onset::RESPONSE, t);

    let capture = ctx
        .arbiter
        .capture(ctx.config.scaled(timing.response_s))
        .await;
    match capture {
        Capture::Latched { side, at } => {
            questions.response[row] = judge(Some(side), cfg.true_side).to_string();
            questions.rt[row] = ctx.clock.rel(at).ok_or_else(not_anchored)?;
            questions.got_resp[row] = true;
        }
        Capture::None => {
            questions.response[row] = RESPONSE_NONE.to_string();
            questions.rt[row] = RT_NONE;
            questions.got_resp[row] = false;
        }
    }

    // Feedback: success/failure media chosen by whether anything was
    // captured, not by correctness.
    let feedback_file = if questions.got_resp[row] {
        &cfg.feedback_ok_file
    } else {
        &cfg.feedback_not_ok_file
    };
    let t = ctx.clock.stamp_now().ok_or_else(not_anchored)?;
    questions.set_onset(row, onset::FEEDBACK, t);
    play_guarded(
        "feedback",
        feedback_file,
        cap,
        ctx.player.start_video_loop(feedback_file),
    )
    .await;
    tokio::time::sleep(ctx.config.scaled(timing.feedback_s)).await;

    // Post gap: short fixation, no recorded onset.
    tokio::time::sleep(ctx.config.scaled(timing.post_gap_s)).await;

    // Rest: bounded by two frame-synchronized stamps.
    let t = ctx.clock.stamp_next_frame().await.ok_or_else(not_anchored)?;
    questions.set_onset(row, onset::REST_START, t);
    tokio::time::sleep(ctx.config.scaled(timing.rest_s)).await;
    let t = ctx.clock.stamp_next_frame().await.ok_or_else(not_anchored)?;
    questions.set_onset(row, onset::REST_END, t);

    Ok(())
}
