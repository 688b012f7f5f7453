#![forbid(unsafe_code)]

//! # mathometer
//!
//! Sequencing and timing-recording core for a multi-run, two-alternative
//! psychophysical experiment: R runs of T timed trials each, with stimulus
//! playback, keyboard/touch response capture and feedback.
//!
//! Two things make this more than a script. First, counterbalancing is
//! deterministic-but-randomized and resumable: each subject gets one
//! persisted run-order permutation, character assignment is a rotation
//! keyed on the subject number, and the true-response side alternates run
//! to run. Second, every trial stamps six event onsets against a per-run
//! anchor, distinguishing immediate timestamps from frame-synchronized
//! ones, and captures the first valid response from either of two
//! competing input channels.
//!
//! Stimulus rendering, screens and real input devices stay outside, behind
//! the [`trial::MediaPlayer`], [`session::Operator`] and input-channel
//! boundaries.

pub mod assignment;
pub mod clock;
pub mod config;
pub mod content;
pub mod plan;
pub mod progress;
pub mod record;
pub mod response;
pub mod session;
pub mod trial;

pub use assignment::Side;
pub use clock::{FrameSync, ImmediateFrameSync, IntervalFrameSync, TrialClock};
pub use config::{AnchorPolicy, ExperimentConfig, TimingConfig};
pub use plan::{build_session_plan, PlanError, PlanOptions, RunPlan, SessionPlan, TrialConfig};
pub use progress::{
    MemoryProgressStore, ProgressError, ProgressRecord, ProgressStore, SqliteProgressStore,
    Subject,
};
pub use record::{
    DirRecordSink, MemoryRecordSink, ParamsSnapshot, RecordError, RecordSink, RunRecord,
};
pub use response::{Capture, InputEvent, InputSource, ResponseArbiter};
pub use session::{
    run_session, AutoOperator, Operator, SessionDeps, SessionError, SessionOutcome,
};
pub use trial::{MediaPlayer, RunQuestions, SimulatedMediaPlayer, TrialContext, TrialError};
