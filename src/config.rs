//! Experiment configuration: run/trial counts, phase timing, anchor policy.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// When the per-run time anchor is (re)set.
///
/// `PerRun` re-anchors on every ready confirmation; `PerSession` anchors once
/// before the first executed run. One policy is chosen per deployment and
/// recorded with the data; the default matches the per-run revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorPolicy {
    PerRun,
    PerSession,
}

/// Phase durations in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimingConfig {
    pub fixation_s: f64,
    pub response_s: f64,
    pub feedback_s: f64,
    pub rest_s: f64,
    pub beep_s: f64,
    pub post_gap_s: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            fixation_s: 1.0,
            response_s: 4.0,
            feedback_s: 1.5,
            rest_s: 5.0,
            beep_s: 0.5,
            post_gap_s: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub total_runs: u32,
    pub trials_per_run: usize,
    pub timing: TimingConfig,
    pub anchor_policy: AnchorPolicy,
    /// Simulated display refresh period in seconds (frame-synchronized stamps
    /// land on these boundaries).
    pub frame_period_s: f64,
    /// Upper bound on waiting for a media asset before the phase advances
    /// anyway.
    pub media_fallback_s: f64,
    /// Multiplier applied to all durations; < 1.0 compresses time for
    /// headless simulation. 1.0 for real sessions.
    pub time_scale: f64,
    /// Re-emit the params snapshot after every finalized run, so a crash
    /// mid-session leaves a snapshot current through the last completed run.
    pub params_snapshot_each_run: bool,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            total_runs: 6,
            trials_per_run: 20,
            timing: TimingConfig::default(),
            anchor_policy: AnchorPolicy::PerRun,
            frame_period_s: 1.0 / 60.0,
            media_fallback_s: 10.0,
            time_scale: 1.0,
            params_snapshot_each_run: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ExperimentConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Decode {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.total_runs == 0 {
            return Err(ConfigError::Invalid("total_runs must be >= 1".into()));
        }
        if self.trials_per_run == 0 {
            return Err(ConfigError::Invalid("trials_per_run must be >= 1".into()));
        }
        if self.time_scale <= 0.0 || !self.time_scale.is_finite() {
            return Err(ConfigError::Invalid("time_scale must be > 0".into()));
        }
        if self.frame_period_s <= 0.0 {
            return Err(ConfigError::Invalid("frame_period_s must be > 0".into()));
        }
        if self.media_fallback_s <= 0.0 {
            return Err(ConfigError::Invalid("media_fallback_s must be > 0".into()));
        }
        let t = &self.timing;
        for (name, value) in [
            ("timing.fixation_s", t.fixation_s),
            ("timing.response_s", t.response_s),
            ("timing.feedback_s", t.feedback_s),
            ("timing.rest_s", t.rest_s),
            ("timing.beep_s", t.beep_s),
            ("timing.post_gap_s", t.post_gap_s),
        ] {
            if value <= 0.0 || !value.is_finite() {
                return Err(ConfigError::Invalid(format!("{name} must be > 0")));
            }
        }
        Ok(())
    }

    /// A duration in seconds, with the session's time scale applied.
    pub fn scaled(&self, seconds: f64) -> Duration {
        Duration::from_secs_f64(seconds * self.time_scale)
    }

    pub fn frame_period(&self) -> Duration {
        self.scaled(self.frame_period_s)
    }
}
