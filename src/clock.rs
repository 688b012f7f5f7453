//! Trial timing: the per-run anchor and the two timestamp classes.
//!
//! Every recorded onset is seconds relative to the run's anchor instant
//! (`T0`). Two classes exist, mirroring the distinction between an intent
//! issued now and a stimulus becoming visible on the next display refresh:
//!
//! - anchored-immediate: stamped at the instant of the call;
//! - anchored-sync: stamped at the next frame boundary reported by a
//!   [`FrameSync`] implementation.
//!
//! Before the anchor is set, every stamp is `None`. Never negative, never
//! dangling.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::progress::now_epoch_ms;

/// Source of display-refresh boundaries.
#[async_trait]
pub trait FrameSync: Send + Sync {
    /// Resolves at the next frame boundary and returns its instant.
    async fn next_frame(&self) -> Instant;
}

/// Frame boundaries synthesized from a fixed refresh period. The
/// production stand-in for a hardware flip signal.
pub struct IntervalFrameSync {
    period: Duration,
    epoch: Instant,
}

impl IntervalFrameSync {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            epoch: Instant::now(),
        }
    }
}

#[async_trait]
impl FrameSync for IntervalFrameSync {
    async fn next_frame(&self) -> Instant {
        let elapsed = self.epoch.elapsed();
        let ticks = elapsed.as_nanos() / self.period.as_nanos().max(1) + 1;
        let target = self.epoch + self.period * ticks as u32;
        tokio::time::sleep_until(target).await;
        Instant::now()
    }
}

/// Frame sync that resolves immediately. For tests and fully headless
/// simulation where no refresh raster exists.
pub struct ImmediateFrameSync;

#[async_trait]
impl FrameSync for ImmediateFrameSync {
    async fn next_frame(&self) -> Instant {
        Instant::now()
    }
}

/// Per-run clock. One instance lives for the whole session; `anchor` is
/// called per the session's anchor policy.
pub struct TrialClock {
    t0: Option<Instant>,
    anchor_epoch_ms: Option<i64>,
    frame_sync: Arc<dyn FrameSync>,
}

impl TrialClock {
    pub fn new(frame_sync: Arc<dyn FrameSync>) -> Self {
        Self {
            t0: None,
            anchor_epoch_ms: None,
            frame_sync,
        }
    }

    /// Sets the anchor to now. Overwrites any previous anchor (per-run
    /// policy re-anchors between runs).
    pub fn anchor(&mut self) {
        self.t0 = Some(Instant::now());
        self.anchor_epoch_ms = Some(now_epoch_ms());
    }

    pub fn is_anchored(&self) -> bool {
        self.t0.is_some()
    }

    /// Wall-clock epoch milliseconds of the current anchor, for the run
    /// record header.
    pub fn anchor_epoch_ms(&self) -> Option<i64> {
        self.anchor_epoch_ms
    }

    /// Seconds from the anchor to `at`. `None` before anchoring.
    pub fn rel(&self, at: Instant) -> Option<f64> {
        self.t0
            .map(|t0| at.saturating_duration_since(t0).as_secs_f64())
    }

    /// Anchored-immediate stamp: "intent issued now".
    pub fn stamp_now(&self) -> Option<f64> {
        self.rel(Instant::now())
    }

    /// Anchored-sync stamp: waits for the next frame boundary, then stamps.
    /// Unanchored clocks return `None` without waiting.
    pub async fn stamp_next_frame(&self) -> Option<f64> {
        self.t0?;
        let at = self.frame_sync.next_frame().await;
        self.rel(at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn stamps_before_anchor_are_none() {
        let clock = TrialClock::new(Arc::new(ImmediateFrameSync));
        assert!(clock.stamp_now().is_none());
        assert!(clock.stamp_next_frame().await.is_none());
        assert!(clock.anchor_epoch_ms().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stamps_are_non_negative_and_monotonic() {
        let mut clock = TrialClock::new(Arc::new(ImmediateFrameSync));
        clock.anchor();

        let a = clock.stamp_now().unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        let b = clock.stamp_now().unwrap();

        assert!(a >= 0.0);
        assert!(b >= a + 0.24, "a={a} b={b}");
    }

    #[tokio::test(start_paused = true)]
    async fn frame_sync_stamp_lands_on_a_later_boundary() {
        let frame_sync = Arc::new(IntervalFrameSync::new(Duration::from_millis(16)));
        let mut clock = TrialClock::new(frame_sync);
        clock.anchor();

        let immediate = clock.stamp_now().unwrap();
        let flipped = clock.stamp_next_frame().await.unwrap();
        assert!(flipped >= immediate);
    }

    #[tokio::test(start_paused = true)]
    async fn re_anchor_resets_the_zero_point() {
        let mut clock = TrialClock::new(Arc::new(ImmediateFrameSync));
        clock.anchor();
        tokio::time::sleep(Duration::from_secs(10)).await;
        clock.anchor();
        let t = clock.stamp_now().unwrap();
        assert!(t < 1.0, "expected fresh anchor, got {t}");
    }
}
