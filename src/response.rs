//! Two-channel response capture with first-valid-input-wins arbitration.
//!
//! Keyboard and touch events share one channel into the arbiter. A capture
//! call owns the receiver for exactly one response window: the valid event
//! with the earliest timestamp latches (arrival order does not matter, so
//! out-of-order delivery from concurrent producers cannot misattribute the
//! response), and the window always runs to its full fixed duration.
//! Tearing down happens on every exit path because the receiver borrow
//! ends with the call.

use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

use crate::assignment::Side;

/// Response label recorded when no valid input arrived in the window.
pub const RESPONSE_NONE: &str = "NA";
/// Reaction-time sentinel for the no-response case. Distinguishable from
/// any real latency, which is always >= 0.
pub const RT_NONE: f64 = -1.0;

/// Right-hand response key.
pub const KEY_RIGHT: char = 'b';
/// Left-hand response key.
pub const KEY_LEFT: char = 'y';

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputSource {
    Keyboard { key: char },
    Touch { x: f64, viewport_width: f64 },
}

#[derive(Debug, Clone, Copy)]
pub struct InputEvent {
    pub source: InputSource,
    pub at: Instant,
}

impl InputEvent {
    pub fn key(key: char, at: Instant) -> Self {
        Self {
            source: InputSource::Keyboard { key },
            at,
        }
    }

    pub fn touch(x: f64, viewport_width: f64, at: Instant) -> Self {
        Self {
            source: InputSource::Touch { x, viewport_width },
            at,
        }
    }

    /// The side this event maps to, or `None` for keys outside the
    /// response set.
    pub fn side(&self) -> Option<Side> {
        match self.source {
            InputSource::Keyboard { key } if key == KEY_RIGHT => Some(Side::Right),
            InputSource::Keyboard { key } if key == KEY_LEFT => Some(Side::Left),
            InputSource::Keyboard { .. } => None,
            InputSource::Touch { x, viewport_width } => {
                if x < viewport_width / 2.0 {
                    Some(Side::Left)
                } else {
                    Some(Side::Right)
                }
            }
        }
    }
}

/// Outcome of one response window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Capture {
    Latched { side: Side, at: Instant },
    None,
}

impl Capture {
    pub fn got_response(&self) -> bool {
        matches!(self, Capture::Latched { .. })
    }
}

/// Arbitrates one bounded response window over the shared input channel.
pub struct ResponseArbiter {
    rx: mpsc::Receiver<InputEvent>,
}

impl ResponseArbiter {
    pub fn new(rx: mpsc::Receiver<InputEvent>) -> Self {
        Self { rx }
    }

    /// Runs a full response window of fixed duration, latching the valid
    /// event with the earliest timestamp at or after the window opens.
    /// Events queued from before the window (stale presses between trials)
    /// are discarded; a later-timestamped event never displaces the latch.
    pub async fn capture(&mut self, window: Duration) -> Capture {
        let opened_at = Instant::now();
        let deadline = opened_at + window;
        let mut latch = Capture::None;

        loop {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Err(_) => break,
                Ok(None) => {
                    // All senders dropped. The window still runs its full
                    // duration; the outcome is whatever latched so far.
                    tokio::time::sleep_until(deadline).await;
                    break;
                }
                Ok(Some(event)) => {
                    if event.at < opened_at {
                        continue;
                    }
                    let earlier = match latch {
                        Capture::None => true,
                        Capture::Latched { at, .. } => event.at < at,
                    };
                    if !earlier {
                        continue;
                    }
                    if let Some(side) = event.side() {
                        tracing::debug!(source = ?event.source, side = side.as_str(), "response latched");
                        latch = Capture::Latched {
                            side,
                            at: event.at,
                        };
                    }
                }
            }
        }

        latch
    }
}

/// Maps a captured side to the truth label the trial's `trueSide` assigns
/// to it. Absent response is `"NA"`.
pub fn judge(side: Option<Side>, true_side: Side) -> &'static str {
    match side {
        None => RESPONSE_NONE,
        Some(s) if s == true_side => "True",
        Some(_) => "False",
    }
}

/// Human-readable mapping description stored in each run record.
pub fn mapping_string(true_side: Side) -> String {
    match true_side {
        Side::Right => "True=right(b/tap-right), False=left(y/tap-left)".to_string(),
        Side::Left => "True=left(y/tap-left), False=right(b/tap-right)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (mpsc::Sender<InputEvent>, ResponseArbiter) {
        let (tx, rx) = mpsc::channel(32);
        (tx, ResponseArbiter::new(rx))
    }

    #[tokio::test(start_paused = true)]
    async fn earliest_of_two_channels_wins() {
        let (tx, mut arbiter) = channel();
        let window = Duration::from_secs(4);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let now = Instant::now();
            tx.send(InputEvent::key(KEY_RIGHT, now)).await.unwrap();
            // Concurrent tap on the other side, a hair later.
            tx.send(InputEvent::touch(10.0, 1000.0, now + Duration::from_millis(1)))
                .await
                .unwrap();
        });

        match arbiter.capture(window).await {
            Capture::Latched { side, .. } => assert_eq!(side, Side::Right),
            Capture::None => panic!("expected a latched response"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn earliest_timestamp_wins_even_delivered_out_of_order() {
        let (tx, mut arbiter) = channel();

        // Two producers racing: the later press happens to reach the
        // channel first.
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let now = Instant::now();
            tx.send(InputEvent::key(KEY_LEFT, now)).await.unwrap();
            tx.send(InputEvent::touch(900.0, 1000.0, now - Duration::from_millis(100)))
                .await
                .unwrap();
        });

        match arbiter.capture(Duration::from_secs(4)).await {
            Capture::Latched { side, .. } => assert_eq!(side, Side::Right),
            Capture::None => panic!("expected a latched response"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn second_genuine_event_after_latch_is_ignored() {
        let (tx, mut arbiter) = channel();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            tx.send(InputEvent::touch(900.0, 1000.0, Instant::now()))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
            tx.send(InputEvent::key(KEY_LEFT, Instant::now())).await.unwrap();
        });

        match arbiter.capture(Duration::from_secs(4)).await {
            Capture::Latched { side, .. } => assert_eq!(side, Side::Right),
            Capture::None => panic!("expected a latched response"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_yields_none_not_a_response() {
        let (_tx, mut arbiter) = channel();
        let started = Instant::now();
        let capture = arbiter.capture(Duration::from_secs(4)).await;
        assert_eq!(capture, Capture::None);
        assert!(started.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_and_invalid_events_are_discarded() {
        let (tx, mut arbiter) = channel();

        // Queued before the window opens: must not latch.
        tx.send(InputEvent::key(KEY_RIGHT, Instant::now())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            // Invalid key inside the window: ignored.
            tx.send(InputEvent::key('q', Instant::now())).await.unwrap();
        });

        let capture = arbiter.capture(Duration::from_secs(1)).await;
        assert_eq!(capture, Capture::None);
    }

    #[tokio::test(start_paused = true)]
    async fn window_runs_full_duration_after_early_latch() {
        let (tx, mut arbiter) = channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.send(InputEvent::key(KEY_LEFT, Instant::now())).await.unwrap();
        });

        let started = Instant::now();
        let capture = arbiter.capture(Duration::from_secs(2)).await;
        assert!(capture.got_response());
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[test]
    fn touch_halves_map_to_sides() {
        let now = Instant::now();
        assert_eq!(InputEvent::touch(100.0, 1000.0, now).side(), Some(Side::Left));
        assert_eq!(InputEvent::touch(900.0, 1000.0, now).side(), Some(Side::Right));
    }

    #[test]
    fn judgement_follows_true_side() {
        assert_eq!(judge(Some(Side::Right), Side::Right), "True");
        assert_eq!(judge(Some(Side::Left), Side::Right), "False");
        assert_eq!(judge(Some(Side::Left), Side::Left), "True");
        assert_eq!(judge(None, Side::Left), RESPONSE_NONE);
    }
}
