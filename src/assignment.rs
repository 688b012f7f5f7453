//! Counterbalancing primitives: permutation, rotation, alternation.
//!
//! These are the only sources of randomness in plan generation. Callers
//! inject the RNG so a seeded `StdRng` makes a whole session plan
//! reproducible.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// One of the two response sides. The numeric codes (right=1, left=2)
/// are part of the run-record contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Side {
    Right,
    Left,
}

impl Side {
    pub fn code(self) -> u8 {
        match self {
            Side::Right => 1,
            Side::Left => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Right => "right",
            Side::Left => "left",
        }
    }
}

impl From<Side> for u8 {
    fn from(s: Side) -> u8 {
        s.code()
    }
}

impl TryFrom<u8> for Side {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Side::Right),
            2 => Ok(Side::Left),
            other => Err(format!("invalid side code: {other}")),
        }
    }
}

/// Uniformly random permutation of `0..n` (Fisher–Yates, unbiased).
pub fn permute(rng: &mut impl Rng, n: usize) -> Vec<usize> {
    let mut out: Vec<usize> = (0..n).collect();
    for i in (1..n).rev() {
        let j = rng.gen_range(0..=i);
        out.swap(i, j);
    }
    out
}

/// Right-rotation by `k mod len`. Always returns an owned copy, including
/// for `k % len == 0`.
pub fn rotate_right<T: Clone>(list: &[T], k: usize) -> Vec<T> {
    let n = list.len();
    if n == 0 {
        return Vec::new();
    }
    let k = k % n;
    let mut out = Vec::with_capacity(n);
    out.extend_from_slice(&list[n - k..]);
    out.extend_from_slice(&list[..n - k]);
    out
}

/// The other side. Applied run-to-run this yields a strict alternation.
pub fn alternate(prev: Side) -> Side {
    match prev {
        Side::Right => Side::Left,
        Side::Left => Side::Right,
    }
}

/// Uniform draw for the first executed run's side.
pub fn random_side(rng: &mut impl Rng) -> Side {
    if rng.gen_bool(0.5) {
        Side::Right
    } else {
        Side::Left
    }
}
