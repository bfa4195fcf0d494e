//! Queue ordering key and timestamps.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use super::Phase;

/// Round of steps in delayed phases: after every finite round.
pub const MAX_ROUND: u32 = u32::MAX;

/// Opaque, totally ordered point in a queue's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const NOT_SET: Timestamp = Timestamp(u64::MAX);

    pub fn is_set(self) -> bool {
        self != Self::NOT_SET
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_set() { write!(f, "{}", self.0) } else { write!(f, "NOT_SET") }
    }
}

/// Quantized magnitude used to order steps within a round and phase.
pub fn sort_value(magnitude: f64, precision: f64) -> i64 {
    (magnitude.abs() * precision) as i64
}

/// Position of a queued step.
///
/// Ordered by round, then phase, then sort value (larger first), then
/// insertion timestamp. Timestamps are unique per queue, so the order is
/// total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueKey {
    round: u32,
    phase: Phase,
    sort_value: i64,
    timestamp: Timestamp,
}

impl QueueKey {
    pub fn new(round: u32, phase: Phase, sort_value: i64, timestamp: Timestamp) -> Self {
        Self { round, phase, sort_value, timestamp }
    }

    pub fn round(&self) -> u32 { self.round }
    pub fn phase(&self) -> Phase { self.phase }
    pub fn sort_value(&self) -> i64 { self.sort_value }
    pub fn timestamp(&self) -> Timestamp { self.timestamp }

    pub(crate) fn with_sort_value(self, sort_value: i64) -> Self {
        Self { sort_value, ..self }
    }

    /// Whether this key lies beyond `max_round` / `max_phase`.
    pub fn exceeds(&self, max_round: u32, max_phase: Option<Phase>) -> bool {
        self.round > max_round || max_phase.is_some_and(|p| self.phase > p)
    }
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.round
            .cmp(&other.round)
            .then(self.phase.cmp(&other.phase))
            .then(other.sort_value.cmp(&self.sort_value))
            .then(self.timestamp.cmp(&other.timestamp))
    }
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for QueueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.round == MAX_ROUND {
            write!(f, "[r:MAX {} sv:{} ts:{}]", self.phase, self.sort_value, self.timestamp)
        } else {
            write!(f, "[r:{} {} sv:{} ts:{}]", self.round, self.phase, self.sort_value, self.timestamp)
        }
    }
}
