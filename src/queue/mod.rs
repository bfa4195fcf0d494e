//! # Step Scheduler
//!
//! A deterministic discrete-event queue. Steps are drained strictly in
//! [`QueueKey`] order:
//!
//! ```text
//!   (round asc) → (phase asc) → (sort value desc) → (timestamp asc)
//! ```
//!
//! ## Lifecycle
//!
//! ```text
//!   unqueued ──add_step──▶ queued ──drain──▶ processing ──▶ unqueued
//!                            │                   │
//!                      remove_step        StepOutcome::Requeue
//! ```
//!
//! ## Rounds
//!
//! The queue tracks a current round. It rises to the round of each
//! processed step (delayed steps excepted) and is advanced explicitly by
//! [`Queue::increment_round`]. New steps land in the current round, or the
//! next one if they ask for it; steps of delayed phases always land in
//! [`MAX_ROUND`].
//!
//! ## Draining
//!
//! Draining is driven through [`QueueProvider`], implemented by whatever
//! context owns the queue, so a step receives that context mutably while
//! it runs. A filter skips rejected steps for the current pass without
//! removing them.

pub mod phase;
pub mod key;
pub mod steps;

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};
use std::time::{Duration, Instant};

use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub use phase::Phase;
pub use key::{QueueKey, Timestamp, MAX_ROUND, sort_value};
pub use steps::{Anneal, Annealing, FnStep};

/// Identifier of a step, stable for the lifetime of its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StepId(pub u64);

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the queue does with a step once `process` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum StepOutcome {
    Done,
    /// Enqueue the same step again under its id.
    Requeue,
}

/// Deferred unit of work processed against a context `C`.
pub trait Step<C>: Send {
    fn phase(&self) -> Phase;

    /// Initial sort value, see [`sort_value`].
    fn sort_value(&self) -> i64 {
        0
    }

    /// Schedule into the round after the current one.
    fn next_round(&self) -> bool {
        false
    }

    /// Category shown to drain filters.
    fn name(&self) -> &str;

    fn process(&mut self, ctx: &mut C) -> StepOutcome;
}

/// Result of one drain pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessStats {
    pub processed: usize,
    /// Steps rejected by the filter and left queued.
    pub skipped: usize,
    pub remaining: usize,
    pub elapsed: Duration,
    /// The pass took longer than the queue's timeout.
    pub timed_out: bool,
}

// ============================================================================
// Queue
// ============================================================================

pub struct Queue<C> {
    steps: HashMap<StepId, Box<dyn Step<C>>>,
    keys: HashMap<StepId, QueueKey>,
    order: BTreeMap<QueueKey, StepId>,
    round: u32,
    timestamp_counter: u64,
    timestamp_on_process: Timestamp,
    current: Option<(StepId, QueueKey)>,
    next_step_id: u64,
    timeout: Option<Duration>,
    /// Smallest key inserted since a drain last looked.
    lowest_insert: Option<QueueKey>,
}

impl<C> Default for Queue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> std::fmt::Debug for Queue<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("len", &self.order.len())
            .field("round", &self.round)
            .field("timestamp", &self.timestamp_counter)
            .field("current", &self.current)
            .finish()
    }
}

impl<C> Queue<C> {
    pub fn new() -> Self {
        Self {
            steps: HashMap::new(),
            keys: HashMap::new(),
            order: BTreeMap::new(),
            round: 0,
            timestamp_counter: 0,
            timestamp_on_process: Timestamp::NOT_SET,
            current: None,
            next_step_id: 0,
            timeout: None,
            lowest_insert: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    // ========================================================================
    // Timestamps & rounds
    // ========================================================================

    pub fn next_timestamp(&mut self) -> Timestamp {
        let ts = Timestamp(self.timestamp_counter);
        self.timestamp_counter += 1;
        ts
    }

    /// The timestamp the next call to [`next_timestamp`](Self::next_timestamp) returns.
    pub fn current_timestamp(&self) -> Timestamp {
        Timestamp(self.timestamp_counter)
    }

    /// Timestamp stamped on the step processed most recently.
    pub fn timestamp_on_process(&self) -> Timestamp {
        self.timestamp_on_process
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn increment_round(&mut self) {
        self.round = self.round.saturating_add(1);
    }

    fn round_for(&self, phase: Phase, next_round: bool) -> u32 {
        if phase.is_delayed() {
            MAX_ROUND
        } else {
            self.round.saturating_add(u32::from(next_round)).min(MAX_ROUND - 1)
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    // ========================================================================
    // Enqueue / remove
    // ========================================================================

    /// Enqueues a new step in the current round (or the next, or
    /// [`MAX_ROUND`] for delayed phases).
    pub fn add_step(&mut self, step: Box<dyn Step<C>>) -> StepId {
        let round = self.round_for(step.phase(), step.next_round());
        let id = self.allocate_id();
        self.enqueue(id, step, round)
    }

    /// Enqueues a new step in an explicit round. Delayed phases still go
    /// to [`MAX_ROUND`].
    pub fn add_step_at_round(&mut self, step: Box<dyn Step<C>>, round: u32) -> StepId {
        let round = if step.phase().is_delayed() { MAX_ROUND } else { round };
        let id = self.allocate_id();
        self.enqueue(id, step, round)
    }

    /// Puts a step that was taken out with [`remove_step`](Self::remove_step)
    /// back under its old id.
    pub fn requeue(&mut self, id: StepId, step: Box<dyn Step<C>>) -> Result<()> {
        if self.keys.contains_key(&id) || self.current.is_some_and(|(cur, _)| cur == id) {
            return Err(Error::AlreadyQueued(id));
        }
        if id.0 >= self.next_step_id {
            return Err(Error::NotFound(format!("step {id}")));
        }
        let round = self.round_for(step.phase(), step.next_round());
        self.enqueue(id, step, round);
        Ok(())
    }

    fn allocate_id(&mut self) -> StepId {
        let id = StepId(self.next_step_id);
        self.next_step_id += 1;
        id
    }

    fn enqueue(&mut self, id: StepId, step: Box<dyn Step<C>>, round: u32) -> StepId {
        let key = QueueKey::new(round, step.phase(), step.sort_value(), self.next_timestamp());
        tracing::trace!(step = %id, name = step.name(), %key, "step added");
        self.order.insert(key, id);
        self.lowest_insert = Some(self.lowest_insert.map_or(key, |low| low.min(key)));
        self.keys.insert(id, key);
        self.steps.insert(id, step);
        id
    }

    /// Withdraws a still-queued step before it fires.
    pub fn remove_step(&mut self, id: StepId) -> Result<Box<dyn Step<C>>> {
        let key = self.keys.remove(&id).ok_or(Error::NotQueued(id))?;
        self.order.remove(&key);
        self.steps.remove(&id).ok_or(Error::NotQueued(id))
    }

    /// Moves a queued step to a new sort value, keeping its round, phase
    /// and insertion timestamp.
    pub fn update_sort_value(&mut self, id: StepId, sort_value: i64) -> Result<()> {
        let key = self.keys.get_mut(&id).ok_or(Error::NotQueued(id))?;
        if key.sort_value() == sort_value {
            return Ok(());
        }
        self.order.remove(key);
        *key = key.with_sort_value(sort_value);
        self.order.insert(*key, id);
        self.lowest_insert = Some(self.lowest_insert.map_or(*key, |low| low.min(*key)));
        Ok(())
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn is_queued(&self, id: StepId) -> bool {
        self.keys.contains_key(&id)
    }

    pub fn key(&self, id: StepId) -> Option<QueueKey> {
        self.keys.get(&id).copied()
    }

    pub fn step(&self, id: StepId) -> Option<&dyn Step<C>> {
        self.steps.get(&id).map(|s| s.as_ref())
    }

    /// The step being processed right now.
    pub fn current_step(&self) -> Option<StepId> {
        self.current.map(|(id, _)| id)
    }

    pub fn current_key(&self) -> Option<QueueKey> {
        self.current.map(|(_, key)| key)
    }

    /// Queued steps in drain order.
    pub fn iter(&self) -> impl Iterator<Item = (StepId, QueueKey, &dyn Step<C>)> {
        self.order
            .iter()
            .filter_map(|(key, id)| self.steps.get(id).map(|s| (*id, *key, s.as_ref())))
    }

    // ========================================================================
    // Draining internals
    // ========================================================================

    /// First step after `cursor` that the pass has not skipped.
    fn head(&self, cursor: Option<QueueKey>, skipped: &HashSet<StepId>) -> Option<(QueueKey, StepId)> {
        self.order
            .range((cursor.map_or(Unbounded, Excluded), Unbounded))
            .find(|(_, id)| !skipped.contains(*id))
            .map(|(key, id)| (*key, *id))
    }

    fn begin(&mut self, id: StepId) -> Option<Box<dyn Step<C>>> {
        let key = self.keys.remove(&id)?;
        self.order.remove(&key);
        let step = self.steps.remove(&id)?;

        if key.round() != MAX_ROUND && self.round < key.round() {
            self.round = key.round();
        }
        self.timestamp_on_process = self.next_timestamp();
        self.current = Some((id, key));
        tracing::trace!(step = %id, name = step.name(), %key, ts = %self.timestamp_on_process, "processing step");
        Some(step)
    }

    fn finish(&mut self, id: StepId, step: Box<dyn Step<C>>, outcome: StepOutcome) {
        self.current = None;
        if outcome == StepOutcome::Requeue {
            let round = self.round_for(step.phase(), step.next_round());
            self.enqueue(id, step, round);
        }
    }
}

// ============================================================================
// QueueProvider
// ============================================================================

/// A context that owns a queue and is handed to its steps.
pub trait QueueProvider: Sized + 'static {
    fn queue(&self) -> &Queue<Self>;
    fn queue_mut(&mut self) -> &mut Queue<Self>;

    /// Drains until the queue is empty.
    fn process(&mut self) -> ProcessStats {
        drain(self, &|_| true, None)
    }

    /// Drains every step the filter accepts. Rejected steps stay queued.
    fn process_filtered<F>(&mut self, filter: F) -> ProcessStats
    where
        F: Fn(&dyn Step<Self>) -> bool,
    {
        drain(self, &filter, None)
    }

    /// Drains until the head of the queue lies beyond `max_round`, or
    /// beyond `max_phase` when given.
    fn process_until(&mut self, max_round: u32, max_phase: Option<Phase>) -> ProcessStats {
        drain(self, &|_| true, Some((max_round, max_phase)))
    }
}

fn drain<C: QueueProvider>(
    ctx: &mut C,
    filter: &dyn Fn(&dyn Step<C>) -> bool,
    limit: Option<(u32, Option<Phase>)>,
) -> ProcessStats {
    let started = Instant::now();
    let mut skipped = HashSet::new();
    let mut stats = ProcessStats::default();
    // Every queued key at or below the cursor belongs to a skipped step.
    let mut cursor: Option<QueueKey> = None;

    loop {
        if let Some(low) = ctx.queue_mut().lowest_insert.take()
            && cursor.is_some_and(|c| low <= c)
        {
            cursor = None;
        }
        let Some((key, id)) = ctx.queue().head(cursor, &skipped) else {
            break;
        };
        if let Some((max_round, max_phase)) = limit
            && key.exceeds(max_round, max_phase)
        {
            break;
        }
        if !ctx.queue().step(id).is_some_and(filter) {
            skipped.insert(id);
            cursor = Some(key);
            continue;
        }
        let Some(mut step) = ctx.queue_mut().begin(id) else {
            continue;
        };
        let outcome = step.process(ctx);
        ctx.queue_mut().finish(id, step, outcome);
        stats.processed += 1;
    }

    let queue = ctx.queue();
    stats.skipped = skipped.iter().filter(|id| queue.is_queued(**id)).count();
    stats.remaining = queue.len();
    stats.elapsed = started.elapsed();
    stats.timed_out = queue.timeout().is_some_and(|t| stats.elapsed > t);
    if stats.timed_out {
        tracing::warn!(elapsed = ?stats.elapsed, processed = stats.processed, "queue pass exceeded timeout");
    }
    stats
}
