//! General-purpose steps.

use super::{Phase, QueueProvider, Step, StepOutcome};

// ============================================================================
// FnStep
// ============================================================================

/// A step backed by a closure.
pub struct FnStep<C> {
    name: String,
    phase: Phase,
    sort_value: i64,
    next_round: bool,
    f: Box<dyn FnMut(&mut C) -> StepOutcome + Send>,
}

impl<C> FnStep<C> {
    /// Runs `f` once.
    pub fn new(name: impl Into<String>, phase: Phase, mut f: impl FnMut(&mut C) + Send + 'static) -> Self {
        Self::repeating(name, phase, move |ctx| {
            f(ctx);
            StepOutcome::Done
        })
    }

    /// Runs `f` until it returns [`StepOutcome::Done`].
    pub fn repeating(
        name: impl Into<String>,
        phase: Phase,
        f: impl FnMut(&mut C) -> StepOutcome + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            phase,
            sort_value: 0,
            next_round: false,
            f: Box::new(f),
        }
    }

    pub fn with_sort_value(mut self, sort_value: i64) -> Self {
        self.sort_value = sort_value;
        self
    }

    pub fn in_next_round(mut self) -> Self {
        self.next_round = true;
        self
    }
}

impl<C> Step<C> for FnStep<C> {
    fn phase(&self) -> Phase { self.phase }
    fn sort_value(&self) -> i64 { self.sort_value }
    fn next_round(&self) -> bool { self.next_round }
    fn name(&self) -> &str { &self.name }

    fn process(&mut self, ctx: &mut C) -> StepOutcome {
        (self.f)(ctx)
    }
}

// ============================================================================
// Anneal
// ============================================================================

/// A context with an annealing level in `[0, 1]`.
pub trait Annealing: QueueProvider {
    fn annealing(&self) -> f64;
    fn set_annealing(&mut self, value: f64);
    fn anneal_step_size(&self) -> f64;
}

/// Raises the annealing level toward 1.0, one round per increment.
///
/// Lives in the delayed [`Phase::Anneal`], so each increment happens only
/// after the current round has settled. The increment grows as the level
/// approaches 1 (`size / (1 - a^2)`).
#[derive(Debug, Clone, Default)]
pub struct Anneal {
    last_step: f64,
}

impl Anneal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size of the most recent increment.
    pub fn last_step(&self) -> f64 {
        self.last_step
    }
}

impl<C: Annealing> Step<C> for Anneal {
    fn phase(&self) -> Phase { Phase::Anneal }
    fn name(&self) -> &str { "anneal" }

    fn process(&mut self, ctx: &mut C) -> StepOutcome {
        let current = ctx.annealing();
        let grad = 1.0 - current * current;
        self.last_step = if grad > 0.0 { ctx.anneal_step_size() / grad } else { 1.0 };
        let next = (current + self.last_step).min(1.0);

        ctx.queue_mut().increment_round();
        ctx.set_annealing(next);
        tracing::debug!(annealing = next, round = ctx.queue().round(), "anneal");

        if next < 1.0 && self.last_step > 0.0 { StepOutcome::Requeue } else { StepOutcome::Done }
    }
}
