//! Scalar operators and their incremental update rules.
//!
//! Every rule answers one question: given that argument `arg` changed by
//! `delta`, by how much does the output change? The answer may only use the
//! triggering delta, the other arguments' current values and the output's
//! own committed value.
//!
//! | Operator | Arity | Output delta | Merge |
//! |----------|-------|--------------|-------|
//! | `Sum` | n | `u` | accumulate |
//! | `Identity` | 1 | `u` | accumulate |
//! | `Addition` | 2 | `u` | accumulate |
//! | `Subtraction` | 2 | `u`, `-u` | accumulate |
//! | `Multiplication` | 2 | `u * other` | accumulate |
//! | `Division` | 2 | `num' / den' - value` | replace |
//! | `Max` | n | `max' - value` | replace |
//! | `Threshold` | 1 | `theta(in') - value` | replace |
//! | `Scale(s)` | 1 | `s * u` | accumulate |
//! | `Invert` | 1 | `-u` | accumulate |
//! | `Exp` | 1 | `exp(in') - value` | replace |
//! | `Mix` | 3 | `u(a - b)`, `x u`, `(1 - x) u` | accumulate |
//!
//! Primed values are updated values (committed value plus in-flight delta).

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::graph::ObjId;
use super::FieldId;

/// How a new delta combines with one already pending for the same field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    Accumulate,
    Replace,
}

/// Argument values an operator may read while computing an update.
pub trait Arguments {
    /// Value of the output field, including an update still in flight.
    fn value(&self) -> f64;

    /// Committed value of a fixed argument, 0 when unconnected.
    fn input_value(&self, arg: usize) -> f64;

    /// Updated value of a fixed argument, 0 when unconnected.
    fn updated_input_value(&self, arg: usize) -> f64;

    /// Every connected input of a variable-arity operator.
    fn candidates(&self) -> Vec<Candidate>;
}

// ============================================================================
// Threshold
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparison {
    Above,
    Below,
    BelowOrEqual,
    AboveAbs,
}

impl Comparison {
    pub fn test(self, x: f64, threshold: f64) -> bool {
        match self {
            Comparison::Above => x > threshold,
            Comparison::Below => x < threshold,
            Comparison::BelowOrEqual => x <= threshold,
            Comparison::AboveAbs => x.abs() > threshold,
        }
    }
}

// ============================================================================
// Max
// ============================================================================

/// One input of a `Max` field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub obj: ObjId,
    pub field: FieldId,
    pub value: f64,
}

/// Preference among candidates whose quantized values are equal.
#[derive(Clone, Default)]
pub enum TieBreak {
    /// Lowest object id wins.
    #[default]
    FirstObject,
    /// Highest object id wins.
    LastObject,
    /// `Greater` means the left candidate wins.
    Custom(Arc<dyn Fn(&Candidate, &Candidate) -> Ordering + Send + Sync>),
}

impl TieBreak {
    fn compare(&self, a: &Candidate, b: &Candidate) -> Ordering {
        match self {
            TieBreak::FirstObject => b.obj.cmp(&a.obj),
            TieBreak::LastObject => a.obj.cmp(&b.obj),
            TieBreak::Custom(f) => f(a, b),
        }
    }
}

impl std::fmt::Debug for TieBreak {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TieBreak::FirstObject => write!(f, "FirstObject"),
            TieBreak::LastObject => write!(f, "LastObject"),
            TieBreak::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MaxConfig {
    /// Inputs at or below zero take part in the selection.
    pub allow_negative: bool,
    /// Values are compared after scaling by this and rounding.
    pub precision: f64,
    pub tie_break: TieBreak,
}

impl Default for MaxConfig {
    fn default() -> Self {
        Self {
            allow_negative: false,
            precision: 1000.0,
            tie_break: TieBreak::default(),
        }
    }
}

impl MaxConfig {
    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    pub fn allowing_negative(mut self) -> Self {
        self.allow_negative = true;
        self
    }

    fn quantize(&self, v: f64) -> i64 {
        (v * self.precision).round() as i64
    }

    fn is_comparable(&self, c: &Candidate) -> bool {
        self.allow_negative || c.value > 0.0
    }

    /// The winning candidate, `None` if nothing is comparable.
    pub fn select(&self, candidates: &[Candidate]) -> Option<Candidate> {
        candidates
            .iter()
            .filter(|c| self.is_comparable(c))
            .copied()
            .reduce(|best, c| {
                let ord = self
                    .quantize(c.value)
                    .cmp(&self.quantize(best.value))
                    .then_with(|| self.tie_break.compare(&c, &best));
                if ord == Ordering::Greater { c } else { best }
            })
    }
}

// ============================================================================
// Operator
// ============================================================================

#[derive(Debug, Clone)]
pub enum Operator {
    /// Variable-arity sum, also used for plain input fields.
    Sum,
    Identity,
    Addition,
    Subtraction,
    Multiplication,
    Division,
    Max(MaxConfig),
    Threshold {
        threshold: f64,
        comparison: Comparison,
        /// Once the output exceeds 0.5 it no longer changes.
        sticky: bool,
    },
    Scale(f64),
    /// `1 - x`
    Invert,
    Exp,
    /// `x * a + (1 - x) * b` over arguments `(x, a, b)`.
    Mix,
}

impl Operator {
    /// Fixed argument count, `None` for variable arity.
    pub fn arity(&self) -> Option<usize> {
        match self {
            Operator::Sum | Operator::Max(_) => None,
            Operator::Identity
            | Operator::Threshold { .. }
            | Operator::Scale(_)
            | Operator::Invert
            | Operator::Exp => Some(1),
            Operator::Addition
            | Operator::Subtraction
            | Operator::Multiplication
            | Operator::Division => Some(2),
            Operator::Mix => Some(3),
        }
    }

    pub fn update_mode(&self, _arg: Option<usize>) -> UpdateMode {
        match self {
            Operator::Division
            | Operator::Max(_)
            | Operator::Threshold { .. }
            | Operator::Exp => UpdateMode::Replace,
            _ => UpdateMode::Accumulate,
        }
    }

    /// Output delta caused by `delta` on argument `arg`.
    pub fn compute_update(&self, arg: Option<usize>, delta: f64, args: &dyn Arguments) -> f64 {
        let arg = arg.unwrap_or(0);
        match self {
            Operator::Sum | Operator::Identity | Operator::Addition => delta,
            Operator::Subtraction => if arg == 0 { delta } else { -delta },
            Operator::Multiplication => delta * args.input_value(1 - arg.min(1)),
            Operator::Division => {
                let next = divide(args.updated_input_value(0), args.updated_input_value(1));
                next - args.value()
            }
            Operator::Max(cfg) => max_update(cfg, &args.candidates(), args.value()).1,
            Operator::Threshold { threshold, comparison, sticky } => {
                if *sticky && args.value() > 0.5 {
                    return 0.0;
                }
                let next = if comparison.test(args.updated_input_value(0), *threshold) { 1.0 } else { 0.0 };
                next - args.value()
            }
            Operator::Scale(s) => s * delta,
            Operator::Invert => -delta,
            Operator::Exp => guarded_exp(args.updated_input_value(0)) - args.value(),
            Operator::Mix => match arg {
                0 => delta * (args.input_value(1) - args.input_value(2)),
                1 => args.input_value(0) * delta,
                _ => (1.0 - args.input_value(0)) * delta,
            },
        }
    }

    /// Closed-form value over fixed arguments, or over all inputs for the
    /// variable-arity operators.
    pub fn evaluate(&self, args: &[f64]) -> f64 {
        let at = |i: usize| args.get(i).copied().unwrap_or(0.0);
        match self {
            Operator::Sum => args.iter().sum(),
            Operator::Identity => at(0),
            Operator::Addition => at(0) + at(1),
            Operator::Subtraction => at(0) - at(1),
            Operator::Multiplication => at(0) * at(1),
            Operator::Division => divide(at(0), at(1)),
            Operator::Max(cfg) => args
                .iter()
                .copied()
                .filter(|v| cfg.allow_negative || *v > 0.0)
                .reduce(f64::max)
                .unwrap_or(0.0),
            Operator::Threshold { threshold, comparison, .. } => {
                if comparison.test(at(0), *threshold) { 1.0 } else { 0.0 }
            }
            Operator::Scale(s) => s * at(0),
            Operator::Invert => 1.0 - at(0),
            Operator::Exp => guarded_exp(at(0)),
            Operator::Mix => at(0) * at(1) + (1.0 - at(0)) * at(2),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operator::Sum => "sum",
            Operator::Identity => "identity",
            Operator::Addition => "addition",
            Operator::Subtraction => "subtraction",
            Operator::Multiplication => "multiplication",
            Operator::Division => "division",
            Operator::Max(_) => "max",
            Operator::Threshold { .. } => "threshold",
            Operator::Scale(_) => "scale",
            Operator::Invert => "invert",
            Operator::Exp => "exp",
            Operator::Mix => "mix",
        }
    }
}

/// Selection and output delta of a `Max` field.
pub fn max_update(cfg: &MaxConfig, candidates: &[Candidate], value: f64) -> (Option<Candidate>, f64) {
    let selected = cfg.select(candidates);
    let next = selected.map_or(0.0, |c| c.value);
    (selected, next - value)
}

fn divide(num: f64, den: f64) -> f64 {
    if den == 0.0 { 0.0 } else { num / den }
}

fn guarded_exp(x: f64) -> f64 {
    let v = x.exp();
    if v.is_finite() { v } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        value: f64,
        committed: Vec<f64>,
        updated: Vec<f64>,
    }

    impl Arguments for Fixed {
        fn value(&self) -> f64 { self.value }
        fn input_value(&self, arg: usize) -> f64 { self.committed.get(arg).copied().unwrap_or(0.0) }
        fn updated_input_value(&self, arg: usize) -> f64 { self.updated.get(arg).copied().unwrap_or(0.0) }
        fn candidates(&self) -> Vec<Candidate> { Vec::new() }
    }

    fn cand(obj: u32, value: f64) -> Candidate {
        Candidate { obj: ObjId(obj), field: FieldId(0), value }
    }

    #[test]
    fn test_multiplication_uses_other_argument() {
        let args = Fixed { value: 12.0, committed: vec![3.0, 4.0], updated: vec![5.0, 4.0] };
        assert_eq!(Operator::Multiplication.compute_update(Some(0), 2.0, &args), 8.0);
        assert_eq!(Operator::Multiplication.compute_update(Some(1), -1.0, &args), -3.0);
    }

    #[test]
    fn test_division_by_zero_is_neutral() {
        let args = Fixed { value: 0.0, committed: vec![25.0, 0.0], updated: vec![25.0, 0.0] };
        assert_eq!(Operator::Division.compute_update(Some(0), 25.0, &args), 0.0);
        assert_eq!(Operator::Division.evaluate(&[25.0, 0.0]), 0.0);

        let args = Fixed { value: 0.0, committed: vec![25.0, 0.0], updated: vec![25.0, 5.0] };
        assert_eq!(Operator::Division.compute_update(Some(1), 5.0, &args), 5.0);
    }

    #[test]
    fn test_threshold_sticky_latches() {
        let op = Operator::Threshold { threshold: 0.5, comparison: Comparison::Above, sticky: true };
        let rising = Fixed { value: 0.0, committed: vec![0.0], updated: vec![0.8] };
        assert_eq!(op.compute_update(Some(0), 0.8, &rising), 1.0);

        let falling = Fixed { value: 1.0, committed: vec![0.8], updated: vec![0.1] };
        assert_eq!(op.compute_update(Some(0), -0.7, &falling), 0.0);
    }

    #[test]
    fn test_comparisons() {
        assert!(Comparison::Above.test(1.0, 0.5));
        assert!(!Comparison::Above.test(0.5, 0.5));
        assert!(Comparison::BelowOrEqual.test(0.5, 0.5));
        assert!(Comparison::Below.test(0.4, 0.5));
        assert!(Comparison::AboveAbs.test(-0.6, 0.5));
    }

    #[test]
    fn test_max_skips_negative_unless_allowed() {
        let cands = [cand(1, -3.0), cand(2, -1.0)];
        assert_eq!(MaxConfig::default().select(&cands), None);
        let picked = MaxConfig::default().allowing_negative().select(&cands);
        assert_eq!(picked.map(|c| c.obj), Some(ObjId(2)));
    }

    #[test]
    fn test_max_skips_zero_inputs() {
        let cands = [cand(1, 0.0), cand(2, 0.0)];
        assert_eq!(MaxConfig::default().select(&cands).map(|c| c.obj), None);
        assert_eq!(Operator::Max(MaxConfig::default()).evaluate(&[0.0, -2.0]), 0.0);

        let picked = MaxConfig::default().select(&[cand(1, 0.0), cand(2, 0.001)]);
        assert_eq!(picked.map(|c| c.obj), Some(ObjId(2)));
    }

    #[test]
    fn test_max_tie_break_is_configurable() {
        let cands = [cand(1, 0.5), cand(2, 0.5), cand(3, 0.2)];
        let first = MaxConfig::default().select(&cands);
        assert_eq!(first.map(|c| c.obj), Some(ObjId(1)));

        let last = MaxConfig::default().with_tie_break(TieBreak::LastObject).select(&cands);
        assert_eq!(last.map(|c| c.obj), Some(ObjId(2)));

        let custom = MaxConfig::default()
            .with_tie_break(TieBreak::Custom(Arc::new(|a: &Candidate, b: &Candidate| {
                (a.obj.0 % 2).cmp(&(b.obj.0 % 2))
            })));
        assert_eq!(custom.select(&cands).map(|c| c.obj), Some(ObjId(1)));
    }

    #[test]
    fn test_mix_rules_match_closed_form() {
        let args = Fixed { value: 0.0, committed: vec![0.25, 8.0, 4.0], updated: vec![0.25, 8.0, 4.0] };
        let before = Operator::Mix.evaluate(&[0.25, 8.0, 4.0]);
        let after = Operator::Mix.evaluate(&[0.75, 8.0, 4.0]);
        assert!((Operator::Mix.compute_update(Some(0), 0.5, &args) - (after - before)).abs() < 1e-12);
    }

    #[test]
    fn test_exp_overflow_is_neutral() {
        assert_eq!(Operator::Exp.evaluate(&[1e6]), 0.0);
        assert!((Operator::Exp.evaluate(&[5.0]) - 148.413159).abs() < 1e-6);
    }
}
