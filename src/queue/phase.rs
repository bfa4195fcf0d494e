//! Processing phases.

use serde::{Deserialize, Serialize};

/// Named stage of the fixed processing order. Declaration order is the
/// queue order within a round.
///
/// | Phase | Delayed |
/// |-------|---------|
/// | `Inference` ... `PostInstantiation` | no |
/// | `NegativeFeedback`, `Anneal`, `Training`, `Counting` | yes |
///
/// A delayed phase pushes its steps to [`MAX_ROUND`](super::MAX_ROUND):
/// they run only once every round has drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    Inference,
    Linking,
    Fired,
    LinkUpdate,
    Instantiation,
    PostInstantiation,
    NegativeFeedback,
    Anneal,
    Training,
    Counting,
}

impl Phase {
    pub const ALL: [Phase; 10] = [
        Phase::Inference,
        Phase::Linking,
        Phase::Fired,
        Phase::LinkUpdate,
        Phase::Instantiation,
        Phase::PostInstantiation,
        Phase::NegativeFeedback,
        Phase::Anneal,
        Phase::Training,
        Phase::Counting,
    ];

    pub fn is_delayed(self) -> bool {
        matches!(
            self,
            Phase::NegativeFeedback | Phase::Anneal | Phase::Training | Phase::Counting
        )
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
