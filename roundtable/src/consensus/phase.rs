//! Roundtable round state machine.
//!
//! `Idle → Dispatched(n) → Collecting → Resolving → Reported`

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "workers", rename_all = "snake_case")]
pub enum RoundPhase {
    #[default]
    Idle,
    /// Calls issued to `n` workers
    Dispatched(usize),
    Collecting,
    Resolving,
    Reported,
}

impl RoundPhase {
    /// Whether `next` directly follows `self`
    pub fn can_advance_to(&self, next: RoundPhase) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Dispatched(_))
                | (Self::Dispatched(_), Self::Collecting)
                | (Self::Collecting, Self::Resolving)
                | (Self::Resolving, Self::Reported)
        )
    }

    /// Move to `next`; an illegal transition is a bug and is logged
    pub fn advance(self, next: RoundPhase) -> RoundPhase {
        let legal = self.can_advance_to(next);
        debug_assert!(legal, "illegal round transition {} -> {}", self, next);
        if !legal {
            warn!(from = %self, to = %next, "Illegal round transition");
        }
        debug!(from = %self, to = %next, "Round phase");
        next
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Reported)
    }
}

impl std::fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Dispatched(n) => write!(f, "dispatched({})", n),
            Self::Collecting => write!(f, "collecting"),
            Self::Resolving => write!(f, "resolving"),
            Self::Reported => write!(f, "reported"),
        }
    }
}
