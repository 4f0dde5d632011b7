//! State transitions emitted by the engine for collaborators to persist and
//! report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deadline::DeadlineKind;
use crate::ids::{TeamId, TopicId};
use crate::ledger::TopicOccupancy;
use crate::model::Topic;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transition {
    Confirmed {
        team: TeamId,
        topic: TopicId,
    },
    Waitlisted {
        team: TeamId,
        topic: TopicId,
    },
    /// A waitlisted record became confirmed.
    Promoted {
        team: TeamId,
        topic: TopicId,
    },
    Released {
        team: TeamId,
        topic: TopicId,
        was_waitlisted: bool,
    },
    /// Waitlist entry dropped because the team got confirmed elsewhere.
    WithdrawnFromWaitlist {
        team: TeamId,
        topic: TopicId,
    },
    /// A confirmed record was carried over to another topic.
    Moved {
        team: TeamId,
        from: TopicId,
        to: TopicId,
    },
    CapacityChanged {
        topic: TopicId,
        from: u32,
        to: u32,
    },
    TopicCreated {
        topic: Topic,
    },
    TopicUpdated {
        topic: Topic,
    },
    TopicRemoved {
        topic: TopicId,
    },
    TopicPublished {
        topic: TopicId,
    },
    BidSet {
        team: TeamId,
        topic: TopicId,
        priority: u32,
    },
    BidRemoved {
        team: TeamId,
        topic: TopicId,
    },
    TopicDeadlineSet {
        topic: TopicId,
        kind: DeadlineKind,
        round: u32,
        due_at: DateTime<Utc>,
    },
    TopicDeadlineCleared {
        topic: TopicId,
        kind: DeadlineKind,
        round: u32,
    },
}

/// The result of an engine operation together with the transitions that
/// produced it. An empty transition list means nothing changed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct Applied<T> {
    pub outcome: T,
    pub transitions: Vec<Transition>,
}

impl<T> Applied<T> {
    pub const fn new(outcome: T, transitions: Vec<Transition>) -> Self {
        Self {
            outcome,
            transitions,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Applied<U> {
        Applied {
            outcome: f(self.outcome),
            transitions: self.transitions,
        }
    }

    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn promoted(&self) -> impl Iterator<Item = (TeamId, TopicId)> + '_ {
        self.transitions.iter().filter_map(|transition| match transition {
            Transition::Promoted { team, topic } => Some((*team, *topic)),
            _ => None,
        })
    }
}

impl Applied<()> {
    pub const fn from_transitions(transitions: Vec<Transition>) -> Self {
        Self::new((), transitions)
    }
}

/// What a service call hands back: the outcome, what changed, and the
/// occupancy of every topic afterwards for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[must_use]
pub struct Receipt<T> {
    pub outcome: T,
    pub transitions: Vec<Transition>,
    pub occupancy: Vec<TopicOccupancy>,
}

impl<T> Receipt<T> {
    #[must_use]
    pub fn promoted_count(&self) -> usize {
        self.transitions
            .iter()
            .filter(|transition| matches!(transition, Transition::Promoted { .. }))
            .count()
    }
}
