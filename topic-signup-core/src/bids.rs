//! Ranked topic preferences ("bids") for intelligent assignments.
//!
//! Bids are advisory: they never touch occupancy or waitlist order. This
//! module only keeps each team's ranking free of duplicates and numbered
//! `1..=n` in submitted order.

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use tracing::debug;

use crate::error::SignupError;
use crate::ids::{TeamId, TopicId};
use crate::model::Bid;
use crate::transition::Transition;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BidBook {
    // per team, sorted by priority
    bids: BTreeMap<TeamId, Vec<Bid>>,
}

/// A team's view of the topic list split by whether it already ranked them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicSelection {
    /// Ranked topics in priority order.
    pub ranked: Vec<TopicId>,
    pub remaining: Vec<TopicId>,
}

impl BidBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn load(bids: impl IntoIterator<Item = Bid>) -> Self {
        let bids = bids
            .into_iter()
            .into_group_map_by(|bid| bid.team_id)
            .into_iter()
            .map(|(team, mut bids)| {
                bids.sort_by_key(|bid| (bid.priority, bid.topic_id));
                (team, bids)
            })
            .collect();
        Self { bids }
    }

    #[must_use]
    pub fn bids(&self, team: TeamId) -> &[Bid] {
        self.bids.get(&team).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn all(&self) -> impl Iterator<Item = &Bid> + '_ {
        self.bids.values().flatten()
    }

    /// Replaces the team's ranking. Bids for topics missing from `ordered`
    /// are removed first; the rest get priority `index + 1`, updated in place
    /// when a bid for that topic already exists.
    pub fn set_priorities(
        &mut self,
        team: TeamId,
        ordered: &[TopicId],
    ) -> Result<Vec<Transition>, SignupError> {
        if let Some(topic) = ordered.iter().duplicates().next() {
            return Err(SignupError::DuplicateBid { topic: *topic });
        }
        let existing = self.bids.remove(&team).unwrap_or_default();
        let kept = ordered.iter().copied().collect::<BTreeSet<_>>();

        let mut transitions = existing
            .iter()
            .filter(|bid| !kept.contains(&bid.topic_id))
            .map(|bid| Transition::BidRemoved {
                team,
                topic: bid.topic_id,
            })
            .collect::<Vec<_>>();

        let mut ranked = Vec::with_capacity(ordered.len());
        for (priority, &topic) in (1..).zip(ordered) {
            let unchanged = existing
                .iter()
                .any(|bid| bid.topic_id == topic && bid.priority == priority);
            if !unchanged {
                transitions.push(Transition::BidSet {
                    team,
                    topic,
                    priority,
                });
            }
            ranked.push(Bid {
                team_id: team,
                topic_id: topic,
                priority,
            });
        }
        if !ranked.is_empty() {
            self.bids.insert(team, ranked);
        }
        debug!(%team, count = ordered.len(), changes = transitions.len(), "bids ranked");
        Ok(transitions)
    }

    /// Deselecting every topic.
    pub fn clear(&mut self, team: TeamId) -> Vec<Transition> {
        self.bids
            .remove(&team)
            .unwrap_or_default()
            .into_iter()
            .map(|bid| Transition::BidRemoved {
                team,
                topic: bid.topic_id,
            })
            .collect()
    }

    pub(crate) fn remove_topic(&mut self, topic: TopicId) -> Vec<Transition> {
        let mut transitions = Vec::new();
        for (&team, bids) in &mut self.bids {
            if let Some(index) = bids.iter().position(|bid| bid.topic_id == topic) {
                bids.remove(index);
                transitions.push(Transition::BidRemoved { team, topic });
            }
        }
        self.bids.retain(|_, bids| !bids.is_empty());
        transitions
    }

    /// Splits `listed` (typically the public topics, in display order) into
    /// the ones the team ranked and the rest. Bids on topics outside `listed`
    /// are ignored.
    #[must_use]
    pub fn selection(&self, team: TeamId, listed: &[TopicId]) -> TopicSelection {
        let ranked = self
            .bids(team)
            .iter()
            .map(|bid| bid.topic_id)
            .filter(|topic| listed.contains(topic))
            .collect::<Vec<_>>();
        let remaining = listed
            .iter()
            .copied()
            .filter(|topic| !ranked.contains(topic))
            .collect();
        TopicSelection { ranked, remaining }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEAM: TeamId = TeamId(1);
    const T1: TopicId = TopicId(1);
    const T2: TopicId = TopicId(2);
    const T3: TopicId = TopicId(3);

    fn priorities(book: &BidBook) -> Vec<(TopicId, u32)> {
        book.bids(TEAM)
            .iter()
            .map(|bid| (bid.topic_id, bid.priority))
            .collect()
    }

    #[test]
    fn reranking_twice_is_idempotent() {
        let mut book = BidBook::new();
        book.set_priorities(TEAM, &[T1, T2]).unwrap();
        book.set_priorities(TEAM, &[T2, T1]).unwrap();
        let again = book.set_priorities(TEAM, &[T2, T1]).unwrap();

        assert!(again.is_empty());
        assert_eq!(priorities(&book), vec![(T2, 1), (T1, 2)]);
        assert_eq!(book.all().count(), 2);
    }

    #[test]
    fn topics_left_out_are_removed_before_renumbering() {
        let mut book = BidBook::new();
        book.set_priorities(TEAM, &[T1, T2, T3]).unwrap();
        let transitions = book.set_priorities(TEAM, &[T3, T1]).unwrap();

        assert_eq!(
            transitions[0],
            Transition::BidRemoved {
                team: TEAM,
                topic: T2,
            }
        );
        assert_eq!(priorities(&book), vec![(T3, 1), (T1, 2)]);
    }

    #[test]
    fn duplicate_topics_are_refused_without_change() {
        let mut book = BidBook::new();
        book.set_priorities(TEAM, &[T1]).unwrap();
        assert_eq!(
            book.set_priorities(TEAM, &[T2, T3, T2]),
            Err(SignupError::DuplicateBid { topic: T2 })
        );
        assert_eq!(priorities(&book), vec![(T1, 1)]);
    }

    #[test]
    fn clear_removes_every_bid() {
        let mut book = BidBook::new();
        book.set_priorities(TEAM, &[T1, T2]).unwrap();
        assert_eq!(book.clear(TEAM).len(), 2);
        assert!(book.bids(TEAM).is_empty());
        assert!(book.set_priorities(TEAM, &[]).unwrap().is_empty());
    }

    #[test]
    fn selection_partitions_listed_topics() {
        let mut book = BidBook::new();
        book.set_priorities(TEAM, &[T3, TopicId(99), T1]).unwrap();
        let selection = book.selection(TEAM, &[T1, T2, T3]);

        assert_eq!(selection.ranked, vec![T3, T1]);
        assert_eq!(selection.remaining, vec![T2]);
    }

    #[test]
    fn load_orders_by_priority() {
        let book = BidBook::load([
            Bid {
                team_id: TEAM,
                topic_id: T2,
                priority: 5,
            },
            Bid {
                team_id: TEAM,
                topic_id: T1,
                priority: 2,
            },
        ]);
        assert_eq!(priorities(&book), vec![(T1, 2), (T2, 5)]);
    }
}
