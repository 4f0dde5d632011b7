//! Per-topic occupancy: confirmed teams and an ordered waitlist.
//!
//! Every mutation validates first and only then changes state, so a returned
//! error always means nothing was touched. Waitlists are strictly FIFO by
//! signup order; bids never reorder them.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SignupError;
use crate::ids::{TeamId, TopicId};
use crate::model::SignUpRecord;
use crate::transition::{Applied, Transition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SignupOutcome {
    Confirmed,
    /// 1-based position in the topic's waitlist.
    Waitlisted { position: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Slots {
    max_choosers: u32,
    confirmed: Vec<TeamId>,
    waitlist: VecDeque<TeamId>,
}

impl Slots {
    fn filled(&self) -> u32 {
        u32::try_from(self.confirmed.len()).unwrap_or(u32::MAX)
    }

    fn has_vacancy(&self) -> bool {
        self.filled() < self.max_choosers
    }

    fn holds(&self, team: TeamId) -> bool {
        self.confirmed.contains(&team) || self.waitlist.contains(&team)
    }
}

/// Snapshot of one topic's slots, in signup order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicOccupancy {
    pub topic: TopicId,
    pub max_choosers: u32,
    pub confirmed: Vec<TeamId>,
    pub waitlist: Vec<TeamId>,
}

impl TopicOccupancy {
    #[must_use]
    pub fn slots_filled(&self) -> u32 {
        u32::try_from(self.confirmed.len()).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn slots_waitlisted(&self) -> u32 {
        u32::try_from(self.waitlist.len()).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn slots_available(&self) -> u32 {
        self.max_choosers.saturating_sub(self.slots_filled())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapacityLedger {
    topics: BTreeMap<TopicId, Slots>,
}

impl CapacityLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a ledger from stored records. Records must be in insertion
    /// order so waitlists come back in signup order.
    pub fn load(
        topics: impl IntoIterator<Item = (TopicId, u32)>,
        records: impl IntoIterator<Item = SignUpRecord>,
    ) -> Result<Self, SignupError> {
        let mut ledger = Self::new();
        for (topic, max_choosers) in topics {
            ledger.add_topic(topic, max_choosers);
        }
        for record in records {
            let slots = ledger
                .topics
                .get_mut(&record.topic_id)
                .ok_or(SignupError::TopicNotFound(record.topic_id))?;
            if slots.holds(record.team_id) {
                return Err(SignupError::InvariantViolation(format!(
                    "{} holds two records on {}",
                    record.team_id, record.topic_id
                )));
            }
            if record.is_waitlisted {
                slots.waitlist.push_back(record.team_id);
            } else {
                slots.confirmed.push(record.team_id);
            }
        }
        ledger.verify()?;
        Ok(ledger)
    }

    pub fn add_topic(&mut self, topic: TopicId, max_choosers: u32) {
        self.topics.entry(topic).or_insert_with(|| Slots {
            max_choosers,
            ..Slots::default()
        });
    }

    #[must_use]
    pub fn contains(&self, topic: TopicId) -> bool {
        self.topics.contains_key(&topic)
    }

    #[must_use]
    pub fn capacity(&self, topic: TopicId) -> Option<u32> {
        self.topics.get(&topic).map(|slots| slots.max_choosers)
    }

    #[must_use]
    pub fn confirmed_topic(&self, team: TeamId) -> Option<TopicId> {
        self.topics
            .iter()
            .find(|(_, slots)| slots.confirmed.contains(&team))
            .map(|(topic, _)| *topic)
    }

    #[must_use]
    pub fn waitlist_position(&self, topic: TopicId, team: TeamId) -> Option<usize> {
        self.topics
            .get(&topic)?
            .waitlist
            .iter()
            .position(|waiting| *waiting == team)
            .map(|index| index + 1)
    }

    /// All records of `team`, confirmed first.
    #[must_use]
    pub fn records_of(&self, team: TeamId) -> Vec<SignUpRecord> {
        let mut records = self
            .records()
            .into_iter()
            .filter(|record| record.team_id == team)
            .collect::<Vec<_>>();
        records.sort_by_key(|record| record.is_waitlisted);
        records
    }

    /// Every record, per topic confirmed before waitlisted, waitlist in
    /// signup order.
    #[must_use]
    pub fn records(&self) -> Vec<SignUpRecord> {
        self.topics
            .iter()
            .flat_map(|(&topic_id, slots)| {
                let confirmed = slots.confirmed.iter().map(move |&team_id| SignUpRecord {
                    topic_id,
                    team_id,
                    is_waitlisted: false,
                });
                let waitlisted = slots.waitlist.iter().map(move |&team_id| SignUpRecord {
                    topic_id,
                    team_id,
                    is_waitlisted: true,
                });
                confirmed.chain(waitlisted)
            })
            .collect()
    }

    #[must_use]
    pub fn occupancy(&self, topic: TopicId) -> Option<TopicOccupancy> {
        self.topics.get(&topic).map(|slots| TopicOccupancy {
            topic,
            max_choosers: slots.max_choosers,
            confirmed: slots.confirmed.clone(),
            waitlist: slots.waitlist.iter().copied().collect(),
        })
    }

    #[must_use]
    pub fn occupancies(&self) -> Vec<TopicOccupancy> {
        self.topics
            .keys()
            .filter_map(|topic| self.occupancy(*topic))
            .collect()
    }

    /// Confirms `team` on `topic` when a slot is free, otherwise appends it to
    /// the waitlist. A team already confirmed anywhere is refused.
    pub fn confirm_or_waitlist(
        &mut self,
        topic: TopicId,
        team: TeamId,
    ) -> Result<Applied<SignupOutcome>, SignupError> {
        if let Some(held) = self.confirmed_topic(team) {
            return Err(SignupError::AlreadySignedUp { team, topic: held });
        }
        if let Some(position) = self.waitlist_position(topic, team) {
            return Ok(Applied::new(SignupOutcome::Waitlisted { position }, vec![]));
        }
        let slots = self
            .topics
            .get_mut(&topic)
            .ok_or(SignupError::TopicNotFound(topic))?;

        let mut transitions = Vec::new();
        if slots.has_vacancy() {
            slots.confirmed.push(team);
            debug!(%team, %topic, "confirmed");
            transitions.push(Transition::Confirmed { team, topic });
            self.withdraw_waitlists(team, topic, &mut transitions);
            Ok(Applied::new(SignupOutcome::Confirmed, transitions))
        } else {
            slots.waitlist.push_back(team);
            let position = slots.waitlist.len();
            debug!(%team, %topic, position, "waitlisted");
            transitions.push(Transition::Waitlisted { team, topic });
            Ok(Applied::new(
                SignupOutcome::Waitlisted { position },
                transitions,
            ))
        }
    }

    /// Removes the team's record on `topic`. A vacated confirmed slot is
    /// refilled from the head of the waitlist.
    pub fn release(&mut self, topic: TopicId, team: TeamId) -> Result<Vec<Transition>, SignupError> {
        let slots = self
            .topics
            .get_mut(&topic)
            .ok_or(SignupError::TopicNotFound(topic))?;

        let was_waitlisted = if let Some(index) = slots.confirmed.iter().position(|t| *t == team) {
            slots.confirmed.remove(index);
            false
        } else if let Some(index) = slots.waitlist.iter().position(|t| *t == team) {
            slots.waitlist.remove(index);
            true
        } else {
            return Err(SignupError::NotSignedUp { team, topic });
        };

        debug!(%team, %topic, was_waitlisted, "released");
        let mut transitions = vec![Transition::Released {
            team,
            topic,
            was_waitlisted,
        }];
        if !was_waitlisted {
            self.promote(topic, &mut transitions);
        }
        Ok(transitions)
    }

    /// Drop by the student or by an instructor; both share one release path.
    pub fn reassign_on_drop(
        &mut self,
        topic: TopicId,
        leaving_team: TeamId,
    ) -> Result<Vec<Transition>, SignupError> {
        self.release(topic, leaving_team)
    }

    /// Capacity may only grow. Growth promotes from the waitlist until it is
    /// empty or the topic is full again.
    pub fn increase_capacity(
        &mut self,
        topic: TopicId,
        new_max: u32,
    ) -> Result<Vec<Transition>, SignupError> {
        let slots = self
            .topics
            .get_mut(&topic)
            .ok_or(SignupError::TopicNotFound(topic))?;
        let current = slots.max_choosers;
        if new_max < current {
            return Err(SignupError::CapacityDecreaseNotAllowed {
                topic,
                current,
                requested: new_max,
            });
        }
        if new_max == current {
            return Ok(vec![]);
        }
        slots.max_choosers = new_max;
        debug!(%topic, from = current, to = new_max, "capacity increased");
        let mut transitions = vec![Transition::CapacityChanged {
            topic,
            from: current,
            to: new_max,
        }];
        self.promote(topic, &mut transitions);
        Ok(transitions)
    }

    /// Carries the team's confirmed slot from `from` onto `to`, then refills
    /// `from` from its waitlist.
    pub fn move_confirmed(
        &mut self,
        team: TeamId,
        from: TopicId,
        to: TopicId,
    ) -> Result<Vec<Transition>, SignupError> {
        if from == to {
            return Ok(vec![]);
        }
        let target = self.topics.get(&to).ok_or(SignupError::TopicNotFound(to))?;
        if !target.has_vacancy() {
            return Err(SignupError::TopicFull(to));
        }
        let source = self
            .topics
            .get_mut(&from)
            .ok_or(SignupError::TopicNotFound(from))?;
        let index = source
            .confirmed
            .iter()
            .position(|t| *t == team)
            .ok_or(SignupError::NotSignedUp { team, topic: from })?;
        source.confirmed.remove(index);

        let mut transitions = vec![Transition::Moved { team, from, to }];
        if let Some(target) = self.topics.get_mut(&to) {
            if let Some(index) = target.waitlist.iter().position(|t| *t == team) {
                target.waitlist.remove(index);
            }
            target.confirmed.push(team);
        }
        debug!(%team, %from, %to, "moved");
        self.withdraw_waitlists(team, to, &mut transitions);
        self.promote(from, &mut transitions);
        Ok(transitions)
    }

    /// Releases every record on `topic` without promotion and forgets it.
    pub fn remove_topic(&mut self, topic: TopicId) -> Result<Vec<Transition>, SignupError> {
        let slots = self
            .topics
            .remove(&topic)
            .ok_or(SignupError::TopicNotFound(topic))?;
        let confirmed = slots.confirmed.into_iter().map(|team| (team, false));
        let waitlisted = slots.waitlist.into_iter().map(|team| (team, true));
        Ok(confirmed
            .chain(waitlisted)
            .map(|(team, was_waitlisted)| Transition::Released {
                team,
                topic,
                was_waitlisted,
            })
            .collect())
    }

    /// Checks the capacity bound, single confirmation per team and
    /// duplicate-free waitlists.
    pub fn verify(&self) -> Result<(), SignupError> {
        let mut confirmed_on = BTreeMap::new();
        for (&topic, slots) in &self.topics {
            if slots.filled() > slots.max_choosers {
                return Err(SignupError::InvariantViolation(format!(
                    "{topic} has {} confirmed teams but only {} slots",
                    slots.filled(),
                    slots.max_choosers
                )));
            }
            for &team in &slots.confirmed {
                if let Some(other) = confirmed_on.insert(team, topic) {
                    return Err(SignupError::InvariantViolation(format!(
                        "{team} is confirmed on both {other} and {topic}"
                    )));
                }
            }
            let mut waiting = slots.waitlist.iter().collect::<Vec<_>>();
            waiting.sort_unstable();
            if waiting.windows(2).any(|pair| pair[0] == pair[1]) {
                return Err(SignupError::InvariantViolation(format!(
                    "{topic} has a duplicate waitlist entry"
                )));
            }
        }
        Ok(())
    }

    fn promote(&mut self, topic: TopicId, transitions: &mut Vec<Transition>) {
        loop {
            let Some(slots) = self.topics.get_mut(&topic) else {
                return;
            };
            if !slots.has_vacancy() {
                return;
            }
            let Some(next) = slots.waitlist.pop_front() else {
                return;
            };
            if let Some(held) = self.confirmed_topic(next) {
                debug!(team = %next, %topic, %held, "skipping waitlisted team confirmed elsewhere");
                transitions.push(Transition::WithdrawnFromWaitlist { team: next, topic });
                continue;
            }
            if let Some(slots) = self.topics.get_mut(&topic) {
                slots.confirmed.push(next);
            }
            debug!(team = %next, %topic, "promoted from waitlist");
            transitions.push(Transition::Promoted { team: next, topic });
            self.withdraw_waitlists(next, topic, transitions);
        }
    }

    // a confirmed team has no business waiting anywhere else
    fn withdraw_waitlists(
        &mut self,
        team: TeamId,
        confirmed_on: TopicId,
        transitions: &mut Vec<Transition>,
    ) {
        for (&topic, slots) in &mut self.topics {
            if topic == confirmed_on {
                continue;
            }
            if let Some(index) = slots.waitlist.iter().position(|t| *t == team) {
                slots.waitlist.remove(index);
                debug!(%team, %topic, "withdrawn from waitlist");
                transitions.push(Transition::WithdrawnFromWaitlist { team, topic });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: TopicId = TopicId(10);
    const T1: TopicId = TopicId(11);

    fn team(id: i32) -> TeamId {
        TeamId(id)
    }

    fn ledger(capacities: &[(TopicId, u32)]) -> CapacityLedger {
        let mut ledger = CapacityLedger::new();
        for &(topic, max_choosers) in capacities {
            ledger.add_topic(topic, max_choosers);
        }
        ledger
    }

    #[test]
    fn confirms_until_full_then_waitlists_in_order() {
        let mut ledger = ledger(&[(T0, 2)]);
        for id in 1..=4 {
            ledger.confirm_or_waitlist(T0, team(id)).unwrap();
        }
        let occupancy = ledger.occupancy(T0).unwrap();
        assert_eq!(occupancy.confirmed, vec![team(1), team(2)]);
        assert_eq!(occupancy.waitlist, vec![team(3), team(4)]);
        assert_eq!(occupancy.slots_available(), 0);
        assert_eq!(ledger.waitlist_position(T0, team(4)), Some(2));
    }

    #[test]
    fn confirmed_team_cannot_take_a_second_topic() {
        let mut ledger = ledger(&[(T0, 1), (T1, 1)]);
        ledger.confirm_or_waitlist(T0, team(1)).unwrap();
        let before = ledger.clone();
        assert_eq!(
            ledger.confirm_or_waitlist(T1, team(1)),
            Err(SignupError::AlreadySignedUp {
                team: team(1),
                topic: T0,
            })
        );
        assert_eq!(ledger, before);
    }

    #[test]
    fn repeated_waitlist_signup_changes_nothing() {
        let mut ledger = ledger(&[(T0, 1)]);
        ledger.confirm_or_waitlist(T0, team(1)).unwrap();
        ledger.confirm_or_waitlist(T0, team(2)).unwrap();
        let again = ledger.confirm_or_waitlist(T0, team(2)).unwrap();
        assert_eq!(again.outcome, SignupOutcome::Waitlisted { position: 1 });
        assert!(again.is_noop());
        assert_eq!(ledger.occupancy(T0).unwrap().waitlist, vec![team(2)]);
    }

    #[test]
    fn release_promotes_head_of_waitlist() {
        let mut ledger = ledger(&[(T0, 1)]);
        for id in 1..=4 {
            ledger.confirm_or_waitlist(T0, team(id)).unwrap();
        }
        let transitions = ledger.release(T0, team(1)).unwrap();
        assert_eq!(
            transitions,
            vec![
                Transition::Released {
                    team: team(1),
                    topic: T0,
                    was_waitlisted: false,
                },
                Transition::Promoted {
                    team: team(2),
                    topic: T0,
                },
            ]
        );
        ledger.release(T0, team(2)).unwrap();
        let occupancy = ledger.occupancy(T0).unwrap();
        assert_eq!(occupancy.confirmed, vec![team(3)]);
        assert_eq!(occupancy.waitlist, vec![team(4)]);
    }

    #[test]
    fn releasing_a_waitlisted_team_promotes_nobody() {
        let mut ledger = ledger(&[(T0, 1)]);
        for id in 1..=3 {
            ledger.confirm_or_waitlist(T0, team(id)).unwrap();
        }
        let transitions = ledger.release(T0, team(2)).unwrap();
        assert_eq!(transitions.len(), 1);
        assert_eq!(ledger.occupancy(T0).unwrap().waitlist, vec![team(3)]);
    }

    #[test]
    fn release_without_record_is_reported() {
        let mut ledger = ledger(&[(T0, 1)]);
        assert_eq!(
            ledger.release(T0, team(9)),
            Err(SignupError::NotSignedUp {
                team: team(9),
                topic: T0,
            })
        );
    }

    #[test]
    fn capacity_growth_drains_the_waitlist() {
        let mut ledger = ledger(&[(T0, 2)]);
        for id in 1..=4 {
            ledger.confirm_or_waitlist(T0, team(id)).unwrap();
        }
        let transitions = ledger.increase_capacity(T0, 4).unwrap();
        let promoted = transitions
            .iter()
            .filter(|transition| matches!(transition, Transition::Promoted { .. }))
            .count();
        assert_eq!(promoted, 2);
        let occupancy = ledger.occupancy(T0).unwrap();
        assert_eq!(occupancy.slots_filled(), 4);
        assert!(occupancy.waitlist.is_empty());
    }

    #[test]
    fn capacity_growth_stops_at_new_limit() {
        let mut ledger = ledger(&[(T0, 1)]);
        for id in 1..=4 {
            ledger.confirm_or_waitlist(T0, team(id)).unwrap();
        }
        ledger.increase_capacity(T0, 2).unwrap();
        let occupancy = ledger.occupancy(T0).unwrap();
        assert_eq!(occupancy.confirmed, vec![team(1), team(2)]);
        assert_eq!(occupancy.waitlist, vec![team(3), team(4)]);
    }

    #[test]
    fn capacity_shrink_is_rejected_even_when_empty() {
        let mut ledger = ledger(&[(T0, 3)]);
        let before = ledger.clone();
        assert_eq!(
            ledger.increase_capacity(T0, 2),
            Err(SignupError::CapacityDecreaseNotAllowed {
                topic: T0,
                current: 3,
                requested: 2,
            })
        );
        assert_eq!(ledger, before);
    }

    #[test]
    fn confirmation_withdraws_other_waitlist_entries() {
        let mut ledger = ledger(&[(T0, 1), (T1, 1)]);
        ledger.confirm_or_waitlist(T0, team(1)).unwrap();
        ledger.confirm_or_waitlist(T1, team(2)).unwrap();
        ledger.confirm_or_waitlist(T0, team(3)).unwrap();
        ledger.confirm_or_waitlist(T1, team(3)).unwrap();

        let transitions = ledger.release(T1, team(2)).unwrap();
        assert!(transitions.contains(&Transition::WithdrawnFromWaitlist {
            team: team(3),
            topic: T0,
        }));
        assert_eq!(ledger.confirmed_topic(team(3)), Some(T1));
        assert!(ledger.occupancy(T0).unwrap().waitlist.is_empty());
        ledger.verify().unwrap();
    }

    #[test]
    fn move_confirmed_frees_the_original_slot() {
        let mut ledger = ledger(&[(T0, 1), (T1, 1)]);
        ledger.confirm_or_waitlist(T0, team(1)).unwrap();
        ledger.confirm_or_waitlist(T0, team(2)).unwrap();

        let transitions = ledger.move_confirmed(team(1), T0, T1).unwrap();
        assert_eq!(
            transitions,
            vec![
                Transition::Moved {
                    team: team(1),
                    from: T0,
                    to: T1,
                },
                Transition::Promoted {
                    team: team(2),
                    topic: T0,
                },
            ]
        );
    }

    #[test]
    fn load_rejects_overbooked_topics() {
        let records = (1..=2).map(|id| SignUpRecord {
            topic_id: T0,
            team_id: team(id),
            is_waitlisted: false,
        });
        assert!(matches!(
            CapacityLedger::load([(T0, 1)], records),
            Err(SignupError::InvariantViolation(_))
        ));
    }

    #[test]
    fn load_keeps_waitlist_order() {
        let records = [(1, false), (5, true), (3, true)].map(|(id, is_waitlisted)| SignUpRecord {
            topic_id: T0,
            team_id: team(id),
            is_waitlisted,
        });
        let ledger = CapacityLedger::load([(T0, 1)], records).unwrap();
        assert_eq!(ledger.occupancy(T0).unwrap().waitlist, vec![team(5), team(3)]);
        assert_eq!(ledger.records_of(team(3)).len(), 1);
    }
}
