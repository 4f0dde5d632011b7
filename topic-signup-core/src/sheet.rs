//! The sign-up sheet of one assignment.
//!
//! `SignUpSheet` routes every request through the deadline gate, the
//! capacity ledger and the bid book. Each mutating call runs against a
//! staged copy that replaces the live state only once the whole cascade
//! succeeded and the invariants still hold.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error};

use crate::bids::{BidBook, TopicSelection};
use crate::deadline::{DeadlineGate, DeadlineKind, DeadlineSchedule, TopicDeadlineEdit};
use crate::error::SignupError;
use crate::ids::{TeamId, TopicId, UserId};
use crate::ledger::{CapacityLedger, SignupOutcome, TopicOccupancy};
use crate::model::{Assignment, Bid, Participant, SignUpRecord, Team, Topic, TopicDraft};
use crate::transition::{Applied, Transition};

/// Everything the storage collaborator loads for one assignment.
#[derive(Debug, Clone)]
pub struct SheetParts {
    pub assignment: Assignment,
    pub topics: Vec<Topic>,
    pub participants: Vec<Participant>,
    pub teams: Vec<Team>,
    /// In insertion order; waitlists are rebuilt from it.
    pub records: Vec<SignUpRecord>,
    pub bids: Vec<Bid>,
    pub schedule: DeadlineSchedule,
}

/// A topic with its slot counts, as rendered in topic lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicRow {
    pub topic: Topic,
    pub slots_filled: u32,
    pub slots_waitlisted: u32,
    pub slots_available: u32,
}

/// The student-facing topic list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListView {
    pub team: Option<TeamId>,
    pub show_actions: bool,
    pub signup_deadline: Option<DateTime<Utc>>,
    pub drop_deadline: Option<DateTime<Utc>>,
    pub max_team_size: u32,
    /// Topics still open for selection.
    pub topics: Vec<TopicRow>,
    /// Intelligent assignments only: topics the team ranked, by priority.
    pub ranked: Vec<TopicRow>,
    pub selected: Vec<SignUpRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamSummary {
    pub team: TeamId,
    pub name: String,
    pub members: Vec<String>,
    pub is_waitlisted: bool,
}

#[derive(Debug, Clone)]
pub struct SignUpSheet {
    assignment: Assignment,
    topics: BTreeMap<TopicId, Topic>,
    participants: BTreeMap<UserId, Participant>,
    teams: BTreeMap<TeamId, Team>,
    schedule: DeadlineSchedule,
    ledger: CapacityLedger,
    bids: BidBook,
}

impl SignUpSheet {
    #[must_use]
    pub fn new(assignment: Assignment) -> Self {
        Self {
            assignment,
            topics: BTreeMap::new(),
            participants: BTreeMap::new(),
            teams: BTreeMap::new(),
            schedule: DeadlineSchedule::new(),
            ledger: CapacityLedger::new(),
            bids: BidBook::new(),
        }
    }

    pub fn from_parts(parts: SheetParts) -> Result<Self, SignupError> {
        let SheetParts {
            assignment,
            topics,
            participants,
            teams,
            records,
            bids,
            schedule,
        } = parts;
        let ledger = CapacityLedger::load(
            topics.iter().map(|topic| (topic.id, topic.max_choosers)),
            records,
        )?;
        let sheet = Self {
            assignment,
            topics: topics.into_iter().map(|topic| (topic.id, topic)).collect(),
            participants: participants
                .into_iter()
                .map(|participant| (participant.user_id, participant))
                .collect(),
            teams: teams.into_iter().map(|team| (team.id, team)).collect(),
            schedule,
            ledger,
            bids: BidBook::load(bids),
        };
        sheet.verify()?;
        Ok(sheet)
    }

    #[must_use]
    pub const fn assignment(&self) -> &Assignment {
        &self.assignment
    }

    #[must_use]
    pub fn topic(&self, id: TopicId) -> Option<&Topic> {
        self.topics.get(&id)
    }

    pub fn topics(&self) -> impl Iterator<Item = &Topic> + '_ {
        self.topics.values()
    }

    #[must_use]
    pub fn topic_by_name(&self, name: &str) -> Option<TopicId> {
        self.topics
            .values()
            .find(|topic| topic.name == name)
            .map(|topic| topic.id)
    }

    #[must_use]
    pub fn team(&self, id: TeamId) -> Option<&Team> {
        self.teams.get(&id)
    }

    pub fn teams(&self) -> impl Iterator<Item = &Team> + '_ {
        self.teams.values()
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> + '_ {
        self.participants.values()
    }

    #[must_use]
    pub fn is_participant(&self, user: UserId) -> bool {
        self.participants.contains_key(&user)
    }

    #[must_use]
    pub fn team_of(&self, user: UserId) -> Option<TeamId> {
        self.teams
            .values()
            .find(|team| team.members.contains(&user))
            .map(|team| team.id)
    }

    #[must_use]
    pub fn records(&self) -> Vec<SignUpRecord> {
        self.ledger.records()
    }

    #[must_use]
    pub fn confirmed_topic(&self, team: TeamId) -> Option<TopicId> {
        self.ledger.confirmed_topic(team)
    }

    #[must_use]
    pub fn bids(&self, team: TeamId) -> &[Bid] {
        self.bids.bids(team)
    }

    pub fn all_bids(&self) -> impl Iterator<Item = &Bid> + '_ {
        self.bids.all()
    }

    #[must_use]
    pub const fn schedule(&self) -> &DeadlineSchedule {
        &self.schedule
    }

    #[must_use]
    pub const fn gate(&self) -> DeadlineGate<'_> {
        DeadlineGate::new(&self.assignment, &self.schedule)
    }

    pub fn add_participant(&mut self, participant: Participant) {
        self.participants.insert(participant.user_id, participant);
    }

    /// Registers a team created by the team-management collaborator.
    pub fn attach_team(&mut self, team: Team) -> Result<(), SignupError> {
        if team.assignment_id != self.assignment.id {
            return Err(SignupError::InvariantViolation(format!(
                "{} belongs to {}, not {}",
                team.id, team.assignment_id, self.assignment.id
            )));
        }
        if self.teams.contains_key(&team.id) {
            return Err(SignupError::InvariantViolation(format!(
                "{} is already attached",
                team.id
            )));
        }
        if let Some(user) = team
            .members
            .iter()
            .find(|user| self.team_of(**user).is_some())
        {
            return Err(SignupError::InvariantViolation(format!(
                "{user} already belongs to a team"
            )));
        }
        debug!(team = %team.id, "team attached");
        self.teams.insert(team.id, team);
        Ok(())
    }

    /// Student signup. Refused once the signup deadline passed.
    pub fn sign_up(
        &mut self,
        team: TeamId,
        topic: TopicId,
        now: DateTime<Utc>,
    ) -> Result<Applied<SignupOutcome>, SignupError> {
        self.transact(|sheet| {
            sheet.require_team(team)?;
            sheet.require_visible_topic(topic, team)?;
            sheet.gate().check_signup(topic, now)?;
            sheet.ledger.confirm_or_waitlist(topic, team)
        })
    }

    /// Signup on behalf of a student; not bound by the signup deadline.
    pub fn sign_up_as_instructor(
        &mut self,
        team: TeamId,
        topic: TopicId,
    ) -> Result<Applied<SignupOutcome>, SignupError> {
        self.transact(|sheet| {
            sheet.require_team(team)?;
            sheet.require_topic(topic)?;
            sheet.ledger.confirm_or_waitlist(topic, team)
        })
    }

    pub fn drop_topic(
        &mut self,
        team: TeamId,
        topic: TopicId,
        now: DateTime<Utc>,
    ) -> Result<Applied<()>, SignupError> {
        self.drop_signup(team, topic, now)
    }

    pub fn drop_as_instructor(
        &mut self,
        team: TeamId,
        topic: TopicId,
        now: DateTime<Utc>,
    ) -> Result<Applied<()>, SignupError> {
        self.drop_signup(team, topic, now)
    }

    pub fn set_priorities(
        &mut self,
        team: TeamId,
        ordered: &[TopicId],
    ) -> Result<Applied<()>, SignupError> {
        self.transact(|sheet| {
            sheet.require_team(team)?;
            for &topic in ordered {
                sheet.require_visible_topic(topic, team)?;
            }
            sheet
                .bids
                .set_priorities(team, ordered)
                .map(Applied::from_transitions)
        })
    }

    pub fn clear_priorities(&mut self, team: TeamId) -> Result<Applied<()>, SignupError> {
        self.transact(|sheet| {
            sheet.require_team(team)?;
            Ok(Applied::from_transitions(sheet.bids.clear(team)))
        })
    }

    /// Adds a topic whose id the storage collaborator allocated.
    pub fn insert_topic(&mut self, topic: Topic) -> Result<Applied<TopicId>, SignupError> {
        self.transact(|sheet| {
            if topic.assignment_id != sheet.assignment.id {
                return Err(SignupError::InvariantViolation(format!(
                    "{} belongs to {}",
                    topic.id, topic.assignment_id
                )));
            }
            if sheet.topics.contains_key(&topic.id) {
                return Err(SignupError::InvariantViolation(format!(
                    "{} already exists",
                    topic.id
                )));
            }
            let id = topic.id;
            sheet.ledger.add_topic(id, topic.max_choosers);
            sheet.topics.insert(id, topic.clone());
            debug!(topic = %id, "topic created");
            Ok(Applied::new(id, vec![Transition::TopicCreated { topic }]))
        })
    }

    /// Re-submitting an existing topic name only touches its identifier,
    /// category and capacity.
    pub fn amend_topic(
        &mut self,
        id: TopicId,
        draft: TopicDraft,
    ) -> Result<Applied<()>, SignupError> {
        self.transact(|sheet| {
            let mut transitions = sheet.ledger.increase_capacity(id, draft.max_choosers)?;
            let topic = sheet
                .topics
                .get_mut(&id)
                .ok_or(SignupError::TopicNotFound(id))?;
            let before = topic.clone();
            topic.identifier = draft.identifier;
            topic.category = draft.category;
            topic.max_choosers = draft.max_choosers;
            if *topic != before {
                transitions.push(Transition::TopicUpdated {
                    topic: topic.clone(),
                });
            }
            Ok(Applied::from_transitions(transitions))
        })
    }

    /// Edits every field. A capacity decrease rejects the whole edit.
    pub fn update_topic(
        &mut self,
        id: TopicId,
        draft: TopicDraft,
    ) -> Result<Applied<()>, SignupError> {
        self.transact(|sheet| {
            let mut transitions = sheet.ledger.increase_capacity(id, draft.max_choosers)?;
            let topic = sheet
                .topics
                .get_mut(&id)
                .ok_or(SignupError::TopicNotFound(id))?;
            let updated = Topic::from_draft(id, topic.assignment_id, draft);
            let updated = Topic {
                private_to: topic.private_to,
                ..updated
            };
            if *topic != updated {
                *topic = updated;
                transitions.push(Transition::TopicUpdated {
                    topic: topic.clone(),
                });
            }
            Ok(Applied::from_transitions(transitions))
        })
    }

    /// Deletes a topic together with every record, bid and deadline override
    /// on it. Nobody is promoted.
    pub fn remove_topic(&mut self, id: TopicId) -> Result<Applied<()>, SignupError> {
        self.transact(|sheet| {
            let mut transitions = sheet.ledger.remove_topic(id)?;
            transitions.extend(sheet.bids.remove_topic(id));
            sheet.schedule.remove_topic(id);
            sheet.topics.remove(&id);
            debug!(topic = %id, "topic removed");
            transitions.push(Transition::TopicRemoved { topic: id });
            Ok(Applied::from_transitions(transitions))
        })
    }

    /// Grants a team its suggested topic: the topic becomes public, the
    /// team's confirmed slot moves onto it and the slot left behind goes to
    /// the next waitlisted team.
    pub fn approve_suggested_topic(
        &mut self,
        team: TeamId,
        topic: TopicId,
    ) -> Result<Applied<()>, SignupError> {
        self.transact(|sheet| {
            sheet.require_team(team)?;
            sheet.require_visible_topic(topic, team)?;
            let mut transitions = sheet.publish(topic)?;
            match sheet.ledger.confirmed_topic(team) {
                Some(original) => {
                    transitions.extend(sheet.ledger.move_confirmed(team, original, topic)?);
                }
                None => {
                    transitions.extend(sheet.ledger.confirm_or_waitlist(topic, team)?.transitions);
                }
            }
            Ok(Applied::from_transitions(transitions))
        })
    }

    pub fn publish_suggested_topic(&mut self, topic: TopicId) -> Result<Applied<()>, SignupError> {
        self.transact(|sheet| sheet.publish(topic).map(Applied::from_transitions))
    }

    pub fn save_topic_deadlines(
        &mut self,
        edits: &[TopicDeadlineEdit],
    ) -> Result<Applied<()>, SignupError> {
        self.transact(|sheet| {
            let review_rounds = sheet.assignment.review_rounds;
            let mut transitions = Vec::new();
            for &edit in edits {
                sheet.require_topic(edit.topic)?;
                transitions.extend(sheet.schedule.apply_topic_edit(edit, review_rounds)?);
            }
            Ok(Applied::from_transitions(transitions))
        })
    }

    #[must_use]
    pub fn occupancy(&self) -> Vec<TopicOccupancy> {
        self.ledger.occupancies()
    }

    /// Every topic with slot counts, for the instructor's topic grid.
    #[must_use]
    pub fn topic_grid(&self) -> Vec<TopicRow> {
        self.topics.values().filter_map(|topic| self.row(topic)).collect()
    }

    #[must_use]
    pub fn selection(&self, team: TeamId) -> TopicSelection {
        let listed = self.listed_topics(Some(team));
        self.bids.selection(team, &listed)
    }

    #[must_use]
    pub fn list_view(&self, user: UserId, now: DateTime<Utc>) -> ListView {
        let team = self.team_of(user);
        let listed = self.listed_topics(team);
        let rows = |ids: &[TopicId]| {
            ids.iter()
                .filter_map(|id| self.topics.get(id))
                .filter_map(|topic| self.row(topic))
                .collect::<Vec<_>>()
        };

        let (topics, ranked) = match team {
            Some(team) if self.assignment.is_intelligent => {
                let selection = self.bids.selection(team, &listed);
                (rows(&selection.remaining), rows(&selection.ranked))
            }
            _ => (rows(&listed), Vec::new()),
        };

        ListView {
            team,
            show_actions: self.gate().shows_actions(now),
            signup_deadline: self.schedule.first_assignment_due(DeadlineKind::Signup),
            drop_deadline: team
                .and_then(|team| self.ledger.confirmed_topic(team))
                .map_or_else(
                    || self.schedule.first_assignment_due(DeadlineKind::Drop),
                    |topic| self.gate().drop_deadline(topic),
                ),
            max_team_size: self.assignment.max_team_size,
            topics,
            ranked,
            selected: team.map(|team| self.ledger.records_of(team)).unwrap_or_default(),
        }
    }

    /// Teams holding a record on `topic`, confirmed first.
    pub fn topic_teams(&self, topic: TopicId) -> Result<Vec<TeamSummary>, SignupError> {
        let occupancy = self
            .ledger
            .occupancy(topic)
            .ok_or(SignupError::TopicNotFound(topic))?;
        let confirmed = occupancy.confirmed.iter().map(|team| (*team, false));
        let waitlisted = occupancy.waitlist.iter().map(|team| (*team, true));
        Ok(confirmed
            .chain(waitlisted)
            .filter_map(|(id, is_waitlisted)| {
                let team = self.teams.get(&id)?;
                Some(TeamSummary {
                    team: id,
                    name: team.name.clone(),
                    members: team
                        .members
                        .iter()
                        .filter_map(|user| self.participants.get(user))
                        .map(|participant| participant.name.clone())
                        .collect(),
                    is_waitlisted,
                })
            })
            .collect())
    }

    /// Ledger invariants plus agreement between the ledger, the topic table
    /// and the team table.
    pub fn verify(&self) -> Result<(), SignupError> {
        self.ledger.verify()?;
        for topic in self.topics.values() {
            if self.ledger.capacity(topic.id) != Some(topic.max_choosers) {
                return Err(SignupError::InvariantViolation(format!(
                    "capacity of {} is out of sync",
                    topic.id
                )));
            }
        }
        for record in self.ledger.records() {
            if !self.topics.contains_key(&record.topic_id) {
                return Err(SignupError::InvariantViolation(format!(
                    "record on unknown {}",
                    record.topic_id
                )));
            }
            if !self.teams.contains_key(&record.team_id) {
                return Err(SignupError::InvariantViolation(format!(
                    "record of unknown {}",
                    record.team_id
                )));
            }
        }
        if let Some(bid) = self
            .bids
            .all()
            .find(|bid| !self.topics.contains_key(&bid.topic_id))
        {
            return Err(SignupError::InvariantViolation(format!(
                "bid on unknown {}",
                bid.topic_id
            )));
        }
        Ok(())
    }

    fn drop_signup(
        &mut self,
        team: TeamId,
        topic: TopicId,
        now: DateTime<Utc>,
    ) -> Result<Applied<()>, SignupError> {
        self.transact(|sheet| {
            let submitted_work = sheet.require_team(team)?.submitted_work;
            sheet.require_topic(topic)?;
            sheet.gate().can_drop(topic, submitted_work, now)?;
            sheet
                .ledger
                .reassign_on_drop(topic, team)
                .map(Applied::from_transitions)
        })
    }

    fn publish(&mut self, id: TopicId) -> Result<Vec<Transition>, SignupError> {
        let topic = self
            .topics
            .get_mut(&id)
            .ok_or(SignupError::TopicNotFound(id))?;
        if topic.private_to.take().is_some() {
            debug!(topic = %id, "suggested topic published");
            Ok(vec![Transition::TopicPublished { topic: id }])
        } else {
            Ok(vec![])
        }
    }

    fn transact<T>(
        &mut self,
        operation: impl FnOnce(&mut Self) -> Result<Applied<T>, SignupError>,
    ) -> Result<Applied<T>, SignupError> {
        let mut staged = self.clone();
        let applied = operation(&mut staged)?;
        if let Err(violation) = staged.verify() {
            error!(%violation, "refusing to apply inconsistent sign-up state");
            return Err(violation);
        }
        *self = staged;
        Ok(applied)
    }

    fn require_team(&self, team: TeamId) -> Result<&Team, SignupError> {
        self.teams.get(&team).ok_or(SignupError::TeamNotFound(team))
    }

    fn require_topic(&self, topic: TopicId) -> Result<&Topic, SignupError> {
        self.topics
            .get(&topic)
            .ok_or(SignupError::TopicNotFound(topic))
    }

    // another team's private suggestion looks like it does not exist
    fn require_visible_topic(&self, topic: TopicId, team: TeamId) -> Result<&Topic, SignupError> {
        self.require_topic(topic)
            .ok()
            .filter(|found| found.is_visible_to(Some(team)))
            .ok_or(SignupError::TopicNotFound(topic))
    }

    fn listed_topics(&self, team: Option<TeamId>) -> Vec<TopicId> {
        self.topics
            .values()
            .filter(|topic| topic.is_visible_to(team))
            .map(|topic| topic.id)
            .collect()
    }

    fn row(&self, topic: &Topic) -> Option<TopicRow> {
        let occupancy = self.ledger.occupancy(topic.id)?;
        Some(TopicRow {
            topic: topic.clone(),
            slots_filled: occupancy.slots_filled(),
            slots_waitlisted: occupancy.slots_waitlisted(),
            slots_available: occupancy.slots_available(),
        })
    }
}
