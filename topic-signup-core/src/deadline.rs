//! Deadline resolution and the gate deciding whether signing up or dropping
//! is currently permitted.
//!
//! Everything in here is a pure function of the supplied schedule and the
//! caller's `now`; nothing reads the wall clock.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::SignupError;
use crate::ids::TopicId;
use crate::model::Assignment;
use crate::transition::Transition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlineKind {
    Submission,
    Review,
    Drop,
    Signup,
}

impl DeadlineKind {
    /// Numeric deadline type id used by the deadline store.
    #[must_use]
    pub const fn type_id(self) -> i32 {
        match self {
            Self::Submission => 1,
            Self::Review => 2,
            Self::Drop => 6,
            Self::Signup => 7,
        }
    }

    #[must_use]
    pub const fn from_type_id(type_id: i32) -> Option<Self> {
        match type_id {
            1 => Some(Self::Submission),
            2 => Some(Self::Review),
            6 => Some(Self::Drop),
            7 => Some(Self::Signup),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenyReason {
    #[error("You have already submitted your work, so you are not allowed to drop your topic.")]
    SubmissionAlreadyMade,
    #[error("You cannot drop your topic after the drop topic deadline!")]
    PastDropDeadline,
    #[error("The signup deadline for this topic has passed.")]
    PastSignupDeadline,
}

impl DenyReason {
    #[must_use]
    pub const fn instructor_message(self) -> &'static str {
        match self {
            Self::SubmissionAlreadyMade => {
                "The student has already submitted their work, so you are not allowed to remove \
                 them."
            }
            Self::PastDropDeadline => "You cannot drop a student after the drop topic deadline!",
            Self::PastSignupDeadline => "The signup deadline for this topic has passed.",
        }
    }
}

/// Assignment-wide due dates plus per-topic overrides for staggered
/// assignments. Keys are `(kind, round)`; rounds start at 1.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeadlineSchedule {
    assignment: BTreeMap<(DeadlineKind, u32), DateTime<Utc>>,
    topics: BTreeMap<(TopicId, DeadlineKind, u32), DateTime<Utc>>,
}

impl DeadlineSchedule {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_assignment_due(&mut self, kind: DeadlineKind, round: u32, due_at: DateTime<Utc>) {
        self.assignment.insert((kind, round), due_at);
    }

    pub fn set_topic_due(
        &mut self,
        topic: TopicId,
        kind: DeadlineKind,
        round: u32,
        due_at: DateTime<Utc>,
    ) {
        self.topics.insert((topic, kind, round), due_at);
    }

    #[must_use]
    pub fn assignment_due(&self, kind: DeadlineKind, round: u32) -> Option<DateTime<Utc>> {
        self.assignment.get(&(kind, round)).copied()
    }

    /// Earliest-round assignment due date of `kind`.
    #[must_use]
    pub fn first_assignment_due(&self, kind: DeadlineKind) -> Option<DateTime<Utc>> {
        self.assignment
            .range((kind, 0)..=(kind, u32::MAX))
            .next()
            .map(|(_, due_at)| *due_at)
    }

    #[must_use]
    pub fn topic_override(
        &self,
        topic: TopicId,
        kind: DeadlineKind,
        round: u32,
    ) -> Option<DateTime<Utc>> {
        self.topics.get(&(topic, kind, round)).copied()
    }

    /// A topic's deadline equals the assignment's unless overridden for that
    /// round.
    #[must_use]
    pub fn effective_due_at(
        &self,
        topic: TopicId,
        kind: DeadlineKind,
        round: u32,
    ) -> Option<DateTime<Utc>> {
        self.topic_override(topic, kind, round)
            .or_else(|| self.assignment_due(kind, round))
    }

    /// The effective due date of the earliest round that has one, resolved
    /// per round so an override on a later round never hides an earlier
    /// assignment deadline.
    #[must_use]
    pub fn effective_first_due(&self, topic: TopicId, kind: DeadlineKind) -> Option<DateTime<Utc>> {
        let assignment_round = self
            .assignment
            .range((kind, 0)..=(kind, u32::MAX))
            .next()
            .map(|(&(_, round), _)| round);
        let topic_round = self
            .topics
            .range((topic, kind, 0)..=(topic, kind, u32::MAX))
            .next()
            .map(|(&(_, _, round), _)| round);
        let round = assignment_round.into_iter().chain(topic_round).min()?;
        self.effective_due_at(topic, kind, round)
    }

    pub fn assignment_deadlines(
        &self,
    ) -> impl Iterator<Item = (DeadlineKind, u32, DateTime<Utc>)> + '_ {
        self.assignment
            .iter()
            .map(|(&(kind, round), &due_at)| (kind, round, due_at))
    }

    pub fn topic_overrides(
        &self,
    ) -> impl Iterator<Item = (TopicId, DeadlineKind, u32, DateTime<Utc>)> + '_ {
        self.topics
            .iter()
            .map(|(&(topic, kind, round), &due_at)| (topic, kind, round, due_at))
    }

    pub(crate) fn remove_topic(&mut self, topic: TopicId) {
        self.topics.retain(|(owner, _, _), _| *owner != topic);
    }

    /// Applies one instructor edit of a staggered topic deadline. Only
    /// submission and review due dates are kept per topic. An edit equal (to
    /// the minute) to the assignment's due date leaves no override behind.
    pub(crate) fn apply_topic_edit(
        &mut self,
        edit: TopicDeadlineEdit,
        review_rounds: u32,
    ) -> Result<Option<Transition>, SignupError> {
        let TopicDeadlineEdit {
            topic,
            kind,
            round,
            due_at,
        } = edit;
        if !matches!(kind, DeadlineKind::Submission | DeadlineKind::Review)
            || round == 0
            || round > review_rounds
        {
            return Err(SignupError::DeadlineNotFound { kind, round });
        }
        let assignment_due = self
            .assignment_due(kind, round)
            .ok_or(SignupError::DeadlineNotFound { kind, round })?;

        if same_minute(assignment_due, due_at) {
            return Ok(self
                .topics
                .remove(&(topic, kind, round))
                .map(|_| Transition::TopicDeadlineCleared { topic, kind, round }));
        }
        if self.topics.insert((topic, kind, round), due_at) == Some(due_at) {
            return Ok(None);
        }
        debug!(%topic, ?kind, round, %due_at, "topic deadline overridden");
        Ok(Some(Transition::TopicDeadlineSet {
            topic,
            kind,
            round,
            due_at,
        }))
    }
}

// due dates are entered and compared with minute precision
fn same_minute(left: DateTime<Utc>, right: DateTime<Utc>) -> bool {
    left.timestamp().div_euclid(60) == right.timestamp().div_euclid(60)
}

/// One cell of the staggered deadline grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicDeadlineEdit {
    pub topic: TopicId,
    pub kind: DeadlineKind,
    pub round: u32,
    pub due_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct DeadlineGate<'a> {
    assignment: &'a Assignment,
    schedule: &'a DeadlineSchedule,
}

impl<'a> DeadlineGate<'a> {
    #[must_use]
    pub const fn new(assignment: &'a Assignment, schedule: &'a DeadlineSchedule) -> Self {
        Self {
            assignment,
            schedule,
        }
    }

    /// Staggered assignments close a topic once its own first-round
    /// submission deadline passes; all others use the signup deadline.
    #[must_use]
    pub fn signup_deadline(&self, topic: TopicId) -> Option<DateTime<Utc>> {
        if self.assignment.staggered_deadline {
            self.schedule
                .effective_due_at(topic, DeadlineKind::Submission, 1)
        } else {
            self.schedule.first_assignment_due(DeadlineKind::Signup)
        }
    }

    #[must_use]
    pub fn drop_deadline(&self, topic: TopicId) -> Option<DateTime<Utc>> {
        if self.assignment.staggered_deadline {
            self.schedule.effective_first_due(topic, DeadlineKind::Drop)
        } else {
            self.schedule.first_assignment_due(DeadlineKind::Drop)
        }
    }

    #[must_use]
    pub fn can_signup(&self, topic: TopicId, now: DateTime<Utc>) -> bool {
        self.signup_deadline(topic).map_or(true, |due_at| now <= due_at)
    }

    pub fn check_signup(&self, topic: TopicId, now: DateTime<Utc>) -> Result<(), DenyReason> {
        if self.can_signup(topic, now) {
            Ok(())
        } else {
            Err(DenyReason::PastSignupDeadline)
        }
    }

    /// Submitted work blocks a drop regardless of any deadline.
    pub fn can_drop(
        &self,
        topic: TopicId,
        submitted_work: bool,
        now: DateTime<Utc>,
    ) -> Result<(), DenyReason> {
        if submitted_work {
            return Err(DenyReason::SubmissionAlreadyMade);
        }
        match self.drop_deadline(topic) {
            Some(due_at) if now > due_at => Err(DenyReason::PastDropDeadline),
            _ => Ok(()),
        }
    }

    /// Whether the student list still offers sign-up actions at all.
    #[must_use]
    pub fn shows_actions(&self, now: DateTime<Utc>) -> bool {
        if self.assignment.staggered_deadline {
            return true;
        }
        self.schedule
            .first_assignment_due(DeadlineKind::Submission)
            .map_or(true, |due_at| due_at >= now)
    }
}
