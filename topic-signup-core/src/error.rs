use std::borrow::Cow;

use thiserror::Error;

use crate::deadline::{DeadlineKind, DenyReason};
use crate::ids::{AssignmentId, TeamId, TopicId, UserId};

/// Coarse classification callers use to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    DeniedByDeadline,
    CapacityDecreaseNotAllowed,
    /// A rule of the sign-up sheet refused the request; not a system failure.
    BusinessRule,
    InvariantViolation,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignupError {
    #[error("{0} not found")]
    TopicNotFound(TopicId),
    #[error("{0} not found")]
    TeamNotFound(TeamId),
    #[error("{0} has no team for this assignment")]
    NoTeam(UserId),
    #[error("no user named {0:?}")]
    UserNotFound(String),
    #[error("{user} is not a participant of {assignment}")]
    NotRegisteredForAssignment {
        user: UserId,
        assignment: AssignmentId,
    },
    #[error("{team} holds no sign-up on {topic}")]
    NotSignedUp { team: TeamId, topic: TopicId },
    #[error("denied by deadline: {0}")]
    DeniedByDeadline(#[from] DenyReason),
    #[error(
        "the maximum number of choosers of {topic} can only be increased (current {current}, \
         requested {requested})"
    )]
    CapacityDecreaseNotAllowed {
        topic: TopicId,
        current: u32,
        requested: u32,
    },
    #[error("{team} is already signed up for {topic}")]
    AlreadySignedUp { team: TeamId, topic: TopicId },
    #[error("{topic} was ranked more than once")]
    DuplicateBid { topic: TopicId },
    #[error("{0} has no free slot")]
    TopicFull(TopicId),
    #[error("the assignment has no {kind:?} deadline for round {round}")]
    DeadlineNotFound { kind: DeadlineKind, round: u32 },
    #[error("refusing write, invariant violated: {0}")]
    InvariantViolation(String),
}

impl SignupError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::TopicNotFound(_)
            | Self::TeamNotFound(_)
            | Self::NoTeam(_)
            | Self::UserNotFound(_)
            | Self::NotRegisteredForAssignment { .. }
            | Self::NotSignedUp { .. }
            | Self::DeadlineNotFound { .. } => ErrorKind::NotFound,
            Self::DeniedByDeadline(_) => ErrorKind::DeniedByDeadline,
            Self::CapacityDecreaseNotAllowed { .. } => ErrorKind::CapacityDecreaseNotAllowed,
            Self::AlreadySignedUp { .. } | Self::DuplicateBid { .. } | Self::TopicFull(_) => {
                ErrorKind::BusinessRule
            }
            Self::InvariantViolation(_) => ErrorKind::InvariantViolation,
        }
    }

    /// Message shown to the student who issued the request.
    #[must_use]
    pub fn user_message(&self) -> Cow<'static, str> {
        match self {
            Self::AlreadySignedUp { .. } => "You've already signed up for a topic!".into(),
            Self::DeniedByDeadline(reason) => reason.to_string().into(),
            Self::CapacityDecreaseNotAllowed { .. } => {
                "The value of the maximum number of choosers can only be increased! No change \
                 has been made to maximum choosers."
                    .into()
            }
            Self::DuplicateBid { .. } => "You ranked the same topic more than once.".into(),
            Self::TopicFull(_) => "This topic has no free slot left.".into(),
            other => other.to_string().into(),
        }
    }

    /// Message shown to an instructor acting on behalf of a student.
    #[must_use]
    pub fn instructor_message(&self) -> Cow<'static, str> {
        match self {
            Self::UserNotFound(_) => "That student does not exist!".into(),
            Self::NotRegisteredForAssignment { .. } => {
                "The student is not registered for the assignment!".into()
            }
            Self::AlreadySignedUp { .. } => "The student has already signed up for a topic!".into(),
            Self::DeniedByDeadline(reason) => reason.instructor_message().into(),
            other => other.user_message(),
        }
    }
}
