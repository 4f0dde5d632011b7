use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ids::{AssignmentId, TeamId, TopicId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub name: String,
    /// Topics carry their own deadlines instead of the assignment-wide ones.
    pub staggered_deadline: bool,
    /// Students rank topics (bids) instead of claiming one outright.
    pub is_intelligent: bool,
    pub max_team_size: u32,
    pub review_rounds: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: TopicId,
    pub assignment_id: AssignmentId,
    pub identifier: String,
    pub name: String,
    pub category: String,
    pub max_choosers: u32,
    /// `Some` while the topic is a suggestion only its proposing team may see.
    pub private_to: Option<TeamId>,
    pub micropayment: Option<i32>,
    pub description: String,
    pub link: String,
}

impl Topic {
    #[must_use]
    pub fn from_draft(id: TopicId, assignment_id: AssignmentId, draft: TopicDraft) -> Self {
        Self {
            id,
            assignment_id,
            identifier: draft.identifier,
            name: draft.name,
            category: draft.category,
            max_choosers: draft.max_choosers,
            private_to: None,
            micropayment: draft.micropayment,
            description: draft.description,
            link: draft.link,
        }
    }

    /// The editable fields, for round-tripping through an edit form.
    #[must_use]
    pub fn draft(&self) -> TopicDraft {
        TopicDraft {
            identifier: self.identifier.clone(),
            name: self.name.clone(),
            category: self.category.clone(),
            max_choosers: self.max_choosers,
            micropayment: self.micropayment,
            description: self.description.clone(),
            link: self.link.clone(),
        }
    }

    #[must_use]
    pub const fn is_public(&self) -> bool {
        self.private_to.is_none()
    }

    #[must_use]
    pub fn is_visible_to(&self, team: Option<TeamId>) -> bool {
        match self.private_to {
            None => true,
            Some(owner) => team == Some(owner),
        }
    }
}

/// The editable fields of a topic, as submitted from the topic grid.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TopicDraft {
    pub identifier: String,
    pub name: String,
    pub category: String,
    pub max_choosers: u32,
    pub micropayment: Option<i32>,
    pub description: String,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: UserId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub assignment_id: AssignmentId,
    pub name: String,
    pub members: BTreeSet<UserId>,
    /// Any uploaded file or hyperlink exists for this team.
    pub submitted_work: bool,
}

impl Team {
    #[must_use]
    pub fn new(id: TeamId, assignment_id: AssignmentId, name: impl Into<String>) -> Self {
        Self {
            id,
            assignment_id,
            name: name.into(),
            members: BTreeSet::new(),
            submitted_work: false,
        }
    }

    #[must_use]
    pub fn with_member(mut self, user: UserId) -> Self {
        self.members.insert(user);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignUpRecord {
    pub topic_id: TopicId,
    pub team_id: TeamId,
    pub is_waitlisted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bid {
    pub team_id: TeamId,
    pub topic_id: TopicId,
    pub priority: u32,
}
