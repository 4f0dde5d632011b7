use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use topic_signup_core::{
    Assignment, AssignmentId, Bid, DeadlineKind, DeadlineSchedule, Participant, SheetParts,
    SignUpRecord, SignUpSheet, Team, TeamId, Topic, TopicId, UserId,
};

use crate::error::DatabaseError;
use crate::schema::{assignments, bids, due_dates, sign_up_topics, signed_up_teams, teams};

fn unsigned(column: &'static str, value: i32) -> Result<u32, DatabaseError> {
    u32::try_from(value).map_err(|_| DatabaseError::Negative { column, value })
}

pub(crate) fn signed(value: u32) -> Result<i32, DatabaseError> {
    i32::try_from(value).map_err(|_| DatabaseError::OutOfRange(value))
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = assignments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AssignmentRow {
    pub id: i32,
    pub name: String,
    pub staggered_deadline: bool,
    pub is_intelligent: bool,
    pub max_team_size: i32,
    pub rounds_of_reviews: i32,
}

impl TryFrom<AssignmentRow> for Assignment {
    type Error = DatabaseError;

    fn try_from(row: AssignmentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: AssignmentId(row.id),
            name: row.name,
            staggered_deadline: row.staggered_deadline,
            is_intelligent: row.is_intelligent,
            max_team_size: unsigned("max_team_size", row.max_team_size)?,
            review_rounds: unsigned("rounds_of_reviews", row.rounds_of_reviews)?,
        })
    }
}

#[derive(Queryable, Selectable, Insertable, AsChangeset, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = sign_up_topics)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
pub struct SignUpTopicRow {
    pub id: i32,
    pub assignment_id: i32,
    pub topic_identifier: String,
    pub topic_name: String,
    pub category: String,
    pub max_choosers: i32,
    pub private_to: Option<i32>,
    pub micropayment: Option<i32>,
    pub description: String,
    pub link: String,
}

impl TryFrom<SignUpTopicRow> for Topic {
    type Error = DatabaseError;

    fn try_from(row: SignUpTopicRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: TopicId(row.id),
            assignment_id: AssignmentId(row.assignment_id),
            identifier: row.topic_identifier,
            name: row.topic_name,
            category: row.category,
            max_choosers: unsigned("max_choosers", row.max_choosers)?,
            private_to: row.private_to.map(TeamId),
            micropayment: row.micropayment,
            description: row.description,
            link: row.link,
        })
    }
}

impl TryFrom<&Topic> for SignUpTopicRow {
    type Error = DatabaseError;

    fn try_from(topic: &Topic) -> Result<Self, Self::Error> {
        Ok(Self {
            id: topic.id.get(),
            assignment_id: topic.assignment_id.get(),
            topic_identifier: topic.identifier.clone(),
            topic_name: topic.name.clone(),
            category: topic.category.clone(),
            max_choosers: signed(topic.max_choosers)?,
            private_to: topic.private_to.map(TeamId::get),
            micropayment: topic.micropayment,
            description: topic.description.clone(),
            link: topic.link.clone(),
        })
    }
}

#[derive(Queryable, Selectable, Debug, Clone, Copy)]
#[diesel(table_name = signed_up_teams)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SignedUpTeamRow {
    pub id: i32,
    pub topic_id: i32,
    pub team_id: i32,
    pub is_waitlisted: bool,
}

impl From<SignedUpTeamRow> for SignUpRecord {
    fn from(row: SignedUpTeamRow) -> Self {
        Self {
            topic_id: TopicId(row.topic_id),
            team_id: TeamId(row.team_id),
            is_waitlisted: row.is_waitlisted,
        }
    }
}

#[derive(Insertable, Debug, Clone, Copy)]
#[diesel(table_name = signed_up_teams)]
pub struct NewSignedUpTeam {
    pub topic_id: i32,
    pub team_id: i32,
    pub is_waitlisted: bool,
}

#[derive(Queryable, Selectable, Debug, Clone, Copy)]
#[diesel(table_name = bids)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct BidRow {
    pub id: i32,
    pub topic_id: i32,
    pub team_id: i32,
    pub priority: i32,
}

impl TryFrom<BidRow> for Bid {
    type Error = DatabaseError;

    fn try_from(row: BidRow) -> Result<Self, Self::Error> {
        Ok(Self {
            team_id: TeamId(row.team_id),
            topic_id: TopicId(row.topic_id),
            priority: unsigned("priority", row.priority)?,
        })
    }
}

#[derive(Insertable, Debug, Clone, Copy)]
#[diesel(table_name = bids)]
pub struct NewBid {
    pub topic_id: i32,
    pub team_id: i32,
    pub priority: i32,
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = teams)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TeamRow {
    pub id: i32,
    pub assignment_id: i32,
    pub name: String,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = teams)]
pub struct NewTeam<'a> {
    pub assignment_id: i32,
    pub name: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, Copy)]
#[diesel(table_name = due_dates)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DueDateRow {
    pub id: i32,
    pub assignment_id: i32,
    pub topic_id: Option<i32>,
    pub deadline_type_id: i32,
    pub round: i32,
    pub due_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone, Copy)]
#[diesel(table_name = due_dates)]
pub struct NewDueDate {
    pub assignment_id: i32,
    pub topic_id: Option<i32>,
    pub deadline_type_id: i32,
    pub round: i32,
    pub due_at: DateTime<Utc>,
}

/// Everything stored for one assignment, as loaded row by row.
#[derive(Debug, Clone)]
pub struct SheetRows {
    pub assignment: AssignmentRow,
    pub topics: Vec<SignUpTopicRow>,
    /// Ordered by id, which is insertion order.
    pub records: Vec<SignedUpTeamRow>,
    pub bids: Vec<BidRow>,
    pub teams: Vec<TeamRow>,
    /// `(team_id, user_id)`
    pub members: Vec<(i32, i32)>,
    /// Teams with at least one submission.
    pub submitted: Vec<i32>,
    /// `(user_id, name)`
    pub participants: Vec<(i32, String)>,
    pub due_dates: Vec<DueDateRow>,
}

impl SheetRows {
    pub fn into_sheet(self) -> Result<SignUpSheet, DatabaseError> {
        let assignment = Assignment::try_from(self.assignment)?;

        let mut members = BTreeMap::<i32, BTreeSet<UserId>>::new();
        for (team, user) in self.members {
            members.entry(team).or_default().insert(UserId(user));
        }
        let submitted = self.submitted.into_iter().collect::<BTreeSet<_>>();
        let teams = self
            .teams
            .into_iter()
            .map(|row| Team {
                id: TeamId(row.id),
                assignment_id: AssignmentId(row.assignment_id),
                name: row.name,
                members: members.remove(&row.id).unwrap_or_default(),
                submitted_work: submitted.contains(&row.id),
            })
            .collect();

        let mut schedule = DeadlineSchedule::new();
        for row in self.due_dates {
            let kind = DeadlineKind::from_type_id(row.deadline_type_id)
                .ok_or(DatabaseError::UnknownDeadlineType(row.deadline_type_id))?;
            let round = unsigned("round", row.round)?;
            match row.topic_id {
                Some(topic) => schedule.set_topic_due(TopicId(topic), kind, round, row.due_at),
                None => schedule.set_assignment_due(kind, round, row.due_at),
            }
        }

        Ok(SignUpSheet::from_parts(SheetParts {
            assignment,
            topics: self
                .topics
                .into_iter()
                .map(Topic::try_from)
                .collect::<Result<_, _>>()?,
            participants: self
                .participants
                .into_iter()
                .map(|(user_id, name)| Participant {
                    user_id: UserId(user_id),
                    name,
                })
                .collect(),
            teams,
            records: self.records.into_iter().map(SignUpRecord::from).collect(),
            bids: self
                .bids
                .into_iter()
                .map(Bid::try_from)
                .collect::<Result<_, _>>()?,
            schedule,
        })?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use topic_signup_core::SignupOutcome;

    use super::*;

    fn rows() -> SheetRows {
        SheetRows {
            assignment: AssignmentRow {
                id: 3,
                name: "Wiki textbook".to_owned(),
                staggered_deadline: true,
                is_intelligent: false,
                max_team_size: 2,
                rounds_of_reviews: 1,
            },
            topics: vec![SignUpTopicRow {
                id: 30,
                assignment_id: 3,
                topic_identifier: "1.1".to_owned(),
                topic_name: "Linked lists".to_owned(),
                category: String::new(),
                max_choosers: 1,
                private_to: None,
                micropayment: None,
                description: String::new(),
                link: String::new(),
            }],
            records: vec![
                SignedUpTeamRow {
                    id: 1,
                    topic_id: 30,
                    team_id: 11,
                    is_waitlisted: false,
                },
                SignedUpTeamRow {
                    id: 2,
                    topic_id: 30,
                    team_id: 12,
                    is_waitlisted: true,
                },
            ],
            bids: vec![],
            teams: vec![
                TeamRow {
                    id: 11,
                    assignment_id: 3,
                    name: "alpha".to_owned(),
                },
                TeamRow {
                    id: 12,
                    assignment_id: 3,
                    name: "beta".to_owned(),
                },
            ],
            members: vec![(11, 101), (12, 102)],
            submitted: vec![11],
            participants: vec![(101, "ada".to_owned()), (102, "grace".to_owned())],
            due_dates: vec![
                DueDateRow {
                    id: 1,
                    assignment_id: 3,
                    topic_id: None,
                    deadline_type_id: 1,
                    round: 1,
                    due_at: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
                },
                DueDateRow {
                    id: 2,
                    assignment_id: 3,
                    topic_id: Some(30),
                    deadline_type_id: 1,
                    round: 1,
                    due_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
                },
            ],
        }
    }

    #[test]
    fn rows_assemble_into_a_sheet() {
        let sheet = rows().into_sheet().unwrap();

        assert_eq!(sheet.confirmed_topic(TeamId(11)), Some(TopicId(30)));
        assert!(sheet.team(TeamId(11)).unwrap().submitted_work);
        assert!(!sheet.team(TeamId(12)).unwrap().submitted_work);
        assert_eq!(sheet.team_of(UserId(102)), Some(TeamId(12)));
        assert_eq!(
            sheet.gate().signup_deadline(TopicId(30)),
            Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn waitlist_order_survives_loading() {
        let mut sheet = rows().into_sheet().unwrap();
        let applied = sheet.sign_up_as_instructor(TeamId(12), TopicId(30)).unwrap();
        assert_eq!(applied.outcome, SignupOutcome::Waitlisted { position: 1 });
    }

    #[test]
    fn unknown_deadline_type_is_rejected() {
        let mut rows = rows();
        rows.due_dates[0].deadline_type_id = 4;
        assert!(matches!(
            rows.into_sheet(),
            Err(DatabaseError::UnknownDeadlineType(4))
        ));
    }

    #[test]
    fn negative_capacity_is_rejected() {
        let mut rows = rows();
        rows.topics[0].max_choosers = -1;
        assert!(matches!(
            rows.into_sheet(),
            Err(DatabaseError::Negative {
                column: "max_choosers",
                value: -1,
            })
        ));
    }

    #[test]
    fn overbooked_rows_are_refused() {
        let mut rows = rows();
        rows.records[1].is_waitlisted = false;
        assert!(matches!(
            rows.into_sheet(),
            Err(DatabaseError::Inconsistent(_))
        ));
    }

    #[test]
    fn topic_round_trips_through_row() {
        let topic = Topic::try_from(rows().topics.remove(0)).unwrap();
        let row = SignUpTopicRow::try_from(&topic).unwrap();
        assert_eq!(row, rows().topics[0]);
    }
}
