pub mod error;
pub mod models;
pub mod schema;

use diesel::dsl::sql;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use error::DatabaseError;
use schema::{
    assignments, bids, due_dates, participants, sign_up_topics, signed_up_teams, submissions,
    teams, teams_users, users,
};
use topic_signup_config::Config;
use topic_signup_core::{
    AssignmentId, SignUpSheet, SignupStore, Team, TeamId, TopicId, Transition, UserId,
};
use tracing::{debug, error};

use crate::models::{
    signed, AssignmentRow, BidRow, DueDateRow, NewBid, NewDueDate, NewSignedUpTeam, NewTeam,
    SheetRows, SignUpTopicRow, SignedUpTeamRow, TeamRow,
};

// https://github.com/tokio-rs/axum/tree/main/examples/diesel-async-postgres

pub fn get_database_connection(
    database_url: &str,
    max_size: usize,
) -> Result<Pool<AsyncPgConnection>, DatabaseError> {
    let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    Ok(Pool::builder(config).max_size(max_size).build()?)
}

/// [`SignupStore`] backed by Postgres.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool<AsyncPgConnection>,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: Pool<AsyncPgConnection>) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &Config) -> Result<Self, DatabaseError> {
        get_database_connection(&config.database_url, config.database_pool_size).map(Self::new)
    }
}

impl SignupStore for PgStore {
    type Error = DatabaseError;

    #[tracing::instrument(skip(self))]
    async fn load_sheet(&self, assignment: AssignmentId) -> Result<SignUpSheet, DatabaseError> {
        let mut connection = self.pool.get().await?;
        let connection: &mut AsyncPgConnection = &mut connection;
        let id = assignment.get();

        let assignment = assignments::table
            .find(id)
            .select(AssignmentRow::as_select())
            .first(connection)
            .await?;
        let topics = sign_up_topics::table
            .filter(sign_up_topics::assignment_id.eq(id))
            .order(sign_up_topics::id)
            .select(SignUpTopicRow::as_select())
            .load(connection)
            .await?;
        let topic_ids = topics.iter().map(|topic| topic.id).collect::<Vec<_>>();
        let records = signed_up_teams::table
            .filter(signed_up_teams::topic_id.eq_any(&topic_ids))
            .order(signed_up_teams::id)
            .select(SignedUpTeamRow::as_select())
            .load(connection)
            .await?;
        let bids = bids::table
            .filter(bids::topic_id.eq_any(&topic_ids))
            .order(bids::id)
            .select(BidRow::as_select())
            .load(connection)
            .await?;
        let teams = teams::table
            .filter(teams::assignment_id.eq(id))
            .order(teams::id)
            .select(TeamRow::as_select())
            .load(connection)
            .await?;
        let team_ids = teams.iter().map(|team| team.id).collect::<Vec<_>>();
        let members = teams_users::table
            .filter(teams_users::team_id.eq_any(&team_ids))
            .select((teams_users::team_id, teams_users::user_id))
            .load(connection)
            .await?;
        let submitted = submissions::table
            .filter(submissions::team_id.eq_any(&team_ids))
            .select(submissions::team_id)
            .distinct()
            .load(connection)
            .await?;
        let participants = participants::table
            .inner_join(users::table)
            .filter(participants::assignment_id.eq(id))
            .select((users::id, users::name))
            .load(connection)
            .await?;
        let due_dates = due_dates::table
            .filter(due_dates::assignment_id.eq(id))
            .select(DueDateRow::as_select())
            .load(connection)
            .await?;

        debug!(topics = topics.len(), records = records.len(), "sheet rows loaded");
        SheetRows {
            assignment,
            topics,
            records,
            bids,
            teams,
            members,
            submitted,
            participants,
            due_dates,
        }
        .into_sheet()
    }

    async fn find_user_by_name(&self, name: &str) -> Result<Option<UserId>, DatabaseError> {
        let mut connection = self.pool.get().await?;
        let connection: &mut AsyncPgConnection = &mut connection;
        Ok(users::table
            .filter(users::name.eq(name))
            .select(users::id)
            .first::<i32>(connection)
            .await
            .optional()?
            .map(UserId))
    }

    #[tracing::instrument(skip(self))]
    async fn create_team(
        &self,
        assignment: AssignmentId,
        user: UserId,
    ) -> Result<Team, DatabaseError> {
        let mut connection = self.pool.get().await?;
        let connection: &mut AsyncPgConnection = &mut connection;
        connection
            .transaction::<_, DatabaseError, _>(|connection| {
                async move {
                    let username = users::table
                        .find(user.get())
                        .select(users::name)
                        .first::<String>(connection)
                        .await?;
                    let name = format!("{username}'s team");
                    let id = diesel::insert_into(teams::table)
                        .values(NewTeam {
                            assignment_id: assignment.get(),
                            name: &name,
                        })
                        .returning(teams::id)
                        .get_result::<i32>(connection)
                        .await?;
                    diesel::insert_into(teams_users::table)
                        .values((teams_users::team_id.eq(id), teams_users::user_id.eq(user.get())))
                        .execute(connection)
                        .await?;
                    Ok(Team::new(TeamId(id), assignment, name).with_member(user))
                }
                .scope_boxed()
            })
            .await
    }

    async fn allocate_topic_id(&self, _assignment: AssignmentId) -> Result<TopicId, DatabaseError> {
        let mut connection = self.pool.get().await?;
        let connection: &mut AsyncPgConnection = &mut connection;
        let id = diesel::select(sql::<Integer>("nextval('sign_up_topics_id_seq')::int4"))
            .get_result::<i32>(connection)
            .await?;
        Ok(TopicId(id))
    }

    #[tracing::instrument(skip(self, transitions), fields(count = transitions.len()))]
    async fn commit(
        &self,
        assignment: AssignmentId,
        transitions: &[Transition],
    ) -> Result<(), DatabaseError> {
        let mut connection = self.pool.get().await?;
        let connection: &mut AsyncPgConnection = &mut connection;
        let result = connection
            .transaction::<_, DatabaseError, _>(|connection| {
                async move {
                    for transition in transitions {
                        apply_transition(connection, assignment, transition).await?;
                    }
                    Ok(())
                }
                .scope_boxed()
            })
            .await;
        if let Err(error) = &result {
            error!(%error, "transaction rolled back");
        }
        result
    }
}

async fn apply_transition(
    connection: &mut AsyncPgConnection,
    assignment: AssignmentId,
    transition: &Transition,
) -> Result<(), DatabaseError> {
    match transition {
        Transition::Confirmed { team, topic } | Transition::Waitlisted { team, topic } => {
            diesel::insert_into(signed_up_teams::table)
                .values(NewSignedUpTeam {
                    topic_id: topic.get(),
                    team_id: team.get(),
                    is_waitlisted: matches!(transition, Transition::Waitlisted { .. }),
                })
                .execute(connection)
                .await?;
        }
        Transition::Promoted { team, topic } => {
            diesel::update(
                signed_up_teams::table
                    .filter(signed_up_teams::team_id.eq(team.get()))
                    .filter(signed_up_teams::topic_id.eq(topic.get())),
            )
            .set(signed_up_teams::is_waitlisted.eq(false))
            .execute(connection)
            .await?;
        }
        Transition::Released { team, topic, .. }
        | Transition::WithdrawnFromWaitlist { team, topic } => {
            diesel::delete(
                signed_up_teams::table
                    .filter(signed_up_teams::team_id.eq(team.get()))
                    .filter(signed_up_teams::topic_id.eq(topic.get())),
            )
            .execute(connection)
            .await?;
        }
        Transition::Moved { team, from, to } => {
            // a waitlist entry on the target is superseded by the moved record
            diesel::delete(
                signed_up_teams::table
                    .filter(signed_up_teams::team_id.eq(team.get()))
                    .filter(signed_up_teams::topic_id.eq(to.get())),
            )
            .execute(connection)
            .await?;
            diesel::update(
                signed_up_teams::table
                    .filter(signed_up_teams::team_id.eq(team.get()))
                    .filter(signed_up_teams::topic_id.eq(from.get())),
            )
            .set((
                signed_up_teams::topic_id.eq(to.get()),
                signed_up_teams::is_waitlisted.eq(false),
            ))
            .execute(connection)
            .await?;
        }
        Transition::CapacityChanged { topic, to, .. } => {
            diesel::update(sign_up_topics::table.find(topic.get()))
                .set(sign_up_topics::max_choosers.eq(signed(*to)?))
                .execute(connection)
                .await?;
        }
        Transition::TopicCreated { topic } => {
            diesel::insert_into(sign_up_topics::table)
                .values(SignUpTopicRow::try_from(topic)?)
                .execute(connection)
                .await?;
        }
        Transition::TopicUpdated { topic } => {
            diesel::update(sign_up_topics::table.find(topic.id.get()))
                .set(SignUpTopicRow::try_from(topic)?)
                .execute(connection)
                .await?;
        }
        Transition::TopicRemoved { topic } => {
            diesel::delete(due_dates::table.filter(due_dates::topic_id.eq(topic.get())))
                .execute(connection)
                .await?;
            diesel::delete(sign_up_topics::table.find(topic.get()))
                .execute(connection)
                .await?;
        }
        Transition::TopicPublished { topic } => {
            diesel::update(sign_up_topics::table.find(topic.get()))
                .set(sign_up_topics::private_to.eq(None::<i32>))
                .execute(connection)
                .await?;
        }
        Transition::BidSet {
            team,
            topic,
            priority,
        } => {
            let priority = signed(*priority)?;
            diesel::insert_into(bids::table)
                .values(NewBid {
                    topic_id: topic.get(),
                    team_id: team.get(),
                    priority,
                })
                .on_conflict((bids::team_id, bids::topic_id))
                .do_update()
                .set(bids::priority.eq(priority))
                .execute(connection)
                .await?;
        }
        Transition::BidRemoved { team, topic } => {
            diesel::delete(
                bids::table
                    .filter(bids::team_id.eq(team.get()))
                    .filter(bids::topic_id.eq(topic.get())),
            )
            .execute(connection)
            .await?;
        }
        Transition::TopicDeadlineSet {
            topic,
            kind,
            round,
            due_at,
        } => {
            let round = signed(*round)?;
            delete_topic_due_date(connection, *topic, kind.type_id(), round).await?;
            diesel::insert_into(due_dates::table)
                .values(NewDueDate {
                    assignment_id: assignment.get(),
                    topic_id: Some(topic.get()),
                    deadline_type_id: kind.type_id(),
                    round,
                    due_at: *due_at,
                })
                .execute(connection)
                .await?;
        }
        Transition::TopicDeadlineCleared { topic, kind, round } => {
            delete_topic_due_date(connection, *topic, kind.type_id(), signed(*round)?).await?;
        }
    }
    Ok(())
}

async fn delete_topic_due_date(
    connection: &mut AsyncPgConnection,
    topic: TopicId,
    deadline_type_id: i32,
    round: i32,
) -> Result<(), DatabaseError> {
    diesel::delete(
        due_dates::table
            .filter(due_dates::topic_id.eq(topic.get()))
            .filter(due_dates::deadline_type_id.eq(deadline_type_id))
            .filter(due_dates::round.eq(round)),
    )
    .execute(connection)
    .await?;
    Ok(())
}
