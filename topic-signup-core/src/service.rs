//! Async front of the engine.
//!
//! `SignupService` keeps one `SignUpSheet` per assignment behind its own
//! mutex, so at most one mutating operation per assignment is in flight and
//! assignments never wait on each other.
//! Every operation runs on a staged copy; the copy replaces the cached sheet
//! only after the store committed its transitions.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMappedMutexGuard, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::deadline::TopicDeadlineEdit;
use crate::error::{ErrorKind, SignupError};
use crate::ids::{AssignmentId, TeamId, TopicId, UserId};
use crate::ledger::{SignupOutcome, TopicOccupancy};
use crate::model::{Team, Topic, TopicDraft};
use crate::sheet::{ListView, SignUpSheet, TeamSummary};
use crate::transition::{Applied, Receipt, Transition};

/// Persistence and team-management collaborators of the engine.
pub trait SignupStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn load_sheet(
        &self,
        assignment: AssignmentId,
    ) -> impl Future<Output = Result<SignUpSheet, Self::Error>> + Send;

    fn find_user_by_name(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<UserId>, Self::Error>> + Send;

    /// Creates a team holding just `user`. Called the first time a user
    /// without a team takes a sign-up action.
    fn create_team(
        &self,
        assignment: AssignmentId,
        user: UserId,
    ) -> impl Future<Output = Result<Team, Self::Error>> + Send;

    fn allocate_topic_id(
        &self,
        assignment: AssignmentId,
    ) -> impl Future<Output = Result<TopicId, Self::Error>> + Send;

    /// Persists the transitions of one operation, all or nothing.
    fn commit(
        &self,
        assignment: AssignmentId,
        transitions: &[Transition],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

#[derive(Error, Debug)]
pub enum ServiceError<E: std::error::Error + 'static> {
    #[error(transparent)]
    Signup(#[from] SignupError),
    #[error("storage failure: {0}")]
    Store(#[source] E),
}

impl<E: std::error::Error + 'static> ServiceError<E> {
    /// `None` for storage failures.
    #[must_use]
    pub const fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Signup(error) => Some(error.kind()),
            Self::Store(_) => None,
        }
    }

    #[must_use]
    pub const fn as_signup(&self) -> Option<&SignupError> {
        match self {
            Self::Signup(error) => Some(error),
            Self::Store(_) => None,
        }
    }
}

pub struct SignupService<S> {
    store: S,
    /// The map lock only guards lookups; loading happens under the
    /// assignment's own lock.
    sheets: Mutex<HashMap<AssignmentId, Arc<Mutex<Option<SignUpSheet>>>>>,
}

impl<S: SignupStore> SignupService<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            sheets: Mutex::new(HashMap::new()),
        }
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    #[tracing::instrument(skip(self))]
    pub async fn sign_up(
        &self,
        assignment: AssignmentId,
        user: UserId,
        topic: TopicId,
        now: DateTime<Utc>,
    ) -> Result<Receipt<SignupOutcome>, ServiceError<S::Error>> {
        let mut sheet = self.lock(assignment).await?;
        let team = self.team_for(assignment, &mut sheet, user).await?;
        let receipt = self
            .apply(assignment, &mut sheet, |sheet| sheet.sign_up(team, topic, now))
            .await?;
        info!(%team, outcome = ?receipt.outcome, "signed up");
        Ok(receipt)
    }

    /// Signs up the student named `username` on their behalf.
    #[tracing::instrument(skip(self))]
    pub async fn sign_up_as_instructor(
        &self,
        assignment: AssignmentId,
        username: &str,
        topic: TopicId,
    ) -> Result<Receipt<SignupOutcome>, ServiceError<S::Error>> {
        let user = self
            .store
            .find_user_by_name(username)
            .await
            .map_err(ServiceError::Store)?
            .ok_or_else(|| SignupError::UserNotFound(username.to_owned()))?;
        let mut sheet = self.lock(assignment).await?;
        let team = self.team_for(assignment, &mut sheet, user).await?;
        let receipt = self
            .apply(assignment, &mut sheet, |sheet| {
                sheet.sign_up_as_instructor(team, topic)
            })
            .await?;
        info!(%user, %team, outcome = ?receipt.outcome, "signed up by instructor");
        Ok(receipt)
    }

    #[tracing::instrument(skip(self))]
    pub async fn drop_topic(
        &self,
        assignment: AssignmentId,
        user: UserId,
        topic: TopicId,
        now: DateTime<Utc>,
    ) -> Result<Receipt<()>, ServiceError<S::Error>> {
        let mut sheet = self.lock(assignment).await?;
        let team = sheet.team_of(user).ok_or(SignupError::NoTeam(user))?;
        let receipt = self
            .apply(assignment, &mut sheet, |sheet| sheet.drop_topic(team, topic, now))
            .await?;
        info!(%team, promoted = receipt.promoted_count(), "topic dropped");
        Ok(receipt)
    }

    #[tracing::instrument(skip(self))]
    pub async fn drop_as_instructor(
        &self,
        assignment: AssignmentId,
        team: TeamId,
        topic: TopicId,
        now: DateTime<Utc>,
    ) -> Result<Receipt<()>, ServiceError<S::Error>> {
        let mut sheet = self.lock(assignment).await?;
        let receipt = self
            .apply(assignment, &mut sheet, |sheet| {
                sheet.drop_as_instructor(team, topic, now)
            })
            .await?;
        info!(promoted = receipt.promoted_count(), "team dropped by instructor");
        Ok(receipt)
    }

    #[tracing::instrument(skip(self))]
    pub async fn set_priorities(
        &self,
        assignment: AssignmentId,
        user: UserId,
        ordered: &[TopicId],
    ) -> Result<Receipt<()>, ServiceError<S::Error>> {
        let mut sheet = self.lock(assignment).await?;
        let team = self.team_for(assignment, &mut sheet, user).await?;
        let receipt = self
            .apply(assignment, &mut sheet, |sheet| {
                sheet.set_priorities(team, ordered)
            })
            .await?;
        info!(%team, changes = receipt.transitions.len(), "priorities saved");
        Ok(receipt)
    }

    #[tracing::instrument(skip(self))]
    pub async fn clear_priorities(
        &self,
        assignment: AssignmentId,
        user: UserId,
    ) -> Result<Receipt<()>, ServiceError<S::Error>> {
        let mut sheet = self.lock(assignment).await?;
        let team = sheet.team_of(user).ok_or(SignupError::NoTeam(user))?;
        let receipt = self
            .apply(assignment, &mut sheet, |sheet| sheet.clear_priorities(team))
            .await?;
        info!(%team, removed = receipt.transitions.len(), "priorities cleared");
        Ok(receipt)
    }

    /// Creates a topic, or amends the existing topic of the same name.
    #[tracing::instrument(skip(self, draft), fields(name = %draft.name))]
    pub async fn create_topic(
        &self,
        assignment: AssignmentId,
        draft: TopicDraft,
    ) -> Result<Receipt<TopicId>, ServiceError<S::Error>> {
        let mut sheet = self.lock(assignment).await?;
        if let Some(existing) = sheet.topic_by_name(&draft.name) {
            debug!(topic = %existing, "topic name taken, amending");
            return self
                .apply(assignment, &mut sheet, |sheet| {
                    sheet
                        .amend_topic(existing, draft)
                        .map(|applied| applied.map(|()| existing))
                })
                .await;
        }
        let id = self
            .store
            .allocate_topic_id(assignment)
            .await
            .map_err(ServiceError::Store)?;
        let topic = Topic::from_draft(id, assignment, draft);
        let receipt = self
            .apply(assignment, &mut sheet, |sheet| sheet.insert_topic(topic))
            .await?;
        info!(topic = %id, "topic created");
        Ok(receipt)
    }

    #[tracing::instrument(skip(self, draft))]
    pub async fn update_topic(
        &self,
        assignment: AssignmentId,
        topic: TopicId,
        draft: TopicDraft,
    ) -> Result<Receipt<()>, ServiceError<S::Error>> {
        let mut sheet = self.lock(assignment).await?;
        let receipt = self
            .apply(assignment, &mut sheet, |sheet| sheet.update_topic(topic, draft))
            .await?;
        info!(promoted = receipt.promoted_count(), "topic updated");
        Ok(receipt)
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_topic(
        &self,
        assignment: AssignmentId,
        topic: TopicId,
    ) -> Result<Receipt<()>, ServiceError<S::Error>> {
        let mut sheet = self.lock(assignment).await?;
        let receipt = self
            .apply(assignment, &mut sheet, |sheet| sheet.remove_topic(topic))
            .await?;
        info!("topic removed");
        Ok(receipt)
    }

    #[tracing::instrument(skip(self))]
    pub async fn approve_suggested_topic(
        &self,
        assignment: AssignmentId,
        team: TeamId,
        topic: TopicId,
    ) -> Result<Receipt<()>, ServiceError<S::Error>> {
        let mut sheet = self.lock(assignment).await?;
        let receipt = self
            .apply(assignment, &mut sheet, |sheet| {
                sheet.approve_suggested_topic(team, topic)
            })
            .await?;
        info!(promoted = receipt.promoted_count(), "suggested topic approved");
        Ok(receipt)
    }

    #[tracing::instrument(skip(self))]
    pub async fn publish_suggested_topic(
        &self,
        assignment: AssignmentId,
        topic: TopicId,
    ) -> Result<Receipt<()>, ServiceError<S::Error>> {
        let mut sheet = self.lock(assignment).await?;
        self.apply(assignment, &mut sheet, |sheet| {
            sheet.publish_suggested_topic(topic)
        })
        .await
    }

    #[tracing::instrument(skip(self, edits), fields(edits = edits.len()))]
    pub async fn save_topic_deadlines(
        &self,
        assignment: AssignmentId,
        edits: &[TopicDeadlineEdit],
    ) -> Result<Receipt<()>, ServiceError<S::Error>> {
        let mut sheet = self.lock(assignment).await?;
        let receipt = self
            .apply(assignment, &mut sheet, |sheet| sheet.save_topic_deadlines(edits))
            .await?;
        info!(changes = receipt.transitions.len(), "topic deadlines saved");
        Ok(receipt)
    }

    /// A consistent copy of the assignment's sheet.
    pub async fn snapshot(
        &self,
        assignment: AssignmentId,
    ) -> Result<SignUpSheet, ServiceError<S::Error>> {
        Ok(self.lock(assignment).await?.clone())
    }

    pub async fn list_view(
        &self,
        assignment: AssignmentId,
        user: UserId,
        now: DateTime<Utc>,
    ) -> Result<ListView, ServiceError<S::Error>> {
        Ok(self.lock(assignment).await?.list_view(user, now))
    }

    pub async fn occupancy(
        &self,
        assignment: AssignmentId,
    ) -> Result<Vec<TopicOccupancy>, ServiceError<S::Error>> {
        Ok(self.lock(assignment).await?.occupancy())
    }

    pub async fn topic_teams(
        &self,
        assignment: AssignmentId,
        topic: TopicId,
    ) -> Result<Vec<TeamSummary>, ServiceError<S::Error>> {
        Ok(self.lock(assignment).await?.topic_teams(topic)?)
    }

    /// Forgets the cached sheet; the next call reloads it from the store.
    pub async fn evict(&self, assignment: AssignmentId) {
        self.sheets.lock().await.remove(&assignment);
    }

    async fn lock(
        &self,
        assignment: AssignmentId,
    ) -> Result<OwnedMappedMutexGuard<Option<SignUpSheet>, SignUpSheet>, ServiceError<S::Error>>
    {
        let slot = {
            let mut sheets = self.sheets.lock().await;
            Arc::clone(
                sheets
                    .entry(assignment)
                    .or_insert_with(|| Arc::new(Mutex::new(None))),
            )
        };
        let mut sheet = slot.lock_owned().await;
        if sheet.is_none() {
            let loaded = self
                .store
                .load_sheet(assignment)
                .await
                .map_err(ServiceError::Store)?;
            debug!(%assignment, topics = loaded.topics().count(), "sheet loaded");
            *sheet = Some(loaded);
        }
        OwnedMutexGuard::try_map(sheet, Option::as_mut).map_err(|_| {
            SignupError::InvariantViolation(format!("{assignment} has no loaded sheet")).into()
        })
    }

    async fn team_for(
        &self,
        assignment: AssignmentId,
        sheet: &mut SignUpSheet,
        user: UserId,
    ) -> Result<TeamId, ServiceError<S::Error>> {
        if !sheet.is_participant(user) {
            return Err(SignupError::NotRegisteredForAssignment { user, assignment }.into());
        }
        if let Some(team) = sheet.team_of(user) {
            return Ok(team);
        }
        let team = self
            .store
            .create_team(assignment, user)
            .await
            .map_err(ServiceError::Store)?;
        let id = team.id;
        sheet.attach_team(team)?;
        info!(%user, team = %id, "team created");
        Ok(id)
    }

    async fn apply<T>(
        &self,
        assignment: AssignmentId,
        sheet: &mut SignUpSheet,
        operation: impl FnOnce(&mut SignUpSheet) -> Result<Applied<T>, SignupError> + Send,
    ) -> Result<Receipt<T>, ServiceError<S::Error>> {
        let mut staged = sheet.clone();
        let applied = match operation(&mut staged) {
            Ok(applied) => applied,
            Err(error) => {
                debug!(%error, "operation rejected");
                return Err(error.into());
            }
        };
        if !applied.is_noop() {
            if let Err(error) = self.store.commit(assignment, &applied.transitions).await {
                warn!(%error, "commit failed, discarding staged sheet");
                return Err(ServiceError::Store(error));
            }
        }
        *sheet = staged;
        Ok(Receipt {
            outcome: applied.outcome,
            transitions: applied.transitions,
            occupancy: sheet.occupancy(),
        })
    }
}
