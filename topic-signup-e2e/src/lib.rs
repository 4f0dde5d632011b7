//! In-memory [`SignupStore`] and sheet fixtures for the scenario tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{Mutex, Semaphore};
use topic_signup_core::{
    Assignment, AssignmentId, DeadlineKind, DeadlineSchedule, Participant, SheetParts,
    SignUpRecord, SignUpSheet, SignupError, SignupStore, Team, TeamId, Topic, TopicDraft, TopicId,
    Transition, UserId,
};
use tracing::debug;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("no sheet stored for {0}")]
    UnknownAssignment(AssignmentId),
    #[error("commit refused on request")]
    Injected,
}

#[derive(Default)]
struct State {
    sheets: HashMap<AssignmentId, SignUpSheet>,
    users: BTreeMap<String, UserId>,
    next_team: i32,
    next_topic: i32,
    committed: Vec<(AssignmentId, Vec<Transition>)>,
    fail_next_commit: bool,
    loads: usize,
    stalled: BTreeSet<AssignmentId>,
}

/// Serves seeded sheets and records every committed batch of transitions.
pub struct MemoryStore {
    state: Mutex<State>,
    // never granted; closing it lets stalled loads through
    load_gate: Semaphore,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
            load_gate: Semaphore::new(0),
        }
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads of `assignment` hang until [`Self::release_stalled_loads`].
    #[must_use]
    pub fn stall_loads_of(mut self, assignment: AssignmentId) -> Self {
        self.state.get_mut().stalled.insert(assignment);
        self
    }

    pub fn release_stalled_loads(&self) {
        self.load_gate.close();
    }

    /// Ids handed out by `create_team` and `allocate_topic_id` start above
    /// every id already in the sheet.
    #[must_use]
    pub fn with_sheet(mut self, sheet: SignUpSheet) -> Self {
        {
            let state = self.state.get_mut();
            let max_team = sheet.teams().map(|team| team.id.get()).max().unwrap_or(0);
            let max_topic = sheet.topics().map(|topic| topic.id.get()).max().unwrap_or(0);
            state.next_team = state.next_team.max(max_team);
            state.next_topic = state.next_topic.max(max_topic);
            for participant in sheet.participants() {
                state
                    .users
                    .insert(participant.name.clone(), participant.user_id);
            }
            state.sheets.insert(sheet.assignment().id, sheet);
        }
        self
    }

    /// A user known to the store but not necessarily a participant.
    #[must_use]
    pub fn with_user(mut self, name: &str, user: UserId) -> Self {
        self.state.get_mut().users.insert(name.to_owned(), user);
        self
    }

    pub async fn fail_next_commit(&self) {
        self.state.lock().await.fail_next_commit = true;
    }

    /// Every committed transition in commit order.
    pub async fn committed(&self) -> Vec<Transition> {
        self.state
            .lock()
            .await
            .committed
            .iter()
            .flat_map(|(_, transitions)| transitions.iter().cloned())
            .collect()
    }

    pub async fn commit_count(&self) -> usize {
        self.state.lock().await.committed.len()
    }

    pub async fn load_count(&self) -> usize {
        self.state.lock().await.loads
    }
}

impl SignupStore for MemoryStore {
    type Error = MemoryError;

    async fn load_sheet(&self, assignment: AssignmentId) -> Result<SignUpSheet, MemoryError> {
        let stalled = {
            let mut state = self.state.lock().await;
            state.loads += 1;
            state.stalled.contains(&assignment)
        };
        if stalled {
            debug!(%assignment, "load stalled");
            // only ever fails once the gate is closed
            let _ = self.load_gate.acquire().await;
        }
        self.state
            .lock()
            .await
            .sheets
            .get(&assignment)
            .cloned()
            .ok_or(MemoryError::UnknownAssignment(assignment))
    }

    async fn find_user_by_name(&self, name: &str) -> Result<Option<UserId>, MemoryError> {
        Ok(self.state.lock().await.users.get(name).copied())
    }

    async fn create_team(&self, assignment: AssignmentId, user: UserId) -> Result<Team, MemoryError> {
        let mut state = self.state.lock().await;
        state.next_team += 1;
        let id = TeamId(state.next_team);
        debug!(%id, %user, "team created in memory");
        Ok(Team::new(id, assignment, format!("team {}", id.get())).with_member(user))
    }

    async fn allocate_topic_id(&self, _assignment: AssignmentId) -> Result<TopicId, MemoryError> {
        let mut state = self.state.lock().await;
        state.next_topic += 1;
        Ok(TopicId(state.next_topic))
    }

    async fn commit(
        &self,
        assignment: AssignmentId,
        transitions: &[Transition],
    ) -> Result<(), MemoryError> {
        let mut state = self.state.lock().await;
        if state.fail_next_commit {
            state.fail_next_commit = false;
            return Err(MemoryError::Injected);
        }
        state.committed.push((assignment, transitions.to_vec()));
        Ok(())
    }
}

/// 2024-04-`day` at `hour`:00 UTC.
#[must_use]
pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, day, hour, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Builds a [`SignUpSheet`] one piece at a time.
#[derive(Debug, Clone)]
pub struct SheetBuilder {
    parts: SheetParts,
}

impl SheetBuilder {
    #[must_use]
    pub fn new(assignment: i32) -> Self {
        Self {
            parts: SheetParts {
                assignment: Assignment {
                    id: AssignmentId(assignment),
                    name: format!("assignment {assignment}"),
                    staggered_deadline: false,
                    is_intelligent: false,
                    max_team_size: 3,
                    review_rounds: 2,
                },
                topics: vec![],
                participants: vec![],
                teams: vec![],
                records: vec![],
                bids: vec![],
                schedule: DeadlineSchedule::new(),
            },
        }
    }

    #[must_use]
    pub fn staggered(mut self) -> Self {
        self.parts.assignment.staggered_deadline = true;
        self
    }

    #[must_use]
    pub fn intelligent(mut self) -> Self {
        self.parts.assignment.is_intelligent = true;
        self
    }

    #[must_use]
    pub fn topic(mut self, id: i32, max_choosers: u32) -> Self {
        let assignment = self.parts.assignment.id;
        self.parts.topics.push(Topic::from_draft(
            TopicId(id),
            assignment,
            TopicDraft {
                identifier: format!("T{id}"),
                name: format!("Topic {id}"),
                max_choosers,
                ..TopicDraft::default()
            },
        ));
        self
    }

    /// A suggested topic only `team` can see.
    #[must_use]
    pub fn suggested_topic(self, id: i32, max_choosers: u32, team: i32) -> Self {
        let mut builder = self.topic(id, max_choosers);
        if let Some(topic) = builder.parts.topics.last_mut() {
            topic.private_to = Some(TeamId(team));
        }
        builder
    }

    /// A participant named `student{user}` without a team.
    #[must_use]
    pub fn participant(mut self, user: i32) -> Self {
        self.parts.participants.push(Participant {
            user_id: UserId(user),
            name: format!("student{user}"),
        });
        self
    }

    /// A team with its members, who also become participants.
    #[must_use]
    pub fn team(mut self, id: i32, members: &[i32]) -> Self {
        let assignment = self.parts.assignment.id;
        let mut team = Team::new(TeamId(id), assignment, format!("team {id}"));
        for &user in members {
            self = self.participant(user);
            team = team.with_member(UserId(user));
        }
        self.parts.teams.push(team);
        self
    }

    #[must_use]
    pub fn submitted(mut self, team: i32) -> Self {
        if let Some(found) = self
            .parts
            .teams
            .iter_mut()
            .find(|found| found.id == TeamId(team))
        {
            found.submitted_work = true;
        }
        self
    }

    #[must_use]
    pub fn record(mut self, team: i32, topic: i32, is_waitlisted: bool) -> Self {
        self.parts.records.push(SignUpRecord {
            topic_id: TopicId(topic),
            team_id: TeamId(team),
            is_waitlisted,
        });
        self
    }

    #[must_use]
    pub fn deadline(mut self, kind: DeadlineKind, round: u32, due_at: DateTime<Utc>) -> Self {
        self.parts.schedule.set_assignment_due(kind, round, due_at);
        self
    }

    #[must_use]
    pub fn topic_deadline(
        mut self,
        topic: i32,
        kind: DeadlineKind,
        round: u32,
        due_at: DateTime<Utc>,
    ) -> Self {
        self.parts
            .schedule
            .set_topic_due(TopicId(topic), kind, round, due_at);
        self
    }

    pub fn build(self) -> Result<SignUpSheet, SignupError> {
        SignUpSheet::from_parts(self.parts)
    }
}
