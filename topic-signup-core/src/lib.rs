//! Hands out capacity-bounded assignment topics to teams, with FIFO
//! waitlists, deadline gating and ranked bids.

pub mod bids;
pub mod deadline;
pub mod error;
pub mod ids;
pub mod ledger;
pub mod model;
pub mod service;
pub mod sheet;
pub mod transition;

pub use deadline::{DeadlineGate, DeadlineKind, DeadlineSchedule, DenyReason, TopicDeadlineEdit};
pub use error::{ErrorKind, SignupError};
pub use ids::{AssignmentId, TeamId, TopicId, UserId};
pub use ledger::{CapacityLedger, SignupOutcome, TopicOccupancy};
pub use model::{Assignment, Bid, Participant, SignUpRecord, Team, Topic, TopicDraft};
pub use service::{ServiceError, SignupService, SignupStore};
pub use sheet::{ListView, SheetParts, SignUpSheet, TeamSummary, TopicRow};
pub use transition::{Applied, Receipt, Transition};
