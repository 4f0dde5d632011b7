use diesel_async::pooled_connection::deadpool;
use thiserror::Error;
use topic_signup_core::SignupError;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Failed to create database pool {0}")]
    PoolBuild(#[from] deadpool::BuildError),
    #[error("Database pool failed {0}")]
    Pool(#[from] deadpool::PoolError),
    #[error("Database query failed {0}")]
    Database(#[from] diesel::result::Error),
    #[error("Column {column} holds {value}, expected a non-negative number")]
    Negative { column: &'static str, value: i32 },
    #[error("Value {0} does not fit into a database integer")]
    OutOfRange(u32),
    #[error("Unknown deadline type id {0}")]
    UnknownDeadlineType(i32),
    #[error("Stored sign-up sheet is inconsistent: {0}")]
    Inconsistent(#[from] SignupError),
}
