// src/store/mod.rs
//! Persistence seam.
//!
//! Everything the handlers know about storage goes through [`Store`]. Two
//! backends exist: [`PgStore`] for production and [`MemoryStore`] for local runs
//! without a database and for tests.
//!
//! The one write path with real consistency requirements is
//! [`Store::record_vote`]: the ledger insert and the tally increment happen as a
//! single unit, and the `(user, poll)` uniqueness is decided by the backend, not
//! by a read beforehand.
use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    LoyaltyTier, NewPoll, NewUser, PasswordReset, Poll, PollFilter, User, UserChanges, Vote,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("poll {0} does not exist")]
    PollNotFound(i64),

    #[error("user {0} does not exist")]
    UserNotFound(i64),

    #[error("user {user_id} already voted in poll {poll_id}")]
    DuplicateVote { poll_id: i64, user_id: i64 },

    #[error("email {0} is already registered")]
    DuplicateEmail(String),

    #[error("loyalty points for user {0} would overflow")]
    PointsOverflow(i64),

    /// Serialization failure or deadlock; the transaction can be replayed.
    #[error("transaction conflict ({0})")]
    Conflict(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Result of rebuilding a poll's tally from its ledger rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TallyReconciliation {
    pub poll_id: i64,
    pub before: BTreeMap<String, i64>,
    pub after: BTreeMap<String, i64>,
}

impl TallyReconciliation {
    pub fn drifted(&self) -> bool {
        self.before != self.after
    }
}

/// Rebuild a tally: every declared option present, counts taken from the ledger.
pub fn tally_from_ledger<'a>(
    options: &[String],
    ledger: impl IntoIterator<Item = &'a str>,
) -> BTreeMap<String, i64> {
    let mut tally: BTreeMap<String, i64> = options.iter().map(|o| (o.clone(), 0)).collect();
    for option in ledger {
        if let Some(count) = tally.get_mut(option) {
            *count += 1;
        }
    }
    tally
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    // users

    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError>;

    async fn get_user(&self, id: i64) -> Result<Option<User>, StoreError>;

    async fn user_exists(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.get_user(id).await?.is_some())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn list_users(&self, tier: Option<LoyaltyTier>) -> Result<Vec<User>, StoreError>;

    /// Applies the set fields of `changes` and returns the updated user.
    async fn update_user(&self, id: i64, changes: UserChanges) -> Result<User, StoreError>;

    /// Atomically adds `points` and returns the updated user. Fails with
    /// [`StoreError::PointsOverflow`] rather than wrapping or saturating.
    async fn add_loyalty_points(&self, id: i64, points: i32) -> Result<User, StoreError>;

    // polls

    async fn insert_poll(&self, poll: NewPoll) -> Result<Poll, StoreError>;

    async fn get_poll(&self, id: i64) -> Result<Option<Poll>, StoreError>;

    /// Removes the poll and its votes. Returns false if it did not exist.
    async fn delete_poll(&self, id: i64) -> Result<bool, StoreError>;

    /// Newest first.
    async fn list_polls(&self, filter: &PollFilter) -> Result<Vec<Poll>, StoreError>;

    async fn categories(&self) -> Result<Vec<String>, StoreError>;

    // votes

    /// Inserts the ledger row and increments the tally for `option` as one unit.
    ///
    /// Fails with [`StoreError::DuplicateVote`] when `(user_id, poll_id)` is
    /// already recorded, leaving the tally untouched. The caller validates the
    /// option beforehand.
    async fn record_vote(&self, poll_id: i64, user_id: i64, option: &str)
        -> Result<Vote, StoreError>;

    async fn votes_for_poll(&self, poll_id: i64) -> Result<Vec<Vote>, StoreError>;

    async fn reconcile_tally(&self, poll_id: i64) -> Result<TallyReconciliation, StoreError>;

    // password resets

    /// Stores `reset`, replacing any earlier code for the same email.
    async fn put_password_reset(&self, reset: PasswordReset) -> Result<(), StoreError>;

    async fn get_password_reset(&self, email: &str) -> Result<Option<PasswordReset>, StoreError>;

    /// Marks the code consumed if it matches and is still live at `now` with
    /// fewer than `max_attempts` wrong guesses. Returns whether it was
    /// consumed by this call.
    async fn consume_password_reset(
        &self,
        email: &str,
        code: &str,
        now: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<bool, StoreError>;

    /// Counts a wrong guess against the live code, if there is one.
    async fn record_failed_reset_attempt(&self, email: &str) -> Result<(), StoreError>;
}
