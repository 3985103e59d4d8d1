// src/store/memory.rs
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{tally_from_ledger, Store, StoreError, TallyReconciliation};
use crate::models::{
    LoyaltyTier, NewPoll, NewUser, PasswordReset, Poll, PollFilter, User, UserChanges, Vote,
};

/// Process-local store. Every operation runs under one mutex, which gives the
/// vote path the same all-or-nothing behavior as a database transaction.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    users: BTreeMap<i64, User>,
    polls: BTreeMap<i64, Poll>,
    votes: Vec<Vote>,
    resets: HashMap<String, PasswordReset>,
    next_user_id: i64,
    next_poll_id: i64,
    next_vote_id: i64,
}

fn next_id(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut inner = self.lock()?;

        if inner
            .users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(StoreError::DuplicateEmail(user.email));
        }

        let id = next_id(&mut inner.next_user_id);
        let created = User {
            id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            phone_number: user.phone_number,
            is_active: true,
            email_verified: false,
            created_at: Utc::now(),
            updated_at: None,
            last_login_at: None,
            loyalty_points: 0,
            loyalty_tier: LoyaltyTier::Bronze,
        };
        inner.users.insert(id, created.clone());
        Ok(created)
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.lock()?.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .lock()?
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn list_users(&self, tier: Option<LoyaltyTier>) -> Result<Vec<User>, StoreError> {
        Ok(self
            .lock()?
            .users
            .values()
            .filter(|u| tier.is_none_or(|t| u.loyalty_tier == t))
            .cloned()
            .collect())
    }

    async fn update_user(&self, id: i64, changes: UserChanges) -> Result<User, StoreError> {
        let mut inner = self.lock()?;
        let user = inner.users.get_mut(&id).ok_or(StoreError::UserNotFound(id))?;

        if let Some(first_name) = changes.first_name {
            user.first_name = first_name;
        }
        if let Some(last_name) = changes.last_name {
            user.last_name = last_name;
        }
        if let Some(phone_number) = changes.phone_number {
            user.phone_number = phone_number;
        }
        if let Some(is_active) = changes.is_active {
            user.is_active = is_active;
        }
        if let Some(email_verified) = changes.email_verified {
            user.email_verified = email_verified;
        }
        user.updated_at = Some(Utc::now());
        Ok(user.clone())
    }

    async fn add_loyalty_points(&self, id: i64, points: i32) -> Result<User, StoreError> {
        let mut inner = self.lock()?;
        let user = inner.users.get_mut(&id).ok_or(StoreError::UserNotFound(id))?;

        user.loyalty_points = user
            .loyalty_points
            .checked_add(points)
            .ok_or(StoreError::PointsOverflow(id))?;
        user.loyalty_tier = LoyaltyTier::for_points(user.loyalty_points);
        user.updated_at = Some(Utc::now());
        Ok(user.clone())
    }

    async fn insert_poll(&self, poll: NewPoll) -> Result<Poll, StoreError> {
        let mut inner = self.lock()?;

        if !inner.users.contains_key(&poll.created_by) {
            return Err(StoreError::UserNotFound(poll.created_by));
        }

        let id = next_id(&mut inner.next_poll_id);
        let votes = poll.empty_tally();
        let created = Poll {
            id,
            question: poll.question,
            options: poll.options,
            votes,
            category: poll.category,
            is_active: true,
            is_anonymous: poll.is_anonymous,
            duration: poll.duration,
            image_url: poll.image_url,
            visibility: poll.visibility,
            created_by: poll.created_by,
            created_at: Utc::now(),
            updated_at: None,
        };
        inner.polls.insert(id, created.clone());
        Ok(created)
    }

    async fn get_poll(&self, id: i64) -> Result<Option<Poll>, StoreError> {
        Ok(self.lock()?.polls.get(&id).cloned())
    }

    async fn delete_poll(&self, id: i64) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;

        if inner.polls.remove(&id).is_none() {
            return Ok(false);
        }
        inner.votes.retain(|v| v.poll_id != id);
        Ok(true)
    }

    async fn list_polls(&self, filter: &PollFilter) -> Result<Vec<Poll>, StoreError> {
        let inner = self.lock()?;
        let mut polls: Vec<Poll> = inner
            .polls
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        polls.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(polls)
    }

    async fn categories(&self) -> Result<Vec<String>, StoreError> {
        let inner = self.lock()?;
        let categories: BTreeSet<&String> = inner.polls.values().map(|p| &p.category).collect();
        Ok(categories.into_iter().cloned().collect())
    }

    async fn record_vote(
        &self,
        poll_id: i64,
        user_id: i64,
        option: &str,
    ) -> Result<Vote, StoreError> {
        let mut inner = self.lock()?;

        if !inner.users.contains_key(&user_id) {
            return Err(StoreError::UserNotFound(user_id));
        }
        if !inner.polls.contains_key(&poll_id) {
            return Err(StoreError::PollNotFound(poll_id));
        }
        if inner
            .votes
            .iter()
            .any(|v| v.poll_id == poll_id && v.user_id == user_id)
        {
            return Err(StoreError::DuplicateVote { poll_id, user_id });
        }

        let poll = inner
            .polls
            .get_mut(&poll_id)
            .ok_or(StoreError::PollNotFound(poll_id))?;
        let Some(count) = poll.votes.get_mut(option) else {
            return Err(StoreError::Corrupt(format!(
                "poll {poll_id} has no tally entry for {option:?}"
            )));
        };
        *count += 1;
        poll.updated_at = Some(Utc::now());

        let vote = Vote {
            id: next_id(&mut inner.next_vote_id),
            user_id,
            poll_id,
            option: option.to_string(),
            timestamp: Utc::now(),
        };
        inner.votes.push(vote.clone());
        Ok(vote)
    }

    async fn votes_for_poll(&self, poll_id: i64) -> Result<Vec<Vote>, StoreError> {
        Ok(self
            .lock()?
            .votes
            .iter()
            .filter(|v| v.poll_id == poll_id)
            .cloned()
            .collect())
    }

    async fn reconcile_tally(&self, poll_id: i64) -> Result<TallyReconciliation, StoreError> {
        let mut inner = self.lock()?;
        let Inner { polls, votes, .. } = &mut *inner;

        let poll = polls
            .get_mut(&poll_id)
            .ok_or(StoreError::PollNotFound(poll_id))?;
        let after = tally_from_ledger(
            &poll.options,
            votes
                .iter()
                .filter(|v| v.poll_id == poll_id)
                .map(|v| v.option.as_str()),
        );
        let before = std::mem::replace(&mut poll.votes, after.clone());
        if before != after {
            poll.updated_at = Some(Utc::now());
        }

        Ok(TallyReconciliation {
            poll_id,
            before,
            after,
        })
    }

    async fn put_password_reset(&self, reset: PasswordReset) -> Result<(), StoreError> {
        self.lock()?
            .resets
            .insert(reset.email.to_ascii_lowercase(), reset);
        Ok(())
    }

    async fn get_password_reset(&self, email: &str) -> Result<Option<PasswordReset>, StoreError> {
        Ok(self
            .lock()?
            .resets
            .get(&email.to_ascii_lowercase())
            .cloned())
    }

    async fn consume_password_reset(
        &self,
        email: &str,
        code: &str,
        now: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;

        match inner.resets.get_mut(&email.to_ascii_lowercase()) {
            Some(reset) if reset.is_live(now, max_attempts) && reset.code == code => {
                reset.consumed = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_failed_reset_attempt(&self, email: &str) -> Result<(), StoreError> {
        if let Some(reset) = self.lock()?.resets.get_mut(&email.to_ascii_lowercase()) {
            reset.failed_attempts = reset.failed_attempts.saturating_add(1);
        }
        Ok(())
    }
}
