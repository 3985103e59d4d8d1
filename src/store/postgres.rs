// src/store/postgres.rs
use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::Json, PgPool, Row};

use super::{tally_from_ledger, Store, StoreError, TallyReconciliation};
use crate::models::{
    LoyaltyTier, NewPoll, NewUser, PasswordReset, Poll, PollFilter, User, UserChanges, Vote,
};

const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const NUMERIC_VALUE_OUT_OF_RANGE: &str = "22003";

const USER_COLUMNS: &str = "id, email, first_name, last_name, phone_number, is_active, \
     email_verified, created_at, updated_at, last_login_at, loyalty_points";

const POLL_COLUMNS: &str = "id, question, options, votes, category, is_active, is_anonymous, \
     duration, image_url, visibility, created_by, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    email: String,
    first_name: Option<String>,
    last_name: Option<String>,
    phone_number: Option<String>,
    is_active: bool,
    email_verified: bool,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
    last_login_at: Option<DateTime<Utc>>,
    loyalty_points: i32,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            phone_number: row.phone_number,
            is_active: row.is_active,
            email_verified: row.email_verified,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_login_at: row.last_login_at,
            loyalty_tier: LoyaltyTier::for_points(row.loyalty_points),
            loyalty_points: row.loyalty_points,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PollRow {
    id: i64,
    question: String,
    options: Json<Vec<String>>,
    votes: Json<BTreeMap<String, i64>>,
    category: String,
    is_active: bool,
    is_anonymous: bool,
    duration: Option<DateTime<Utc>>,
    image_url: Option<String>,
    visibility: String,
    created_by: i64,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<PollRow> for Poll {
    type Error = StoreError;

    fn try_from(row: PollRow) -> Result<Self, Self::Error> {
        let visibility = row
            .visibility
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("poll {}: {e}", row.id)))?;

        Ok(Self {
            id: row.id,
            question: row.question,
            options: row.options.0,
            votes: row.votes.0,
            category: row.category,
            is_active: row.is_active,
            is_anonymous: row.is_anonymous,
            duration: row.duration,
            image_url: row.image_url,
            visibility,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Sorts database errors into the ones callers can act on.
fn classify(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if let Some(code) = db.code() {
            if code == SERIALIZATION_FAILURE || code == DEADLOCK_DETECTED {
                return StoreError::Conflict(code.into_owned());
            }
        }
    }
    StoreError::Database(err)
}

fn sqlstate(err: &sqlx::Error) -> Option<(String, Option<String>)> {
    match err {
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| (code.into_owned(), db.constraint().map(str::to_string))),
        _ => None,
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        let sql = format!(
            "INSERT INTO users (email, first_name, last_name, phone_number) \
             VALUES ($1, $2, $3, $4) RETURNING {USER_COLUMNS}"
        );

        let result = sqlx::query_as::<_, UserRow>(&sql)
            .bind(&user.email)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.phone_number)
            .fetch_one(&self.pool)
            .await;

        match result {
            Ok(row) => Ok(row.into()),
            Err(err) => match sqlstate(&err) {
                Some((code, _)) if code == UNIQUE_VIOLATION => {
                    Err(StoreError::DuplicateEmail(user.email))
                }
                _ => Err(classify(err)),
            },
        }
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");

        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;
        Ok(row.map(User::from))
    }

    async fn user_exists(&self, id: i64) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(classify)?;
        Ok(exists)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)");

        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;
        Ok(row.map(User::from))
    }

    async fn list_users(&self, tier: Option<LoyaltyTier>) -> Result<Vec<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY id");

        let rows = sqlx::query_as::<_, UserRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;

        Ok(rows
            .into_iter()
            .map(User::from)
            .filter(|u| tier.is_none_or(|t| u.loyalty_tier == t))
            .collect())
    }

    async fn update_user(&self, id: i64, changes: UserChanges) -> Result<User, StoreError> {
        // $2/$4/$6 say whether the nullable column is being written at all.
        let sql = format!(
            "UPDATE users SET \
                 first_name = CASE WHEN $2 THEN $3 ELSE first_name END, \
                 last_name = CASE WHEN $4 THEN $5 ELSE last_name END, \
                 phone_number = CASE WHEN $6 THEN $7 ELSE phone_number END, \
                 is_active = COALESCE($8, is_active), \
                 email_verified = COALESCE($9, email_verified), \
                 updated_at = now() \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        );

        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .bind(changes.first_name.is_some())
            .bind(changes.first_name.flatten())
            .bind(changes.last_name.is_some())
            .bind(changes.last_name.flatten())
            .bind(changes.phone_number.is_some())
            .bind(changes.phone_number.flatten())
            .bind(changes.is_active)
            .bind(changes.email_verified)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;
        row.map(User::from).ok_or(StoreError::UserNotFound(id))
    }

    async fn add_loyalty_points(&self, id: i64, points: i32) -> Result<User, StoreError> {
        let sql = format!(
            "UPDATE users SET loyalty_points = loyalty_points + $2, updated_at = now() \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        );

        let result = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .bind(points)
            .fetch_optional(&self.pool)
            .await;

        match result {
            Ok(row) => row.map(User::from).ok_or(StoreError::UserNotFound(id)),
            Err(err) => match sqlstate(&err) {
                Some((code, _)) if code == NUMERIC_VALUE_OUT_OF_RANGE => {
                    Err(StoreError::PointsOverflow(id))
                }
                _ => Err(classify(err)),
            },
        }
    }

    async fn insert_poll(&self, poll: NewPoll) -> Result<Poll, StoreError> {
        let sql = format!(
            "INSERT INTO polls \
             (question, options, votes, category, is_anonymous, duration, image_url, visibility, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {POLL_COLUMNS}"
        );

        let result = sqlx::query_as::<_, PollRow>(&sql)
            .bind(&poll.question)
            .bind(Json(&poll.options))
            .bind(Json(poll.empty_tally()))
            .bind(&poll.category)
            .bind(poll.is_anonymous)
            .bind(poll.duration)
            .bind(&poll.image_url)
            .bind(poll.visibility.as_str())
            .bind(poll.created_by)
            .fetch_one(&self.pool)
            .await;

        match result {
            Ok(row) => row.try_into(),
            Err(err) => match sqlstate(&err) {
                Some((code, _)) if code == FOREIGN_KEY_VIOLATION => {
                    Err(StoreError::UserNotFound(poll.created_by))
                }
                _ => Err(classify(err)),
            },
        }
    }

    async fn get_poll(&self, id: i64) -> Result<Option<Poll>, StoreError> {
        let sql = format!("SELECT {POLL_COLUMNS} FROM polls WHERE id = $1");

        sqlx::query_as::<_, PollRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?
            .map(Poll::try_from)
            .transpose()
    }

    async fn delete_poll(&self, id: i64) -> Result<bool, StoreError> {
        // poll_votes rows go with it via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM polls WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_polls(&self, filter: &PollFilter) -> Result<Vec<Poll>, StoreError> {
        let sql = format!(
            "SELECT {POLL_COLUMNS} FROM polls \
             WHERE ($1::text IS NULL OR category = $1) \
               AND ($2::text IS NULL OR visibility = $2) \
               AND ($3::bigint IS NULL OR created_by = $3) \
             ORDER BY created_at DESC, id DESC"
        );

        let rows = sqlx::query_as::<_, PollRow>(&sql)
            .bind(&filter.category)
            .bind(filter.visibility.map(|v| v.as_str()))
            .bind(filter.created_by)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;

        rows.into_iter().map(Poll::try_from).collect()
    }

    async fn categories(&self) -> Result<Vec<String>, StoreError> {
        sqlx::query_scalar("SELECT DISTINCT category FROM polls ORDER BY category")
            .fetch_all(&self.pool)
            .await
            .map_err(classify)
    }

    async fn record_vote(
        &self,
        poll_id: i64,
        user_id: i64,
        option: &str,
    ) -> Result<Vote, StoreError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;

        // The unique (user_id, poll_id) constraint decides the race; a losing
        // insert returns no row.
        let inserted = sqlx::query_as::<_, Vote>(
            "INSERT INTO poll_votes (user_id, poll_id, option) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id, poll_id) DO NOTHING \
             RETURNING id, user_id, poll_id, option, timestamp",
        )
        .bind(user_id)
        .bind(poll_id)
        .bind(option)
        .fetch_optional(&mut *tx)
        .await;

        let vote = match inserted {
            Ok(Some(vote)) => vote,
            Ok(None) => return Err(StoreError::DuplicateVote { poll_id, user_id }),
            Err(err) => {
                return Err(match sqlstate(&err) {
                    Some((code, Some(constraint))) if code == FOREIGN_KEY_VIOLATION => {
                        if constraint.contains("user") {
                            StoreError::UserNotFound(user_id)
                        } else {
                            StoreError::PollNotFound(poll_id)
                        }
                    }
                    _ => classify(err),
                })
            }
        };

        // Single statement under the row lock, so concurrent increments serialize.
        let updated = sqlx::query(
            "UPDATE polls \
             SET votes = jsonb_set(votes, ARRAY[$2::text], to_jsonb((votes ->> $2::text)::bigint + 1)), \
                 updated_at = now() \
             WHERE id = $1 AND votes ? $2::text",
        )
        .bind(poll_id)
        .bind(option)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        if updated.rows_affected() != 1 {
            return Err(StoreError::PollNotFound(poll_id));
        }

        tx.commit().await.map_err(classify)?;
        Ok(vote)
    }

    async fn votes_for_poll(&self, poll_id: i64) -> Result<Vec<Vote>, StoreError> {
        sqlx::query_as::<_, Vote>(
            "SELECT id, user_id, poll_id, option, timestamp FROM poll_votes \
             WHERE poll_id = $1 ORDER BY id",
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)
    }

    async fn reconcile_tally(&self, poll_id: i64) -> Result<TallyReconciliation, StoreError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;

        let row = sqlx::query("SELECT options, votes FROM polls WHERE id = $1 FOR UPDATE")
            .bind(poll_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(classify)?
            .ok_or(StoreError::PollNotFound(poll_id))?;
        let options: Json<Vec<String>> = row.try_get("options")?;
        let before: Json<BTreeMap<String, i64>> = row.try_get("votes")?;

        let ledger: Vec<String> = sqlx::query_scalar("SELECT option FROM poll_votes WHERE poll_id = $1")
            .bind(poll_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(classify)?;
        let after = tally_from_ledger(&options.0, ledger.iter().map(String::as_str));

        if before.0 != after {
            sqlx::query("UPDATE polls SET votes = $2, updated_at = now() WHERE id = $1")
                .bind(poll_id)
                .bind(Json(&after))
                .execute(&mut *tx)
                .await
                .map_err(classify)?;
        }

        tx.commit().await.map_err(classify)?;
        Ok(TallyReconciliation {
            poll_id,
            before: before.0,
            after,
        })
    }

    async fn put_password_reset(&self, reset: PasswordReset) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO password_resets (email, code, expires_at, consumed) \
             VALUES (lower($1), $2, $3, FALSE) \
             ON CONFLICT (email) DO UPDATE \
             SET code = EXCLUDED.code, expires_at = EXCLUDED.expires_at, consumed = FALSE, \
                 failed_attempts = 0",
        )
        .bind(&reset.email)
        .bind(&reset.code)
        .bind(reset.expires_at)
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        Ok(())
    }

    async fn get_password_reset(&self, email: &str) -> Result<Option<PasswordReset>, StoreError> {
        sqlx::query_as::<_, PasswordReset>(
            "SELECT email, code, expires_at, consumed, failed_attempts FROM password_resets \
             WHERE email = lower($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)
    }

    async fn consume_password_reset(
        &self,
        email: &str,
        code: &str,
        now: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE password_resets SET consumed = TRUE \
             WHERE email = lower($1) AND code = $2 AND NOT consumed AND expires_at > $3 \
               AND failed_attempts < $4",
        )
        .bind(email)
        .bind(code)
        .bind(now)
        .bind(max_attempts)
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_failed_reset_attempt(&self, email: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE password_resets SET failed_attempts = failed_attempts + 1 \
             WHERE email = lower($1) AND NOT consumed",
        )
        .bind(email)
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        Ok(())
    }
}
