// src/models.rs
use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PollVisibility {
    #[default]
    Public,
    Private,
    Friends,
}

impl PollVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollVisibility::Public => "PUBLIC",
            PollVisibility::Private => "PRIVATE",
            PollVisibility::Friends => "FRIENDS",
        }
    }
}

impl fmt::Display for PollVisibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PollVisibility {
    type Err = String;

    /// Case-insensitive, clients send both `public` and `PUBLIC`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PUBLIC" => Ok(PollVisibility::Public),
            "PRIVATE" => Ok(PollVisibility::Private),
            "FRIENDS" => Ok(PollVisibility::Friends),
            other => Err(format!("\"{other}\" is not a valid visibility")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LoyaltyTier {
    #[default]
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl LoyaltyTier {
    pub fn for_points(points: i32) -> Self {
        match points {
            p if p >= 1000 => LoyaltyTier::Platinum,
            p if p >= 500 => LoyaltyTier::Gold,
            p if p >= 100 => LoyaltyTier::Silver,
            _ => LoyaltyTier::Bronze,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoyaltyTier::Bronze => "BRONZE",
            LoyaltyTier::Silver => "SILVER",
            LoyaltyTier::Gold => "GOLD",
            LoyaltyTier::Platinum => "PLATINUM",
        }
    }
}

impl FromStr for LoyaltyTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BRONZE" => Ok(LoyaltyTier::Bronze),
            "SILVER" => Ok(LoyaltyTier::Silver),
            "GOLD" => Ok(LoyaltyTier::Gold),
            "PLATINUM" => Ok(LoyaltyTier::Platinum),
            other => Err(format!("\"{other}\" is not a valid loyalty tier")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub is_active: bool,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub loyalty_points: i32,
    pub loyalty_tier: LoyaltyTier,
}

impl User {
    /// Full name when one is on file, otherwise the email address.
    pub fn display_name(&self) -> String {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.trim().is_empty())
            .collect();

        if parts.is_empty() {
            self.email.clone()
        } else {
            parts.join(" ")
        }
    }
}

/// Partial profile update. `None` leaves a column alone; `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserChanges {
    pub first_name: Option<Option<String>>,
    pub last_name: Option<Option<String>>,
    pub phone_number: Option<Option<String>>,
    pub is_active: Option<bool>,
    pub email_verified: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
}

/// A poll with its denormalized tally. `votes` always has exactly the keys in `options`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poll {
    pub id: i64,
    pub question: String,
    pub options: Vec<String>,
    pub votes: BTreeMap<String, i64>,
    pub category: String,
    pub is_active: bool,
    pub is_anonymous: bool,
    pub duration: Option<DateTime<Utc>>,
    pub image_url: Option<String>,
    pub visibility: PollVisibility,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Poll {
    pub fn total_votes(&self) -> i64 {
        self.votes.values().sum()
    }

    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|o| o == option)
    }
}

/// Validated input for a poll insert.
#[derive(Debug, Clone)]
pub struct NewPoll {
    pub question: String,
    pub options: Vec<String>,
    pub category: String,
    pub is_anonymous: bool,
    pub duration: Option<DateTime<Utc>>,
    pub visibility: PollVisibility,
    pub image_url: Option<String>,
    pub created_by: i64,
}

impl NewPoll {
    pub fn empty_tally(&self) -> BTreeMap<String, i64> {
        self.options.iter().map(|o| (o.clone(), 0)).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub id: i64,
    pub user_id: i64,
    pub poll_id: i64,
    pub option: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct PollFilter {
    pub category: Option<String>,
    pub visibility: Option<PollVisibility>,
    pub created_by: Option<i64>,
}

impl PollFilter {
    pub fn matches(&self, poll: &Poll) -> bool {
        self.category.as_ref().is_none_or(|c| &poll.category == c)
            && self.visibility.is_none_or(|v| poll.visibility == v)
            && self.created_by.is_none_or(|u| poll.created_by == u)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PasswordReset {
    pub email: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
    pub failed_attempts: i32,
}

impl PasswordReset {
    pub fn new(email: String, code: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            email,
            code,
            expires_at,
            consumed: false,
            failed_attempts: 0,
        }
    }

    /// Still usable at `now`, whatever code is presented.
    pub fn is_live(&self, now: DateTime<Utc>, max_attempts: i32) -> bool {
        !self.consumed && self.expires_at > now && self.failed_attempts < max_attempts
    }
}

// Requests

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePollRequest {
    pub question: String,
    pub options: Vec<String>,
    pub category: String,
    #[serde(default)]
    pub is_anonymous: bool,
    pub duration: Option<DateTime<Utc>>,
    pub visibility: Option<String>,
    pub image_url: Option<String>,
    pub created_by_user_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub option: String,
    pub voter_user_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletePollQuery {
    pub user_id: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollListQuery {
    pub category: Option<String>,
    pub visibility: Option<String>,
    pub user_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddLoyaltyPointsRequest {
    pub points: i32,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyOtpRequest {
    pub email: String,
    pub otp: String,
}

// Responses

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: i64,
    pub display_name: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            display_name: user.display_name(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    pub id: i64,
    pub question: String,
    pub options: Vec<String>,
    pub votes: BTreeMap<String, i64>,
    pub category: String,
    pub is_active: bool,
    pub is_anonymous: bool,
    pub duration: Option<DateTime<Utc>>,
    pub visibility: PollVisibility,
    pub image_url: Option<String>,
    pub created_by: Option<UserSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub total_votes: i64,
}

impl PollResponse {
    pub fn new(poll: Poll, creator: Option<&User>) -> Self {
        let total_votes = poll.total_votes();
        Self {
            id: poll.id,
            question: poll.question,
            options: poll.options,
            votes: poll.votes,
            category: poll.category,
            is_active: poll.is_active,
            is_anonymous: poll.is_anonymous,
            duration: poll.duration,
            visibility: poll.visibility,
            image_url: poll.image_url,
            created_by: creator.map(UserSummary::from),
            created_at: poll.created_at,
            updated_at: poll.updated_at,
            total_votes,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VoteResponse {
    pub vote: Vote,
    pub poll: PollResponse,
}
