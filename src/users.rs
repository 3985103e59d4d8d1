// src/users.rs
use tracing::info;

use crate::{
    error::{AppError, AppResult, FieldErrors, POINTS_OVERFLOW},
    models::{CreateUserRequest, LoyaltyTier, NewUser, UpdateUserRequest, User, UserChanges},
    store::Store,
};

const NAME_MAX: usize = 150;
const PHONE_MAX: usize = 20;

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

pub async fn create_user(store: &dyn Store, req: CreateUserRequest) -> AppResult<User> {
    let email = req.email.trim().to_string();
    if !looks_like_email(&email) {
        return Err(AppError::field("email", "Enter a valid email address."));
    }

    let user = store
        .insert_user(NewUser {
            email,
            first_name: blank_to_none(req.first_name),
            last_name: blank_to_none(req.last_name),
            phone_number: blank_to_none(req.phone_number),
        })
        .await?;

    info!(user_id = user.id, "user created");
    Ok(user)
}

pub async fn get_user(store: &dyn Store, id: i64) -> AppResult<User> {
    store
        .get_user(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {id}")))
}

pub async fn get_user_by_email(store: &dyn Store, email: &str) -> AppResult<User> {
    let email = email.trim();
    store
        .find_user_by_email(email)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User with email {email}")))
}

fn profile_field(
    errors: &mut FieldErrors,
    field: &str,
    value: Option<String>,
    max: usize,
) -> Option<Option<String>> {
    let value = value?;
    if value.trim().chars().count() > max {
        errors
            .entry(field.to_string())
            .or_default()
            .push(format!("Ensure this field has no more than {max} characters."));
    }
    Some(blank_to_none(Some(value)))
}

/// Profile edit. Omitted fields stay as they are, blank ones are cleared.
pub async fn update_user(store: &dyn Store, id: i64, req: UpdateUserRequest) -> AppResult<User> {
    let mut errors = FieldErrors::new();
    let changes = UserChanges {
        first_name: profile_field(&mut errors, "firstName", req.first_name, NAME_MAX),
        last_name: profile_field(&mut errors, "lastName", req.last_name, NAME_MAX),
        phone_number: profile_field(&mut errors, "phoneNumber", req.phone_number, PHONE_MAX),
        ..Default::default()
    };
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let user = store.update_user(id, changes).await?;
    info!(user_id = id, "user updated");
    Ok(user)
}

pub async fn verify_email(store: &dyn Store, id: i64) -> AppResult<User> {
    let changes = UserChanges {
        email_verified: Some(true),
        ..Default::default()
    };
    let user = store.update_user(id, changes).await?;
    info!(user_id = id, "email verified");
    Ok(user)
}

/// Deactivated users drop out of the active listing; their polls and votes stay.
pub async fn deactivate_user(store: &dyn Store, id: i64) -> AppResult<User> {
    let changes = UserChanges {
        is_active: Some(false),
        ..Default::default()
    };
    let user = store.update_user(id, changes).await?;
    info!(user_id = id, "user deactivated");
    Ok(user)
}

pub async fn list_active_users(store: &dyn Store) -> AppResult<Vec<User>> {
    let users = store.list_users(None).await?;
    Ok(users.into_iter().filter(|u| u.is_active).collect())
}

pub async fn list_users(store: &dyn Store, tier: Option<LoyaltyTier>) -> AppResult<Vec<User>> {
    Ok(store.list_users(tier).await?)
}

pub async fn email_exists(store: &dyn Store, email: &str) -> AppResult<bool> {
    Ok(store.find_user_by_email(email.trim()).await?.is_some())
}

pub async fn add_loyalty_points(store: &dyn Store, id: i64, points: i32) -> AppResult<User> {
    if points < 1 {
        return Err(AppError::field(
            "points",
            "Ensure this value is greater than or equal to 1.",
        ));
    }

    let current = get_user(store, id).await?;
    if current.loyalty_points.checked_add(points).is_none() {
        return Err(AppError::field("points", POINTS_OVERFLOW));
    }

    let before = current.loyalty_tier;
    let user = store.add_loyalty_points(id, points).await?;

    if user.loyalty_tier != before {
        info!(user_id = id, from = before.as_str(), to = user.loyalty_tier.as_str(), "loyalty tier changed");
    }
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn request(email: &str) -> CreateUserRequest {
        CreateUserRequest {
            email: email.into(),
            first_name: Some("  ".into()),
            last_name: Some("Lovelace".into()),
            phone_number: None,
        }
    }

    #[test]
    fn tier_thresholds() {
        assert_eq!(LoyaltyTier::for_points(0), LoyaltyTier::Bronze);
        assert_eq!(LoyaltyTier::for_points(99), LoyaltyTier::Bronze);
        assert_eq!(LoyaltyTier::for_points(100), LoyaltyTier::Silver);
        assert_eq!(LoyaltyTier::for_points(500), LoyaltyTier::Gold);
        assert_eq!(LoyaltyTier::for_points(1000), LoyaltyTier::Platinum);
    }

    #[test]
    fn email_shape() {
        assert!(looks_like_email("a@b.co"));
        assert!(!looks_like_email("a@b"));
        assert!(!looks_like_email("@b.co"));
        assert!(!looks_like_email("plain"));
    }

    #[tokio::test]
    async fn create_normalizes_blank_names() {
        let store = MemoryStore::new();
        let user = create_user(&store, request("ada@example.com")).await.unwrap();

        assert_eq!(user.first_name, None);
        assert_eq!(user.display_name(), "Lovelace");
        assert!(email_exists(&store, "ADA@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_email_is_a_field_error() {
        let store = MemoryStore::new();
        create_user(&store, request("ada@example.com")).await.unwrap();

        let err = create_user(&store, request("ada@example.com")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(ref e) if e.contains_key("email")));
    }

    #[tokio::test]
    async fn profile_update_and_flags() {
        let store = MemoryStore::new();
        let user = create_user(&store, request("ada@example.com")).await.unwrap();
        assert!(user.is_active);

        let user = update_user(
            &store,
            user.id,
            UpdateUserRequest {
                first_name: Some("Ada".into()),
                phone_number: Some("".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(user.display_name(), "Ada Lovelace");
        assert_eq!(user.phone_number, None);

        let err = update_user(
            &store,
            user.id,
            UpdateUserRequest {
                phone_number: Some("0".repeat(21)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref e) if e.contains_key("phoneNumber")));

        assert!(verify_email(&store, user.id).await.unwrap().email_verified);

        let other = create_user(&store, request("bob@example.com")).await.unwrap();
        assert!(!deactivate_user(&store, other.id).await.unwrap().is_active);

        let active = list_active_users(&store).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, user.id);

        assert_eq!(get_user_by_email(&store, "BOB@example.com").await.unwrap().id, other.id);
        assert!(matches!(
            get_user_by_email(&store, "who@example.com").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn points_overflow_is_a_field_error() {
        let store = MemoryStore::new();
        let user = create_user(&store, request("ada@example.com")).await.unwrap();
        add_loyalty_points(&store, user.id, 5).await.unwrap();

        let err = add_loyalty_points(&store, user.id, i32::MAX).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(ref e) if e.contains_key("points")));
        assert_eq!(get_user(&store, user.id).await.unwrap().loyalty_points, 5);
    }

    #[tokio::test]
    async fn points_must_be_positive() {
        let store = MemoryStore::new();
        let user = create_user(&store, request("ada@example.com")).await.unwrap();

        assert!(add_loyalty_points(&store, user.id, 0).await.is_err());
        let user = add_loyalty_points(&store, user.id, 500).await.unwrap();
        assert_eq!(user.loyalty_tier, LoyaltyTier::Gold);

        let gold = list_users(&store, Some(LoyaltyTier::Gold)).await.unwrap();
        assert_eq!(gold.len(), 1);
        assert!(list_users(&store, Some(LoyaltyTier::Silver))
            .await
            .unwrap()
            .is_empty());
    }
}
