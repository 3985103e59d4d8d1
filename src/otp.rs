// src/otp.rs
//! Password-reset codes.
//!
//! Codes live in the [`Store`] with an explicit expiry, so they survive
//! restarts and are shared by every worker. Issuing a new code replaces the
//! previous one for that address.
use chrono::{Duration, Utc};
use rand::Rng;
use tracing::{info, warn};

use crate::{
    error::{AppError, AppResult},
    models::PasswordReset,
    notify::{Notification, Notifier},
    store::Store,
};

pub const OTP_LENGTH: usize = 6;

/// Wrong guesses a code survives before it stops working.
pub const MAX_FAILED_ATTEMPTS: i32 = 5;

pub fn generate_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

fn well_formed(code: &str) -> bool {
    code.len() == OTP_LENGTH && code.bytes().all(|b| b.is_ascii_digit())
}

/// Issues and emails a fresh code. Unknown addresses get the same answer
/// with nothing sent, so the endpoint does not reveal who has an account.
pub async fn request_password_reset(
    store: &dyn Store,
    notifier: &dyn Notifier,
    ttl: Duration,
    email: &str,
) -> AppResult<()> {
    let email = email.trim();
    let Some(user) = store.find_user_by_email(email).await? else {
        info!("password reset requested for unknown address");
        return Ok(());
    };

    let code = generate_code();
    store
        .put_password_reset(PasswordReset::new(
            user.email.clone(),
            code.clone(),
            Utc::now() + ttl,
        ))
        .await?;

    let notification = Notification::PasswordResetOtp {
        otp: code,
        name: user.first_name.clone(),
        valid_minutes: ttl.num_minutes(),
    };
    // Same answer whether or not delivery worked, as for unknown addresses.
    if notifier.send(&user.email, &notification).await {
        info!(user_id = user.id, "password reset code issued");
    } else {
        warn!(user_id = user.id, "password reset code could not be delivered");
    }
    Ok(())
}

/// Checks a code without using it up. A wrong guess counts against the code.
pub async fn verify_otp(store: &dyn Store, email: &str, code: &str) -> AppResult<()> {
    let email = email.trim();
    if !well_formed(code) {
        return Err(AppError::InvalidOtp);
    }

    let Some(reset) = store.get_password_reset(email).await? else {
        return Err(AppError::InvalidOtp);
    };
    if !reset.is_live(Utc::now(), MAX_FAILED_ATTEMPTS) {
        return Err(AppError::InvalidOtp);
    }
    if reset.code != code {
        store.record_failed_reset_attempt(email).await?;
        warn!(failed_attempts = reset.failed_attempts + 1, "wrong password reset code");
        return Err(AppError::InvalidOtp);
    }
    Ok(())
}

/// Uses up the code and sends the confirmation email. Setting the new
/// credential is left to the identity provider that owns passwords.
pub async fn complete_password_reset(
    store: &dyn Store,
    notifier: &dyn Notifier,
    email: &str,
    code: &str,
) -> AppResult<()> {
    let email = email.trim();
    if !well_formed(code) {
        return Err(AppError::InvalidOtp);
    }
    if !store
        .consume_password_reset(email, code, Utc::now(), MAX_FAILED_ATTEMPTS)
        .await?
    {
        store.record_failed_reset_attempt(email).await?;
        return Err(AppError::InvalidOtp);
    }

    let name = store
        .find_user_by_email(email)
        .await?
        .and_then(|u| u.first_name);
    // Confirmation is informational; the reset already happened.
    notifier
        .send(email, &Notification::PasswordResetConfirmation { name })
        .await;

    info!("password reset completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::{models::NewUser, store::MemoryStore};

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<(String, Notification)>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for Outbox {
        async fn send(&self, recipient: &str, notification: &Notification) -> bool {
            self.sent
                .lock()
                .unwrap()
                .push((recipient.to_string(), notification.clone()));
            !self.fail
        }
    }

    impl Outbox {
        fn last_code(&self) -> String {
            match self.sent.lock().unwrap().last() {
                Some((_, Notification::PasswordResetOtp { otp, .. })) => otp.clone(),
                other => panic!("expected an OTP email, got {other:?}"),
            }
        }
    }

    async fn store_with_user() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_user(NewUser {
                email: "ada@example.com".into(),
                first_name: Some("Ada".into()),
                last_name: None,
                phone_number: None,
            })
            .await
            .unwrap();
        store
    }

    #[test]
    fn codes_are_six_digits() {
        for _ in 0..100 {
            let code = generate_code();
            assert!(well_formed(&code), "bad code {code}");
        }
    }

    #[tokio::test]
    async fn full_reset_flow() {
        let store = store_with_user().await;
        let outbox = Outbox::default();

        request_password_reset(&store, &outbox, Duration::minutes(10), "ada@example.com")
            .await
            .unwrap();
        let code = outbox.last_code();

        verify_otp(&store, "ada@example.com", &code).await.unwrap();
        // verification does not consume
        verify_otp(&store, "ada@example.com", &code).await.unwrap();

        complete_password_reset(&store, &outbox, "ada@example.com", &code)
            .await
            .unwrap();
        assert!(matches!(
            complete_password_reset(&store, &outbox, "ada@example.com", &code).await,
            Err(AppError::InvalidOtp)
        ));

        let sent = outbox.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[1].1,
            Notification::PasswordResetConfirmation {
                name: Some("Ada".into())
            }
        );
    }

    #[tokio::test]
    async fn expired_code_is_rejected() {
        let store = store_with_user().await;
        let outbox = Outbox::default();

        request_password_reset(&store, &outbox, Duration::seconds(-1), "ada@example.com")
            .await
            .unwrap();
        let code = outbox.last_code();

        assert!(matches!(
            verify_otp(&store, "ada@example.com", &code).await,
            Err(AppError::InvalidOtp)
        ));
    }

    #[tokio::test]
    async fn new_code_replaces_old_one() {
        let store = store_with_user().await;
        let outbox = Outbox::default();
        let ttl = Duration::minutes(10);

        request_password_reset(&store, &outbox, ttl, "ada@example.com").await.unwrap();
        let first = outbox.last_code();
        request_password_reset(&store, &outbox, ttl, "ada@example.com").await.unwrap();
        let second = outbox.last_code();

        if first != second {
            assert!(verify_otp(&store, "ada@example.com", &first).await.is_err());
        }
        verify_otp(&store, "ada@example.com", &second).await.unwrap();
    }

    #[tokio::test]
    async fn wrong_guesses_lock_out_the_code() {
        let store = store_with_user().await;
        let outbox = Outbox::default();

        request_password_reset(&store, &outbox, Duration::minutes(10), "ada@example.com")
            .await
            .unwrap();
        let code = outbox.last_code();
        let wrong = if code == "000000" { "111111" } else { "000000" };

        for _ in 0..MAX_FAILED_ATTEMPTS {
            assert!(verify_otp(&store, "ada@example.com", wrong).await.is_err());
        }

        // the right code no longer works once the limit is reached
        assert!(matches!(
            verify_otp(&store, "ada@example.com", &code).await,
            Err(AppError::InvalidOtp)
        ));
        assert!(matches!(
            complete_password_reset(&store, &outbox, "ada@example.com", &code).await,
            Err(AppError::InvalidOtp)
        ));

        // a fresh code starts over
        request_password_reset(&store, &outbox, Duration::minutes(10), "ada@example.com")
            .await
            .unwrap();
        let code = outbox.last_code();
        verify_otp(&store, "ada@example.com", &code).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_address_sends_nothing() {
        let store = MemoryStore::new();
        let outbox = Outbox::default();

        request_password_reset(&store, &outbox, Duration::minutes(10), "who@example.com")
            .await
            .unwrap();
        assert!(outbox.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn delivery_failure_answers_like_unknown_address() {
        let store = store_with_user().await;
        let outbox = Outbox {
            fail: true,
            ..Default::default()
        };
        let ttl = Duration::minutes(10);

        let known = request_password_reset(&store, &outbox, ttl, "ada@example.com").await;
        let unknown = request_password_reset(&store, &outbox, ttl, "who@example.com").await;
        assert!(known.is_ok());
        assert!(unknown.is_ok());

        // the code was still stored and a resend can replace it
        let code = outbox.last_code();
        verify_otp(&store, "ada@example.com", &code).await.unwrap();
    }
}
