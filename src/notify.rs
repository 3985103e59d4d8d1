// src/notify.rs
//! Outbound email for the account flows.
//!
//! Delivery is best effort: [`Notifier::send`] reports success as a bool and
//! never fails the request that triggered it.
use async_trait::async_trait;
use html_escape::encode_text;
use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::SmtpConfig;

const BRAND: &str = "Red Curtain";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    PasswordResetOtp {
        otp: String,
        name: Option<String>,
        valid_minutes: i64,
    },
    PasswordResetConfirmation {
        name: Option<String>,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::PasswordResetOtp { .. } => "password_reset_otp",
            Notification::PasswordResetConfirmation { .. } => "password_reset_confirmation",
        }
    }

    pub fn subject(&self) -> String {
        match self {
            Notification::PasswordResetOtp { .. } => format!("{BRAND} - Password Reset OTP"),
            Notification::PasswordResetConfirmation { .. } => {
                format!("{BRAND} - Password Reset Successful")
            }
        }
    }

    fn greeting(name: &Option<String>) -> String {
        match name {
            Some(name) => format!("Hello {name},"),
            None => "Hello,".to_string(),
        }
    }

    pub fn plain_body(&self) -> String {
        match self {
            Notification::PasswordResetOtp {
                otp,
                name,
                valid_minutes,
            } => format!(
                "{greeting}\n\n\
                 We received a request to reset your password for your {BRAND} account.\n\n\
                 Your verification code is: {otp}\n\n\
                 This code will expire in {valid_minutes} minutes. Never share it with anyone.\n\
                 If you didn't request this, please ignore this email.\n",
                greeting = Self::greeting(name),
            ),
            Notification::PasswordResetConfirmation { name } => format!(
                "{greeting}\n\n\
                 Your password has been successfully reset.\n\n\
                 If you didn't make this change, please contact our support team immediately.\n",
                greeting = Self::greeting(name),
            ),
        }
    }

    pub fn html_body(&self) -> String {
        let inner = match self {
            Notification::PasswordResetOtp {
                otp, valid_minutes, ..
            } => format!(
                "<p>Use the code below to reset your {BRAND} password.</p>\
                 <p style=\"font-size:32px;letter-spacing:8px;font-family:monospace\"><strong>{otp}</strong></p>\
                 <p>This code expires in {valid_minutes} minutes. Never share it with anyone.</p>",
                otp = encode_text(otp),
            ),
            Notification::PasswordResetConfirmation { .. } => {
                "<p>Your password has been successfully reset.</p>\
                 <p>If you didn't make this change, contact support immediately.</p>"
                    .to_string()
            }
        };
        let greeting = match self {
            Notification::PasswordResetOtp { name, .. }
            | Notification::PasswordResetConfirmation { name } => Self::greeting(name),
        };
        let greeting = encode_text(&greeting);

        format!(
            "<!DOCTYPE html><html><body><h1>{BRAND}</h1><p>{greeting}</p>{inner}\
             <p style=\"color:#666\">This email was sent from {BRAND}.</p></body></html>"
        )
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("could not build message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("smtp: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// Returns whether the message was handed to the transport.
    async fn send(&self, recipient: &str, notification: &Notification) -> bool;
}

/// Writes notifications to the log instead of sending them. Used when no
/// SMTP host is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, recipient: &str, notification: &Notification) -> bool {
        info!(recipient, kind = notification.kind(), "notification (not sent, no SMTP configured)");
        true
    }
}

pub struct SmtpNotifier {
    from: Mailbox,
    primary: AsyncSmtpTransport<Tokio1Executor>,
    fallback: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let credentials = match (&config.username, &config.password) {
            (Some(user), Some(pass)) => Some(Credentials::new(user.clone(), pass.clone())),
            _ => None,
        };

        let mut primary =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?.port(config.port);
        // Plain connection, tried once when TLS negotiation or delivery fails.
        let mut fallback =
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host).port(config.port);
        if let Some(credentials) = credentials {
            primary = primary.credentials(credentials.clone());
            fallback = fallback.credentials(credentials);
        }

        Ok(Self {
            from: config.from.parse()?,
            primary: primary.build(),
            fallback: fallback.build(),
        })
    }

    fn build_message(
        &self,
        recipient: &str,
        notification: &Notification,
    ) -> Result<Message, NotifyError> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(recipient.parse::<Mailbox>()?)
            .subject(notification.subject())
            .multipart(MultiPart::alternative_plain_html(
                notification.plain_body(),
                notification.html_body(),
            ))?;
        Ok(message)
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, recipient: &str, notification: &Notification) -> bool {
        let message = match self.build_message(recipient, notification) {
            Ok(message) => message,
            Err(err) => {
                error!(recipient, kind = notification.kind(), %err, "failed to build email");
                return false;
            }
        };

        match self.primary.send(message.clone()).await {
            Ok(_) => {
                info!(recipient, kind = notification.kind(), "email sent");
                return true;
            }
            Err(err) => {
                warn!(recipient, %err, "primary SMTP transport failed, trying fallback");
            }
        }

        match self.fallback.send(message).await {
            Ok(_) => {
                info!(recipient, kind = notification.kind(), "email sent via fallback");
                true
            }
            Err(err) => {
                error!(recipient, kind = notification.kind(), %err, "fallback SMTP transport failed");
                false
            }
        }
    }
}
