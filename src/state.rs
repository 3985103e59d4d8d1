// src/state.rs
use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    config::Config,
    db::create_pool,
    notify::{LogNotifier, Notifier, SmtpNotifier},
    retry::RetryPolicy,
    store::{MemoryStore, PgStore, Store},
};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared by every handler; cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub notifier: Arc<dyn Notifier>,
    pub retry: RetryPolicy,
    pub otp_ttl: chrono::Duration,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            notifier,
            retry: RetryPolicy::default(),
            otp_ttl: chrono::Duration::minutes(10),
        }
    }

    /// In-memory store and log-only email.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(LogNotifier))
    }

    pub async fn from_config(config: &Config) -> Result<Self, BoxError> {
        let store: Arc<dyn Store> = match &config.database_url {
            Some(url) => {
                info!("Connecting to database...");
                Arc::new(PgStore::new(
                    create_pool(url, config.database_max_connections).await?,
                ))
            }
            None => {
                warn!("DATABASE_URL not set, keeping data in memory");
                Arc::new(MemoryStore::new())
            }
        };

        let notifier: Arc<dyn Notifier> = match &config.smtp {
            Some(smtp) => {
                info!(host = %smtp.host, port = smtp.port, "SMTP notifier configured");
                Arc::new(SmtpNotifier::new(smtp)?)
            }
            None => Arc::new(LogNotifier),
        };

        Ok(Self {
            store,
            notifier,
            retry: RetryPolicy::with_attempts(config.vote_retry_attempts),
            otp_ttl: chrono::Duration::seconds(config.otp_ttl_seconds),
        })
    }
}
