// src/lib.rs
//! Backend for the Red Curtain polling app.
//!
//! Users create polls with a fixed list of options and vote once per poll.
//! Each poll carries a denormalized per-option tally next to the vote ledger;
//! the two are written together in one storage transaction so the tally
//! always equals the number of ledger rows. Statistics are computed from the
//! tally on every read.
//!
//! Around that core sit a small user directory with loyalty points and an
//! email-based password-reset flow.
//!
//! # Running
//!
//! ```sh
//! DATABASE_URL=postgres://localhost/polls RUST_LOG=poll_service=debug cargo run
//! ```
//!
//! Without `DATABASE_URL` the server keeps everything in memory.
use std::{net::SocketAddr, time::Duration};

use axum_server::Handle;
use tokio::signal::ctrl_c;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod models;
pub mod notify;
pub mod otp;
pub mod poll;
pub mod retry;
pub mod routes;
pub mod state;
pub mod stats;
pub mod store;
pub mod users;

use config::Config;
use state::{AppState, BoxError};

pub fn init_tracing() {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "poll_service=info,tower_http=info".into()),
        )
        .init();
}

pub async fn start_server(config: Config) -> Result<(), BoxError> {
    info!("Initializing state...");
    let state = AppState::from_config(&config).await?;

    let app = routes::create_routes(state, config.cors_allow_origin.as_deref());

    let address = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Binding to {address}");

    let handle = Handle::new();
    tokio::spawn(shutdown_signal(handle.clone()));

    axum_server::bind(address)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(err) = ctrl_c().await {
            error!(%err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(err) => {
                error!(%err, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
