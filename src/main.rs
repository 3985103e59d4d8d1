// src/main.rs
use poll_service::{config::Config, init_tracing, start_server};
use tracing::error;

#[tokio::main]
async fn main() {
    init_tracing();

    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "configuration error");
            std::process::exit(1);
        }
    };

    if let Err(err) = start_server(config).await {
        error!(%err, "server failed");
        std::process::exit(1);
    }
}
