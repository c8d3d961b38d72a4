//! `gameroom` binary: serves rooms over WebSocket until Ctrl-C.
//!
//! ```text
//! gameroom [ADDR]          # or GAMEROOM_ADDR=0.0.0.0:9000 gameroom
//! RUST_LOG=gameroom=debug gameroom
//! ```

use gameroom::{DEFAULT_ADDR, GameroomError, GameroomServer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), GameroomError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gameroom=info")),
        )
        .init();

    let addr = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("GAMEROOM_ADDR").ok())
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());

    let server = GameroomServer::builder().bind(addr).build().await?;
    tracing::info!(local = %server.local_addr(), "listening");

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for Ctrl-C, shutting down");
            }
        })
        .await
}
