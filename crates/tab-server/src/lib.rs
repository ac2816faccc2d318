//! HTTP surface: Bot Framework webhook, developer test endpoint, health routes and API docs.

pub mod docs;
pub mod error;
pub mod handlers;
pub mod router;
pub mod state;

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use router::build_router;
pub use state::AppState;

/// Serve until `shutdown` is cancelled, then drain in-flight requests.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("http server failed")?;
    tracing::info!("http server stopped");
    Ok(())
}
