use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;

use corpora_backend::logging;
use corpora_backend::server::router;
use corpora_backend::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let state = AppState::initialize().await?;
    logging::init(&state.paths);

    let bind_addr = format!("127.0.0.1:{}", state.config.server.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    let addr = listener.local_addr()?;
    tracing::info!("Listening on {}", addr);

    let app: Router = router::router(state.clone());

    axum::serve(listener, app).await.context("Server error")?;

    state.close().await;
    Ok(())
}
