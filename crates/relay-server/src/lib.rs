pub mod error;
pub mod routes;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use relay_core::config::Config;
use relay_core::coordinator::Coordinator;
use relay_core::monitor::ProgressMonitor;
use std::path::PathBuf;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(root: PathBuf, coordinator: Coordinator) -> Router {
    let app_state = state::AppState::new(root, coordinator);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Events (SSE)
        .route("/api/events", get(routes::events::sse_events))
        // Tasks
        .route("/api/tasks", get(routes::tasks::list_tasks))
        .route("/api/tasks", post(routes::tasks::submit_task))
        .route("/api/tasks/{id}", get(routes::tasks::get_task))
        .route("/api/tasks/{id}/cancel", post(routes::tasks::cancel_task))
        .route("/api/tasks/{id}/approve", post(routes::tasks::approve_task))
        .route("/api/tasks/{id}/decline", post(routes::tasks::decline_task))
        // Roster
        .route("/api/workers", get(routes::workers::list_workers))
        // Config
        .route("/api/config", get(routes::config::get_config))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Load `.relay/config.yaml`, build a journaled coordinator, start the
/// progress monitor, and serve the API on `0.0.0.0:{port}`.
pub async fn serve(root: PathBuf, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    serve_on(root, listener).await
}

/// Like `serve`, on a listener the caller already bound (useful when
/// `port = 0` and the OS picks a free port).
pub async fn serve_on(root: PathBuf, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let config = Config::load(&root)?;
    for w in config.validate() {
        tracing::warn!(level = ?w.level, "config: {}", w.message);
    }
    let coordinator = config.build_coordinator(&root, true)?;

    let monitor = ProgressMonitor::new(coordinator.clone(), config.monitor.budgets.clone());
    let monitor_handle = monitor.spawn(config.monitor.poll_interval(), config.policy.timeout_action);

    let actual_port = listener.local_addr()?.port();
    tracing::info!(
        workers = coordinator.registry().len(),
        reviewer = coordinator.reviewer_id(),
        "relay coordinator listening on http://localhost:{actual_port}"
    );

    let app = build_router(root, coordinator);
    let served = axum::serve(listener, app).await;
    monitor_handle.abort();
    served?;
    Ok(())
}
