//! `api` crate — HTTP surface of the notification service.
//!
//! Exposes:
//!   POST   /api/v1/hooks
//!   PUT    /api/v1/directory/posts/{id}
//!   PUT    /api/v1/directory/users/{id}
//!   PUT    /api/v1/directory/comments/{id}
//!   GET    /api/v1/workflows
//!   POST   /api/v1/workflows
//!   GET    /api/v1/workflows/{id}
//!   PUT    /api/v1/workflows/{id}
//!   DELETE /api/v1/workflows/{id}
//!   GET    /api/v1/log
//!   DELETE /api/v1/log/{id}
//!   POST   /api/v1/log/bulk
//!   POST   /api/v1/subscription

pub mod error;
pub mod handlers;
pub mod nonce;
pub mod state;

use std::future::Future;

use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use error::ApiError;
pub use nonce::NonceSigner;
pub use state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/hooks", post(handlers::hooks::ingest))
        .route("/api/v1/directory/posts/{id}", put(handlers::directory::put_post))
        .route("/api/v1/directory/users/{id}", put(handlers::directory::put_user))
        .route("/api/v1/directory/comments/{id}", put(handlers::directory::put_comment))
        .route(
            "/api/v1/workflows",
            get(handlers::workflows::list).post(handlers::workflows::create),
        )
        .route(
            "/api/v1/workflows/{id}",
            get(handlers::workflows::get)
                .put(handlers::workflows::update)
                .delete(handlers::workflows::delete),
        )
        .route("/api/v1/log", get(handlers::log::list))
        .route("/api/v1/log/{id}", delete(handlers::log::delete))
        .route("/api/v1/log/bulk", post(handlers::log::bulk))
        .route("/api/v1/subscription", post(handlers::subscriptions::toggle))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind `bind` and serve until `shutdown` resolves.
pub async fn serve(
    bind: &str,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
