//! HTTP surface: shared application state, the axum router and the three
//! read-only endpoints handlers live in `handlers`.

use axum::Router;
use color_eyre::{eyre::eyre, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::hn::HnClient;
use crate::hydrator::TreeHydrator;
use crate::scheduler::ResponseCache;
use crate::store::ItemStore;

pub mod handlers;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
  pub store: Arc<ItemStore>,
  pub client: Arc<HnClient>,
  pub hydrator: Arc<TreeHydrator>,
  pub cache: Arc<ResponseCache>,
}

/// Build the router with all endpoints.
pub fn create_router(state: AppState) -> Router {
  Router::new()
    .route(
      "/topstories/{kind}",
      axum::routing::get(handlers::topstories),
    )
    .route("/api/story/{id}", axum::routing::get(handlers::story))
    .route("/api/search/{query}", axum::routing::get(handlers::search))
    .layer(TraceLayer::new_for_http())
    .layer(CorsLayer::permissive())
    .with_state(state)
}

/// Bind and serve until the process shuts down.
pub async fn start_server(bind: SocketAddr, state: AppState) -> Result<()> {
  let app = create_router(state);

  let listener = tokio::net::TcpListener::bind(bind)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", bind, e))?;

  tracing::info!("HTTP server listening on {}", bind);

  axum::serve(listener, app)
    .await
    .map_err(|e| eyre!("HTTP server error: {}", e))
}
