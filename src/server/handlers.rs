//! Request handlers. These only forward into the cache layer: a list read
//! is a response-cache lookup, a story read is a store-first tree
//! resolution, a search is a pass-through to the search API.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use super::AppState;
use crate::types::{Item, ItemKind, ListKind};

/// A cache-layer failure never crashes a request; it renders as a JSON
/// error object with a matching status code.
#[derive(Debug)]
pub enum AppError {
  StoryNotFound,
  Upstream(color_eyre::Report),
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    let (status, message) = match self {
      Self::StoryNotFound => (StatusCode::NOT_FOUND, "story not found".to_string()),
      Self::Upstream(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}

/// `GET /topstories/{kind}` - the fully hydrated cached list, or an empty
/// array when the kind is unrecognized or not yet cached.
pub async fn topstories(
  Path(kind): Path<String>,
  State(state): State<AppState>,
) -> Json<Vec<Item>> {
  let items = kind
    .parse::<ListKind>()
    .ok()
    .and_then(|kind| state.cache.get(kind))
    .map(|items| (*items).clone())
    .unwrap_or_default();

  Json(items)
}

/// `GET /api/story/{id}` - one fully hydrated item. Comments additionally
/// get their root id resolved so a client can link back to the story.
pub async fn story(
  Path(id): Path<String>,
  State(state): State<AppState>,
) -> Result<Json<Item>, AppError> {
  let id: u64 = id.parse().map_err(|_| AppError::StoryNotFound)?;

  let mut item = state
    .hydrator
    .resolve(id)
    .await
    .map_err(AppError::Upstream)?
    .ok_or(AppError::StoryNotFound)?;

  if item.kind == ItemKind::Comment && item.root_id.is_none() {
    match state.hydrator.resolve_root_id(id).await {
      Ok(root_id) => item.root_id = Some(root_id),
      Err(e) => tracing::warn!("Root walk for {} failed: {}", id, e),
    }
  }

  Ok(Json(item))
}

/// `GET /api/search/{query}` - thin, non-hydrated matches from the search
/// index.
pub async fn search(
  Path(query): Path<String>,
  State(state): State<AppState>,
) -> Result<Json<Vec<Item>>, AppError> {
  let items = state
    .client
    .search(&query)
    .await
    .map_err(AppError::Upstream)?;
  Ok(Json(items))
}
