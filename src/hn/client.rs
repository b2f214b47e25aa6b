//! Thin async client over the Hacker News Firebase API and the Algolia
//! search API. No caching, no retries - failures propagate to the caller,
//! which decides whether a partial result is acceptable.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use url::Url;

use crate::config::ApiConfig;
use crate::hn::api_types::{ApiItem, ApiSearchResponse};
use crate::types::{Item, ListKind};

#[derive(Debug, Clone)]
pub struct HnClient {
  http: reqwest::Client,
  /// Firebase base, no trailing slash (e.g. `https://hacker-news.firebaseio.com/v0`).
  item_base: String,
  /// Algolia base, no trailing slash (e.g. `https://hn.algolia.com/api/v1`).
  search_base: String,
  page_size: usize,
}

impl HnClient {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    let http = reqwest::Client::builder()
      .user_agent(concat!("embr/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      item_base: config.item_base.trim_end_matches('/').to_string(),
      search_base: config.search_base.trim_end_matches('/').to_string(),
      page_size: config.page_size,
    })
  }

  /// Fetch a single item. `Ok(None)` means the item does not exist upstream
  /// (the API answers `null`), which is not an error.
  pub async fn fetch_item(&self, id: u64) -> Result<Option<Item>> {
    let url = Url::parse(&format!("{}/item/{}.json", self.item_base, id))
      .map_err(|e| eyre!("Bad item URL for {}: {}", id, e))?;

    let response = self
      .http
      .get(url)
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch item {}: {}", id, e))?;

    if !response.status().is_success() {
      return Err(eyre!("Item {} fetch returned {}", id, response.status()));
    }

    let raw: Option<ApiItem> = response
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse item {}: {}", id, e))?;

    match raw {
      Some(raw) => raw.into_item(Utc::now().timestamp()).map(Some),
      None => Ok(None),
    }
  }

  /// Fetch the ranked "topstories" id list from the primary content API.
  pub async fn fetch_top_ids(&self) -> Result<Vec<u64>> {
    let url = Url::parse(&format!("{}/topstories.json", self.item_base))
      .map_err(|e| eyre!("Bad topstories URL: {}", e))?;

    let response = self
      .http
      .get(url)
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch top story ids: {}", e))?;

    if !response.status().is_success() {
      return Err(eyre!("Top story list returned {}", response.status()));
    }

    response
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse top story ids: {}", e))
  }

  /// Fetch unranked story ids inside the list's creation-time window from
  /// the search API. Only the windowed kinds (day/week/month) are valid.
  pub async fn fetch_window_ids(&self, kind: ListKind) -> Result<Vec<u64>> {
    let window = kind
      .window_secs()
      .ok_or_else(|| eyre!("List '{}' has no search window", kind))?;
    let cutoff = Utc::now().timestamp() - window;

    let url = Url::parse(&format!("{}/search_by_date", self.search_base))
      .map_err(|e| eyre!("Bad search URL: {}", e))?;

    let response: ApiSearchResponse = self
      .http
      .get(url)
      .query(&[
        ("tags", "story".to_string()),
        ("numericFilters", format!("created_at_i>{}", cutoff)),
        ("hitsPerPage", self.page_size.to_string()),
      ])
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch '{}' window: {}", kind, e))?
      .error_for_status()
      .map_err(|e| eyre!("'{}' window fetch failed: {}", kind, e))?
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse '{}' window: {}", kind, e))?;

    Ok(
      response
        .hits
        .iter()
        .filter_map(|hit| hit.id().ok())
        .collect(),
    )
  }

  /// Full-text search returning thin, non-hydrated items.
  pub async fn search(&self, query: &str) -> Result<Vec<Item>> {
    let url = Url::parse(&format!("{}/search", self.search_base))
      .map_err(|e| eyre!("Bad search URL: {}", e))?;

    let response: ApiSearchResponse = self
      .http
      .get(url)
      .query(&[
        ("query", query.to_string()),
        ("hitsPerPage", self.page_size.to_string()),
      ])
      .send()
      .await
      .map_err(|e| eyre!("Search '{}' failed: {}", query, e))?
      .error_for_status()
      .map_err(|e| eyre!("Search '{}' failed: {}", query, e))?
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse search '{}': {}", query, e))?;

    let captured_at = Utc::now().timestamp();
    let mut items = Vec::with_capacity(response.hits.len());
    for hit in response.hits {
      match hit.into_item(captured_at) {
        Ok(item) => items.push(item),
        Err(e) => tracing::warn!("Skipping malformed search hit: {}", e),
      }
    }

    Ok(items)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use wiremock::matchers::{method, path, query_param};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn client_for(server: &MockServer) -> HnClient {
    HnClient::new(&ApiConfig {
      item_base: server.uri(),
      search_base: server.uri(),
      page_size: 50,
    })
    .unwrap()
  }

  #[tokio::test]
  async fn test_fetch_item_parses_story() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/item/8863.json"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "id": 8863,
        "type": "story",
        "by": "dhouston",
        "time": 1175714200,
        "title": "My YC app: Dropbox",
        "score": 111,
        "descendants": 71,
        "kids": [9224, 8917]
      })))
      .mount(&server)
      .await;

    let item = client_for(&server).fetch_item(8863).await.unwrap().unwrap();
    assert_eq!(item.id, 8863);
    assert_eq!(item.kids, vec![9224, 8917]);
    assert!(item.last_updated.is_some());
  }

  #[tokio::test]
  async fn test_fetch_item_null_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/item/1.json"))
      .respond_with(ResponseTemplate::new(200).set_body_string("null"))
      .mount(&server)
      .await;

    assert!(client_for(&server).fetch_item(1).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_fetch_item_server_error_propagates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/item/1.json"))
      .respond_with(ResponseTemplate::new(500))
      .mount(&server)
      .await;

    assert!(client_for(&server).fetch_item(1).await.is_err());
  }

  #[tokio::test]
  async fn test_fetch_top_ids() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/topstories.json"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([5, 3, 8])))
      .mount(&server)
      .await;

    let ids = client_for(&server).fetch_top_ids().await.unwrap();
    assert_eq!(ids, vec![5, 3, 8]);
  }

  #[tokio::test]
  async fn test_fetch_window_ids_skips_bad_hits() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/search_by_date"))
      .and(query_param("tags", "story"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "hits": [
          {"objectID": "11"},
          {"objectID": "oops"},
          {"objectID": "22"}
        ]
      })))
      .mount(&server)
      .await;

    let ids = client_for(&server)
      .fetch_window_ids(ListKind::Day)
      .await
      .unwrap();
    assert_eq!(ids, vec![11, 22]);
  }

  #[tokio::test]
  async fn test_window_rejected_for_ranked_list() {
    let server = MockServer::start().await;
    assert!(client_for(&server)
      .fetch_window_ids(ListKind::Top)
      .await
      .is_err());
  }

  #[tokio::test]
  async fn test_search_returns_thin_items() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/search"))
      .and(query_param("query", "rust"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "hits": [
          {"objectID": "42", "title": "Rust 1.0", "author": "steveklabnik", "points": 900, "created_at_i": 1431700000}
        ]
      })))
      .mount(&server)
      .await;

    let items = client_for(&server).search("rust").await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, 42);
    assert!(items[0].children.is_empty());
  }
}
