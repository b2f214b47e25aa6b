//! Client-side fetch-or-cache layer over the reader server's HTTP API.
//!
//! Every read checks the local persisted cache first and only then goes to
//! the network; network failures surface as absent data, never as errors
//! thrown into UI code. A local purge policy keeps the raw-item namespace
//! bounded to what the cached lists and recent reads still reference.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use super::backend::StorageBackend;
use super::collapse::next_anchor;
use super::persisted::PersistedStore;
use crate::config::ClientConfig;
use crate::types::{Item, StorySummary};

/// Namespaces owned by the persisted stores; every other non-item key in the
/// backend is a leftover from an older storage format and gets cleaned up.
const STORE_KEYS: [&str; 4] = ["pages", "read_items", "collapsed", "settings"];

type PageMap = HashMap<String, CachedPageList>;
type StampMap = HashMap<u64, i64>;

/// A page's cached summary list plus the maximum content timestamp seen when
/// it was written, used to refuse overwrites by staler data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CachedPageList {
  pub summaries: Vec<StorySummary>,
  pub server_update_timestamp: i64,
}

/// UI preferences; opaque to this layer but persisted through the same
/// mechanism as everything else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiSettings {
  pub theme: String,
  pub compact_lists: bool,
}

impl Default for UiSettings {
  fn default() -> Self {
    Self {
      theme: "auto".to_string(),
      compact_lists: false,
    }
  }
}

pub struct SyncClient {
  http: reqwest::Client,
  /// Reader-server base URL, no trailing slash.
  base: String,
  backend: Arc<dyn StorageBackend>,
  pages: PersistedStore<PageMap>,
  read_items: PersistedStore<StampMap>,
  collapsed: PersistedStore<StampMap>,
  settings: PersistedStore<UiSettings>,
  config: ClientConfig,
}

fn item_key(id: u64) -> String {
  format!("item:{}", id)
}

impl SyncClient {
  pub fn new(backend: Arc<dyn StorageBackend>, config: ClientConfig) -> Result<Self> {
    let http = reqwest::Client::builder()
      .user_agent(concat!("embr-client/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    let retry_backoff = Duration::from_millis(config.persist_backoff_ms);
    let store = |name: &str| -> PersistedStore<StampMap> {
      PersistedStore::new(name, StampMap::new(), Arc::clone(&backend))
        .with_retry(config.persist_attempts, retry_backoff)
    };

    Ok(Self {
      http,
      base: config.server_base.trim_end_matches('/').to_string(),
      pages: PersistedStore::new("pages", PageMap::new(), Arc::clone(&backend))
        .with_retry(config.persist_attempts, retry_backoff),
      read_items: store("read_items"),
      collapsed: store("collapsed"),
      settings: PersistedStore::new("settings", UiSettings::default(), Arc::clone(&backend))
        .with_retry(config.persist_attempts, retry_backoff),
      backend,
      config,
    })
  }

  /// Hydrate every namespace. Each store hydrates independently; none of
  /// them blocks the others.
  pub async fn hydrate_all(&self) {
    tokio::join!(
      self.pages.hydrate(),
      self.read_items.hydrate(),
      self.collapsed.hydrate(),
      self.settings.hydrate(),
    );
  }

  // ==========================================================================
  // Content
  // ==========================================================================

  /// Get one story with its comment tree: local cache first, network second.
  /// A cache hit never touches the network; failures come back as `None`.
  pub async fn get_content(&self, id: u64) -> Result<Option<Item>> {
    let key = item_key(id);
    match self.backend.get(&key).await {
      Ok(Some(bytes)) => match serde_json::from_slice::<Item>(&bytes) {
        Ok(item) => return Ok(Some(item)),
        Err(e) => tracing::warn!("Refetching malformed cached item {}: {}", id, e),
      },
      Ok(None) => {}
      Err(e) => tracing::warn!("Cache read for item {} failed: {}", id, e),
    }

    let url = format!("{}/api/story/{}", self.base, id);
    let item: Item = match self.fetch_json(&url).await {
      Ok(item) => item,
      Err(e) => {
        tracing::warn!("Fetch of story {} failed: {}", id, e);
        return Ok(None);
      }
    };

    self.persist_item(&item).await;
    Ok(Some(item))
  }

  /// Get the summaries for a named page. A cached list - even a summary-only
  /// one - is served without any network call; otherwise the full items are
  /// fetched, persisted individually and as a summary list, and returned.
  pub async fn get_content_for_page(&self, page: &str) -> Result<Vec<StorySummary>> {
    if let Some(cached) = self.pages.get().get(page) {
      return Ok(cached.summaries.clone());
    }

    let url = format!("{}/topstories/{}", self.base, page);
    let raw: Vec<serde_json::Value> = match self.fetch_json(&url).await {
      Ok(raw) => raw,
      Err(e) => {
        tracing::warn!("Fetch of page '{}' failed: {}", page, e);
        return Ok(Vec::new());
      }
    };

    // Validate element by element; one malformed item must not sink the rest
    // of the batch.
    let mut items = Vec::with_capacity(raw.len());
    for value in raw {
      match serde_json::from_value::<Item>(value) {
        Ok(item) => items.push(item),
        Err(e) => tracing::warn!("Skipping malformed item in page '{}': {}", page, e),
      }
    }

    let summaries: Vec<StorySummary> = items.iter().map(StorySummary::from).collect();
    for item in &items {
      self.persist_item(item).await;
    }
    self.persist_story_list(page, &items).await;

    Ok(summaries)
  }

  async fn fetch_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
    self
      .http
      .get(url)
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", url, e))?
      .error_for_status()
      .map_err(|e| eyre!("Request to {} failed: {}", url, e))?
      .json()
      .await
      .map_err(|e| eyre!("Bad response from {}: {}", url, e))
  }

  /// Persist one raw item under its id key. Failures are logged, not
  /// surfaced: the caller already has the data in hand.
  async fn persist_item(&self, item: &Item) {
    let bytes = match serde_json::to_vec(item) {
      Ok(bytes) => bytes,
      Err(e) => {
        tracing::warn!("Cannot serialize item {}: {}", item.id, e);
        return;
      }
    };
    if let Err(e) = self.backend.set(&item_key(item.id), &bytes).await {
      tracing::warn!("Persist of item {} failed: {}", item.id, e);
    }
  }

  /// Cache a page's summary list, guarded by timestamp ordering: a slower,
  /// staler response must not clobber a list a faster refresh already wrote,
  /// and an empty response never replaces a non-empty list.
  pub async fn persist_story_list(&self, page: &str, items: &[Item]) {
    let incoming_max = items.iter().map(|item| item.time).max();
    let summaries: Vec<StorySummary> = items.iter().map(StorySummary::from).collect();
    let page = page.to_string();

    self
      .pages
      .update(move |map| {
        let Some(incoming_max) = incoming_max else {
          // Empty incoming list: only record it when nothing is cached yet.
          map.entry(page.clone()).or_default();
          return;
        };

        match map.get(&page) {
          Some(current) if incoming_max <= current.server_update_timestamp => {}
          _ => {
            map.insert(
              page.clone(),
              CachedPageList {
                summaries: summaries.clone(),
                server_update_timestamp: incoming_max,
              },
            );
          }
        }
      })
      .await;
  }

  // ==========================================================================
  // Read state and collapse state
  // ==========================================================================

  /// Record the first visit to a story. Existing entries are never
  /// overwritten.
  pub async fn mark_read(&self, id: u64) {
    self.mark_read_at(id, Utc::now().timestamp()).await;
  }

  async fn mark_read_at(&self, id: u64, now: i64) {
    self
      .read_items
      .update(move |map| {
        map.entry(id).or_insert(now);
      })
      .await;
  }

  pub fn is_read(&self, id: u64) -> bool {
    self.read_items.get().contains_key(&id)
  }

  /// Collapse a comment and compute where the viewport should land, given
  /// the story's top-level comments.
  pub async fn collapse_comment(&self, roots: &[Item], id: u64) -> Option<u64> {
    let now = Utc::now().timestamp();
    self
      .collapsed
      .update(move |map| {
        map.entry(id).or_insert(now);
      })
      .await;

    let collapsed = self.collapsed_ids();
    next_anchor(roots, &collapsed, id)
  }

  /// Re-open a collapsed comment.
  pub async fn expand_comment(&self, id: u64) {
    self
      .collapsed
      .update(move |map| {
        map.remove(&id);
      })
      .await;
  }

  pub fn collapsed_ids(&self) -> HashSet<u64> {
    self.collapsed.get().keys().copied().collect()
  }

  pub fn settings(&self) -> UiSettings {
    self.settings.get()
  }

  pub async fn update_settings<F>(&self, mutate: F)
  where
    F: Fn(&mut UiSettings) + Send + Sync + 'static,
  {
    self.settings.update(mutate).await;
  }

  // ==========================================================================
  // Retention
  // ==========================================================================

  /// Drop read and collapse records older than the retention window.
  pub async fn prune_expired(&self) {
    self
      .prune_expired_at(Utc::now().timestamp() - self.config.retention_days * 86_400)
      .await;
  }

  async fn prune_expired_at(&self, cutoff: i64) {
    self
      .read_items
      .update(move |map| {
        map.retain(|_, stamp| *stamp >= cutoff);
      })
      .await;
    self
      .collapsed
      .update(move |map| {
        map.retain(|_, stamp| *stamp >= cutoff);
      })
      .await;
  }

  /// Delete every individually cached raw item that no cached page list and
  /// no recent read still references, plus any legacy or malformed keys left
  /// behind by older storage formats. Returns the number of keys removed.
  pub async fn purge_local(&self) -> Result<usize> {
    let mut keep: HashSet<u64> = self
      .pages
      .get()
      .values()
      .flat_map(|list| list.summaries.iter().map(|summary| summary.id))
      .collect();

    let mut recent: Vec<(u64, i64)> = self.read_items.get().into_iter().collect();
    recent.sort_by(|a, b| b.1.cmp(&a.1));
    keep.extend(
      recent
        .into_iter()
        .take(self.config.keep_recent_reads)
        .map(|(id, _)| id),
    );

    let mut removed = 0;
    for key in self.backend.keys().await? {
      let drop = match key.strip_prefix("item:") {
        Some(rest) => match rest.parse::<u64>() {
          Ok(id) => !keep.contains(&id),
          Err(_) => true,
        },
        None => !STORE_KEYS.contains(&key.as_str()),
      };

      if drop {
        match self.backend.remove(&key).await {
          Ok(()) => removed += 1,
          Err(e) => tracing::warn!("Could not remove key '{}': {}", key, e),
        }
      }
    }

    tracing::info!("Purged {} local keys", removed);
    Ok(removed)
  }

  /// Run the purge once, a short fixed delay after the settings namespace
  /// finishes hydrating - never per mutation, to bound I/O.
  pub async fn purge_after_hydration(&self) {
    let mut signal = self.settings.hydrated_signal();
    while !*signal.borrow() {
      if signal.changed().await.is_err() {
        return;
      }
    }

    tokio::time::sleep(Duration::from_secs(self.config.purge_delay_secs)).await;
    self.prune_expired().await;
    if let Err(e) = self.purge_local().await {
      tracing::warn!("Local purge failed: {}", e);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::client::backend::MemoryBackend;
  use crate::types::ItemKind;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn test_config(base: String) -> ClientConfig {
    ClientConfig {
      server_base: base,
      retention_days: 7,
      keep_recent_reads: 2,
      purge_delay_secs: 0,
      persist_attempts: 3,
      persist_backoff_ms: 1,
    }
  }

  async fn client_for(base: String) -> (Arc<MemoryBackend>, SyncClient) {
    let backend = Arc::new(MemoryBackend::new());
    let client = SyncClient::new(
      Arc::clone(&backend) as Arc<dyn StorageBackend>,
      test_config(base),
    )
    .unwrap();
    client.hydrate_all().await;
    (backend, client)
  }

  fn story(id: u64, time: i64) -> Item {
    Item {
      id,
      kind: ItemKind::Story,
      by: Some("tester".to_string()),
      time,
      title: Some(format!("story {}", id)),
      url: None,
      text: None,
      score: Some(1),
      descendants: Some(0),
      parent: None,
      root_id: None,
      kids: Vec::new(),
      children: Vec::new(),
      last_updated: Some(time),
      deleted: false,
      dead: false,
    }
  }

  #[tokio::test]
  async fn test_get_content_fetches_once_then_serves_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/story/7"))
      .respond_with(ResponseTemplate::new(200).set_body_json(&story(7, 100)))
      .expect(1)
      .mount(&server)
      .await;

    let (_backend, client) = client_for(server.uri()).await;

    let first = client.get_content(7).await.unwrap().unwrap();
    assert_eq!(first.id, 7);

    // Served from the local cache: the mock's expect(1) verifies no second
    // request happens.
    let second = client.get_content(7).await.unwrap().unwrap();
    assert_eq!(second.id, 7);
  }

  #[tokio::test]
  async fn test_get_content_failure_is_none_not_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/story/7"))
      .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
        "error": "story not found"
      })))
      .mount(&server)
      .await;

    let (_backend, client) = client_for(server.uri()).await;
    assert!(client.get_content(7).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_page_fetch_persists_items_and_summary_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/topstories/topstories"))
      .respond_with(
        ResponseTemplate::new(200).set_body_json(vec![story(1, 100), story(2, 90)]),
      )
      .expect(1)
      .mount(&server)
      .await;

    let (backend, client) = client_for(server.uri()).await;

    let summaries = client.get_content_for_page("topstories").await.unwrap();
    assert_eq!(summaries.len(), 2);
    assert!(backend.get("item:1").await.unwrap().is_some());
    assert!(backend.get("item:2").await.unwrap().is_some());

    // The second read is served from the persisted summary list.
    let again = client.get_content_for_page("topstories").await.unwrap();
    assert_eq!(again.len(), 2);
  }

  #[tokio::test]
  async fn test_malformed_list_element_is_skipped_not_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/topstories/day"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
        serde_json::to_value(story(1, 100)).unwrap(),
        {"garbage": true}
      ])))
      .mount(&server)
      .await;

    let (backend, client) = client_for(server.uri()).await;
    let summaries = client.get_content_for_page("day").await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert!(backend.get("item:1").await.unwrap().is_some());
  }

  #[tokio::test]
  async fn test_list_write_ordering_newest_timestamp_wins() {
    let (_backend, client) = client_for("http://127.0.0.1:1".to_string()).await;

    client.persist_story_list("day", &[story(1, 100)]).await;

    // Staler response arrives late: ignored.
    client.persist_story_list("day", &[story(2, 90)]).await;
    let cached = client.pages.get();
    let list = cached.get("day").unwrap();
    assert_eq!(list.server_update_timestamp, 100);
    assert_eq!(list.summaries[0].id, 1);

    // Fresher response: replaces.
    client.persist_story_list("day", &[story(3, 150)]).await;
    let cached = client.pages.get();
    let list = cached.get("day").unwrap();
    assert_eq!(list.server_update_timestamp, 150);
    assert_eq!(list.summaries[0].id, 3);
  }

  #[tokio::test]
  async fn test_empty_list_never_overwrites_non_empty() {
    let (_backend, client) = client_for("http://127.0.0.1:1".to_string()).await;

    client.persist_story_list("week", &[story(1, 100)]).await;
    client.persist_story_list("week", &[]).await;

    let cached = client.pages.get();
    assert_eq!(cached.get("week").unwrap().summaries.len(), 1);
  }

  #[tokio::test]
  async fn test_mark_read_is_append_only() {
    let (_backend, client) = client_for("http://127.0.0.1:1".to_string()).await;

    client.mark_read_at(5, 100).await;
    client.mark_read_at(5, 200).await;

    assert_eq!(client.read_items.get().get(&5), Some(&100));
  }

  #[tokio::test]
  async fn test_prune_drops_expired_records() {
    let (_backend, client) = client_for("http://127.0.0.1:1".to_string()).await;

    client.mark_read_at(1, 100).await;
    client.mark_read_at(2, 900).await;
    client.prune_expired_at(500).await;

    assert!(!client.is_read(1));
    assert!(client.is_read(2));
  }

  #[tokio::test]
  async fn test_purge_keeps_listed_and_recently_read_items() {
    let (backend, client) = client_for("http://127.0.0.1:1".to_string()).await;

    // Page list references 10; reads reference 20, 30, 40 with 20 the
    // oldest. keep_recent_reads is 2, so 20 falls out.
    client.persist_story_list("topstories", &[story(10, 100)]).await;
    client.mark_read_at(20, 100).await;
    client.mark_read_at(30, 200).await;
    client.mark_read_at(40, 300).await;

    for id in [10, 20, 30, 40] {
      backend
        .set(&item_key(id), &serde_json::to_vec(&story(id, 1)).unwrap())
        .await
        .unwrap();
    }
    backend.set("legacy_blob", b"old").await.unwrap();
    backend.set("item:not-a-number", b"junk").await.unwrap();

    let removed = client.purge_local().await.unwrap();

    // item:20, legacy_blob and the malformed key go; everything else stays.
    assert_eq!(removed, 3);
    assert!(backend.get(&item_key(10)).await.unwrap().is_some());
    assert!(backend.get(&item_key(30)).await.unwrap().is_some());
    assert!(backend.get(&item_key(40)).await.unwrap().is_some());
    assert!(backend.get(&item_key(20)).await.unwrap().is_none());
    assert!(backend.get("legacy_blob").await.unwrap().is_none());
    // The persisted store namespaces survive.
    assert!(backend.get("pages").await.unwrap().is_some());
  }

  #[tokio::test]
  async fn test_collapse_toggle_and_anchor() {
    let (_backend, client) = client_for("http://127.0.0.1:1".to_string()).await;

    let mut parent = story(1, 0);
    parent.children = vec![story(2, 0), story(3, 0)];
    let roots = vec![parent];

    let anchor = client.collapse_comment(&roots[0].children, 2).await;
    assert_eq!(anchor, Some(3));
    assert!(client.collapsed_ids().contains(&2));

    client.expand_comment(2).await;
    assert!(!client.collapsed_ids().contains(&2));
  }
}
