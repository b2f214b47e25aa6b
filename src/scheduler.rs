//! Periodic refresh of the named story lists and the in-memory response
//! cache the HTTP handlers serve from.
//!
//! One interval timer drives everything. Each tick advances a modular
//! counter: the ranked top list refreshes unconditionally, the windowed
//! lists refresh on their slower cadences, and the slowest slot is a pure
//! garbage-collection pass over the store. Ticks are serialized by the
//! driving loop; lists due within one tick refresh concurrently, and each
//! list's failure is caught on its own so it cannot abort the others.

use chrono::Utc;
use color_eyre::Result;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::RefreshConfig;
use crate::hn::HnClient;
use crate::hydrator::TreeHydrator;
use crate::store::ItemStore;
use crate::types::{Item, ListKind, TopStoryList};

/// Cadence multipliers relative to the base tick (10 minutes in the default
/// configuration): hourly day list, 6-hourly week list, daily GC pass.
const DAY_EVERY: u64 = 6;
const WEEK_EVERY: u64 = 36;
const GC_EVERY: u64 = 144;

/// How many root stories hydrate concurrently during one list refresh.
const ROOT_CONCURRENCY: usize = 4;

/// Which lists are due at this counter value, and whether the
/// garbage-collection slot fires. Pure so tests can drive the schedule
/// without a clock.
pub fn cadence(counter: u64) -> (Vec<ListKind>, bool) {
  let mut due = vec![ListKind::Top];
  if counter % DAY_EVERY == 0 {
    due.push(ListKind::Day);
  }
  if counter % WEEK_EVERY == 0 {
    due.push(ListKind::Week);
  }
  (due, counter % GC_EVERY == 0)
}

/// In-memory map of fully hydrated lists, read by request handlers.
///
/// Writes replace the whole `Arc`'d array, so a reader holding the previous
/// array never observes a half-built refresh.
#[derive(Default)]
pub struct ResponseCache {
  lists: RwLock<HashMap<ListKind, Arc<Vec<Item>>>>,
}

impl ResponseCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, kind: ListKind) -> Option<Arc<Vec<Item>>> {
    self
      .lists
      .read()
      .expect("response cache lock poisoned")
      .get(&kind)
      .cloned()
  }

  pub fn replace(&self, kind: ListKind, items: Vec<Item>) {
    self
      .lists
      .write()
      .expect("response cache lock poisoned")
      .insert(kind, Arc::new(items));
  }

  /// Every item id reachable from the cached hydrated trees.
  pub fn referenced_ids(&self) -> HashSet<u64> {
    let lists = self.lists.read().expect("response cache lock poisoned");
    let mut ids = HashSet::new();
    for items in lists.values() {
      for item in items.iter() {
        item.collect_ids(&mut ids);
      }
    }
    ids
  }
}

pub struct RefreshScheduler {
  store: Arc<ItemStore>,
  client: Arc<HnClient>,
  hydrator: Arc<TreeHydrator>,
  cache: Arc<ResponseCache>,
  config: RefreshConfig,
  counter: Mutex<u64>,
}

impl RefreshScheduler {
  pub fn new(
    store: Arc<ItemStore>,
    client: Arc<HnClient>,
    hydrator: Arc<TreeHydrator>,
    cache: Arc<ResponseCache>,
    config: RefreshConfig,
  ) -> Self {
    Self {
      store,
      client,
      hydrator,
      cache,
      config,
      counter: Mutex::new(0),
    }
  }

  /// Run one full refresh cycle. Exposed so tests drive the schedule
  /// deterministically instead of waiting on wall-clock intervals.
  pub async fn tick(&self) {
    let counter = *self.counter.lock().expect("counter lock poisoned");
    let (due, gc) = cadence(counter);

    tracing::debug!("Refresh tick {} for {:?} (gc: {})", counter, due, gc);

    join_all(due.into_iter().map(|kind| self.refresh_list(kind))).await;

    if gc {
      self.collect_garbage();
    }

    {
      let mut counter = self.counter.lock().expect("counter lock poisoned");
      *counter = if gc { 1 } else { *counter + 1 };
    }

    if let Err(e) = self.store.snapshot() {
      tracing::warn!("Store snapshot failed: {}", e);
    }
  }

  /// Refresh a single list, catching the failure so one list cannot abort
  /// the rest of the tick.
  async fn refresh_list(&self, kind: ListKind) {
    match self.try_refresh(kind).await {
      Ok(count) => tracing::info!("Refreshed '{}' with {} stories", kind, count),
      Err(e) => tracing::warn!("Refresh of '{}' failed, keeping cached copy: {}", kind, e),
    }
  }

  async fn try_refresh(&self, kind: ListKind) -> Result<usize> {
    let ids = match kind {
      ListKind::Top => self.client.fetch_top_ids().await?,
      windowed => self.client.fetch_window_ids(windowed).await?,
    };
    let ids: Vec<u64> = ids.into_iter().take(self.config.list_size).collect();

    let hydrated: Vec<Item> = stream::iter(ids.iter().copied())
      .map(|id| async move {
        match self.hydrator.resolve(id).await {
          Ok(item) => item,
          Err(e) => {
            tracing::warn!("Skipping story {} in '{}': {}", id, kind, e);
            None
          }
        }
      })
      .buffered(ROOT_CONCURRENCY)
      .filter_map(|item| async move { item })
      .collect()
      .await;

    self.store.put_list(TopStoryList {
      kind,
      ids,
      last_updated: Utc::now().timestamp(),
    });
    let count = hydrated.len();
    self.cache.replace(kind, hydrated);
    Ok(count)
  }

  /// The slow-slot bookkeeping pass: no list is fetched for serving, the
  /// union of ids referenced by every cached list becomes the keep set and
  /// everything else is purged from the store.
  fn collect_garbage(&self) {
    let mut keep = self.cache.referenced_ids();
    for kind in ListKind::ALL {
      if let Some(list) = self.store.get_list(kind) {
        keep.extend(list.ids);
      }
    }

    let removed = self.store.purge(&keep);
    tracing::info!("Purged {} items, {} kept", removed, keep.len());
  }

  /// Spawn the interval loop. The first tick fires immediately; the task
  /// stops when the shutdown channel flips or its sender is dropped.
  pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
      interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

      loop {
        tokio::select! {
          _ = interval.tick() => self.tick().await,
          _ = shutdown.changed() => {
            tracing::info!("Refresh scheduler stopping");
            break;
          }
        }
      }
    })
  }

  #[cfg(test)]
  fn set_counter(&self, value: u64) {
    *self.counter.lock().unwrap() = value;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::ApiConfig;
  use crate::types::ItemKind;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  #[test]
  fn test_day_list_cadence_window() {
    let day_ticks: Vec<u64> = (0..=6)
      .filter(|&c| cadence(c).0.contains(&ListKind::Day))
      .collect();
    assert_eq!(day_ticks, vec![0, 6]);
  }

  #[test]
  fn test_top_list_every_tick_and_slow_slots() {
    for c in 0..200 {
      assert!(cadence(c).0.contains(&ListKind::Top));
    }
    assert!(cadence(36).0.contains(&ListKind::Week));
    assert!(!cadence(35).0.contains(&ListKind::Week));
    assert!(cadence(144).1);
    assert!(!cadence(143).1);
    // The month slot never produces a served list.
    for c in 0..200 {
      assert!(!cadence(c).0.contains(&ListKind::Month));
    }
  }

  #[test]
  fn test_response_cache_atomic_replace() {
    let cache = ResponseCache::new();
    assert!(cache.get(ListKind::Top).is_none());

    cache.replace(ListKind::Top, Vec::new());
    let before = cache.get(ListKind::Top).unwrap();
    cache.replace(ListKind::Top, Vec::new());

    // The handle taken before the replacement still points at the old array.
    assert_eq!(before.len(), 0);
    assert!(cache.get(ListKind::Top).is_some());
  }

  async fn mock_scheduler(server: &MockServer) -> (tempfile::TempDir, Arc<RefreshScheduler>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ItemStore::open(dir.path().join("store.json"), 0.25));
    let client = Arc::new(
      HnClient::new(&ApiConfig {
        item_base: server.uri(),
        search_base: server.uri(),
        page_size: 50,
      })
      .unwrap(),
    );
    let hydrator = Arc::new(TreeHydrator::new(
      Arc::clone(&store),
      Arc::clone(&client),
      4,
    ));
    let scheduler = Arc::new(RefreshScheduler::new(
      store,
      client,
      hydrator,
      Arc::new(ResponseCache::new()),
      RefreshConfig::default(),
    ));
    (dir, scheduler)
  }

  #[tokio::test]
  async fn test_tick_populates_cache_and_snapshots() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/topstories.json"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([1])))
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/item/1.json"))
      .respond_with(ResponseTemplate::new(200).set_body_json(
        serde_json::json!({"id": 1, "type": "story", "time": 10, "title": "hello"}),
      ))
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/search_by_date"))
      .respond_with(
        ResponseTemplate::new(200).set_body_json(serde_json::json!({"hits": []})),
      )
      .mount(&server)
      .await;

    let (dir, scheduler) = mock_scheduler(&server).await;
    scheduler.tick().await;

    let top = scheduler.cache.get(ListKind::Top).unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].id, 1);
    // Day was due at counter 0 and came back empty, which is served as-is.
    assert_eq!(scheduler.cache.get(ListKind::Day).unwrap().len(), 0);
    assert!(dir.path().join("store.json").exists());
    // GC fired at counter 0, so the counter restarted at 1.
    assert_eq!(*scheduler.counter.lock().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_one_list_failure_does_not_abort_others() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/topstories.json"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/search_by_date"))
      .respond_with(ResponseTemplate::new(503))
      .mount(&server)
      .await;

    let (_dir, scheduler) = mock_scheduler(&server).await;
    scheduler.tick().await;

    assert!(scheduler.cache.get(ListKind::Top).is_some());
    assert!(scheduler.cache.get(ListKind::Day).is_none());
  }

  #[tokio::test]
  async fn test_gc_pass_keeps_only_referenced_items() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/topstories.json"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([1])))
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/item/1.json"))
      .respond_with(ResponseTemplate::new(200).set_body_json(
        serde_json::json!({"id": 1, "type": "story", "time": 10, "title": "kept"}),
      ))
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/search_by_date"))
      .respond_with(
        ResponseTemplate::new(200).set_body_json(serde_json::json!({"hits": []})),
      )
      .mount(&server)
      .await;

    let (_dir, scheduler) = mock_scheduler(&server).await;
    // A stray cached item no current list references.
    scheduler.store.put(Item {
      id: 99,
      kind: ItemKind::Story,
      by: None,
      time: 10,
      title: None,
      url: None,
      text: None,
      score: None,
      descendants: None,
      parent: None,
      root_id: None,
      kids: Vec::new(),
      children: Vec::new(),
      last_updated: Some(Utc::now().timestamp()),
      deleted: false,
      dead: false,
    });

    scheduler.set_counter(GC_EVERY);
    scheduler.tick().await;

    assert_eq!(scheduler.store.len(), 1);
    assert!(scheduler.store.get(1).is_some());
  }
}
