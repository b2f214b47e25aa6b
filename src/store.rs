//! Disk-backed item store: the canonical server-side cache of content nodes
//! and named top-story id lists.
//!
//! The whole store serializes to a single JSON snapshot after each refresh
//! cycle rather than after every write; a crash between cycles only loses
//! updates that the next cycle refetches anyway. The snapshot is written to
//! a temp file and renamed into place so concurrent readers never observe a
//! half-written blob.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::types::{Item, ListKind, TopStoryList};

/// Staleness heuristic: how long ago an item was refreshed, relative to how
/// old its content already was at refresh time. New content goes stale fast,
/// old content almost never. The denominator is clamped to one second so an
/// item captured in the same second as its creation still gets a defined
/// (and maximal) ratio.
pub fn staleness_ratio(item: &Item, now: i64) -> f64 {
  let Some(last_updated) = item.last_updated else {
    return f64::INFINITY;
  };
  let age_at_capture = (last_updated - item.time).max(1);
  (now - last_updated) as f64 / age_at_capture as f64
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreInner {
  items: HashMap<u64, Item>,
  lists: HashMap<ListKind, TopStoryList>,
}

pub struct ItemStore {
  snapshot_path: PathBuf,
  stale_ratio: f64,
  inner: RwLock<StoreInner>,
}

impl ItemStore {
  /// Open the store, reloading the snapshot file if one exists. A missing or
  /// unreadable snapshot starts the store empty; it is recreated on the next
  /// cycle.
  pub fn open(snapshot_path: PathBuf, stale_ratio: f64) -> Self {
    let inner = match Self::read_snapshot(&snapshot_path) {
      Ok(Some(inner)) => {
        tracing::info!(
          "Reloaded {} items and {} lists from {}",
          inner.items.len(),
          inner.lists.len(),
          snapshot_path.display()
        );
        inner
      }
      Ok(None) => StoreInner::default(),
      Err(e) => {
        tracing::warn!(
          "Discarding unreadable snapshot {}: {}",
          snapshot_path.display(),
          e
        );
        StoreInner::default()
      }
    };

    Self {
      snapshot_path,
      stale_ratio,
      inner: RwLock::new(inner),
    }
  }

  fn read_snapshot(path: &Path) -> Result<Option<StoreInner>> {
    if !path.exists() {
      return Ok(None);
    }
    let bytes =
      std::fs::read(path).map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
    let inner = serde_json::from_slice(&bytes)
      .map_err(|e| eyre!("Failed to parse {}: {}", path.display(), e))?;
    Ok(Some(inner))
  }

  /// Get an item, or None when it is absent or judged stale. Staleness
  /// forces the caller to refetch.
  pub fn get(&self, id: u64) -> Option<Item> {
    self.get_at(id, Utc::now().timestamp())
  }

  /// Staleness-checked lookup against an explicit clock, for deterministic
  /// tests.
  pub fn get_at(&self, id: u64, now: i64) -> Option<Item> {
    let inner = self.inner.read().expect("store lock poisoned");
    let item = inner.items.get(&id)?;
    if staleness_ratio(item, now) > self.stale_ratio {
      return None;
    }
    Some(item.clone())
  }

  pub fn put(&self, item: Item) {
    let mut inner = self.inner.write().expect("store lock poisoned");
    inner.items.insert(item.id, item);
  }

  pub fn get_list(&self, kind: ListKind) -> Option<TopStoryList> {
    let inner = self.inner.read().expect("store lock poisoned");
    inner.lists.get(&kind).cloned()
  }

  pub fn put_list(&self, list: TopStoryList) {
    let mut inner = self.inner.write().expect("store lock poisoned");
    inner.lists.insert(list.kind, list);
  }

  /// Delete every stored item not present in the keep set; returns the count
  /// removed. List records are keyed by the fixed list kinds and are never
  /// purged - they are where keep sets come from.
  pub fn purge(&self, keep: &HashSet<u64>) -> usize {
    let mut inner = self.inner.write().expect("store lock poisoned");
    let before = inner.items.len();
    inner.items.retain(|id, _| keep.contains(id));
    before - inner.items.len()
  }

  pub fn len(&self) -> usize {
    self.inner.read().expect("store lock poisoned").items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Serialize the whole store to the snapshot path via temp file + atomic
  /// rename.
  pub fn snapshot(&self) -> Result<()> {
    let bytes = {
      let inner = self.inner.read().expect("store lock poisoned");
      serde_json::to_vec(&*inner).map_err(|e| eyre!("Failed to serialize store: {}", e))?
    };

    if let Some(parent) = self.snapshot_path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create snapshot directory: {}", e))?;
    }

    let tmp = self.snapshot_path.with_extension("json.tmp");
    std::fs::write(&tmp, &bytes)
      .map_err(|e| eyre!("Failed to write {}: {}", tmp.display(), e))?;
    std::fs::rename(&tmp, &self.snapshot_path).map_err(|e| {
      eyre!(
        "Failed to move snapshot into place at {}: {}",
        self.snapshot_path.display(),
        e
      )
    })?;

    Ok(())
  }
}
