//! Breadth-first, store-first resolution of full comment trees.
//!
//! Heavily-discussed stories fan out into thousands of nodes, so traversal
//! uses an explicit arena and a per-level frontier instead of recursion:
//! call-stack depth stays bounded by tree depth, and every level's fetches
//! run concurrently in one bounded batch. Fetches across levels cannot
//! overlap because child ids are only known once the parent resolves.

use color_eyre::Result;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;

use crate::hn::HnClient;
use crate::store::ItemStore;
use crate::types::Item;

/// Hard cap on upward parent-walk hops. Self-referential parent chains are a
/// defensive guard, not an expected case.
const MAX_ROOT_HOPS: usize = 1000;

pub struct TreeHydrator {
  store: Arc<ItemStore>,
  client: Arc<HnClient>,
  fetch_concurrency: usize,
}

impl TreeHydrator {
  pub fn new(store: Arc<ItemStore>, client: Arc<HnClient>, fetch_concurrency: usize) -> Self {
    Self {
      store,
      client,
      fetch_concurrency: fetch_concurrency.max(1),
    }
  }

  /// Look up one node: fresh store copy first, network fallback. Fetched
  /// nodes are written back to the store so the next resolution of any tree
  /// containing them is served locally.
  async fn lookup(&self, id: u64) -> Result<Option<Item>> {
    if let Some(item) = self.store.get(id) {
      return Ok(Some(item));
    }

    match self.client.fetch_item(id).await? {
      Some(item) => {
        self.store.put(item.clone());
        Ok(Some(item))
      }
      None => Ok(None),
    }
  }

  /// Resolve an item with every reachable descendant materialized.
  ///
  /// Returns `Ok(None)` when the root itself does not exist. A child that
  /// fails to resolve is dropped from its parent's materialized array - a
  /// partial tree beats no tree.
  pub async fn resolve(&self, id: u64) -> Result<Option<Item>> {
    let Some(root) = self.lookup(id).await? else {
      return Ok(None);
    };

    // Arena of nodes in BFS discovery order. Parents always precede their
    // children, which makes bottom-up assembly a single reverse pass.
    let mut nodes: Vec<Option<Item>> = vec![Some(root)];
    let mut child_slots: Vec<Vec<usize>> = vec![Vec::new()];
    let mut frontier: Vec<usize> = vec![0];
    // A child id may only enter the arena once; kid links form a tree, and a
    // corrupt back-edge must not loop the traversal.
    let mut seen: HashSet<u64> = HashSet::from([id]);

    while !frontier.is_empty() {
      let mut wanted: Vec<(usize, u64)> = Vec::new();
      for &idx in &frontier {
        let node = nodes[idx].as_mut().expect("frontier node taken early");
        for kid in std::mem::take(&mut node.kids) {
          if seen.insert(kid) {
            wanted.push((idx, kid));
          }
        }
      }

      let fetched: Vec<(usize, Option<Item>)> = stream::iter(wanted)
        .map(|(parent_idx, kid)| async move {
          match self.lookup(kid).await {
            Ok(found) => (parent_idx, found),
            Err(e) => {
              tracing::warn!("Dropping unresolvable child {}: {}", kid, e);
              (parent_idx, None)
            }
          }
        })
        .buffered(self.fetch_concurrency)
        .collect()
        .await;

      let mut next = Vec::new();
      for (parent_idx, item) in fetched {
        let Some(item) = item else { continue };
        if item.is_tombstone() {
          continue;
        }

        let idx = nodes.len();
        let pending = !item.is_complete();
        nodes.push(Some(item));
        child_slots.push(Vec::new());
        child_slots[parent_idx].push(idx);
        if pending {
          next.push(idx);
        }
      }
      frontier = next;
    }

    // Assemble bottom-up: children were discovered after their parents, so
    // walking the arena in reverse moves each subtree into place exactly once.
    for idx in (0..nodes.len()).rev() {
      let slots = std::mem::take(&mut child_slots[idx]);
      if slots.is_empty() {
        continue;
      }
      let children: Vec<Item> = slots
        .into_iter()
        .filter_map(|child_idx| nodes[child_idx].take())
        .collect();
      if let Some(node) = nodes[idx].as_mut() {
        node.children = children;
      }
    }

    Ok(nodes[0].take())
  }

  /// Walk parent links upward until an item with no parent is reached.
  ///
  /// Cycles and unfetchable parents terminate the walk with the last-seen
  /// id rather than an error; the hop cap is a hard circuit breaker.
  pub async fn resolve_root_id(&self, id: u64) -> Result<u64> {
    let mut current = id;
    let mut visited: HashSet<u64> = HashSet::new();

    for _ in 0..MAX_ROOT_HOPS {
      if !visited.insert(current) {
        tracing::debug!("Parent chain of {} revisits {}", id, current);
        return Ok(current);
      }

      let Some(item) = self.lookup(current).await? else {
        return Ok(current);
      };
      match item.parent {
        Some(parent) => current = parent,
        None => return Ok(current),
      }
    }

    tracing::warn!("Parent walk from {} hit the hop cap", id);
    Ok(current)
  }
}
