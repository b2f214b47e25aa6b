//! Domain types shared by the server cache and the client sync layer.
//!
//! These are separate from the raw API shapes in `hn::api_types`: everything
//! here has already passed boundary validation and can be trusted internally.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Kind tag for a content-tree node, validated at the network boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
  Story,
  Comment,
  Job,
  Poll,
  PollOpt,
}

/// A node in the content tree: a story, comment, job, poll or poll option.
///
/// `kids` holds ordered child ids as delivered by the API; `children` holds
/// the materialized child objects. Once a node is resolved, `children` is
/// populated and `kids` is cleared - the two are mutually exclusive on a
/// complete node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
  pub id: u64,
  #[serde(rename = "type")]
  pub kind: ItemKind,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub by: Option<String>,
  /// Content creation time, seconds since epoch.
  pub time: i64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
  /// HTML body (comment text, Ask HN text, poll text).
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub text: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub score: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub descendants: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub parent: Option<u64>,
  /// Top-level story (or top-level comment) reached by walking parent links.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub root_id: Option<u64>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub kids: Vec<u64>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub children: Vec<Item>,
  /// Local wall-clock time this node's data was captured - not the content's
  /// own timestamp.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_updated: Option<i64>,
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub deleted: bool,
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub dead: bool,
}

impl Item {
  /// A node is complete when it has no unresolved child ids left.
  pub fn is_complete(&self) -> bool {
    self.kids.is_empty()
  }

  /// Removed content with no live children carries no thread structure and
  /// can be dropped from a materialized tree.
  pub fn is_tombstone(&self) -> bool {
    (self.deleted || self.dead) && self.kids.is_empty() && self.children.is_empty()
  }

  /// Collect this node's id and every materialized descendant id.
  ///
  /// Iterative walk so the stack depth stays independent of tree size.
  pub fn collect_ids(&self, out: &mut HashSet<u64>) {
    let mut stack: Vec<&Item> = vec![self];
    while let Some(node) = stack.pop() {
      out.insert(node.id);
      out.extend(node.kids.iter().copied());
      stack.extend(node.children.iter());
    }
  }
}

/// Denormalized projection of an item used for list views, so the client
/// never has to persist full comment trees. Derived, never authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorySummary {
  pub id: u64,
  pub title: Option<String>,
  pub url: Option<String>,
  pub by: Option<String>,
  pub score: Option<i64>,
  pub descendants: Option<u64>,
  pub time: i64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_updated: Option<i64>,
}

impl From<&Item> for StorySummary {
  fn from(item: &Item) -> Self {
    StorySummary {
      id: item.id,
      title: item.title.clone(),
      url: item.url.clone(),
      by: item.by.clone(),
      score: item.score,
      descendants: item.descendants,
      time: item.time,
      last_updated: item.last_updated,
    }
  }
}

/// The named top-story lists the server refreshes and serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
  #[serde(rename = "topstories")]
  Top,
  Day,
  Week,
  Month,
}

impl ListKind {
  pub const ALL: [ListKind; 4] = [
    ListKind::Top,
    ListKind::Day,
    ListKind::Week,
    ListKind::Month,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      ListKind::Top => "topstories",
      ListKind::Day => "day",
      ListKind::Week => "week",
      ListKind::Month => "month",
    }
  }

  /// Creation-time window behind this list, in seconds. The ranked top list
  /// has no window.
  pub fn window_secs(&self) -> Option<i64> {
    match self {
      ListKind::Top => None,
      ListKind::Day => Some(60 * 60 * 24),
      ListKind::Week => Some(60 * 60 * 24 * 7),
      ListKind::Month => Some(60 * 60 * 24 * 30),
    }
  }
}

impl fmt::Display for ListKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ListKind {
  type Err = ();

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "topstories" => Ok(ListKind::Top),
      "day" => Ok(ListKind::Day),
      "week" => Ok(ListKind::Week),
      "month" => Ok(ListKind::Month),
      _ => Err(()),
    }
  }
}

/// A named, ordered id list plus the local time it was last refreshed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopStoryList {
  pub kind: ListKind,
  pub ids: Vec<u64>,
  pub last_updated: i64,
}
