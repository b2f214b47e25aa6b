//! Serde-deserializable types matching the raw Firebase and Algolia
//! responses.
//!
//! These are separate from domain types so deserialization stays permissive
//! while everything behind the boundary is validated: an `ApiItem` is
//! whatever the wire said, an `Item` has a trusted shape.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;

use crate::types::{Item, ItemKind};

// ============================================================================
// Firebase item endpoint
// ============================================================================

/// Raw item as returned by `/item/{id}.json`. Deleted items can lack almost
/// every field, including the type tag.
#[derive(Debug, Deserialize)]
pub struct ApiItem {
  pub id: u64,
  #[serde(rename = "type")]
  pub kind: Option<String>,
  pub by: Option<String>,
  #[serde(default)]
  pub time: i64,
  pub title: Option<String>,
  pub url: Option<String>,
  pub text: Option<String>,
  pub score: Option<i64>,
  pub descendants: Option<u64>,
  pub parent: Option<u64>,
  #[serde(default)]
  pub kids: Vec<u64>,
  #[serde(default)]
  pub deleted: bool,
  #[serde(default)]
  pub dead: bool,
}

impl ApiItem {
  /// Validate and convert into a domain item.
  ///
  /// An unknown type tag on live content is a validation failure. Deleted or
  /// dead items are allowed to omit the tag; their kind is inferred from the
  /// presence of a parent link so thread structure survives.
  pub fn into_item(self, captured_at: i64) -> Result<Item> {
    let kind = match self.kind.as_deref() {
      Some("story") => ItemKind::Story,
      Some("comment") => ItemKind::Comment,
      Some("job") => ItemKind::Job,
      Some("poll") => ItemKind::Poll,
      Some("pollopt") => ItemKind::PollOpt,
      Some(other) => {
        return Err(eyre!("item {} has unknown type tag '{}'", self.id, other));
      }
      None if self.deleted || self.dead => {
        if self.parent.is_some() {
          ItemKind::Comment
        } else {
          ItemKind::Story
        }
      }
      None => return Err(eyre!("item {} is missing its type tag", self.id)),
    };

    Ok(Item {
      id: self.id,
      kind,
      by: self.by,
      time: self.time,
      title: self.title,
      url: self.url,
      text: self.text,
      score: self.score,
      descendants: self.descendants,
      parent: self.parent,
      root_id: None,
      kids: self.kids,
      children: Vec::new(),
      last_updated: Some(captured_at),
      deleted: self.deleted,
      dead: self.dead,
    })
  }
}

// ============================================================================
// Algolia search endpoints
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiSearchResponse {
  #[serde(default)]
  pub hits: Vec<ApiSearchHit>,
}

/// One search hit. Algolia keys items by a stringified numeric id.
#[derive(Debug, Deserialize)]
pub struct ApiSearchHit {
  #[serde(rename = "objectID")]
  pub object_id: String,
  pub title: Option<String>,
  pub url: Option<String>,
  pub author: Option<String>,
  pub points: Option<i64>,
  #[serde(default)]
  pub created_at_i: i64,
  pub num_comments: Option<u64>,
  pub story_text: Option<String>,
}

impl ApiSearchHit {
  pub fn id(&self) -> Result<u64> {
    self
      .object_id
      .parse()
      .map_err(|_| eyre!("search hit has non-numeric objectID '{}'", self.object_id))
  }

  /// Thin, non-hydrated item for search result views.
  pub fn into_item(self, captured_at: i64) -> Result<Item> {
    let id = self.id()?;
    Ok(Item {
      id,
      kind: ItemKind::Story,
      by: self.author,
      time: self.created_at_i,
      title: self.title,
      url: self.url,
      text: self.story_text,
      score: self.points,
      descendants: self.num_comments,
      parent: None,
      root_id: None,
      kids: Vec::new(),
      children: Vec::new(),
      last_updated: Some(captured_at),
      deleted: false,
      dead: false,
    })
  }
}
