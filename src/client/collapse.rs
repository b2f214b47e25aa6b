//! Viewport anchoring for comment collapse.
//!
//! Collapsing a subtree should leave the viewport on a sensible nearby
//! comment instead of jumping to the top. The anchor is the next uncollapsed
//! sibling; if that sibling is itself collapsed, its first uncollapsed
//! descendant; otherwise the walk bubbles up to the parent's next sibling.

use std::collections::HashSet;

use crate::types::Item;

/// Compute the comment to scroll to after collapsing `from`. `roots` are the
/// story's top-level comments. Returns None when no comment below remains.
pub fn next_anchor(roots: &[Item], collapsed: &HashSet<u64>, from: u64) -> Option<u64> {
  let mut path = Vec::new();
  if !find_path(roots, from, &mut path) {
    return None;
  }

  while let Some((siblings, idx)) = path.pop() {
    for sibling in &siblings[idx + 1..] {
      if !collapsed.contains(&sibling.id) {
        return Some(sibling.id);
      }
      if let Some(id) = first_uncollapsed_descendant(sibling, collapsed) {
        return Some(id);
      }
    }
  }
  None
}

/// Record the (sibling slice, index) steps from the root level down to the
/// target comment.
fn find_path<'a>(
  siblings: &'a [Item],
  target: u64,
  path: &mut Vec<(&'a [Item], usize)>,
) -> bool {
  for (i, node) in siblings.iter().enumerate() {
    path.push((siblings, i));
    if node.id == target || find_path(&node.children, target, path) {
      return true;
    }
    path.pop();
  }
  false
}

fn first_uncollapsed_descendant(node: &Item, collapsed: &HashSet<u64>) -> Option<u64> {
  for child in &node.children {
    if !collapsed.contains(&child.id) {
      return Some(child.id);
    }
    if let Some(id) = first_uncollapsed_descendant(child, collapsed) {
      return Some(id);
    }
  }
  None
}
