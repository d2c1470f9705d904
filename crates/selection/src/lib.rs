//! Focus recovery for photosift
//!
//! When a batch removes items from an ordered view (deleted rejects, hidden
//! blurry shots), picks the item that should receive focus next: the old
//! focus if it survived, otherwise its nearest surviving neighbour, looking
//! forward before backward.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Before/after snapshot of an ordered view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionQuery {
    /// Ordering before the removal, unique paths
    pub visible_before: Vec<PathBuf>,
    /// Item focused before the removal
    pub anchor_before: Option<PathBuf>,
    pub removed: HashSet<PathBuf>,
    /// Ordering after the removal, unique paths
    pub visible_after: Vec<PathBuf>,
}

impl SelectionQuery {
    /// Build a query where the after-ordering is `visible_before` minus
    /// `removed`, order preserved.
    pub fn from_removal(
        visible_before: Vec<PathBuf>,
        anchor_before: Option<PathBuf>,
        removed: HashSet<PathBuf>,
    ) -> Self {
        let visible_after = visible_before
            .iter()
            .filter(|path| !removed.contains(*path))
            .cloned()
            .collect();
        Self {
            visible_before,
            anchor_before,
            removed,
            visible_after,
        }
    }
}

/// Item to focus after the removal. `None` only when nothing is visible.
///
/// Never fails; empty orderings, an anchor missing from either ordering and
/// removal sets unrelated to the view are all valid input.
pub fn resolve(query: SelectionQuery) -> Option<PathBuf> {
    let SelectionQuery {
        visible_before,
        anchor_before,
        removed,
        mut visible_after,
    } = query;

    let after: HashSet<&Path> = visible_after.iter().map(PathBuf::as_path).collect();

    if let Some(anchor) = anchor_before.as_deref() {
        if after.contains(anchor) {
            return anchor_before;
        }
    }

    if visible_before.is_empty() {
        return visible_after.pop();
    }

    let target = target_index(&visible_before, anchor_before.as_deref(), &removed);
    tracing::trace!(index = target, "resolving focus");

    let survives = |path: &PathBuf| !removed.contains(path) && after.contains(path.as_path());

    let found = visible_before[target..]
        .iter()
        .find(|&path| survives(path))
        .or_else(|| visible_before[..target].iter().rev().find(|&path| survives(path)))
        .cloned();

    found.or_else(|| visible_after.pop())
}

/// Position in `visible_before` to search outward from.
fn target_index(visible_before: &[PathBuf], anchor: Option<&Path>, removed: &HashSet<PathBuf>) -> usize {
    if let Some(index) = anchor.and_then(|anchor| visible_before.iter().position(|p| p == anchor)) {
        return index;
    }

    // Earliest removed item in view order
    if let Some(index) = visible_before.iter().position(|p| removed.contains(p)) {
        return index;
    }

    match anchor {
        Some(anchor) => nearest_by_name(visible_before, anchor),
        None => visible_before.len() / 2,
    }
}

/// Index whose file name shares the longest prefix with the anchor's file
/// name. Ties go to the smallest index.
fn nearest_by_name(visible_before: &[PathBuf], anchor: &Path) -> usize {
    let anchor_name = file_name(anchor);
    let mut best = (0, 0);
    for (index, candidate) in visible_before.iter().enumerate() {
        let shared = common_prefix_len(&anchor_name, &file_name(candidate));
        if shared > best.1 {
            best = (index, shared);
        }
    }
    best.0
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    fn query(before: &[&str], anchor: Option<&str>, removed: &[&str], after: &[&str]) -> SelectionQuery {
        SelectionQuery {
            visible_before: paths(before),
            anchor_before: anchor.map(PathBuf::from),
            removed: paths(removed).into_iter().collect(),
            visible_after: paths(after),
        }
    }

    fn resolved(q: SelectionQuery) -> Option<String> {
        resolve(q).map(|p| p.to_string_lossy().into_owned())
    }

    #[test]
    fn test_anchor_survives() {
        let q = query(&["a", "b", "c", "d", "e"], Some("c"), &[], &["a", "b", "c", "d", "e"]);
        assert_eq!(resolved(q).as_deref(), Some("c"));
    }

    #[test]
    fn test_anchor_survives_other_removals() {
        let q = query(&["a", "b", "c", "d"], Some("c"), &["b", "d"], &["a", "c"]);
        assert_eq!(resolved(q).as_deref(), Some("c"));
    }

    #[test]
    fn test_forward_scan() {
        let q = query(&["a", "b", "c", "d", "e"], Some("c"), &["c"], &["a", "b", "d", "e"]);
        assert_eq!(resolved(q).as_deref(), Some("d"));
    }

    #[test]
    fn test_forward_skips_removed_run() {
        let q = query(&["a", "b", "c", "d", "e"], Some("b"), &["b", "c", "d"], &["a", "e"]);
        assert_eq!(resolved(q).as_deref(), Some("e"));
    }

    #[test]
    fn test_backward_fallback() {
        let q = query(&["a", "b", "c"], Some("c"), &["c"], &["a", "b"]);
        assert_eq!(resolved(q).as_deref(), Some("b"));
    }

    #[test]
    fn test_empty_result() {
        let q = query(&["a"], Some("a"), &["a"], &[]);
        assert_eq!(resolve(q), None);
    }

    #[test]
    fn test_no_anchor_uses_first_removed_in_view_order() {
        // "d" comes first in the view even though removal order is unspecified
        let q = query(&["a", "b", "c", "d", "e"], None, &["e", "d"], &["a", "b", "c"]);
        assert_eq!(resolved(q).as_deref(), Some("c"));
    }

    #[test]
    fn test_removed_contains_unknown_paths() {
        let q = query(&["a", "b", "c"], Some("b"), &["ghost", "b"], &["a", "c"]);
        assert_eq!(resolved(q).as_deref(), Some("c"));
    }

    #[test]
    fn test_name_proximity_when_anchor_unknown() {
        let before = ["/p/img_001.jpg", "/p/img_010.jpg", "/p/img_020.jpg", "/p/img_030.jpg"];
        let q = query(&before, Some("/elsewhere/img_015.jpg"), &[], &before);
        // img_010 shares the longest file-name prefix
        assert_eq!(resolved(q).as_deref(), Some("/p/img_010.jpg"));
    }

    #[test]
    fn test_name_proximity_tie_takes_first() {
        let before = ["x1", "x2", "x3"];
        let q = query(&before, Some("x9"), &[], &before);
        assert_eq!(resolved(q).as_deref(), Some("x1"));
    }

    #[test]
    fn test_midpoint_without_any_hint() {
        let q = query(&["a", "b", "c", "d", "e"], None, &[], &["a", "b", "c", "d", "e"]);
        // The guessed slot itself is a candidate; a scan starting one past it
        // would land on `d` instead.
        assert_eq!(resolved(q).as_deref(), Some("c"));
    }

    #[test]
    fn test_empty_before_returns_last_after() {
        let q = query(&[], None, &[], &["x", "y", "z"]);
        assert_eq!(resolved(q).as_deref(), Some("z"));
    }

    #[test]
    fn test_disjoint_after_returns_last_after() {
        let q = query(&["a", "b"], Some("b"), &["a", "b"], &["x", "y"]);
        assert_eq!(resolved(q).as_deref(), Some("y"));
    }

    #[test]
    fn test_everything_empty() {
        assert_eq!(resolve(SelectionQuery::default()), None);
    }

    #[test]
    fn test_from_removal_preserves_order() {
        let q = SelectionQuery::from_removal(
            paths(&["a", "b", "c", "d"]),
            Some(PathBuf::from("b")),
            paths(&["b", "c"]).into_iter().collect(),
        );
        assert_eq!(q.visible_after, paths(&["a", "d"]));
        assert_eq!(resolved(q).as_deref(), Some("d"));
    }

    #[test]
    fn test_result_always_in_after() {
        let before: Vec<String> = (0..12).map(|i| format!("img_{:02}.jpg", i)).collect();
        let before_refs: Vec<&str> = before.iter().map(String::as_str).collect();
        for mask in 0u32..(1 << 6) {
            let removed: Vec<&str> = before_refs
                .iter()
                .enumerate()
                .filter(|(i, _)| *i < 6 && mask & (1 << i) != 0)
                .map(|(_, p)| *p)
                .collect();
            for anchor in [None, Some("img_03.jpg"), Some("img_99.jpg")] {
                let q = SelectionQuery::from_removal(
                    paths(&before_refs),
                    anchor.map(PathBuf::from),
                    paths(&removed).into_iter().collect(),
                );
                let after = q.visible_after.clone();
                match resolve(q) {
                    Some(path) => assert!(after.contains(&path)),
                    None => assert!(after.is_empty()),
                }
            }
        }
    }
}
