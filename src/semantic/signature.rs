//! Live-item fingerprinting and the hit / incremental / full-rebuild decision.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

use crate::items::Item;
use crate::semantic::index::VectorStore;

/// Below this share of added+removed ids the stored index is patched instead of rebuilt.
pub const INCREMENTAL_CHANGE_RATIO: f64 = 0.2;

/// Hex SHA-256 over the sorted `id|title|url|folderPath` lines of all live items.
pub fn signature(items: &[Item]) -> String {
    let mut lines: Vec<String> = items
        .iter()
        .map(|item| format!("{}|{}|{}|{}", item.id, item.title, item.url, item.folder_path))
        .collect();
    lines.sort();

    let mut hasher = Sha256::new();
    hasher.update(lines.join("\n").as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// What to do with the persisted index for the current live set.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction {
    /// Stored index matches the live set exactly.
    Hit,
    /// Embed `added`, drop `removed`, keep the rest.
    Incremental { added: Vec<Item>, removed: Vec<String> },
    /// Embed every live item from scratch.
    FullRebuild,
}

impl SyncAction {
    pub fn label(&self) -> &'static str {
        match self {
            SyncAction::Hit => "hit",
            SyncAction::Incremental { .. } => "incremental",
            SyncAction::FullRebuild => "full_rebuild",
        }
    }
}

/// Decide how to bring `stored` (if any) in line with `live`.
///
/// `stored` is the snapshot that was readable, paired with its signature; an
/// unreadable or absent snapshot must be passed as `None`.
pub fn plan_sync(
    live: &[Item],
    live_signature: &str,
    stored: Option<(&str, &VectorStore)>,
) -> SyncAction {
    let Some((stored_signature, store)) = stored else {
        return SyncAction::FullRebuild;
    };

    if stored_signature == live_signature {
        return SyncAction::Hit;
    }

    if live.is_empty() {
        return SyncAction::FullRebuild;
    }

    let live_ids: HashSet<&str> = live.iter().map(|item| item.id.as_str()).collect();

    let mut removed: Vec<String> = store
        .ids()
        .filter(|id| !live_ids.contains(id))
        .map(str::to_string)
        .collect();
    removed.sort();

    let added: Vec<Item> = live
        .iter()
        .filter(|item| !store.contains(&item.id))
        .cloned()
        .collect();

    let change_ratio = (removed.len() + added.len()) as f64 / live_ids.len() as f64;
    if change_ratio < INCREMENTAL_CHANGE_RATIO {
        SyncAction::Incremental { added, removed }
    } else {
        SyncAction::FullRebuild
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, title: &str) -> Item {
        Item {
            id: id.to_string(),
            title: title.to_string(),
            url: format!("https://example.com/{id}"),
            folder_path: "Bookmarks bar".to_string(),
            parent_id: Some("1".to_string()),
            added_at: None,
        }
    }

    fn store_with(ids: &[&str]) -> VectorStore {
        let mut store = VectorStore::new(2);
        for id in ids {
            store.insert(item(id, id), 0, vec![1.0, 0.0]).unwrap();
        }
        store
    }

    #[test]
    fn test_signature_is_order_independent() {
        let items = vec![item("1", "a"), item("2", "b"), item("3", "c")];
        let mut shuffled = items.clone();
        shuffled.reverse();
        shuffled.swap(0, 1);

        assert_eq!(signature(&items), signature(&shuffled));
        assert_eq!(signature(&items).len(), 64);
    }

    #[test]
    fn test_signature_tracks_every_field() {
        let base = vec![item("1", "a")];
        let reference = signature(&base);

        let mut retitled = base.clone();
        retitled[0].title = "b".to_string();
        assert_ne!(signature(&retitled), reference);

        let mut moved = base.clone();
        moved[0].folder_path = "Other bookmarks".to_string();
        assert_ne!(signature(&moved), reference);

        let mut relinked = base.clone();
        relinked[0].url = "https://example.com/elsewhere".to_string();
        assert_ne!(signature(&relinked), reference);
    }

    #[test]
    fn test_no_snapshot_means_full_rebuild() {
        let live = vec![item("1", "a")];
        assert_eq!(plan_sync(&live, &signature(&live), None), SyncAction::FullRebuild);
    }

    #[test]
    fn test_equal_signature_is_hit() {
        let live = vec![item("1", "a")];
        let sig = signature(&live);
        let store = store_with(&["1"]);
        assert_eq!(plan_sync(&live, &sig, Some((&sig, &store))), SyncAction::Hit);
    }

    #[test]
    fn test_small_change_is_incremental() {
        let ids: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        let stored_ids: Vec<&str> = ids.iter().map(String::as_str).collect();
        let store = store_with(&stored_ids);

        // one added, none removed: 1/11 < 0.2
        let mut live: Vec<Item> = ids.iter().map(|id| item(id, id)).collect();
        live.push(item("new", "new"));

        match plan_sync(&live, &signature(&live), Some(("old", &store))) {
            SyncAction::Incremental { added, removed } => {
                assert_eq!(added.len(), 1);
                assert_eq!(added[0].id, "new");
                assert!(removed.is_empty());
            }
            other => panic!("expected incremental, got {other:?}"),
        }
    }

    #[test]
    fn test_large_change_is_full_rebuild() {
        let store = store_with(&["1", "2", "3", "4", "5"]);
        // 1 removed + 1 added over 5 live = 0.4
        let live = vec![
            item("1", "1"),
            item("2", "2"),
            item("3", "3"),
            item("4", "4"),
            item("6", "6"),
        ];
        assert_eq!(
            plan_sync(&live, &signature(&live), Some(("old", &store))),
            SyncAction::FullRebuild
        );
    }

    #[test]
    fn test_ratio_at_threshold_is_full_rebuild() {
        let store = store_with(&["1", "2", "3", "4"]);
        // 1 added over 5 live = exactly 0.2
        let live = vec![
            item("1", "1"),
            item("2", "2"),
            item("3", "3"),
            item("4", "4"),
            item("5", "5"),
        ];
        assert_eq!(
            plan_sync(&live, &signature(&live), Some(("old", &store))),
            SyncAction::FullRebuild
        );
    }

    #[test]
    fn test_edit_without_id_change_is_incremental_with_nothing_to_embed() {
        let store = store_with(&["1", "2"]);
        let live = vec![item("1", "renamed"), item("2", "2")];

        assert_eq!(
            plan_sync(&live, &signature(&live), Some(("old", &store))),
            SyncAction::Incremental {
                added: vec![],
                removed: vec![]
            }
        );
    }
}
