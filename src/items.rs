//! Saved items and the hierarchical tree they come from.
//!
//! The tree itself is owned by an external store; this module only knows how to
//! walk it into flat `(item, folder path)` pairs.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Separator between folder titles in a derived folder path.
pub const PATH_SEPARATOR: &str = " > ";

/// Nodes nested deeper than this are skipped.
const MAX_TREE_DEPTH: usize = 64;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub url: String,
    /// Titles of the enclosing folders joined by `" > "`. Empty at the tree root.
    #[serde(default)]
    pub folder_path: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub added_at: Option<DateTime<Utc>>,
}

impl Item {
    /// Key used to group items by folder: the parent id when known, the path otherwise.
    pub fn folder_key(&self) -> &str {
        self.parent_id.as_deref().unwrap_or(&self.folder_path)
    }

    /// Title of the innermost folder, if any.
    pub fn folder_leaf(&self) -> Option<&str> {
        if self.folder_path.is_empty() {
            return None;
        }
        self.folder_path.rsplit(PATH_SEPARATOR).next()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub title: String,
    /// Full path of the folder, its own title included.
    pub path: String,
}

impl Folder {
    pub fn segments(&self) -> Vec<&str> {
        self.path.split(PATH_SEPARATOR).collect()
    }
}

/// A flattened snapshot of the external tree.
#[derive(Clone, Debug, Default)]
pub struct ItemTree {
    pub items: Vec<Item>,
    pub folders: Vec<Folder>,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed item tree: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Anything that can enumerate the live item tree.
pub trait ItemSource: Send + Sync {
    fn list_all(&self) -> Result<ItemTree, SourceError>;
}

/// A node of the serialized tree.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub date_added: Option<i64>,
    #[serde(default)]
    pub children: Option<Vec<TreeNode>>,
}

impl TreeNode {
    fn is_folder(&self) -> bool {
        self.url.is_none()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TreeDocument {
    Many(Vec<TreeNode>),
    One(TreeNode),
}

/// Reads the item tree from a JSON file on every call.
pub struct TreeFile {
    path: PathBuf,
    trash_folder: String,
}

impl TreeFile {
    pub fn new(path: PathBuf, trash_folder: &str) -> Self {
        Self {
            path,
            trash_folder: trash_folder.to_string(),
        }
    }
}

impl ItemSource for TreeFile {
    fn list_all(&self) -> Result<ItemTree, SourceError> {
        let data = std::fs::read(&self.path)?;
        let roots = match serde_json::from_slice::<TreeDocument>(&data)? {
            TreeDocument::Many(nodes) => nodes,
            TreeDocument::One(node) => vec![node],
        };
        Ok(flatten_tree(&roots, &self.trash_folder))
    }
}

/// Walk the tree and derive folder paths for every item.
///
/// Folders titled `trash_folder` are skipped together with their subtree.
pub fn flatten_tree(roots: &[TreeNode], trash_folder: &str) -> ItemTree {
    let mut tree = ItemTree::default();

    // (node, path of the enclosing folder, parent id, depth)
    let mut stack: Vec<(&TreeNode, String, Option<String>, usize)> = roots
        .iter()
        .rev()
        .map(|node| (node, String::new(), None, 0))
        .collect();

    while let Some((node, path, parent_id, depth)) = stack.pop() {
        if depth > MAX_TREE_DEPTH {
            log::warn!("skipping node {} nested deeper than {MAX_TREE_DEPTH}", node.id);
            continue;
        }

        if node.is_folder() && node.title == trash_folder {
            continue;
        }

        if let Some(url) = &node.url {
            tree.items.push(Item {
                id: node.id.clone(),
                title: node.title.clone(),
                url: url.clone(),
                folder_path: path.clone(),
                parent_id: parent_id.clone(),
                added_at: node.date_added.and_then(DateTime::from_timestamp_millis),
            });
        }

        if let Some(children) = &node.children {
            let next_path = if path.is_empty() {
                node.title.clone()
            } else {
                format!("{path}{PATH_SEPARATOR}{}", node.title)
            };

            if node.is_folder() && !next_path.is_empty() {
                tree.folders.push(Folder {
                    id: node.id.clone(),
                    title: node.title.clone(),
                    path: next_path.clone(),
                });
            }

            // reversed so children come off the stack in document order
            for child in children.iter().rev() {
                stack.push((child, next_path.clone(), Some(node.id.clone()), depth + 1));
            }
        }
    }

    tree
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bookmark(id: &str, title: &str, url: &str) -> TreeNode {
        TreeNode {
            id: id.to_string(),
            title: title.to_string(),
            url: Some(url.to_string()),
            ..Default::default()
        }
    }

    fn folder(id: &str, title: &str, children: Vec<TreeNode>) -> TreeNode {
        TreeNode {
            id: id.to_string(),
            title: title.to_string(),
            children: Some(children),
            ..Default::default()
        }
    }

    #[test]
    fn test_paths_are_derived_from_folders() {
        let root = folder(
            "0",
            "",
            vec![folder(
                "1",
                "Bookmarks bar",
                vec![
                    bookmark("10", "top", "https://a.example"),
                    folder("2", "Rust", vec![bookmark("20", "nested", "https://b.example")]),
                ],
            )],
        );

        let tree = flatten_tree(&[root], "Trash");
        assert_eq!(tree.items.len(), 2);

        assert_eq!(tree.items[0].folder_path, "Bookmarks bar");
        assert_eq!(tree.items[0].parent_id.as_deref(), Some("1"));
        assert_eq!(tree.items[1].folder_path, "Bookmarks bar > Rust");
        assert_eq!(tree.items[1].folder_leaf(), Some("Rust"));

        let paths: Vec<&str> = tree.folders.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["Bookmarks bar", "Bookmarks bar > Rust"]);
    }

    #[test]
    fn test_trash_subtree_is_skipped() {
        let root = folder(
            "0",
            "Other bookmarks",
            vec![
                folder("9", "Trash", vec![bookmark("90", "gone", "https://c.example")]),
                bookmark("11", "kept", "https://d.example"),
            ],
        );

        let tree = flatten_tree(&[root], "Trash");
        assert_eq!(tree.items.len(), 1);
        assert_eq!(tree.items[0].id, "11");
        assert!(tree.folders.iter().all(|f| f.title != "Trash"));
    }

    #[test]
    fn test_depth_is_bounded() {
        let mut node = bookmark("leaf", "deep", "https://deep.example");
        for i in 0..(MAX_TREE_DEPTH + 5) {
            node = folder(&format!("f{i}"), "x", vec![node]);
        }

        let tree = flatten_tree(&[node], "Trash");
        assert!(tree.items.is_empty());
    }

    #[test]
    fn test_tree_file_accepts_single_root() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tree.json");
        std::fs::write(
            &path,
            r#"{"id":"0","title":"","children":[{"id":"5","title":"hello","url":"https://e.example","date_added":1700000000000}]}"#,
        )
        .unwrap();

        let tree = TreeFile::new(path, "Trash").list_all().unwrap();
        assert_eq!(tree.items.len(), 1);
        assert_eq!(tree.items[0].folder_path, "");
        assert!(tree.items[0].added_at.is_some());
    }
}
