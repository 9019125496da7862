//! Builds a user's directory tree from a flat key listing.
//!
//! Nodes live in an arena indexed by cumulative path; parent/child links are
//! arena indices. Nodes are created the first time a sub-path is seen, so the
//! result does not depend on the order keys arrive in.

use crate::{
    models::file_node::FileNode,
    services::object_store::{ObjectStore, StoreResult, list_all},
};
use std::{cmp::Ordering, collections::HashMap};
use tracing::debug;

struct ArenaNode {
    name: String,
    path: String,
    is_directory: bool,
    children: Vec<usize>,
}

/// List everything under `{login_name}/` and return the root's children.
pub async fn build_tree(store: &dyn ObjectStore, login_name: &str) -> StoreResult<Vec<FileNode>> {
    let objects = list_all(store, &format!("{}/", login_name)).await?;
    debug!(login = login_name, objects = objects.len(), "building file tree");
    Ok(build_tree_from_keys(
        login_name,
        objects.iter().map(|o| o.key.as_str()),
    ))
}

/// Pure tree construction over raw object keys rooted at `home`.
///
/// Keys outside `{home}/` and the bare prefix marker are ignored. A key ending
/// in `/` marks its last segment as a directory. Empty segments are skipped.
pub fn build_tree_from_keys<'a, I>(home: &str, keys: I) -> Vec<FileNode>
where
    I: IntoIterator<Item = &'a str>,
{
    let prefix = format!("{}/", home);
    let mut arena = vec![ArenaNode {
        name: String::new(),
        path: String::new(),
        is_directory: true,
        children: Vec::new(),
    }];
    let mut by_path: HashMap<String, usize> = HashMap::from([(String::new(), 0)]);

    for key in keys {
        let Some(relative) = key.strip_prefix(&prefix) else {
            continue;
        };
        let marks_directory = relative.ends_with('/');
        let segments: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();

        let mut parent = 0;
        let mut path = String::new();
        for (i, segment) in segments.iter().enumerate() {
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str(segment);
            let is_directory = i + 1 < segments.len() || marks_directory;

            parent = match by_path.get(&path) {
                Some(&existing) => {
                    // A key seen as a file earlier can turn out to have descendants.
                    if is_directory {
                        arena[existing].is_directory = true;
                    }
                    existing
                }
                None => {
                    let id = arena.len();
                    arena.push(ArenaNode {
                        name: segment.to_string(),
                        path: path.clone(),
                        is_directory,
                        children: Vec::new(),
                    });
                    arena[parent].children.push(id);
                    by_path.insert(path.clone(), id);
                    id
                }
            };
        }
    }

    materialize(&arena, 0).children.unwrap_or_default()
}

fn materialize(arena: &[ArenaNode], id: usize) -> FileNode {
    let node = &arena[id];
    let children = node.is_directory.then(|| {
        let mut children: Vec<FileNode> = node
            .children
            .iter()
            .map(|&child| materialize(arena, child))
            .collect();
        children.sort_by(compare_nodes);
        children
    });
    FileNode {
        name: node.name.clone(),
        path: node.path.clone(),
        is_directory: node.is_directory,
        children,
    }
}

fn compare_nodes(a: &FileNode, b: &FileNode) -> Ordering {
    b.is_directory
        .cmp(&a.is_directory)
        .then_with(|| compare_names(&a.name, &b.name))
}

/// Collation used for listing names.
///
/// Case-insensitive first, lowercase before uppercase on ties, then code
/// point order. Digits sort before Latin letters and Latin before Hangul.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    let folded = |s: &str| s.chars().flat_map(char::to_lowercase).collect::<Vec<_>>();
    folded(a)
        .cmp(&folded(b))
        .then_with(|| {
            a.chars()
                .map(char::is_uppercase)
                .cmp(b.chars().map(char::is_uppercase))
        })
        .then_with(|| a.cmp(b))
}
