//! A node of the per-user directory tree derived from flat object keys.

use serde::{Deserialize, Serialize};

/// One file or (implicit) directory in a user's home.
///
/// Rebuilt from a full listing on every request, never persisted.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileNode {
    /// Last path segment.
    pub name: String,

    /// Slash-joined path relative to the home prefix, no leading or trailing slash.
    pub path: String,

    /// Inferred from an intermediate segment or a key ending in `/`.
    pub is_directory: bool,

    /// Present only for directories: directories first, then by name.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub children: Option<Vec<FileNode>>,
}

impl FileNode {
    /// Depth-first iterator over this node and all of its descendants.
    pub fn walk(&self) -> Vec<&FileNode> {
        let mut out = vec![self];
        for child in self.children.iter().flatten() {
            out.extend(child.walk());
        }
        out
    }
}
