use serde::{Deserialize, Serialize};

use crate::hash::ObjectId;
use crate::types::{FileMode, RelativePath};

/// a blob placed at a path in a tree request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub path: RelativePath,
    pub mode: FileMode,
    pub id: ObjectId,
}

impl TreeEntry {
    pub fn new(path: RelativePath, mode: FileMode, id: ObjectId) -> Self {
        Self { path, mode, id }
    }
}

/// a tree creation request
///
/// with a base, the entries are layered onto the base tree and every
/// other path of the base is kept. without one, the entries are the
/// complete snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeSpec {
    pub base: Option<ObjectId>,
    pub entries: Vec<TreeEntry>,
}

impl TreeSpec {
    /// full snapshot, no base
    pub fn snapshot(entries: Vec<TreeEntry>) -> Self {
        Self {
            base: None,
            entries,
        }
    }

    /// partial update layered on `base`
    pub fn layered(base: ObjectId, entries: Vec<TreeEntry>) -> Self {
        Self {
            base: Some(base),
            entries,
        }
    }

    pub fn is_layered(&self) -> bool {
        self.base.is_some()
    }
}
