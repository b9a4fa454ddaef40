use std::time::Duration;

use crate::error::Result;
use crate::hash::ObjectId;
use crate::transport::{bounded, RemoteStore};
use crate::types::{FileSet, RelativePath, RepoFullName, TreeEntry, TreeSpec};

/// describe the tree for one deployment
///
/// entries keep submission order. with a `prefix` every path is placed
/// below it; with a `base` the request is a partial update layered onto
/// that tree instead of a full snapshot.
pub fn plan_tree(
    files: &FileSet,
    blobs: &[ObjectId],
    prefix: Option<&RelativePath>,
    base: Option<ObjectId>,
) -> TreeSpec {
    debug_assert_eq!(files.len(), blobs.len());

    let entries = files
        .entries()
        .iter()
        .zip(blobs)
        .map(|(file, id)| {
            let path = match prefix {
                Some(prefix) => prefix.join(&file.path),
                None => file.path.clone(),
            };
            TreeEntry::new(path, file.mode, id.clone())
        })
        .collect();

    match base {
        Some(base) => TreeSpec::layered(base, entries),
        None => TreeSpec::snapshot(entries),
    }
}

/// create the planned tree on the remote
pub async fn compose_tree(
    store: &dyn RemoteStore,
    repo: &RepoFullName,
    spec: &TreeSpec,
    timeout: Duration,
) -> Result<ObjectId> {
    let id = bounded("create_tree", timeout, store.create_tree(repo, spec)).await?;
    tracing::debug!(
        tree = %id.short(),
        entries = spec.entries.len(),
        layered = spec.is_layered(),
        "tree composed"
    );
    Ok(id)
}
