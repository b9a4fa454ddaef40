use std::time::Duration;

use futures_util::future::try_join_all;

use crate::error::Result;
use crate::hash::ObjectId;
use crate::transport::{bounded, RemoteStore};
use crate::types::{FileSet, RepoFullName};

/// write one blob per file, concurrently
///
/// returns the addresses in submission order. the first failure fails the
/// whole stage and the outstanding writes are dropped; blobs that already
/// landed stay behind as unreferenced objects for the host to collect.
pub async fn write_blobs(
    store: &dyn RemoteStore,
    repo: &RepoFullName,
    files: &FileSet,
    timeout: Duration,
) -> Result<Vec<ObjectId>> {
    let writes = files.entries().iter().map(|entry| async move {
        let id = bounded("create_blob", timeout, store.create_blob(repo, &entry.content)).await?;
        tracing::debug!(path = %entry.path, blob = %id.short(), "blob written");
        Ok::<_, crate::Error>(id)
    });
    try_join_all(writes).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::hash::compute_blob_id;
    use crate::transport::MemoryStore;
    use crate::types::FileEntry;

    fn hub() -> RepoFullName {
        "user/hub".parse().unwrap()
    }

    fn files(items: &[(&str, &str)]) -> FileSet {
        FileSet::new(
            items
                .iter()
                .map(|(p, c)| FileEntry::from_str_path(p, *c).unwrap())
                .collect(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_write_blobs_in_submission_order() {
        let store = MemoryStore::new("user");
        store.seed_empty_repository(&hub());
        let set = files(&[("b.md", "bee"), ("SKILL.md", "# Hi"), ("a.md", "ay")]);

        let ids = write_blobs(&store, &hub(), &set, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            ids,
            vec![
                compute_blob_id(b"bee"),
                compute_blob_id(b"# Hi"),
                compute_blob_id(b"ay")
            ]
        );
        assert_eq!(store.stats().blobs_written, 3);
    }

    #[tokio::test]
    async fn test_one_failure_fails_stage() {
        let store = MemoryStore::new("user");
        store.seed_empty_repository(&hub());
        store.fail_blob(b"broken");
        let set = files(&[("ok.md", "fine"), ("bad.md", "broken")]);

        let result = write_blobs(&store, &hub(), &set, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(Error::Transport { .. })));
    }

    #[tokio::test]
    async fn test_blob_write_is_time_bounded() {
        let store = MemoryStore::new("user");
        store.seed_empty_repository(&hub());
        store.set_latency("create_blob", Duration::from_secs(5));
        let set = files(&[("SKILL.md", "# Hi")]);

        let result = write_blobs(&store, &hub(), &set, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(Error::Timeout { operation: "create_blob", .. })));
    }
}
