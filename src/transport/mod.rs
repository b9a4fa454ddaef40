//! transport layer for the remote object store
//!
//! the deployment core only speaks to the host through [`RemoteStore`].
//! [`GithubStore`] drives the GitHub REST API, [`MemoryStore`] is an
//! in-process fake with the same semantics.

pub mod github;
pub mod memory;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hash::ObjectId;
use crate::types::{CommitSpec, RepoFullName, TreeSpec, Visibility};

pub use github::{Credential, GithubStore};
pub use memory::{MemoryStore, StoreStats};

/// repository metadata returned by the host
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub full_name: RepoFullName,
    pub default_branch: String,
    /// browsable url of the repository
    pub html_url: String,
}

/// the content-addressed object API of a code-hosting service
///
/// every method is a single request; callers bound each one with
/// [`bounded`].
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// login of the account that owns newly created repositories
    async fn authenticated_owner(&self) -> Result<String>;

    /// repository metadata, `None` if it does not exist
    async fn repository(&self, full_name: &RepoFullName) -> Result<Option<RepositoryInfo>>;

    /// create an empty repository under the authenticated account
    ///
    /// fails with [`Error::NameConflict`] if the name is taken.
    async fn create_repository(
        &self,
        name: &str,
        visibility: Visibility,
        description: Option<&str>,
    ) -> Result<RepositoryInfo>;

    /// current target of `refs/heads/<branch>`, `None` if absent or the repo is empty
    async fn read_ref(&self, repo: &RepoFullName, branch: &str) -> Result<Option<ObjectId>>;

    /// root tree of a commit
    async fn commit_tree(&self, repo: &RepoFullName, commit: &ObjectId) -> Result<ObjectId>;

    async fn create_blob(&self, repo: &RepoFullName, content: &[u8]) -> Result<ObjectId>;

    async fn create_tree(&self, repo: &RepoFullName, spec: &TreeSpec) -> Result<ObjectId>;

    async fn create_commit(&self, repo: &RepoFullName, spec: &CommitSpec) -> Result<ObjectId>;

    /// create `refs/heads/<branch>`
    ///
    /// fails with [`Error::RefAlreadyExists`] if it is already there.
    async fn create_ref(&self, repo: &RepoFullName, branch: &str, target: &ObjectId)
        -> Result<()>;

    /// move `refs/heads/<branch>` from `expected` to `target`
    ///
    /// fails with [`Error::FastForwardConflict`] if the branch no longer
    /// points at `expected`. never forces.
    async fn update_ref(
        &self,
        repo: &RepoFullName,
        branch: &str,
        target: &ObjectId,
        expected: &ObjectId,
    ) -> Result<()>;
}

/// run one remote call with a hard deadline
pub async fn bounded<T, F>(operation: &'static str, timeout: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, timeout_ms = timeout.as_millis() as u64, "remote call timed out");
            Err(Error::Timeout {
                operation,
                after: timeout,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_passes_result_through() {
        let v = bounded("noop", Duration::from_secs(1), async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(v, 7);
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: Result<()> = bounded("sleepy", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(
            result,
            Err(Error::Timeout {
                operation: "sleepy",
                ..
            })
        ));
    }
}
