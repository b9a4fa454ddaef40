use std::time::Duration;

use crate::error::{Error, ErrorKind, Result};
use crate::hash::ObjectId;
use crate::transport::{bounded, RemoteStore};
use crate::types::RepoFullName;

/// how the branch is written
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefWrite {
    /// the branch must not exist yet
    Create,
    /// the branch must still point at `expected`
    Advance { expected: ObjectId },
}

/// progress of a single ref move
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefMoveState {
    NotStarted,
    Attempting,
    Succeeded,
    Conflict,
    TransportFailure,
}

impl RefMoveState {
    pub fn is_finished(&self) -> bool {
        !matches!(self, RefMoveState::NotStarted | RefMoveState::Attempting)
    }
}

/// points one branch at a new commit, at most once
///
/// there is no retry or rebase: a conflict is reported and the mover is
/// spent.
#[derive(Debug)]
pub struct RefMover {
    repo: RepoFullName,
    branch: String,
    write: RefWrite,
    state: RefMoveState,
}

impl RefMover {
    /// mover that creates `branch`
    pub fn create(repo: RepoFullName, branch: &str) -> Result<Self> {
        Self::new(repo, branch, RefWrite::Create)
    }

    /// mover that advances `branch` from `expected`
    pub fn advance(repo: RepoFullName, branch: &str, expected: ObjectId) -> Result<Self> {
        Self::new(repo, branch, RefWrite::Advance { expected })
    }

    fn new(repo: RepoFullName, branch: &str, write: RefWrite) -> Result<Self> {
        validate_branch_name(branch)?;
        Ok(Self {
            repo,
            branch: branch.to_string(),
            write,
            state: RefMoveState::NotStarted,
        })
    }

    pub fn state(&self) -> RefMoveState {
        self.state
    }

    /// move the branch to `target`
    pub async fn apply(
        &mut self,
        store: &dyn RemoteStore,
        target: &ObjectId,
        timeout: Duration,
    ) -> Result<()> {
        if self.state != RefMoveState::NotStarted {
            return Err(Error::RefMoverSpent(self.branch.clone()));
        }
        self.state = RefMoveState::Attempting;

        let result = match &self.write {
            RefWrite::Create => {
                bounded(
                    "create_ref",
                    timeout,
                    store.create_ref(&self.repo, &self.branch, target),
                )
                .await
            }
            RefWrite::Advance { expected } => {
                bounded(
                    "update_ref",
                    timeout,
                    store.update_ref(&self.repo, &self.branch, target, expected),
                )
                .await
            }
        };

        self.state = match &result {
            Ok(()) => RefMoveState::Succeeded,
            Err(e) if e.kind() == ErrorKind::FastForwardConflict => RefMoveState::Conflict,
            Err(_) => RefMoveState::TransportFailure,
        };
        tracing::debug!(
            repo = %self.repo,
            branch = %self.branch,
            target = %target.short(),
            state = ?self.state,
            "ref move finished"
        );
        result
    }
}

/// validate a branch name
///
/// a conservative subset of git's check-ref-format rules.
pub fn validate_branch_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidRef("empty branch name".to_string()));
    }

    if name.starts_with('/') || name.ends_with('/') {
        return Err(Error::InvalidRef(format!(
            "branch name cannot start or end with '/': {}",
            name
        )));
    }

    if name.contains("//") || name.contains("..") || name.contains("@{") {
        return Err(Error::InvalidRef(format!(
            "branch name contains a forbidden sequence: {}",
            name
        )));
    }

    if name.ends_with('.') || name.ends_with(".lock") || name == "@" {
        return Err(Error::InvalidRef(format!("invalid branch name: {}", name)));
    }

    if let Some(c) = name
        .chars()
        .find(|c| c.is_ascii_control() || matches!(c, ' ' | '~' | '^' | ':' | '?' | '*' | '[' | '\\'))
    {
        return Err(Error::InvalidRef(format!(
            "branch name contains {:?}: {}",
            c, name
        )));
    }

    for component in name.split('/') {
        if component.starts_with('.') {
            return Err(Error::InvalidRef(format!(
                "branch name component cannot start with '.': {}",
                name
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryStore;

    const T: Duration = Duration::from_secs(5);

    fn hub() -> RepoFullName {
        "user/hub".parse().unwrap()
    }

    #[tokio::test]
    async fn test_advance_succeeds_from_expected_tip() {
        let store = MemoryStore::new("user");
        let tip = store.seed_repository(&hub(), &[("a", b"a")]).unwrap();
        let next = store.commit_files(&hub(), &[("b", b"b")], "next").unwrap();
        // rewind so `next` is a child of the observed tip
        store.update_ref(&hub(), "main", &tip, &next).await.unwrap();

        let mut mover = RefMover::advance(hub(), "main", tip).unwrap();
        assert_eq!(mover.state(), RefMoveState::NotStarted);
        mover.apply(&store, &next, T).await.unwrap();
        assert_eq!(mover.state(), RefMoveState::Succeeded);
        assert_eq!(store.ref_target(&hub(), "main"), Some(next));
    }

    #[tokio::test]
    async fn test_advance_conflicts_when_branch_moved() {
        let store = MemoryStore::new("user");
        let tip = store.seed_repository(&hub(), &[("a", b"a")]).unwrap();
        let moved = store.commit_files(&hub(), &[("b", b"b")], "someone else").unwrap();

        let mut mover = RefMover::advance(hub(), "main", tip.clone()).unwrap();
        let result = mover.apply(&store, &tip, T).await;
        assert!(matches!(result, Err(Error::FastForwardConflict { .. })));
        assert_eq!(mover.state(), RefMoveState::Conflict);
        assert!(mover.state().is_finished());
        assert_eq!(store.ref_target(&hub(), "main"), Some(moved));
    }

    #[tokio::test]
    async fn test_create_conflicts_when_branch_exists() {
        let store = MemoryStore::new("user");
        let tip = store.seed_repository(&hub(), &[("a", b"a")]).unwrap();

        let mut mover = RefMover::create(hub(), "main").unwrap();
        let result = mover.apply(&store, &tip, T).await;
        assert!(matches!(result, Err(Error::RefAlreadyExists { .. })));
        assert_eq!(mover.state(), RefMoveState::Conflict);
    }

    #[tokio::test]
    async fn test_transport_failure_state() {
        let store = MemoryStore::new("user");
        let tip = store.seed_repository(&hub(), &[("a", b"a")]).unwrap();
        store.fail_operation("update_ref");

        let mut mover = RefMover::advance(hub(), "main", tip.clone()).unwrap();
        assert!(mover.apply(&store, &tip, T).await.is_err());
        assert_eq!(mover.state(), RefMoveState::TransportFailure);
    }

    #[tokio::test]
    async fn test_mover_is_single_use() {
        let store = MemoryStore::new("user");
        store.seed_empty_repository(&hub());
        let tip = store.commit_files(&hub(), &[("a", b"a")], "seed").unwrap();

        let mut mover = RefMover::create(hub(), "release").unwrap();
        mover.apply(&store, &tip, T).await.unwrap();

        let again = mover.apply(&store, &tip, T).await;
        assert!(matches!(again, Err(Error::RefMoverSpent(_))));
        assert_eq!(mover.state(), RefMoveState::Succeeded);
        assert_eq!(store.stats().refs_written, 1);
    }

    #[test]
    fn test_invalid_branch_names() {
        assert!(validate_branch_name("").is_err());
        assert!(validate_branch_name("/main").is_err());
        assert!(validate_branch_name("main/").is_err());
        assert!(validate_branch_name("a//b").is_err());
        assert!(validate_branch_name("a..b").is_err());
        assert!(validate_branch_name("has space").is_err());
        assert!(validate_branch_name("main.lock").is_err());
        assert!(validate_branch_name("feat/.hidden").is_err());
        assert!(validate_branch_name("what?").is_err());
        assert!(validate_branch_name("@").is_err());

        assert!(validate_branch_name("main").is_ok());
        assert!(validate_branch_name("skills/deploy").is_ok());
        assert!(validate_branch_name("release-1.0").is_ok());
    }
}
