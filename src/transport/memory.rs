//! in-process remote store
//!
//! mirrors the host's object API closely enough to exercise the deployment
//! core without a network: content addresses, layered trees, root and child
//! commits, create-only and compare-and-swap ref writes. also records call
//! counts and can inject failures, latency and ref-update rendezvous.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Barrier;

use crate::error::{Error, Result};
use crate::hash::{compute_blob_id, compute_object_id, ObjectId, ObjectKind};
use crate::transport::{RemoteStore, RepositoryInfo};
use crate::types::{CommitSpec, FileMode, RepoFullName, TreeSpec, Visibility};

/// a stored tree entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredEntry {
    pub mode: FileMode,
    pub id: ObjectId,
}

/// a stored commit
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredCommit {
    pub tree: ObjectId,
    pub parent: Option<ObjectId>,
    pub message: String,
}

/// counts of calls made against the store
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// every trait call, reads included
    pub calls: usize,
    pub repos_created: usize,
    pub blobs_written: usize,
    pub trees_written: usize,
    pub commits_written: usize,
    pub refs_written: usize,
}

impl StoreStats {
    /// object and ref writes, repository creation excluded
    pub fn object_writes(&self) -> usize {
        self.blobs_written + self.trees_written + self.commits_written + self.refs_written
    }
}

struct RepoState {
    info: RepositoryInfo,
    private: bool,
    blobs: HashMap<ObjectId, Vec<u8>>,
    trees: HashMap<ObjectId, BTreeMap<String, StoredEntry>>,
    commits: HashMap<ObjectId, StoredCommit>,
    refs: HashMap<String, ObjectId>,
}

impl RepoState {
    fn new(info: RepositoryInfo, private: bool) -> Self {
        Self {
            info,
            private,
            blobs: HashMap::new(),
            trees: HashMap::new(),
            commits: HashMap::new(),
            refs: HashMap::new(),
        }
    }
}

#[derive(Default)]
struct State {
    repos: HashMap<RepoFullName, RepoState>,
    stats: StoreStats,
    commit_seq: u64,
    failing_ops: HashSet<&'static str>,
    failing_blobs: HashSet<ObjectId>,
    latency: HashMap<&'static str, Duration>,
}

/// in-memory remote store
pub struct MemoryStore {
    owner: String,
    default_branch: String,
    state: Mutex<State>,
    ref_barrier: Option<Arc<Barrier>>,
}

impl MemoryStore {
    /// empty store whose authenticated account is `owner`
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            default_branch: "main".to_string(),
            state: Mutex::new(State::default()),
            ref_barrier: None,
        }
    }

    /// hold every `update_ref` until `parties` of them are waiting
    pub fn with_ref_barrier(mut self, parties: usize) -> Self {
        self.ref_barrier = Some(Arc::new(Barrier::new(parties)));
        self
    }

    /// make every call to `operation` fail with HTTP 500
    pub fn fail_operation(&self, operation: &'static str) {
        self.state.lock().failing_ops.insert(operation);
    }

    /// make blob creation fail for this exact content
    pub fn fail_blob(&self, content: &[u8]) {
        self.state.lock().failing_blobs.insert(compute_blob_id(content));
    }

    /// delay every call to `operation`
    pub fn set_latency(&self, operation: &'static str, delay: Duration) {
        self.state.lock().latency.insert(operation, delay);
    }

    pub fn stats(&self) -> StoreStats {
        self.state.lock().stats
    }

    /// create a repository with an empty history
    pub fn seed_empty_repository(&self, full_name: &RepoFullName) {
        let info = self.info_for(full_name);
        self.state
            .lock()
            .repos
            .insert(full_name.clone(), RepoState::new(info, false));
    }

    /// create a repository whose default branch holds one commit with `files`
    pub fn seed_repository(
        &self,
        full_name: &RepoFullName,
        files: &[(&str, &[u8])],
    ) -> Result<ObjectId> {
        self.seed_empty_repository(full_name);
        self.commit_files(full_name, files, "initial commit")
    }

    /// commit `files` on top of the default branch as an outside writer would
    pub fn commit_files(
        &self,
        full_name: &RepoFullName,
        files: &[(&str, &[u8])],
        message: &str,
    ) -> Result<ObjectId> {
        let mut state = self.state.lock();
        let seq = next_seq(&mut state);
        let repo = repo_mut(&mut state, full_name)?;
        let branch = repo.info.default_branch.clone();
        let parent = repo.refs.get(&branch).cloned();

        let mut entries = match &parent {
            Some(p) => repo.trees[&repo.commits[p].tree].clone(),
            None => BTreeMap::new(),
        };
        for (path, content) in files {
            let id = compute_blob_id(content);
            repo.blobs.insert(id.clone(), content.to_vec());
            entries.insert(
                path.to_string(),
                StoredEntry {
                    mode: FileMode::Regular,
                    id,
                },
            );
        }
        let tree = store_tree(repo, entries);
        let commit = store_commit(
            repo,
            StoredCommit {
                tree,
                parent,
                message: message.to_string(),
            },
            seq,
        );
        repo.refs.insert(branch, commit.clone());
        Ok(commit)
    }

    /// current target of a branch
    pub fn ref_target(&self, full_name: &RepoFullName, branch: &str) -> Option<ObjectId> {
        let state = self.state.lock();
        state.repos.get(full_name)?.refs.get(branch).cloned()
    }

    pub fn commit(&self, full_name: &RepoFullName, id: &ObjectId) -> Option<StoredCommit> {
        let state = self.state.lock();
        state.repos.get(full_name)?.commits.get(id).cloned()
    }

    pub fn tree_entries(
        &self,
        full_name: &RepoFullName,
        tree: &ObjectId,
    ) -> Option<BTreeMap<String, StoredEntry>> {
        let state = self.state.lock();
        state.repos.get(full_name)?.trees.get(tree).cloned()
    }

    /// path -> content of the tree a commit points at
    pub fn files_at(
        &self,
        full_name: &RepoFullName,
        commit: &ObjectId,
    ) -> Option<BTreeMap<String, Vec<u8>>> {
        let state = self.state.lock();
        let repo = state.repos.get(full_name)?;
        let tree = repo.trees.get(&repo.commits.get(commit)?.tree)?;
        tree.iter()
            .map(|(path, entry)| Some((path.clone(), repo.blobs.get(&entry.id)?.clone())))
            .collect()
    }

    pub fn is_private(&self, full_name: &RepoFullName) -> Option<bool> {
        self.state.lock().repos.get(full_name).map(|r| r.private)
    }

    fn info_for(&self, full_name: &RepoFullName) -> RepositoryInfo {
        RepositoryInfo {
            full_name: full_name.clone(),
            default_branch: self.default_branch.clone(),
            html_url: format!("https://git.example.test/{}", full_name),
        }
    }

    /// count the call, apply latency and injected failures
    async fn enter(&self, operation: &'static str) -> Result<()> {
        let delay = {
            let mut state = self.state.lock();
            state.stats.calls += 1;
            if state.failing_ops.contains(operation) {
                return Err(injected(operation));
            }
            state.latency.get(operation).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

fn injected(operation: &str) -> Error {
    Error::Transport {
        status: Some(500),
        message: format!("injected failure in {}", operation),
    }
}

fn unprocessable(message: String) -> Error {
    Error::Transport {
        status: Some(422),
        message,
    }
}

fn next_seq(state: &mut State) -> u64 {
    state.commit_seq += 1;
    state.commit_seq
}

fn repo_mut<'a>(state: &'a mut State, full_name: &RepoFullName) -> Result<&'a mut RepoState> {
    state.repos.get_mut(full_name).ok_or_else(|| Error::Transport {
        status: Some(404),
        message: format!("repository {} not found", full_name),
    })
}

fn store_tree(repo: &mut RepoState, entries: BTreeMap<String, StoredEntry>) -> ObjectId {
    let mut payload = Vec::new();
    for (path, entry) in &entries {
        payload.extend_from_slice(entry.mode.as_git_mode().as_bytes());
        payload.push(b' ');
        payload.extend_from_slice(path.as_bytes());
        payload.push(0);
        payload.extend_from_slice(entry.id.as_str().as_bytes());
        payload.push(b'\n');
    }
    let id = compute_object_id(ObjectKind::Tree, &payload);
    repo.trees.insert(id.clone(), entries);
    id
}

fn store_commit(repo: &mut RepoState, commit: StoredCommit, seq: u64) -> ObjectId {
    // the sequence number stands in for the commit timestamp, so
    // identical requests still yield distinct commits
    let mut payload = format!("tree {}\n", commit.tree);
    if let Some(parent) = &commit.parent {
        payload.push_str(&format!("parent {}\n", parent));
    }
    payload.push_str(&format!("seq {}\n\n{}", seq, commit.message));
    let id = compute_object_id(ObjectKind::Commit, payload.as_bytes());
    repo.commits.insert(id.clone(), commit);
    id
}

/// drop base entries that a new path shadows: the path itself, files
/// standing where one of its directories goes, and files below it
fn remove_shadowed(entries: &mut BTreeMap<String, StoredEntry>, path: &str) {
    let mut prefix = String::new();
    for segment in path.split('/') {
        if !prefix.is_empty() {
            entries.remove(&prefix);
            prefix.push('/');
        }
        prefix.push_str(segment);
    }
    let below = format!("{}/", path);
    entries.retain(|p, _| !p.starts_with(&below));
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn authenticated_owner(&self) -> Result<String> {
        self.enter("authenticated_owner").await?;
        Ok(self.owner.clone())
    }

    async fn repository(&self, full_name: &RepoFullName) -> Result<Option<RepositoryInfo>> {
        self.enter("repository").await?;
        let state = self.state.lock();
        Ok(state.repos.get(full_name).map(|r| r.info.clone()))
    }

    async fn create_repository(
        &self,
        name: &str,
        visibility: Visibility,
        _description: Option<&str>,
    ) -> Result<RepositoryInfo> {
        self.enter("create_repository").await?;
        let full_name = RepoFullName::new(&self.owner, name)?;
        let info = self.info_for(&full_name);
        let mut state = self.state.lock();
        if state.repos.contains_key(&full_name) {
            return Err(Error::NameConflict(full_name.to_string()));
        }
        state.repos.insert(
            full_name,
            RepoState::new(info.clone(), visibility.is_private()),
        );
        state.stats.repos_created += 1;
        Ok(info)
    }

    async fn read_ref(&self, repo: &RepoFullName, branch: &str) -> Result<Option<ObjectId>> {
        self.enter("read_ref").await?;
        let mut state = self.state.lock();
        Ok(repo_mut(&mut state, repo)?.refs.get(branch).cloned())
    }

    async fn commit_tree(&self, repo: &RepoFullName, commit: &ObjectId) -> Result<ObjectId> {
        self.enter("commit_tree").await?;
        let mut state = self.state.lock();
        let repo = repo_mut(&mut state, repo)?;
        repo.commits
            .get(commit)
            .map(|c| c.tree.clone())
            .ok_or_else(|| Error::Transport {
                status: Some(404),
                message: format!("commit {} not found", commit),
            })
    }

    async fn create_blob(&self, repo: &RepoFullName, content: &[u8]) -> Result<ObjectId> {
        self.enter("create_blob").await?;
        let id = compute_blob_id(content);
        let mut state = self.state.lock();
        if state.failing_blobs.contains(&id) {
            return Err(injected("create_blob"));
        }
        repo_mut(&mut state, repo)?
            .blobs
            .insert(id.clone(), content.to_vec());
        state.stats.blobs_written += 1;
        Ok(id)
    }

    async fn create_tree(&self, repo: &RepoFullName, spec: &TreeSpec) -> Result<ObjectId> {
        self.enter("create_tree").await?;
        let mut state = self.state.lock();
        let repo = repo_mut(&mut state, repo)?;

        let mut entries = match &spec.base {
            Some(base) => repo
                .trees
                .get(base)
                .cloned()
                .ok_or_else(|| unprocessable(format!("base tree {} not found", base)))?,
            None => BTreeMap::new(),
        };
        for entry in &spec.entries {
            if !repo.blobs.contains_key(&entry.id) {
                return Err(unprocessable(format!("blob {} not found", entry.id)));
            }
            remove_shadowed(&mut entries, entry.path.as_str());
            entries.insert(
                entry.path.to_string(),
                StoredEntry {
                    mode: entry.mode,
                    id: entry.id.clone(),
                },
            );
        }

        let id = store_tree(repo, entries);
        state.stats.trees_written += 1;
        Ok(id)
    }

    async fn create_commit(&self, repo: &RepoFullName, spec: &CommitSpec) -> Result<ObjectId> {
        self.enter("create_commit").await?;
        let mut state = self.state.lock();
        let seq = next_seq(&mut state);
        let repo = repo_mut(&mut state, repo)?;
        if !repo.trees.contains_key(&spec.tree) {
            return Err(unprocessable(format!("tree {} not found", spec.tree)));
        }
        if let Some(parent) = &spec.parent {
            if !repo.commits.contains_key(parent) {
                return Err(unprocessable(format!("parent {} not found", parent)));
            }
        }
        let id = store_commit(
            repo,
            StoredCommit {
                tree: spec.tree.clone(),
                parent: spec.parent.clone(),
                message: spec.message.clone(),
            },
            seq,
        );
        state.stats.commits_written += 1;
        Ok(id)
    }

    async fn create_ref(
        &self,
        repo: &RepoFullName,
        branch: &str,
        target: &ObjectId,
    ) -> Result<()> {
        self.enter("create_ref").await?;
        let mut state = self.state.lock();
        let repo = repo_mut(&mut state, repo)?;
        if repo.refs.contains_key(branch) {
            return Err(Error::RefAlreadyExists {
                branch: branch.to_string(),
            });
        }
        if !repo.commits.contains_key(target) {
            return Err(unprocessable(format!("commit {} not found", target)));
        }
        repo.refs.insert(branch.to_string(), target.clone());
        state.stats.refs_written += 1;
        Ok(())
    }

    async fn update_ref(
        &self,
        repo: &RepoFullName,
        branch: &str,
        target: &ObjectId,
        expected: &ObjectId,
    ) -> Result<()> {
        self.enter("update_ref").await?;
        if let Some(barrier) = &self.ref_barrier {
            barrier.wait().await;
        }
        let mut state = self.state.lock();
        let repo = repo_mut(&mut state, repo)?;
        if !repo.commits.contains_key(target) {
            return Err(unprocessable(format!("commit {} not found", target)));
        }
        match repo.refs.get(branch) {
            None => {
                return Err(unprocessable(format!("reference {} does not exist", branch)));
            }
            Some(current) if current != expected => {
                return Err(Error::FastForwardConflict {
                    branch: branch.to_string(),
                    expected: expected.clone(),
                });
            }
            Some(_) => {}
        }
        repo.refs.insert(branch.to_string(), target.clone());
        state.stats.refs_written += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RelativePath, TreeEntry};

    fn hub() -> RepoFullName {
        "user/hub".parse().unwrap()
    }

    fn entry(path: &str, id: ObjectId) -> TreeEntry {
        TreeEntry::new(RelativePath::parse(path).unwrap(), FileMode::Regular, id)
    }

    #[tokio::test]
    async fn test_blob_addresses_dedupe() {
        let store = MemoryStore::new("user");
        store.seed_empty_repository(&hub());

        let a = store.create_blob(&hub(), b"same").await.unwrap();
        let b = store.create_blob(&hub(), b"same").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.stats().blobs_written, 2);
    }

    #[tokio::test]
    async fn test_layered_tree_keeps_base() {
        let store = MemoryStore::new("user");
        let tip = store.seed_repository(&hub(), &[("README.md", b"readme"), ("x/old", b"old")]).unwrap();
        let base = store.commit_tree(&hub(), &tip).await.unwrap();

        let blob = store.create_blob(&hub(), b"new").await.unwrap();
        let spec = TreeSpec::layered(base, vec![entry("x/old", blob.clone()), entry("y", blob)]);
        let tree = store.create_tree(&hub(), &spec).await.unwrap();

        let entries = store.tree_entries(&hub(), &tree).unwrap();
        let paths: Vec<_> = entries.keys().cloned().collect();
        assert_eq!(paths, vec!["README.md", "x/old", "y"]);
    }

    #[tokio::test]
    async fn test_layered_tree_replaces_shadowed_file() {
        let store = MemoryStore::new("user");
        let tip = store.seed_repository(&hub(), &[("skills", b"was a file")]).unwrap();
        let base = store.commit_tree(&hub(), &tip).await.unwrap();

        let blob = store.create_blob(&hub(), b"doc").await.unwrap();
        let spec = TreeSpec::layered(base, vec![entry("skills/demo/SKILL.md", blob)]);
        let tree = store.create_tree(&hub(), &spec).await.unwrap();

        let entries = store.tree_entries(&hub(), &tree).unwrap();
        assert!(!entries.contains_key("skills"));
        assert!(entries.contains_key("skills/demo/SKILL.md"));
    }

    #[tokio::test]
    async fn test_tree_rejects_unknown_blob() {
        let store = MemoryStore::new("user");
        store.seed_empty_repository(&hub());
        let spec = TreeSpec::snapshot(vec![entry("a", compute_blob_id(b"never written"))]);
        let result = store.create_tree(&hub(), &spec).await;
        assert!(matches!(result, Err(Error::Transport { status: Some(422), .. })));
    }

    #[tokio::test]
    async fn test_identical_commits_are_distinct() {
        let store = MemoryStore::new("user");
        store.seed_empty_repository(&hub());
        let blob = store.create_blob(&hub(), b"a").await.unwrap();
        let tree = store
            .create_tree(&hub(), &TreeSpec::snapshot(vec![entry("a", blob)]))
            .await
            .unwrap();
        let spec = CommitSpec::new(tree, None, "same message");
        let c1 = store.create_commit(&hub(), &spec).await.unwrap();
        let c2 = store.create_commit(&hub(), &spec).await.unwrap();
        assert_ne!(c1, c2);
    }

    #[tokio::test]
    async fn test_create_ref_conflicts_when_present() {
        let store = MemoryStore::new("user");
        let tip = store.seed_repository(&hub(), &[("a", b"a")]).unwrap();
        let result = store.create_ref(&hub(), "main", &tip).await;
        assert!(matches!(result, Err(Error::RefAlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_update_ref_compare_and_swap() {
        let store = MemoryStore::new("user");
        let first = store.seed_repository(&hub(), &[("a", b"a")]).unwrap();
        let second = store.commit_files(&hub(), &[("b", b"b")], "outside writer").unwrap();

        // stale expectation is rejected and the branch is untouched
        let result = store.update_ref(&hub(), "main", &first, &first).await;
        assert!(matches!(result, Err(Error::FastForwardConflict { .. })));
        assert_eq!(store.ref_target(&hub(), "main"), Some(second.clone()));

        store.update_ref(&hub(), "main", &first, &second).await.unwrap();
        assert_eq!(store.ref_target(&hub(), "main"), Some(first));
    }

    #[tokio::test]
    async fn test_create_repository_name_conflict() {
        let store = MemoryStore::new("user");
        store
            .create_repository("demo", Visibility::Private, None)
            .await
            .unwrap();
        let full: RepoFullName = "user/demo".parse().unwrap();
        assert_eq!(store.is_private(&full), Some(true));

        let result = store.create_repository("demo", Visibility::Public, None).await;
        assert!(matches!(result, Err(Error::NameConflict(_))));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryStore::new("user");
        store.seed_empty_repository(&hub());
        store.fail_blob(b"bad");
        assert!(store.create_blob(&hub(), b"good").await.is_ok());
        assert!(store.create_blob(&hub(), b"bad").await.is_err());

        store.fail_operation("read_ref");
        let result = store.read_ref(&hub(), "main").await;
        assert!(matches!(result, Err(Error::Transport { status: Some(500), .. })));
    }

    #[test]
    fn test_remove_shadowed() {
        let mut entries = BTreeMap::new();
        let e = StoredEntry {
            mode: FileMode::Regular,
            id: compute_blob_id(b"x"),
        };
        for p in ["a", "a/b/c/d", "a/bb", "keep"] {
            entries.insert(p.to_string(), e.clone());
        }
        remove_shadowed(&mut entries, "a/b/c");
        let paths: Vec<_> = entries.keys().cloned().collect();
        assert_eq!(paths, vec!["a/bb", "keep"]);
    }
}
