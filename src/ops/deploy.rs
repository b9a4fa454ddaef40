use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::hash::ObjectId;
use crate::object::{commit_message, compose_tree, plan_tree, write_blobs, write_commit};
use crate::refs::{validate_branch_name, RefMover};
use crate::transport::{bounded, RemoteStore, RepositoryInfo};
use crate::types::{
    validate_repo_segment, CommitSpec, Deployment, DeploymentResult, DeploymentTarget, FileEntry,
    FileSet, RelativePath, RepoFullName, Visibility,
};

/// orchestrator stages, in the order they can run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Validate,
    CheckNameAvailable,
    CreateRepository,
    ResolveDefaultBranch,
    ReadBranchTip,
    ReadBaseTree,
    WriteBlobs,
    ComposeTree,
    WriteCommit,
    CreateRef,
    UpdateRef,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validate => "validate",
            Stage::CheckNameAvailable => "check_name_available",
            Stage::CreateRepository => "create_repository",
            Stage::ResolveDefaultBranch => "resolve_default_branch",
            Stage::ReadBranchTip => "read_branch_tip",
            Stage::ReadBaseTree => "read_base_tree",
            Stage::WriteBlobs => "write_blobs",
            Stage::ComposeTree => "compose_tree",
            Stage::WriteCommit => "write_commit",
            Stage::CreateRef => "create_ref",
            Stage::UpdateRef => "update_ref",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// everything the shared stages need once the target is resolved
struct Prepared {
    repo: RepositoryInfo,
    branch: String,
    /// directory the files go under, if any
    prefix: Option<RelativePath>,
    /// tree of the current tip, for a layered update
    base_tree: Option<ObjectId>,
    /// current tip; `None` means root commit and ref creation
    parent: Option<ObjectId>,
    location: String,
}

/// publishes skill file sets as single atomic commits
pub struct Deployer {
    store: Arc<dyn RemoteStore>,
    config: Config,
}

impl Deployer {
    pub fn new(store: Arc<dyn RemoteStore>, config: Config) -> Self {
        Self { store, config }
    }

    fn timeout(&self) -> Duration {
        self.config.request_timeout()
    }

    /// validate raw entries, then deploy them
    ///
    /// an invalid submission (empty, duplicate or malformed paths) fails
    /// before any remote call.
    pub async fn deploy_entries(
        &self,
        name: &str,
        description: Option<&str>,
        entries: Vec<FileEntry>,
        target: DeploymentTarget,
    ) -> DeploymentResult {
        let files = match FileSet::new(entries) {
            Ok(files) => files,
            Err(e) => {
                warn!(skill = name, error = %e, "submission rejected");
                return DeploymentResult::failed(&e);
            }
        };
        let mut deployment = Deployment::new(name, files, target);
        deployment.description = description.map(str::to_string);
        self.deploy(&deployment).await
    }

    /// run one deployment attempt
    ///
    /// never fails: every error is folded into the returned result.
    #[tracing::instrument(
        skip_all,
        fields(
            attempt = %uuid::Uuid::new_v4(),
            skill = %deployment.name,
            target = %deployment.target.describe(),
        )
    )]
    pub async fn deploy(&self, deployment: &Deployment) -> DeploymentResult {
        let mut stage = Stage::Validate;
        match self.run(deployment, &mut stage).await {
            Ok((location, commit)) => {
                info!(%location, commit = %commit.short(), "deployment done");
                DeploymentResult::succeeded(location, commit)
            }
            Err(e) => {
                warn!(%stage, kind = ?e.kind(), error = %e, "deployment failed");
                DeploymentResult::failed(&e)
            }
        }
    }

    async fn run(&self, deployment: &Deployment, stage: &mut Stage) -> Result<(String, ObjectId)> {
        let unit_dir = deployment.unit_dir()?;
        if let DeploymentTarget::NewRepository { name, .. } = &deployment.target {
            validate_repo_segment(name)?;
            // existing repositories use the host's default branch instead
            validate_branch_name(&self.config.deploy.default_branch)?;
        }

        let prepared = match &deployment.target {
            DeploymentTarget::NewRepository { name, visibility } => {
                self.prepare_new(name, *visibility, deployment.description.as_deref(), stage)
                    .await?
            }
            DeploymentTarget::ExistingRepository { full_name, .. } => {
                // unit_dir is always set for existing targets
                let prefix = unit_dir.ok_or_else(|| {
                    Error::InvalidName(format!("no directory for {}", deployment.name))
                })?;
                self.prepare_existing(full_name, prefix, stage).await?
            }
        };

        let store = self.store.as_ref();
        let repo = &prepared.repo.full_name;
        let timeout = self.timeout();

        *stage = Stage::WriteBlobs;
        let blobs = write_blobs(store, repo, &deployment.files, timeout).await?;
        info!(count = blobs.len(), bytes = deployment.files.total_bytes(), "blobs written");

        *stage = Stage::ComposeTree;
        let spec = plan_tree(
            &deployment.files,
            &blobs,
            prepared.prefix.as_ref(),
            prepared.base_tree.clone(),
        );
        let tree = compose_tree(store, repo, &spec, timeout).await?;

        *stage = Stage::WriteCommit;
        let message = commit_message(&deployment.name, deployment.description.as_deref());
        let commit_spec = CommitSpec::new(tree, prepared.parent.clone(), message);
        let commit = write_commit(store, repo, &commit_spec, timeout).await?;

        let mut mover = match &prepared.parent {
            None => {
                *stage = Stage::CreateRef;
                RefMover::create(repo.clone(), &prepared.branch)?
            }
            Some(tip) => {
                *stage = Stage::UpdateRef;
                RefMover::advance(repo.clone(), &prepared.branch, tip.clone())?
            }
        };
        mover.apply(store, &commit, timeout).await?;

        *stage = Stage::Done;
        Ok((prepared.location, commit))
    }

    /// CheckNameAvailable -> CreateRepository
    async fn prepare_new(
        &self,
        name: &str,
        visibility: Visibility,
        description: Option<&str>,
        stage: &mut Stage,
    ) -> Result<Prepared> {
        let store = self.store.as_ref();
        let timeout = self.timeout();

        *stage = Stage::CheckNameAvailable;
        let owner = bounded("authenticated_owner", timeout, store.authenticated_owner()).await?;
        let full_name = RepoFullName::new(&owner, name)?;
        // advisory only: a racing creator is still caught by create_repository
        // and by the ref creation that follows
        if bounded("repository", timeout, store.repository(&full_name))
            .await?
            .is_some()
        {
            return Err(Error::NameConflict(full_name.to_string()));
        }

        *stage = Stage::CreateRepository;
        let repo = bounded(
            "create_repository",
            timeout,
            store.create_repository(name, visibility, description),
        )
        .await?;
        info!(repo = %repo.full_name, ?visibility, "repository created");

        let location = repo.html_url.clone();
        Ok(Prepared {
            repo,
            branch: self.config.deploy.default_branch.clone(),
            prefix: None,
            base_tree: None,
            parent: None,
            location,
        })
    }

    /// ResolveDefaultBranch -> ReadBranchTip -> ReadBaseTree
    async fn prepare_existing(
        &self,
        full_name: &RepoFullName,
        prefix: RelativePath,
        stage: &mut Stage,
    ) -> Result<Prepared> {
        let store = self.store.as_ref();
        let timeout = self.timeout();

        *stage = Stage::ResolveDefaultBranch;
        let repo = bounded("repository", timeout, store.repository(full_name))
            .await?
            .ok_or_else(|| Error::RepositoryNotFound(full_name.to_string()))?;
        let branch = repo.default_branch.clone();
        validate_branch_name(&branch)?;

        *stage = Stage::ReadBranchTip;
        let tip = bounded("read_ref", timeout, store.read_ref(full_name, &branch)).await?;

        let base_tree = match &tip {
            Some(tip) => {
                *stage = Stage::ReadBaseTree;
                Some(bounded("commit_tree", timeout, store.commit_tree(full_name, tip)).await?)
            }
            None => {
                info!(repo = %full_name, %branch, "branch has no commits, writing a full snapshot");
                None
            }
        };

        let location = format!(
            "{}/tree/{}/{}",
            repo.html_url.trim_end_matches('/'),
            branch,
            prefix
        );
        Ok(Prepared {
            repo,
            branch,
            prefix: Some(prefix),
            base_tree,
            parent: tip,
            location,
        })
    }
}
