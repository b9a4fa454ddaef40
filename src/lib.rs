//! skillpush - atomic skill deployment to a remote git host
//!
//! publishes a set of skill files as exactly one commit, through the host's
//! low-level object api rather than one commit per file.
//!
//! # Core concepts
//!
//! - **Blob**: file content uploaded to the host, addressed by the id it returns
//! - **Tree**: a directory snapshot, optionally layered on top of a base tree
//! - **Commit**: a tree plus at most one parent
//! - **Ref**: the branch pointer, moved last and only if it still points at
//!   the commit that was read
//!
//! a deployment either targets a brand new repository (root commit, branch
//! created) or an existing one (files placed under `<base path>/<slug>`,
//! everything else in the tree left alone, branch fast-forwarded).
//!
//! # Example usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use skillpush::{Config, Deployer, DeploymentTarget, FileEntry, Visibility};
//! use skillpush::transport::{Credential, GithubStore};
//!
//! # async fn demo() -> skillpush::Result<()> {
//! let config = Config::default();
//! let store = GithubStore::new(&config.api, Credential::new("ghp_..."))?;
//! let deployer = Deployer::new(Arc::new(store), config);
//!
//! let files = vec![FileEntry::from_str_path("SKILL.md", "# Hi")?];
//! let target = DeploymentTarget::new_repository("demo-skill", Visibility::Public);
//! let result = deployer.deploy_entries("demo-skill", None, files, target).await;
//! println!("{:?}", result.location);
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod hash;
mod object;
mod refs;

pub mod ops;
pub mod transport;
pub mod types;

pub use config::{ApiConfig, Config, DeployConfig};
pub use error::{Error, ErrorKind, Result};
pub use hash::{compute_blob_id, ObjectId, ObjectKind};
pub use object::{
    commit_message, compose_tree, plan_tree, write_blobs, write_commit, COMMIT_TRAILER,
};
pub use ops::{load_skill_dir, Deployer, Stage};
pub use refs::{validate_branch_name, RefMoveState, RefMover, RefWrite};
pub use types::{
    CommitSpec, Deployment, DeploymentResult, DeploymentTarget, FileEntry, FileMode, FileSet,
    RelativePath, RepoFullName, TreeEntry, TreeSpec, Visibility,
};
