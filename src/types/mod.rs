mod commit;
mod file;
mod result;
mod target;
mod tree;

pub use commit::CommitSpec;
pub use file::{FileEntry, FileMode, FileSet, RelativePath};
pub use result::DeploymentResult;
pub use target::{
    slugify, validate_repo_segment, Deployment, DeploymentTarget, RepoFullName, Visibility,
};
pub use tree::{TreeEntry, TreeSpec};
