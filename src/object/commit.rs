use std::time::Duration;

use crate::error::Result;
use crate::hash::ObjectId;
use crate::transport::{bounded, RemoteStore};
use crate::types::{CommitSpec, RepoFullName};

/// trailer identifying where a commit came from
pub const COMMIT_TRAILER: &str = "Deployed-by: skillpush";

/// deterministic commit message for a deployment
pub fn commit_message(name: &str, description: Option<&str>) -> String {
    let mut message = format!("Deploy skill \"{}\"\n\n", name);
    if let Some(description) = description.map(str::trim).filter(|d| !d.is_empty()) {
        message.push_str(description);
        message.push_str("\n\n");
    }
    message.push_str(COMMIT_TRAILER);
    message.push('\n');
    message
}

/// create the deployment's single commit
pub async fn write_commit(
    store: &dyn RemoteStore,
    repo: &RepoFullName,
    spec: &CommitSpec,
    timeout: Duration,
) -> Result<ObjectId> {
    let id = bounded("create_commit", timeout, store.create_commit(repo, spec)).await?;
    tracing::debug!(
        commit = %id.short(),
        parent = spec.parent.as_ref().map(|p| p.short()).unwrap_or("none"),
        "commit written"
    );
    Ok(id)
}
