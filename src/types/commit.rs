use crate::hash::ObjectId;

/// a commit creation request
///
/// merge commits are never produced, so there is at most one parent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitSpec {
    /// root tree
    pub tree: ObjectId,
    /// previous branch tip, absent for a root commit
    pub parent: Option<ObjectId>,
    pub message: String,
}

impl CommitSpec {
    pub fn new(tree: ObjectId, parent: Option<ObjectId>, message: impl Into<String>) -> Self {
        Self {
            tree,
            parent,
            message: message.into(),
        }
    }

    /// is this the first commit of a history
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}
