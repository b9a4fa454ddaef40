//! deployment stages that create remote objects

pub mod blob;
pub mod commit;
pub mod tree;

pub use blob::write_blobs;
pub use commit::{commit_message, write_commit, COMMIT_TRAILER};
pub use tree::{compose_tree, plan_tree};
