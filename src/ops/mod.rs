//! high-level operations: loading a skill and deploying it

mod deploy;
mod load;

pub use deploy::{Deployer, Stage};
pub use load::load_skill_dir;
