//! Kernel build job management
//!
//! Handles everything tied to a single kernel compile on this host:
//! - Build identifiers (time-ordered, second resolution)
//! - Repository working directories (content-addressed by URL)
//! - The build job itself (compile, monitor, artifact handoff)

pub mod build_id;
pub mod job;
pub mod repo;

pub use build_id::{new_build_id, BuildId};
pub use job::{BuildJob, JobPaths};
pub use repo::{check_free_space, repo_dir_name, work_dir_for};
