//! Branchwise core library.
//!
//! Building blocks for a Git branch-workflow assistant: repository access,
//! conflict prediction, merge-vs-rebase advice, synchronization with the
//! integration branch, merged-branch cleanup, and snapshot-based rollback.

pub mod branches;
pub mod config;
pub mod conflict;
pub mod errors;
pub mod git;
pub mod hooks;
pub mod models;
pub mod recovery;
pub mod strategy;
pub mod sync;

// Re-exports for convenience.
pub use branches::BranchManager;
pub use config::BranchwiseConfig;
pub use conflict::{ConflictDetector, ConflictReport};
pub use errors::{ErrorKind, WorkflowError};
pub use git::RepositoryGateway;
pub use hooks::{HookPoint, HookRegistry};
pub use recovery::RecoveryManager;
pub use strategy::{Strategy, StrategyAdvice, StrategyAdvisor};
pub use sync::{SyncManager, SyncOutcome, SyncState};
