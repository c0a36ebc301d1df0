//! Shared data models used across the core and by the CLI.
//!
//! Everything here is a fresh projection over live repository state; nothing
//! is persisted between invocations.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Branches
// ---------------------------------------------------------------------------

/// Projection of one branch relative to the integration branch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BranchInfo {
    /// Short branch name (without `refs/heads/` or the remote prefix).
    pub name: String,
    /// `true` for remote-tracking branches.
    pub is_remote: bool,
    /// Committer date of the tip, or `None` when it could not be read.
    pub last_commit_date: Option<NaiveDate>,
    /// Upstream ref for local branches, e.g. `origin/feature/x`.
    pub tracking: Option<String>,
    /// Tip is reachable from the integration branch.
    pub is_merged: bool,
    /// This is the configured integration branch.
    pub is_main: bool,
}

impl BranchInfo {
    /// Ref name usable with the engine (`origin/<name>` for remote branches).
    pub fn ref_name(&self, remote: &str) -> String {
        if self.is_remote {
            format!("{}/{}", remote, self.name)
        } else {
            self.name.clone()
        }
    }

    /// Date for display; `"unknown"` when the tip date could not be read.
    pub fn last_commit_label(&self) -> String {
        self.last_commit_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

// ---------------------------------------------------------------------------
// Divergence
// ---------------------------------------------------------------------------

/// Commits unique to each side of a branch pair, counted from their lowest
/// common ancestor.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Divergence {
    /// Reachable from the subject branch but not the target.
    pub ahead: usize,
    /// Reachable from the target but not the subject branch.
    pub behind: usize,
}

impl Divergence {
    pub fn new(ahead: usize, behind: usize) -> Self {
        Self { ahead, behind }
    }

    /// The same pair seen from the other branch.
    pub fn swapped(self) -> Self {
        Self {
            ahead: self.behind,
            behind: self.ahead,
        }
    }

    pub fn is_identical(self) -> bool {
        self.ahead == 0 && self.behind == 0
    }
}

// ---------------------------------------------------------------------------
// Status summaries
// ---------------------------------------------------------------------------

/// Result of `SyncManager::check_sync_status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncStatus {
    pub branch: String,
    pub target: String,
    pub is_synced: bool,
    pub ahead: usize,
    pub behind: usize,
    pub message: String,
}

/// Result of `BranchManager::branch_status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BranchStatus {
    pub name: String,
    pub is_main: bool,
    pub is_merged: bool,
    pub last_commit_date: Option<NaiveDate>,
    pub tracking: Option<String>,
    pub ahead: usize,
    pub behind: usize,
}

/// Result of `BranchManager::clean_merged_branches`. Failures are collected,
/// never raised.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleanupReport {
    /// Ref names that were deleted (`origin/<name>` for remote deletions).
    pub cleaned: Vec<String>,
    /// Ref names that could not be deleted, with the reason.
    pub failed: Vec<CleanupFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleanupFailure {
    pub branch: String,
    pub reason: String,
}
