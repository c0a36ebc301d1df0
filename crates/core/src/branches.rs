//! Branch listing, status and merged-branch cleanup.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::config::BranchwiseConfig;
use crate::errors::{ErrorKind, WorkflowError};
use crate::git::RepositoryGateway;
use crate::hooks::{HookPoint, HookRegistry};
use crate::models::{BranchInfo, BranchStatus, CleanupFailure, CleanupReport};

/// Enumerates branches and removes the ones already merged.
#[derive(Debug, Clone)]
pub struct BranchManager {
    gateway: RepositoryGateway,
    main_branch: String,
    exclude_branches: Vec<String>,
    age_threshold: u32,
    hooks: Option<Arc<HookRegistry>>,
}

impl BranchManager {
    pub fn new(gateway: RepositoryGateway, config: &BranchwiseConfig) -> Self {
        Self {
            gateway,
            main_branch: config.general.main_branch.clone(),
            exclude_branches: config.clean.exclude_branches.clone(),
            age_threshold: config.clean.age_threshold,
            hooks: None,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn main_branch(&self) -> &str {
        &self.main_branch
    }

    pub fn current_branch(&self) -> Result<String, WorkflowError> {
        self.gateway.current_branch()
    }

    /// Local branches, plus remote-tracking branches with no local
    /// counterpart when `include_remote` is set.
    #[instrument(skip(self), fields(component = "branches"))]
    pub fn list_branches(&self, include_remote: bool) -> Result<Vec<BranchInfo>, WorkflowError> {
        let local = self.gateway.list_local_branches()?;
        let mut branches: Vec<BranchInfo> =
            local.iter().map(|name| self.branch_info(name, false)).collect();

        if include_remote {
            let known: BTreeSet<&str> = local.iter().map(String::as_str).collect();
            for name in self.gateway.list_remote_branches()? {
                if !known.contains(name.as_str()) {
                    branches.push(self.branch_info(&name, true));
                }
            }
        }

        debug!(count = branches.len(), "listed branches");
        Ok(branches)
    }

    /// Build the projection for one branch. Lookups that fail degrade to
    /// "unknown"/"not merged" rather than failing the listing.
    fn branch_info(&self, name: &str, is_remote: bool) -> BranchInfo {
        let mut info = BranchInfo {
            name: name.to_string(),
            is_remote,
            last_commit_date: None,
            tracking: None,
            is_merged: false,
            is_main: name == self.main_branch,
        };
        let ref_name = info.ref_name(self.gateway.remote());

        info.last_commit_date = self
            .gateway
            .last_commit_date(&ref_name)
            .unwrap_or_else(|e| {
                warn!(branch = %ref_name, error = %e, "could not read last commit date");
                None
            });
        if !is_remote {
            info.tracking = self.gateway.tracking_branch(name).ok().flatten();
        }
        info.is_merged = self
            .gateway
            .is_merged(&ref_name, &self.merge_base_ref(is_remote))
            .unwrap_or_else(|e| {
                warn!(branch = %ref_name, error = %e, "could not determine merge status");
                false
            });

        info
    }

    /// Remote branches are judged against the remote's copy of the
    /// integration branch when there is one.
    fn merge_base_ref(&self, is_remote: bool) -> String {
        if is_remote {
            let remote_main = format!("{}/{}", self.gateway.remote(), self.main_branch);
            if self.gateway.resolve(&remote_main).is_ok() {
                return remote_main;
            }
        }
        self.main_branch.clone()
    }

    /// Status of `branch` relative to the integration branch.
    pub fn branch_status(&self, branch: Option<&str>) -> Result<BranchStatus, WorkflowError> {
        let name = match branch {
            Some(name) => name.to_string(),
            None => self.current_branch()?,
        };
        if !self.gateway.list_local_branches()?.contains(&name) {
            return Err(WorkflowError::new(
                ErrorKind::MissingBranch,
                format!("branch '{}' does not exist", name),
            ));
        }

        let info = self.branch_info(&name, false);
        let divergence = self.gateway.divergence(&name, &self.main_branch)?;
        Ok(BranchStatus {
            name,
            is_main: info.is_main,
            is_merged: info.is_merged,
            last_commit_date: info.last_commit_date,
            tracking: info.tracking,
            ahead: divergence.ahead,
            behind: divergence.behind,
        })
    }

    /// Branches already merged into the integration branch.
    ///
    /// The integration branch itself and every excluded name (default:
    /// `clean.exclude_branches`) are left out, as are branches whose last
    /// commit is not older than `clean.age_threshold` days. Branches with an
    /// unreadable date are kept in the result.
    #[instrument(skip(self, excluded), fields(component = "branches"))]
    pub fn find_merged_branches(
        &self,
        include_remote: bool,
        excluded: Option<&[String]>,
    ) -> Result<Vec<BranchInfo>, WorkflowError> {
        let excluded = excluded.unwrap_or(&self.exclude_branches);
        let today = Utc::now().date_naive();

        let merged: Vec<BranchInfo> = self
            .list_branches(include_remote)?
            .into_iter()
            .filter(|b| b.is_merged && !b.is_main && b.name != self.main_branch)
            .filter(|b| !excluded.contains(&b.name))
            .filter(|b| match (self.age_threshold, b.last_commit_date) {
                (0, _) | (_, None) => true,
                (threshold, Some(date)) => (today - date).num_days() > i64::from(threshold),
            })
            .collect();

        info!(count = merged.len(), "found merged branches");
        Ok(merged)
    }

    /// Delete `branches`. Local and remote deletions are independent, and
    /// every failure is collected in the report instead of being raised.
    /// Remote deletions only happen with `include_remote`; without it a
    /// remote-only branch is reported as a failure and left in place.
    #[instrument(skip(self, branches), fields(component = "branches", count = branches.len()))]
    pub fn clean_merged_branches(&self, branches: &[BranchInfo], include_remote: bool) -> CleanupReport {
        let mut report = CleanupReport::default();
        let selected = self.pre_clean_selection(branches);

        for branch in branches.iter().filter(|b| selected.contains(b.name.as_str())) {
            if branch.name == self.main_branch || self.exclude_branches.contains(&branch.name) {
                warn!(branch = %branch.name, "refusing to delete protected branch");
                report.failed.push(CleanupFailure {
                    branch: branch.name.clone(),
                    reason: format!("{}: excluded from cleanup", ErrorKind::ProtectedBranch),
                });
                continue;
            }
            if !branch.is_merged {
                report.failed.push(CleanupFailure {
                    branch: branch.name.clone(),
                    reason: format!("not merged into '{}'", self.main_branch),
                });
                continue;
            }

            if branch.is_remote {
                let remote = self.gateway.remote().to_string();
                if include_remote {
                    self.delete_remote(&remote, &branch.name, &mut report);
                } else {
                    debug!(branch = %branch.name, "remote-only branch left in place");
                    report.failed.push(CleanupFailure {
                        branch: branch.ref_name(&remote),
                        reason: "remote deletion not requested".to_string(),
                    });
                }
                continue;
            }

            match self.gateway.delete_local_branch(&branch.name, true) {
                Ok(()) => report.cleaned.push(branch.name.clone()),
                Err(e) => {
                    warn!(branch = %branch.name, error = %e, "local deletion failed");
                    report.failed.push(CleanupFailure {
                        branch: branch.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }

            if include_remote {
                if let Some((remote, name)) = branch.tracking.as_deref().and_then(|t| t.split_once('/')) {
                    self.delete_remote(remote, name, &mut report);
                }
            }
        }

        info!(
            cleaned = report.cleaned.len(),
            failed = report.failed.len(),
            "branch cleanup finished"
        );
        if let Some(hooks) = &self.hooks {
            if let Ok(payload) = serde_json::to_value(&report) {
                hooks.run(HookPoint::PostBranchClean, &payload);
            }
        }
        report
    }

    fn delete_remote(&self, remote: &str, name: &str, report: &mut CleanupReport) {
        let label = format!("{}/{}", remote, name);
        match self.gateway.delete_remote_branch(remote, name) {
            Ok(()) => report.cleaned.push(label),
            Err(e) => {
                warn!(branch = %label, error = %e, "remote deletion failed");
                report.failed.push(CleanupFailure {
                    branch: label,
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Names to clean after the `PreBranchClean` hooks had their say.
    fn pre_clean_selection<'a>(&self, branches: &'a [BranchInfo]) -> BTreeSet<&'a str> {
        let all: BTreeSet<&str> = branches.iter().map(|b| b.name.as_str()).collect();
        let Some(hooks) = &self.hooks else {
            return all;
        };

        let payload = json!({ "branches": all.iter().collect::<Vec<_>>() });
        match hooks.run(HookPoint::PreBranchClean, &payload) {
            None => all,
            Some(Value::Array(items)) => {
                let keep: BTreeSet<&str> = items.iter().filter_map(Value::as_str).collect();
                all.into_iter().filter(|name| keep.contains(name)).collect()
            }
            Some(other) => {
                warn!(result = %other, "ignoring malformed pre_branch_clean hook result");
                all
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn info(name: &str, merged: bool) -> BranchInfo {
        BranchInfo {
            name: name.into(),
            is_remote: false,
            last_commit_date: NaiveDate::from_ymd_opt(2020, 1, 1),
            tracking: None,
            is_merged: merged,
            is_main: name == "main",
        }
    }

    fn manager_with(hooks: Option<HookRegistry>) -> (tempfile::TempDir, BranchManager) {
        let dir = tempfile::tempdir().unwrap();
        git2::Repository::init(dir.path()).unwrap();
        let gw = RepositoryGateway::open(dir.path()).unwrap();
        let mut manager = BranchManager::new(gw, &BranchwiseConfig::default());
        if let Some(hooks) = hooks {
            manager = manager.with_hooks(Arc::new(hooks));
        }
        (dir, manager)
    }

    #[test]
    fn test_protected_and_unmerged_are_refused() {
        let (_dir, manager) = manager_with(None);
        let report = manager.clean_merged_branches(
            &[info("main", true), info("develop", true), info("wip", false)],
            false,
        );
        assert!(report.cleaned.is_empty());
        assert_eq!(report.failed.len(), 3);
        assert!(report.failed[0].reason.starts_with("protected-branch"));
        assert!(report.failed[1].reason.starts_with("protected-branch"));
        assert!(report.failed[2].reason.contains("not merged"));
    }

    #[test]
    fn test_pre_clean_hook_narrows_selection() {
        let mut hooks = HookRegistry::new();
        hooks.register(HookPoint::PreBranchClean, |_| Some(json!(["main"])));
        let (_dir, manager) = manager_with(Some(hooks));

        // Only "main" survives the hook, and it is protected.
        let report =
            manager.clean_merged_branches(&[info("main", true), info("old", true)], false);
        assert!(report.cleaned.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].branch, "main");
    }

    #[test]
    fn test_remote_only_branch_needs_include_remote() {
        let (_dir, manager) = manager_with(None);
        let mut remote = info("old-remote", true);
        remote.is_remote = true;

        let report = manager.clean_merged_branches(&[remote], false);
        assert!(report.cleaned.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].branch, "origin/old-remote");
        assert_eq!(report.failed[0].reason, "remote deletion not requested");
    }
}
