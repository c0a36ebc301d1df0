//! Bringing a branch up to date with the integration branch.
//!
//! [`SyncManager::sync_with_main`] walks a fixed sequence of phases:
//!
//! 1. Check divergence; a branch that is not behind is done.
//! 2. Stash local changes, failing with `DirtyWorkingTree` if that is impossible.
//! 3. Resolve the strategy (`auto` defers to the [`StrategyAdvisor`]).
//! 4. Run the conflict precheck unless forced; predicted conflicts stop here.
//! 5. Merge or rebase inside a [`RecoveryManager::safe_operation`] envelope.
//!
//! The auto-stash is queued as a recovery action, so local changes come back
//! whichever way the run ends.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, info_span, instrument, warn};

use crate::config::{BranchwiseConfig, SyncStrategy};
use crate::conflict::{ConflictDetector, ConflictReport};
use crate::errors::{ErrorKind, WorkflowError};
use crate::git::RepositoryGateway;
use crate::hooks::{HookPoint, HookRegistry};
use crate::models::SyncStatus;
use crate::recovery::{RecoveryAction, RecoveryManager};
use crate::strategy::{Strategy, StrategyAdvisor};

// ---------------------------------------------------------------------------
// Sync state machine
// ---------------------------------------------------------------------------

/// Phases of one synchronization run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Start,
    StatusCheck,
    DirtyTreeHandling,
    StrategyResolution,
    ConflictPrecheck,
    Mutation,
    Done,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::StatusCheck => write!(f, "status_check"),
            Self::DirtyTreeHandling => write!(f, "dirty_tree_handling"),
            Self::StrategyResolution => write!(f, "strategy_resolution"),
            Self::ConflictPrecheck => write!(f, "conflict_precheck"),
            Self::Mutation => write!(f, "mutation"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// How a synchronization run ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Nothing to do.
    UpToDate,
    /// The precheck predicted conflicts; nothing was changed.
    ConflictsDetected,
    /// The branch now contains the integration branch.
    Synchronized,
    /// The merge or rebase hit conflicts and was rolled back.
    ConflictOccurred,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpToDate => write!(f, "up_to_date"),
            Self::ConflictsDetected => write!(f, "conflicts_detected"),
            Self::Synchronized => write!(f, "synchronized"),
            Self::ConflictOccurred => write!(f, "conflict_occurred"),
        }
    }
}

/// Structured result of [`SyncManager::sync_with_main`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub status: SyncState,
    pub branch: String,
    pub target: String,
    /// Strategy applied or that would have been applied.
    pub strategy: Option<Strategy>,
    pub message: String,
    /// Precheck report, present when conflicts were predicted.
    pub conflicts: Option<ConflictReport>,
    /// Local changes were stashed for the run.
    pub stashed: bool,
    /// Stash id left on the stash list because re-applying it failed.
    pub pending_stash: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Keeps branches in step with the integration branch.
#[derive(Debug)]
pub struct SyncManager {
    gateway: RepositoryGateway,
    config: BranchwiseConfig,
    detector: ConflictDetector,
    advisor: StrategyAdvisor,
    recovery: RecoveryManager,
    hooks: Option<Arc<HookRegistry>>,
}

impl SyncManager {
    pub fn new(gateway: RepositoryGateway, config: &BranchwiseConfig) -> Self {
        info!(main = %config.general.main_branch, "initializing sync manager");
        Self {
            detector: ConflictDetector::new(gateway.clone(), config),
            advisor: StrategyAdvisor::new(gateway.clone(), config),
            recovery: RecoveryManager::new(gateway.clone()),
            gateway,
            config: config.clone(),
            hooks: None,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        debug!(
            pre_sync = hooks.count(HookPoint::PreSync),
            post_sync = hooks.count(HookPoint::PostSync),
            "sync hooks attached"
        );
        self.detector = self.detector.with_hooks(hooks.clone());
        self.advisor = self.advisor.with_hooks(hooks.clone());
        self.hooks = Some(hooks);
        self
    }

    fn main_branch(&self) -> &str {
        &self.config.general.main_branch
    }

    fn target_branch(&self, branch: Option<&str>) -> Result<String, WorkflowError> {
        let name = match branch {
            Some(name) => name.to_string(),
            None => self.gateway.current_branch()?,
        };
        if !self.gateway.branch_exists(&name)? {
            return Err(WorkflowError::new(
                ErrorKind::MissingBranch,
                format!("branch '{}' does not exist", name),
            ));
        }
        Ok(name)
    }

    /// Compare `branch` (default: the current branch) with the integration
    /// branch. Remote refs are refreshed first when possible; a failed fetch
    /// only logs a warning.
    #[instrument(skip(self), fields(component = "sync"))]
    pub fn check_sync_status(&self, branch: Option<&str>) -> Result<SyncStatus, WorkflowError> {
        let branch = self.target_branch(branch)?;
        let main = self.main_branch().to_string();

        if branch == main {
            return Ok(SyncStatus {
                message: format!("'{}' is the integration branch", main),
                branch,
                target: main,
                is_synced: true,
                ahead: 0,
                behind: 0,
            });
        }

        if let Err(e) = self.gateway.fetch() {
            warn!(error = %e, "fetch failed, using local refs");
        }

        let divergence = self.gateway.divergence(&branch, &main)?;
        let is_synced = divergence.behind == 0;
        let message = if divergence.is_identical() {
            format!("'{}' points at the same commit as '{}'", branch, main)
        } else if is_synced {
            format!("'{}' is up to date with '{}'", branch, main)
        } else {
            format!(
                "'{}' is {} commit(s) behind '{}'",
                branch, divergence.behind, main
            )
        };
        debug!(ahead = divergence.ahead, behind = divergence.behind, "sync status");

        Ok(SyncStatus {
            branch,
            target: main,
            is_synced,
            ahead: divergence.ahead,
            behind: divergence.behind,
            message,
        })
    }

    /// Skip the conflict precheck and synchronize straight away.
    pub fn force_sync(
        &mut self,
        branch: Option<&str>,
        strategy: Option<SyncStrategy>,
    ) -> Result<SyncOutcome, WorkflowError> {
        self.sync_with_main(branch, strategy, true)
    }

    /// Bring `branch` (default: the current branch) up to date with the
    /// integration branch.
    ///
    /// `strategy` defaults to `sync.default_strategy`. `force` skips the
    /// conflict precheck. Conflicts hit during the merge or rebase are
    /// rolled back and reported as [`SyncState::ConflictOccurred`]; any other
    /// failure is rolled back and returned as a `SyncFailure` carrying the
    /// original error.
    pub fn sync_with_main(
        &mut self,
        branch: Option<&str>,
        strategy: Option<SyncStrategy>,
        force: bool,
    ) -> Result<SyncOutcome, WorkflowError> {
        let started_at = Utc::now();
        let branch = self.target_branch(branch)?;
        let main = self.main_branch().to_string();
        let _span = info_span!("sync", component = "sync", branch = %branch, target = %main).entered();
        enter(SyncPhase::Start);

        enter(SyncPhase::StatusCheck);
        let status = self.check_sync_status(Some(&branch))?;
        if status.is_synced {
            enter(SyncPhase::Done);
            return Ok(SyncOutcome {
                status: SyncState::UpToDate,
                branch,
                target: main,
                strategy: None,
                message: status.message,
                conflicts: None,
                stashed: false,
                pending_stash: None,
                started_at,
                completed_at: Utc::now(),
            });
        }

        enter(SyncPhase::DirtyTreeHandling);
        let auto_stash = if self.gateway.is_dirty()? {
            let stash = self
                .gateway
                .stash(&format!("branchwise auto-stash before syncing {}", branch))
                .map_err(|e| {
                    WorkflowError::new(
                        ErrorKind::DirtyWorkingTree,
                        "uncommitted changes could not be stashed",
                    )
                    .with_cause(e)
                })?;
            if let Some(stash_id) = &stash {
                self.recovery
                    .register_recovery_action(RecoveryAction::ApplyStash {
                        stash_id: stash_id.clone(),
                    });
            }
            stash
        } else {
            None
        };

        let result = self.run(&branch, &main, strategy, force, started_at);

        // Local changes come back on every path; after a rollback the queue
        // has already been drained.
        if !self.recovery.pending_actions().is_empty() && !self.recovery.execute_recovery_actions() {
            warn!("could not restore stashed changes");
        }
        let pending_stash = match &auto_stash {
            Some(id) => match self.gateway.has_stash(id) {
                Ok(true) => {
                    warn!(stash = %id, "auto-stash is still pending; apply it with `git stash apply`");
                    Some(id.clone())
                }
                Ok(false) => None,
                Err(e) => {
                    warn!(error = %e, "could not verify the auto-stash");
                    Some(id.clone())
                }
            },
            None => None,
        };

        let mut outcome = result?;
        outcome.stashed = auto_stash.is_some();
        outcome.pending_stash = pending_stash;
        outcome.completed_at = Utc::now();
        enter(SyncPhase::Done);
        info!(status = %outcome.status, "sync finished");

        if let Some(hooks) = &self.hooks {
            if let Ok(payload) = serde_json::to_value(&outcome) {
                hooks.run(HookPoint::PostSync, &payload);
            }
        }
        Ok(outcome)
    }

    fn run(
        &mut self,
        branch: &str,
        main: &str,
        requested: Option<SyncStrategy>,
        force: bool,
        started_at: DateTime<Utc>,
    ) -> Result<SyncOutcome, WorkflowError> {
        let outcome = |status: SyncState, strategy: Option<Strategy>, message: String| SyncOutcome {
            status,
            branch: branch.to_string(),
            target: main.to_string(),
            strategy,
            message,
            conflicts: None,
            stashed: false,
            pending_stash: None,
            started_at,
            completed_at: Utc::now(),
        };

        enter(SyncPhase::StrategyResolution);
        let requested = requested.unwrap_or(self.config.sync.default_strategy);
        let precheck_enabled = !force;
        let report = (precheck_enabled || requested == SyncStrategy::Auto)
            .then(|| self.detector.detect_conflicts(branch, main));

        let mut strategy = match requested {
            SyncStrategy::Merge => Strategy::Merge,
            SyncStrategy::Rebase => Strategy::Rebase,
            SyncStrategy::Auto => {
                let advice = self
                    .advisor
                    .get_strategy_advice_with(branch, main, report.as_ref());
                info!(strategy = %advice.strategy, reason = %advice.reason, "strategy chosen by advisor");
                match advice.strategy {
                    Strategy::None => Strategy::Merge,
                    chosen => chosen,
                }
            }
        };
        strategy = self.pre_sync_override(branch, main, strategy);

        enter(SyncPhase::ConflictPrecheck);
        if precheck_enabled {
            if let Some(report) = report.filter(|r| r.has_conflicts) {
                let message = match &report.error {
                    Some(error) => format!("conflicts could not be ruled out: {}", error),
                    None => format!(
                        "{} conflicting file(s) predicted; resolve them or use --force",
                        report.conflicting_files.len()
                    ),
                };
                warn!(%message, "precheck stopped the sync");
                let mut stopped = outcome(SyncState::ConflictsDetected, Some(strategy), message);
                stopped.conflicts = Some(report);
                return Ok(stopped);
            }
        } else {
            debug!(force, "conflict precheck skipped");
        }

        enter(SyncPhase::Mutation);
        let gateway = self.gateway.clone();
        let result = self.recovery.safe_operation("pre_sync", || match strategy {
            Strategy::Rebase => gateway.rebase(main, branch),
            _ => gateway.merge(main, branch),
        });

        match result {
            Ok(()) => Ok(outcome(
                SyncState::Synchronized,
                Some(strategy),
                format!("'{}' synchronized with '{}' using {}", branch, main, strategy),
            )),
            Err(e) if e.kind() == ErrorKind::MergeConflict => {
                warn!(error = %e, "conflicts during {}", strategy);
                Ok(outcome(
                    SyncState::ConflictOccurred,
                    Some(strategy),
                    format!("{} stopped on conflicts and was rolled back: {}", strategy, e),
                ))
            }
            Err(e) => Err(WorkflowError::new(
                ErrorKind::SyncFailure,
                format!("synchronizing '{}' with '{}' failed", branch, main),
            )
            .with_suggestion(format!("Try `git {} {}` manually to see the full error", strategy, main))
            .with_cause(e)),
        }
    }

    fn pre_sync_override(&self, branch: &str, main: &str, strategy: Strategy) -> Strategy {
        let Some(hooks) = &self.hooks else {
            return strategy;
        };
        let payload = json!({ "branch": branch, "target": main, "strategy": strategy });
        match hooks.run(HookPoint::PreSync, &payload) {
            None => strategy,
            Some(Value::String(s)) if s == "merge" => Strategy::Merge,
            Some(Value::String(s)) if s == "rebase" => Strategy::Rebase,
            Some(other) => {
                warn!(result = %other, "ignoring malformed pre_sync hook result");
                strategy
            }
        }
    }
}

fn enter(phase: SyncPhase) {
    info!(%phase, "sync phase");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_and_state_names() {
        assert_eq!(SyncPhase::ConflictPrecheck.to_string(), "conflict_precheck");
        assert_eq!(SyncState::ConflictOccurred.to_string(), "conflict_occurred");
        assert_eq!(
            serde_json::to_value(SyncState::UpToDate).unwrap(),
            json!("up_to_date")
        );
    }

    #[test]
    fn test_main_branch_is_always_synced() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = git2::RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = git2::Repository::init_opts(dir.path(), &opts).unwrap();
        let sig = git2::Signature::now("Test", "test@test.com").unwrap();
        let tree_id = repo.index().unwrap().write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
            .unwrap();

        let gw = RepositoryGateway::open(dir.path()).unwrap();
        let manager = SyncManager::new(gw, &BranchwiseConfig::default());
        let status = manager.check_sync_status(Some("main")).unwrap();
        assert!(status.is_synced);
        assert_eq!((status.ahead, status.behind), (0, 0));

        let err = manager.check_sync_status(Some("nope")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingBranch);
    }
}
