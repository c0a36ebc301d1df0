//! Save/restore envelope around risky repository mutations.
//!
//! [`RecoveryManager::save_state`] records the checked-out branch, the HEAD
//! commit and (when the tree is dirty) a stash of local changes.
//! [`RecoveryManager::restore_state`] puts all three back. The
//! [`RecoveryManager::safe_operation`] wrapper combines the two: whatever the
//! wrapped operation does, the caller gets the operation's own error back after
//! the rollback has been attempted.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span, warn};

use crate::errors::{ErrorKind, WorkflowError};
use crate::git::RepositoryGateway;

/// Snapshot of the repository taken before a risky operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecoveryState {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    /// Checked-out branch, `None` when HEAD was detached.
    pub branch: Option<String>,
    pub head_commit: String,
    pub stash_created: bool,
    /// Commit id of the stash holding the local changes.
    pub stash_id: Option<String>,
}

/// Follow-up work queued by callers, run after a rollback (or explicitly
/// once the operation has succeeded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Re-apply and drop a stash entry.
    ApplyStash { stash_id: String },
    /// Check out a branch.
    Checkout { branch: String },
}

/// Keeps named recovery states for one repository.
#[derive(Debug)]
pub struct RecoveryManager {
    gateway: RepositoryGateway,
    states: HashMap<String, RecoveryState>,
    actions: Vec<RecoveryAction>,
}

impl RecoveryManager {
    pub fn new(gateway: RepositoryGateway) -> Self {
        Self {
            gateway,
            states: HashMap::new(),
            actions: Vec::new(),
        }
    }

    /// Record branch, HEAD and a stash of local changes under `name`.
    /// Re-saving a name replaces the previous snapshot.
    pub fn save_state(&mut self, name: &str) -> Result<RecoveryState, WorkflowError> {
        let _span = info_span!("recovery", component = "recovery", state = name).entered();

        let branch = self.gateway.head_branch()?;
        let head_commit = self.gateway.head_commit()?;

        let stash_id = if self.gateway.is_dirty()? {
            let message = format!("branchwise recovery point: {}", name);
            self.gateway.stash(&message)?
        } else {
            None
        };

        let state = RecoveryState {
            name: name.to_string(),
            timestamp: Utc::now(),
            branch,
            head_commit,
            stash_created: stash_id.is_some(),
            stash_id,
        };

        if self.states.insert(name.to_string(), state.clone()).is_some() {
            debug!("overwrote previous recovery state");
        }
        info!(
            branch = ?state.branch,
            head = %state.head_commit,
            stashed = state.stash_created,
            "saved recovery state"
        );
        Ok(state)
    }

    /// A saved state, if present.
    pub fn state(&self, name: &str) -> Option<&RecoveryState> {
        self.states.get(name)
    }

    /// Put the repository back into the state saved under `name`.
    ///
    /// Steps run in order: abort any merge or rebase in progress, check out
    /// the recorded branch (or detach at the recorded commit), hard-reset to
    /// the recorded commit, then apply and drop the stash. Without `force` the
    /// first failing step stops the restore with a `RecoveryFailure` and the
    /// state is kept for another attempt. With `force` failures are logged and
    /// the remaining steps still run; the return value is `false` if any step
    /// failed. A branch that can no longer be checked out is replaced by a
    /// detached HEAD at the recorded commit before resetting.
    ///
    /// A state is consumed by a completed restore and cannot be applied twice.
    pub fn restore_state(&mut self, name: &str, force: bool) -> Result<bool, WorkflowError> {
        let _span = info_span!("recovery", component = "recovery", state = name).entered();

        let state = self.states.get(name).cloned().ok_or_else(|| {
            WorkflowError::new(
                ErrorKind::RecoveryFailure,
                format!("unknown recovery state '{}'", name),
            )
        })?;
        info!(force, "restoring recovery state");

        let mut clean = true;
        let mut step = |label: &str, result: Result<(), WorkflowError>| -> Result<(), WorkflowError> {
            match result {
                Ok(()) => {
                    debug!(step = label, "restore step completed");
                    Ok(())
                }
                Err(e) if force => {
                    warn!(step = label, error = %e, "restore step failed, continuing");
                    clean = false;
                    Ok(())
                }
                Err(e) => {
                    error!(step = label, error = %e, "restore step failed");
                    Err(WorkflowError::new(
                        ErrorKind::RecoveryFailure,
                        format!("could not restore '{}': {} failed", name, label),
                    )
                    .with_cause(e))
                }
            }
        };

        step("abort", self.gateway.abort_in_progress().map(|_| ()))?;

        let checkout = match &state.branch {
            Some(branch) => self.gateway.checkout_force(branch),
            None => self.gateway.checkout_detached(&state.head_commit),
        };
        let mut anchored = checkout.is_ok();
        step("checkout", checkout)?;

        // Only reached under force. The reset must never move a branch other
        // than the recorded one.
        if !anchored && state.branch.is_some() {
            anchored = self.gateway.checkout_detached(&state.head_commit).is_ok();
            if anchored {
                warn!(head = %state.head_commit, "recorded branch unavailable, detached at recorded commit");
            }
        }

        let reset = if anchored {
            self.gateway.reset_hard(&state.head_commit)
        } else {
            Err(WorkflowError::new(
                ErrorKind::RecoveryFailure,
                "HEAD is not at the recorded position, reset skipped",
            ))
        };
        step("reset", reset)?;

        if let Some(stash_id) = &state.stash_id {
            let applied = self
                .gateway
                .apply_stash(stash_id)
                .and_then(|()| self.gateway.drop_stash(stash_id));
            step("stash", applied)?;
        }

        self.states.remove(name);
        info!(clean, "recovery state restored");
        Ok(clean)
    }

    /// Forget a saved state without restoring it.
    pub fn discard_state(&mut self, name: &str) -> Option<RecoveryState> {
        self.states.remove(name)
    }

    /// Queue an action for [`Self::execute_recovery_actions`].
    pub fn register_recovery_action(&mut self, action: RecoveryAction) {
        debug!(?action, "queued recovery action");
        self.actions.push(action);
    }

    pub fn pending_actions(&self) -> &[RecoveryAction] {
        &self.actions
    }

    /// Run queued actions, most recent first, and clear the queue. Failures
    /// are logged; returns `true` when every action succeeded.
    pub fn execute_recovery_actions(&mut self) -> bool {
        let mut ok = true;
        for action in self.actions.drain(..).rev() {
            let result = match &action {
                RecoveryAction::ApplyStash { stash_id } => self
                    .gateway
                    .apply_stash(stash_id)
                    .and_then(|()| self.gateway.drop_stash(stash_id)),
                RecoveryAction::Checkout { branch } => self.gateway.checkout(branch),
            };
            if let Err(e) = result {
                error!(?action, error = %e, "recovery action failed");
                ok = false;
            }
        }
        ok
    }

    /// Run `op` inside a save/restore envelope.
    ///
    /// On success the snapshot is dropped (re-applying its stash, if one was
    /// taken). On failure the snapshot is restored with `force`, queued
    /// actions run, and the operation's own error is returned. The outcome of
    /// the rollback is logged but never replaces that error.
    pub fn safe_operation<T, F>(&mut self, name: &str, op: F) -> Result<T, WorkflowError>
    where
        F: FnOnce() -> Result<T, WorkflowError>,
    {
        self.save_state(name)?;

        match op() {
            Ok(value) => {
                if let Some(state) = self.discard_state(name) {
                    if let Some(stash_id) = state.stash_id {
                        if let Err(e) = self
                            .gateway
                            .apply_stash(&stash_id)
                            .and_then(|()| self.gateway.drop_stash(&stash_id))
                        {
                            warn!(stash = %stash_id, error = %e, "could not re-apply recovery stash");
                        }
                    }
                }
                Ok(value)
            }
            Err(err) => {
                warn!(operation = name, error = %err, "operation failed, rolling back");
                match self.restore_state(name, true) {
                    Ok(true) => info!(operation = name, "rollback completed"),
                    Ok(false) => warn!(operation = name, "rollback completed with errors"),
                    Err(e) => error!(operation = name, error = %e, "rollback failed"),
                }
                if !self.execute_recovery_actions() {
                    warn!(operation = name, "some recovery actions failed");
                }
                Err(err)
            }
        }
    }
}
