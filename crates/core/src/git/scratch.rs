//! Disposable clones used to trial-merge without touching the user's checkout.

use std::path::{Path, PathBuf};

use git2::Oid;
use tempfile::TempDir;
use tracing::{debug, warn};

use super::command;
use crate::errors::EngineError;

/// Porcelain status codes of unmerged index entries.
const UNMERGED_CODES: &[&str] = &["UU", "AA", "DD", "AU", "UA", "DU", "UD"];

/// Result of a trial merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulationOutcome {
    /// The merge applied without conflicts.
    Clean,
    /// The merge stopped with these unmerged paths.
    Conflicts(Vec<String>),
    /// The merge failed for a reason other than content conflicts.
    Failed(String),
}

/// A throw-away clone of a repository. The directory is removed when the
/// value is dropped, including on early returns and panics.
pub struct ScratchClone {
    _dir: TempDir,
    work: PathBuf,
}

impl ScratchClone {
    /// Clone `source` into a fresh temporary directory. The clone borrows the
    /// source's object store, so every commit of the source is addressable.
    pub fn create(source: &Path) -> Result<Self, EngineError> {
        let dir = tempfile::Builder::new().prefix("branchwise-sim-").tempdir()?;
        let work = dir.path().join("work");
        let source_str = source.to_string_lossy();
        let work_str = work.to_string_lossy();
        command::run(
            dir.path(),
            &["clone", "--quiet", "--shared", "--no-checkout", &source_str, &work_str],
        )?;
        debug!(path = %work.display(), "created scratch clone");
        Ok(Self { _dir: dir, work })
    }

    /// Check out `target` detached and merge `source` into it without
    /// committing.
    pub fn trial_merge(&self, target: Oid, source: Oid) -> Result<SimulationOutcome, EngineError> {
        let target = target.to_string();
        let source = source.to_string();
        command::run(&self.work, &["checkout", "--quiet", "--detach", &target])?;

        let merge = command::output(
            &self.work,
            &[
                "-c",
                "user.name=branchwise",
                "-c",
                "user.email=branchwise@localhost",
                "merge",
                "--no-commit",
                "--no-ff",
                &source,
            ],
        )?;
        if merge.status.success() {
            return Ok(SimulationOutcome::Clean);
        }

        let status = command::run(&self.work, &["status", "--porcelain", "-z"])?;
        let conflicts = parse_unmerged(&status);
        if conflicts.is_empty() {
            let stderr = String::from_utf8_lossy(&merge.stderr).trim().to_string();
            warn!(error = %stderr, "trial merge failed without conflicts");
            return Ok(SimulationOutcome::Failed(stderr));
        }
        Ok(SimulationOutcome::Conflicts(conflicts))
    }
}

/// Paths of unmerged entries in `git status --porcelain -z` output.
fn parse_unmerged(status: &str) -> Vec<String> {
    let mut paths: Vec<String> = status
        .split('\0')
        .filter_map(|entry| {
            let code = entry.get(..2)?;
            let path = entry.get(3..).filter(|p| !p.is_empty())?;
            UNMERGED_CODES.contains(&code).then(|| path.to_string())
        })
        .collect();
    paths.sort();
    paths.dedup();
    paths
}
