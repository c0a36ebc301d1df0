//! Repository gateway: the only place the core talks to git.
//!
//! Read-only queries go through `git2`; mutations shell out to the `git`
//! binary via [`command`]. Every failure leaving this module is a
//! [`WorkflowError`] translated by [`WorkflowError::from_engine`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use git2::{BranchType, ErrorCode, Oid, Repository, RepositoryState, StatusOptions};
use tracing::{debug, info, instrument, warn};

use super::command;
use crate::errors::{EngineError, ErrorKind, WorkflowError};
use crate::models::Divergence;

/// Handle on a local working tree.
///
/// Cheap to clone: it only stores the working-tree root and reopens the
/// underlying `git2::Repository` per call, so it always sees live ref state.
#[derive(Debug, Clone)]
pub struct RepositoryGateway {
    root: PathBuf,
    remote: String,
}

fn query_error(context: impl Into<String>, err: impl Into<EngineError>) -> WorkflowError {
    WorkflowError::from_engine(context, err.into(), ErrorKind::InvalidRepository)
}

fn mutation_error(context: impl Into<String>, err: impl Into<EngineError>) -> WorkflowError {
    WorkflowError::from_engine(context, err.into(), ErrorKind::SyncFailure)
}

impl RepositoryGateway {
    /// Open the repository containing `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WorkflowError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening git repository");
        let repo = Repository::discover(path).map_err(|e| {
            WorkflowError::new(
                ErrorKind::InvalidRepository,
                format!("'{}' is not inside a git repository", path.display()),
            )
            .with_cause(EngineError::from(e))
        })?;
        let root = repo
            .workdir()
            .ok_or_else(|| {
                WorkflowError::new(
                    ErrorKind::InvalidRepository,
                    "bare repositories are not supported",
                )
            })?
            .to_path_buf();
        Ok(Self {
            root,
            remote: "origin".into(),
        })
    }

    /// Use `remote` for remote-tracking lookups and remote deletions.
    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    fn repo(&self) -> Result<Repository, WorkflowError> {
        Repository::open(&self.root).map_err(|e| query_error("failed to open repository", e))
    }

    // ---- queries ----

    /// Name of the checked-out branch, `None` when HEAD is detached.
    pub fn head_branch(&self) -> Result<Option<String>, WorkflowError> {
        let repo = self.repo()?;
        let head = repo
            .head()
            .map_err(|e| query_error("failed to read HEAD", e))?;
        if head.is_branch() {
            Ok(head.shorthand().map(str::to_string))
        } else {
            Ok(None)
        }
    }

    /// Checked-out branch name, or the short commit id when HEAD is detached.
    pub fn current_branch(&self) -> Result<String, WorkflowError> {
        match self.head_branch()? {
            Some(name) => Ok(name),
            None => {
                let sha = self.head_commit()?;
                Ok(sha.chars().take(7).collect())
            }
        }
    }

    /// Full id of the HEAD commit.
    pub fn head_commit(&self) -> Result<String, WorkflowError> {
        let repo = self.repo()?;
        let commit = repo
            .head()
            .and_then(|h| h.peel_to_commit())
            .map_err(|e| query_error("failed to resolve HEAD commit", e))?;
        Ok(commit.id().to_string())
    }

    /// Resolve a branch, remote branch or revision to a commit id.
    ///
    /// Plain names that are not local refs fall back to
    /// `<remote>/<name>` so remote-only branches can be analysed.
    pub fn resolve(&self, refname: &str) -> Result<Oid, WorkflowError> {
        let repo = self.repo()?;
        Self::resolve_in(&repo, refname, &self.remote)
    }

    fn resolve_in(repo: &Repository, refname: &str, remote: &str) -> Result<Oid, WorkflowError> {
        let direct = repo
            .revparse_single(refname)
            .and_then(|obj| obj.peel_to_commit());
        let err = match direct {
            Ok(commit) => return Ok(commit.id()),
            Err(e) => e,
        };

        if matches!(err.code(), ErrorCode::NotFound | ErrorCode::InvalidSpec) {
            let remote_ref = format!("refs/remotes/{}/{}", remote, refname);
            if let Ok(commit) = repo
                .find_reference(&remote_ref)
                .and_then(|r| r.peel_to_commit())
            {
                return Ok(commit.id());
            }
            return Err(WorkflowError::new(
                ErrorKind::MissingBranch,
                format!("branch '{}' not found", refname),
            )
            .with_cause(EngineError::from(err)));
        }
        Err(query_error(format!("failed to resolve '{}'", refname), err))
    }

    pub fn branch_exists(&self, name: &str) -> Result<bool, WorkflowError> {
        let repo = self.repo()?;
        let local = repo.find_branch(name, BranchType::Local).is_ok();
        let remote = repo
            .find_branch(&format!("{}/{}", self.remote, name), BranchType::Remote)
            .is_ok();
        Ok(local || remote)
    }

    /// Local branch names, sorted.
    pub fn list_local_branches(&self) -> Result<Vec<String>, WorkflowError> {
        let repo = self.repo()?;
        let branches = repo
            .branches(Some(BranchType::Local))
            .map_err(|e| query_error("failed to list branches", e))?;
        let mut names = Vec::new();
        for branch_result in branches {
            let (branch, _) = branch_result.map_err(|e| query_error("failed to list branches", e))?;
            if let Ok(Some(name)) = branch.name() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remote-tracking branches of the configured remote, without the
    /// `<remote>/` prefix. The symbolic `HEAD` entry is skipped.
    pub fn list_remote_branches(&self) -> Result<Vec<String>, WorkflowError> {
        let repo = self.repo()?;
        let branches = repo
            .branches(Some(BranchType::Remote))
            .map_err(|e| query_error("failed to list remote branches", e))?;
        let prefix = format!("{}/", self.remote);
        let mut names = Vec::new();
        for branch_result in branches {
            let (branch, _) =
                branch_result.map_err(|e| query_error("failed to list remote branches", e))?;
            let Ok(Some(full)) = branch.name() else {
                continue;
            };
            if let Some(short) = full.strip_prefix(&prefix) {
                if short != "HEAD" {
                    names.push(short.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Committer date of the tip of `refname`.
    pub fn last_commit_date(&self, refname: &str) -> Result<Option<NaiveDate>, WorkflowError> {
        let repo = self.repo()?;
        let oid = Self::resolve_in(&repo, refname, &self.remote)?;
        let commit = repo
            .find_commit(oid)
            .map_err(|e| query_error(format!("failed to read commit of '{}'", refname), e))?;
        let seconds = commit.committer().when().seconds();
        Ok(DateTime::<Utc>::from_timestamp(seconds, 0).map(|d| d.date_naive()))
    }

    /// Days since the last commit on `refname`; 0 when the date is unknown.
    pub fn branch_age_days(&self, refname: &str) -> Result<u32, WorkflowError> {
        let Some(date) = self.last_commit_date(refname)? else {
            return Ok(0);
        };
        let days = (Utc::now().date_naive() - date).num_days().max(0);
        Ok(u32::try_from(days).unwrap_or(u32::MAX))
    }

    /// Commits reachable from `refname`, excluding those reachable from
    /// `base` when given.
    pub fn commit_count(&self, refname: &str, base: Option<&str>) -> Result<usize, WorkflowError> {
        let repo = self.repo()?;
        let tip = Self::resolve_in(&repo, refname, &self.remote)?;
        let mut walk = repo
            .revwalk()
            .map_err(|e| query_error("failed to walk history", e))?;
        walk.push(tip)
            .map_err(|e| query_error("failed to walk history", e))?;
        if let Some(base) = base {
            let base_oid = Self::resolve_in(&repo, base, &self.remote)?;
            walk.hide(base_oid)
                .map_err(|e| query_error("failed to walk history", e))?;
        }
        Ok(walk.filter(|r| r.is_ok()).count())
    }

    /// Commits unique to `branch` (ahead) and to `target` (behind).
    pub fn divergence(&self, branch: &str, target: &str) -> Result<Divergence, WorkflowError> {
        if branch == target {
            return Ok(Divergence::default());
        }
        let repo = self.repo()?;
        let local = Self::resolve_in(&repo, branch, &self.remote)?;
        let upstream = Self::resolve_in(&repo, target, &self.remote)?;
        let (ahead, behind) = repo.graph_ahead_behind(local, upstream).map_err(|e| {
            query_error(format!("failed to compare '{}' with '{}'", branch, target), e)
        })?;
        debug!(branch, target, ahead, behind, "computed divergence");
        Ok(Divergence::new(ahead, behind))
    }

    /// Best common ancestor of two refs, `None` for unrelated histories.
    pub fn common_ancestor(&self, a: &str, b: &str) -> Result<Option<Oid>, WorkflowError> {
        let repo = self.repo()?;
        let one = Self::resolve_in(&repo, a, &self.remote)?;
        let two = Self::resolve_in(&repo, b, &self.remote)?;
        match repo.merge_base(one, two) {
            Ok(oid) => Ok(Some(oid)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(query_error(
                format!("failed to find merge base of '{}' and '{}'", a, b),
                e,
            )),
        }
    }

    /// Paths changed between commit `since` and the tip of `until`.
    pub fn modified_files(&self, since: Oid, until: &str) -> Result<BTreeSet<String>, WorkflowError> {
        let repo = self.repo()?;
        let until_oid = Self::resolve_in(&repo, until, &self.remote)?;
        let context = || format!("failed to diff '{}' against {}", until, since);

        let old_tree = repo
            .find_commit(since)
            .and_then(|c| c.tree())
            .map_err(|e| query_error(context(), e))?;
        let new_tree = repo
            .find_commit(until_oid)
            .and_then(|c| c.tree())
            .map_err(|e| query_error(context(), e))?;
        let diff = repo
            .diff_tree_to_tree(Some(&old_tree), Some(&new_tree), None)
            .map_err(|e| query_error(context(), e))?;

        let files = diff
            .deltas()
            .filter_map(|delta| {
                delta
                    .new_file()
                    .path()
                    .or_else(|| delta.old_file().path())
                    .map(|p| p.to_string_lossy().into_owned())
            })
            .collect();
        Ok(files)
    }

    /// Text of `path` at the tip of `refname`. `None` when the file does not
    /// exist there or is binary.
    pub fn file_contents(&self, refname: &str, path: &str) -> Result<Option<String>, WorkflowError> {
        let repo = self.repo()?;
        let oid = Self::resolve_in(&repo, refname, &self.remote)?;
        let tree = repo
            .find_commit(oid)
            .and_then(|c| c.tree())
            .map_err(|e| query_error(format!("failed to read tree of '{}'", refname), e))?;
        let entry = match tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(query_error(format!("failed to look up '{}'", path), e)),
        };
        let Ok(blob) = repo.find_blob(entry.id()) else {
            return Ok(None);
        };
        if blob.is_binary() {
            return Ok(None);
        }
        Ok(std::str::from_utf8(blob.content()).ok().map(str::to_string))
    }

    /// Upstream of a local branch, e.g. `origin/feature/x`.
    pub fn tracking_branch(&self, name: &str) -> Result<Option<String>, WorkflowError> {
        let repo = self.repo()?;
        let Ok(branch) = repo.find_branch(name, BranchType::Local) else {
            return Ok(None);
        };
        let upstream = match branch.upstream() {
            Ok(upstream) => upstream,
            Err(_) => return Ok(None),
        };
        let name = upstream.name().ok().flatten().map(str::to_string);
        Ok(name)
    }

    /// Whether the tip of `branch_ref` is reachable from `into`.
    pub fn is_merged(&self, branch_ref: &str, into: &str) -> Result<bool, WorkflowError> {
        let repo = self.repo()?;
        let tip = Self::resolve_in(&repo, branch_ref, &self.remote)?;
        let base = Self::resolve_in(&repo, into, &self.remote)?;
        if tip == base {
            return Ok(true);
        }
        repo.graph_descendant_of(base, tip)
            .map_err(|e| query_error(format!("failed to check whether '{}' is merged", branch_ref), e))
    }

    /// Whether tracked or untracked changes are present in the working tree.
    pub fn is_dirty(&self) -> Result<bool, WorkflowError> {
        let repo = self.repo()?;
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = repo
            .statuses(Some(&mut opts))
            .map_err(|e| query_error("failed to read working tree status", e))?;
        Ok(statuses
            .iter()
            .any(|entry| !entry.status().is_ignored() && entry.status() != git2::Status::CURRENT))
    }

    fn stash_tip(&self) -> Result<Option<String>, WorkflowError> {
        let repo = self.repo()?;
        match repo.refname_to_id("refs/stash") {
            Ok(oid) => Ok(Some(oid.to_string())),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(query_error("failed to read the stash", e)),
        }
    }

    // ---- mutations ----

    /// `git fetch --all --prune`.
    #[instrument(skip(self), fields(component = "gateway"))]
    pub fn fetch(&self) -> Result<(), WorkflowError> {
        info!("fetching all remotes");
        command::run(&self.root, &["fetch", "--all", "--prune", "--quiet"])
            .map_err(|e| mutation_error("fetch failed", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(component = "gateway"))]
    pub fn checkout(&self, branch: &str) -> Result<(), WorkflowError> {
        command::run(&self.root, &["checkout", "--quiet", branch])
            .map_err(|e| mutation_error(format!("failed to check out '{}'", branch), e))?;
        info!(branch, "checked out");
        Ok(())
    }

    /// Check out `branch`, discarding local modifications to tracked files.
    pub fn checkout_force(&self, branch: &str) -> Result<(), WorkflowError> {
        command::run(&self.root, &["checkout", "--quiet", "-f", branch])
            .map_err(|e| mutation_error(format!("failed to check out '{}'", branch), e))?;
        Ok(())
    }

    /// Detach HEAD at `commit`, discarding local modifications.
    pub fn checkout_detached(&self, commit: &str) -> Result<(), WorkflowError> {
        command::run(&self.root, &["checkout", "--quiet", "-f", "--detach", commit])
            .map_err(|e| mutation_error(format!("failed to detach at {}", commit), e))?;
        Ok(())
    }

    pub fn reset_hard(&self, commit: &str) -> Result<(), WorkflowError> {
        command::run(&self.root, &["reset", "--quiet", "--hard", commit])
            .map_err(|e| mutation_error(format!("failed to reset to {}", commit), e))?;
        info!(commit, "reset working tree");
        Ok(())
    }

    /// Abort a merge, rebase or cherry-pick left in progress. Returns whether
    /// anything was aborted.
    pub fn abort_in_progress(&self) -> Result<bool, WorkflowError> {
        let state = self.repo()?.state();
        let args: &[&str] = match state {
            RepositoryState::Clean => return Ok(false),
            RepositoryState::Merge => &["merge", "--abort"],
            RepositoryState::Rebase
            | RepositoryState::RebaseInteractive
            | RepositoryState::RebaseMerge
            | RepositoryState::ApplyMailboxOrRebase => &["rebase", "--abort"],
            RepositoryState::CherryPick | RepositoryState::CherryPickSequence => {
                &["cherry-pick", "--abort"]
            }
            RepositoryState::Revert | RepositoryState::RevertSequence => &["revert", "--abort"],
            other => {
                warn!(?other, "cannot abort repository state");
                return Ok(false);
            }
        };
        command::run(&self.root, args)
            .map_err(|e| mutation_error("failed to abort the operation in progress", e))?;
        info!(?state, "aborted operation in progress");
        Ok(true)
    }

    /// Delete a local branch (`-D` when `force`).
    #[instrument(skip(self), fields(component = "gateway"))]
    pub fn delete_local_branch(&self, name: &str, force: bool) -> Result<(), WorkflowError> {
        let flag = if force { "-D" } else { "-d" };
        command::run(&self.root, &["branch", flag, name])
            .map_err(|e| mutation_error(format!("failed to delete branch '{}'", name), e))?;
        info!(name, "deleted local branch");
        Ok(())
    }

    /// Delete branch `name` on `remote`.
    #[instrument(skip(self), fields(component = "gateway"))]
    pub fn delete_remote_branch(&self, remote: &str, name: &str) -> Result<(), WorkflowError> {
        command::run(&self.root, &["push", "--quiet", remote, "--delete", name])
            .map_err(|e| mutation_error(format!("failed to delete '{}/{}'", remote, name), e))?;
        info!(remote, name, "deleted remote branch");
        Ok(())
    }

    /// Merge `source` into `into` with a merge commit.
    ///
    /// On failure the merge is aborted. The previously checked-out branch is
    /// restored either way.
    #[instrument(skip(self), fields(component = "gateway"))]
    pub fn merge(&self, source: &str, into: &str) -> Result<(), WorkflowError> {
        let original = self.head_branch()?;
        if original.as_deref() != Some(into) {
            self.checkout(into)?;
        }

        let message = format!("Merge branch '{}' into {}", source, into);
        let result = command::run(&self.root, &["merge", "--no-ff", "--no-edit", "-m", &message, source]);

        if let Err(e) = result {
            warn!(source, into, error = %e, "merge failed, aborting");
            if let Err(abort) = command::run(&self.root, &["merge", "--abort"]) {
                debug!(error = %abort, "merge --abort reported an error");
            }
            self.return_to(original.as_deref(), into);
            return Err(mutation_error(
                format!("merging '{}' into '{}' failed", source, into),
                e,
            ));
        }

        self.return_to(original.as_deref(), into);
        info!(source, into, "merge completed");
        Ok(())
    }

    /// Rebase `branch` onto `onto`.
    ///
    /// On failure the rebase is aborted. The previously checked-out branch is
    /// restored either way.
    #[instrument(skip(self), fields(component = "gateway"))]
    pub fn rebase(&self, onto: &str, branch: &str) -> Result<(), WorkflowError> {
        let original = self.head_branch()?;
        let result = command::run(&self.root, &["rebase", "--quiet", onto, branch]);

        if let Err(e) = result {
            warn!(onto, branch, error = %e, "rebase failed, aborting");
            if let Err(abort) = command::run(&self.root, &["rebase", "--abort"]) {
                debug!(error = %abort, "rebase --abort reported an error");
            }
            self.return_to(original.as_deref(), branch);
            return Err(mutation_error(
                format!("rebasing '{}' onto '{}' failed", branch, onto),
                e,
            ));
        }

        self.return_to(original.as_deref(), branch);
        info!(onto, branch, "rebase completed");
        Ok(())
    }

    fn return_to(&self, original: Option<&str>, current: &str) {
        let Some(original) = original else {
            return;
        };
        if original == current {
            return;
        }
        if let Err(e) = command::run(&self.root, &["checkout", "--quiet", original]) {
            warn!(branch = original, error = %e, "could not return to the original branch");
        }
    }

    /// Stash tracked and untracked changes. Returns the stash commit id, or
    /// `None` when there was nothing to stash.
    #[instrument(skip(self), fields(component = "gateway"))]
    pub fn stash(&self, message: &str) -> Result<Option<String>, WorkflowError> {
        let before = self.stash_tip()?;
        command::run(&self.root, &["stash", "push", "--include-untracked", "-m", message])
            .map_err(|e| mutation_error("failed to stash local changes", e))?;
        let after = self.stash_tip()?;
        if after.is_some() && after != before {
            info!(stash = ?after, "stashed local changes");
            Ok(after)
        } else {
            debug!("nothing to stash");
            Ok(None)
        }
    }

    /// Apply the stash entry whose commit id is `stash_id`, keeping it.
    #[instrument(skip(self), fields(component = "gateway"))]
    pub fn apply_stash(&self, stash_id: &str) -> Result<(), WorkflowError> {
        command::run(&self.root, &["stash", "apply", "--quiet", stash_id])
            .map_err(|e| mutation_error(format!("failed to apply stash {}", stash_id), e))?;
        info!(stash = stash_id, "applied stash");
        Ok(())
    }

    fn stash_index(&self, stash_id: &str) -> Result<Option<usize>, WorkflowError> {
        let listing = command::run(&self.root, &["stash", "list", "--format=%H"])
            .map_err(|e| query_error("failed to list stashes", e))?;
        Ok(listing.lines().position(|line| line.trim() == stash_id))
    }

    /// Whether the stash entry `stash_id` is still on the stash list.
    pub fn has_stash(&self, stash_id: &str) -> Result<bool, WorkflowError> {
        Ok(self.stash_index(stash_id)?.is_some())
    }

    /// Drop the stash entry whose commit id is `stash_id`.
    pub fn drop_stash(&self, stash_id: &str) -> Result<(), WorkflowError> {
        let Some(index) = self.stash_index(stash_id)? else {
            warn!(stash = stash_id, "stash entry already gone");
            return Ok(());
        };
        let entry = format!("stash@{{{}}}", index);
        command::run(&self.root, &["stash", "drop", "--quiet", &entry])
            .map_err(|e| mutation_error(format!("failed to drop {}", entry), e))?;
        debug!(stash = stash_id, "dropped stash");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Signature, Time};

    fn init_repo() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = git2::RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = Repository::init_opts(dir.path(), &opts).unwrap();
        (dir, repo)
    }

    /// Commit `path` = `content` on top of `branch` without touching the
    /// working tree.
    fn commit_file(repo: &Repository, branch: &str, path: &str, content: &[u8], when: i64) -> Oid {
        let refname = format!("refs/heads/{}", branch);
        let parent = repo
            .find_reference(&refname)
            .ok()
            .and_then(|r| r.peel_to_commit().ok());
        let base_tree = parent.as_ref().map(|c| c.tree().unwrap());
        let mut builder = repo.treebuilder(base_tree.as_ref()).unwrap();
        let blob = repo.blob(content).unwrap();
        builder.insert(path, blob, 0o100644).unwrap();
        let tree = repo.find_tree(builder.write().unwrap()).unwrap();
        let sig = Signature::new("Test", "test@test.com", &Time::new(when, 0)).unwrap();
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(Some(&refname), &sig, &sig, "commit", &tree, &parents)
            .unwrap()
    }

    fn branch_from(repo: &Repository, name: &str, at: Oid) {
        let commit = repo.find_commit(at).unwrap();
        repo.branch(name, &commit, false).unwrap();
    }

    const T0: i64 = 1_700_000_000;

    #[test]
    fn test_open_outside_repository() {
        let dir = tempfile::tempdir().unwrap();
        let err = RepositoryGateway::open(dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRepository);
    }

    #[test]
    fn test_current_branch_and_head() {
        let (dir, repo) = init_repo();
        let oid = commit_file(&repo, "main", "a.txt", b"a\n", T0);
        let gw = RepositoryGateway::open(dir.path()).unwrap();
        assert_eq!(gw.current_branch().unwrap(), "main");
        assert_eq!(gw.head_commit().unwrap(), oid.to_string());

        repo.set_head_detached(oid).unwrap();
        assert_eq!(gw.head_branch().unwrap(), None);
        assert_eq!(gw.current_branch().unwrap(), &oid.to_string()[..7]);
    }

    #[test]
    fn test_divergence_and_ancestor() {
        let (dir, repo) = init_repo();
        let base = commit_file(&repo, "main", "a.txt", b"a\n", T0);
        branch_from(&repo, "feature", base);
        commit_file(&repo, "feature", "b.txt", b"b\n", T0 + 10);
        commit_file(&repo, "feature", "c.txt", b"c\n", T0 + 20);
        commit_file(&repo, "main", "d.txt", b"d\n", T0 + 30);

        let gw = RepositoryGateway::open(dir.path()).unwrap();
        assert_eq!(gw.divergence("feature", "main").unwrap(), Divergence::new(2, 1));
        assert_eq!(gw.divergence("main", "feature").unwrap(), Divergence::new(1, 2));
        assert_eq!(gw.divergence("main", "main").unwrap(), Divergence::default());
        assert_eq!(gw.common_ancestor("feature", "main").unwrap(), Some(base));
        assert_eq!(gw.commit_count("feature", Some("main")).unwrap(), 2);
        assert_eq!(gw.commit_count("feature", None).unwrap(), 3);

        let files = gw.modified_files(base, "feature").unwrap();
        assert_eq!(files.into_iter().collect::<Vec<_>>(), vec!["b.txt", "c.txt"]);
    }

    #[test]
    fn test_unrelated_histories_have_no_ancestor() {
        let (dir, repo) = init_repo();
        commit_file(&repo, "main", "a.txt", b"a\n", T0);
        commit_file(&repo, "orphan", "z.txt", b"z\n", T0);

        let gw = RepositoryGateway::open(dir.path()).unwrap();
        assert_eq!(gw.common_ancestor("orphan", "main").unwrap(), None);
    }

    #[test]
    fn test_missing_branch() {
        let (dir, repo) = init_repo();
        commit_file(&repo, "main", "a.txt", b"a\n", T0);
        let gw = RepositoryGateway::open(dir.path()).unwrap();
        let err = gw.divergence("nope", "main").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingBranch);
        assert!(!gw.branch_exists("nope").unwrap());
        assert!(gw.branch_exists("main").unwrap());
    }

    #[test]
    fn test_branch_listing_and_merged() {
        let (dir, repo) = init_repo();
        let base = commit_file(&repo, "main", "a.txt", b"a\n", T0);
        branch_from(&repo, "merged", base);
        branch_from(&repo, "open", base);
        commit_file(&repo, "open", "o.txt", b"o\n", T0 + 5);

        let gw = RepositoryGateway::open(dir.path()).unwrap();
        assert_eq!(gw.list_local_branches().unwrap(), vec!["main", "merged", "open"]);
        assert!(gw.list_remote_branches().unwrap().is_empty());
        assert!(gw.is_merged("merged", "main").unwrap());
        assert!(!gw.is_merged("open", "main").unwrap());
        assert_eq!(gw.tracking_branch("open").unwrap(), None);
    }

    #[test]
    fn test_last_commit_date() {
        let (dir, repo) = init_repo();
        commit_file(&repo, "main", "a.txt", b"a\n", T0);
        let gw = RepositoryGateway::open(dir.path()).unwrap();
        assert_eq!(
            gw.last_commit_date("main").unwrap(),
            NaiveDate::from_ymd_opt(2023, 11, 14)
        );
        assert!(gw.branch_age_days("main").unwrap() > 300);
    }

    #[test]
    fn test_file_contents() {
        let (dir, repo) = init_repo();
        commit_file(&repo, "main", "a.txt", b"hello\n", T0);
        commit_file(&repo, "main", "blob.bin", &[0u8, 159, 146, 150, 0], T0 + 1);
        let gw = RepositoryGateway::open(dir.path()).unwrap();
        assert_eq!(gw.file_contents("main", "a.txt").unwrap().as_deref(), Some("hello\n"));
        assert_eq!(gw.file_contents("main", "blob.bin").unwrap(), None);
        assert_eq!(gw.file_contents("main", "missing.txt").unwrap(), None);
    }

    #[test]
    fn test_is_dirty() {
        let (dir, repo) = init_repo();
        commit_file(&repo, "main", "a.txt", b"a\n", T0);
        repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))
            .unwrap();
        let gw = RepositoryGateway::open(dir.path()).unwrap();
        assert!(!gw.is_dirty().unwrap());

        std::fs::write(dir.path().join("new.txt"), "untracked").unwrap();
        assert!(gw.is_dirty().unwrap());
    }
}
