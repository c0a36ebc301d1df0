//! Throw-away repositories for the integration tests.
//!
//! Repositories are built with the `git` binary so the fixtures look exactly
//! like what a user would have on disk. Tests skip when `git` is missing.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

use tempfile::TempDir;

use branchwise_core::{BranchwiseConfig, RepositoryGateway};

pub const DAY: i64 = 24 * 60 * 60;

pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// A fresh repository on `main` with one commit (`README.md`).
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    /// `None` (after printing a skip notice) when `git` is not installed.
    pub fn init() -> Option<Self> {
        if !git_available() {
            eprintln!("SKIPPED: git not found in PATH");
            return None;
        }
        let repo = Self {
            dir: TempDir::new().unwrap(),
        };
        repo.git(&["init", "--quiet"]);
        repo.git(&["symbolic-ref", "HEAD", "refs/heads/main"]);
        repo.git(&["config", "user.name", "Test User"]);
        repo.git(&["config", "user.email", "test@example.com"]);
        repo.git(&["config", "commit.gpgsign", "false"]);
        repo.commit_file("README.md", "# fixture\n", "initial commit");
        Some(repo)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn gateway(&self) -> RepositoryGateway {
        RepositoryGateway::open(self.path()).expect("fixture is a repository")
    }

    /// Defaults, minus the age filter and the protected-branch list.
    pub fn config(&self) -> BranchwiseConfig {
        let mut config = BranchwiseConfig::default();
        config.clean.age_threshold = 0;
        config.clean.exclude_branches.clear();
        config
    }

    /// Run git and return trimmed stdout; panics on failure.
    pub fn git(&self, args: &[&str]) -> String {
        self.git_with_date(args, None)
    }

    /// Run git and report whether it succeeded; output is discarded.
    pub fn try_git(&self, args: &[&str]) -> bool {
        self.command(args)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        cmd.current_dir(self.path())
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .env("LC_ALL", "C");
        cmd
    }

    fn git_with_date(&self, args: &[&str], timestamp: Option<i64>) -> String {
        let mut cmd = self.command(args);
        if let Some(ts) = timestamp {
            let date = format!("@{} +0000", ts);
            cmd.env("GIT_AUTHOR_DATE", &date)
                .env("GIT_COMMITTER_DATE", &date);
        }
        let output = cmd.output().expect("failed to run git");
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    pub fn write(&self, rel: &str, content: &str) {
        let path: PathBuf = self.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    pub fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.path().join(rel)).unwrap()
    }

    pub fn commit_file(&self, rel: &str, content: &str, message: &str) -> String {
        self.commit_file_aged(rel, content, message, 0)
    }

    /// Commit with author and committer dates `days_ago` days in the past.
    pub fn commit_file_aged(&self, rel: &str, content: &str, message: &str, days_ago: i64) -> String {
        self.write(rel, content);
        self.git(&["add", "--", rel]);
        self.git_with_date(
            &["commit", "--quiet", "-m", message],
            Some(now() - days_ago * DAY),
        );
        self.head()
    }

    /// Create `name` at HEAD and switch to it.
    pub fn branch(&self, name: &str) {
        self.git(&["checkout", "--quiet", "-b", name]);
    }

    pub fn checkout(&self, name: &str) {
        self.git(&["checkout", "--quiet", name]);
    }

    pub fn head(&self) -> String {
        self.git(&["rev-parse", "HEAD"])
    }

    pub fn rev(&self, refname: &str) -> String {
        self.git(&["rev-parse", refname])
    }

    pub fn current_branch(&self) -> String {
        self.git(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    /// `git status --porcelain` output.
    pub fn status(&self) -> String {
        self.git(&["status", "--porcelain"])
    }

    pub fn stash_count(&self) -> usize {
        self.git(&["stash", "list"]).lines().count()
    }

    pub fn merge_in_progress(&self) -> bool {
        self.path().join(".git").join("MERGE_HEAD").exists()
    }
}

/// Ten numbered lines, with `line` replaced by `text` when given.
pub fn numbered(edit: Option<(usize, &str)>) -> String {
    (1..=10)
        .map(|n| match edit {
            Some((line, text)) if line == n => format!("{}\n", text),
            _ => format!("line {}\n", n),
        })
        .collect()
}
