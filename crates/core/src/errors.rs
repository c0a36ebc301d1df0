//! Error types for the branchwise core library.
//!
//! Callers only ever see [`WorkflowError`] (a closed [`ErrorKind`] plus a
//! message, an optional cause and actionable suggestions) or [`ConfigError`].
//! Raw failures from the version-control engine are carried as
//! [`EngineError`] and translated at the repository gateway boundary by
//! [`WorkflowError::from_engine`], which consults [`ENGINE_ERROR_PATTERNS`].

use std::fmt;

use serde::Serialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Workflow taxonomy
// ---------------------------------------------------------------------------

/// Closed set of failure kinds raised by the core. Callers match on the kind,
/// never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// The handle does not point at a usable repository.
    InvalidRepository,
    /// A referenced branch or ref does not exist.
    MissingBranch,
    /// Uncommitted changes block a safe mutation and auto-stash failed.
    DirtyWorkingTree,
    /// A merge or rebase produced unresolved conflicts.
    MergeConflict,
    /// Generic synchronization failure (pull/push refusal and friends).
    SyncFailure,
    /// The operation targets a branch protected by policy.
    ProtectedBranch,
    /// Rolling back after a failed operation itself failed.
    RecoveryFailure,
    /// The user or caller cancelled the operation.
    OperationAborted,
}

impl ErrorKind {
    /// Suggestions every error of this kind carries.
    pub fn default_suggestions(self) -> &'static [&'static str] {
        match self {
            Self::InvalidRepository => &[
                "Run the command from inside a git working tree",
                "Check that the repository has at least one commit",
            ],
            Self::MissingBranch => &[
                "List available branches with `git branch -a`",
                "Fetch remote refs with `git fetch --all` if the branch lives on a remote",
            ],
            Self::DirtyWorkingTree => &[
                "Commit or stash your changes, then re-run the command",
            ],
            Self::MergeConflict => &[
                "Resolve the conflicting files, then re-run the command",
                "Inspect the predicted conflicts with `branchwise check-conflicts`",
            ],
            Self::SyncFailure => &[
                "Check the remote configuration and your network connection",
                "Re-run with --verbose to see the underlying git error",
            ],
            Self::ProtectedBranch => &[
                "Protected branches are configured via `general.main_branch` and `clean.exclude_branches`",
            ],
            Self::RecoveryFailure => &[
                "Inspect `git status` and `git stash list`; your changes may be in a recovery stash",
            ],
            Self::OperationAborted => &[],
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRepository => write!(f, "invalid-repository"),
            Self::MissingBranch => write!(f, "missing-branch"),
            Self::DirtyWorkingTree => write!(f, "dirty-working-tree"),
            Self::MergeConflict => write!(f, "merge-conflict"),
            Self::SyncFailure => write!(f, "sync-failure"),
            Self::ProtectedBranch => write!(f, "protected-branch"),
            Self::RecoveryFailure => write!(f, "recovery-failure"),
            Self::OperationAborted => write!(f, "operation-aborted"),
        }
    }
}

/// Boxed original cause attached to a [`WorkflowError`].
pub type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Structured error raised by every core component.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct WorkflowError {
    kind: ErrorKind,
    message: String,
    #[source]
    cause: Option<Cause>,
    extra_suggestions: Vec<String>,
}

impl WorkflowError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
            extra_suggestions: Vec::new(),
        }
    }

    /// Attach the error that triggered this one.
    pub fn with_cause(mut self, cause: impl Into<Cause>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Add an actionable suggestion on top of the per-kind defaults.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.extra_suggestions.push(suggestion.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// Specific suggestions first, then the defaults for the kind.
    pub fn suggestions(&self) -> Vec<String> {
        self.extra_suggestions
            .iter()
            .cloned()
            .chain(
                self.kind
                    .default_suggestions()
                    .iter()
                    .map(|s| s.to_string()),
            )
            .collect()
    }

    /// Translate a raw engine failure into the taxonomy.
    ///
    /// The engine message is matched against [`ENGINE_ERROR_PATTERNS`]; the
    /// first matching substring decides the kind, otherwise `fallback` is used.
    pub fn from_engine(context: impl Into<String>, err: EngineError, fallback: ErrorKind) -> Self {
        let kind = classify_engine_message(&err.to_string()).unwrap_or(fallback);
        Self::new(kind, context).with_cause(err)
    }
}

// ---------------------------------------------------------------------------
// Engine errors and translation table
// ---------------------------------------------------------------------------

/// A raw failure from the underlying version-control engine. Never escapes
/// the repository gateway untranslated.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2(#[from] git2::Error),

    /// A `git` subprocess exited with a non-zero status.
    #[error("`git {command}` failed (exit {exit_code}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// The `git` binary could not be spawned.
    #[error("failed to run git: {0}")]
    Io(#[from] std::io::Error),
}

/// Ordered `(substring, kind)` table used to classify engine messages.
/// Matching is case-insensitive and the first hit wins.
pub const ENGINE_ERROR_PATTERNS: &[(&str, ErrorKind)] = &[
    ("conflict", ErrorKind::MergeConflict),
    ("not a git repository", ErrorKind::InvalidRepository),
    ("could not find repository", ErrorKind::InvalidRepository),
    ("does not have any commits", ErrorKind::InvalidRepository),
    ("not a valid object name", ErrorKind::MissingBranch),
    ("did not match any file(s) known to git", ErrorKind::MissingBranch),
    ("unknown revision", ErrorKind::MissingBranch),
    ("cannot locate", ErrorKind::MissingBranch),
    ("remote ref does not exist", ErrorKind::MissingBranch),
    ("branch not found", ErrorKind::MissingBranch),
    ("changes not staged", ErrorKind::DirtyWorkingTree),
    ("would be overwritten", ErrorKind::DirtyWorkingTree),
    ("please commit your changes or stash them", ErrorKind::DirtyWorkingTree),
    ("you have unstaged changes", ErrorKind::DirtyWorkingTree),
    ("refusing to merge", ErrorKind::SyncFailure),
    ("refusing to pull", ErrorKind::SyncFailure),
    ("protected branch", ErrorKind::ProtectedBranch),
    ("rejected", ErrorKind::SyncFailure),
];

/// Look up the taxonomy kind for an engine message, if any pattern matches.
pub fn classify_engine_message(message: &str) -> Option<ErrorKind> {
    let lowered = message.to_lowercase();
    ENGINE_ERROR_PATTERNS
        .iter()
        .find(|(needle, _)| lowered.contains(needle))
        .map(|(_, kind)| *kind)
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
