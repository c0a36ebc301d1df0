//! Thin runner for `git` subprocesses.
//!
//! Porcelain operations (merge, rebase, stash, push) go through the `git`
//! binary so hooks, config and credential helpers behave exactly as they do
//! for the user. The locale is pinned to `C` so stderr text stays matchable by
//! the error translation table.

use std::path::Path;
use std::process::{Command, Output};

use tracing::debug;

use crate::errors::EngineError;

/// Run `git <args>` in `dir` and return its trimmed stdout.
///
/// A non-zero exit is reported as [`EngineError::CommandFailed`] carrying both
/// stderr and stdout, since git prints merge conflicts on stdout.
pub fn run(dir: &Path, args: &[&str]) -> Result<String, EngineError> {
    let output = output(dir, args)?;
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let detail = [stderr.trim(), stdout.trim()]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("\n");

    Err(EngineError::CommandFailed {
        command: args.join(" "),
        exit_code: output.status.code().unwrap_or(-1),
        stderr: detail,
    })
}

/// Run `git <args>` in `dir` and hand back the raw output, whatever the exit
/// status.
pub fn output(dir: &Path, args: &[&str]) -> Result<Output, EngineError> {
    debug!(dir = %dir.display(), command = %args.join(" "), "running git");
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("LC_ALL", "C")
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("GIT_EDITOR", "true")
        .output()?;
    Ok(output)
}

/// Whether a usable `git` binary is on `PATH`.
pub fn is_available() -> bool {
    matches!(
        Command::new("git").arg("--version").output(),
        Ok(out) if out.status.success()
    )
}
