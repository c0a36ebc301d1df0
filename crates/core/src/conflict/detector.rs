//! Conflict detection by trial merge.
//!
//! The detector never touches the user's checkout: files changed on both
//! sides since the merge base are found by tree diffs, and when they overlap
//! the merge is replayed in a [`ScratchClone`]. Any failure along the way
//! yields an inconclusive report that still claims conflicts, so callers
//! never act on a false "all clear".

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::analysis::{suggestions_for, ConflictType, DiffAnalysis, Severity};
use crate::config::BranchwiseConfig;
use crate::errors::{ErrorKind, WorkflowError};
use crate::git::{RepositoryGateway, ScratchClone, SimulationOutcome};
use crate::hooks::{HookPoint, HookRegistry};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One file the trial merge could not combine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileConflict {
    pub file_path: String,
    pub conflict_type: ConflictType,
    pub severity: Severity,
    /// Inserted plus deleted lines between the two sides.
    pub modified_lines: usize,
    /// Unified diff, kept only when `conflict_detection.show_diff` is set.
    pub diff: Option<String>,
}

/// Result of [`ConflictDetector::detect_conflicts`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConflictReport {
    /// Identifier for correlating log records of one detection run.
    pub id: String,
    pub source: String,
    pub target: String,
    pub has_conflicts: bool,
    pub conflicting_files: Vec<FileConflict>,
    /// Paths changed on both sides since the merge base.
    pub common_modified_files: BTreeSet<String>,
    pub suggestions: Vec<String>,
    /// Why detection could not complete. When set, `has_conflicts` is `true`
    /// and `conflicting_files` is empty.
    pub error: Option<String>,
}

impl ConflictReport {
    fn new(source: &str, target: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: source.to_string(),
            target: target.to_string(),
            has_conflicts: false,
            conflicting_files: Vec::new(),
            common_modified_files: BTreeSet::new(),
            suggestions: Vec::new(),
            error: None,
        }
    }

    fn inconclusive(mut self, error: impl Into<String>, suggestion: impl Into<String>) -> Self {
        self.has_conflicts = true;
        self.conflicting_files.clear();
        self.error = Some(error.into());
        self.suggestions = vec![suggestion.into()];
        self
    }

    /// Detection failed; treat the pair as conflicting.
    pub fn is_inconclusive(&self) -> bool {
        self.error.is_some()
    }

    pub fn high_severity_count(&self) -> usize {
        self.conflicting_files
            .iter()
            .filter(|c| c.severity == Severity::High)
            .count()
    }

    /// Number of conflicting files per severity.
    pub fn severity_histogram(&self) -> BTreeMap<Severity, usize> {
        let mut histogram = BTreeMap::new();
        for conflict in &self.conflicting_files {
            *histogram.entry(conflict.severity).or_insert(0) += 1;
        }
        histogram
    }
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Predicts whether merging one branch into another would conflict.
#[derive(Debug, Clone)]
pub struct ConflictDetector {
    gateway: RepositoryGateway,
    show_diff: bool,
    hooks: Option<Arc<HookRegistry>>,
}

impl ConflictDetector {
    pub fn new(gateway: RepositoryGateway, config: &BranchwiseConfig) -> Self {
        Self {
            gateway,
            show_diff: config.conflict_detection.show_diff,
            hooks: None,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Predict the outcome of merging `source` into `target`.
    ///
    /// Never fails: analysis errors produce an inconclusive report with
    /// `has_conflicts = true` and the error recorded.
    #[instrument(skip(self), fields(component = "conflict"))]
    pub fn detect_conflicts(&self, source: &str, target: &str) -> ConflictReport {
        let report = ConflictReport::new(source, target);
        if source == target {
            debug!("source and target are the same branch");
            return report;
        }

        let mut report = match self.simulate(report.clone()) {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "conflict detection failed, assuming conflicts");
                report.inconclusive(
                    format!("conflict detection failed: {}", e),
                    format!(
                        "Conflicts could not be ruled out; inspect `git diff {}...{}` before merging.",
                        target, source
                    ),
                )
            }
        };

        if report.has_conflicts {
            self.apply_resolution_hook(&mut report);
        }
        info!(
            report = %report.id,
            has_conflicts = report.has_conflicts,
            conflicts = report.conflicting_files.len(),
            inconclusive = report.is_inconclusive(),
            "conflict detection finished"
        );
        report
    }

    fn simulate(&self, mut report: ConflictReport) -> Result<ConflictReport, WorkflowError> {
        let source = report.source.clone();
        let target = report.target.clone();

        let source_oid = self.gateway.resolve(&source)?;
        let target_oid = self.gateway.resolve(&target)?;
        if source_oid == target_oid {
            return Ok(report);
        }

        let Some(base) = self.gateway.common_ancestor(&source, &target)? else {
            return Ok(report.inconclusive(
                format!("'{}' and '{}' have no common ancestor", source, target),
                format!(
                    "Rebase '{}' onto '{}' first; unrelated histories cannot be merged safely.",
                    source, target
                ),
            ));
        };

        let source_files = self.gateway.modified_files(base, &source)?;
        let target_files = self.gateway.modified_files(base, &target)?;
        let common: BTreeSet<String> = source_files
            .intersection(&target_files)
            .cloned()
            .collect();
        debug!(
            source_files = source_files.len(),
            target_files = target_files.len(),
            common = common.len(),
            "compared change sets"
        );
        if common.is_empty() {
            return Ok(report);
        }
        report.common_modified_files = common;

        let outcome = ScratchClone::create(self.gateway.root())
            .and_then(|scratch| scratch.trial_merge(target_oid, source_oid))
            .map_err(|e| WorkflowError::from_engine("merge simulation failed", e, ErrorKind::SyncFailure))?;

        match outcome {
            SimulationOutcome::Clean => {
                report.suggestions.push(format!(
                    "{} file(s) changed on both sides merge automatically.",
                    report.common_modified_files.len()
                ));
                Ok(report)
            }
            SimulationOutcome::Conflicts(paths) => {
                report.conflicting_files = paths
                    .iter()
                    .map(|path| self.classify(path, &source, &target))
                    .collect();
                report.has_conflicts = true;
                report.suggestions = suggestions_for(&report.conflicting_files, &target);
                Ok(report)
            }
            SimulationOutcome::Failed(detail) => Ok(report.inconclusive(
                format!("merge simulation failed: {}", detail),
                format!(
                    "Try merging '{}' into '{}' manually to see what git reports.",
                    source, target
                ),
            )),
        }
    }

    fn classify(&self, path: &str, source: &str, target: &str) -> FileConflict {
        let conflict_type = ConflictType::from_path(path);
        let ours = self.gateway.file_contents(target, path);
        let theirs = self.gateway.file_contents(source, path);

        match (ours, theirs) {
            (Ok(Some(ours)), Ok(Some(theirs))) => {
                let analysis = DiffAnalysis::between(&ours, &theirs);
                debug!(
                    path,
                    lines = analysis.modified_lines,
                    imports = analysis.touches_imports,
                    signatures = analysis.touches_signatures,
                    "classified conflict"
                );
                FileConflict {
                    file_path: path.to_string(),
                    conflict_type,
                    severity: analysis.severity(),
                    modified_lines: analysis.modified_lines,
                    diff: self.show_diff.then_some(analysis.patch),
                }
            }
            // Binary, deleted on one side, or unreadable.
            _ => FileConflict {
                file_path: path.to_string(),
                conflict_type,
                severity: Severity::High,
                modified_lines: 0,
                diff: None,
            },
        }
    }

    fn apply_resolution_hook(&self, report: &mut ConflictReport) {
        let Some(hooks) = &self.hooks else {
            return;
        };
        let Ok(payload) = serde_json::to_value(&*report) else {
            return;
        };
        match hooks.run(HookPoint::ConflictResolution, &payload) {
            None => {}
            Some(Value::Array(items)) => {
                let suggestions: Option<Vec<String>> = items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string))
                    .collect();
                match suggestions {
                    Some(s) => report.suggestions = s,
                    None => warn!("ignoring conflict_resolution hook result with non-string entries"),
                }
            }
            Some(other) => warn!(result = %other, "ignoring malformed conflict_resolution hook result"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, severity: Severity) -> FileConflict {
        FileConflict {
            file_path: path.into(),
            conflict_type: ConflictType::from_path(path),
            severity,
            modified_lines: 3,
            diff: None,
        }
    }

    #[test]
    fn test_inconclusive_report_claims_conflicts() {
        let report = ConflictReport::new("feature", "main").inconclusive("boom", "look closer");
        assert!(report.has_conflicts);
        assert!(report.is_inconclusive());
        assert!(report.conflicting_files.is_empty());
        assert_eq!(report.suggestions, vec!["look closer"]);
    }

    #[test]
    fn test_severity_histogram() {
        let mut report = ConflictReport::new("feature", "main");
        report.conflicting_files = vec![
            file("a.py", Severity::High),
            file("b.md", Severity::Low),
            file("c.py", Severity::High),
        ];
        let histogram = report.severity_histogram();
        assert_eq!(histogram.get(&Severity::High), Some(&2));
        assert_eq!(histogram.get(&Severity::Low), Some(&1));
        assert_eq!(histogram.get(&Severity::Medium), None);
        assert_eq!(report.high_severity_count(), 2);
    }

    #[test]
    fn test_same_branch_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        git2::Repository::init(dir.path()).unwrap();
        let gw = RepositoryGateway::open(dir.path()).unwrap();
        let detector = ConflictDetector::new(gw, &BranchwiseConfig::default());

        // No commits exist, so anything beyond the short-circuit would fail.
        let report = detector.detect_conflicts("main", "main");
        assert!(!report.has_conflicts);
        assert!(report.error.is_none());
    }

    #[test]
    fn test_missing_branch_is_inconclusive() {
        let dir = tempfile::tempdir().unwrap();
        git2::Repository::init(dir.path()).unwrap();
        let gw = RepositoryGateway::open(dir.path()).unwrap();
        let detector = ConflictDetector::new(gw, &BranchwiseConfig::default());

        let report = detector.detect_conflicts("ghost", "main");
        assert!(report.has_conflicts);
        assert!(report.is_inconclusive());
    }

    #[test]
    fn test_resolution_hook_replaces_suggestions() {
        let mut registry = HookRegistry::new();
        registry.register(HookPoint::ConflictResolution, |_| {
            Some(serde_json::json!(["ask the release manager"]))
        });
        let dir = tempfile::tempdir().unwrap();
        git2::Repository::init(dir.path()).unwrap();
        let gw = RepositoryGateway::open(dir.path()).unwrap();
        let detector =
            ConflictDetector::new(gw, &BranchwiseConfig::default()).with_hooks(Arc::new(registry));

        let report = detector.detect_conflicts("ghost", "main");
        assert_eq!(report.suggestions, vec!["ask the release manager"]);
    }
}
