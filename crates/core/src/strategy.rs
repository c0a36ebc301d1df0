//! Merge-versus-rebase advice.
//!
//! [`StrategyAdvisor::get_strategy_advice`] first honours the configured
//! force patterns, then gathers a [`BranchAnalysis`] snapshot and lets each
//! signal vote for one side. Balanced votes resolve to `merge`.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::config::{AdviceConfig, BranchwiseConfig};
use crate::conflict::{ConflictDetector, ConflictReport, Severity};
use crate::errors::WorkflowError;
use crate::git::RepositoryGateway;
use crate::hooks::{HookPoint, HookRegistry};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Recommended way to integrate a branch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Merge,
    Rebase,
    /// Nothing to integrate.
    None,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Merge => write!(f, "merge"),
            Self::Rebase => write!(f, "rebase"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Naming convention a branch follows, from its prefix.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BranchPattern {
    Feature,
    Bugfix,
    Release,
    Chore,
    Doc,
    Test,
    Unknown,
}

impl BranchPattern {
    pub fn from_name(name: &str) -> Self {
        let prefix = name.split('/').next().unwrap_or_default();
        if !name.contains('/') {
            return Self::Unknown;
        }
        match prefix {
            "feature" | "feat" => Self::Feature,
            "fix" | "bugfix" | "hotfix" => Self::Bugfix,
            "release" => Self::Release,
            "chore" => Self::Chore,
            "doc" | "docs" => Self::Doc,
            "test" => Self::Test,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for BranchPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Feature => "feature",
            Self::Bugfix => "bugfix",
            Self::Release => "release",
            Self::Chore => "chore",
            Self::Doc => "doc",
            Self::Test => "test",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Touched files per category.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileHistogram {
    pub code: usize,
    pub config: usize,
    pub doc: usize,
    pub test: usize,
    pub other: usize,
}

const CODE_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "java", "c", "cpp", "cs", "go", "rb", "php", "rs", "html", "css", "scss",
    "less", "sass", "sql", "graphql",
];
const CONFIG_EXTENSIONS: &[&str] = &["json", "xml", "yaml", "yml", "toml", "ini", "cfg", "conf"];
const DOC_EXTENSIONS: &[&str] = &["md", "txt", "rst", "adoc", "pdf", "doc", "docx"];

impl FileHistogram {
    pub fn from_paths<'a, I>(paths: I) -> Self
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut histogram = Self::default();
        for path in paths {
            let file_name = Path::new(path)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(path)
                .to_ascii_lowercase();
            let ext = Path::new(&file_name)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or_default()
                .to_string();

            if file_name.contains("test") || file_name.contains("spec") {
                histogram.test += 1;
            } else if CODE_EXTENSIONS.contains(&ext.as_str()) {
                histogram.code += 1;
            } else if CONFIG_EXTENSIONS.contains(&ext.as_str()) {
                histogram.config += 1;
            } else if DOC_EXTENSIONS.contains(&ext.as_str()) {
                histogram.doc += 1;
            } else {
                histogram.other += 1;
            }
        }
        histogram
    }

    pub fn total(&self) -> usize {
        self.code + self.config + self.doc + self.test + self.other
    }
}

/// Conflicting files per severity.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeverityCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

/// Every signal the decision is based on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BranchAnalysis {
    pub ahead: usize,
    pub behind: usize,
    pub age_days: u32,
    /// Commits reachable from the branch tip.
    pub total_commits: usize,
    pub files: FileHistogram,
    pub conflict_count: usize,
    pub severity: SeverityCounts,
    /// Conflict detection could not complete.
    pub conflicts_inconclusive: bool,
    pub pattern: BranchPattern,
}

/// A recommendation and its explanation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StrategyAdvice {
    pub strategy: Strategy,
    pub reason: String,
    /// Snapshot the decision was scored on; absent for short-circuits.
    pub details: Option<BranchAnalysis>,
    pub rebase_factors: Vec<String>,
    pub merge_factors: Vec<String>,
    /// Force pattern that decided the strategy, if any.
    pub forced_by: Option<String>,
}

impl StrategyAdvice {
    fn short(strategy: Strategy, reason: impl Into<String>) -> Self {
        Self {
            strategy,
            reason: reason.into(),
            details: None,
            rebase_factors: Vec::new(),
            merge_factors: Vec::new(),
            forced_by: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Pick the first force pattern matching `branch`. Merge patterns take
/// precedence when both lists match.
pub fn forced_strategy(branch: &str, settings: &AdviceConfig) -> Option<(Strategy, String)> {
    let merge = settings
        .force_merge_patterns
        .iter()
        .find(|p| glob_match::glob_match(p, branch));
    let rebase = settings
        .force_rebase_patterns
        .iter()
        .find(|p| glob_match::glob_match(p, branch));

    match (merge, rebase) {
        (Some(m), Some(r)) => {
            warn!(branch, merge_pattern = %m, rebase_pattern = %r, "branch matches both force lists, using merge");
            Some((Strategy::Merge, m.clone()))
        }
        (Some(m), None) => Some((Strategy::Merge, m.clone())),
        (None, Some(r)) => Some((Strategy::Rebase, r.clone())),
        (None, None) => None,
    }
}

/// Score `analysis` and explain the result.
pub fn score(analysis: &BranchAnalysis, settings: &AdviceConfig) -> StrategyAdvice {
    let mut rebase = Vec::new();
    let mut merge = Vec::new();
    let threshold = settings.rebase_threshold as usize;

    if analysis.ahead <= threshold {
        rebase.push(format!("few commits ({} <= {})", analysis.ahead, threshold));
    } else {
        merge.push(format!("many commits ({} > {})", analysis.ahead, threshold));
    }

    if settings.consider_branch_age {
        if analysis.age_days <= 7 {
            rebase.push(format!("recent branch ({} days)", analysis.age_days));
        } else if analysis.age_days >= 30 {
            merge.push(format!("old branch ({} days)", analysis.age_days));
        }
    }

    if analysis.conflicts_inconclusive {
        merge.push("conflict analysis inconclusive".to_string());
    } else if analysis.severity.high > 0 {
        merge.push(format!("{} high-severity conflict(s)", analysis.severity.high));
    } else if analysis.conflict_count > 3 {
        merge.push(format!("many conflicts ({} files)", analysis.conflict_count));
    } else if analysis.conflict_count > 0 {
        rebase.push(format!("few conflicts ({} files)", analysis.conflict_count));
    } else {
        rebase.push("no conflicts detected".to_string());
    }

    if analysis.files.config > 0 {
        merge.push(format!("{} configuration file(s) modified", analysis.files.config));
    }
    if analysis.files.code > 10 {
        merge.push(format!("many code files modified ({})", analysis.files.code));
    }

    match analysis.pattern {
        BranchPattern::Feature => merge.push("feature branch".to_string()),
        BranchPattern::Bugfix => rebase.push("bug-fix branch".to_string()),
        _ => {}
    }

    let (strategy, reason) = if rebase.len() > merge.len() {
        (Strategy::Rebase, explain("Rebase", &rebase, &merge))
    } else if merge.len() > rebase.len() {
        (Strategy::Merge, explain("Merge", &merge, &rebase))
    } else {
        (
            Strategy::Merge,
            "Merge recommended by default (balanced factors)".to_string(),
        )
    };

    StrategyAdvice {
        strategy,
        reason,
        details: Some(analysis.clone()),
        rebase_factors: rebase,
        merge_factors: merge,
        forced_by: None,
    }
}

fn explain(label: &str, winning: &[String], opposing: &[String]) -> String {
    let mut reason = format!(
        "{} recommended: {}",
        label,
        winning.iter().take(2).cloned().collect::<Vec<_>>().join(", ")
    );
    if let Some(against) = opposing.first() {
        reason.push_str(&format!(" (despite {})", against));
    }
    reason
}

// ---------------------------------------------------------------------------
// Advisor
// ---------------------------------------------------------------------------

/// Recommends `merge` or `rebase` for bringing a branch into its target.
#[derive(Debug, Clone)]
pub struct StrategyAdvisor {
    gateway: RepositoryGateway,
    detector: ConflictDetector,
    settings: AdviceConfig,
    hooks: Option<Arc<HookRegistry>>,
}

impl StrategyAdvisor {
    pub fn new(gateway: RepositoryGateway, config: &BranchwiseConfig) -> Self {
        Self {
            detector: ConflictDetector::new(gateway.clone(), config),
            gateway,
            settings: config.advice.clone(),
            hooks: None,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.detector = self.detector.with_hooks(hooks.clone());
        self.hooks = Some(hooks);
        self
    }

    /// Recommend how to integrate `branch` into `target`.
    pub fn get_strategy_advice(&self, branch: &str, target: &str) -> StrategyAdvice {
        self.get_strategy_advice_with(branch, target, None)
    }

    /// Like [`Self::get_strategy_advice`], reusing an existing conflict
    /// report for the same pair instead of running detection again.
    #[instrument(skip(self, conflicts), fields(component = "strategy"))]
    pub fn get_strategy_advice_with(
        &self,
        branch: &str,
        target: &str,
        conflicts: Option<&ConflictReport>,
    ) -> StrategyAdvice {
        if branch == target {
            return StrategyAdvice::short(
                Strategy::None,
                format!("'{}' is the target branch itself", branch),
            );
        }

        if let Some((strategy, pattern)) = forced_strategy(branch, &self.settings) {
            info!(%strategy, pattern = %pattern, "strategy forced by pattern");
            let mut advice = StrategyAdvice::short(
                strategy,
                format!("Forced {} for branches matching '{}'", strategy, pattern),
            );
            advice.forced_by = Some(pattern);
            return self.apply_strategy_hook(advice);
        }

        let advice = match self.analyze(branch, target, conflicts) {
            Ok(analysis) => {
                debug!(?analysis, "branch analysed");
                score(&analysis, &self.settings)
            }
            Err(e) => {
                warn!(error = %e, "branch analysis failed, defaulting to merge");
                StrategyAdvice::short(
                    Strategy::Merge,
                    format!("Merge recommended by default: analysis failed ({})", e),
                )
            }
        };
        info!(strategy = %advice.strategy, reason = %advice.reason, "strategy advice ready");
        self.apply_strategy_hook(advice)
    }

    /// Collect the decision signals for `branch` against `target`.
    pub fn analyze(
        &self,
        branch: &str,
        target: &str,
        conflicts: Option<&ConflictReport>,
    ) -> Result<BranchAnalysis, WorkflowError> {
        let divergence = self.gateway.divergence(branch, target)?;
        let age_days = self.gateway.branch_age_days(branch)?;
        let total_commits = self.gateway.commit_count(branch, None)?;

        let files = match self.gateway.common_ancestor(branch, target)? {
            Some(base) => FileHistogram::from_paths(&self.gateway.modified_files(base, branch)?),
            None => FileHistogram::default(),
        };

        let detected;
        let report = match conflicts {
            Some(report) => report,
            None => {
                detected = self.detector.detect_conflicts(branch, target);
                &detected
            }
        };
        let histogram = report.severity_histogram();
        let severity = SeverityCounts {
            high: histogram.get(&Severity::High).copied().unwrap_or(0),
            medium: histogram.get(&Severity::Medium).copied().unwrap_or(0),
            low: histogram.get(&Severity::Low).copied().unwrap_or(0),
        };

        Ok(BranchAnalysis {
            ahead: divergence.ahead,
            behind: divergence.behind,
            age_days,
            total_commits,
            files,
            conflict_count: report.conflicting_files.len(),
            severity,
            conflicts_inconclusive: report.is_inconclusive(),
            pattern: BranchPattern::from_name(branch),
        })
    }

    fn apply_strategy_hook(&self, mut advice: StrategyAdvice) -> StrategyAdvice {
        let Some(hooks) = &self.hooks else {
            return advice;
        };
        let Ok(payload) = serde_json::to_value(&advice) else {
            return advice;
        };
        match hooks.run(HookPoint::BranchStrategy, &payload) {
            None => {}
            Some(Value::String(s)) if s == "merge" || s == "rebase" => {
                let strategy = if s == "merge" { Strategy::Merge } else { Strategy::Rebase };
                if strategy != advice.strategy {
                    info!(from = %advice.strategy, to = %strategy, "strategy overridden by hook");
                    advice.reason = format!("{} (overridden by branch_strategy hook)", advice.reason);
                    advice.strategy = strategy;
                }
            }
            Some(other) => warn!(result = %other, "ignoring malformed branch_strategy hook result"),
        }
        advice
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis() -> BranchAnalysis {
        BranchAnalysis {
            ahead: 3,
            behind: 0,
            age_days: 2,
            total_commits: 4,
            files: FileHistogram {
                doc: 1,
                ..Default::default()
            },
            conflict_count: 0,
            severity: SeverityCounts::default(),
            conflicts_inconclusive: false,
            pattern: BranchPattern::Feature,
        }
    }

    #[test]
    fn test_branch_pattern() {
        assert_eq!(BranchPattern::from_name("feature/login"), BranchPattern::Feature);
        assert_eq!(BranchPattern::from_name("feat/x"), BranchPattern::Feature);
        assert_eq!(BranchPattern::from_name("hotfix/crash"), BranchPattern::Bugfix);
        assert_eq!(BranchPattern::from_name("release/1.0"), BranchPattern::Release);
        assert_eq!(BranchPattern::from_name("docs/readme"), BranchPattern::Doc);
        assert_eq!(BranchPattern::from_name("feature"), BranchPattern::Unknown);
        assert_eq!(BranchPattern::from_name("wip/thing"), BranchPattern::Unknown);
    }

    #[test]
    fn test_file_histogram() {
        let paths: Vec<String> = vec![
            "src/app.py".into(),
            "tests/test_app.py".into(),
            "config/settings.toml".into(),
            "README.md".into(),
            "Makefile".into(),
        ];
        let h = FileHistogram::from_paths(&paths);
        assert_eq!(
            h,
            FileHistogram {
                code: 1,
                config: 1,
                doc: 1,
                test: 1,
                other: 1
            }
        );
        assert_eq!(h.total(), 5);
    }

    #[test]
    fn test_small_recent_doc_branch_rebases() {
        let advice = score(&analysis(), &AdviceConfig::default());
        assert_eq!(advice.strategy, Strategy::Rebase);
        assert!(advice.reason.starts_with("Rebase recommended: few commits"));
        assert!(advice.reason.contains("(despite feature branch)"));
    }

    #[test]
    fn test_large_old_conflicting_branch_merges() {
        let mut a = analysis();
        a.ahead = 40;
        a.age_days = 60;
        a.files = FileHistogram {
            code: 2,
            config: 1,
            ..Default::default()
        };
        a.conflict_count = 2;
        a.severity.high = 2;
        a.pattern = BranchPattern::Release;

        let advice = score(&a, &AdviceConfig::default());
        assert_eq!(advice.strategy, Strategy::Merge);
        assert_eq!(advice.merge_factors.len(), 4);
        assert!(advice.rebase_factors.is_empty());
        assert_eq!(
            advice.reason,
            "Merge recommended: many commits (40 > 5), old branch (60 days)"
        );
    }

    #[test]
    fn test_balanced_scores_pick_merge() {
        let mut a = analysis();
        a.ahead = 10; // merge
        a.age_days = 15; // neutral
        a.pattern = BranchPattern::Unknown;
        // no conflicts -> rebase; one point each
        let advice = score(&a, &AdviceConfig::default());
        assert_eq!(advice.rebase_factors.len(), advice.merge_factors.len());
        assert_eq!(advice.strategy, Strategy::Merge);
        assert!(advice.reason.contains("balanced"));
    }

    #[test]
    fn test_age_ignored_when_disabled() {
        let settings = AdviceConfig {
            consider_branch_age: false,
            ..Default::default()
        };
        let advice = score(&analysis(), &settings);
        assert!(!advice.rebase_factors.iter().any(|f| f.contains("recent")));
    }

    #[test]
    fn test_inconclusive_conflicts_favour_merge() {
        let mut a = analysis();
        a.conflicts_inconclusive = true;
        let advice = score(&a, &AdviceConfig::default());
        assert!(advice
            .merge_factors
            .contains(&"conflict analysis inconclusive".to_string()));
    }

    #[test]
    fn test_forced_patterns() {
        let settings = AdviceConfig {
            force_merge_patterns: vec!["release/*".into()],
            force_rebase_patterns: vec!["fix/*".into(), "release/1.*".into()],
            ..Default::default()
        };
        assert_eq!(
            forced_strategy("fix/typo", &settings),
            Some((Strategy::Rebase, "fix/*".to_string()))
        );
        // Matches both lists: merge wins.
        assert_eq!(
            forced_strategy("release/1.0", &settings),
            Some((Strategy::Merge, "release/*".to_string()))
        );
        assert_eq!(forced_strategy("feature/x", &settings), None);
    }

    fn advisor_with(hooks: HookRegistry) -> (tempfile::TempDir, StrategyAdvisor) {
        let dir = tempfile::tempdir().unwrap();
        git2::Repository::init(dir.path()).unwrap();
        let gw = RepositoryGateway::open(dir.path()).unwrap();
        let mut config = BranchwiseConfig::default();
        config.advice.force_rebase_patterns = vec!["chore/*".into()];
        let advisor = StrategyAdvisor::new(gw, &config).with_hooks(Arc::new(hooks));
        (dir, advisor)
    }

    #[test]
    fn test_branch_strategy_hook_overrides_advice() {
        let mut hooks = HookRegistry::new();
        hooks.register(HookPoint::BranchStrategy, |payload| {
            assert_eq!(payload["strategy"], "rebase");
            Some(Value::String("merge".into()))
        });
        let (_dir, advisor) = advisor_with(hooks);

        let advice = advisor.get_strategy_advice("chore/deps", "main");
        assert_eq!(advice.strategy, Strategy::Merge);
        assert!(advice.reason.ends_with("(overridden by branch_strategy hook)"));
        assert_eq!(advice.forced_by.as_deref(), Some("chore/*"));
    }

    #[test]
    fn test_malformed_strategy_hook_result_is_ignored() {
        let mut hooks = HookRegistry::new();
        hooks.register(HookPoint::BranchStrategy, |_| Some(Value::from(42)));
        let (_dir, advisor) = advisor_with(hooks);

        let advice = advisor.get_strategy_advice("chore/deps", "main");
        assert_eq!(advice.strategy, Strategy::Rebase);
        assert!(!advice.reason.contains("overridden"));
    }
}
