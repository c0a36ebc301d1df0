//! TOML-based configuration for branchwise.
//!
//! Values are layered: built-in defaults, then the global file
//! (`<config dir>/branchwise/config.toml`), then the repository file
//! (`<repo>/.branchwise.toml`), then `BRANCHWISE_<SECTION>_<KEY>` environment
//! variables. Components receive the resulting [`BranchwiseConfig`]; the
//! dotted-key lookup [`BranchwiseConfig::get_value`] is offered for callers
//! that address settings by name.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

/// Prefix of environment variables that override configuration values.
pub const ENV_PREFIX: &str = "BRANCHWISE_";

/// File name of the per-repository configuration file.
pub const REPO_CONFIG_FILE: &str = ".branchwise.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BranchwiseConfig {
    #[serde(default)]
    pub general: GeneralConfig,

    /// Merged-branch cleanup settings.
    #[serde(default)]
    pub clean: CleanConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    /// Strategy advice tuning.
    #[serde(default)]
    pub advice: AdviceConfig,

    #[serde(default)]
    pub conflict_detection: ConflictDetectionConfig,
}

// ---------------------------------------------------------------------------
// General
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GeneralConfig {
    /// The integration branch every other branch is measured against.
    #[serde(default = "default_main_branch")]
    pub main_branch: String,

    /// Remote used for remote-tracking branches and remote deletions.
    #[serde(default = "default_remote")]
    pub remote: String,
}

fn default_main_branch() -> String {
    "main".into()
}
fn default_remote() -> String {
    "origin".into()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            main_branch: default_main_branch(),
            remote: default_remote(),
        }
    }
}

// ---------------------------------------------------------------------------
// Clean
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleanConfig {
    /// Branch names never offered for cleanup.
    #[serde(default = "default_exclude_branches")]
    pub exclude_branches: Vec<String>,

    /// Merged branches whose tip is younger than this many days are kept.
    /// `0` disables the age check.
    #[serde(default = "default_age_threshold")]
    pub age_threshold: u32,
}

fn default_exclude_branches() -> Vec<String> {
    vec!["develop".into(), "staging".into()]
}
fn default_age_threshold() -> u32 {
    30
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            exclude_branches: default_exclude_branches(),
            age_threshold: default_age_threshold(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

/// Strategy requested for a synchronization.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncStrategy {
    Merge,
    Rebase,
    /// Let the strategy advisor decide.
    #[default]
    Auto,
}

impl fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Merge => write!(f, "merge"),
            Self::Rebase => write!(f, "rebase"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

impl std::str::FromStr for SyncStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "merge" => Ok(Self::Merge),
            "rebase" => Ok(Self::Rebase),
            "auto" => Ok(Self::Auto),
            other => Err(ConfigError::InvalidValue {
                field: "sync.default_strategy".into(),
                detail: format!("unknown strategy '{}' (expected merge, rebase or auto)", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncConfig {
    /// Strategy used when the caller does not pick one.
    #[serde(default)]
    pub default_strategy: SyncStrategy,
}

// ---------------------------------------------------------------------------
// Advice
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdviceConfig {
    /// Branches with at most this many unique commits earn a rebase point.
    #[serde(default = "default_rebase_threshold")]
    pub rebase_threshold: u32,

    /// Whether branch age contributes to the decision.
    #[serde(default = "default_true")]
    pub consider_branch_age: bool,

    /// Glob patterns pinning a branch to `merge`.
    #[serde(default)]
    pub force_merge_patterns: Vec<String>,

    /// Glob patterns pinning a branch to `rebase`.
    #[serde(default)]
    pub force_rebase_patterns: Vec<String>,
}

fn default_rebase_threshold() -> u32 {
    5
}
fn default_true() -> bool {
    true
}

impl Default for AdviceConfig {
    fn default() -> Self {
        Self {
            rebase_threshold: default_rebase_threshold(),
            consider_branch_age: true,
            force_merge_patterns: Vec::new(),
            force_rebase_patterns: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Conflict detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConflictDetectionConfig {
    /// Keep per-file diff text in conflict reports.
    #[serde(default = "default_true")]
    pub show_diff: bool,
}

impl Default for ConflictDetectionConfig {
    fn default() -> Self {
        Self { show_diff: true }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

/// Section names, longest first so `conflict_detection` wins over shorter
/// prefixes when splitting environment variable names.
const SECTIONS: &[&str] = &["conflict_detection", "general", "advice", "clean", "sync"];

impl BranchwiseConfig {
    /// Load the layered configuration for a repository: defaults, global
    /// file, repository file, then environment overrides. The result is
    /// validated.
    pub fn load_layered(repo_root: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(global) = global_config_path() {
            if global.exists() {
                config.merge_file(&global)?;
            }
        }

        if let Some(root) = repo_root {
            let repo_file = root.join(REPO_CONFIG_FILE);
            if repo_file.exists() {
                config.merge_file(&repo_file)?;
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay the keys present in `path` on top of the current values.
    pub fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        info!(path = %path.display(), "merging configuration file");
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let overlay: toml::Table =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        let mut base = self.to_table()?;
        merge_tables(&mut base, overlay);
        *self = Self::from_table(base)?;
        Ok(())
    }

    /// Apply `BRANCHWISE_<SECTION>_<KEY>` variables from the process
    /// environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_env_overrides_from(std::env::vars())
    }

    /// Apply overrides from an explicit set of `(name, value)` pairs.
    ///
    /// Values are parsed as TOML (`true`, `42`, `["a", "b"]`), falling back to
    /// a plain string. Variables naming an unknown section are ignored.
    pub fn apply_env_overrides_from<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut table = self.to_table()?;
        let mut applied = 0usize;

        for (name, raw) in vars {
            let Some(rest) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let rest = rest.to_ascii_lowercase();
            let Some((section, key)) = split_section_key(&rest) else {
                warn!(var = %name, "ignoring override for unknown configuration section");
                continue;
            };

            let entry = table
                .entry(section.to_string())
                .or_insert_with(|| toml::Value::Table(toml::Table::new()));
            let Some(section_table) = entry.as_table_mut() else {
                continue;
            };
            if !section_table.contains_key(key) {
                warn!(var = %name, section, key, "override names an unknown key");
            }
            section_table.insert(key.to_string(), parse_env_value(&raw));
            debug!(var = %name, section, key, "applied environment override");
            applied += 1;
        }

        if applied > 0 {
            *self = Self::from_table(table)?;
        }
        Ok(())
    }

    /// Validate that all values are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.general.main_branch.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "general.main_branch".into(),
                detail: "main branch must not be empty".into(),
            });
        }
        if self.general.remote.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "general.remote".into(),
                detail: "remote name must not be empty".into(),
            });
        }
        if self.advice.rebase_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "advice.rebase_threshold".into(),
                detail: "rebase threshold must be > 0".into(),
            });
        }
        if let Some(dup) = self
            .advice
            .force_merge_patterns
            .iter()
            .find(|p| self.advice.force_rebase_patterns.contains(p))
        {
            return Err(ConfigError::InvalidValue {
                field: "advice.force_rebase_patterns".into(),
                detail: format!("pattern '{}' is also listed in force_merge_patterns", dup),
            });
        }

        Ok(())
    }

    /// Look up a value by dotted key, e.g. `advice.rebase_threshold`.
    pub fn get_value(&self, dotted_key: &str) -> Option<toml::Value> {
        let table = self.to_table().ok()?;
        let mut parts = dotted_key.split('.');
        let mut current = table.get(parts.next()?)?.clone();
        for part in parts {
            current = current.as_table()?.get(part)?.clone();
        }
        Some(current)
    }

    /// The integration branch name.
    pub fn main_branch(&self) -> &str {
        &self.general.main_branch
    }

    /// Render the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// A commented default configuration file.
    pub fn default_toml() -> &'static str {
        DEFAULT_CONFIG_TOML
    }

    fn to_table(&self) -> Result<toml::Table, ConfigError> {
        match toml::Value::try_from(self) {
            Ok(toml::Value::Table(table)) => Ok(table),
            Ok(_) => Err(ConfigError::ParseError("configuration is not a table".into())),
            Err(e) => Err(ConfigError::ParseError(e.to_string())),
        }
    }

    fn from_table(table: toml::Table) -> Result<Self, ConfigError> {
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError(e.to_string()))
    }
}

/// Path of the user-wide configuration file, if a config dir exists.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("branchwise").join("config.toml"))
}

fn split_section_key(rest: &str) -> Option<(&'static str, &str)> {
    SECTIONS.iter().find_map(|section| {
        rest.strip_prefix(section)
            .and_then(|r| r.strip_prefix('_'))
            .filter(|key| !key.is_empty())
            .map(|key| (*section, key))
    })
}

fn parse_env_value(raw: &str) -> toml::Value {
    let doc = format!("v = {}", raw);
    match toml::from_str::<toml::Table>(&doc) {
        Ok(mut t) => t.remove("v").unwrap_or_else(|| toml::Value::String(raw.to_string())),
        Err(_) => toml::Value::String(raw.to_string()),
    }
}

/// Recursively overlay `overlay` onto `base`; tables merge, everything else
/// replaces.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

const DEFAULT_CONFIG_TOML: &str = r#"# branchwise configuration

[general]
# Integration branch other branches are measured and synchronized against.
main_branch = "main"
remote = "origin"

[clean]
# Never offered for cleanup.
exclude_branches = ["develop", "staging"]
# Keep merged branches whose last commit is younger than this (days, 0 = off).
age_threshold = 30

[sync]
# merge, rebase or auto
default_strategy = "auto"

[advice]
# Branches with at most this many unique commits lean towards rebase.
rebase_threshold = 5
consider_branch_age = true
force_merge_patterns = []
force_rebase_patterns = []

[conflict_detection]
show_diff = true
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[general]
main_branch = "trunk"

[clean]
exclude_branches = ["develop"]
age_threshold = 14

[sync]
default_strategy = "rebase"

[advice]
rebase_threshold = 3
force_merge_patterns = ["release/*"]
force_rebase_patterns = ["fix/*"]

[conflict_detection]
show_diff = false
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: BranchwiseConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.main_branch(), "trunk");
        assert_eq!(config.general.remote, "origin");
        assert_eq!(config.clean.age_threshold, 14);
        assert_eq!(config.sync.default_strategy, SyncStrategy::Rebase);
        assert_eq!(config.advice.force_merge_patterns, vec!["release/*"]);
        assert!(!config.conflict_detection.show_diff);
    }

    #[test]
    fn test_defaults() {
        let config: BranchwiseConfig = toml::from_str("").unwrap();
        assert_eq!(config, BranchwiseConfig::default());
        assert_eq!(config.main_branch(), "main");
        assert_eq!(config.clean.exclude_branches, vec!["develop", "staging"]);
        assert_eq!(config.clean.age_threshold, 30);
        assert_eq!(config.sync.default_strategy, SyncStrategy::Auto);
        assert_eq!(config.advice.rebase_threshold, 5);
        assert!(config.advice.force_merge_patterns.is_empty());
    }

    #[test]
    fn test_default_toml_matches_defaults() {
        let parsed: BranchwiseConfig = toml::from_str(BranchwiseConfig::default_toml()).unwrap();
        assert_eq!(parsed, BranchwiseConfig::default());
    }

    #[test]
    fn test_merge_full_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let mut config = BranchwiseConfig::default();
        config.merge_file(&path).expect("merge_file failed");
        assert_eq!(config.advice.rebase_threshold, 3);
        assert_eq!(config.main_branch(), "trunk");
    }

    #[test]
    fn test_file_not_found() {
        let mut config = BranchwiseConfig::default();
        let result = config.merge_file(Path::new("/nonexistent/branchwise.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
        assert_eq!(config, BranchwiseConfig::default());
    }

    #[test]
    fn test_merge_file_keeps_unset_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(REPO_CONFIG_FILE);
        std::fs::write(&path, "[advice]\nrebase_threshold = 8\n").unwrap();

        let mut config = BranchwiseConfig::default();
        config.general.main_branch = "develop".into();
        config.merge_file(&path).unwrap();

        assert_eq!(config.advice.rebase_threshold, 8);
        assert_eq!(config.main_branch(), "develop");
        assert!(config.advice.consider_branch_age);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = BranchwiseConfig::default();
        config
            .apply_env_overrides_from(vec![
                ("BRANCHWISE_GENERAL_MAIN_BRANCH".to_string(), "master".to_string()),
                ("BRANCHWISE_ADVICE_REBASE_THRESHOLD".to_string(), "9".to_string()),
                (
                    "BRANCHWISE_ADVICE_FORCE_MERGE_PATTERNS".to_string(),
                    r#"["release/*", "hotfix/*"]"#.to_string(),
                ),
                ("BRANCHWISE_CONFLICT_DETECTION_SHOW_DIFF".to_string(), "false".to_string()),
                ("BRANCHWISE_SYNC_DEFAULT_STRATEGY".to_string(), "merge".to_string()),
                ("BRANCHWISE_NOPE_X".to_string(), "1".to_string()),
                ("UNRELATED".to_string(), "1".to_string()),
            ])
            .unwrap();

        assert_eq!(config.main_branch(), "master");
        assert_eq!(config.advice.rebase_threshold, 9);
        assert_eq!(config.advice.force_merge_patterns, vec!["release/*", "hotfix/*"]);
        assert!(!config.conflict_detection.show_diff);
        assert_eq!(config.sync.default_strategy, SyncStrategy::Merge);
    }

    #[test]
    fn test_env_override_bad_type_is_error() {
        let mut config = BranchwiseConfig::default();
        let result = config.apply_env_overrides_from(vec![(
            "BRANCHWISE_CLEAN_AGE_THRESHOLD".to_string(),
            "soon".to_string(),
        )]);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_validate_rejects_empty_main_branch() {
        let mut config = BranchwiseConfig::default();
        config.general.main_branch = " ".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "general.main_branch"
        ));
    }

    #[test]
    fn test_validate_rejects_pattern_in_both_lists() {
        let mut config = BranchwiseConfig::default();
        config.advice.force_merge_patterns = vec!["release/*".into()];
        config.advice.force_rebase_patterns = vec!["release/*".into()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "advice.force_rebase_patterns"
        ));
    }

    #[test]
    fn test_get_value() {
        let config: BranchwiseConfig = toml::from_str(sample_toml()).unwrap();
        assert_eq!(
            config.get_value("general.main_branch"),
            Some(toml::Value::String("trunk".into()))
        );
        assert_eq!(
            config.get_value("advice.rebase_threshold"),
            Some(toml::Value::Integer(3))
        );
        assert_eq!(config.get_value("advice.nope"), None);
        assert_eq!(config.get_value("nope"), None);
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("Rebase".parse::<SyncStrategy>().unwrap(), SyncStrategy::Rebase);
        assert!("squash".parse::<SyncStrategy>().is_err());
    }
}
