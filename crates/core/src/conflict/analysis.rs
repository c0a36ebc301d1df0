//! Classification of conflicting files and advice derived from a conflict set.

use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use diffy::Line;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use super::detector::FileConflict;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// What kind of file a conflict is in, derived from its extension.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictType {
    SourceCode,
    Configuration,
    Documentation,
    WebInterface,
    Other,
}

const SOURCE_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "jsx", "tsx", "java", "c", "h", "cpp", "hpp", "cc", "go", "rb", "rs", "cs",
    "kt", "swift", "php", "scala",
];
const CONFIG_EXTENSIONS: &[&str] = &["json", "xml", "yaml", "yml", "toml", "ini", "cfg", "conf"];
const DOC_EXTENSIONS: &[&str] = &["md", "txt", "rst", "adoc"];
const WEB_EXTENSIONS: &[&str] = &["html", "htm", "css", "scss", "less"];

impl ConflictType {
    pub fn from_path(path: &str) -> Self {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let ext = ext.as_str();

        if SOURCE_EXTENSIONS.contains(&ext) {
            Self::SourceCode
        } else if CONFIG_EXTENSIONS.contains(&ext) {
            Self::Configuration
        } else if DOC_EXTENSIONS.contains(&ext) {
            Self::Documentation
        } else if WEB_EXTENSIONS.contains(&ext) {
            Self::WebInterface
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceCode => write!(f, "source-code"),
            Self::Configuration => write!(f, "configuration"),
            Self::Documentation => write!(f, "documentation"),
            Self::WebInterface => write!(f, "web-interface"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// How hard a conflict is likely to be to resolve.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Severity from the number of changed lines alone.
    pub fn from_line_count(lines: usize) -> Self {
        match lines {
            0..=5 => Self::Low,
            6..=20 => Self::Medium,
            _ => Self::High,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

// ---------------------------------------------------------------------------
// Diff analysis
// ---------------------------------------------------------------------------

static IMPORT_PATTERN: OnceLock<Regex> = OnceLock::new();
static SIGNATURE_PATTERN: OnceLock<Regex> = OnceLock::new();

fn import_pattern() -> &'static Regex {
    IMPORT_PATTERN.get_or_init(|| {
        Regex::new(
            r#"^\s*(?:import\s+\S|from\s+\S+\s+import\s|#include\s*[<"]|use\s+[\w:]+|extern\s+crate\s)|\brequire(?:_once)?\s*\("#,
        )
        .expect("import pattern is valid")
    })
}

fn signature_pattern() -> &'static Regex {
    SIGNATURE_PATTERN.get_or_init(|| {
        Regex::new(
            r"^\s*(?:(?:pub(?:\([^)]*\))?|export|public|private|protected|static|async|abstract|final|default|unsafe)\s+)*(?:fn|def|function|class|struct|enum|trait|impl|interface)\b",
        )
        .expect("signature pattern is valid")
    })
}

/// Line-level comparison of the two sides of a conflicting file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffAnalysis {
    /// Unified diff from the target's version to the source's version.
    pub patch: String,
    /// Inserted plus deleted lines.
    pub modified_lines: usize,
    /// A changed line adds or removes an import/require.
    pub touches_imports: bool,
    /// A changed line is a function, class or type signature.
    pub touches_signatures: bool,
}

impl DiffAnalysis {
    pub fn between(target: &str, source: &str) -> Self {
        let patch = diffy::create_patch(target, source);
        let mut modified_lines = 0;
        let mut touches_imports = false;
        let mut touches_signatures = false;

        for hunk in patch.hunks() {
            for line in hunk.lines() {
                let text = match line {
                    Line::Insert(text) | Line::Delete(text) => *text,
                    Line::Context(_) => continue,
                };
                modified_lines += 1;
                touches_imports |= import_pattern().is_match(text);
                touches_signatures |= signature_pattern().is_match(text);
            }
        }

        Self {
            patch: patch.to_string(),
            modified_lines,
            touches_imports,
            touches_signatures,
        }
    }

    /// Line-count severity, raised to high for import or signature changes.
    pub fn severity(&self) -> Severity {
        if self.touches_imports || self.touches_signatures {
            Severity::High
        } else {
            Severity::from_line_count(self.modified_lines)
        }
    }
}

// ---------------------------------------------------------------------------
// Suggestions
// ---------------------------------------------------------------------------

/// Resolution advice scaled to the number and severity of `conflicts`.
pub fn suggestions_for(conflicts: &[FileConflict], target: &str) -> Vec<String> {
    let total = conflicts.len();
    if total == 0 {
        return Vec::new();
    }

    let high = conflicts
        .iter()
        .filter(|c| c.severity == Severity::High)
        .count();
    let config = conflicts
        .iter()
        .filter(|c| c.conflict_type == ConflictType::Configuration)
        .count();

    let mut suggestions = Vec::new();

    if high == total {
        suggestions.push(
            "All conflicts are high severity. Work through the files one at a time and commit \
             incremental changes."
                .to_string(),
        );
    } else if high > 0 {
        suggestions.push(format!(
            "{} high-severity conflict(s) detected. Resolve the less critical files first.",
            high
        ));
    }

    if config > 0 {
        suggestions.push(format!(
            "Conflicts in {} configuration file(s). Review those changes carefully to avoid \
             compatibility problems.",
            config
        ));
    }

    if total > 5 {
        suggestions.push(format!(
            "High number of conflicts ({}). Consider splitting this branch into smaller branches \
             and merging them separately.",
            total
        ));
    }

    suggestions.push(format!(
        "Sync your branch with '{}' regularly to keep future conflicts small.",
        target
    ));

    if high * 2 > total {
        suggestions.push(
            "Given the severity of these conflicts, prefer 'merge' over 'rebase' to keep the \
             history of the changes."
                .to_string(),
        );
    } else {
        suggestions.push(
            "For these conflicts 'rebase' can keep the history cleaner.".to_string(),
        );
    }

    suggestions
}
