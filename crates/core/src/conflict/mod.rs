//! Conflict prediction.
//!
//! 1. **Detection** -- trial-merging two branches in a disposable clone.
//! 2. **Analysis** -- classifying each conflicting file by type and severity
//!    and deriving resolution advice.

pub mod analysis;
pub mod detector;

pub use analysis::{ConflictType, DiffAnalysis, Severity};
pub use detector::{ConflictDetector, ConflictReport, FileConflict};
