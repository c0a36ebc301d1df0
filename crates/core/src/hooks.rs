//! Extension points invoked by the core components.
//!
//! A [`HookRegistry`] maps each [`HookPoint`] to an ordered list of callables.
//! Every callable receives a JSON payload and may return `Some(value)` to
//! override the component's own result, or `None` to leave it alone. When
//! several hooks answer, the last answer wins.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;
use tracing::debug;

/// Named points where hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// Payload `{"branches": [...]}`. May return the list of names to clean.
    PreBranchClean,
    /// Payload: the cleanup report.
    PostBranchClean,
    /// Payload `{"branch", "target", "strategy"}`. May return a strategy.
    PreSync,
    /// Payload: the sync outcome.
    PostSync,
    /// Payload: the conflict report. May return replacement suggestions.
    ConflictResolution,
    /// Payload: the strategy advice. May return `"merge"` or `"rebase"`.
    BranchStrategy,
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PreBranchClean => "pre_branch_clean",
            Self::PostBranchClean => "post_branch_clean",
            Self::PreSync => "pre_sync",
            Self::PostSync => "post_sync",
            Self::ConflictResolution => "conflict_resolution",
            Self::BranchStrategy => "branch_strategy",
        };
        f.write_str(name)
    }
}

/// A registered hook.
pub type HookFn = Box<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// Registry of hooks, shared between components through an `Arc`.
#[derive(Default)]
pub struct HookRegistry {
    hooks: HashMap<HookPoint, Vec<HookFn>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `hook` to the hooks run at `point`.
    pub fn register<F>(&mut self, point: HookPoint, hook: F)
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.hooks.entry(point).or_default().push(Box::new(hook));
    }

    /// Run every hook registered at `point` in registration order and return
    /// the last override, if any.
    pub fn run(&self, point: HookPoint, payload: &Value) -> Option<Value> {
        let hooks = self.hooks.get(&point)?;
        let mut result = None;
        for (index, hook) in hooks.iter().enumerate() {
            if let Some(value) = hook(payload) {
                debug!(%point, index, "hook returned an override");
                result = Some(value);
            }
        }
        result
    }

    /// Number of hooks registered at `point`.
    pub fn count(&self, point: HookPoint) -> usize {
        self.hooks.get(&point).map_or(0, Vec::len)
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (point, hooks) in &self.hooks {
            map.entry(point, &hooks.len());
        }
        map.finish()
    }
}
