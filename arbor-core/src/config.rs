//! Runtime configuration.

use serde::{Deserialize, Serialize};

/// Default limit on flush passes per transaction.
pub const DEFAULT_MAX_FLUSH_PASSES: usize = 64;

/// Default limit on tree depth.
pub const DEFAULT_MAX_DEPTH: usize = 100_000;

/// Tunables for a tree.
///
/// Every field has a default, so partial JSON is accepted:
///
/// ```
/// let config = arbor_core::RuntimeConfig::from_json(r#"{ "name": "todos" }"#).unwrap();
/// assert_eq!(config.name, "todos");
/// assert_eq!(config.max_flush_passes, 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Label attached to the tree's tracing spans.
    pub name: String,
    /// Flush passes a transaction may take before it is reported as
    /// [`TreeError::Unstable`](crate::TreeError::Unstable).
    pub max_flush_passes: usize,
    /// Deepest level a route may attach at.
    pub max_depth: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            name: "arbor".to_string(),
            max_flush_passes: DEFAULT_MAX_FLUSH_PASSES,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Set the span label.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the flush pass limit.
    #[must_use]
    pub fn with_max_flush_passes(mut self, passes: usize) -> Self {
        self.max_flush_passes = passes;
        self
    }

    /// Set the depth limit.
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }
}
