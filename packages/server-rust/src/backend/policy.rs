//! Per-backend tool allow/deny policy.

use serde::{Deserialize, Serialize};

/// Which of a backend's tools the relay exposes.
///
/// A non-empty `allow` list is authoritative: only the tools it names are
/// permitted and `deny` is ignored. Otherwise every tool not named in `deny`
/// is permitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPolicy {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

impl ToolPolicy {
    #[must_use]
    pub fn is_allowed(&self, tool: &str) -> bool {
        if !self.allow.is_empty() {
            return self.allow.iter().any(|allowed| allowed == tool);
        }
        !self.deny.iter().any(|denied| denied == tool)
    }

    /// Returns `true` when the policy permits every tool.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.allow.is_empty() && self.deny.is_empty()
    }
}
