//! Permission decision types

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of evaluating a tool call against the rule tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionAction {
    /// Proceed without asking
    Allow,
    /// Human approval required
    Ask,
    /// Reject the call
    Deny,
    /// No rule in any tier matched
    Unknown,
}

impl fmt::Display for PermissionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PermissionAction::Allow => "allow",
            PermissionAction::Ask => "ask",
            PermissionAction::Deny => "deny",
            PermissionAction::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// How an `Unknown` decision is treated by [`PermissionDecision::effective_action`]
///
/// `Allow` (fail-open) keeps compatibility with hosts that configure no
/// rules. New deployments that want fail-closed behaviour should pick `Ask`
/// or `Deny`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownPolicy {
    /// Fail open
    #[default]
    Allow,
    /// Route unmatched calls through approval
    Ask,
    /// Fail closed
    Deny,
}

impl UnknownPolicy {
    /// The action an unmatched call resolves to
    pub fn action(self) -> PermissionAction {
        match self {
            UnknownPolicy::Allow => PermissionAction::Allow,
            UnknownPolicy::Ask => PermissionAction::Ask,
            UnknownPolicy::Deny => PermissionAction::Deny,
        }
    }
}

/// Result of matching one tool call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDecision {
    /// What to do with the call
    pub action: PermissionAction,
    /// Source text of the matching rule (empty if none matched)
    pub rule: String,
    /// Tool name as given by the caller
    pub tool: String,
    /// Target string derived from the tool parameters
    pub target: String,
}

impl PermissionDecision {
    /// Create a decision
    pub fn new(
        action: PermissionAction,
        rule: impl Into<String>,
        tool: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            action,
            rule: rule.into(),
            tool: tool.into(),
            target: target.into(),
        }
    }

    /// Allow decision not backed by any rule
    pub fn allow(tool: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(PermissionAction::Allow, "", tool, target)
    }

    /// Decision for a call no rule matched
    pub fn unknown(tool: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(PermissionAction::Unknown, "", tool, target)
    }

    /// Whether a rule matched
    pub fn is_known(&self) -> bool {
        self.action != PermissionAction::Unknown
    }

    /// Resolve `Unknown` according to the policy
    pub fn effective_action(&self, policy: UnknownPolicy) -> PermissionAction {
        match self.action {
            PermissionAction::Unknown => policy.action(),
            action => action,
        }
    }
}
