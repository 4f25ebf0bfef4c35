//! Permission audit entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::permissions::{PermissionAction, PermissionDecision};

/// One recorded permission decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionAudit {
    /// Tool the decision was made for
    pub tool: String,
    /// Target derived from the call parameters
    pub target: String,
    /// Rule that matched (empty when no policy is configured)
    pub rule: String,
    /// Decided action
    pub action: PermissionAction,
    /// When the decision was made
    pub timestamp: DateTime<Utc>,
}

impl PermissionAudit {
    /// Record a decision as of now
    pub fn from_decision(decision: &PermissionDecision) -> Self {
        Self {
            tool: decision.tool.clone(),
            target: decision.target.clone(),
            rule: decision.rule.clone(),
            action: decision.action,
            timestamp: Utc::now(),
        }
    }
}
