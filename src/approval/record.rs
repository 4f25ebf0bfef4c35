//! Approval record types

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of an approval request
///
/// `Pending` moves to `Approved` or `Denied`; both are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalState {
    /// Waiting for a human decision
    #[default]
    Pending,
    /// Allowed to run
    Approved,
    /// Rejected
    Denied,
}

impl ApprovalState {
    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalState::Pending)
    }
}

impl fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ApprovalState::Pending => "pending",
            ApprovalState::Approved => "approved",
            ApprovalState::Denied => "denied",
        };
        f.write_str(name)
    }
}

/// One human-in-the-loop approval request
///
/// Records are never deleted; resolved records stay in the store as an
/// audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    // --- Identity ---
    /// Unique record ID
    pub id: String,

    /// Session that asked for approval
    pub session_id: String,

    // --- Request ---
    /// Command awaiting approval
    pub command: String,

    /// Absolute paths the command touches
    #[serde(default)]
    pub paths: Vec<PathBuf>,

    // --- Resolution ---
    /// Current state
    pub state: ApprovalState,

    /// Who approved or denied the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver: Option<String>,

    /// Free-form explanation (deny reason, auto-approval marker)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Set when the record was approved through the session whitelist
    #[serde(default)]
    pub auto_approved: bool,

    // --- Timestamps ---
    /// When the request was made
    pub requested_at: DateTime<Utc>,

    /// When the request was approved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,

    /// When the session whitelist granted with this approval runs out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ApprovalRecord {
    /// Create a pending record with a fresh ID
    pub fn new(session_id: impl Into<String>, command: impl Into<String>, paths: Vec<PathBuf>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            command: command.into(),
            paths,
            state: ApprovalState::Pending,
            approver: None,
            reason: None,
            auto_approved: false,
            requested_at: Utc::now(),
            approved_at: None,
            expires_at: None,
        }
    }

    /// Whether the record is still waiting for a decision
    pub fn is_pending(&self) -> bool {
        self.state == ApprovalState::Pending
    }
}
