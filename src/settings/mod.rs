//! Settings consumed by the sandbox
//!
//! The sandbox only needs the permission rule lists out of the host
//! application's settings. This module provides:
//! - `PermissionsConfig` / `Settings` - the serde value objects
//! - `SettingsLoader` - the seam the sandbox calls to obtain them
//! - `FileSettingsLoader` - layered JSON files (user, project, project-local)

mod loader;

pub use loader::{FileSettingsLoader, NoSettings, SettingsLoader};

use serde::{Deserialize, Serialize};

/// Allow/ask/deny permission rule lists
///
/// Each entry uses the textual rule grammar understood by
/// [`PermissionMatcher`](crate::permissions::PermissionMatcher):
/// `src/**`, `Read`, `Bash(ls:*)`, `bash(regex:^rm:)` ...
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionsConfig {
    /// Rules that permit a call without asking
    #[serde(default)]
    pub allow: Vec<String>,

    /// Rules that require human approval
    #[serde(default)]
    pub ask: Vec<String>,

    /// Rules that always reject
    #[serde(default)]
    pub deny: Vec<String>,
}

impl PermissionsConfig {
    /// Create an empty config
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an allow rule
    pub fn allow(mut self, rule: impl Into<String>) -> Self {
        self.allow.push(rule.into());
        self
    }

    /// Add an ask rule
    pub fn ask(mut self, rule: impl Into<String>) -> Self {
        self.ask.push(rule.into());
        self
    }

    /// Add a deny rule
    pub fn deny(mut self, rule: impl Into<String>) -> Self {
        self.deny.push(rule.into());
        self
    }

    /// Whether no rules are configured
    pub fn is_empty(&self) -> bool {
        self.allow.is_empty() && self.ask.is_empty() && self.deny.is_empty()
    }

    /// Append another layer's rules, skipping duplicates
    pub fn merge(&mut self, other: PermissionsConfig) {
        fn extend_unique(into: &mut Vec<String>, from: Vec<String>) {
            for rule in from {
                if !into.contains(&rule) {
                    into.push(rule);
                }
            }
        }

        extend_unique(&mut self.allow, other.allow);
        extend_unique(&mut self.ask, other.ask);
        extend_unique(&mut self.deny, other.deny);
    }
}

/// The slice of application settings the sandbox reads
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Permission rules; `None` means no policy is configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<PermissionsConfig>,
}

impl Settings {
    /// Create settings with a permissions block
    pub fn with_permissions(permissions: PermissionsConfig) -> Self {
        Self {
            permissions: Some(permissions),
        }
    }

    /// Merge a later (higher precedence) layer into this one
    pub fn merge(&mut self, other: Settings) {
        match (&mut self.permissions, other.permissions) {
            (Some(current), Some(next)) => current.merge(next),
            (None, Some(next)) => self.permissions = Some(next),
            (_, None) => {}
        }
    }
}
