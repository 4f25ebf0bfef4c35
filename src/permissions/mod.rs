//! Permission rules for tool calls
//!
//! This module provides a three-tier rule system evaluated per tool call:
//! - **Deny**: checked first, any match rejects the call
//! - **Ask**: checked second, any match requires human approval
//! - **Allow**: checked last, any match lets the call through
//!
//! When no rule matches, the decision is `Unknown` and the caller chooses how
//! to treat it (see [`UnknownPolicy`]).
//!
//! ## Rule Syntax
//!
//! - `src/**` - a path glob (contains `/` or `.`), applies to every tool
//! - `Read`, `mcp__*`, `regex:^web` - a tool name, applies to every target
//! - `Bash(ls:*)`, `bash(regex:^rm:)` - a tool name plus a target pattern
//!
//! ## Example
//!
//! ```rust
//! use serde_json::json;
//! use shadow_guard::permissions::{PermissionAction, PermissionMatcher};
//! use shadow_guard::settings::PermissionsConfig;
//!
//! let config = PermissionsConfig::new()
//!     .allow("Bash(ls:*)")
//!     .deny("bash(regex:^rm:)");
//! let matcher = PermissionMatcher::from_config(&config).unwrap();
//!
//! let decision = matcher.evaluate("Bash", &json!({"command": "rm /tmp"}));
//! assert_eq!(decision.action, PermissionAction::Deny);
//! ```

mod decision;
mod matcher;
mod rule;

pub use decision::{PermissionAction, PermissionDecision, UnknownPolicy};
pub use matcher::{derive_target, evaluate, PermissionMatcher};
pub use rule::{glob_to_regex, CompiledRule, Pattern};
