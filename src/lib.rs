pub mod core;
pub mod permissions;
pub mod security;
pub mod settings;

// Human-in-the-loop approvals for the ask tier
pub mod approval;

// Optional subscriber setup for hosts without their own
pub mod logging;

pub use crate::approval::{ApprovalQueue, ApprovalRecord, ApprovalState};
pub use crate::core::{PermissionAudit, SecurityError, SecurityResult};
pub use crate::permissions::{PermissionAction, PermissionDecision, PermissionMatcher, UnknownPolicy};
pub use crate::security::{PathResolver, Sandbox, Validator};
pub use crate::settings::{FileSettingsLoader, PermissionsConfig, Settings, SettingsLoader};
