//! Core types shared by the security components
//!
//! - `SecurityError` / `SecurityResult` - error types
//! - `PermissionAudit` - audit log entries kept by the sandbox

pub mod audit;
pub mod error;

pub use audit::PermissionAudit;
pub use error::{SecurityError, SecurityResult};
