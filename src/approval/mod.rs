//! Human-in-the-loop approvals for the ask tier
//!
//! This module provides:
//! - `ApprovalRecord` / `ApprovalState` - one request and its lifecycle
//! - `ApprovalStore` - the JSON snapshot on disk, replaced atomically
//! - `ApprovalQueue` - the shared state machine with session whitelisting
//!
//! The queue does not depend on the sandbox; the tool executor drives it
//! when a permission check comes back `Ask`.

mod queue;
mod record;
mod store;

pub use queue::{ApprovalQueue, WHITELIST_REASON};
pub use record::{ApprovalRecord, ApprovalState};
pub use store::{ApprovalSnapshot, ApprovalStore};
