//! Security error types

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Errors produced by the security layer
#[derive(Error, Debug)]
pub enum SecurityError {
    /// A required input (command, path, session id, ...) was empty
    #[error("{0} must not be empty")]
    EmptyInput(&'static str),

    /// Command is longer than the configured byte limit
    #[error("command exceeds {limit} bytes")]
    CommandTooLong { limit: usize },

    /// Command contains a control character other than tab/newline/carriage return
    #[error("command contains control character {0:?}")]
    ControlCharacter(char),

    /// Command contains a shell metacharacter while metacharacters are disabled
    #[error("shell metacharacter {0:?} is not allowed")]
    ShellMetacharacter(char),

    /// Quote opened but never closed
    #[error("unterminated quote in command")]
    UnterminatedQuote,

    /// Command ends with an unescaped backslash
    #[error("trailing escape in command")]
    TrailingEscape,

    /// Too many tokens after splitting
    #[error("command has {count} tokens, limit is {limit}")]
    TooManyTokens { count: usize, limit: usize },

    /// First token is on the banned command table
    #[error("command {command:?} is banned: {reason}")]
    BannedCommand {
        command: String,
        reason: &'static str,
    },

    /// Command contains a banned fragment
    #[error("command contains banned pattern {0:?}")]
    BannedFragment(&'static str),

    /// An argument contains a banned substring
    #[error("argument {argument:?} contains banned pattern {pattern:?}")]
    BannedArgument {
        argument: String,
        pattern: &'static str,
    },

    /// Command rejected by the sandbox
    #[error("security: {0}")]
    CommandRejected(#[source] Box<SecurityError>),

    /// Path contains a `..` segment
    #[error("path traversal rejected: {0}")]
    PathTraversal(PathBuf),

    /// A component of the path is a symlink
    #[error("symlink rejected: {0}")]
    SymlinkRejected(PathBuf),

    /// Path has more components than the resolver allows
    #[error("path exceeds max depth {limit}: {path}")]
    MaxDepthExceeded { path: PathBuf, limit: usize },

    /// Stat/open failed for a reason other than the entry not existing
    #[error("inspect {path}: {source}")]
    PathInspect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Path resolved outside every allow-list entry
    #[error("path not allowed: {0}")]
    PathNotAllowed(PathBuf),

    /// Permission rule has bad syntax
    #[error("invalid permission rule {rule:?}: {reason}")]
    InvalidRule { rule: String, reason: String },

    /// Permission rule carries a regex that does not compile
    #[error("invalid regex in permission rule {rule:?}: {source}")]
    InvalidRegex {
        rule: String,
        #[source]
        source: regex::Error,
    },

    /// Settings file could not be decoded
    #[error("security: decode settings {path}: {source}")]
    InvalidSettings {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Loading permissions failed; the failure is memoised and shared
    #[error("security: load permissions: {0}")]
    PermissionLoad(#[source] Arc<SecurityError>),

    /// No approval record with this id
    #[error("approval {0} not found")]
    ApprovalNotFound(String),

    /// Record is already approved and cannot be denied
    #[error("approval {0} already approved")]
    AlreadyApproved(String),

    /// Record is already denied and cannot be approved
    #[error("approval {0} already denied")]
    AlreadyDenied(String),

    /// Reading or writing the approval store failed
    #[error("security: {action} approval store {path}: {source}")]
    Persistence {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Approval store exists but is not a valid snapshot
    #[error("security: decode approval store {path}: {source}")]
    CorruptStore {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Snapshot could not be encoded for the approval store
    #[error("security: encode approval store {path}: {source}")]
    EncodeStore {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A waiter was cancelled before the record was resolved
    #[error("wait for approval {0} cancelled")]
    Cancelled(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SecurityError {
    /// Create an invalid rule error
    pub fn invalid_rule(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        SecurityError::InvalidRule {
            rule: rule.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a stat/open failure with the offending path
    pub fn inspect(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SecurityError::PathInspect {
            path: path.into(),
            source,
        }
    }

    /// Whether this is (or wraps) the path allow-list rejection
    pub fn is_path_not_allowed(&self) -> bool {
        matches!(self, SecurityError::PathNotAllowed(_))
    }

    /// Whether the error came from a policy decision on a command
    pub fn is_command_rejection(&self) -> bool {
        matches!(self, SecurityError::CommandRejected(_))
    }
}

/// Result type alias for security operations
pub type SecurityResult<T> = Result<T, SecurityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SecurityError::ApprovalNotFound("abc123".into());
        assert_eq!(err.to_string(), "approval abc123 not found");

        let err = SecurityError::CommandRejected(Box::new(SecurityError::UnterminatedQuote));
        assert_eq!(err.to_string(), "security: unterminated quote in command");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SecurityError = io_err.into();
        assert!(matches!(err, SecurityError::Io(_)));
    }

    #[test]
    fn test_path_not_allowed_sentinel() {
        let err = SecurityError::PathNotAllowed(PathBuf::from("/etc/passwd"));
        assert!(err.is_path_not_allowed());
        assert!(err.to_string().contains("/etc/passwd"));
        assert!(!SecurityError::EmptyInput("path").is_path_not_allowed());
    }

    #[test]
    fn test_memoised_load_error_is_shared() {
        let inner = Arc::new(SecurityError::invalid_rule("Bash(", "unbalanced parentheses"));
        let first = SecurityError::PermissionLoad(inner.clone());
        let second = SecurityError::PermissionLoad(inner);
        assert_eq!(first.to_string(), second.to_string());
        assert!(first.to_string().starts_with("security: load permissions"));
    }
}
