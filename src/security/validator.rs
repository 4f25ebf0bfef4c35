//! Shell command validation
//!
//! The validator never runs anything. It rejects commands that are malformed,
//! oversized, injection-prone or known to be destructive:
//! - control characters and (unless enabled) shell metacharacters
//! - unterminated quotes / trailing escapes
//! - banned commands (`dd`, `mkfs`, `sudo`, ...) by basename
//! - banned fragments (`rm -rf`, `--no-preserve-root`, ...) anywhere in the string
//! - banned argument substrings (`/dev/`, `../`, ...)

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::core::{SecurityError, SecurityResult};

/// Default byte limit for a single command
pub const DEFAULT_MAX_COMMAND_BYTES: usize = 4096;
/// Default limit on tokens after splitting
pub const DEFAULT_MAX_TOKENS: usize = 64;

/// Characters that enable pipelines, chaining, redirection or substitution
const SHELL_METACHARS: &[char] = &['|', ';', '&', '>', '<', '`', '$'];

/// Commands that are never allowed, with the reason reported to the caller
const BANNED_COMMANDS: &[(&str, &str)] = &[
    ("dd", "raw disk writes can destroy data"),
    ("mkfs", "formatting filesystems destroys data"),
    ("mkfs.ext4", "formatting filesystems destroys data"),
    ("fdisk", "partition table edits can destroy data"),
    ("parted", "partition table edits can destroy data"),
    ("format", "formatting disks destroys data"),
    ("shutdown", "powering off the host is not permitted"),
    ("reboot", "rebooting the host is not permitted"),
    ("halt", "halting the host is not permitted"),
    ("poweroff", "powering off the host is not permitted"),
    ("mount", "mounting filesystems changes host state"),
    ("sudo", "privilege escalation is not permitted"),
];

/// Destructive patterns matched case-insensitively against the whole command
const BANNED_FRAGMENTS: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "-rf /",
    "--no-preserve-root",
    "rmdir -p",
    "rm *",
    "rm /",
];

/// Substrings that may not appear in any argument
const BANNED_ARGUMENTS: &[&str] = &["--no-preserve-root", "/dev/", "../"];

/// Validator limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Maximum command length in bytes
    #[serde(default = "default_max_command_bytes")]
    pub max_command_bytes: usize,

    /// Maximum number of tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Whether `| ; & > < ` $` are accepted (CLI mode)
    #[serde(default)]
    pub allow_shell_metachars: bool,
}

fn default_max_command_bytes() -> usize {
    DEFAULT_MAX_COMMAND_BYTES
}

fn default_max_tokens() -> usize {
    DEFAULT_MAX_TOKENS
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_command_bytes: DEFAULT_MAX_COMMAND_BYTES,
            max_tokens: DEFAULT_MAX_TOKENS,
            allow_shell_metachars: false,
        }
    }
}

impl ValidatorConfig {
    /// Set the byte limit
    pub fn with_max_command_bytes(mut self, max: usize) -> Self {
        self.max_command_bytes = max;
        self
    }

    /// Set the token limit
    pub fn with_max_tokens(mut self, max: usize) -> Self {
        self.max_tokens = max;
        self
    }

    /// Allow shell metacharacters from the start
    pub fn with_shell_metachars(mut self, allow: bool) -> Self {
        self.allow_shell_metachars = allow;
        self
    }
}

/// Command validator
///
/// Safe to share between threads; the metacharacter toggle is atomic.
#[derive(Debug)]
pub struct Validator {
    max_command_bytes: usize,
    max_tokens: usize,
    allow_shell_metachars: AtomicBool,
}

impl Validator {
    /// Create a validator with default limits
    pub fn new() -> Self {
        Self::with_config(ValidatorConfig::default())
    }

    /// Create a validator from a config
    pub fn with_config(config: ValidatorConfig) -> Self {
        Self {
            max_command_bytes: config.max_command_bytes,
            max_tokens: config.max_tokens,
            allow_shell_metachars: AtomicBool::new(config.allow_shell_metachars),
        }
    }

    /// Toggle acceptance of shell metacharacters
    pub fn allow_shell_metachars(&self, allow: bool) {
        self.allow_shell_metachars.store(allow, Ordering::SeqCst);
    }

    /// Whether shell metacharacters are currently accepted
    pub fn allows_shell_metachars(&self) -> bool {
        self.allow_shell_metachars.load(Ordering::SeqCst)
    }

    /// Validate a command
    pub fn validate(&self, command: &str) -> SecurityResult<()> {
        if command.trim().is_empty() {
            return Err(SecurityError::EmptyInput("command"));
        }

        if command.len() > self.max_command_bytes {
            return Err(SecurityError::CommandTooLong {
                limit: self.max_command_bytes,
            });
        }

        if let Some(c) = command
            .chars()
            .find(|c| c.is_control() && !matches!(*c, '\t' | '\n' | '\r'))
        {
            return Err(SecurityError::ControlCharacter(c));
        }

        if !self.allows_shell_metachars() {
            if let Some(c) = command.chars().find(|c| SHELL_METACHARS.contains(c)) {
                return Err(SecurityError::ShellMetacharacter(c));
            }
        }

        let tokens = split_command(command)?;
        if tokens.len() > self.max_tokens {
            return Err(SecurityError::TooManyTokens {
                count: tokens.len(),
                limit: self.max_tokens,
            });
        }

        let Some((program, args)) = tokens.split_first() else {
            return Err(SecurityError::EmptyInput("command"));
        };

        let base = Path::new(program)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(program.as_str())
            .to_ascii_lowercase();
        if let Some(&(name, reason)) = BANNED_COMMANDS.iter().find(|(name, _)| *name == base) {
            tracing::warn!("Blocked banned command: {}", name);
            return Err(SecurityError::BannedCommand {
                command: name.to_string(),
                reason,
            });
        }

        let lowered = command.to_lowercase();
        if let Some(fragment) = BANNED_FRAGMENTS.iter().copied().find(|f| lowered.contains(f)) {
            tracing::warn!("Blocked command with banned pattern: {}", fragment);
            return Err(SecurityError::BannedFragment(fragment));
        }

        for arg in args {
            let lowered = arg.to_lowercase();
            if let Some(pattern) = BANNED_ARGUMENTS.iter().copied().find(|p| lowered.contains(p)) {
                tracing::warn!("Blocked command argument {:?} ({})", arg, pattern);
                return Err(SecurityError::BannedArgument {
                    argument: arg.clone(),
                    pattern,
                });
            }
        }

        Ok(())
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a command into tokens
///
/// Supports single quotes (literal), double quotes (with `\"`, `\\`, `\$`,
/// `` \` `` escapes) and backslash escapes outside quotes. Quotes are removed
/// from the resulting tokens.
pub fn split_command(command: &str) -> SecurityResult<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match quote {
            Some('\'') => {
                if c == '\'' {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            Some(_) => match c {
                '"' => quote = None,
                '\\' => match chars.next() {
                    Some(next @ ('"' | '\\' | '$' | '`' | '\n')) => current.push(next),
                    Some(next) => {
                        current.push('\\');
                        current.push(next);
                    }
                    None => return Err(SecurityError::UnterminatedQuote),
                },
                _ => current.push(c),
            },
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    in_token = true;
                }
                '\\' => match chars.next() {
                    Some(next) => {
                        current.push(next);
                        in_token = true;
                    }
                    None => return Err(SecurityError::TrailingEscape),
                },
                c if c.is_whitespace() => {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                }
                _ => {
                    current.push(c);
                    in_token = true;
                }
            },
        }
    }

    if quote.is_some() {
        return Err(SecurityError::UnterminatedQuote);
    }
    if in_token {
        tokens.push(current);
    }

    Ok(tokens)
}
