//! Path, command and sandbox enforcement
//!
//! - `PathResolver` - symlink-free resolution of absolute paths
//! - `Validator` - shell command validation against banned tables
//! - `Sandbox` - allow-list, validator, resolver and tool permissions in one place

pub mod path_resolver;
pub mod sandbox;
pub mod validator;

pub use path_resolver::{open_no_follow, PathResolver, DEFAULT_MAX_DEPTH};
pub use sandbox::Sandbox;
pub use validator::{split_command, Validator, ValidatorConfig};
