//! Symlink-refusing path canonicalization
//!
//! `PathResolver` turns a caller-supplied path into a clean absolute path
//! without ever following a link. Every prefix of the path is inspected with
//! `lstat`; the first symlink found anywhere in the ancestry fails the call.
//! Components that do not exist yet are tolerated so paths can be validated
//! before they are created.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use crate::core::{SecurityError, SecurityResult};

/// Default maximum number of path components
pub const DEFAULT_MAX_DEPTH: usize = 128;

/// Canonicalizes paths while refusing symlinks and traversal
#[derive(Debug, Clone)]
pub struct PathResolver {
    max_depth: usize,
}

impl PathResolver {
    /// Create a resolver with the default depth limit
    pub fn new() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Set the maximum number of components a path may have
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Get the depth limit
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Resolve a path to a clean absolute path
    ///
    /// Fails if the path contains a `..` segment, if any existing component
    /// is a symlink, or if it has more than `max_depth` components.
    pub fn resolve(&self, path: impl AsRef<Path>) -> SecurityResult<PathBuf> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(SecurityError::EmptyInput("path"));
        }

        if path
            .components()
            .any(|component| matches!(component, Component::ParentDir))
        {
            return Err(SecurityError::PathTraversal(path.to_path_buf()));
        }

        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        let cleaned = clean(&absolute);

        if cleaned == Path::new("/") {
            return Ok(cleaned);
        }

        let depth = cleaned
            .components()
            .filter(|component| matches!(component, Component::Normal(_)))
            .count();
        if depth > self.max_depth {
            return Err(SecurityError::MaxDepthExceeded {
                path: cleaned,
                limit: self.max_depth,
            });
        }

        let mut current = PathBuf::new();
        let mut missing = false;
        for component in cleaned.components() {
            current.push(component);
            if !matches!(component, Component::Normal(_)) || missing {
                continue;
            }

            match fs::symlink_metadata(&current) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    tracing::warn!("Rejected symlink in path: {}", current.display());
                    return Err(SecurityError::SymlinkRejected(current));
                }
                Ok(_) => {}
                // Nothing below a missing component can exist either
                Err(e) if e.kind() == ErrorKind::NotFound => missing = true,
                Err(e) => return Err(SecurityError::inspect(current, e)),
            }
        }

        if !missing {
            open_no_follow(&cleaned)?;
        }

        tracing::debug!("Resolved path {} -> {}", path.display(), cleaned.display());
        Ok(cleaned)
    }
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop `.` components and redundant separators
fn clean(path: &Path) -> PathBuf {
    path.components()
        .filter(|component| !matches!(component, Component::CurDir))
        .collect()
}

/// Lexically clean a path: drop `.`, fold `..` into its parent where possible
///
/// Does not touch the filesystem. A leading `..` on a relative path is kept,
/// one directly under the root is dropped.
pub(crate) fn clean_lexically(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match cleaned.components().next_back() {
                Some(Component::Normal(_)) => {
                    cleaned.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => cleaned.push(".."),
            },
            other => cleaned.push(other),
        }
    }
    cleaned
}

/// Make a path absolute against the working directory and clean it lexically
pub(crate) fn absolutize(path: &Path) -> SecurityResult<PathBuf> {
    if path.is_absolute() {
        Ok(clean_lexically(path))
    } else {
        Ok(clean_lexically(&std::env::current_dir()?.join(path)))
    }
}

/// Open `path` without following a final symlink
///
/// Second check after the `lstat` walk: a link swapped in after the walk
/// makes the open fail with `ELOOP` (or, with `O_PATH`, yields a handle to
/// the link itself, which `fstat` reports).
#[cfg(unix)]
pub fn open_no_follow(path: &Path) -> SecurityResult<()> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut options = fs::OpenOptions::new();
    options.read(true).custom_flags(no_follow_flags());

    match options.open(path) {
        Ok(file) => {
            let meta = file
                .metadata()
                .map_err(|e| SecurityError::inspect(path, e))?;
            if meta.file_type().is_symlink() {
                return Err(SecurityError::SymlinkRejected(path.to_path_buf()));
            }
            Ok(())
        }
        Err(e) if e.raw_os_error() == Some(libc::ELOOP) => {
            tracing::warn!("No-follow open hit a symlink: {}", path.display());
            Err(SecurityError::SymlinkRejected(path.to_path_buf()))
        }
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
            tracing::debug!("No-follow open skipped for {}: {}", path.display(), e);
            Ok(())
        }
        Err(e) => Err(SecurityError::inspect(path, e)),
    }
}

/// Open `path` without following a final symlink (no-op off Unix)
#[cfg(not(unix))]
pub fn open_no_follow(_path: &Path) -> SecurityResult<()> {
    Ok(())
}

#[cfg(target_os = "linux")]
fn no_follow_flags() -> i32 {
    libc::O_NOFOLLOW | libc::O_PATH | libc::O_CLOEXEC
}

#[cfg(all(unix, not(target_os = "linux")))]
fn no_follow_flags() -> i32 {
    libc::O_NOFOLLOW | libc::O_NONBLOCK | libc::O_CLOEXEC
}
