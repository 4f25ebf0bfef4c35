//! Approval store persistence
//!
//! The queue is persisted as one pretty-printed JSON document:
//!
//! ```json
//! {
//!   "records": [{ "id": "...", "session_id": "...", "state": "pending", ... }],
//!   "whitelist": { "<session_id>": "<RFC 3339 expiry>" }
//! }
//! ```
//!
//! Writes go to a temp file in the same directory which is then renamed over
//! the store, so a failed write never leaves a truncated snapshot behind.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{SecurityError, SecurityResult};

use super::record::ApprovalRecord;

/// Serializable form of the queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalSnapshot {
    /// Every record ever requested, oldest first
    #[serde(default)]
    pub records: Vec<ApprovalRecord>,

    /// Session whitelist: session id to expiry
    #[serde(default)]
    pub whitelist: BTreeMap<String, DateTime<Utc>>,
}

/// JSON file holding an [`ApprovalSnapshot`]
#[derive(Debug, Clone)]
pub struct ApprovalStore {
    path: PathBuf,
}

impl ApprovalStore {
    /// Create a store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> SecurityResult<Self> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(SecurityError::EmptyInput("approval store path"));
        }
        Ok(Self { path })
    }

    /// Store file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot
    ///
    /// A missing or empty file is an empty snapshot; anything unreadable or
    /// undecodable is an error.
    pub fn load(&self) -> SecurityResult<ApprovalSnapshot> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ApprovalSnapshot::default()),
            Err(source) => return Err(self.persistence("read", source)),
        };

        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(ApprovalSnapshot::default());
        }

        serde_json::from_slice(&data).map_err(|source| SecurityError::CorruptStore {
            path: self.path.clone(),
            source,
        })
    }

    /// Atomically replace the store with `snapshot`
    pub fn save(&self, snapshot: &ApprovalSnapshot) -> SecurityResult<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|source| self.persistence("create directory for", source))?;

        let mut temp = tempfile::Builder::new()
            .prefix(".approvals")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|source| self.persistence("create temp file for", source))?;

        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, snapshot).map_err(|source| {
                SecurityError::EncodeStore {
                    path: self.path.clone(),
                    source,
                }
            })?;
            writer
                .flush()
                .map_err(|source| self.persistence("write", source))?;
        }

        temp.as_file()
            .sync_all()
            .map_err(|source| self.persistence("sync", source))?;

        temp.persist(&self.path)
            .map_err(|e| self.persistence("replace", e.error))?;

        tracing::debug!(
            "Saved approval store {} ({} records, {} whitelisted)",
            self.path.display(),
            snapshot.records.len(),
            snapshot.whitelist.len()
        );
        Ok(())
    }

    fn persistence(&self, action: &'static str, source: std::io::Error) -> SecurityError {
        SecurityError::Persistence {
            action,
            path: self.path.clone(),
            source,
        }
    }
}
