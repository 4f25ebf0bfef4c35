//! Persisted approval queue
//!
//! Every mutation runs under one mutex, is written to the store before the
//! lock is released, and then wakes all waiters through a `watch` channel.
//! A mutation whose write fails leaves the in-memory state untouched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::core::{SecurityError, SecurityResult};
use crate::security::path_resolver::absolutize;

use super::record::{ApprovalRecord, ApprovalState};
use super::store::{ApprovalSnapshot, ApprovalStore};

/// Reason stamped on records approved through the session whitelist
pub const WHITELIST_REASON: &str = "session whitelisted";

#[derive(Debug, Clone, Default)]
struct QueueState {
    snapshot: ApprovalSnapshot,
    /// Record id to position in `snapshot.records`
    index: HashMap<String, usize>,
}

impl QueueState {
    fn from_snapshot(snapshot: ApprovalSnapshot) -> Self {
        let index = snapshot
            .records
            .iter()
            .enumerate()
            .map(|(i, record)| (record.id.clone(), i))
            .collect();
        Self { snapshot, index }
    }

    fn get(&self, id: &str) -> Option<&ApprovalRecord> {
        self.index.get(id).and_then(|&i| self.snapshot.records.get(i))
    }

    fn get_mut(&mut self, id: &str) -> SecurityResult<&mut ApprovalRecord> {
        self.index
            .get(id)
            .and_then(|&i| self.snapshot.records.get_mut(i))
            .ok_or_else(|| SecurityError::ApprovalNotFound(id.to_string()))
    }

    fn push(&mut self, record: ApprovalRecord) {
        self.index.insert(record.id.clone(), self.snapshot.records.len());
        self.snapshot.records.push(record);
    }

    /// Drop whitelist entries that expired at or before `now`
    fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.snapshot.whitelist.len();
        self.snapshot.whitelist.retain(|_, expiry| *expiry > now);
        before - self.snapshot.whitelist.len()
    }
}

/// Human-in-the-loop approvals with session whitelisting
///
/// Records go `Pending` → `Approved` or `Pending` → `Denied` and are kept
/// forever as an audit trail. Every returned record is a copy.
pub struct ApprovalQueue {
    store: ApprovalStore,
    state: Mutex<QueueState>,
    changed: watch::Sender<u64>,
}

impl ApprovalQueue {
    /// Open a queue backed by `store_path`
    ///
    /// An existing snapshot is loaded; a missing file starts empty. Expired
    /// whitelist entries are dropped on load and the store is rewritten; if
    /// that write fails the queue still opens with the entries dropped.
    pub fn new(store_path: impl Into<PathBuf>) -> SecurityResult<Self> {
        let store = ApprovalStore::new(store_path)?;
        let mut state = QueueState::from_snapshot(store.load()?);

        let evicted = state.evict_expired(Utc::now());
        if evicted > 0 {
            match store.save(&state.snapshot) {
                Ok(()) => tracing::info!("Evicted {} expired whitelist entries on load", evicted),
                Err(e) => tracing::warn!(
                    "Evicted {} expired whitelist entries but could not rewrite {}: {}",
                    evicted,
                    store.path().display(),
                    e
                ),
            }
        }

        tracing::info!(
            "Opened approval queue {} ({} records)",
            store.path().display(),
            state.snapshot.records.len()
        );

        let (changed, _) = watch::channel(0);
        Ok(Self {
            store,
            state: Mutex::new(state),
            changed,
        })
    }

    /// Path of the backing store
    pub fn store_path(&self) -> &Path {
        self.store.path()
    }

    /// Ask for approval to run `command` touching `paths`
    ///
    /// Paths are made absolute and cleaned; empty entries are skipped. If the
    /// session is whitelisted the record comes back already approved.
    pub fn request<I, P>(&self, session_id: &str, command: &str, paths: I) -> SecurityResult<ApprovalRecord>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        if session_id.trim().is_empty() {
            return Err(SecurityError::EmptyInput("session id"));
        }
        if command.trim().is_empty() {
            return Err(SecurityError::EmptyInput("command"));
        }

        let paths = paths
            .into_iter()
            .filter(|p| !p.as_ref().as_os_str().is_empty())
            .map(|p| absolutize(p.as_ref()))
            .collect::<SecurityResult<Vec<_>>>()?;

        let record = self.commit(|state| {
            let now = Utc::now();
            let mut record = ApprovalRecord::new(session_id, command, paths);

            match state.snapshot.whitelist.get(session_id).copied() {
                Some(expiry) if expiry > now => {
                    record.state = ApprovalState::Approved;
                    record.auto_approved = true;
                    record.reason = Some(WHITELIST_REASON.to_string());
                    record.approved_at = Some(now);
                    record.expires_at = Some(expiry);
                }
                Some(_) => {
                    state.snapshot.whitelist.remove(session_id);
                }
                None => {}
            }

            state.push(record.clone());
            Ok(record)
        })?;

        if record.auto_approved {
            tracing::info!("Auto-approved {} for whitelisted session {}", record.id, session_id);
        } else {
            tracing::info!("Approval {} requested by session {}: {}", record.id, session_id, command);
        }
        Ok(record)
    }

    /// Approve a record
    ///
    /// With a non-zero `whitelist_ttl` the record's session skips approval
    /// until the TTL runs out; a zero TTL clears any whitelist entry for the
    /// session. Approving an approved record again refreshes it.
    pub fn approve(&self, id: &str, approver: &str, whitelist_ttl: Duration) -> SecurityResult<ApprovalRecord> {
        if id.is_empty() {
            return Err(SecurityError::EmptyInput("approval id"));
        }

        let record = self.commit(|state| {
            let now = Utc::now();
            let record = state.get_mut(id)?;
            if record.state == ApprovalState::Denied {
                return Err(SecurityError::AlreadyDenied(id.to_string()));
            }

            record.state = ApprovalState::Approved;
            record.approver = non_empty(approver);
            record.approved_at = Some(now);
            record.expires_at = (!whitelist_ttl.is_zero()).then(|| expiry_after(now, whitelist_ttl));

            let record = record.clone();
            match record.expires_at {
                Some(expiry) => {
                    state.snapshot.whitelist.insert(record.session_id.clone(), expiry);
                }
                None => {
                    state.snapshot.whitelist.remove(&record.session_id);
                }
            }
            Ok(record)
        })?;

        match record.expires_at {
            Some(expiry) => tracing::info!(
                "Approved {} by {}; session {} whitelisted until {}",
                id,
                approver,
                record.session_id,
                expiry.to_rfc3339()
            ),
            None => tracing::info!("Approved {} by {}", id, approver),
        }
        Ok(record)
    }

    /// Deny a record
    pub fn deny(&self, id: &str, approver: &str, reason: &str) -> SecurityResult<ApprovalRecord> {
        if id.is_empty() {
            return Err(SecurityError::EmptyInput("approval id"));
        }

        let record = self.commit(|state| {
            let record = state.get_mut(id)?;
            if record.state == ApprovalState::Approved {
                return Err(SecurityError::AlreadyApproved(id.to_string()));
            }

            record.state = ApprovalState::Denied;
            record.approver = non_empty(approver);
            record.reason = non_empty(reason);
            Ok(record.clone())
        })?;

        tracing::warn!("Denied {} by {}: {}", id, approver, reason);
        Ok(record)
    }

    /// Copy of one record
    pub fn get(&self, id: &str) -> SecurityResult<ApprovalRecord> {
        self.lock()
            .get(id)
            .cloned()
            .ok_or_else(|| SecurityError::ApprovalNotFound(id.to_string()))
    }

    /// Copies of all records still waiting for a decision
    pub fn list_pending(&self) -> Vec<ApprovalRecord> {
        self.lock()
            .snapshot
            .records
            .iter()
            .filter(|record| record.is_pending())
            .cloned()
            .collect()
    }

    /// Copies of every record, oldest first
    pub fn records(&self) -> Vec<ApprovalRecord> {
        self.lock().snapshot.records.clone()
    }

    /// Whether `session_id` currently skips approval
    ///
    /// An expired entry is removed and the removal persisted.
    pub fn is_whitelisted(&self, session_id: &str) -> SecurityResult<bool> {
        let now = Utc::now();
        let mut state = self.lock();

        match state.snapshot.whitelist.get(session_id).copied() {
            None => Ok(false),
            Some(expiry) if expiry > now => Ok(true),
            Some(_) => {
                self.commit_locked(&mut state, |next| {
                    next.snapshot.whitelist.remove(session_id);
                    Ok(())
                })?;
                tracing::info!("Whitelist for session {} expired", session_id);
                Ok(false)
            }
        }
    }

    /// Wait until a record is approved or denied
    ///
    /// Returns a copy of the resolved record, `ApprovalNotFound` for an
    /// unknown id, or `Cancelled` once `cancel` fires.
    pub async fn wait(&self, id: &str, cancel: &CancellationToken) -> SecurityResult<ApprovalRecord> {
        if id.is_empty() {
            return Err(SecurityError::EmptyInput("approval id"));
        }

        // Subscribe before the first check so a change in between is not lost
        let mut changes = self.changed.subscribe();

        loop {
            {
                let state = self.lock();
                let record = state
                    .get(id)
                    .ok_or_else(|| SecurityError::ApprovalNotFound(id.to_string()))?;
                if record.state.is_terminal() {
                    return Ok(record.clone());
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("Wait for approval {} cancelled", id);
                    return Err(SecurityError::Cancelled(id.to_string()));
                }
                changed = changes.changed() => {
                    // The sender lives as long as the queue
                    if changed.is_err() {
                        return Err(SecurityError::Cancelled(id.to_string()));
                    }
                }
            }
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `mutate` to a copy of the state, persist it, then publish it
    fn commit<T>(&self, mutate: impl FnOnce(&mut QueueState) -> SecurityResult<T>) -> SecurityResult<T> {
        let mut state = self.lock();
        let value = self.commit_locked(&mut state, mutate)?;
        drop(state);

        self.changed.send_modify(|version| *version = version.wrapping_add(1));
        Ok(value)
    }

    fn commit_locked<T>(
        &self,
        state: &mut QueueState,
        mutate: impl FnOnce(&mut QueueState) -> SecurityResult<T>,
    ) -> SecurityResult<T> {
        let mut next = state.clone();
        let value = mutate(&mut next)?;
        self.store.save(&next.snapshot)?;
        *state = next;
        Ok(value)
    }
}

impl std::fmt::Debug for ApprovalQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ApprovalQueue")
            .field("store", &self.store.path())
            .field("records", &state.snapshot.records.len())
            .field("whitelist", &state.snapshot.whitelist.len())
            .finish()
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// `now + ttl`, saturating at the largest representable time
fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    const MINUTE: Duration = Duration::from_secs(60);

    fn create_test_queue() -> (ApprovalQueue, PathBuf, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("approvals.json");
        let queue = ApprovalQueue::new(&path).unwrap();
        (queue, path, temp_dir)
    }

    #[test]
    fn test_request_creates_pending_record() {
        let (queue, path, _temp) = create_test_queue();

        let record = queue
            .request("s1", "cargo publish", ["/srv/app/./Cargo.toml", ""])
            .unwrap();
        assert_eq!(record.state, ApprovalState::Pending);
        assert_eq!(record.paths, vec![PathBuf::from("/srv/app/Cargo.toml")]);
        assert!(!record.auto_approved);

        assert_eq!(queue.list_pending(), vec![record.clone()]);
        assert_eq!(queue.get(&record.id).unwrap(), record);
        assert!(path.exists());
        assert_eq!(queue.store_path(), path);
    }

    #[test]
    fn test_request_rejects_empty_input() {
        let (queue, _path, _temp) = create_test_queue();
        let no_paths: [&str; 0] = [];

        assert!(matches!(
            queue.request("", "ls", no_paths),
            Err(SecurityError::EmptyInput("session id"))
        ));
        assert!(matches!(
            queue.request("s1", "  ", no_paths),
            Err(SecurityError::EmptyInput("command"))
        ));
        assert!(queue.records().is_empty());
    }

    #[test]
    fn test_approve_after_deny_fails() {
        let (queue, _path, _temp) = create_test_queue();
        let record = queue.request("s1", "make clean", Vec::<PathBuf>::new()).unwrap();

        let denied = queue.deny(&record.id, "bob", "not now").unwrap();
        assert_eq!(denied.state, ApprovalState::Denied);
        assert_eq!(denied.reason.as_deref(), Some("not now"));

        let err = queue.approve(&record.id, "bob", MINUTE).unwrap_err();
        assert!(matches!(err, SecurityError::AlreadyDenied(_)));
        assert_eq!(queue.get(&record.id).unwrap().state, ApprovalState::Denied);
        assert!(!queue.is_whitelisted("s1").unwrap());
    }

    #[test]
    fn test_deny_after_approve_fails() {
        let (queue, _path, _temp) = create_test_queue();
        let record = queue.request("s1", "make clean", Vec::<PathBuf>::new()).unwrap();

        let approved = queue.approve(&record.id, "alice", Duration::ZERO).unwrap();
        assert_eq!(approved.state, ApprovalState::Approved);
        assert_eq!(approved.approver.as_deref(), Some("alice"));
        assert!(approved.approved_at.is_some());
        assert!(approved.expires_at.is_none());

        let err = queue.deny(&record.id, "bob", "changed my mind").unwrap_err();
        assert!(matches!(err, SecurityError::AlreadyApproved(_)));
        assert_eq!(queue.get(&record.id).unwrap(), approved);
        assert!(queue.list_pending().is_empty());
    }

    #[test]
    fn test_unknown_id() {
        let (queue, _path, _temp) = create_test_queue();
        assert!(matches!(
            queue.approve("missing", "alice", MINUTE),
            Err(SecurityError::ApprovalNotFound(_))
        ));
        assert!(matches!(
            queue.deny("missing", "alice", ""),
            Err(SecurityError::ApprovalNotFound(_))
        ));
        assert!(matches!(queue.get("missing"), Err(SecurityError::ApprovalNotFound(_))));
    }

    #[test]
    fn test_whitelist_auto_approves() {
        let (queue, _path, _temp) = create_test_queue();
        let first = queue.request("s1", "npm test", Vec::<PathBuf>::new()).unwrap();
        let approved = queue.approve(&first.id, "alice", MINUTE).unwrap();
        assert!(queue.is_whitelisted("s1").unwrap());
        assert!(!queue.is_whitelisted("s2").unwrap());

        let second = queue.request("s1", "rm -rf", Vec::<PathBuf>::new()).unwrap();
        assert_eq!(second.state, ApprovalState::Approved);
        assert!(second.auto_approved);
        assert_eq!(second.reason.as_deref(), Some(WHITELIST_REASON));
        assert_eq!(second.expires_at, approved.expires_at);

        let other = queue.request("s2", "rm -rf", Vec::<PathBuf>::new()).unwrap();
        assert_eq!(other.state, ApprovalState::Pending);
    }

    #[test]
    fn test_zero_ttl_clears_whitelist() {
        let (queue, _path, _temp) = create_test_queue();
        let first = queue.request("s1", "npm test", Vec::<PathBuf>::new()).unwrap();
        queue.approve(&first.id, "alice", MINUTE).unwrap();

        let second = queue.request("s1", "npm run build", Vec::<PathBuf>::new()).unwrap();
        queue.approve(&second.id, "alice", Duration::ZERO).unwrap();
        assert!(!queue.is_whitelisted("s1").unwrap());
    }

    #[test]
    fn test_whitelist_expires() {
        let (queue, path, _temp) = create_test_queue();
        let record = queue.request("s1", "npm test", Vec::<PathBuf>::new()).unwrap();
        let approved = queue
            .approve(&record.id, "alice", Duration::from_millis(500))
            .unwrap();
        assert!(approved.expires_at.unwrap() > approved.approved_at.unwrap());
        assert!(queue.is_whitelisted("s1").unwrap());

        std::thread::sleep(Duration::from_millis(700));
        assert!(!queue.is_whitelisted("s1").unwrap());

        // Eviction is persisted
        let snapshot = ApprovalStore::new(&path).unwrap().load().unwrap();
        assert!(snapshot.whitelist.is_empty());

        let next = queue.request("s1", "npm test", Vec::<PathBuf>::new()).unwrap();
        assert_eq!(next.state, ApprovalState::Pending);
    }

    #[test]
    fn test_reopen_round_trip() {
        let (queue, path, _temp) = create_test_queue();
        let a = queue.request("s1", "make", ["/tmp/build"]).unwrap();
        let b = queue.request("s2", "make install", Vec::<PathBuf>::new()).unwrap();
        queue.request("s3", "make test", Vec::<PathBuf>::new()).unwrap();
        queue.approve(&a.id, "alice", MINUTE).unwrap();
        queue.deny(&b.id, "bob", "no installs").unwrap();

        let reopened = ApprovalQueue::new(&path).unwrap();
        assert_eq!(reopened.records(), queue.records());
        assert_eq!(reopened.list_pending().len(), 1);
        assert!(reopened.is_whitelisted("s1").unwrap());
        assert!(!reopened.is_whitelisted("s2").unwrap());
    }

    #[test]
    fn test_expired_whitelist_evicted_on_open() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("approvals.json");

        let mut snapshot = ApprovalSnapshot::default();
        snapshot
            .whitelist
            .insert("old".to_string(), Utc::now() - chrono::Duration::minutes(1));
        snapshot
            .whitelist
            .insert("live".to_string(), Utc::now() + chrono::Duration::minutes(10));
        ApprovalStore::new(&path).unwrap().save(&snapshot).unwrap();

        let queue = ApprovalQueue::new(&path).unwrap();
        assert!(queue.is_whitelisted("live").unwrap());
        assert!(!queue.is_whitelisted("old").unwrap());

        let on_disk = ApprovalStore::new(&path).unwrap().load().unwrap();
        assert_eq!(on_disk.whitelist.len(), 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_open_survives_failed_eviction_write() {
        const STORE_PATH_LEN: usize = 4090;

        // Nest directories until the store path sits just under PATH_MAX, so
        // the temp file beside it cannot be created but the store is readable
        let temp_dir = TempDir::new().unwrap();
        let mut dir = temp_dir.path().to_path_buf();
        loop {
            let room = STORE_PATH_LEN - dir.as_os_str().len() - "/s".len();
            if room == 0 {
                break;
            }
            let name_len = if room > 250 { 200 } else { room - 1 };
            dir.push("d".repeat(name_len));
        }
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("s");
        assert_eq!(path.as_os_str().len(), STORE_PATH_LEN);

        let mut snapshot = ApprovalSnapshot::default();
        snapshot
            .whitelist
            .insert("old".to_string(), Utc::now() - chrono::Duration::minutes(1));
        snapshot
            .whitelist
            .insert("live".to_string(), Utc::now() + chrono::Duration::minutes(10));
        fs::write(&path, serde_json::to_vec_pretty(&snapshot).unwrap()).unwrap();
        assert!(ApprovalStore::new(&path).unwrap().save(&snapshot).is_err());

        let queue = ApprovalQueue::new(&path).unwrap();
        assert!(queue.is_whitelisted("live").unwrap());
        assert!(!queue.is_whitelisted("old").unwrap());

        // The stale entry is still on disk; only memory was updated
        let on_disk = ApprovalStore::new(&path).unwrap().load().unwrap();
        assert_eq!(on_disk.whitelist.len(), 2);
    }

    #[test]
    fn test_corrupt_store_fails_open() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("approvals.json");
        fs::write(&path, "not json").unwrap();

        let err = ApprovalQueue::new(&path).unwrap_err();
        assert!(matches!(err, SecurityError::CorruptStore { .. }));
    }

    #[test]
    fn test_failed_save_keeps_state() {
        let (queue, path, _temp) = create_test_queue();
        let record = queue.request("s1", "make", Vec::<PathBuf>::new()).unwrap();

        // Occupy the store path with a directory so the rename fails
        fs::remove_file(&path).unwrap();
        fs::create_dir_all(path.join("occupied")).unwrap();

        let err = queue.approve(&record.id, "alice", MINUTE).unwrap_err();
        assert!(matches!(err, SecurityError::Persistence { .. }));
        assert!(queue.get(&record.id).unwrap().is_pending());
        assert!(!queue.is_whitelisted("s1").unwrap());

        fs::remove_dir_all(&path).unwrap();
        queue.approve(&record.id, "alice", MINUTE).unwrap();
        assert!(queue.is_whitelisted("s1").unwrap());
    }

    #[tokio::test]
    async fn test_wait_returns_resolved_record() {
        let (queue, _path, _temp) = create_test_queue();
        let record = queue.request("s1", "make", Vec::<PathBuf>::new()).unwrap();
        queue.deny(&record.id, "bob", "nope").unwrap();

        let token = CancellationToken::new();
        let resolved = queue.wait(&record.id, &token).await.unwrap();
        assert_eq!(resolved.state, ApprovalState::Denied);

        assert!(matches!(
            queue.wait("missing", &token).await,
            Err(SecurityError::ApprovalNotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_waiters_see_approval() {
        const WAITERS: usize = 16;

        let (queue, _path, _temp) = create_test_queue();
        let queue = Arc::new(queue);
        let record = queue.request("s1", "deploy", Vec::<PathBuf>::new()).unwrap();
        let token = CancellationToken::new();

        let handles: Vec<_> = (0..WAITERS)
            .map(|_| {
                let queue = queue.clone();
                let token = token.clone();
                let id = record.id.clone();
                tokio::spawn(async move { queue.wait(&id, &token).await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.approve(&record.id, "alice", Duration::ZERO).unwrap();

        let results = futures::future::join_all(handles).await;
        assert_eq!(results.len(), WAITERS);
        for result in results {
            let resolved = result.unwrap().unwrap();
            assert_eq!(resolved.state, ApprovalState::Approved);
            assert_eq!(resolved.approver.as_deref(), Some("alice"));
        }
    }

    #[tokio::test]
    async fn test_wait_cancelled() {
        let (queue, _path, _temp) = create_test_queue();
        let queue = Arc::new(queue);
        let record = queue.request("s1", "deploy", Vec::<PathBuf>::new()).unwrap();
        let token = CancellationToken::new();

        let waiter = {
            let queue = queue.clone();
            let token = token.clone();
            let id = record.id.clone();
            tokio::spawn(async move { queue.wait(&id, &token).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("cancelled waiter must return promptly")
            .unwrap();
        assert!(matches!(result, Err(SecurityError::Cancelled(_))));
        assert!(queue.get(&record.id).unwrap().is_pending());
    }

    #[tokio::test]
    async fn test_wait_wakes_on_unrelated_changes() {
        let (queue, _path, _temp) = create_test_queue();
        let queue = Arc::new(queue);
        let target = queue.request("s1", "deploy", Vec::<PathBuf>::new()).unwrap();
        let token = CancellationToken::new();

        let waiter = {
            let queue = queue.clone();
            let token = token.clone();
            let id = target.id.clone();
            tokio::spawn(async move { queue.wait(&id, &token).await })
        };

        // Other mutations wake the waiter but do not resolve it
        let other = queue.request("s2", "build", Vec::<PathBuf>::new()).unwrap();
        queue.approve(&other.id, "alice", Duration::ZERO).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        queue.deny(&target.id, "bob", "no").unwrap();
        let resolved = waiter.await.unwrap().unwrap();
        assert_eq!(resolved.state, ApprovalState::Denied);
    }

    #[test]
    fn test_expiry_saturates() {
        let now = Utc::now();
        assert_eq!(expiry_after(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(expiry_after(now, MINUTE), now + chrono::Duration::minutes(1));
    }
}
