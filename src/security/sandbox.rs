//! Sandbox: the composition root of the security layer
//!
//! A `Sandbox` owns:
//! - an allow-list of canonical path prefixes (always including its root)
//! - a `Validator` for shell commands
//! - a `PathResolver` for symlink-free path resolution
//! - a lazily loaded `PermissionMatcher`, built from the host settings
//! - an in-memory audit log of permission decisions
//!
//! The tool executor calls `check_tool_permission` before a tool runs and
//! `validate_path` / `validate_command` before it touches the OS.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{
    Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use serde_json::Value;

use crate::core::{PermissionAudit, SecurityError, SecurityResult};
use crate::permissions::{
    self, derive_target, PermissionAction, PermissionDecision, PermissionMatcher, UnknownPolicy,
};
use crate::settings::{NoSettings, SettingsLoader};

use super::path_resolver::{absolutize, PathResolver};
use super::validator::Validator;

/// Memoised outcome of one permission load
type PermissionLoad = Result<Option<Arc<PermissionMatcher>>, Arc<SecurityError>>;

/// Mutable sandbox state, guarded by one lock
#[derive(Debug)]
struct SandboxState {
    allow_list: Vec<PathBuf>,
    project_root: Option<PathBuf>,
    /// Replaced wholesale on reload; filled at most once per load
    permissions: Arc<OnceLock<PermissionLoad>>,
    audits: Vec<PermissionAudit>,
}

/// Path, command and tool-permission checks for one runtime session
pub struct Sandbox {
    root: Option<PathBuf>,
    disabled: bool,
    validator: Validator,
    resolver: PathResolver,
    settings: Arc<dyn SettingsLoader>,
    unknown_policy: UnknownPolicy,
    state: RwLock<SandboxState>,
    /// Held while the settings loader runs, lazily or on reload
    load_lock: Mutex<()>,
}

impl Sandbox {
    /// Create a sandbox rooted at `root`
    ///
    /// The root is made absolute and canonical and becomes the first
    /// allow-list entry. Permissions are read from the settings loader on
    /// first use (no policy until a loader is configured).
    pub fn new(root: impl AsRef<Path>) -> SecurityResult<Self> {
        let root = canonical_prefix(root.as_ref())?;
        tracing::info!("Creating sandbox rooted at {}", root.display());

        Ok(Self {
            root: Some(root.clone()),
            disabled: false,
            validator: Validator::new(),
            resolver: PathResolver::new(),
            settings: Arc::new(NoSettings),
            unknown_policy: UnknownPolicy::default(),
            state: RwLock::new(SandboxState {
                allow_list: vec![root.clone()],
                project_root: Some(root),
                permissions: Arc::new(OnceLock::new()),
                audits: Vec::new(),
            }),
            load_lock: Mutex::new(()),
        })
    }

    /// Create a sandbox that performs no checks
    pub fn disabled() -> Self {
        Self {
            root: None,
            disabled: true,
            validator: Validator::new(),
            resolver: PathResolver::new(),
            settings: Arc::new(NoSettings),
            unknown_policy: UnknownPolicy::default(),
            state: RwLock::new(SandboxState {
                allow_list: Vec::new(),
                project_root: None,
                permissions: Arc::new(OnceLock::new()),
                audits: Vec::new(),
            }),
            load_lock: Mutex::new(()),
        }
    }

    /// Use a settings loader for permission rules
    pub fn with_settings_loader<L: SettingsLoader + 'static>(mut self, loader: L) -> Self {
        self.settings = Arc::new(loader);
        self
    }

    /// Use a specific command validator
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    /// Use a specific path resolver
    pub fn with_resolver(mut self, resolver: PathResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Set how `authorize` treats calls no rule matched
    pub fn with_unknown_policy(mut self, policy: UnknownPolicy) -> Self {
        self.unknown_policy = policy;
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Sandbox root (`None` when disabled)
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Whether all checks are bypassed
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Policy applied to `Unknown` decisions by `authorize`
    pub fn unknown_policy(&self) -> UnknownPolicy {
        self.unknown_policy
    }

    /// Snapshot of the allow-list
    pub fn allowed_paths(&self) -> Vec<PathBuf> {
        self.read_state().allow_list.clone()
    }

    /// Toggle shell metacharacters in command validation
    pub fn set_allow_shell_metachars(&self, allow: bool) {
        self.validator.allow_shell_metachars(allow);
    }

    /// Whether a permission load has completed (successfully or not)
    pub fn permissions_loaded(&self) -> bool {
        self.read_state().permissions.get().is_some()
    }

    // =========================================================================
    // Path and command checks
    // =========================================================================

    /// Allow access under `path`
    ///
    /// Adding a prefix that is already present is a no-op.
    pub fn allow(&self, path: impl AsRef<Path>) -> SecurityResult<()> {
        let prefix = canonical_prefix(path.as_ref())?;

        let mut state = self.write_state();
        if !state.allow_list.contains(&prefix) {
            tracing::info!("Allowing sandbox access under {}", prefix.display());
            state.allow_list.push(prefix);
        }
        Ok(())
    }

    /// Resolve `path` and check it falls under the allow-list
    ///
    /// Returns the resolved path. Disabled sandboxes return the path as given.
    pub fn validate_path(&self, path: impl AsRef<Path>) -> SecurityResult<PathBuf> {
        let path = path.as_ref();
        if self.disabled {
            return Ok(path.to_path_buf());
        }
        if path.as_os_str().is_empty() {
            return Err(SecurityError::EmptyInput("path"));
        }

        let resolved = self.resolver.resolve(path)?;
        let allow_list = self.allowed_paths();

        if allow_list.iter().any(|prefix| resolved.starts_with(prefix)) {
            return Ok(resolved);
        }

        tracing::warn!("Path outside sandbox: {}", resolved.display());
        Err(SecurityError::PathNotAllowed(resolved))
    }

    /// Validate a shell command
    pub fn validate_command(&self, command: &str) -> SecurityResult<()> {
        if self.disabled {
            return Ok(());
        }

        self.validator
            .validate(command)
            .map_err(|e| SecurityError::CommandRejected(Box::new(e)))
    }

    // =========================================================================
    // Tool permissions
    // =========================================================================

    /// (Re)load permission rules
    ///
    /// The project root is `project_root` if given, else the root from the
    /// previous load (initially the sandbox root), else the working directory.
    /// The new matcher replaces the old one and the audit log is cleared. A
    /// failure is remembered and returned by later `check_tool_permission`
    /// calls until the next reload.
    pub fn load_permissions(&self, project_root: Option<&Path>) -> SecurityResult<()> {
        let _loading = self.lock_loads();

        let root = self.effective_root(project_root);
        let outcome = match &root {
            Ok(root) => self.load_matcher(root),
            Err(e) => {
                tracing::warn!("Could not determine project root: {}", e);
                Err(Arc::new(SecurityError::EmptyInput("project root")))
            }
        };

        let mut state = self.write_state();
        if let Ok(root) = root {
            state.project_root = Some(root);
        }
        state.permissions = Arc::new(OnceLock::from(outcome.clone()));
        state.audits.clear();
        drop(state);

        outcome.map(|_| ()).map_err(SecurityError::PermissionLoad)
    }

    /// Evaluate a tool call against the permission rules
    ///
    /// Loads permissions on first use. Every decision other than `Unknown`
    /// is appended to the audit log. A call that overlaps a reload is
    /// decided again by the new rules, so the log only holds decisions of
    /// the current load.
    pub fn check_tool_permission(&self, tool: &str, params: &Value) -> SecurityResult<PermissionDecision> {
        if self.disabled {
            return Ok(PermissionDecision::allow(tool, derive_target(tool, params)));
        }

        loop {
            let cell = self.read_state().permissions.clone();
            let loaded = match cell.get() {
                Some(loaded) => loaded,
                None => {
                    let _loading = self.lock_loads();
                    if !Arc::ptr_eq(&cell, &self.read_state().permissions) {
                        continue;
                    }
                    cell.get_or_init(|| {
                        let root = self.effective_root(None).map_err(Arc::new)?;
                        self.load_matcher(&root)
                    })
                }
            };

            let matcher = match loaded {
                Ok(matcher) => matcher.as_deref(),
                Err(e) => return Err(SecurityError::PermissionLoad(e.clone())),
            };

            let decision = permissions::evaluate(matcher, tool, params);

            let mut state = self.write_state();
            if !Arc::ptr_eq(&cell, &state.permissions) {
                tracing::debug!("Permissions reloaded while checking {}; re-evaluating", tool);
                continue;
            }
            if decision.is_known() {
                state.audits.push(PermissionAudit::from_decision(&decision));
            }
            drop(state);

            match decision.action {
                PermissionAction::Deny => {
                    tracing::warn!("Denied {} on {:?} by rule {:?}", tool, decision.target, decision.rule)
                }
                action => tracing::debug!("Permission {} for {} on {:?}", action, tool, decision.target),
            }
            return Ok(decision);
        }
    }

    /// Check a tool call and resolve `Unknown` with the sandbox's policy
    pub fn authorize(&self, tool: &str, params: &Value) -> SecurityResult<PermissionAction> {
        let decision = self.check_tool_permission(tool, params)?;
        Ok(decision.effective_action(self.unknown_policy))
    }

    /// Copy of the audit log
    pub fn permission_audits(&self) -> Vec<PermissionAudit> {
        self.read_state().audits.clone()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn effective_root(&self, explicit: Option<&Path>) -> SecurityResult<PathBuf> {
        if let Some(root) = explicit {
            return absolutize(root);
        }
        if let Some(root) = self.read_state().project_root.clone() {
            return Ok(root);
        }
        Ok(std::env::current_dir()?)
    }

    fn load_matcher(&self, root: &Path) -> PermissionLoad {
        let loaded = self.settings.load(root).and_then(|settings| {
            PermissionMatcher::new(settings.permissions.as_ref())
        });

        match loaded {
            Ok(matcher) => {
                tracing::info!(
                    "Loaded permissions for {} ({} rules)",
                    root.display(),
                    matcher.as_ref().map_or(0, PermissionMatcher::len)
                );
                Ok(matcher.map(Arc::new))
            }
            Err(e) => {
                tracing::warn!("Failed to load permissions for {}: {}", root.display(), e);
                Err(Arc::new(e))
            }
        }
    }

    fn lock_loads(&self) -> MutexGuard<'_, ()> {
        self.load_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, SandboxState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, SandboxState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("root", &self.root)
            .field("disabled", &self.disabled)
            .field("unknown_policy", &self.unknown_policy)
            .field("allowed_paths", &self.allowed_paths())
            .field("permissions_loaded", &self.permissions_loaded())
            .finish()
    }
}

/// Absolute, cleaned path, canonicalized when it already exists
fn canonical_prefix(path: &Path) -> SecurityResult<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(SecurityError::EmptyInput("path"));
    }
    let absolute = absolutize(path)?;
    match fs::canonicalize(&absolute) {
        Ok(canonical) => Ok(canonical),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(absolute),
        Err(e) => Err(SecurityError::inspect(absolute, e)),
    }
}
