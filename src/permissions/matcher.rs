//! Permission matcher
//!
//! Evaluates tool calls against three independently compiled rule tiers.
//! Deny is checked first, then Ask, then Allow; the first rule in a tier
//! whose tool and target predicates both match decides the call.

use std::path::Path;

use serde_json::Value;

use crate::core::SecurityResult;
use crate::security::path_resolver::clean_lexically;
use crate::settings::PermissionsConfig;

use super::decision::{PermissionAction, PermissionDecision};
use super::rule::CompiledRule;

/// Compiled allow/ask/deny rules
#[derive(Debug, Clone)]
pub struct PermissionMatcher {
    deny: Vec<CompiledRule>,
    ask: Vec<CompiledRule>,
    allow: Vec<CompiledRule>,
}

impl PermissionMatcher {
    /// Build a matcher from an optional config
    ///
    /// `None` yields no matcher; any malformed rule fails the whole build.
    pub fn new(config: Option<&PermissionsConfig>) -> SecurityResult<Option<Self>> {
        config.map(Self::from_config).transpose()
    }

    /// Build a matcher from a config
    pub fn from_config(config: &PermissionsConfig) -> SecurityResult<Self> {
        let matcher = Self {
            deny: compile_tier(&config.deny)?,
            ask: compile_tier(&config.ask)?,
            allow: compile_tier(&config.allow)?,
        };

        tracing::debug!(
            "Compiled permission rules: {} deny, {} ask, {} allow",
            matcher.deny.len(),
            matcher.ask.len(),
            matcher.allow.len()
        );

        Ok(matcher)
    }

    /// Evaluate a tool call
    pub fn evaluate(&self, tool: &str, params: &Value) -> PermissionDecision {
        let target = derive_target(tool, params);

        let tiers = [
            (PermissionAction::Deny, &self.deny),
            (PermissionAction::Ask, &self.ask),
            (PermissionAction::Allow, &self.allow),
        ];

        for (action, rules) in tiers {
            if let Some(rule) = rules.iter().find(|rule| rule.matches(tool, &target)) {
                return PermissionDecision::new(action, rule.source(), tool, target);
            }
        }

        PermissionDecision::unknown(tool, target)
    }

    /// Compiled rules in evaluation order, for debugging
    pub fn rules(&self) -> Vec<(PermissionAction, &str)> {
        [
            (PermissionAction::Deny, &self.deny),
            (PermissionAction::Ask, &self.ask),
            (PermissionAction::Allow, &self.allow),
        ]
        .into_iter()
        .flat_map(|(action, rules)| rules.iter().map(move |rule| (action, rule.source())))
        .collect()
    }

    /// Total number of compiled rules
    pub fn len(&self) -> usize {
        self.deny.len() + self.ask.len() + self.allow.len()
    }

    /// Whether there are no rules
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Evaluate against an optional matcher
///
/// With no matcher configured every call is allowed.
pub fn evaluate(matcher: Option<&PermissionMatcher>, tool: &str, params: &Value) -> PermissionDecision {
    match matcher {
        Some(matcher) => matcher.evaluate(tool, params),
        None => PermissionDecision::allow(tool, derive_target(tool, params)),
    }
}

/// Compile a tier, more specific rules first, config order otherwise
fn compile_tier(rules: &[String]) -> SecurityResult<Vec<CompiledRule>> {
    let mut compiled = rules
        .iter()
        .map(|rule| CompiledRule::parse(rule))
        .collect::<SecurityResult<Vec<_>>>()?;
    // sort_by is stable
    compiled.sort_by(|a, b| b.specificity().cmp(&a.specificity()));
    Ok(compiled)
}

/// Derive the string rules are matched against from the call parameters
///
/// - `bash`: `name:args` from `command` (`name:` when there are no args)
/// - `read` / `write` / `edit`: cleaned `file_path` or `path`
/// - `task*`: `task_id` or `id`
/// - anything else: `path`, `file` or `target`, then the first scalar value
pub fn derive_target(tool: &str, params: &Value) -> String {
    let lowered = tool.to_ascii_lowercase();
    let get = |key: &str| params.get(key).and_then(Value::as_str);

    match lowered.as_str() {
        "bash" => get("command").map(command_target).unwrap_or_default(),
        "read" | "write" | "edit" => get("file_path")
            .or_else(|| get("path"))
            .map(clean_path)
            .unwrap_or_default(),
        name if name.starts_with("task") => get("task_id")
            .or_else(|| get("id"))
            .map(str::to_string)
            .unwrap_or_default(),
        _ => ["path", "file", "target"]
            .into_iter()
            .find_map(get)
            .map(str::to_string)
            .or_else(|| first_scalar(params))
            .unwrap_or_default(),
    }
}

fn command_target(command: &str) -> String {
    let command = command.trim();
    match command.split_once(char::is_whitespace) {
        Some((name, args)) => format!("{}:{}", name, args.trim()),
        None => format!("{}:", command),
    }
}

fn first_scalar(params: &Value) -> Option<String> {
    params.as_object()?.values().find_map(|value| match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

/// Lexically cleaned path as a string (`.` for an empty result)
fn clean_path(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }

    let cleaned = clean_lexically(Path::new(path));
    if cleaned.as_os_str().is_empty() {
        return ".".to_string();
    }
    cleaned.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn matcher(config: PermissionsConfig) -> PermissionMatcher {
        PermissionMatcher::from_config(&config).unwrap()
    }

    #[test]
    fn test_absent_config_yields_no_matcher() {
        assert!(PermissionMatcher::new(None).unwrap().is_none());
        assert!(PermissionMatcher::new(Some(&PermissionsConfig::new()))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_malformed_rule_fails_build() {
        let config = PermissionsConfig::new().allow("Read").deny("Bash(ls");
        assert!(PermissionMatcher::new(Some(&config)).is_err());

        let config = PermissionsConfig::new().ask("");
        assert!(PermissionMatcher::new(Some(&config)).is_err());
    }

    #[test]
    fn test_deny_beats_allow() {
        let m = matcher(
            PermissionsConfig::new()
                .allow("Bash(ls:*)")
                .deny("bash(regex:^rm:)"),
        );

        let decision = m.evaluate("bash", &json!({"command": "rm /tmp"}));
        assert_eq!(decision.action, PermissionAction::Deny);
        assert_eq!(decision.rule, "bash(regex:^rm:)");
        assert_eq!(decision.target, "rm:/tmp");

        let decision = m.evaluate("Bash", &json!({"command": "ls"}));
        assert_eq!(decision.action, PermissionAction::Allow);
        assert_eq!(decision.target, "ls:");
    }

    #[test]
    fn test_tier_priority_on_overlap() {
        let params = json!({"file_path": "src/main.rs"});

        let all = matcher(
            PermissionsConfig::new()
                .allow("src/**")
                .ask("Read(src/**)")
                .deny("Read"),
        );
        assert_eq!(all.evaluate("Read", &params).action, PermissionAction::Deny);

        let ask_allow = matcher(PermissionsConfig::new().allow("Read").ask("src/**"));
        assert_eq!(ask_allow.evaluate("Read", &params).action, PermissionAction::Ask);

        let allow_only = matcher(PermissionsConfig::new().allow("Read"));
        assert_eq!(allow_only.evaluate("Read", &params).action, PermissionAction::Allow);
    }

    #[test]
    fn test_unknown_when_nothing_matches() {
        let m = matcher(PermissionsConfig::new().allow("Read"));
        let decision = m.evaluate("Write", &json!({"file_path": "a.txt"}));
        assert_eq!(decision.action, PermissionAction::Unknown);
        assert!(decision.rule.is_empty());
        assert_eq!(decision.target, "a.txt");
    }

    #[test]
    fn test_no_matcher_allows() {
        let decision = evaluate(None, "Bash", &json!({"command": "rm -rf /"}));
        assert_eq!(decision.action, PermissionAction::Allow);
        assert_eq!(decision.target, "rm:-rf /");
    }

    #[test]
    fn test_specific_rule_reported_first() {
        let m = matcher(PermissionsConfig::new().deny("Bash").deny("Bash(rm:*)"));
        let decision = m.evaluate("Bash", &json!({"command": "rm x"}));
        assert_eq!(decision.rule, "Bash(rm:*)");

        let listing = m.rules();
        assert_eq!(listing[0], (PermissionAction::Deny, "Bash(rm:*)"));
        assert_eq!(listing[1], (PermissionAction::Deny, "Bash"));
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn test_derive_target() {
        assert_eq!(
            derive_target("Bash", &json!({"command": "  git   status --short "})),
            "git:status --short"
        );
        assert_eq!(derive_target("bash", &json!({})), "");
        assert_eq!(
            derive_target("Read", &json!({"file_path": "./src/../lib/x.rs"})),
            "lib/x.rs"
        );
        assert_eq!(derive_target("edit", &json!({"path": "/a/./b//c"})), "/a/b/c");
        assert_eq!(derive_target("write", &json!({"file_path": "/../etc"})), "/etc");
        assert_eq!(derive_target("TaskUpdate", &json!({"task_id": "t-1"})), "t-1");
        assert_eq!(derive_target("task", &json!({"id": "t-2"})), "t-2");
        assert_eq!(
            derive_target("Glob", &json!({"pattern": "*.rs", "path": "src"})),
            "src"
        );
        assert_eq!(derive_target("Fetch", &json!({"target": "https://x"})), "https://x");
        assert_eq!(derive_target("Custom", &json!({"b": 42, "a": {"nested": 1}})), "42");
        assert_eq!(derive_target("Custom", &json!(null)), "");
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path("a/b/../c"), "a/c");
        assert_eq!(clean_path("../x"), "../x");
        assert_eq!(clean_path("./"), ".");
        assert_eq!(clean_path(""), "");
    }
}
