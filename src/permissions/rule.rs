//! Permission rule compilation
//!
//! A rule is compiled once into a tool predicate and a target predicate.
//! Three textual forms are accepted:
//! - `src/**/*.rs`, `regex:.*\.env$` - contains `/` or `.`: matches any tool
//! - `Read`, `mcp__*`, `regex:^web` - tool name only: matches any target
//! - `Bash(ls:*)`, `bash(regex:^rm:)` - tool name and target pattern

use std::fmt;

use regex::{Regex, RegexBuilder};

use crate::core::{SecurityError, SecurityResult};

/// Prefixes that mark a pattern as a raw regular expression
const REGEX_PREFIXES: &[&str] = &["regex:", "regexp:"];

/// A compiled predicate over a tool name or a target string
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Matches everything
    Any,
    /// Case-insensitive equality (stored lowercased)
    Exact(String),
    /// Anchored glob translated to a regex
    Glob(Regex),
    /// User-supplied regex (unanchored search)
    Regex(Regex),
}

impl Pattern {
    /// Check a value against the pattern
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::Exact(expected) => expected.eq_ignore_ascii_case(value),
            Pattern::Glob(regex) | Pattern::Regex(regex) => regex.is_match(value),
        }
    }

    fn specificity(&self) -> u8 {
        match self {
            Pattern::Any => 0,
            Pattern::Glob(_) | Pattern::Regex(_) => 1,
            Pattern::Exact(_) => 2,
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Any => f.write_str("*"),
            Pattern::Exact(value) => f.write_str(value),
            Pattern::Glob(regex) => write!(f, "glob:{}", regex.as_str()),
            Pattern::Regex(regex) => write!(f, "regex:{}", regex.as_str()),
        }
    }
}

/// A permission rule compiled from its textual form
#[derive(Debug, Clone)]
pub struct CompiledRule {
    source: String,
    tool: Pattern,
    target: Pattern,
}

impl CompiledRule {
    /// Compile a rule
    pub fn parse(rule: &str) -> SecurityResult<Self> {
        let text = rule.trim();
        if text.is_empty() {
            return Err(SecurityError::EmptyInput("permission rule"));
        }

        if text.contains('(') || text.contains(')') {
            return Self::parse_scoped(text);
        }

        if text.contains('/') || text.contains('.') {
            return Ok(Self {
                source: text.to_string(),
                tool: Pattern::Any,
                target: compile_target(text, text)?,
            });
        }

        Ok(Self {
            source: text.to_string(),
            tool: compile_tool(text, text)?,
            target: Pattern::Any,
        })
    }

    /// `Tool(pattern)` form
    fn parse_scoped(text: &str) -> SecurityResult<Self> {
        let mut depth: usize = 0;
        for c in text.chars() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| SecurityError::invalid_rule(text, "unbalanced parentheses"))?;
                }
                _ => {}
            }
        }
        if depth != 0 {
            return Err(SecurityError::invalid_rule(text, "unbalanced parentheses"));
        }

        let (Some(open), true) = (text.find('('), text.ends_with(')')) else {
            return Err(SecurityError::invalid_rule(text, "expected Tool(pattern)"));
        };

        let tool = text[..open].trim();
        if tool.is_empty() {
            return Err(SecurityError::invalid_rule(text, "missing tool name"));
        }

        let pattern = text[open + 1..text.len() - 1].trim();
        if pattern.is_empty() {
            return Err(SecurityError::invalid_rule(text, "empty pattern"));
        }

        Ok(Self {
            source: text.to_string(),
            tool: Pattern::Exact(tool.to_lowercase()),
            target: compile_target(text, pattern)?,
        })
    }

    /// Check whether the rule applies to a call
    pub fn matches(&self, tool: &str, target: &str) -> bool {
        self.tool.matches(tool) && self.target.matches(target)
    }

    /// Original rule text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Tool predicate
    pub fn tool_pattern(&self) -> &Pattern {
        &self.tool
    }

    /// Target predicate
    pub fn target_pattern(&self) -> &Pattern {
        &self.target
    }

    /// Higher is more specific; used to order rules within a tier
    pub fn specificity(&self) -> u8 {
        self.tool.specificity() + self.target.specificity()
    }
}

fn strip_regex_prefix(pattern: &str) -> Option<&str> {
    REGEX_PREFIXES
        .iter()
        .find_map(|prefix| pattern.strip_prefix(prefix))
}

fn compile_regex(rule: &str, pattern: &str, case_insensitive: bool) -> SecurityResult<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|source| SecurityError::InvalidRegex {
            rule: rule.to_string(),
            source,
        })
}

/// Compile a target pattern (glob or `regex:`)
fn compile_target(rule: &str, pattern: &str) -> SecurityResult<Pattern> {
    if let Some(expr) = strip_regex_prefix(pattern) {
        if expr.is_empty() {
            return Err(SecurityError::invalid_rule(rule, "empty regex"));
        }
        return Ok(Pattern::Regex(compile_regex(rule, expr, false)?));
    }
    Ok(Pattern::Glob(compile_regex(rule, &glob_to_regex(pattern), false)?))
}

/// Compile a bare tool-name pattern (exact, glob or `regex:`)
fn compile_tool(rule: &str, pattern: &str) -> SecurityResult<Pattern> {
    if let Some(expr) = strip_regex_prefix(pattern) {
        if expr.is_empty() {
            return Err(SecurityError::invalid_rule(rule, "empty regex"));
        }
        return Ok(Pattern::Regex(compile_regex(rule, expr, true)?));
    }
    if pattern.contains(['*', '?']) {
        return Ok(Pattern::Glob(compile_regex(rule, &glob_to_regex(pattern), true)?));
    }
    Ok(Pattern::Exact(pattern.to_lowercase()))
}

/// Translate a glob to an anchored regex
///
/// `*` and `**` become `.*`, `?` becomes `.`, everything else is escaped.
pub fn glob_to_regex(glob: &str) -> String {
    let mut regex = String::from("^");
    let mut chars = glob.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' => {
                while chars.peek() == Some(&'*') {
                    chars.next();
                }
                regex.push_str(".*");
            }
            '?' => regex.push('.'),
            _ => {
                let mut buf = [0u8; 4];
                regex.push_str(&regex::escape(c.encode_utf8(&mut buf)));
            }
        }
    }

    regex.push('$');
    regex
}
