//! Command validation.
//!
//! Every command is checked against an ordered list of [`CommandRule`]s before
//! any connection is opened. The first rule that objects decides the verdict.
//!
//! # Default Order
//!
//! 1. Empty or whitespace-only command (`EMPTY`)
//! 2. Shell metacharacters, when [`ShellPolicy::RejectMetachars`] is in effect (`METACHAR`)
//! 3. Denylist rules, in file order (`DENYLIST`)
//!
//! # Limitations
//!
//! Validation is static pattern matching. A command can still reach a
//! destructive effect through a script, an alias, or an environment variable
//! that expands to a denied program. Those are not detected.

mod rules;
mod tokenize;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub use rules::{Anchor, DenyRule, RuleKind, TokenMatcher, default_rules, load_rules};
pub use tokenize::CommandText;

use crate::gateway::config::ConfigError;
use crate::gateway::types::{ReasonCode, ValidationVerdict};

/// How commands reach the remote host, and so whether metacharacters are allowed.
///
/// Commands are always handed to the remote user's shell by the SSH exec
/// request. `RejectMetachars` refuses anything the shell would treat as
/// chaining, redirection or substitution. `AllowShell` lets pipelines through
/// and relies on the denylist alone, which then also inspects every segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShellPolicy {
    #[default]
    RejectMetachars,
    AllowShell,
}

impl fmt::Display for ShellPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShellPolicy::RejectMetachars => write!(f, "reject_metachars"),
            ShellPolicy::AllowShell => write!(f, "allow_shell"),
        }
    }
}

impl FromStr for ShellPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject_metachars" | "reject" | "strict" => Ok(ShellPolicy::RejectMetachars),
            "allow_shell" | "shell" => Ok(ShellPolicy::AllowShell),
            other => Err(format!(
                "Unknown shell policy '{}', expected 'reject_metachars' or 'allow_shell'",
                other
            )),
        }
    }
}

/// A single validation predicate.
pub trait CommandRule: Send + Sync {
    /// Identifier reported as `matched_rule` on rejection.
    fn id(&self) -> &str;

    fn reason_code(&self) -> ReasonCode;

    /// Whether the command violates this rule.
    fn violated_by(&self, raw: &str, command: &CommandText) -> bool;
}

/// Rejects empty and whitespace-only commands.
pub struct EmptyRule;

impl CommandRule for EmptyRule {
    fn id(&self) -> &str {
        "empty"
    }

    fn reason_code(&self) -> ReasonCode {
        ReasonCode::Empty
    }

    fn violated_by(&self, raw: &str, _command: &CommandText) -> bool {
        raw.trim().is_empty()
    }
}

/// Rejects shell chaining, redirection and substitution characters.
///
/// Reports the specific character as `metachar:<char>`.
pub struct MetacharRule;

impl MetacharRule {
    fn matched(raw: &str) -> Option<String> {
        tokenize::find_metachar(raw).map(|m| format!("metachar:{}", m))
    }
}

impl CommandRule for MetacharRule {
    fn id(&self) -> &str {
        "metachar"
    }

    fn reason_code(&self) -> ReasonCode {
        ReasonCode::Metachar
    }

    fn violated_by(&self, raw: &str, _command: &CommandText) -> bool {
        Self::matched(raw).is_some()
    }
}

impl CommandRule for DenyRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn reason_code(&self) -> ReasonCode {
        ReasonCode::Denylist
    }

    fn violated_by(&self, _raw: &str, command: &CommandText) -> bool {
        self.matches(command)
    }
}

/// Ordered rule chain producing a [`ValidationVerdict`].
pub struct CommandValidator {
    policy: ShellPolicy,
    rules: Vec<Box<dyn CommandRule>>,
}

impl CommandValidator {
    /// Build the standard chain around the given denylist.
    pub fn new(policy: ShellPolicy, denylist: Vec<DenyRule>) -> Self {
        let mut rules: Vec<Box<dyn CommandRule>> = vec![Box::new(EmptyRule)];
        if policy == ShellPolicy::RejectMetachars {
            rules.push(Box::new(MetacharRule));
        }
        rules.extend(
            denylist
                .into_iter()
                .map(|rule| Box::new(rule) as Box<dyn CommandRule>),
        );
        Self { policy, rules }
    }

    pub fn with_default_rules(policy: ShellPolicy) -> Self {
        Self::new(policy, default_rules())
    }

    /// Use the rule file at `path` when given, the built-in rules otherwise.
    pub fn from_rule_file(policy: ShellPolicy, path: Option<&Path>) -> Result<Self, ConfigError> {
        let denylist = match path {
            Some(path) => load_rules(path)?,
            None => default_rules(),
        };
        Ok(Self::new(policy, denylist))
    }

    /// Append a rule after the existing ones.
    pub fn push_rule(&mut self, rule: Box<dyn CommandRule>) {
        self.rules.push(rule);
    }

    pub fn policy(&self) -> ShellPolicy {
        self.policy
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn validate(&self, raw: &str) -> ValidationVerdict {
        let command = CommandText::parse(raw);

        for rule in &self.rules {
            if !rule.violated_by(raw, &command) {
                continue;
            }
            let matched_rule = match rule.reason_code() {
                ReasonCode::Metachar => {
                    MetacharRule::matched(raw).unwrap_or_else(|| rule.id().to_string())
                }
                _ => rule.id().to_string(),
            };
            return ValidationVerdict::Rejected {
                reason_code: rule.reason_code(),
                matched_rule,
            };
        }
        ValidationVerdict::Allowed
    }
}

impl fmt::Debug for CommandValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandValidator")
            .field("policy", &self.policy)
            .field("rules", &self.rules.len())
            .finish()
    }
}
