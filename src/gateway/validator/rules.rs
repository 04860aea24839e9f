//! Denylist rules as data.
//!
//! A rule is either a token pattern matched against [`CommandText::tokens`]
//! or a set of substrings that must all appear in [`CommandText::compact`].
//! The built-in set ships as `default_rules.json`; a replacement file can be
//! supplied at startup.
//!
//! ```json
//! {
//!   "id": "rm-recursive-root",
//!   "description": "Recursive delete of / or a home directory",
//!   "kind": "tokens",
//!   "pattern": [{"word": ["rm"]}, {"flags_in_command": "r"}, "gap", {"word": ["/", "~"]}]
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::gateway::config::ConfigError;
use crate::gateway::validator::tokenize::{CommandText, is_operator};

static DEFAULT_RULES: Lazy<Vec<DenyRule>> = Lazy::new(|| {
    serde_json::from_str(include_str!("default_rules.json"))
        .expect("built-in denylist rules are valid JSON")
});

/// One destructive-command pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenyRule {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub kind: RuleKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleKind {
    /// Ordered token matchers.
    Tokens {
        #[serde(default)]
        anchor: Anchor,
        pattern: Vec<TokenMatcher>,
    },
    /// Every substring must occur in the whitespace-free command.
    Compact { contains: Vec<String> },
}

/// Where a token pattern may start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    /// Only at a token in command position.
    #[default]
    Command,
    /// At any token.
    Anywhere,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenMatcher {
    /// Token equals one of these.
    Word(Vec<String>),
    /// Token starts with one of these.
    Prefix(Vec<String>),
    /// A run of option tokens that together set every listed short flag.
    /// `--recursive` counts as `r`.
    Flags(String),
    /// Every listed short flag is set by some option token between here and
    /// the next operator or `--`. Consumes nothing, so flags may follow the
    /// operands (`rm / -rf`).
    FlagsInCommand(String),
    /// Exactly one token.
    Any,
    /// Zero or more word tokens. Never crosses an operator.
    Gap,
}

impl DenyRule {
    /// Whether this rule matches the prepared command.
    pub fn matches(&self, command: &CommandText) -> bool {
        match &self.kind {
            RuleKind::Compact { contains } => {
                !contains.is_empty() && contains.iter().all(|s| command.compact.contains(s.as_str()))
            }
            RuleKind::Tokens { anchor, pattern } => {
                if pattern.is_empty() {
                    return false;
                }
                let tokens = &command.tokens;
                match anchor {
                    Anchor::Command => command
                        .command_positions
                        .iter()
                        .any(|&start| match_from(pattern, tokens, start)),
                    Anchor::Anywhere => (0..tokens.len()).any(|start| match_from(pattern, tokens, start)),
                }
            }
        }
    }
}

fn match_from(pattern: &[TokenMatcher], tokens: &[String], idx: usize) -> bool {
    let Some((first, rest)) = pattern.split_first() else {
        return true;
    };

    match first {
        TokenMatcher::Gap => {
            let mut pos = idx;
            loop {
                if match_from(rest, tokens, pos) {
                    return true;
                }
                match tokens.get(pos) {
                    Some(token) if !is_operator(token) => pos += 1,
                    _ => return false,
                }
            }
        }
        TokenMatcher::Flags(required) => {
            let mut pos = idx;
            let mut seen = HashSet::new();
            while let Some(token) = tokens.get(pos) {
                if !is_option(token) {
                    break;
                }
                collect_flags(token, &mut seen);
                pos += 1;
            }
            pos > idx && required.chars().all(|c| seen.contains(&c)) && match_from(rest, tokens, pos)
        }
        TokenMatcher::FlagsInCommand(required) => {
            let mut seen = HashSet::new();
            for token in tokens[idx.min(tokens.len())..]
                .iter()
                .take_while(|t| !is_operator(t) && t.as_str() != "--")
            {
                if is_option(token) {
                    collect_flags(token, &mut seen);
                }
            }
            required.chars().all(|c| seen.contains(&c)) && match_from(rest, tokens, idx)
        }
        single => match tokens.get(idx) {
            Some(token) if matches_single(single, token) => match_from(rest, tokens, idx + 1),
            _ => false,
        },
    }
}

fn matches_single(matcher: &TokenMatcher, token: &str) -> bool {
    match matcher {
        TokenMatcher::Word(words) => words.iter().any(|w| w == token),
        TokenMatcher::Prefix(prefixes) => prefixes.iter().any(|p| token.starts_with(p.as_str())),
        TokenMatcher::Any => !is_operator(token),
        TokenMatcher::Flags(_) | TokenMatcher::FlagsInCommand(_) | TokenMatcher::Gap => false,
    }
}

fn is_option(token: &str) -> bool {
    token.len() > 1 && token.starts_with('-') && token != "--"
}

fn collect_flags(token: &str, seen: &mut HashSet<char>) {
    if let Some(long) = token.strip_prefix("--") {
        if let Some(c) = long.chars().next() {
            seen.insert(c);
        }
    } else {
        seen.extend(token.chars().skip(1));
    }
}

/// The built-in destructive-command rules.
pub fn default_rules() -> Vec<DenyRule> {
    DEFAULT_RULES.clone()
}

/// Load a rule file. The file replaces the built-in set.
pub fn load_rules(path: &Path) -> Result<Vec<DenyRule>, ConfigError> {
    let denylist_error = |reason: String| ConfigError::Denylist {
        path: path.display().to_string(),
        reason,
    };

    let content = std::fs::read_to_string(path).map_err(|e| denylist_error(e.to_string()))?;
    let rules: Vec<DenyRule> =
        serde_json::from_str(&content).map_err(|e| denylist_error(e.to_string()))?;

    let mut ids = HashSet::new();
    for rule in &rules {
        if rule.id.trim().is_empty() {
            return Err(denylist_error("rule with empty id".to_string()));
        }
        if !ids.insert(rule.id.as_str()) {
            return Err(denylist_error(format!("duplicate rule id '{}'", rule.id)));
        }
        let empty = match &rule.kind {
            RuleKind::Tokens { pattern, .. } => pattern.is_empty(),
            RuleKind::Compact { contains } => contains.is_empty(),
        };
        if empty {
            return Err(denylist_error(format!("rule '{}' has an empty pattern", rule.id)));
        }
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_match(command: &str) -> Option<String> {
        let text = CommandText::parse(command);
        default_rules()
            .into_iter()
            .find(|rule| rule.matches(&text))
            .map(|rule| rule.id)
    }

    mod builtin {
        use super::*;

        #[test]
        fn test_rules_parse_with_unique_ids() {
            let rules = default_rules();
            assert!(!rules.is_empty());
            let ids: HashSet<_> = rules.iter().map(|r| r.id.as_str()).collect();
            assert_eq!(ids.len(), rules.len());
        }

        #[test]
        fn test_recursive_delete_of_root_and_home() {
            for cmd in [
                "rm -rf /",
                "rm -rf /*",
                "rm -rf ~",
                "rm -fr ~/",
                "rm -r -f /",
                "rm --recursive --force /",
                "rm -rf --no-preserve-root /",
                "rm -rf $HOME",
                "rm -rf /tmp/x /",
                "  RM   -RF   /*  ",
                "/bin/rm -rf /",
                "/usr/bin/rm -rf ~",
                "rm ~ -rf",
                "rm / -rf --no-preserve-root",
                "rm -f / -r",
            ] {
                assert_eq!(first_match(cmd).as_deref(), Some("rm-recursive-root"), "{cmd}");
            }
        }

        #[test]
        fn test_scoped_deletes_are_allowed() {
            for cmd in [
                "rm -rf /tmp/build",
                "rm -rf ./target",
                "rm file.txt",
                "rm -f /tmp/x",
                "rm / -f",
                "rm -- -rf",
            ] {
                assert_eq!(first_match(cmd), None, "{cmd}");
            }
        }

        #[test]
        fn test_disk_tools() {
            assert_eq!(first_match("mkfs.ext4 /dev/sda1").as_deref(), Some("disk-format"));
            assert_eq!(first_match("MKFS -t xfs /dev/vdb").as_deref(), Some("disk-format"));
            assert_eq!(
                first_match("/sbin/mkfs.ext4 /dev/sda1").as_deref(),
                Some("disk-format")
            );
            assert_eq!(first_match("wipefs -a /dev/sdb").as_deref(), Some("disk-partition-tools"));
            assert_eq!(
                first_match("dd if=/dev/zero of=/dev/sda bs=1M").as_deref(),
                Some("dd-block-device")
            );
            assert_eq!(first_match("dd if=/dev/sda of=/tmp/disk.img"), None);
        }

        #[test]
        fn test_fork_bomb() {
            assert_eq!(first_match(":(){ :|:& };:").as_deref(), Some("fork-bomb"));
            assert_eq!(first_match("bomb() { bomb | bomb & }; bomb").as_deref(), Some("fork-bomb"));
        }

        #[test]
        fn test_privileged_destructive() {
            assert_eq!(first_match("sudo rm -rf ~").as_deref(), Some("rm-recursive-root"));
            assert_eq!(
                first_match("sudo rm /var/log/syslog").as_deref(),
                Some("privileged-destructive")
            );
            assert_eq!(
                first_match("sudo -u root shred file").as_deref(),
                Some("privileged-destructive")
            );
            assert_eq!(first_match("sudo mkfs.ext4 /dev/sdb").as_deref(), Some("disk-format"));
            assert_eq!(
                first_match("sudo /bin/rm -rf /tmp/x").as_deref(),
                Some("privileged-destructive")
            );
            assert_eq!(first_match("sudo systemctl status nginx"), None);
        }

        #[test]
        fn test_power_state() {
            for cmd in [
                "shutdown -h now",
                "reboot",
                "sudo reboot",
                "poweroff",
                "halt",
                "/sbin/reboot",
                "/sbin/shutdown -h now",
                "/usr/bin/sudo /usr/sbin/poweroff",
            ] {
                assert_eq!(first_match(cmd).as_deref(), Some("power-state"), "{cmd}");
            }
            assert_eq!(first_match("init 0").as_deref(), Some("init-runlevel"));
            assert_eq!(first_match("systemctl reboot").as_deref(), Some("systemctl-power"));
            assert_eq!(first_match("systemctl restart nginx"), None);
        }

        #[test]
        fn test_system_files() {
            assert_eq!(
                first_match("echo root::0:0::/:/bin/sh > /etc/passwd").as_deref(),
                Some("system-file-redirect")
            );
            assert_eq!(
                first_match("cp /tmp/shadow /etc/shadow").as_deref(),
                Some("system-file-write")
            );
            assert_eq!(
                first_match("tee -a /etc/sudoers").as_deref(),
                Some("system-file-write")
            );
            assert_eq!(
                first_match("sed -i s/x/y/ /etc/passwd").as_deref(),
                Some("system-file-sed")
            );
            assert_eq!(first_match("cat /etc/passwd"), None);
            assert_eq!(first_match("grep root /etc/shadow"), None);
        }

        #[test]
        fn test_everyday_commands_are_allowed() {
            for cmd in [
                "ls -la",
                "whoami",
                "cat file.txt",
                "df -h",
                "uptime",
                "systemctl status sshd",
                "docker ps -a",
                "tail -n 100 /var/log/syslog",
                "find /var/log -name *.gz",
                "ddate",
                "rmdir empty",
            ] {
                assert_eq!(first_match(cmd), None, "{cmd}");
            }
        }
    }

    mod matching {
        use super::*;

        fn tokens_rule(anchor: Anchor, pattern: Vec<TokenMatcher>) -> DenyRule {
            DenyRule {
                id: "test".into(),
                description: String::new(),
                kind: RuleKind::Tokens { anchor, pattern },
            }
        }

        #[test]
        fn test_command_anchor_ignores_arguments() {
            let rule = tokens_rule(Anchor::Command, vec![TokenMatcher::Word(vec!["reboot".into()])]);
            assert!(rule.matches(&CommandText::parse("reboot")));
            assert!(!rule.matches(&CommandText::parse("echo reboot")));
        }

        #[test]
        fn test_anywhere_anchor() {
            let rule = tokens_rule(Anchor::Anywhere, vec![TokenMatcher::Word(vec!["reboot".into()])]);
            assert!(rule.matches(&CommandText::parse("echo reboot")));
        }

        #[test]
        fn test_gap_does_not_cross_operators() {
            let rule = tokens_rule(
                Anchor::Command,
                vec![
                    TokenMatcher::Word(vec!["sudo".into()]),
                    TokenMatcher::Gap,
                    TokenMatcher::Word(vec!["rm".into()]),
                ],
            );
            assert!(rule.matches(&CommandText::parse("sudo -E rm x")));
            assert!(!rule.matches(&CommandText::parse("sudo -v ; echo rm")));
        }

        #[test]
        fn test_flags_require_every_letter() {
            let rule = tokens_rule(
                Anchor::Command,
                vec![TokenMatcher::Word(vec!["rm".into()]), TokenMatcher::Flags("rf".into())],
            );
            assert!(rule.matches(&CommandText::parse("rm -fR")));
            assert!(rule.matches(&CommandText::parse("rm -r --force")));
            assert!(!rule.matches(&CommandText::parse("rm -r")));
            assert!(!rule.matches(&CommandText::parse("rm x")));
        }

        #[test]
        fn test_flags_in_command_look_past_operands() {
            let rule = tokens_rule(
                Anchor::Command,
                vec![
                    TokenMatcher::Word(vec!["rm".into()]),
                    TokenMatcher::FlagsInCommand("r".into()),
                    TokenMatcher::Gap,
                    TokenMatcher::Word(vec!["/".into()]),
                ],
            );
            assert!(rule.matches(&CommandText::parse("rm -r /")));
            assert!(rule.matches(&CommandText::parse("rm / -r")));
            assert!(!rule.matches(&CommandText::parse("rm /")));
            assert!(!rule.matches(&CommandText::parse("rm / -- -r")));
            assert!(!rule.matches(&CommandText::parse("rm / && ls -r")));
        }

        #[test]
        fn test_empty_pattern_never_matches() {
            let rule = tokens_rule(Anchor::Anywhere, Vec::new());
            assert!(!rule.matches(&CommandText::parse("anything")));
        }

        #[test]
        fn test_rule_json_shape() {
            let json = r#"{
                "id": "no-curl",
                "kind": "tokens",
                "pattern": [{"word": ["curl"]}, "gap", {"prefix": ["http://"]}]
            }"#;
            let rule: DenyRule = serde_json::from_str(json).expect("parse");
            assert_eq!(
                rule.kind,
                RuleKind::Tokens {
                    anchor: Anchor::Command,
                    pattern: vec![
                        TokenMatcher::Word(vec!["curl".into()]),
                        TokenMatcher::Gap,
                        TokenMatcher::Prefix(vec!["http://".into()]),
                    ],
                }
            );
            assert!(rule.matches(&CommandText::parse("curl -s http://example.com")));
        }
    }

    mod loading {
        use super::*;
        use std::io::Write;

        fn write_rules(content: &str) -> tempfile::NamedTempFile {
            let mut file = tempfile::NamedTempFile::new().expect("temp file");
            file.write_all(content.as_bytes()).expect("write");
            file
        }

        #[test]
        fn test_load_valid_file() {
            let file = write_rules(r#"[{"id": "x", "kind": "compact", "contains": ["abc"]}]"#);
            let rules = load_rules(file.path()).expect("load");
            assert_eq!(rules.len(), 1);
            assert_eq!(rules[0].id, "x");
        }

        #[test]
        fn test_duplicate_ids_rejected() {
            let file = write_rules(
                r#"[{"id": "x", "kind": "compact", "contains": ["a"]},
                    {"id": "x", "kind": "compact", "contains": ["b"]}]"#,
            );
            assert!(matches!(load_rules(file.path()), Err(ConfigError::Denylist { .. })));
        }

        #[test]
        fn test_empty_pattern_rejected() {
            let file = write_rules(r#"[{"id": "x", "kind": "tokens", "pattern": []}]"#);
            assert!(matches!(load_rules(file.path()), Err(ConfigError::Denylist { .. })));
        }

        #[test]
        fn test_missing_file() {
            let result = load_rules(Path::new("/nonexistent/rules.json"));
            assert!(matches!(result, Err(ConfigError::Denylist { .. })));
        }
    }
}
