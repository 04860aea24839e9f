//! Command text normalization and tokenization.
//!
//! Rules never see the raw command. They match against a [`CommandText`]:
//! a lowercased, quote-stripped, whitespace-collapsed form split into word
//! and operator tokens.

/// Shell metacharacters that chain, redirect or substitute, in check order.
///
/// Multi-character sequences come first so `&&` is reported as `&&` rather
/// than `&`.
const METACHARS: &[(&str, &str)] = &[
    ("$(", "$("),
    ("`", "`"),
    ("&&", "&&"),
    ("||", "||"),
    (";", ";"),
    ("|", "|"),
    ("&", "&"),
    (">", ">"),
    ("<", "<"),
    ("\n", "newline"),
    ("\r", "newline"),
];

/// Characters that start an operator token.
const OPERATOR_CHARS: &[char] = &[';', '|', '&', '<', '>', '(', ')', '`'];

/// Programs that run another program given as a later argument.
const WRAPPERS: &[&str] = &[
    "sudo", "doas", "env", "nohup", "nice", "ionice", "time", "exec", "command", "builtin",
    "xargs", "timeout", "stdbuf", "setsid", "busybox",
];

/// A command prepared for rule matching.
#[derive(Debug, Clone)]
pub struct CommandText {
    /// Lowercased, quotes and backslashes removed, whitespace collapsed.
    pub normalized: String,
    /// `normalized` with all whitespace removed.
    pub compact: String,
    /// Word and operator tokens. A token in command position is reduced to
    /// its program name, so `/sbin/reboot` reads as `reboot`.
    pub tokens: Vec<String>,
    /// Indices of tokens that sit in command position.
    pub command_positions: Vec<usize>,
}

impl CommandText {
    pub fn parse(raw: &str) -> Self {
        let normalized = normalize(raw);
        let compact: String = normalized.chars().filter(|c| !c.is_whitespace()).collect();
        let mut tokens = tokenize(&normalized);
        let command_positions = command_positions(&tokens);
        for &idx in &command_positions {
            let name = program_name(&tokens[idx]);
            if name.len() != tokens[idx].len() {
                tokens[idx] = name.to_string();
            }
        }
        Self {
            normalized,
            compact,
            tokens,
            command_positions,
        }
    }
}

/// First shell metacharacter found in `raw`, as it should appear in a rule id.
///
/// The scan is quote-unaware: a `;` inside quotes is still reported.
pub fn find_metachar(raw: &str) -> Option<&'static str> {
    METACHARS
        .iter()
        .find(|(needle, _)| raw.contains(needle))
        .map(|(_, label)| *label)
}

/// Lowercase, drop quoting characters and collapse runs of whitespace.
pub fn normalize(raw: &str) -> String {
    let unquoted: String = raw
        .chars()
        .filter(|c| !matches!(c, '\'' | '"' | '\\'))
        .flat_map(char::to_lowercase)
        .collect();
    unquoted.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split into word tokens and operator tokens.
///
/// Consecutive operator characters form one token (`&&`, `>>`, `2>` is split
/// as `2` then `>`). `$(` is kept together as an operator.
pub fn tokenize(normalized: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut chars = normalized.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_whitespace() {
            flush(&mut word, &mut tokens);
            continue;
        }

        if c == '$' && chars.peek() == Some(&'(') {
            flush(&mut word, &mut tokens);
            chars.next();
            tokens.push("$(".to_string());
            continue;
        }

        if OPERATOR_CHARS.contains(&c) {
            flush(&mut word, &mut tokens);
            let mut op = String::from(c);
            while let Some(next) = chars.peek() {
                if OPERATOR_CHARS.contains(next) {
                    op.push(*next);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(op);
            continue;
        }

        word.push(c);
    }
    flush(&mut word, &mut tokens);
    tokens
}

fn flush(word: &mut String, tokens: &mut Vec<String>) {
    if !word.is_empty() {
        tokens.push(std::mem::take(word));
    }
}

pub fn is_operator(token: &str) -> bool {
    token == "$(" || token.chars().all(|c| OPERATOR_CHARS.contains(&c))
}

/// The part of a program path after the last `/`.
pub fn program_name(token: &str) -> &str {
    match token.rsplit_once('/') {
        Some((_, name)) if !name.is_empty() => name,
        _ => token,
    }
}

fn is_assignment(token: &str) -> bool {
    match token.split_once('=') {
        Some((name, _)) => {
            !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

/// Option, number or duration argument of a wrapper (`-n`, `10`, `5s`).
fn is_wrapper_argument(token: &str) -> bool {
    if token.starts_with('-') || is_assignment(token) {
        return true;
    }
    let digits = token.trim_end_matches(['s', 'm', 'h', 'd']);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
}

/// Indices of tokens that name the program being run.
///
/// The first word, the first word after every operator, and the program
/// handed to a wrapper such as `sudo` or `timeout 10` are all in command
/// position. Leading `NAME=value` assignments are skipped.
pub fn command_positions(tokens: &[String]) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut expecting_command = true;
    let mut after_wrapper = false;

    for (idx, token) in tokens.iter().enumerate() {
        if is_operator(token) {
            expecting_command = true;
            after_wrapper = false;
            continue;
        }
        if !expecting_command {
            continue;
        }
        if is_assignment(token) || (after_wrapper && is_wrapper_argument(token)) {
            continue;
        }

        positions.push(idx);
        after_wrapper = WRAPPERS.contains(&program_name(token));
        expecting_command = after_wrapper;
    }
    positions
}

#[cfg(test)]
mod tests {
    use super::*;

    mod normalization {
        use super::*;

        #[test]
        fn test_collapses_whitespace_and_case() {
            assert_eq!(normalize("  RM   -RF   /*  "), "rm -rf /*");
        }

        #[test]
        fn test_strips_quotes_and_backslashes() {
            assert_eq!(normalize(r#"r\m -rf "/""#), "rm -rf /");
            assert_eq!(normalize("'sudo' reboot"), "sudo reboot");
        }

        #[test]
        fn test_tabs_and_newlines_are_whitespace() {
            assert_eq!(normalize("ls\t-la\n"), "ls -la");
        }
    }

    mod tokens {
        use super::*;

        #[test]
        fn test_words() {
            assert_eq!(tokenize("ls -la /tmp"), vec!["ls", "-la", "/tmp"]);
        }

        #[test]
        fn test_operators_split_from_words() {
            assert_eq!(
                tokenize("echo hi>/etc/passwd&&ls"),
                vec!["echo", "hi", ">", "/etc/passwd", "&&", "ls"]
            );
        }

        #[test]
        fn test_substitution_operator() {
            assert_eq!(tokenize("echo $(rm -rf /)"), vec!["echo", "$(", "rm", "-rf", "/", ")"]);
        }

        #[test]
        fn test_variables_stay_words() {
            assert_eq!(tokenize("rm -rf $home ${home}"), vec!["rm", "-rf", "$home", "${home}"]);
        }
    }

    mod positions {
        use super::*;

        fn positions_of(command: &str) -> Vec<String> {
            let text = CommandText::parse(command);
            text.command_positions
                .iter()
                .map(|i| text.tokens[*i].clone())
                .collect()
        }

        #[test]
        fn test_first_word() {
            assert_eq!(positions_of("ls -la"), vec!["ls"]);
        }

        #[test]
        fn test_after_operators() {
            assert_eq!(positions_of("cd /tmp && rm -rf x | wc"), vec!["cd", "rm", "wc"]);
        }

        #[test]
        fn test_through_wrappers() {
            assert_eq!(positions_of("sudo -n rm -rf /"), vec!["sudo", "rm"]);
            assert_eq!(positions_of("timeout 10s nice -n 5 reboot"), vec!["timeout", "nice", "reboot"]);
        }

        #[test]
        fn test_paths_reduce_to_program_name() {
            assert_eq!(positions_of("/sbin/reboot"), vec!["reboot"]);
            assert_eq!(positions_of("/usr/bin/sudo /bin/rm -rf /"), vec!["sudo", "rm"]);
            assert_eq!(positions_of("./deploy.sh && ls"), vec!["deploy.sh", "ls"]);
        }

        #[test]
        fn test_arguments_keep_their_paths() {
            let text = CommandText::parse("/bin/ls /sbin/reboot");
            assert_eq!(text.tokens, vec!["ls", "/sbin/reboot"]);
        }

        #[test]
        fn test_program_name() {
            assert_eq!(program_name("/usr/sbin/mkfs.ext4"), "mkfs.ext4");
            assert_eq!(program_name("rm"), "rm");
            assert_eq!(program_name("/"), "/");
            assert_eq!(program_name("dir/"), "dir/");
        }

        #[test]
        fn test_skips_assignments() {
            assert_eq!(positions_of("LANG=C FOO=bar shutdown now"), vec!["shutdown"]);
        }
    }

    mod metachars {
        use super::*;

        #[test]
        fn test_detects_each_class() {
            assert_eq!(find_metachar("ls; rm"), Some(";"));
            assert_eq!(find_metachar("a && b"), Some("&&"));
            assert_eq!(find_metachar("a || b"), Some("||"));
            assert_eq!(find_metachar("ps | grep x"), Some("|"));
            assert_eq!(find_metachar("echo `id`"), Some("`"));
            assert_eq!(find_metachar("echo $(id)"), Some("$("));
            assert_eq!(find_metachar("echo x > f"), Some(">"));
            assert_eq!(find_metachar("wc < f"), Some("<"));
            assert_eq!(find_metachar("ls\nrm"), Some("newline"));
        }

        #[test]
        fn test_plain_commands_have_none() {
            assert_eq!(find_metachar("ls -la /var/log"), None);
            assert_eq!(find_metachar("echo $HOME"), None);
        }
    }
}
