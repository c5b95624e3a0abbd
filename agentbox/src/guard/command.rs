//! Command allow/deny engine.
//!
//! Layered decision, first match wins within a layer:
//! built-in always-deny, user deny, user allow, built-in default allow,
//! and finally a fallthrough deny. The always-deny layer is not
//! overridable by configuration.

use std::sync::OnceLock;

use regex::Regex;

use agentbox_protocol::ErrorCode;

use crate::error::{ToolError, ToolResult};

/// Built-in always-deny rules: (label, regex). Matched against the
/// reconstituted command line.
const ALWAYS_DENY: &[(&str, &str)] = &[
    (
        "rm targeting the filesystem root or home",
        r"^rm\s+(-\S+\s+)*(/|~)(\s|$)",
    ),
    ("rm without root preservation", r"^rm\s.*--no-preserve-root"),
    ("filesystem creation", r"^mkfs"),
    ("raw device write via dd", r"^dd\s.*\bof=/dev/"),
    (
        "curl posting local data",
        r"^curl\s.*(\s-d|--data\S*)\s*@",
    ),
    ("wget posting a file", r"^wget\s.*--post-file"),
    ("remote copy via scp", r"^scp\s.*\S+:"),
    ("remote sync via rsync", r"^rsync\s.*\S+:"),
    ("privilege escalation", r"^(sudo|su|doas)\b"),
    ("crontab scheduling", r"^crontab\b"),
    ("at scheduling", r"^at\s"),
    (
        "service control via systemctl",
        r"^systemctl\s+(start|stop|restart|enable|disable)\b",
    ),
    (
        "service control via service",
        r"^service\s+\S+\s+(start|stop|restart)\b",
    ),
    (
        "service control via launchctl",
        r"^launchctl\s+(load|unload|kickstart)\b",
    ),
    (
        "system package mutation via apt",
        r"^(apt|apt-get)\s+(install|remove|purge)\b",
    ),
    (
        "system package mutation via yum/dnf",
        r"^(yum|dnf)\s+(install|remove)\b",
    ),
    (
        "system package mutation via brew",
        r"^brew\s+(install|uninstall|remove)\b",
    ),
    ("chained shell invocation", r";\s*(sh|bash|zsh|dash|fish)\b"),
    ("piped shell invocation", r"\|\s*(sh|bash|zsh|dash|fish)\b"),
    ("backtick command substitution", r"`"),
    ("dollar command substitution", r"\$\("),
    ("environment export", r"^export\s+\w+="),
    ("environment override via env", r"^env\s+\w+="),
    (
        "inline interpreter escape",
        r"^(python3?|perl|ruby|node|deno|bun)\b.*\s(-c|-e|--eval)\s.*(os|sys|subprocess|socket|child_process|require|net|fs)",
    ),
];

/// Built-in default allowlist: version probes, build/test runners, linters,
/// read-only package-manager and VCS subcommands, plain file viewers.
const DEFAULT_ALLOW: &[&str] = &[
    r"^\S+\s+(--version|-V|version)\s*$",
    r"^cargo\s+(build|check|test|fmt|clippy|doc|metadata|tree|bench)\b",
    r"^go\s+(build|test|vet|env|list|version)\b",
    r"^(npm|pnpm|yarn)\s+(test|ls|list|view|info|outdated|audit)\b",
    r"^(npm|pnpm|yarn)\s+run\s+(build|test|lint|typecheck|check|format)\b",
    r"^npx\s+(tsc|eslint|prettier|jest|vitest)\b",
    r"^pip3?\s+(list|show|freeze|check)\b",
    r"^(pytest|tox)\b",
    r"^make(\s+[A-Za-z0-9_.-]+)*\s*$",
    r"^mvn\s+(test|compile|verify|package)\b",
    r"^(gradle|gradlew|\./gradlew)\s+(test|build|check|assemble)\b",
    r"^(eslint|prettier|ruff|black|isort|flake8|mypy|pylint|gofmt|goimports|rustfmt|shellcheck|clang-format)\b",
    r"^tsc\b",
    r"^git\s+(status|log|diff|show|branch|tag|remote|ls-files)\b",
    r"^(ls|cat|head|tail|wc|grep|rg|bat|eza|exa|fd|find|tree|file|stat|du|pwd|which)(\s|$)",
];

fn always_deny() -> &'static Vec<(&'static str, Regex)> {
    static RULES: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    RULES.get_or_init(|| {
        ALWAYS_DENY
            .iter()
            .map(|(label, pattern)| (*label, Regex::new(pattern).expect("built-in deny regex")))
            .collect()
    })
}

fn default_allow() -> &'static Vec<Regex> {
    static RULES: OnceLock<Vec<Regex>> = OnceLock::new();
    RULES.get_or_init(|| {
        DEFAULT_ALLOW
            .iter()
            .map(|pattern| Regex::new(pattern).expect("built-in allow regex"))
            .collect()
    })
}

/// Outcome of command validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow { rule: String },
    Deny { reason: String, pattern: Option<String> },
}

impl Verdict {
    pub fn is_allow(&self) -> bool {
        matches!(self, Verdict::Allow { .. })
    }

    /// Convert a deny verdict into the outward error.
    pub fn into_result(self) -> ToolResult<()> {
        match self {
            Verdict::Allow { .. } => Ok(()),
            Verdict::Deny { reason, pattern } => {
                let mut err = ToolError::new(ErrorCode::CommandDenied, reason);
                if let Some(pattern) = pattern {
                    err = err.with_details(serde_json::json!({ "pattern": pattern }));
                }
                Err(err)
            }
        }
    }
}

/// Compiled user allow/deny lists layered under the built-ins.
pub struct CommandValidator {
    user_allow: Vec<(String, Regex)>,
    user_deny: Vec<(String, Regex)>,
}

impl CommandValidator {
    /// Compile the user lists. Invalid regexes are skipped with a warning;
    /// they must never prevent other rules from being considered.
    pub fn new(allow: &[String], deny: &[String]) -> Self {
        Self {
            user_allow: compile_user(allow, "allow"),
            user_deny: compile_user(deny, "deny"),
        }
    }

    /// Decide whether `command` plus `args` may be spawned.
    pub fn validate(&self, command: &str, args: &[String]) -> Verdict {
        let line = if args.is_empty() {
            command.to_string()
        } else {
            format!("{} {}", command, args.join(" "))
        };
        let line = line.trim();

        for (label, re) in always_deny() {
            if re.is_match(line) {
                return Verdict::Deny {
                    reason: format!("matches built-in deny rule: {label}"),
                    pattern: Some(re.as_str().to_string()),
                };
            }
        }
        for (source, re) in &self.user_deny {
            if re.is_match(line) {
                return Verdict::Deny {
                    reason: "matches user deny pattern".to_string(),
                    pattern: Some(source.clone()),
                };
            }
        }
        for (source, re) in &self.user_allow {
            if re.is_match(line) {
                return Verdict::Allow {
                    rule: format!("user allow: {source}"),
                };
            }
        }
        for re in default_allow() {
            if re.is_match(line) {
                return Verdict::Allow {
                    rule: "built-in allowlist".to_string(),
                };
            }
        }
        Verdict::Deny {
            reason: "not in allowlist".to_string(),
            pattern: None,
        }
    }
}

fn compile_user(patterns: &[String], kind: &str) -> Vec<(String, Regex)> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(re) => Some((pattern.clone(), re)),
            Err(err) => {
                tracing::warn!(pattern = %pattern, kind, %err, "skipping invalid command regex");
                None
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Shell-string tokeniser
// ---------------------------------------------------------------------------

/// Split a user-provided command string into tokens. Single and double
/// quotes group words (each transparent to the other), `\x` escapes to the
/// literal `x` outside single quotes, and runs of whitespace collapse.
pub fn tokenize(input: &str) -> ToolResult<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut pending = false;
    let mut in_single = false;
    let mut in_double = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' if !in_single => match chars.next() {
                Some(escaped) => {
                    current.push(escaped);
                    pending = true;
                }
                None => {
                    return Err(ToolError::new(
                        ErrorCode::CommandDenied,
                        "trailing backslash in command string",
                    ));
                }
            },
            '\'' if !in_double => {
                in_single = !in_single;
                pending = true;
            }
            '"' if !in_single => {
                in_double = !in_double;
                pending = true;
            }
            c if c.is_whitespace() && !in_single && !in_double => {
                if pending {
                    tokens.push(std::mem::take(&mut current));
                    pending = false;
                }
            }
            c => {
                current.push(c);
                pending = true;
            }
        }
    }

    if in_single || in_double {
        return Err(ToolError::new(
            ErrorCode::CommandDenied,
            "unbalanced quote in command string",
        ));
    }
    if pending {
        tokens.push(current);
    }
    Ok(tokens)
}
