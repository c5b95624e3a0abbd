//! Workspace-scoped path guard.
//!
//! Every path named by a client is resolved here before any filesystem
//! operation. Resolution is purely lexical: `.` and `..` are collapsed
//! without touching the filesystem, and symlinks are deliberately not
//! resolved so a rejection message can never leak a link target.

use std::path::{Component, Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde_json::json;

use agentbox_protocol::ErrorCode;

use crate::error::{ToolError, ToolResult};

/// Deny globs every workspace ships with, regardless of user configuration.
/// VCS hooks are intentionally absent: `.git/hooks/**` stays reachable.
const BUILTIN_DENY: &[&str] = &[
    ".git/config",
    ".git/credentials",
    ".git/objects/**",
    ".git/refs/**",
    ".ssh/**",
    "id_rsa*",
    "id_ed25519*",
    "id_ecdsa*",
    ".aws/**",
    ".env",
    ".env.*",
    "secrets/**",
    ".secrets/**",
    "*.pem",
    "*.key",
    "credentials*",
    "password*",
    "token*",
    ".npmrc",
    ".pypirc",
    ".DS_Store",
    "Thumbs.db",
];

/// A path that passed the guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Normalised absolute path, a descendant of the workspace root.
    pub absolute: PathBuf,
    /// The same path relative to the workspace root (empty for the root).
    pub relative: PathBuf,
}

struct DenySet {
    set: GlobSet,
    /// (layer order, source pattern) aligned with the set's glob indices.
    patterns: Vec<(usize, String)>,
}

impl DenySet {
    /// Lowest layer-order match for `candidate`, if any.
    fn first_match(&self, candidate: &str) -> Option<&(usize, String)> {
        self.set
            .matches(candidate)
            .into_iter()
            .map(|i| &self.patterns[i])
            .min_by_key(|(order, _)| *order)
    }
}

/// Canonicalised workspace root plus the compiled deny sets.
pub struct PathGuard {
    root: PathBuf,
    /// Patterns matched against the workspace-relative path.
    relative: DenySet,
    /// Rooted patterns (leading `/`) matched against the absolute path.
    rooted: DenySet,
}

impl PathGuard {
    /// Compile the guard for one workspace. Layering: built-in defaults,
    /// then global config denies, then workspace denies. Invalid user
    /// globs are skipped; they must never mask other rules.
    pub fn new(root: &Path, global_denies: &[String], workspace_denies: &[String]) -> Self {
        let mut relative = GlobSetBuilder::new();
        let mut relative_patterns = Vec::new();
        let mut rooted = GlobSetBuilder::new();
        let mut rooted_patterns = Vec::new();
        let mut order = 0usize;

        let mut add = |pattern: &str, source: &str, order: usize| {
            let glob = match GlobBuilder::new(pattern).literal_separator(true).build() {
                Ok(g) => g,
                Err(err) => {
                    tracing::warn!(pattern, %err, "skipping invalid deny glob");
                    return false;
                }
            };
            if pattern.starts_with('/') {
                rooted.add(glob);
                rooted_patterns.push((order, source.to_string()));
            } else {
                relative.add(glob);
                relative_patterns.push((order, source.to_string()));
            }
            true
        };

        for pattern in BUILTIN_DENY {
            // Built-ins apply at any depth: `.env` also denies `sub/.env`.
            add(pattern, pattern, order);
            if !pattern.starts_with("**/") {
                add(&format!("**/{pattern}"), pattern, order);
            }
            order += 1;
        }
        for pattern in global_denies.iter().chain(workspace_denies) {
            add(pattern, pattern, order);
            order += 1;
        }

        Self {
            root: root.to_path_buf(),
            relative: DenySet {
                set: relative.build().expect("deny glob set builds"),
                patterns: relative_patterns,
            },
            rooted: DenySet {
                set: rooted.build().expect("rooted deny glob set builds"),
                patterns: rooted_patterns,
            },
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a client-supplied path against the workspace.
    ///
    /// Relative inputs join the root; absolute inputs are taken as-is. The
    /// joined path is lexically normalised and must remain a descendant of
    /// the root, then is matched against the deny layers.
    pub fn resolve(&self, input: &str) -> ToolResult<Resolved> {
        if input.contains('\0') {
            return Err(ToolError::new(
                ErrorCode::InvalidPath,
                "path contains a NUL byte",
            ));
        }

        let candidate = Path::new(input);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };
        let absolute = normalize(&joined);

        let relative = match absolute.strip_prefix(&self.root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => {
                return Err(ToolError::new(
                    ErrorCode::ForbiddenPath,
                    format!("path escapes the workspace root: {input}"),
                )
                .with_details(json!({ "path": input })));
            }
        };

        let rel_str = relative.to_string_lossy();
        let abs_str = absolute.to_string_lossy();
        let hit = [
            self.relative.first_match(&rel_str),
            self.rooted.first_match(&abs_str),
        ]
        .into_iter()
        .flatten()
        .min_by_key(|(order, _)| *order);

        if let Some((_, pattern)) = hit {
            return Err(ToolError::new(
                ErrorCode::ForbiddenPath,
                format!("path is deny-listed: {input}"),
            )
            .with_details(json!({ "path": input, "pattern": pattern })));
        }

        Ok(Resolved { absolute, relative })
    }
}

/// Lexical normalisation: collapse `.`, fold `..` into its parent, drop
/// duplicate and trailing separators. Never consults the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                // Popping past the root leaves a literal `..`, which can
                // never be a descendant of any workspace root.
                if !out.pop() {
                    out.push("..");
                }
            }
            Component::Normal(c) => out.push(c),
        }
    }
    out
}
