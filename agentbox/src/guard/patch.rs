//! Unified-diff inspector.
//!
//! Extracts every file path referenced by a patch's header lines and runs
//! each through the path guard. A single rejection fails the whole patch
//! before any byte is written.

use crate::error::ToolResult;
use crate::guard::path::{PathGuard, Resolved};

/// Collect the distinct paths referenced by `diff --git`, `---` and `+++`
/// headers, in order of first appearance. `/dev/null` entries (file
/// creation/deletion) are never included.
pub fn extract_paths(patch: &str) -> Vec<String> {
    let mut paths = Vec::new();
    let mut seen = std::collections::HashSet::new();
    let mut push = |path: Option<&str>| {
        if let Some(p) = path {
            if p != "/dev/null" && !p.is_empty() && seen.insert(p.to_string()) {
                paths.push(p.to_string());
            }
        }
    };

    for line in patch.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            // "a/<old> b/<new>"; split at the last " b/" so the old side may
            // itself contain the byte sequence " b/" without confusion.
            if let Some(idx) = rest.rfind(" b/") {
                push(strip_side(Some(&rest[..idx])));
                push(Some(&rest[idx + 3..]));
            }
        } else if let Some(rest) = line.strip_prefix("--- ") {
            push(strip_side(header_path(rest)));
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            push(strip_side(header_path(rest)));
        }
    }
    paths
}

/// Run every path referenced by the patch through the guard. Returns the
/// resolved set, or the first violation.
pub fn inspect_patch(patch: &str, guard: &PathGuard) -> ToolResult<Vec<Resolved>> {
    extract_paths(patch)
        .iter()
        .map(|path| guard.resolve(path))
        .collect()
}

/// Drop the `a/` / `b/` prefix a git-style header carries.
fn strip_side(path: Option<&str>) -> Option<&str> {
    let path = path?;
    if path == "/dev/null" {
        return Some(path);
    }
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .or(Some(path))
}

/// A `---`/`+++` header may carry a tab-separated timestamp; keep the path.
fn header_path(rest: &str) -> Option<&str> {
    let path = rest.split('\t').next()?.trim_end();
    if path.is_empty() {
        None
    } else {
        Some(path)
    }
}
