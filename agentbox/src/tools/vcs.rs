//! Version-control tools: thin wrappers over the local `git` binary.
//!
//! Invocations are internally fixed argv lists and bypass the command
//! engine; the caller influences nothing beyond the documented parameters,
//! which are passed as positional arguments after `--`. All four tools
//! require `workspace.allowVcs`.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use agentbox_protocol::ErrorCode;

use crate::config::Workspace;
use crate::error::{ToolError, ToolResult};
use crate::guard::PathGuard;

/// Internal deadline for a single git invocation.
const GIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Cap on the raw diff text returned by `vcs.diff`.
const MAX_DIFF_BYTES: usize = 500 * 1024;

pub(crate) struct GitOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    fn error_text(&self) -> &str {
        if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        }
    }
}

/// Run git with a fixed argument list in `root`.
pub(crate) async fn run_git<I, S>(root: &Path, args: I) -> ToolResult<GitOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let mut cmd = tokio::process::Command::new("git");
    cmd.args(args)
        .current_dir(root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::time::timeout(GIT_TIMEOUT, cmd.output())
        .await
        .map_err(|_| ToolError::new(ErrorCode::VcsError, "git invocation timed out"))?
        .map_err(|err| ToolError::new(ErrorCode::VcsError, format!("failed to run git: {err}")))?;

    Ok(GitOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Run git with `input` piped to stdin. Used by the patch facility.
pub(crate) async fn run_git_stdin<I, S>(root: &Path, args: I, input: &str) -> ToolResult<GitOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    use tokio::io::AsyncWriteExt;

    let mut cmd = tokio::process::Command::new("git");
    cmd.args(args)
        .current_dir(root)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| ToolError::new(ErrorCode::VcsError, format!("failed to run git: {err}")))?;
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| ToolError::internal("git stdin not captured"))?;
    stdin
        .write_all(input.as_bytes())
        .await
        .map_err(|err| ToolError::new(ErrorCode::VcsError, format!("writing to git: {err}")))?;
    drop(stdin);

    let output = tokio::time::timeout(GIT_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| ToolError::new(ErrorCode::VcsError, "git invocation timed out"))?
        .map_err(|err| ToolError::new(ErrorCode::VcsError, format!("waiting for git: {err}")))?;

    Ok(GitOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

fn ensure_vcs(workspace: &Workspace) -> ToolResult<()> {
    if workspace.allow_vcs {
        Ok(())
    } else {
        Err(ToolError::new(
            ErrorCode::VcsError,
            format!(
                "version control is not enabled for workspace '{}'",
                workspace.name
            ),
        ))
    }
}

// ---------------------------------------------------------------------------
// vcs.status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VcsStatusParams {}

/// Parsed porcelain v1 status plus the upstream probe.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VcsStatusResult {
    pub branch: String,
    pub ahead: u32,
    pub behind: u32,
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub renamed: Vec<String>,
    pub untracked: Vec<String>,
    pub conflicted: Vec<String>,
    pub staged: Vec<String>,
    pub clean: bool,
}

pub async fn status(workspace: &Workspace) -> ToolResult<VcsStatusResult> {
    ensure_vcs(workspace)?;
    let root = &workspace.root;

    // symbolic-ref works on an unborn branch; detached HEAD falls back to
    // rev-parse, which reports the literal "HEAD".
    let branch_out = run_git(root, ["symbolic-ref", "--short", "HEAD"]).await?;
    let branch = if branch_out.exit_code == 0 {
        branch_out.stdout.trim().to_string()
    } else {
        let fallback = run_git(root, ["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        if fallback.exit_code != 0 {
            return Err(ToolError::new(
                ErrorCode::VcsError,
                fallback.error_text().to_string(),
            ));
        }
        fallback.stdout.trim().to_string()
    };

    let status_out = run_git(root, ["status", "--porcelain"]).await?;
    if status_out.exit_code != 0 {
        return Err(ToolError::new(
            ErrorCode::VcsError,
            status_out.error_text().to_string(),
        ));
    }
    let mut result = parse_porcelain_v1(&status_out.stdout);
    result.branch = branch;

    // Absence of an upstream is reported as zero ahead/behind, not an error.
    let probe = run_git(
        root,
        ["rev-list", "--left-right", "--count", "@{upstream}...HEAD"],
    )
    .await?;
    if probe.exit_code == 0 {
        let mut fields = probe.stdout.split_whitespace();
        result.behind = fields.next().and_then(|n| n.parse().ok()).unwrap_or(0);
        result.ahead = fields.next().and_then(|n| n.parse().ok()).unwrap_or(0);
    }

    Ok(result)
}

/// Parse `git status --porcelain` (v1). Column 1 is the index state,
/// column 2 the worktree state; renames carry `old -> new` and report the
/// new name.
pub(crate) fn parse_porcelain_v1(output: &str) -> VcsStatusResult {
    let mut result = VcsStatusResult {
        branch: String::new(),
        ahead: 0,
        behind: 0,
        added: Vec::new(),
        modified: Vec::new(),
        deleted: Vec::new(),
        renamed: Vec::new(),
        untracked: Vec::new(),
        conflicted: Vec::new(),
        staged: Vec::new(),
        clean: false,
    };

    for line in output.lines() {
        if line.len() < 4 {
            continue;
        }
        let bytes = line.as_bytes();
        let (x, y) = (bytes[0] as char, bytes[1] as char);
        let path = &line[3..];
        let path = path
            .rsplit_once(" -> ")
            .map(|(_, new)| new)
            .unwrap_or(path)
            .to_string();

        if x == '?' && y == '?' {
            result.untracked.push(path);
            continue;
        }
        if x == 'U' || y == 'U' || (x == 'A' && y == 'A') || (x == 'D' && y == 'D') {
            result.conflicted.push(path);
            continue;
        }
        if x != ' ' && x != '!' {
            result.staged.push(path.clone());
        }
        match (x, y) {
            ('A', _) => result.added.push(path),
            ('R', _) => result.renamed.push(path),
            ('D', _) | (_, 'D') => result.deleted.push(path),
            ('M', _) | (_, 'M') | (_, 'T') | ('T', _) => result.modified.push(path),
            _ => {}
        }
    }

    result.clean = result.added.is_empty()
        && result.modified.is_empty()
        && result.deleted.is_empty()
        && result.renamed.is_empty()
        && result.untracked.is_empty()
        && result.conflicted.is_empty();
    result
}

// ---------------------------------------------------------------------------
// vcs.diff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VcsDiffParams {
    /// Diff the index instead of the worktree.
    #[serde(default)]
    pub staged: bool,
    /// Limit the diff to these workspace-relative paths.
    #[serde(default)]
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VcsDiffResult {
    pub diff: String,
    pub files_changed: u32,
    pub insertions: u32,
    pub deletions: u32,
    pub truncated: bool,
}

pub async fn diff(
    workspace: &Workspace,
    guard: &PathGuard,
    params: &VcsDiffParams,
) -> ToolResult<VcsDiffResult> {
    ensure_vcs(workspace)?;

    let mut args: Vec<String> = vec!["diff".into()];
    if params.staged {
        args.push("--cached".into());
    }
    if !params.paths.is_empty() {
        args.push("--".into());
        for path in &params.paths {
            let resolved = guard.resolve(path)?;
            args.push(resolved.relative.to_string_lossy().into_owned());
        }
    }

    let out = run_git(&workspace.root, &args).await?;
    if out.exit_code != 0 {
        return Err(ToolError::new(
            ErrorCode::VcsError,
            out.error_text().to_string(),
        ));
    }

    let (files_changed, insertions, deletions) = summarize_diff(&out.stdout);
    let mut diff = out.stdout;
    let truncated = diff.len() > MAX_DIFF_BYTES;
    if truncated {
        let mut cut = MAX_DIFF_BYTES;
        while !diff.is_char_boundary(cut) {
            cut -= 1;
        }
        diff.truncate(cut);
    }

    Ok(VcsDiffResult {
        diff,
        files_changed,
        insertions,
        deletions,
        truncated,
    })
}

/// Count files and +/- lines in a unified diff.
pub(crate) fn summarize_diff(diff: &str) -> (u32, u32, u32) {
    let mut files = 0u32;
    let mut insertions = 0u32;
    let mut deletions = 0u32;
    for line in diff.lines() {
        if line.starts_with("diff --git ") {
            files += 1;
        } else if line.starts_with('+') && !line.starts_with("+++") {
            insertions += 1;
        } else if line.starts_with('-') && !line.starts_with("---") {
            deletions += 1;
        }
    }
    (files, insertions, deletions)
}

// ---------------------------------------------------------------------------
// vcs.checkout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VcsCheckoutParams {
    pub branch: String,
    /// Create the branch (`-b`) before switching.
    #[serde(default)]
    pub create: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VcsCheckoutResult {
    pub previous_branch: String,
    pub branch: String,
    pub created: bool,
}

/// Branch names are restricted to a conservative charset and must not look
/// like an option.
fn validate_branch_name(name: &str) -> ToolResult<()> {
    let valid = !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ToolError::new(
            ErrorCode::VcsError,
            format!("invalid branch name: {name}"),
        ))
    }
}

pub async fn checkout(
    workspace: &Workspace,
    params: &VcsCheckoutParams,
) -> ToolResult<VcsCheckoutResult> {
    ensure_vcs(workspace)?;
    validate_branch_name(&params.branch)?;
    let root = &workspace.root;

    let before = run_git(root, ["rev-parse", "--abbrev-ref", "HEAD"]).await?;
    if before.exit_code != 0 {
        return Err(ToolError::new(
            ErrorCode::VcsError,
            before.error_text().to_string(),
        ));
    }
    let previous_branch = before.stdout.trim().to_string();

    let mut args: Vec<&str> = vec!["checkout"];
    if params.create {
        args.push("-b");
    }
    args.push(&params.branch);
    let out = run_git(root, &args).await?;
    if out.exit_code != 0 {
        return Err(ToolError::new(
            ErrorCode::VcsError,
            out.error_text().to_string(),
        ));
    }

    let after = run_git(root, ["rev-parse", "--abbrev-ref", "HEAD"]).await?;
    let branch = if after.exit_code == 0 {
        after.stdout.trim().to_string()
    } else {
        params.branch.clone()
    };

    Ok(VcsCheckoutResult {
        previous_branch,
        branch,
        created: params.create,
    })
}

// ---------------------------------------------------------------------------
// vcs.commit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VcsCommitParams {
    pub message: String,
    /// Stage only these paths; empty stages all changes.
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VcsCommitResult {
    pub commit: String,
    pub message: String,
    pub files_changed: u32,
}

pub async fn commit(
    workspace: &Workspace,
    guard: &PathGuard,
    params: &VcsCommitParams,
) -> ToolResult<VcsCommitResult> {
    ensure_vcs(workspace)?;
    if params.message.trim().is_empty() {
        return Err(ToolError::new(
            ErrorCode::VcsError,
            "commit message must not be empty",
        ));
    }
    let root = &workspace.root;

    if params.files.is_empty() {
        let out = run_git(root, ["add", "-A"]).await?;
        if out.exit_code != 0 {
            return Err(ToolError::new(
                ErrorCode::VcsError,
                out.error_text().to_string(),
            ));
        }
    } else {
        let mut args: Vec<String> = vec!["add".into(), "--".into()];
        for file in &params.files {
            let resolved = guard.resolve(file)?;
            args.push(resolved.relative.to_string_lossy().into_owned());
        }
        let out = run_git(root, &args).await?;
        if out.exit_code != 0 {
            return Err(ToolError::new(
                ErrorCode::VcsError,
                out.error_text().to_string(),
            ));
        }
    }

    let out = run_git(root, ["commit", "-m", &params.message]).await?;
    if out.exit_code != 0 {
        let text = out.error_text();
        if text.contains("nothing to commit")
            || out.stdout.contains("nothing to commit")
            || out.stdout.contains("nothing added to commit")
        {
            return Err(ToolError::new(ErrorCode::VcsError, "nothing to commit"));
        }
        return Err(ToolError::new(ErrorCode::VcsError, text.to_string()));
    }

    let head = run_git(root, ["rev-parse", "HEAD"]).await?;
    let commit_id = head.stdout.trim().to_string();
    let files_changed = parse_files_changed(&out.stdout);

    Ok(VcsCommitResult {
        commit: commit_id,
        message: params.message.clone(),
        files_changed,
    })
}

/// Pull `N file(s) changed` out of the commit summary line.
pub(crate) fn parse_files_changed(commit_output: &str) -> u32 {
    for line in commit_output.lines() {
        if let Some(idx) = line.find(" file") {
            let lead = line[..idx].trim();
            if let Some(num) = lead.rsplit(' ').next() {
                if let Ok(n) = num.parse() {
                    return n;
                }
            }
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentbox_protocol::Tier;

    fn workspace(root: &Path, allow_vcs: bool) -> Workspace {
        Workspace {
            name: "test".into(),
            root: root.to_path_buf(),
            tier: Tier::Exec,
            deny_patterns: vec![],
            allow_vcs,
        }
    }

    async fn init_repo(root: &Path) {
        for args in [
            vec!["init", "-b", "main"],
            vec!["config", "user.email", "dev@example.com"],
            vec!["config", "user.name", "Dev"],
        ] {
            let out = run_git(root, &args).await.unwrap();
            assert_eq!(out.exit_code, 0, "git {args:?}: {}", out.stderr);
        }
    }

    // -- porcelain parsing -------------------------------------------------

    #[test]
    fn porcelain_categorises_columns() {
        let output = "\
M  staged_mod.rs
 M worktree_mod.rs
A  new_file.rs
 D worktree_del.rs
D  staged_del.rs
R  old.rs -> new.rs
?? scratch.txt
UU conflicted.rs
";
        let r = parse_porcelain_v1(output);
        assert_eq!(r.added, vec!["new_file.rs"]);
        assert_eq!(r.modified, vec!["staged_mod.rs", "worktree_mod.rs"]);
        assert_eq!(r.deleted, vec!["worktree_del.rs", "staged_del.rs"]);
        assert_eq!(r.renamed, vec!["new.rs"]);
        assert_eq!(r.untracked, vec!["scratch.txt"]);
        assert_eq!(r.conflicted, vec!["conflicted.rs"]);
        assert_eq!(
            r.staged,
            vec!["staged_mod.rs", "new_file.rs", "staged_del.rs", "new.rs"]
        );
        assert!(!r.clean);
    }

    #[test]
    fn porcelain_empty_output_is_clean() {
        let r = parse_porcelain_v1("");
        assert!(r.clean);
        assert!(r.staged.is_empty());
    }

    #[test]
    fn diff_summary_counts() {
        let diff = "\
diff --git a/a.rs b/a.rs
--- a/a.rs
+++ b/a.rs
@@ -1,2 +1,3 @@
-old
+new
+extra
diff --git a/b.rs b/b.rs
--- a/b.rs
+++ b/b.rs
@@ -1 +1 @@
-x
+y
";
        assert_eq!(summarize_diff(diff), (2, 3, 2));
    }

    #[test]
    fn files_changed_parses_commit_summary() {
        let out = "[main abc1234] message\n 3 files changed, 10 insertions(+), 2 deletions(-)\n";
        assert_eq!(parse_files_changed(out), 3);
        let one = "[main abc1234] message\n 1 file changed, 1 insertion(+)\n";
        assert_eq!(parse_files_changed(one), 1);
        assert_eq!(parse_files_changed("no summary here"), 0);
    }

    #[test]
    fn branch_names_are_validated() {
        assert!(validate_branch_name("feature/login-form").is_ok());
        assert!(validate_branch_name("v1.2.3").is_ok());
        assert!(validate_branch_name("-delete-everything").is_err());
        assert!(validate_branch_name("has space").is_err());
        assert!(validate_branch_name("").is_err());
    }

    // -- against a real repository ----------------------------------------

    #[tokio::test]
    async fn vcs_tools_require_allow_vcs() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(dir.path(), false);
        let err = status(&ws).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::VcsError);
    }

    #[tokio::test]
    async fn status_on_fresh_repo() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        std::fs::write(dir.path().join("a.txt"), "hello\n").unwrap();

        let ws = workspace(dir.path(), true);
        let r = status(&ws).await.unwrap();
        assert_eq!(r.untracked, vec!["a.txt"]);
        // No upstream configured: probe reports zeros, not an error.
        assert_eq!((r.ahead, r.behind), (0, 0));
        assert!(!r.clean);
    }

    #[tokio::test]
    async fn commit_then_status_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        std::fs::write(dir.path().join("a.txt"), "hello\n").unwrap();

        let ws = workspace(dir.path(), true);
        let guard = PathGuard::new(&ws.root, &[], &[]);
        let result = commit(
            &ws,
            &guard,
            &VcsCommitParams {
                message: "add a.txt".into(),
                files: vec![],
            },
        )
        .await
        .unwrap();
        assert_eq!(result.message, "add a.txt");
        assert_eq!(result.files_changed, 1);
        assert_eq!(result.commit.len(), 40);

        let r = status(&ws).await.unwrap();
        assert!(r.clean);
        assert_eq!(r.branch, "main");
    }

    #[tokio::test]
    async fn commit_with_nothing_staged_maps_to_vcs_error() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        std::fs::write(dir.path().join("a.txt"), "x\n").unwrap();
        let ws = workspace(dir.path(), true);
        let guard = PathGuard::new(&ws.root, &[], &[]);
        commit(
            &ws,
            &guard,
            &VcsCommitParams {
                message: "first".into(),
                files: vec![],
            },
        )
        .await
        .unwrap();

        let err = commit(
            &ws,
            &guard,
            &VcsCommitParams {
                message: "empty".into(),
                files: vec![],
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::VcsError);
        assert_eq!(err.message, "nothing to commit");
    }

    #[tokio::test]
    async fn commit_files_outside_workspace_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        let ws = workspace(dir.path(), true);
        let guard = PathGuard::new(&ws.root, &[], &[]);
        let err = commit(
            &ws,
            &guard,
            &VcsCommitParams {
                message: "sneaky".into(),
                files: vec!["../outside.txt".into()],
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::ForbiddenPath);
    }

    #[tokio::test]
    async fn diff_reports_changes_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        std::fs::write(dir.path().join("a.txt"), "one\n").unwrap();
        let ws = workspace(dir.path(), true);
        let guard = PathGuard::new(&ws.root, &[], &[]);
        commit(
            &ws,
            &guard,
            &VcsCommitParams {
                message: "base".into(),
                files: vec![],
            },
        )
        .await
        .unwrap();

        std::fs::write(dir.path().join("a.txt"), "one\ntwo\n").unwrap();
        let r = diff(&ws, &guard, &VcsDiffParams::default()).await.unwrap();
        assert_eq!(r.files_changed, 1);
        assert_eq!(r.insertions, 1);
        assert_eq!(r.deletions, 0);
        assert!(r.diff.contains("+two"));
        assert!(!r.truncated);
    }

    #[tokio::test]
    async fn checkout_creates_and_switches() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        std::fs::write(dir.path().join("a.txt"), "x\n").unwrap();
        let ws = workspace(dir.path(), true);
        let guard = PathGuard::new(&ws.root, &[], &[]);
        commit(
            &ws,
            &guard,
            &VcsCommitParams {
                message: "base".into(),
                files: vec![],
            },
        )
        .await
        .unwrap();

        let r = checkout(
            &ws,
            &VcsCheckoutParams {
                branch: "feature/x".into(),
                create: true,
            },
        )
        .await
        .unwrap();
        assert_eq!(r.previous_branch, "main");
        assert_eq!(r.branch, "feature/x");
        assert!(r.created);

        let back = checkout(
            &ws,
            &VcsCheckoutParams {
                branch: "main".into(),
                create: false,
            },
        )
        .await
        .unwrap();
        assert_eq!(back.previous_branch, "feature/x");
        assert_eq!(back.branch, "main");
    }

    #[tokio::test]
    async fn checkout_unknown_branch_is_vcs_error() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        std::fs::write(dir.path().join("a.txt"), "x\n").unwrap();
        let ws = workspace(dir.path(), true);
        let guard = PathGuard::new(&ws.root, &[], &[]);
        commit(
            &ws,
            &guard,
            &VcsCommitParams {
                message: "base".into(),
                files: vec![],
            },
        )
        .await
        .unwrap();

        let err = checkout(
            &ws,
            &VcsCheckoutParams {
                branch: "no-such-branch".into(),
                create: false,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::VcsError);
    }
}
