//! Filesystem tools: `fs.list`, `fs.read`, `fs.apply_patch`.
//!
//! Every path is resolved by the guard before the filesystem is touched.
//! Listing caps the walk at 1000 entries; reading caps the slice at
//! 200 000 bytes; patches are applied through git's patch facility after
//! the inspector has cleared every referenced path.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use agentbox_protocol::ErrorCode;

use crate::error::{ToolError, ToolResult};
use crate::guard::{inspect_patch, PathGuard};
use crate::tools::vcs::run_git_stdin;

/// Hard cap on entries returned by one `fs.list` call, recursive or not.
pub const MAX_LIST_ENTRIES: usize = 1000;

/// Default depth cap for recursive listing.
pub const DEFAULT_LIST_DEPTH: u32 = 10;

/// Default slice size for `fs.read`.
pub const DEFAULT_READ_BYTES: u64 = 200_000;

fn io_error(err: std::io::Error, path: &str) -> ToolError {
    match err.kind() {
        std::io::ErrorKind::NotFound => ToolError::new(
            ErrorCode::PathNotFound,
            format!("path does not exist: {path}"),
        ),
        _ => ToolError::internal(format!("filesystem error on {path}: {err}")),
    }
}

// ---------------------------------------------------------------------------
// fs.list
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsListParams {
    /// Workspace-relative directory; defaults to the root.
    #[serde(default = "default_list_path")]
    pub path: String,
    #[serde(default)]
    pub recursive: bool,
    /// Depth cap for recursive walks (1 = immediate children).
    #[serde(default)]
    pub depth: Option<u32>,
}

fn default_list_path() -> String {
    ".".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FsEntry {
    pub relative_path: String,
    pub kind: EntryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_ts: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FsListResult {
    pub entries: Vec<FsEntry>,
    /// The 1000-entry cap was hit.
    pub truncated: bool,
    /// At least one entry was withheld by the deny rules.
    pub truncated_by_policy: bool,
}

pub async fn list(guard: &PathGuard, params: &FsListParams) -> ToolResult<FsListResult> {
    let resolved = guard.resolve(&params.path)?;
    let meta = tokio::fs::symlink_metadata(&resolved.absolute)
        .await
        .map_err(|e| io_error(e, &params.path))?;
    if !meta.is_dir() {
        return Err(ToolError::new(
            ErrorCode::InvalidPath,
            format!("not a directory: {}", params.path),
        ));
    }

    let depth_cap = params.depth.unwrap_or(DEFAULT_LIST_DEPTH).max(1);
    let mut entries = Vec::new();
    let mut truncated = false;
    let mut truncated_by_policy = false;
    let mut stack = vec![(resolved.absolute.clone(), 1u32)];

    'walk: while let Some((dir, depth)) = stack.pop() {
        let mut rd = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| io_error(e, &params.path))?;
        while let Some(entry) = rd
            .next_entry()
            .await
            .map_err(|e| io_error(e, &params.path))?
        {
            let abs = entry.path();
            let rel = match abs.strip_prefix(guard.root()) {
                Ok(rel) => rel.to_string_lossy().into_owned(),
                Err(_) => continue,
            };
            // Entries the guard rejects are withheld, not revealed.
            if guard.resolve(&rel).is_err() {
                truncated_by_policy = true;
                continue;
            }

            if entries.len() >= MAX_LIST_ENTRIES {
                truncated = true;
                break 'walk;
            }

            let file_type = match entry.file_type().await {
                Ok(ft) => ft,
                Err(_) => continue,
            };
            let kind = if file_type.is_symlink() {
                EntryKind::Symlink
            } else if file_type.is_dir() {
                EntryKind::Dir
            } else {
                EntryKind::File
            };
            let meta = entry.metadata().await.ok();
            let size = match kind {
                EntryKind::File => meta.as_ref().map(|m| m.len()),
                _ => None,
            };
            let modified_ts = meta.as_ref().and_then(|m| m.modified().ok()).and_then(|t| {
                t.duration_since(std::time::UNIX_EPOCH)
                    .ok()
                    .map(|d| d.as_secs())
            });

            if params.recursive && kind == EntryKind::Dir && depth < depth_cap {
                stack.push((abs.clone(), depth + 1));
            }
            entries.push(FsEntry {
                relative_path: rel,
                kind,
                size,
                modified_ts,
            });
        }
    }

    entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(FsListResult {
        entries,
        truncated,
        truncated_by_policy,
    })
}

// ---------------------------------------------------------------------------
// fs.read
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsReadParams {
    pub path: String,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub max_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FsReadResult {
    pub path: String,
    /// True file size, independent of the slice returned.
    pub size: u64,
    pub offset: u64,
    /// UTF-8 text, or base64 when the bytes do not decode cleanly.
    pub content: String,
    pub encoding: Encoding,
    /// More bytes remain past the returned slice.
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Encoding {
    #[serde(rename = "utf-8")]
    Utf8,
    #[serde(rename = "base64")]
    Base64,
}

pub async fn read(guard: &PathGuard, params: &FsReadParams) -> ToolResult<FsReadResult> {
    use tokio::io::{AsyncReadExt, AsyncSeekExt};

    let resolved = guard.resolve(&params.path)?;
    let meta = tokio::fs::symlink_metadata(&resolved.absolute)
        .await
        .map_err(|e| io_error(e, &params.path))?;

    // The guard is lexical; a symlink inside the workspace may still point
    // outside it. Resolve the target and re-check containment.
    if meta.is_symlink() {
        let target = tokio::fs::canonicalize(&resolved.absolute)
            .await
            .map_err(|e| io_error(e, &params.path))?;
        if !target.starts_with(guard.root()) {
            return Err(ToolError::new(
                ErrorCode::ForbiddenPath,
                format!("symlink target escapes the workspace: {}", params.path),
            ));
        }
    } else if !meta.is_file() {
        return Err(ToolError::new(
            ErrorCode::InvalidPath,
            format!("not a regular file: {}", params.path),
        ));
    }

    let mut file = tokio::fs::File::open(&resolved.absolute)
        .await
        .map_err(|e| io_error(e, &params.path))?;
    let size = file
        .metadata()
        .await
        .map_err(|e| io_error(e, &params.path))?
        .len();

    let offset = params.offset.unwrap_or(0).min(size);
    let max_bytes = params.max_bytes.unwrap_or(DEFAULT_READ_BYTES);
    let to_read = max_bytes.min(size - offset);

    file.seek(std::io::SeekFrom::Start(offset))
        .await
        .map_err(|e| io_error(e, &params.path))?;
    let mut buf = vec![0u8; to_read as usize];
    file.read_exact(&mut buf)
        .await
        .map_err(|e| io_error(e, &params.path))?;

    let decoded = String::from_utf8_lossy(&buf);
    let (content, encoding) = if decoded.contains(char::REPLACEMENT_CHARACTER) {
        (BASE64.encode(&buf), Encoding::Base64)
    } else {
        (decoded.into_owned(), Encoding::Utf8)
    };

    Ok(FsReadResult {
        path: resolved.relative.to_string_lossy().into_owned(),
        size,
        offset,
        content,
        encoding,
        truncated: offset + (buf.len() as u64) < size,
    })
}

// ---------------------------------------------------------------------------
// fs.apply_patch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsApplyPatchParams {
    pub patch_unified: String,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FsApplyPatchResult {
    /// False for a dry run.
    pub applied: bool,
    pub files: Vec<String>,
    /// Lines added / removed, and the count of touched files.
    pub added: u32,
    pub removed: u32,
    pub modified: u32,
}

/// The patch's C3 gate: every referenced path resolves under the
/// workspace and the patch names at least one file. Shared with the
/// dispatcher, which runs it before the approval gate so a patch that
/// could never apply is refused without asking anyone.
pub(crate) fn validate_patch(
    guard: &PathGuard,
    params: &FsApplyPatchParams,
) -> ToolResult<Vec<String>> {
    let resolved = inspect_patch(&params.patch_unified, guard)?;
    if resolved.is_empty() {
        return Err(ToolError::new(
            ErrorCode::PatchFailed,
            "patch contains no file headers",
        ));
    }
    Ok(resolved
        .iter()
        .map(|r| r.relative.to_string_lossy().into_owned())
        .collect())
}

pub async fn apply_patch(
    guard: &PathGuard,
    params: &FsApplyPatchParams,
) -> ToolResult<FsApplyPatchResult> {
    let files = validate_patch(guard, params)?;
    let root = guard.root();

    // numstat validates the patch body and yields per-file line counts
    // without touching the tree.
    let numstat = run_git_stdin(root, ["apply", "--numstat", "-"], &params.patch_unified).await?;
    if numstat.exit_code != 0 {
        return Err(patch_error(&numstat.stderr));
    }
    let (added, removed, modified) = parse_numstat(&numstat.stdout);

    let apply_args: &[&str] = if params.dry_run {
        &["apply", "--check", "-"]
    } else {
        &["apply", "-"]
    };
    let out = run_git_stdin(root, apply_args, &params.patch_unified).await?;
    if out.exit_code != 0 {
        return Err(patch_error(&out.stderr));
    }

    Ok(FsApplyPatchResult {
        applied: !params.dry_run,
        files,
        added,
        removed,
        modified,
    })
}

fn patch_error(stderr: &str) -> ToolError {
    let text = stderr.trim();
    let message = if text.is_empty() {
        "patch does not apply".to_string()
    } else {
        text.to_string()
    };
    ToolError::new(ErrorCode::PatchFailed, message)
}

/// Parse `git apply --numstat`: `added\tremoved\tpath` per file, `-` for
/// binary entries.
pub(crate) fn parse_numstat(output: &str) -> (u32, u32, u32) {
    let mut added = 0u32;
    let mut removed = 0u32;
    let mut files = 0u32;
    for line in output.lines() {
        let mut fields = line.split('\t');
        let a = fields.next().unwrap_or("");
        let r = fields.next().unwrap_or("");
        if fields.next().is_none() {
            continue;
        }
        files += 1;
        added += a.parse::<u32>().unwrap_or(0);
        removed += r.parse::<u32>().unwrap_or(0);
    }
    (added, removed, files)
}
