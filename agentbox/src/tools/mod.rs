//! Tool registry and dispatcher.
//!
//! A fixed catalogue of named tools, each with a required tier and an
//! approval flag. Dispatch order: lookup, tier check against the workspace
//! under `read < write < exec`, typed parameter decode, approval gate,
//! invoke. Failing earlier means the later stages never observe the call.

pub mod cmd;
pub mod fs;
pub mod vcs;

use std::sync::Arc;

use regex::Regex;
use serde_json::{json, Value};

use agentbox_protocol::{ErrorCode, Tier, ToolInfo};

use crate::approval::{ApprovalKind, ApprovalTable, Consume};
use crate::config::{ApprovalsConfig, Config, Workspace};
use crate::error::{ToolError, ToolResult};
use crate::guard::{CommandValidator, PathGuard};

pub struct ToolDescriptor {
    pub name: &'static str,
    pub tier: Tier,
    pub requires_approval: bool,
    pub summary: &'static str,
}

/// The closed tool catalogue. Registered once; read-only thereafter.
pub const REGISTRY: &[ToolDescriptor] = &[
    ToolDescriptor {
        name: "fs.list",
        tier: Tier::Read,
        requires_approval: false,
        summary: "List entries in a workspace directory, optionally recursive",
    },
    ToolDescriptor {
        name: "fs.read",
        tier: Tier::Read,
        requires_approval: false,
        summary: "Read a bounded slice of a file (UTF-8 or base64)",
    },
    ToolDescriptor {
        name: "fs.apply_patch",
        tier: Tier::Write,
        requires_approval: true,
        summary: "Apply a unified diff inside the workspace",
    },
    ToolDescriptor {
        name: "vcs.status",
        tier: Tier::Read,
        requires_approval: false,
        summary: "Branch, ahead/behind, and per-file statuses",
    },
    ToolDescriptor {
        name: "vcs.diff",
        tier: Tier::Read,
        requires_approval: false,
        summary: "Working or staged diff with a parsed summary",
    },
    ToolDescriptor {
        name: "vcs.checkout",
        tier: Tier::Write,
        requires_approval: true,
        summary: "Switch branches, optionally creating one",
    },
    ToolDescriptor {
        name: "vcs.commit",
        tier: Tier::Write,
        requires_approval: true,
        summary: "Stage chosen files (or all) and commit",
    },
    ToolDescriptor {
        name: "cmd.run",
        tier: Tier::Exec,
        requires_approval: true,
        summary: "Spawn an allowlisted command with bounded time and output",
    },
];

pub fn find(name: &str) -> Option<&'static ToolDescriptor> {
    REGISTRY.iter().find(|d| d.name == name)
}

/// Registry subset visible to a session at `tier`.
pub fn visible_at(tier: Tier) -> Vec<ToolInfo> {
    REGISTRY
        .iter()
        .filter(|d| d.tier <= tier)
        .map(|d| ToolInfo {
            name: d.name.to_string(),
            tier: d.tier,
            requires_approval: d.requires_approval,
            summary: d.summary.to_string(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Typed requests
// ---------------------------------------------------------------------------

/// A decoded tool call: the closed name set as a tagged variant, each with
/// its typed payload. Untyped JSON is cast exactly once, here.
#[derive(Debug)]
pub enum ToolRequest {
    FsList(fs::FsListParams),
    FsRead(fs::FsReadParams),
    FsApplyPatch(fs::FsApplyPatchParams),
    VcsStatus(vcs::VcsStatusParams),
    VcsDiff(vcs::VcsDiffParams),
    VcsCheckout(vcs::VcsCheckoutParams),
    VcsCommit(vcs::VcsCommitParams),
    CmdRun(cmd::CmdRunParams),
}

impl ToolRequest {
    pub fn decode(name: &str, args: Value) -> ToolResult<Self> {
        let args = if args.is_null() { json!({}) } else { args };
        fn cast<T: serde::de::DeserializeOwned>(name: &str, args: Value) -> ToolResult<T> {
            serde_json::from_value(args).map_err(|err| {
                let msg = err.to_string();
                let code = if msg.to_ascii_lowercase().contains("path") {
                    ErrorCode::InvalidPath
                } else {
                    ErrorCode::InternalError
                };
                ToolError::new(code, format!("invalid params for {name}: {msg}"))
            })
        }
        match name {
            "fs.list" => Ok(Self::FsList(cast(name, args)?)),
            "fs.read" => Ok(Self::FsRead(cast(name, args)?)),
            "fs.apply_patch" => Ok(Self::FsApplyPatch(cast(name, args)?)),
            "vcs.status" => Ok(Self::VcsStatus(cast(name, args)?)),
            "vcs.diff" => Ok(Self::VcsDiff(cast(name, args)?)),
            "vcs.checkout" => Ok(Self::VcsCheckout(cast(name, args)?)),
            "vcs.commit" => Ok(Self::VcsCommit(cast(name, args)?)),
            "cmd.run" => Ok(Self::CmdRun(cast(name, args)?)),
            other => Err(ToolError::internal(format!("unknown tool: {other}"))),
        }
    }

    /// Pre-validation that must succeed before the approval gate: the
    /// patch inspector for `fs.apply_patch`, the command engine (and cwd
    /// guard) for `cmd.run`. A violation here carries its own error code.
    fn preflight(&self, ctx: &ToolContext) -> ToolResult<()> {
        match self {
            Self::FsApplyPatch(p) => {
                fs::validate_patch(&ctx.guard, p)?;
            }
            Self::CmdRun(p) => {
                cmd::preflight(p, &ctx.validator, &ctx.guard)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// The gate this request must pass, when the config demands approval:
    /// (kind, human description, structured details).
    fn approval_request(
        &self,
        approvals: &ApprovalsConfig,
    ) -> Option<(ApprovalKind, String, Value)> {
        match self {
            Self::FsApplyPatch(p) if !p.dry_run && approvals.require_write_approval => {
                let files = crate::guard::patch::extract_paths(&p.patch_unified);
                Some((
                    ApprovalKind::Patch,
                    format!("apply patch to {}", files.join(", ")),
                    json!({ "files": files }),
                ))
            }
            Self::VcsCheckout(p) if approvals.require_write_approval => Some((
                ApprovalKind::Write,
                format!("checkout branch {}", p.branch),
                json!({ "branch": p.branch, "create": p.create }),
            )),
            Self::VcsCommit(p) if approvals.require_write_approval => {
                let subject = p.message.lines().next().unwrap_or("").to_string();
                Some((
                    ApprovalKind::Write,
                    format!("commit: {subject}"),
                    json!({ "message": subject, "files": p.files }),
                ))
            }
            Self::CmdRun(p) if approvals.require_exec_approval => {
                let line = if p.args.is_empty() {
                    p.command.clone()
                } else {
                    format!("{} {}", p.command, p.args.join(" "))
                };
                Some((
                    ApprovalKind::Exec,
                    format!("run command: {line}"),
                    json!({ "command": line }),
                ))
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Everything a tool invocation needs, built once per workspace at startup
/// and shared read-only across sessions. The pending-approval table lives
/// on each run, so it is passed into `dispatch` per call.
pub struct ToolContext {
    pub workspace: Arc<Workspace>,
    pub guard: PathGuard,
    pub validator: CommandValidator,
    approvals_config: ApprovalsConfig,
    auto_approve: Vec<Regex>,
}

impl ToolContext {
    pub fn new(workspace: Arc<Workspace>, config: &Config) -> Self {
        let guard = PathGuard::new(
            &workspace.root,
            &config.global_deny_patterns,
            &workspace.deny_patterns,
        );
        let validator = CommandValidator::new(&config.commands.allow, &config.commands.deny);
        let auto_approve = config
            .approvals
            .auto_approve_patterns
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(err) => {
                    tracing::warn!(pattern = %pattern, %err, "skipping invalid autoApprove regex");
                    None
                }
            })
            .collect();
        Self {
            workspace,
            guard,
            validator,
            approvals_config: config.approvals.clone(),
            auto_approve,
        }
    }

    /// Route one call through the full gate sequence and execute it.
    pub async fn dispatch(
        &self,
        name: &str,
        args: Value,
        approval_id: Option<&str>,
        approvals: &ApprovalTable,
    ) -> ToolResult<Value> {
        let descriptor = find(name).ok_or_else(|| {
            // The registry is fixed; an unknown name past tools.list is a
            // client integration bug, not a user error.
            ToolError::internal(format!("unknown tool: {name}"))
        })?;

        if descriptor.tier > self.workspace.tier {
            return Err(ToolError::new(
                ErrorCode::ForbiddenPath,
                format!(
                    "workspace tier '{}' does not permit tool '{}' (requires '{}')",
                    self.workspace.tier, name, descriptor.tier
                ),
            ));
        }

        let request = ToolRequest::decode(name, args)?;

        // Fail fast: the request's own guard checks (C1/C2/C3) run before
        // the approval gate, so a human is never asked to approve an
        // operation that was always going to be refused.
        request.preflight(self)?;

        if let Some((kind, description, details)) =
            request.approval_request(&self.approvals_config)
        {
            if !self.auto_approved(&description) {
                self.check_approval(approvals, kind, description, details, approval_id)?;
            }
        }

        let to_value = |v: Result<Value, serde_json::Error>| {
            v.map_err(|err| ToolError::internal(format!("serializing result: {err}")))
        };
        match request {
            ToolRequest::FsList(p) => {
                to_value(serde_json::to_value(fs::list(&self.guard, &p).await?))
            }
            ToolRequest::FsRead(p) => {
                to_value(serde_json::to_value(fs::read(&self.guard, &p).await?))
            }
            ToolRequest::FsApplyPatch(p) => {
                to_value(serde_json::to_value(fs::apply_patch(&self.guard, &p).await?))
            }
            ToolRequest::VcsStatus(_) => {
                to_value(serde_json::to_value(vcs::status(&self.workspace).await?))
            }
            ToolRequest::VcsDiff(p) => to_value(serde_json::to_value(
                vcs::diff(&self.workspace, &self.guard, &p).await?,
            )),
            ToolRequest::VcsCheckout(p) => to_value(serde_json::to_value(
                vcs::checkout(&self.workspace, &p).await?,
            )),
            ToolRequest::VcsCommit(p) => to_value(serde_json::to_value(
                vcs::commit(&self.workspace, &self.guard, &p).await?,
            )),
            ToolRequest::CmdRun(p) => to_value(serde_json::to_value(
                cmd::run(&p, &self.validator, &self.guard).await?,
            )),
        }
    }

    fn auto_approved(&self, description: &str) -> bool {
        self.auto_approve.iter().any(|re| re.is_match(description))
    }

    /// Fail-closed approval gate. Without an id the operation parks a
    /// pending record and reports it; with an id the recorded decision is
    /// consumed exactly once.
    fn check_approval(
        &self,
        approvals: &ApprovalTable,
        kind: ApprovalKind,
        description: String,
        details: Value,
        approval_id: Option<&str>,
    ) -> ToolResult<()> {
        match approval_id {
            None => {
                let record = approvals.create(kind, description, details);
                Err(ToolError::new(
                    ErrorCode::ApprovalRequired,
                    format!("approval required: {}", record.description),
                )
                .with_details(json!({
                    "approvalId": record.id,
                    "kind": record.kind,
                    "description": record.description,
                    "expiresAt": record.timeout_at.to_rfc3339(),
                    "state": "created",
                })))
            }
            Some(id) => match approvals.consume(id) {
                Consume::Approved => Ok(()),
                Consume::Denied => Err(ToolError::new(
                    ErrorCode::ApprovalDenied,
                    "the approval was denied",
                )
                .with_details(json!({ "approvalId": id }))),
                Consume::Pending => Err(ToolError::new(
                    ErrorCode::ApprovalRequired,
                    "approval is still pending a decision",
                )
                .with_details(json!({ "approvalId": id, "state": "pending" }))),
                Consume::Expired => Err(ToolError::new(
                    ErrorCode::ApprovalTimeout,
                    "the approval window has passed",
                )
                .with_details(json!({ "approvalId": id }))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn workspace(root: &Path, tier: Tier) -> Arc<Workspace> {
        Arc::new(Workspace {
            name: "test".into(),
            root: root.to_path_buf(),
            tier,
            deny_patterns: vec![],
            allow_vcs: true,
        })
    }

    fn config_without_approvals() -> Config {
        let mut config = Config::default();
        config.approvals.require_write_approval = false;
        config.approvals.require_exec_approval = false;
        config.commands.allow = vec![".*".into()];
        config
    }

    #[test]
    fn registry_names_are_unique_and_dotted() {
        let mut seen = std::collections::HashSet::new();
        for d in REGISTRY {
            assert!(seen.insert(d.name), "duplicate tool name {}", d.name);
            assert!(d.name.contains('.'), "tool name {} is not dotted", d.name);
        }
        assert_eq!(REGISTRY.len(), 8);
    }

    #[test]
    fn visibility_follows_the_tier_lattice() {
        let read: Vec<_> = visible_at(Tier::Read).iter().map(|t| t.name.clone()).collect();
        assert_eq!(read, vec!["fs.list", "fs.read", "vcs.status", "vcs.diff"]);

        let write = visible_at(Tier::Write);
        assert_eq!(write.len(), 7);
        assert!(write.iter().all(|t| t.name != "cmd.run"));

        let exec = visible_at(Tier::Exec);
        assert_eq!(exec.len(), REGISTRY.len());
    }

    #[test]
    fn decode_rejects_bad_params() {
        let err = ToolRequest::decode("fs.read", json!({"offset": 3})).unwrap_err();
        // Missing `path` field mentions the field name.
        assert_eq!(err.code, ErrorCode::InvalidPath);

        let err = ToolRequest::decode("cmd.run", json!({"command": 42})).unwrap_err();
        assert_eq!(err.code, ErrorCode::InternalError);

        assert!(ToolRequest::decode("nope.tool", json!({})).is_err());
    }

    #[test]
    fn decode_accepts_null_args_for_paramless_tools() {
        assert!(ToolRequest::decode("vcs.status", Value::Null).is_ok());
        assert!(ToolRequest::decode("vcs.diff", Value::Null).is_ok());
    }

    #[tokio::test]
    async fn tier_gate_is_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "x").unwrap();
        let config = config_without_approvals();

        // Read-tier workspace: read tools pass, write and exec are refused.
        let approvals = ApprovalTable::new(config.approvals.approval_timeout_ms);
        let ctx = ToolContext::new(workspace(dir.path(), Tier::Read), &config);
        assert!(ctx.dispatch("fs.list", json!({}), None, &approvals).await.is_ok());
        let err = ctx
            .dispatch("fs.apply_patch", json!({"patchUnified": "x"}), None, &approvals)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ForbiddenPath);
        let err = ctx
            .dispatch("cmd.run", json!({"command": "echo hi"}), None, &approvals)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ForbiddenPath);

        // Exec-tier workspace: everything is reachable.
        let approvals = ApprovalTable::new(config.approvals.approval_timeout_ms);
        let ctx = ToolContext::new(workspace(dir.path(), Tier::Exec), &config);
        let result = ctx
            .dispatch("cmd.run", json!({"command": "echo hi"}), None, &approvals)
            .await
            .unwrap();
        assert_eq!(result["exitCode"], 0);
        assert_eq!(result["stdout"], "hi\n");
    }

    #[tokio::test]
    async fn unknown_tool_is_internal_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_without_approvals();
        let approvals = ApprovalTable::new(config.approvals.approval_timeout_ms);
        let ctx = ToolContext::new(workspace(dir.path(), Tier::Exec), &config);
        let err = ctx.dispatch("fs.write", json!({}), None, &approvals).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InternalError);
    }

    #[tokio::test]
    async fn exec_approval_flow_fail_closed() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.commands.allow = vec![".*".into()];
        let approvals = ApprovalTable::new(config.approvals.approval_timeout_ms);
        let ctx = ToolContext::new(workspace(dir.path(), Tier::Exec), &config);
        let args = json!({"command": "echo approved"});

        // First call parks an approval and fails closed.
        let err = ctx.dispatch("cmd.run", args.clone(), None, &approvals).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ApprovalRequired);
        let details = err.details.unwrap();
        let approval_id = details["approvalId"].as_str().unwrap().to_string();
        assert_eq!(details["state"], "created");

        // Retrying while undecided stays closed without creating a second record.
        let err = ctx
            .dispatch("cmd.run", args.clone(), Some(&approval_id), &approvals)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ApprovalRequired);
        assert_eq!(approvals.list().len(), 1);

        // Approve, retry: the command runs.
        approvals.resolve(&approval_id, true).unwrap();
        let result = ctx
            .dispatch("cmd.run", args.clone(), Some(&approval_id), &approvals)
            .await
            .unwrap();
        assert_eq!(result["stdout"], "approved\n");

        // The approval was single-use.
        let err = ctx
            .dispatch("cmd.run", args, Some(&approval_id), &approvals)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ApprovalTimeout);
    }

    #[tokio::test]
    async fn denied_approval_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.commands.allow = vec![".*".into()];
        let approvals = ApprovalTable::new(config.approvals.approval_timeout_ms);
        let ctx = ToolContext::new(workspace(dir.path(), Tier::Exec), &config);
        let args = json!({"command": "echo nope"});

        let err = ctx.dispatch("cmd.run", args.clone(), None, &approvals).await.unwrap_err();
        let approval_id = err.details.unwrap()["approvalId"]
            .as_str()
            .unwrap()
            .to_string();
        approvals.resolve(&approval_id, false).unwrap();
        let err = ctx
            .dispatch("cmd.run", args, Some(&approval_id), &approvals)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ApprovalDenied);
    }

    #[tokio::test]
    async fn auto_approve_pattern_bypasses_the_gate() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.commands.allow = vec![".*".into()];
        config.approvals.auto_approve_patterns = vec!["^run command: echo ".into()];
        let approvals = ApprovalTable::new(config.approvals.approval_timeout_ms);
        let ctx = ToolContext::new(workspace(dir.path(), Tier::Exec), &config);

        let result = ctx
            .dispatch("cmd.run", json!({"command": "echo fast"}), None, &approvals)
            .await
            .unwrap();
        assert_eq!(result["stdout"], "fast\n");

        // A non-matching command is still gated.
        let err = ctx
            .dispatch("cmd.run", json!({"command": "ls"}), None, &approvals)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ApprovalRequired);
    }

    #[tokio::test]
    async fn denied_command_never_reaches_the_approval_table() {
        // Approvals are on, but a command the engine denies fails with
        // COMMAND_DENIED outright; nothing is parked for a human.
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let approvals = ApprovalTable::new(config.approvals.approval_timeout_ms);
        let ctx = ToolContext::new(workspace(dir.path(), Tier::Exec), &config);

        let err = ctx
            .dispatch("cmd.run", json!({"command": "sudo rm -rf /"}), None, &approvals)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CommandDenied);
        assert!(approvals.list().is_empty());

        // Same for a cwd the path guard rejects.
        let err = ctx
            .dispatch(
                "cmd.run",
                json!({"command": "ls", "cwd": "../outside"}),
                None,
                &approvals,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ForbiddenPath);
        assert!(approvals.list().is_empty());
    }

    #[tokio::test]
    async fn denied_patch_never_reaches_the_approval_table() {
        // A patch touching a deny-listed path fails the inspector before
        // the approval gate, with the inspector's own error code.
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let approvals = ApprovalTable::new(config.approvals.approval_timeout_ms);
        let ctx = ToolContext::new(workspace(dir.path(), Tier::Write), &config);

        let patch = "\
diff --git a/.env b/.env
--- /dev/null
+++ b/.env
@@ -0,0 +1 @@
+EXFIL=1
";
        let err = ctx
            .dispatch("fs.apply_patch", json!({"patchUnified": patch}), None, &approvals)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ForbiddenPath);
        assert!(approvals.list().is_empty());

        // A headerless patch is refused as PATCH_FAILED, also unparked.
        let err = ctx
            .dispatch(
                "fs.apply_patch",
                json!({"patchUnified": "not a patch"}),
                None,
                &approvals,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::PatchFailed);
        assert!(approvals.list().is_empty());
    }

    #[tokio::test]
    async fn dry_run_patch_skips_approval() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for args in [
            vec!["init", "-b", "main"],
            vec!["config", "user.email", "dev@example.com"],
            vec!["config", "user.name", "Dev"],
        ] {
            let out = vcs::run_git(root, &args).await.unwrap();
            assert_eq!(out.exit_code, 0);
        }
        std::fs::write(root.join("a.txt"), "hello\n").unwrap();

        let config = Config::default(); // approvals required
        let approvals = ApprovalTable::new(config.approvals.approval_timeout_ms);
        let ctx = ToolContext::new(workspace(root, Tier::Write), &config);
        let patch = "\
diff --git a/a.txt b/a.txt
--- a/a.txt
+++ b/a.txt
@@ -1 +1,2 @@
 hello
+world
";
        let result = ctx
            .dispatch(
                "fs.apply_patch",
                json!({"patchUnified": patch, "dryRun": true}),
                None,
                &approvals,
            )
            .await
            .unwrap();
        assert_eq!(result["applied"], false);

        // The real application is gated.
        let err = ctx
            .dispatch("fs.apply_patch", json!({"patchUnified": patch}), None, &approvals)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ApprovalRequired);
    }
}
