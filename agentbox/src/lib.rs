//! agentbox: a sandboxed local agent daemon.
//!
//! Exposes a restricted set of filesystem, version-control, and
//! command-execution tools to a remote orchestrator over an authenticated
//! WebSocket (or stdio), with a security kernel between the wire and the
//! operating system. Every path crosses the workspace guard and every
//! command crosses the allow/deny engine before anything touches disk;
//! destructive operations fail closed until a human approves them, and
//! the audit trail records enough to reconstruct a run from the log alone.

pub mod approval;
pub mod audit;
pub mod cli;
pub mod config;
pub mod error;
pub mod guard;
pub mod server;
pub mod token;
pub mod tools;
