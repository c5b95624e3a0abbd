//! The security kernel: every path, command, and patch crosses one of these
//! gates before any filesystem or process side effect.

pub mod command;
pub mod patch;
pub mod path;

pub use command::{tokenize, CommandValidator, Verdict};
pub use patch::inspect_patch;
pub use path::{PathGuard, Resolved};
