//! Per-conversation shell sessions.
//!
//! Provides:
//! - `ShellSession` - Working directory and environment that persist across commands
//! - `Directive` - Classification of `cd`, `source`, `export` and `unset` lines
//! - Shell detection and child process execution

pub mod directive;
pub mod exec;
pub mod session;
pub mod shell;

pub use directive::Directive;
pub use exec::truncate_head;
pub use session::ShellSession;
pub use shell::{UnixShell, base_env, resolve_executable_path};
