//! Terminal bridge for live tmux panes.
//!
//! Provides:
//! - `TerminalBridge` - Per-target serialized send, settle and capture
//! - `TmuxDriver` - `PaneDriver` over the tmux CLI
//! - Command building utilities

pub mod bridge;
pub mod command;
pub mod tmux;

pub use bridge::{PaneCapture, SendOptions, TerminalBridge, increment, tail_lines};
pub use command::{CommandBuildError, CommandBuilder, CommandParts};
pub use relay_core::TerminalTarget;
pub use tmux::TmuxDriver;
