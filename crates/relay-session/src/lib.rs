//! Conversation registry and snapshot storage.
//!
//! Provides:
//! - `SessionRegistry` - Route inbound commands to shell sessions or bound panes
//! - Storage implementations (memory, JSON files)

pub mod registry;
pub mod storage;

pub use registry::{Conversation, ConversationHandle, SessionRegistry};
