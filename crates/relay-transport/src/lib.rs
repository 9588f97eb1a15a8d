//! Transport layer for conversation relays.
//!
//! Provides:
//! - Wire protocol (JSON, chunked replies, base64 attachments)
//! - Code block routing and message dispatch onto `SessionRegistry`
//! - WebSocket transport (feature: websocket)

pub mod dispatch;
pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use dispatch::dispatch;
pub use protocol::{Attachment, ClientMessage, Route, ServerMessage, chunk_text, extract_code_block, route_text};
#[cfg(feature = "websocket")]
pub use websocket::{WsState, create_ws_router};
