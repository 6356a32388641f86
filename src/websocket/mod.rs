//! Hand-rolled WebSocket client
//!
//! - `frame`: frame codec and masking
//! - `handshake`: HTTP/1.1 upgrade request and response
//! - `url` / `stream`: endpoint parsing, TCP and TLS transport
//! - `client`: the connection actor with heartbeat, paced send queue and
//!   bounded reconnection

pub mod client;
pub mod frame;
pub mod handshake;
pub mod stream;
pub mod url;

pub use client::{ConnectionState, WebSocketClient, WebSocketHandle, WsEvent, WsMessage};
pub use frame::{Frame, Opcode, CLOSE_NORMAL};
pub use url::WsUrl;
