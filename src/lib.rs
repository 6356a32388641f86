//! Rate-limited, self-healing IRC-over-WebSocket chat transport
//!
//! A hand-rolled WebSocket client (`websocket`) carries an authenticated IRC
//! session (`irc`). Both are paced by sliding-window rate limiters, guarded by
//! circuit breakers and watched by the health monitor shared through a
//! `TransportContext`.

#[macro_use]
pub mod config;

pub mod circuit_breaker;
pub mod context;
pub mod errors;
pub mod events;
pub mod health;
pub mod irc;
pub mod logger;
pub mod rate_limiter;
pub mod websocket;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use context::TransportContext;
pub use errors::{ChatError, ChatResult};
pub use events::EventReceiver;
pub use irc::{ChatEvent, ChatMessage, ChatSession, SessionHandle, SessionState};
pub use websocket::{WebSocketClient, WebSocketHandle, WsEvent};
