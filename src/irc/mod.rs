//! IRC-over-WebSocket chat protocol
//!
//! - `message`: line parser / formatter
//! - `tags`: provider tag values, badges, emotes
//! - `channel`: per-channel membership and modes
//! - `events`: events emitted to subscribers
//! - `session`: the authenticated, rate-limited session actor

pub mod channel;
pub mod events;
pub mod message;
pub mod session;
pub mod tags;

pub use channel::{normalize_channel, IrcChannel};
pub use events::{ChatEvent, ChatMessage};
pub use message::{IrcCommand, IrcMessage};
pub use session::{ChatSession, SessionHandle, SessionState};
pub use tags::{Badge, Emote, EmoteRange, TagValue, Tags};
