//! Events emitted by a chat session

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use super::message::IrcMessage;
use super::tags::{Badge, Emote, Tags};

/// One chat line with its decoded metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub channel: String,
    pub text: String,
    /// Login name from the prefix
    pub nick: String,
    pub display_name: String,
    pub id: Option<String>,
    pub user_id: Option<String>,
    pub room_id: Option<String>,
    pub color: Option<String>,
    pub subscriber: bool,
    pub moderator: bool,
    pub vip: bool,
    pub turbo: bool,
    pub badges: Vec<Badge>,
    pub emotes: Vec<Emote>,
    pub bits: Option<u64>,
    /// `/me` message
    pub is_action: bool,
    /// Server-side send time (`tmi-sent-ts`)
    pub sent_at: Option<DateTime<Utc>>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChatEvent {
    MessageReceived(ChatMessage),
    ChannelJoined {
        channel: String,
    },
    ChannelLeft {
        channel: String,
    },
    UserJoined {
        channel: String,
        user: String,
    },
    UserLeft {
        channel: String,
        user: String,
    },
    ConnectionOpened,
    ConnectionError {
        error: String,
    },
    ConnectionLost {
        reason: String,
    },
    ConnectionClosed {
        code: u16,
        reason: String,
    },
    Authenticated {
        nick: String,
    },
    NamesReceived {
        channel: String,
        names: Vec<String>,
    },
    NoticeReceived {
        channel: String,
        text: String,
        tags: Tags,
    },
    UserNoticeReceived {
        channel: String,
        text: Option<String>,
        tags: Tags,
    },
    RoomStateChanged {
        channel: String,
        modes: BTreeMap<String, String>,
    },
    UserStateChanged {
        channel: String,
        tags: Tags,
    },
    ChatCleared {
        channel: String,
        /// Absent when the whole channel was cleared
        target: Option<String>,
        ban_duration: Option<u64>,
        reason: Option<String>,
    },
    MessageDeleted {
        channel: String,
        text: String,
        target_message_id: Option<String>,
        login: Option<String>,
    },
    RawMessage(IrcMessage),
    ConnectionHealthy {
        quality: f64,
    },
    ConnectionUnhealthy {
        consecutive_failures: u32,
    },
    /// Automatic reconnection gave up; only an explicit reconnect resumes
    #[serde(rename = "max_reconnect_attempts")]
    ReconnectExhausted {
        attempts: u32,
    },
}

impl ChatEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ChatEvent::MessageReceived(_) => "message_received",
            ChatEvent::ChannelJoined { .. } => "channel_joined",
            ChatEvent::ChannelLeft { .. } => "channel_left",
            ChatEvent::UserJoined { .. } => "user_joined",
            ChatEvent::UserLeft { .. } => "user_left",
            ChatEvent::ConnectionOpened => "connection_opened",
            ChatEvent::ConnectionError { .. } => "connection_error",
            ChatEvent::ConnectionLost { .. } => "connection_lost",
            ChatEvent::ConnectionClosed { .. } => "connection_closed",
            ChatEvent::Authenticated { .. } => "authenticated",
            ChatEvent::NamesReceived { .. } => "names_received",
            ChatEvent::NoticeReceived { .. } => "notice_received",
            ChatEvent::UserNoticeReceived { .. } => "user_notice_received",
            ChatEvent::RoomStateChanged { .. } => "room_state_changed",
            ChatEvent::UserStateChanged { .. } => "user_state_changed",
            ChatEvent::ChatCleared { .. } => "chat_cleared",
            ChatEvent::MessageDeleted { .. } => "message_deleted",
            ChatEvent::RawMessage(_) => "raw_message",
            ChatEvent::ConnectionHealthy { .. } => "connection_healthy",
            ChatEvent::ConnectionUnhealthy { .. } => "connection_unhealthy",
            ChatEvent::ReconnectExhausted { .. } => "max_reconnect_attempts",
        }
    }
}
