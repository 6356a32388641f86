//! IRC session actor
//!
//! Owns one WebSocket connection, authenticates, keeps channel state and
//! routes chat traffic through two independent limiters:
//! - PRIVMSG: `message_rate_limit` per `message_rate_window`
//! - JOIN: `join_rate_limit` per `join_rate_window`
//!
//! A rejected item is queued, never dropped. A periodic tick drains both
//! queues head first; a still-rejected head blocks only its own queue.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Interval, MissedTickBehavior};

use super::channel::{normalize_channel, IrcChannel};
use super::events::{ChatEvent, ChatMessage};
use super::message::{self, IrcCommand, IrcMessage};
use super::tags::{parse_badges, parse_emotes, Badge, TagValue};
use crate::config::Config;
use crate::context::TransportContext;
use crate::errors::{ChatError, ChatResult};
use crate::events::{EventReceiver, Subscribers};
use crate::health::{HealthEvent, HealthSnapshot, MonitoredConnection};
use crate::logger::{self, LogTag};
use crate::rate_limiter::RateLimiter;
use crate::websocket::{WebSocketClient, WebSocketHandle, WsEvent, WsMessage, CLOSE_NORMAL};

const COMMAND_BUFFER: usize = 256;
const PING_TARGET: &str = "tmi.twitch.tv";
const ACTION_PREFIX: &str = "\u{1}ACTION ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    /// Transport open, PASS/NICK/CAP sent, waiting for 001
    ConnectedUnauthenticated,
    Authenticated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disconnected => "DISCONNECTED",
            SessionState::Connecting => "CONNECTING",
            SessionState::ConnectedUnauthenticated => "CONNECTED_UNAUTHENTICATED",
            SessionState::Authenticated => "AUTHENTICATED",
        };
        write!(f, "{}", s)
    }
}

enum SessionCommand {
    SendMessage {
        channel: String,
        text: String,
        reply: oneshot::Sender<ChatResult<()>>,
    },
    Join {
        channel: String,
        reply: oneshot::Sender<ChatResult<()>>,
    },
    Part {
        channel: String,
        reply: oneshot::Sender<ChatResult<()>>,
    },
    SendRaw {
        line: String,
        reply: oneshot::Sender<ChatResult<()>>,
    },
    Reconnect {
        reply: oneshot::Sender<ChatResult<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    State {
        reply: oneshot::Sender<SessionState>,
    },
    Channels {
        reply: oneshot::Sender<Vec<IrcChannel>>,
    },
    Subscribe {
        reply: oneshot::Sender<EventReceiver<ChatEvent>>,
    },
}

/// Cloneable handle to a running chat session
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    commands: mpsc::Sender<SessionCommand>,
    context: TransportContext,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.id).finish()
    }
}

impl SessionHandle {
    /// Health monitor id of this session
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Send a chat line; accepted lines are paced, never rejected for rate
    pub async fn send_message(&self, channel: &str, text: &str) -> ChatResult<()> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionCommand::SendMessage {
            channel: normalize_channel(channel),
            text: text.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ChatError::ActorGone)?
    }

    /// Join `channel` (a missing `#` is added)
    pub async fn join_channel(&self, channel: &str) -> ChatResult<()> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionCommand::Join {
            channel: normalize_channel(channel),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ChatError::ActorGone)?
    }

    pub async fn part_channel(&self, channel: &str) -> ChatResult<()> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionCommand::Part {
            channel: normalize_channel(channel),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ChatError::ActorGone)?
    }

    /// Write a protocol line immediately, bypassing both limiters
    pub async fn send_raw(&self, line: &str) -> ChatResult<()> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionCommand::SendRaw {
            line: line.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ChatError::ActorGone)?
    }

    /// Reconnect the transport now; resolves with that attempt's outcome
    pub async fn reconnect(&self) -> ChatResult<()> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionCommand::Reconnect { reply }).await?;
        rx.await.map_err(|_| ChatError::ActorGone)?
    }

    /// Send QUIT, close the socket with 1000 and stop the session
    pub async fn disconnect(&self) -> ChatResult<()> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionCommand::Disconnect { reply }).await?;
        rx.await.map_err(|_| ChatError::ActorGone)
    }

    pub async fn state(&self) -> ChatResult<SessionState> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionCommand::State { reply }).await?;
        rx.await.map_err(|_| ChatError::ActorGone)
    }

    /// Snapshot of known channels, sorted by name
    pub async fn channels(&self) -> ChatResult<Vec<IrcChannel>> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionCommand::Channels { reply }).await?;
        rx.await.map_err(|_| ChatError::ActorGone)
    }

    pub async fn subscribe(&self) -> ChatResult<EventReceiver<ChatEvent>> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionCommand::Subscribe { reply }).await?;
        rx.await.map_err(|_| ChatError::ActorGone)
    }

    pub fn health(&self) -> Option<HealthSnapshot> {
        self.context.health.snapshot(&self.id)
    }

    pub async fn force_reconnect(&self) -> ChatResult<()> {
        self.context.health.force_reconnect(&self.id).await
    }

    async fn request(&self, command: SessionCommand) -> ChatResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ChatError::ActorGone)
    }
}

pub struct ChatSession;

impl ChatSession {
    /// Open the transport and spawn the session actor
    ///
    /// The returned receiver is subscribed before the connection opens.
    pub fn connect(
        config: &Config,
        context: &TransportContext,
    ) -> ChatResult<(SessionHandle, EventReceiver<ChatEvent>)> {
        let (ws, ws_events) =
            WebSocketClient::connect(&config.connection.url, config.websocket.clone())?;

        let id = format!("irc-{}", uuid::Uuid::new_v4().simple());
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);

        let mut subscribers = Subscribers::new();
        let events = subscribers.subscribe();

        let actor = SessionActor::new(
            id.clone(),
            config,
            context.clone(),
            ws,
            ws_events,
            rx,
            subscribers,
        );
        tokio::spawn(actor.run());

        logger::info(
            LogTag::Session,
            &format!(
                "Session {} started for {} as {}",
                id, config.connection.url, config.connection.nick
            ),
        );

        Ok((
            SessionHandle {
                id,
                commands: tx,
                context: context.clone(),
            },
            events,
        ))
    }
}

/// Liveness probe the health monitor drives through IRC PING
struct SessionProbe {
    ws: WebSocketHandle,
}

#[async_trait]
impl MonitoredConnection for SessionProbe {
    async fn send_ping(&self) -> ChatResult<()> {
        self.ws
            .send_raw(message::format("PING", &[PING_TARGET]))
            .await
    }

    async fn reconnect(&self) -> ChatResult<()> {
        self.ws.reconnect().await
    }
}

struct SessionActor {
    id: String,
    nick: String,
    pass: String,
    capabilities: Vec<String>,
    rejoin_on_reconnect: bool,

    context: TransportContext,
    ws: WebSocketHandle,
    ws_events: EventReceiver<WsEvent>,
    health_events: EventReceiver<HealthEvent>,
    commands: mpsc::Receiver<SessionCommand>,
    subscribers: Subscribers<ChatEvent>,

    state: SessionState,
    channels: BTreeMap<String, IrcChannel>,
    /// Channels to (re)join after authentication
    wanted: BTreeSet<String>,
    authenticated_once: bool,
    monitoring: bool,

    message_limiter: RateLimiter,
    join_limiter: RateLimiter,
    message_queue: VecDeque<String>,
    join_queue: VecDeque<String>,
    drain: Interval,

    finished: bool,
}

impl SessionActor {
    fn new(
        id: String,
        config: &Config,
        context: TransportContext,
        ws: WebSocketHandle,
        ws_events: EventReceiver<WsEvent>,
        commands: mpsc::Receiver<SessionCommand>,
        subscribers: Subscribers<ChatEvent>,
    ) -> Self {
        let irc = &config.irc;
        let mut drain = tokio::time::interval(irc.queue_drain_interval());
        drain.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let health_events = context.health.subscribe();

        Self {
            id,
            nick: config.connection.nick.to_ascii_lowercase(),
            pass: config.connection.pass.clone(),
            capabilities: irc.capabilities.clone(),
            rejoin_on_reconnect: irc.rejoin_on_reconnect,
            context,
            ws,
            ws_events,
            health_events,
            commands,
            subscribers,
            state: SessionState::Connecting,
            channels: BTreeMap::new(),
            wanted: config
                .connection
                .channels
                .iter()
                .map(|c| normalize_channel(c))
                .collect(),
            authenticated_once: false,
            monitoring: false,
            message_limiter: RateLimiter::new(irc.message_rate_limit, irc.message_rate_window()),
            join_limiter: RateLimiter::new(irc.join_rate_limit, irc.join_rate_window()),
            message_queue: VecDeque::new(),
            join_queue: VecDeque::new(),
            drain,
            finished: false,
        }
    }

    async fn run(mut self) {
        while !self.finished {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => self.disconnect().await,
                },
                event = self.ws_events.recv() => match event {
                    Some(event) => self.handle_ws_event(event).await,
                    None => {
                        logger::debug(LogTag::Session, "Transport actor ended");
                        self.set_state(SessionState::Disconnected);
                        self.finished = true;
                    }
                },
                Some(event) = self.health_events.recv() => self.handle_health_event(event),
                _ = self.drain.tick() => self.drain_queues().await,
            }
        }

        if self.monitoring {
            self.context.health.stop_monitoring(&self.id);
        }
        logger::info(LogTag::Session, &format!("Session {} stopped", self.id));
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            logger::info(
                LogTag::Session,
                &format!("Session {}: {} -> {}", self.id, self.state, next),
            );
            self.state = next;
        }
    }

    fn emit(&mut self, event: ChatEvent) {
        self.subscribers.emit(event);
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    fn require_authenticated(&self) -> ChatResult<()> {
        if self.state == SessionState::Authenticated {
            Ok(())
        } else {
            Err(ChatError::NotAuthenticated)
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::SendMessage {
                channel,
                text,
                reply,
            } => {
                let result = self.require_authenticated();
                if result.is_ok() {
                    self.message_queue
                        .push_back(message::format("PRIVMSG", &[&channel, &text]));
                    self.drain_messages().await;
                }
                let _ = reply.send(result);
            }
            SessionCommand::Join { channel, reply } => {
                let result = self.require_authenticated();
                if result.is_ok() {
                    self.wanted.insert(channel.clone());
                    self.enqueue_join(channel);
                    self.drain_joins().await;
                }
                let _ = reply.send(result);
            }
            SessionCommand::Part { channel, reply } => {
                let result = match self.require_authenticated() {
                    Ok(()) => {
                        self.wanted.remove(&channel);
                        self.join_queue.retain(|c| c != &channel);
                        self.ws.send(message::format("PART", &[&channel])).await
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            SessionCommand::SendRaw { line, reply } => {
                let _ = reply.send(self.ws.send_raw(line).await);
            }
            SessionCommand::Reconnect { reply } => {
                let _ = reply.send(self.ws.reconnect().await);
            }
            SessionCommand::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            SessionCommand::State { reply } => {
                let _ = reply.send(self.state);
            }
            SessionCommand::Channels { reply } => {
                let _ = reply.send(self.channels.values().cloned().collect());
            }
            SessionCommand::Subscribe { reply } => {
                let _ = reply.send(self.subscribers.subscribe());
            }
        }
    }

    async fn disconnect(&mut self) {
        if self.state != SessionState::Disconnected {
            if let Err(e) = self.ws.send_raw(message::format("QUIT", &[])).await {
                logger::debug(LogTag::Session, &format!("QUIT not sent: {}", e));
            }
        }
        if let Err(e) = self.ws.close(CLOSE_NORMAL, "disconnect").await {
            logger::debug(LogTag::Session, &format!("Transport already gone: {}", e));
        }

        self.set_state(SessionState::Disconnected);
        self.emit(ChatEvent::ConnectionClosed {
            code: CLOSE_NORMAL,
            reason: "disconnect".to_string(),
        });
        self.commands.close();
        self.finished = true;
    }

    // =========================================================================
    // RATE-LIMITED QUEUES
    // =========================================================================

    fn enqueue_join(&mut self, channel: String) {
        if !self.join_queue.contains(&channel) {
            self.join_queue.push_back(channel);
        }
    }

    async fn drain_queues(&mut self) {
        self.drain_messages().await;
        self.drain_joins().await;
    }

    async fn drain_messages(&mut self) {
        if self.state != SessionState::Authenticated {
            return;
        }
        while !self.message_queue.is_empty() {
            if !self.message_limiter.check() {
                logger::debug(
                    LogTag::RateLimit,
                    &format!(
                        "Message limit reached, {} PRIVMSG queued",
                        self.message_queue.len()
                    ),
                );
                return;
            }
            let Some(line) = self.message_queue.pop_front() else {
                return;
            };
            self.message_limiter.add();
            if let Err(e) = self.ws.send(line).await {
                logger::warning(LogTag::Session, &format!("PRIVMSG not sent: {}", e));
                return;
            }
        }
    }

    async fn drain_joins(&mut self) {
        if self.state != SessionState::Authenticated {
            return;
        }
        while !self.join_queue.is_empty() {
            if !self.join_limiter.check() {
                logger::debug(
                    LogTag::RateLimit,
                    &format!("Join limit reached, {} JOIN queued", self.join_queue.len()),
                );
                return;
            }
            let Some(channel) = self.join_queue.pop_front() else {
                return;
            };
            self.join_limiter.add();
            logger::debug(LogTag::Irc, &format!("Joining {}", channel));
            if let Err(e) = self.ws.send(message::format("JOIN", &[&channel])).await {
                logger::warning(LogTag::Session, &format!("JOIN not sent: {}", e));
                return;
            }
        }
    }

    // =========================================================================
    // TRANSPORT EVENTS
    // =========================================================================

    async fn handle_ws_event(&mut self, event: WsEvent) {
        match event {
            WsEvent::Open => self.on_open().await,
            WsEvent::Message(WsMessage::Text(text)) => {
                for line in text.split(['\r', '\n']).filter(|l| !l.is_empty()) {
                    self.handle_line(line).await;
                }
            }
            WsEvent::Message(WsMessage::Binary(data)) => {
                logger::debug(
                    LogTag::Irc,
                    &format!("Ignoring {} byte binary message", data.len()),
                );
            }
            WsEvent::Pong { .. } => {
                if self.monitoring {
                    self.context.health.record_activity(&self.id);
                }
            }
            WsEvent::Close { code, reason } => {
                let was_connected = self.is_connected();
                self.mark_disconnected();
                self.emit(ChatEvent::ConnectionClosed {
                    code,
                    reason: reason.clone(),
                });
                if was_connected && code != CLOSE_NORMAL {
                    let reason = if reason.is_empty() {
                        format!("closed with code {}", code)
                    } else {
                        reason
                    };
                    self.emit(ChatEvent::ConnectionLost { reason });
                }
            }
            WsEvent::Error { error } => {
                let was_connected = self.is_connected();
                self.mark_disconnected();
                self.emit(ChatEvent::ConnectionError {
                    error: error.clone(),
                });
                if was_connected {
                    self.emit(ChatEvent::ConnectionLost { reason: error });
                }
            }
            WsEvent::Reconnecting { attempt, delay } => {
                logger::info(
                    LogTag::Session,
                    &format!(
                        "Session {} reconnecting in {}ms (attempt {})",
                        self.id,
                        delay.as_millis(),
                        attempt
                    ),
                );
                self.set_state(SessionState::Connecting);
            }
            WsEvent::MaxReconnectAttempts { attempts } => {
                self.set_state(SessionState::Disconnected);
                self.emit(ChatEvent::ReconnectExhausted { attempts });
            }
        }
    }

    fn is_connected(&self) -> bool {
        matches!(
            self.state,
            SessionState::ConnectedUnauthenticated | SessionState::Authenticated
        )
    }

    fn mark_disconnected(&mut self) {
        self.set_state(SessionState::Disconnected);
        for channel in self.channels.values_mut() {
            channel.joined = false;
            channel.members.clear();
        }
    }

    async fn on_open(&mut self) {
        self.set_state(SessionState::ConnectedUnauthenticated);
        self.emit(ChatEvent::ConnectionOpened);

        let mut lines = Vec::new();
        if !self.capabilities.is_empty() {
            let caps = self.capabilities.join(" ");
            lines.push(message::format("CAP", &["REQ", &caps]));
        }
        if !self.pass.is_empty() {
            lines.push(message::format("PASS", &[&self.pass]));
        }
        lines.push(message::format("NICK", &[&self.nick]));

        for line in lines {
            if let Err(e) = self.ws.send_raw(line).await {
                logger::warning(LogTag::Session, &format!("Auth line not sent: {}", e));
                return;
            }
        }
        logger::debug(LogTag::Session, &format!("Sent login for {}", self.nick));

        if !self.monitoring {
            let probe = Arc::new(SessionProbe {
                ws: self.ws.clone(),
            });
            self.context.health.start_monitoring(&self.id, probe);
            self.monitoring = true;
        }
    }

    fn handle_health_event(&mut self, event: HealthEvent) {
        if event.id() != self.id {
            return;
        }
        match event {
            HealthEvent::Healthy { quality, .. } => {
                self.emit(ChatEvent::ConnectionHealthy { quality })
            }
            HealthEvent::Unhealthy {
                consecutive_failures,
                ..
            } => self.emit(ChatEvent::ConnectionUnhealthy {
                consecutive_failures,
            }),
            HealthEvent::RecoveryHalted { attempts, .. } => {
                logger::warning(
                    LogTag::Session,
                    &format!(
                        "Session {} recovery halted after {} attempts",
                        self.id, attempts
                    ),
                );
            }
        }
    }

    // =========================================================================
    // INBOUND LINES
    // =========================================================================

    async fn handle_line(&mut self, line: &str) {
        let msg = match IrcMessage::parse(line) {
            Ok(msg) => msg,
            Err(e) => {
                logger::warning(LogTag::Irc, &format!("Skipping unparsable line: {}", e));
                return;
            }
        };
        logger::verbose(LogTag::Irc, &format!("<< {}", msg.raw));
        self.emit(ChatEvent::RawMessage(msg.clone()));

        match msg.kind() {
            IrcCommand::Ping => {
                let target = msg.trailing().unwrap_or(PING_TARGET).to_string();
                if let Err(e) = self.ws.send_raw(message::format("PONG", &[&target])).await {
                    logger::debug(LogTag::Irc, &format!("PONG not sent: {}", e));
                }
                if self.monitoring {
                    self.context.health.record_activity(&self.id);
                }
            }
            IrcCommand::Pong => {
                if self.monitoring {
                    self.context.health.record_pong(&self.id);
                }
            }
            IrcCommand::Privmsg => match chat_message(&msg) {
                Some(chat) => self.emit(ChatEvent::MessageReceived(chat)),
                None => logger::debug(LogTag::Irc, "PRIVMSG without channel"),
            },
            IrcCommand::Join => self.on_join(&msg),
            IrcCommand::Part => self.on_part(&msg),
            IrcCommand::Notice => {
                let channel = msg.param(0).unwrap_or_default().to_string();
                let text = msg.trailing().unwrap_or_default().to_string();
                if text.contains("Login authentication failed")
                    || text.contains("Improperly formatted auth")
                {
                    logger::error(LogTag::Session, &format!("Login rejected: {}", text));
                }
                self.emit(ChatEvent::NoticeReceived {
                    channel,
                    text,
                    tags: msg.tags,
                });
            }
            IrcCommand::UserNotice => {
                self.emit(ChatEvent::UserNoticeReceived {
                    channel: msg.param(0).unwrap_or_default().to_string(),
                    text: msg.param(1).map(str::to_string),
                    tags: msg.tags,
                });
            }
            IrcCommand::RoomState => self.on_room_state(&msg),
            IrcCommand::UserState => {
                self.emit(ChatEvent::UserStateChanged {
                    channel: msg.param(0).unwrap_or_default().to_string(),
                    tags: msg.tags,
                });
            }
            IrcCommand::ClearChat => {
                self.emit(ChatEvent::ChatCleared {
                    channel: msg.param(0).unwrap_or_default().to_string(),
                    target: msg.param(1).map(str::to_string),
                    ban_duration: msg.tag("ban-duration").and_then(|d| d.parse().ok()),
                    reason: msg.tag("ban-reason").map(str::to_string),
                });
            }
            IrcCommand::ClearMsg => {
                self.emit(ChatEvent::MessageDeleted {
                    channel: msg.param(0).unwrap_or_default().to_string(),
                    text: msg.param(1).unwrap_or_default().to_string(),
                    target_message_id: msg.tag("target-msg-id").map(str::to_string),
                    login: msg.tag("login").map(str::to_string),
                });
            }
            IrcCommand::Welcome => self.on_welcome(&msg).await,
            IrcCommand::NamesReply => {
                // <me> <type> <channel> :<names>
                if let (Some(channel), Some(names)) = (msg.param(2), msg.param(3)) {
                    self.channel_entry(channel).merge_names(names);
                }
            }
            IrcCommand::EndOfNames => {
                if let Some(channel) = msg.param(1) {
                    let names = self
                        .channels
                        .get(channel)
                        .map(|c| c.members.iter().cloned().collect())
                        .unwrap_or_default();
                    self.emit(ChatEvent::NamesReceived {
                        channel: channel.to_string(),
                        names,
                    });
                }
            }
            IrcCommand::Unknown(_) => {}
        }
    }

    fn channel_entry(&mut self, name: &str) -> &mut IrcChannel {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| IrcChannel::new(name))
    }

    fn is_self(&self, nick: &str) -> bool {
        nick.eq_ignore_ascii_case(&self.nick)
    }

    async fn on_welcome(&mut self, msg: &IrcMessage) {
        let nick = msg.param(0).unwrap_or(&self.nick).to_string();
        self.set_state(SessionState::Authenticated);
        self.emit(ChatEvent::Authenticated { nick });

        if !self.authenticated_once || self.rejoin_on_reconnect {
            let wanted: Vec<String> = self.wanted.iter().cloned().collect();
            if !wanted.is_empty() {
                logger::info(
                    LogTag::Session,
                    &format!("Joining {} channel(s) after login", wanted.len()),
                );
            }
            for channel in wanted {
                self.enqueue_join(channel);
            }
        }
        self.authenticated_once = true;
        self.drain_queues().await;
    }

    fn on_join(&mut self, msg: &IrcMessage) {
        let (Some(channel), Some(nick)) = (msg.param(0), msg.nick()) else {
            return;
        };
        let channel = channel.to_string();
        let nick = nick.to_string();

        if self.is_self(&nick) {
            self.channel_entry(&channel).joined = true;
            logger::info(LogTag::Irc, &format!("Joined {}", channel));
            self.emit(ChatEvent::ChannelJoined { channel });
        } else {
            self.channel_entry(&channel).add_member(&nick);
            self.emit(ChatEvent::UserJoined {
                channel,
                user: nick,
            });
        }
    }

    fn on_part(&mut self, msg: &IrcMessage) {
        let (Some(channel), Some(nick)) = (msg.param(0), msg.nick()) else {
            return;
        };
        let channel = channel.to_string();
        let nick = nick.to_string();

        if self.is_self(&nick) {
            self.channels.remove(&channel);
            logger::info(LogTag::Irc, &format!("Left {}", channel));
            self.emit(ChatEvent::ChannelLeft { channel });
        } else {
            if let Some(entry) = self.channels.get_mut(&channel) {
                entry.remove_member(&nick);
            }
            self.emit(ChatEvent::UserLeft {
                channel,
                user: nick,
            });
        }
    }

    fn on_room_state(&mut self, msg: &IrcMessage) {
        let Some(channel) = msg.param(0) else {
            return;
        };
        let entry = self.channel_entry(channel);
        for (key, value) in &msg.tags {
            let value = match value {
                TagValue::Text(v) => v.clone(),
                TagValue::Flag => "true".to_string(),
            };
            entry.modes.insert(key.to_ascii_lowercase(), value);
        }
        let event = ChatEvent::RoomStateChanged {
            channel: entry.name.clone(),
            modes: entry.modes.clone(),
        };
        self.emit(event);
    }
}

fn has_badge(badges: &[Badge], names: &[&str]) -> bool {
    badges.iter().any(|b| names.contains(&b.name.as_str()))
}

/// Build the chat record for a PRIVMSG
fn chat_message(msg: &IrcMessage) -> Option<ChatMessage> {
    let channel = msg.param(0)?.to_string();
    let mut text = msg.param(1).unwrap_or_default().to_string();

    let is_action = text.starts_with(ACTION_PREFIX);
    if is_action {
        text = text[ACTION_PREFIX.len()..]
            .trim_end_matches('\u{1}')
            .to_string();
    }

    let nick = msg
        .nick()
        .or_else(|| msg.tag("login"))
        .unwrap_or_default()
        .to_string();
    let display_name = msg.tag("display-name").unwrap_or(&nick).to_string();
    let badges = parse_badges(msg.tag("badges").unwrap_or_default());
    let flag = |key: &str| msg.tag(key) == Some("1");

    let sent_at: Option<DateTime<Utc>> = msg
        .tag("tmi-sent-ts")
        .and_then(|ts| ts.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

    Some(ChatMessage {
        subscriber: flag("subscriber") || has_badge(&badges, &["subscriber", "founder"]),
        moderator: flag("mod") || has_badge(&badges, &["moderator", "broadcaster"]),
        vip: msg.has_tag("vip") || has_badge(&badges, &["vip"]),
        turbo: flag("turbo") || has_badge(&badges, &["turbo"]),
        emotes: parse_emotes(msg.tag("emotes").unwrap_or_default()),
        bits: msg.tag("bits").and_then(|b| b.parse().ok()),
        id: msg.tag("id").map(str::to_string),
        user_id: msg.tag("user-id").map(str::to_string),
        room_id: msg.tag("room-id").map(str::to_string),
        color: msg.tag("color").map(str::to_string),
        tags: msg.tags.clone(),
        channel,
        text,
        nick,
        display_name,
        badges,
        is_action,
        sent_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{next_matching, FakePeer, FakeServer};
    use std::time::{Duration, Instant};

    fn test_config() -> Config {
        let mut config = Config::default();
        config.connection.nick = "justinfan123".to_string();
        config.connection.pass = "oauth:secret".to_string();
        config.websocket.reconnect_interval_ms = 20;
        config.websocket.queue_drain_interval_ms = 10;
        config.irc.queue_drain_interval_ms = 20;
        config.health.ping_interval_ms = 60_000;
        config
    }

    async fn login(peer: &mut FakePeer) {
        peer.recv_line_matching(|l| l.starts_with("NICK")).await.unwrap();
        peer.send_text(":tmi.twitch.tv 001 justinfan123 :Welcome, GLHF!\r\n")
            .await;
    }

    /// Connect a session to a fresh fake server and complete the login
    async fn start(
        mut config: Config,
    ) -> (SessionHandle, EventReceiver<ChatEvent>, FakePeer, FakeServer) {
        let server = FakeServer::bind().await;
        config.connection.url = server.url();
        let context = TransportContext::new(&config);
        let (handle, mut events) = ChatSession::connect(&config, &context).unwrap();
        let mut peer = server.accept().await;
        login(&mut peer).await;
        let authed =
            next_matching(&mut events, |e| matches!(e, ChatEvent::Authenticated { .. })).await;
        assert!(authed.is_some());
        (handle, events, peer, server)
    }

    #[tokio::test]
    async fn test_login_sequence() {
        let server = FakeServer::bind().await;
        let mut config = test_config();
        config.connection.url = server.url();
        let context = TransportContext::new(&config);
        let (handle, mut events) = ChatSession::connect(&config, &context).unwrap();
        let mut peer = server.accept().await;

        let cap = peer.recv_line_matching(|_| true).await.unwrap();
        assert_eq!(
            cap,
            "CAP REQ :twitch.tv/tags twitch.tv/commands twitch.tv/membership"
        );
        assert_eq!(
            peer.recv_line_matching(|_| true).await.as_deref(),
            Some("PASS oauth:secret")
        );
        assert_eq!(
            peer.recv_line_matching(|_| true).await.as_deref(),
            Some("NICK justinfan123")
        );

        assert_eq!(events.recv().await, Some(ChatEvent::ConnectionOpened));
        assert_eq!(
            handle.state().await.unwrap(),
            SessionState::ConnectedUnauthenticated
        );
        assert!(matches!(
            handle.send_message("#c", "too early").await,
            Err(ChatError::NotAuthenticated)
        ));

        peer.send_text(":tmi.twitch.tv 001 justinfan123 :Welcome\r\n").await;
        let authed = next_matching(&mut events, |e| matches!(e, ChatEvent::Authenticated { .. })).await;
        assert_eq!(
            authed,
            Some(ChatEvent::Authenticated {
                nick: "justinfan123".to_string()
            })
        );
        assert_eq!(handle.state().await.unwrap(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn test_two_privmsgs_in_one_frame_arrive_in_order() {
        let (_handle, mut events, mut peer, _server) =
            start(test_config()).await;

        peer.send_text("@id=1 :a!a@a PRIVMSG #c :hi\r\n@id=2 :b!b@b PRIVMSG #c :yo\r\n")
            .await;

        let mut received = Vec::new();
        while received.len() < 2 {
            match next_matching(&mut events, |e| matches!(e, ChatEvent::MessageReceived(_))).await {
                Some(ChatEvent::MessageReceived(m)) => received.push(m),
                other => panic!("expected message, got {other:?}"),
            }
        }
        assert_eq!(received[0].nick, "a");
        assert_eq!(received[0].text, "hi");
        assert_eq!(received[0].id.as_deref(), Some("1"));
        assert_eq!(received[1].nick, "b");
        assert_eq!(received[1].text, "yo");
    }

    #[tokio::test]
    async fn test_unparsable_line_does_not_stop_later_lines() {
        let (_handle, mut events, mut peer, _server) = start(test_config()).await;

        peer.send_text("@id=1 :a!a@a PRIVMSG #c :hi\r\n@a=1\r\n@id=2 :b!b@b PRIVMSG #c :yo\r\n")
            .await;

        let mut texts = Vec::new();
        while texts.len() < 2 {
            match next_matching(&mut events, |e| matches!(e, ChatEvent::MessageReceived(_))).await {
                Some(ChatEvent::MessageReceived(m)) => texts.push((m.nick, m.text)),
                other => panic!("expected message, got {other:?}"),
            }
        }
        assert_eq!(
            texts,
            vec![
                ("a".to_string(), "hi".to_string()),
                ("b".to_string(), "yo".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_abnormal_close_reports_connection_lost() {
        let (_handle, mut events, mut peer, _server) = start(test_config()).await;

        peer.send_close(4000, "restart").await;
        assert_eq!(
            next_matching(&mut events, |e| matches!(e, ChatEvent::ConnectionClosed { .. })).await,
            Some(ChatEvent::ConnectionClosed {
                code: 4000,
                reason: "restart".to_string()
            })
        );
        assert_eq!(
            events.recv().await,
            Some(ChatEvent::ConnectionLost {
                reason: "restart".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_normal_close_is_not_a_loss() {
        let (_handle, mut events, mut peer, _server) = start(test_config()).await;

        peer.send_close(CLOSE_NORMAL, "").await;
        assert!(
            next_matching(&mut events, |e| matches!(e, ChatEvent::ConnectionClosed { code: 1000, .. }))
                .await
                .is_some()
        );
        let next = tokio::time::timeout(Duration::from_millis(100), events.recv()).await;
        assert!(!matches!(next, Ok(Some(ChatEvent::ConnectionLost { .. }))));
    }

    #[tokio::test]
    async fn test_privmsg_metadata_decoded() {
        let (_handle, mut events, mut peer, _server) =
            start(test_config()).await;

        peer.send_text(
            "@badges=moderator/1,subscriber/12;bits=100;color=#1E90FF;display-name=Foo;\
             emotes=25:0-4;mod=1;room-id=7;subscriber=1;tmi-sent-ts=1700000000000;turbo=0;user-id=42 \
             :foo!foo@foo.tmi.twitch.tv PRIVMSG #c :\u{1}ACTION Kappa waves\u{1}\r\n",
        )
        .await;

        let Some(ChatEvent::MessageReceived(m)) =
            next_matching(&mut events, |e| matches!(e, ChatEvent::MessageReceived(_))).await
        else {
            panic!("no message");
        };
        assert_eq!(m.display_name, "Foo");
        assert!(m.is_action);
        assert_eq!(m.text, "Kappa waves");
        assert!(m.moderator && m.subscriber);
        assert!(!m.turbo && !m.vip);
        assert_eq!(m.bits, Some(100));
        assert_eq!(m.badges.len(), 2);
        assert_eq!(m.emotes[0].id, "25");
        assert_eq!(m.user_id.as_deref(), Some("42"));
        assert_eq!(m.color.as_deref(), Some("#1E90FF"));
        assert_eq!(
            m.sent_at.map(|t| t.timestamp_millis()),
            Some(1_700_000_000_000)
        );
    }

    #[tokio::test]
    async fn test_channel_state_tracking() {
        let (handle, mut events, mut peer, _server) =
            start(test_config()).await;

        handle.join_channel("c").await.unwrap();
        assert_eq!(
            peer.recv_line_matching(|l| l.starts_with("JOIN")).await.as_deref(),
            Some("JOIN #c")
        );

        peer.send_text(
            ":justinfan123!justinfan123@justinfan123.tmi.twitch.tv JOIN #c\r\n\
             :justinfan123.tmi.twitch.tv 353 justinfan123 = #c :@alice bob\r\n\
             :justinfan123.tmi.twitch.tv 366 justinfan123 #c :End of /NAMES list\r\n\
             @emote-only=0;followers-only=-1;r9k=0;room-id=7;slow=0;subs-only=0 :tmi.twitch.tv ROOMSTATE #c\r\n\
             :carol!carol@carol.tmi.twitch.tv JOIN #c\r\n",
        )
        .await;

        assert_eq!(
            next_matching(&mut events, |e| matches!(e, ChatEvent::ChannelJoined { .. })).await,
            Some(ChatEvent::ChannelJoined {
                channel: "#c".to_string()
            })
        );
        assert_eq!(
            next_matching(&mut events, |e| matches!(e, ChatEvent::NamesReceived { .. })).await,
            Some(ChatEvent::NamesReceived {
                channel: "#c".to_string(),
                names: vec!["alice".to_string(), "bob".to_string()],
            })
        );
        let Some(ChatEvent::RoomStateChanged { modes, .. }) =
            next_matching(&mut events, |e| matches!(e, ChatEvent::RoomStateChanged { .. })).await
        else {
            panic!("no room state");
        };
        assert_eq!(modes.get("followers-only").map(String::as_str), Some("-1"));
        assert_eq!(
            next_matching(&mut events, |e| matches!(e, ChatEvent::UserJoined { .. })).await,
            Some(ChatEvent::UserJoined {
                channel: "#c".to_string(),
                user: "carol".to_string()
            })
        );

        let channels = handle.channels().await.unwrap();
        assert_eq!(channels.len(), 1);
        assert!(channels[0].joined);
        assert_eq!(channels[0].members.len(), 3);

        handle.part_channel("#c").await.unwrap();
        assert_eq!(
            peer.recv_line_matching(|l| l.starts_with("PART")).await.as_deref(),
            Some("PART #c")
        );
        peer.send_text(":justinfan123!justinfan123@justinfan123.tmi.twitch.tv PART #c\r\n")
            .await;
        assert!(
            next_matching(&mut events, |e| matches!(e, ChatEvent::ChannelLeft { .. }))
                .await
                .is_some()
        );
        assert!(handle.channels().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_server_ping_answered() {
        let (_handle, mut events, mut peer, _server) =
            start(test_config()).await;

        peer.send_text("PING :tmi.twitch.tv\r\n").await;
        assert_eq!(
            peer.recv_line_matching(|l| l.starts_with("PONG")).await.as_deref(),
            Some("PONG tmi.twitch.tv")
        );
        let raw = next_matching(&mut events, |e| matches!(e, ChatEvent::RawMessage(m) if m.command == "PING")).await;
        assert!(raw.is_some());
    }

    #[tokio::test]
    async fn test_join_queue_is_paced_and_ordered() {
        let mut config = test_config();
        config.irc.join_rate_limit = 2;
        config.irc.join_rate_window_ms = 300;
        let (handle, _events, mut peer, _server) = start(config).await;

        let started = Instant::now();
        for channel in ["a", "b", "c"] {
            handle.join_channel(channel).await.unwrap();
        }
        // Messages use their own limiter and are not held up by joins
        handle.send_message("a", "hello there").await.unwrap();

        let mut joins = Vec::new();
        let mut privmsg_seen = false;
        while joins.len() < 3 {
            let line = peer
                .recv_line_matching(|l| l.starts_with("JOIN") || l.starts_with("PRIVMSG"))
                .await
                .unwrap();
            if line.starts_with("PRIVMSG") {
                assert_eq!(line, "PRIVMSG #a :hello there");
                assert!(joins.len() < 3, "PRIVMSG waited for the join queue");
                privmsg_seen = true;
            } else {
                joins.push((line, started.elapsed()));
            }
        }
        assert!(privmsg_seen);
        assert_eq!(joins[0].0, "JOIN #a");
        assert_eq!(joins[1].0, "JOIN #b");
        assert_eq!(joins[2].0, "JOIN #c");
        assert!(joins[2].1 >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_rejoin_after_reconnect() {
        let mut config = test_config();
        config.connection.channels = vec!["c".to_string()];
        let (_handle, mut events, mut peer, server) = start(config).await;

        assert_eq!(
            peer.recv_line_matching(|l| l.starts_with("JOIN")).await.as_deref(),
            Some("JOIN #c")
        );

        peer.send_close(4000, "restart").await;
        assert!(
            next_matching(&mut events, |e| matches!(e, ChatEvent::ConnectionClosed { code: 4000, .. }))
                .await
                .is_some()
        );

        let mut peer = server.accept().await;
        login(&mut peer).await;
        assert_eq!(
            peer.recv_line_matching(|l| l.starts_with("JOIN")).await.as_deref(),
            Some("JOIN #c")
        );
    }

    #[tokio::test]
    async fn test_disconnect_sends_quit_and_closes() {
        let (handle, mut events, mut peer, _server) =
            start(test_config()).await;

        handle.disconnect().await.unwrap();
        assert_eq!(
            peer.recv_line_matching(|l| l.starts_with("QUIT")).await.as_deref(),
            Some("QUIT")
        );
        assert!(
            next_matching(&mut events, |e| matches!(e, ChatEvent::ConnectionClosed { code: 1000, .. }))
                .await
                .is_some()
        );
        assert!(matches!(handle.state().await, Err(ChatError::ActorGone)));
    }

    #[test]
    fn test_chat_message_requires_channel() {
        let msg = IrcMessage::parse(":a!a@a PRIVMSG").unwrap();
        assert!(chat_message(&msg).is_none());
    }
}
