//! IRC line codec with provider tags
//!
//! ```text
//! [@tags ][:prefix ]COMMAND[ param...][ :trailing param]
//! ```

use serde::Serialize;

use super::tags::{self, TagValue, Tags};
use crate::errors::{ChatError, ChatResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IrcMessage {
    pub raw: String,
    pub tags: Tags,
    pub prefix: Option<String>,
    /// Upper-cased
    pub command: String,
    pub params: Vec<String>,
}

impl IrcMessage {
    pub fn parse(line: &str) -> ChatResult<Self> {
        let raw = line.trim_end_matches(['\r', '\n']);
        let mut rest = raw.trim_start_matches(' ');
        if rest.is_empty() {
            return Err(ChatError::Parse("empty line".to_string()));
        }

        let mut tags = Tags::new();
        if let Some(stripped) = rest.strip_prefix('@') {
            let (block, remainder) = stripped
                .split_once(' ')
                .ok_or_else(|| ChatError::Parse(format!("tags without command: {}", raw)))?;
            tags = tags::parse_tags(block);
            rest = remainder.trim_start_matches(' ');
        }

        let mut prefix = None;
        if let Some(stripped) = rest.strip_prefix(':') {
            let (p, remainder) = stripped
                .split_once(' ')
                .ok_or_else(|| ChatError::Parse(format!("prefix without command: {}", raw)))?;
            prefix = Some(p.to_string());
            rest = remainder.trim_start_matches(' ');
        }

        let (command, mut rest) = match rest.split_once(' ') {
            Some((command, remainder)) => (command, remainder),
            None => (rest, ""),
        };
        if command.is_empty() {
            return Err(ChatError::Parse(format!("missing command: {}", raw)));
        }

        let mut params = Vec::new();
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((param, remainder)) => {
                    params.push(param.to_string());
                    rest = remainder;
                }
                None => {
                    params.push(rest.to_string());
                    break;
                }
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            tags,
            prefix,
            command: command.to_ascii_uppercase(),
            params,
        })
    }

    /// Nick part of a `nick!user@host` prefix
    pub fn nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        let nick = prefix.split(['!', '@']).next().unwrap_or(prefix);
        if nick.is_empty() {
            None
        } else {
            Some(nick)
        }
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }

    /// Text value of a tag; bare flags and empty values yield `None`
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .get(key)
            .and_then(TagValue::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn has_tag(&self, key: &str) -> bool {
        self.tags.contains_key(key)
    }

    pub fn kind(&self) -> IrcCommand {
        IrcCommand::from_command(&self.command)
    }

    /// Re-render the message, tags and prefix included
    pub fn to_line(&self) -> String {
        let mut line = String::new();
        if !self.tags.is_empty() {
            line.push('@');
            line.push_str(&tags::format_tags(&self.tags));
            line.push(' ');
        }
        if let Some(prefix) = &self.prefix {
            line.push(':');
            line.push_str(prefix);
            line.push(' ');
        }
        let params: Vec<&str> = self.params.iter().map(String::as_str).collect();
        line.push_str(&format(&self.command, &params));
        line
    }
}

/// Render `command` and its parameters as one line (no CRLF)
///
/// The last parameter is sent as trailing when it contains a space, starts
/// with `:` or is empty.
pub fn format(command: &str, params: &[&str]) -> String {
    let mut line = command.to_string();
    if let Some((last, middle)) = params.split_last() {
        for param in middle {
            line.push(' ');
            line.push_str(param);
        }
        line.push(' ');
        if last.is_empty() || last.contains(' ') || last.starts_with(':') {
            line.push(':');
        }
        line.push_str(last);
    }
    line
}

/// Commands the session dispatches on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrcCommand {
    Ping,
    Pong,
    Privmsg,
    Join,
    Part,
    Notice,
    UserNotice,
    RoomState,
    UserState,
    ClearChat,
    ClearMsg,
    /// 001
    Welcome,
    /// 353
    NamesReply,
    /// 366
    EndOfNames,
    Unknown(String),
}

impl IrcCommand {
    pub fn from_command(command: &str) -> Self {
        match command {
            "PING" => IrcCommand::Ping,
            "PONG" => IrcCommand::Pong,
            "PRIVMSG" => IrcCommand::Privmsg,
            "JOIN" => IrcCommand::Join,
            "PART" => IrcCommand::Part,
            "NOTICE" => IrcCommand::Notice,
            "USERNOTICE" => IrcCommand::UserNotice,
            "ROOMSTATE" => IrcCommand::RoomState,
            "USERSTATE" => IrcCommand::UserState,
            "CLEARCHAT" => IrcCommand::ClearChat,
            "CLEARMSG" => IrcCommand::ClearMsg,
            "001" => IrcCommand::Welcome,
            "353" => IrcCommand::NamesReply,
            "366" => IrcCommand::EndOfNames,
            other => IrcCommand::Unknown(other.to_string()),
        }
    }
}
