//! Provider metadata tags
//!
//! Tag values arrive IRCv3-escaped; badges and emotes are packed lists that
//! are decoded into structured values here.

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// A tag value; a key with no `=value` is a bare flag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagValue {
    Flag,
    Text(String),
}

impl TagValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TagValue::Flag => None,
            TagValue::Text(s) => Some(s),
        }
    }
}

impl Serialize for TagValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TagValue::Flag => serializer.serialize_bool(true),
            TagValue::Text(s) => serializer.serialize_str(s),
        }
    }
}

pub type Tags = BTreeMap<String, TagValue>;

/// Parse the body of an `@...` block (without the `@`)
pub fn parse_tags(block: &str) -> Tags {
    block
        .split(';')
        .filter(|item| !item.is_empty())
        .map(|item| match item.split_once('=') {
            Some((key, value)) => (key.to_string(), TagValue::Text(unescape_value(value))),
            None => (item.to_string(), TagValue::Flag),
        })
        .collect()
}

/// Render tags as an `@...` block body
pub fn format_tags(tags: &Tags) -> String {
    tags.iter()
        .map(|(key, value)| match value {
            TagValue::Flag => key.clone(),
            TagValue::Text(v) => format!("{}={}", key, escape_value(v)),
        })
        .collect::<Vec<_>>()
        .join(";")
}

pub fn unescape_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            // Trailing lone backslash is dropped
            None => {}
        }
    }
    out
}

pub fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ';' => out.push_str("\\:"),
            ' ' => out.push_str("\\s"),
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Badge {
    pub name: String,
    pub version: Option<String>,
}

/// Decode `name[/version],...`
pub fn parse_badges(raw: &str) -> Vec<Badge> {
    raw.split(',')
        .filter(|b| !b.is_empty())
        .map(|b| match b.split_once('/') {
            Some((name, version)) => Badge {
                name: name.to_string(),
                version: Some(version.to_string()),
            },
            None => Badge {
                name: b.to_string(),
                version: None,
            },
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EmoteRange {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Emote {
    pub id: String,
    pub ranges: Vec<EmoteRange>,
}

/// Decode `id:start-end[,start-end]/...`; malformed entries are skipped
pub fn parse_emotes(raw: &str) -> Vec<Emote> {
    raw.split('/')
        .filter_map(|entry| {
            let (id, spans) = entry.split_once(':')?;
            let ranges: Vec<EmoteRange> = spans
                .split(',')
                .filter_map(|span| {
                    let (start, end) = span.split_once('-')?;
                    Some(EmoteRange {
                        start: start.parse().ok()?,
                        end: end.parse().ok()?,
                    })
                })
                .collect();
            if id.is_empty() || ranges.is_empty() {
                None
            } else {
                Some(Emote {
                    id: id.to_string(),
                    ranges,
                })
            }
        })
        .collect()
}
