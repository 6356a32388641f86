use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Mode prefixes a NAMES reply may put in front of a nick
const NICK_MODE_PREFIXES: &[char] = &['~', '&', '@', '%', '+'];

/// Local view of one channel
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct IrcChannel {
    pub name: String,
    /// This client's own membership
    pub joined: bool,
    pub members: BTreeSet<String>,
    /// ROOMSTATE modes, lower-case keys
    pub modes: BTreeMap<String, String>,
}

impl IrcChannel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn add_member(&mut self, nick: &str) -> bool {
        self.members.insert(nick.to_ascii_lowercase())
    }

    pub fn remove_member(&mut self, nick: &str) -> bool {
        self.members.remove(&nick.to_ascii_lowercase())
    }

    /// Merge a space-separated NAMES list, dropping mode prefixes
    pub fn merge_names(&mut self, names: &str) -> Vec<String> {
        let mut added = Vec::new();
        for name in names.split(' ').filter(|n| !n.is_empty()) {
            let nick = name.trim_start_matches(NICK_MODE_PREFIXES);
            if nick.is_empty() {
                continue;
            }
            self.add_member(nick);
            added.push(nick.to_string());
        }
        added
    }
}

/// Ensure a leading `#`
pub fn normalize_channel(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.starts_with('#') {
        trimmed.to_string()
    } else {
        format!("#{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_channel("foo"), "#foo");
        assert_eq!(normalize_channel("#foo"), "#foo");
        assert_eq!(normalize_channel(" bar "), "#bar");
    }

    #[test]
    fn test_merge_names_strips_prefixes() {
        let mut channel = IrcChannel::new("#c");
        let added = channel.merge_names("@Mod +voiced plain  ");
        assert_eq!(added, vec!["Mod", "voiced", "plain"]);
        assert!(channel.members.contains("mod"));
        assert!(channel.remove_member("PLAIN"));
        assert_eq!(channel.members.len(), 2);
    }
}
