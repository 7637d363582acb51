use std::fmt;

use serde::{Deserialize, Serialize};

/// How an exchange routes messages to the consumers bound to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    /// Delivers when the binding key equals the routing key.
    Direct,
    /// Delivers when the binding pattern matches the routing key.
    Topic,
    /// Delivers to every binding, keys are ignored.
    Fanout,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Fanout => "fanout",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a publish/subscribe destination.
///
/// Publishers use the routing key as the message's key; subscribers use it as
/// their binding key (a pattern for [`ExchangeKind::Topic`]). The descriptor
/// is immutable and compared by value, which is what lets the messenger rebind
/// a subscription after reconnecting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicDescriptor {
    kind: ExchangeKind,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    routing_key: Option<String>,
}

impl TopicDescriptor {
    pub fn new(kind: ExchangeKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            routing_key: None,
        }
    }

    pub fn direct(name: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self::new(ExchangeKind::Direct, name).with_routing_key(routing_key)
    }

    pub fn topic(name: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self::new(ExchangeKind::Topic, name).with_routing_key(routing_key)
    }

    pub fn fanout(name: impl Into<String>) -> Self {
        Self::new(ExchangeKind::Fanout, name)
    }

    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    pub fn kind(&self) -> ExchangeKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn routing_key(&self) -> Option<&str> {
        self.routing_key.as_deref()
    }

    /// Routing key with an absent key read as the empty key.
    pub fn routing_key_or_empty(&self) -> &str {
        self.routing_key().unwrap_or("")
    }

    /// Whether a message published with `routing_key` on this exchange reaches
    /// a consumer bound with this descriptor.
    pub fn accepts(&self, routing_key: &str) -> bool {
        match self.kind {
            ExchangeKind::Fanout => true,
            ExchangeKind::Direct => self.routing_key_or_empty() == routing_key,
            ExchangeKind::Topic => topic_matches(self.routing_key_or_empty(), routing_key),
        }
    }
}

impl fmt::Display for TopicDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.routing_key {
            Some(key) => write!(f, "{}:{}/{}", self.kind, self.name, key),
            None => write!(f, "{}:{}", self.kind, self.name),
        }
    }
}

/// AMQP topic matching: words are separated by `.`, `*` matches exactly one
/// word and `#` matches zero or more words.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = split_words(pattern);
    let key: Vec<&str> = split_words(routing_key);
    match_words(&pattern, &key)
}

fn split_words(s: &str) -> Vec<&str> {
    if s.is_empty() {
        Vec::new()
    } else {
        s.split('.').collect()
    }
}

/// Runs in `O(pattern × key)`: `matched[j]` holds whether the pattern words
/// seen so far match the first `j` key words.
fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    let mut matched = vec![false; key.len() + 1];
    matched[0] = true;

    for &word in pattern {
        if word == "#" {
            for j in 1..matched.len() {
                matched[j] = matched[j] || matched[j - 1];
            }
        } else {
            for j in (1..matched.len()).rev() {
                matched[j] = matched[j - 1] && (word == "*" || word == key[j - 1]);
            }
            matched[0] = false;
        }
    }
    matched[key.len()]
}
