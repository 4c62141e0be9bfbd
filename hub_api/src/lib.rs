use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Well-known event type tags produced by the quiz services.
pub mod kinds {
    /// Snapshot of the global leaderboard.
    pub const LEADERBOARD_UPDATE: &str = "LEADERBOARD_UPDATE";
    /// A single score recorded for a quiz.
    pub const SCORE_SUBMITTED: &str = "SCORE_SUBMITTED";
    /// A quiz was published.
    pub const NEW_QUIZ: &str = "NEW_QUIZ";
}

/// Delivery scope of an event or a connection.
///
/// The empty topic is the global topic: an event carrying it goes to every
/// connection, and a connection holding it only receives global events.
///
/// Identifiers are trimmed on every way in, deserialization included, so a
/// blank or `null` id is always the global topic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "String")]
pub struct Topic(String);

impl Topic {
    pub fn global() -> Self {
        Self(String::new())
    }

    /// Build a topic from an optional identifier; blank identifiers map to
    /// the global topic.
    pub fn from_opt(id: Option<&str>) -> Self {
        match id.map(str::trim) {
            Some(id) if !id.is_empty() => Self(id.to_string()),
            _ => Self::global(),
        }
    }

    pub fn is_global(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Topic {
    fn from(id: &str) -> Self {
        Self::from_opt(Some(id))
    }
}

impl From<String> for Topic {
    fn from(id: String) -> Self {
        Self::from_opt(Some(&id))
    }
}

impl From<Option<String>> for Topic {
    fn from(id: Option<String>) -> Self {
        Self::from_opt(id.as_deref())
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_global() {
            f.write_str("*")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// Event pushed to connected clients.
///
/// `data` is opaque to the hub. The topic travels as `quiz_id` on the wire
/// and is omitted for global events.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(rename = "quiz_id", default, skip_serializing_if = "Topic::is_global")]
    pub topic: Topic,
}

impl Event {
    pub fn new(kind: impl Into<String>, data: Value, topic: Topic) -> Self {
        Self {
            kind: kind.into(),
            data,
            topic,
        }
    }

    /// Event addressed to every connection.
    pub fn global(kind: impl Into<String>, data: Value) -> Self {
        Self::new(kind, data, Topic::global())
    }
}
