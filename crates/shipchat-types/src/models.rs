use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Crew department a profile belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Department {
    #[default]
    Hotel,
    Deck,
    Engine,
}

impl Department {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hotel => "Hotel",
            Self::Deck => "Deck",
            Self::Engine => "Engine",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Hotel" => Some(Self::Hotel),
            "Deck" => Some(Self::Deck),
            "Engine" => Some(Self::Engine),
            _ => None,
        }
    }
}

impl fmt::Display for Department {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A crew member's profile as persisted in the `profiles` collection.
///
/// `updated_at` doubles as the last heartbeat. Online status is never stored;
/// see [`CrewMember`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Profile {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub department: Department,
    #[serde(default)]
    pub ship_id: Option<String>,
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lng: f64,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            "Unknown"
        } else {
            &self.name
        }
    }

    pub fn avatar_url(&self) -> String {
        match &self.avatar {
            Some(url) if !url.is_empty() => url.clone(),
            _ => format!("https://i.pravatar.cc/150?u={}", self.id),
        }
    }

    /// The profile as clients should render it: blank name and missing
    /// avatar replaced by their defaults.
    pub fn with_fallbacks(mut self) -> Self {
        self.name = self.display_name().to_string();
        self.avatar = Some(self.avatar_url());
        self
    }
}

/// Roster entry: a profile plus its derived online flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrewMember {
    #[serde(flatten)]
    pub profile: Profile,
    pub online: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            _ => None,
        }
    }
}

/// Denormalized copy of the newest message, kept on the channel document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSnapshot {
    pub text: String,
    pub sender_id: String,
    pub sender_name: String,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
}

/// A direct-message conversation between exactly two crew members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub participants: Vec<String>,
    pub last_message: Option<MessageSnapshot>,
    pub updated_at: DateTime<Utc>,
}

/// A message as it exists in durable storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub channel_id: String,
    pub text: String,
    pub sender_id: String,
    pub sender_name: String,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
}

impl StoredMessage {
    pub fn snapshot(&self) -> MessageSnapshot {
        MessageSnapshot {
            text: self.text.clone(),
            sender_id: self.sender_id.clone(),
            sender_name: self.sender_name.clone(),
            timestamp: self.timestamp,
            kind: self.kind,
        }
    }
}
