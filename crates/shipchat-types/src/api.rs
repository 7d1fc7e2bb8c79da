use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Department, MessageKind, Profile, StoredMessage};

// -- JWT Claims --

/// Session token claims, shared by the REST middleware and the gateway.
/// The token replaces the browser's user-id cookie, so it expires after the
/// same seven days.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub name: String,
    pub exp: usize,
}

// -- Profiles --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SaveProfileRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    pub department: Department,
    #[serde(default)]
    pub ship_id: Option<String>,
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lng: f64,
}

impl SaveProfileRequest {
    pub fn into_profile(self) -> Profile {
        Profile {
            id: self.id.unwrap_or_default(),
            name: self.name,
            avatar: self.avatar,
            department: self.department,
            ship_id: self.ship_id,
            lat: self.lat,
            lng: self.lng,
            updated_at: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SaveProfileResponse {
    pub profile: Profile,
    pub token: String,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: String,
    pub channel_id: String,
    pub text: String,
    pub sender_id: String,
    pub sender_name: String,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
    pub is_own: bool,
}

impl MessageResponse {
    pub fn from_stored(msg: StoredMessage, viewer_id: &str) -> Self {
        let is_own = msg.sender_id == viewer_id;
        Self {
            id: msg.id,
            channel_id: msg.channel_id,
            text: msg.text,
            sender_id: msg.sender_id,
            sender_name: msg.sender_name,
            timestamp: msg.timestamp,
            kind: msg.kind,
            is_own,
        }
    }
}

// -- Moderation --

#[derive(Debug, Serialize, Deserialize)]
pub struct ReportResponse {
    /// Distinct reporters recorded against the user after this call.
    pub reports: usize,
    pub removed: bool,
}
