use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const ANONYMOUS_NAME: &str = "anonymous";

/// A chat message as it travels through the hub and out onto the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub content: String,
    pub room_id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub system: bool,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn from_sender(sender: &Identity, room_id: &str, content: String) -> Self {
        ChatMessage {
            content,
            room_id: room_id.to_string(),
            username: sender.username.clone(),
            user_id: sender.user_id,
            system: false,
            timestamp: Utc::now(),
        }
    }
}

/// Who is on the other end of a connection.
///
/// `client_id` keys room membership. `user_id` is only set when the client id
/// is a user UUID handed down by the upstream auth layer; anonymous ids never
/// reach the stats store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub client_id: String,
    pub user_id: Option<Uuid>,
    pub username: String,
}

impl Identity {
    pub fn new(client_id: Option<String>, username: Option<String>) -> Self {
        let client_id = client_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("anon-{}", Uuid::new_v4()));
        let username = username
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| ANONYMOUS_NAME.to_string());
        let user_id = Uuid::parse_str(&client_id).ok();

        Identity {
            client_id,
            user_id,
            username,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }
}

/// One entry on a client's private outbound queue.
///
/// History replay is queued as a single batch so a long backlog occupies one
/// slot and cannot push the client over its queue capacity.
#[derive(Debug, Clone)]
pub enum Outbound {
    Message(Arc<ChatMessage>),
    History(Vec<ChatMessage>),
}

impl Outbound {
    /// JSON text frames in delivery order.
    pub fn encode(&self) -> Result<Vec<String>, serde_json::Error> {
        match self {
            Outbound::Message(message) => Ok(vec![serde_json::to_string(message.as_ref())?]),
            Outbound::History(batch) => batch.iter().map(serde_json::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRoomResponse {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomResponse {
    pub id: String,
    pub name: String,
    pub is_pinned: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSummary {
    pub id: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
