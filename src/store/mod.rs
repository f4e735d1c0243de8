//! Durable collaborators of the hub: rooms, the message log and user stats.
//!
//! The hub and the side-effect pipeline only see these traits. The bundled
//! implementations in [`memory`] keep everything in process.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::messages::{ChatMessage, RoomResponse};
use crate::room::RoomInfo;

pub use memory::{MemoryMessageStore, MemoryRoomStore, MemoryStatsStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub title: String,
    pub description: String,
    pub url: String,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct NewRoom {
    pub name: String,
    pub creator_id: Option<Uuid>,
    /// Refuse creation once this many rooms are active.
    pub max_active: Option<usize>,
    pub expires_at: DateTime<Utc>,
    pub pinned_topic: Option<Topic>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRoom {
    pub id: String,
    pub name: String,
    pub creator_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_pinned: bool,
    pub topic: Option<Topic>,
    pub topic_updated_at: Option<DateTime<Utc>>,
}

impl StoredRoom {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    pub fn info(&self) -> RoomInfo {
        let topic = self.topic.clone();
        RoomInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            is_pinned: self.is_pinned,
            topic_title: topic.as_ref().map(|t| t.title.clone()),
            topic_description: topic.as_ref().map(|t| t.description.clone()),
            topic_url: topic.as_ref().map(|t| t.url.clone()),
            topic_source: topic.map(|t| t.source),
        }
    }

    pub fn to_response(&self) -> RoomResponse {
        let info = self.info();
        RoomResponse {
            id: info.id,
            name: info.name,
            is_pinned: info.is_pinned,
            created_at: self.created_at,
            expires_at: self.expires_at,
            topic_title: info.topic_title,
            topic_description: info.topic_description,
            topic_url: info.topic_url,
            topic_source: info.topic_source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub room_id: String,
    pub user_id: Option<Uuid>,
    pub username: String,
    pub content: String,
    pub is_system: bool,
}

impl From<&ChatMessage> for NewMessage {
    fn from(message: &ChatMessage) -> Self {
        NewMessage {
            room_id: message.room_id.clone(),
            user_id: message.user_id,
            username: message.username.clone(),
            content: message.content.clone(),
            is_system: message.system,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: Uuid,
    pub room_id: String,
    pub user_id: Option<Uuid>,
    pub username: String,
    pub content: String,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn into_chat(self) -> ChatMessage {
        ChatMessage {
            content: self.content,
            room_id: self.room_id,
            username: self.username,
            user_id: self.user_id,
            system: self.is_system,
            timestamp: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Achievement {
    pub key: String,
    pub name: String,
    pub description: String,
    pub threshold: u64,
}

#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Fails with [`StoreError::DuplicateOwner`] when the creator already owns
    /// an active room, and with [`StoreError::LimitReached`] when
    /// `max_active` rooms are already active. Both checks and the insert are
    /// one atomic step.
    async fn create_room(&self, room: NewRoom) -> Result<StoredRoom, StoreError>;
    /// Active rooms only; expired rooms are reported as not found.
    async fn get_room(&self, id: &str) -> Result<StoredRoom, StoreError>;
    /// Pinned rooms first, then newest first.
    async fn list_active_rooms(&self) -> Result<Vec<StoredRoom>, StoreError>;
    async fn count_active_rooms(&self) -> Result<usize, StoreError>;
    async fn count_pinned_rooms(&self) -> Result<usize, StoreError>;
    async fn delete_expired_rooms(&self) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append_message(&self, message: NewMessage) -> Result<StoredMessage, StoreError>;
    /// The newest `limit` messages of a room, oldest first.
    async fn recent_messages(
        &self,
        room_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError>;
}

#[async_trait]
pub trait StatsStore: Send + Sync {
    async fn increment_message_count(&self, user_id: Uuid) -> Result<(), StoreError>;
    /// Awards every achievement whose threshold the user now meets and has not
    /// earned yet. Returns only the newly awarded ones.
    async fn check_and_award_achievements(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Achievement>, StoreError>;
}
