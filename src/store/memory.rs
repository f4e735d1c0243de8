use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    Achievement, MessageStore, NewMessage, NewRoom, RoomStore, StatsStore, StoredMessage,
    StoredRoom,
};
use crate::error::StoreError;

pub struct MemoryRoomStore {
    rooms: RwLock<HashMap<String, StoredRoom>>,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        MemoryRoomStore {
            rooms: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryRoomStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn create_room(&self, room: NewRoom) -> Result<StoredRoom, StoreError> {
        let now = Utc::now();
        let mut rooms = self.rooms.write().await;

        if let Some(limit) = room.max_active {
            if rooms.values().filter(|existing| existing.is_active(now)).count() >= limit {
                return Err(StoreError::LimitReached(limit));
            }
        }
        if let Some(creator) = room.creator_id {
            let owns_active = rooms
                .values()
                .any(|existing| existing.creator_id == Some(creator) && existing.is_active(now));
            if owns_active {
                return Err(StoreError::DuplicateOwner(creator));
            }
        }

        let stored = StoredRoom {
            id: Uuid::new_v4().to_string(),
            name: room.name,
            creator_id: room.creator_id,
            created_at: now,
            expires_at: room.expires_at,
            is_pinned: room.pinned_topic.is_some(),
            topic_updated_at: room.pinned_topic.as_ref().map(|_| now),
            topic: room.pinned_topic,
        };
        rooms.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn get_room(&self, id: &str) -> Result<StoredRoom, StoreError> {
        let rooms = self.rooms.read().await;
        rooms
            .get(id)
            .filter(|room| room.is_active(Utc::now()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("room {id}")))
    }

    async fn list_active_rooms(&self) -> Result<Vec<StoredRoom>, StoreError> {
        let now = Utc::now();
        let rooms = self.rooms.read().await;
        let mut active: Vec<StoredRoom> = rooms
            .values()
            .filter(|room| room.is_active(now))
            .cloned()
            .collect();
        active.sort_by(|a, b| {
            b.is_pinned
                .cmp(&a.is_pinned)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(active)
    }

    async fn count_active_rooms(&self) -> Result<usize, StoreError> {
        let now = Utc::now();
        let rooms = self.rooms.read().await;
        Ok(rooms.values().filter(|room| room.is_active(now)).count())
    }

    async fn count_pinned_rooms(&self) -> Result<usize, StoreError> {
        let now = Utc::now();
        let rooms = self.rooms.read().await;
        Ok(rooms
            .values()
            .filter(|room| room.is_pinned && room.is_active(now))
            .count())
    }

    async fn delete_expired_rooms(&self) -> Result<usize, StoreError> {
        let now = Utc::now();
        let mut rooms = self.rooms.write().await;
        let before = rooms.len();
        rooms.retain(|_, room| room.is_active(now));
        Ok(before - rooms.len())
    }
}

pub struct MemoryMessageStore {
    messages: RwLock<HashMap<String, Vec<StoredMessage>>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        MemoryMessageStore {
            messages: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn append_message(&self, message: NewMessage) -> Result<StoredMessage, StoreError> {
        let stored = StoredMessage {
            id: Uuid::new_v4(),
            room_id: message.room_id,
            user_id: message.user_id,
            username: message.username,
            content: message.content,
            is_system: message.is_system,
            created_at: Utc::now(),
        };

        let mut messages = self.messages.write().await;
        messages
            .entry(stored.room_id.clone())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn recent_messages(
        &self,
        room_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let messages = self.messages.read().await;
        let Some(log) = messages.get(room_id) else {
            return Ok(Vec::new());
        };
        let skip = log.len().saturating_sub(limit);
        Ok(log[skip..].to_vec())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserStats {
    pub total_messages: u64,
    pub achievements: BTreeSet<String>,
}

pub struct MemoryStatsStore {
    stats: RwLock<HashMap<Uuid, UserStats>>,
    catalog: Vec<Achievement>,
}

impl MemoryStatsStore {
    pub fn new() -> Self {
        Self::with_catalog(default_achievements())
    }

    pub fn with_catalog(catalog: Vec<Achievement>) -> Self {
        MemoryStatsStore {
            stats: RwLock::new(HashMap::new()),
            catalog,
        }
    }

    pub async fn user_stats(&self, user_id: Uuid) -> UserStats {
        self.stats
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for MemoryStatsStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatsStore for MemoryStatsStore {
    async fn increment_message_count(&self, user_id: Uuid) -> Result<(), StoreError> {
        let mut stats = self.stats.write().await;
        stats.entry(user_id).or_default().total_messages += 1;
        Ok(())
    }

    async fn check_and_award_achievements(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Achievement>, StoreError> {
        let mut stats = self.stats.write().await;
        let user = stats.entry(user_id).or_default();

        let mut awarded = Vec::new();
        for achievement in &self.catalog {
            if user.total_messages >= achievement.threshold
                && user.achievements.insert(achievement.key.clone())
            {
                awarded.push(achievement.clone());
            }
        }
        Ok(awarded)
    }
}

fn default_achievements() -> Vec<Achievement> {
    [
        ("first_message", "First Words", "Sent your first message", 1),
        ("chatterbox", "Chatterbox", "Sent 100 messages", 100),
        ("orator", "Orator", "Sent 1000 messages", 1000),
    ]
    .into_iter()
    .map(|(key, name, description, threshold)| Achievement {
        key: key.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        threshold,
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::store::Topic;

    fn new_room(name: &str, creator: Option<Uuid>, ttl: Duration) -> NewRoom {
        NewRoom {
            name: name.to_string(),
            creator_id: creator,
            max_active: None,
            expires_at: Utc::now() + ttl,
            pinned_topic: None,
        }
    }

    #[tokio::test]
    async fn one_active_room_per_creator() {
        let store = MemoryRoomStore::new();
        let creator = Uuid::new_v4();

        store
            .create_room(new_room("mine", Some(creator), Duration::hours(1)))
            .await
            .unwrap();
        let second = store
            .create_room(new_room("again", Some(creator), Duration::hours(1)))
            .await;
        assert_eq!(second, Err(StoreError::DuplicateOwner(creator)));

        store
            .create_room(new_room("anon", None, Duration::hours(1)))
            .await
            .unwrap();
        store
            .create_room(new_room("anon too", None, Duration::hours(1)))
            .await
            .unwrap();
        assert_eq!(store.count_active_rooms().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn expired_rooms_are_hidden_then_deleted() {
        let store = MemoryRoomStore::new();
        let expired = store
            .create_room(new_room("old", None, Duration::seconds(-5)))
            .await
            .unwrap();
        let live = store
            .create_room(new_room("new", None, Duration::hours(1)))
            .await
            .unwrap();

        assert!(matches!(
            store.get_room(&expired.id).await,
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(store.get_room(&live.id).await.unwrap().name, "new");
        assert_eq!(store.count_active_rooms().await.unwrap(), 1);
        assert_eq!(store.delete_expired_rooms().await.unwrap(), 1);
        assert_eq!(store.delete_expired_rooms().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn pinned_rooms_list_first() {
        let store = MemoryRoomStore::new();
        store
            .create_room(new_room("plain", None, Duration::hours(1)))
            .await
            .unwrap();
        let mut pinned = new_room("Tech Talk", None, Duration::hours(1));
        pinned.pinned_topic = Some(Topic {
            title: "Rust".to_string(),
            description: "Ownership".to_string(),
            url: "https://example.org".to_string(),
            source: "static".to_string(),
        });
        store.create_room(pinned).await.unwrap();

        let rooms = store.list_active_rooms().await.unwrap();
        assert_eq!(rooms[0].name, "Tech Talk");
        assert!(rooms[0].is_pinned);
        assert!(rooms[0].topic_updated_at.is_some());
        assert_eq!(store.count_pinned_rooms().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn recent_messages_are_oldest_first_and_limited() {
        let store = MemoryMessageStore::new();
        for content in ["a", "b", "c"] {
            store
                .append_message(NewMessage {
                    room_id: "r1".to_string(),
                    user_id: None,
                    username: "bob".to_string(),
                    content: content.to_string(),
                    is_system: false,
                })
                .await
                .unwrap();
        }

        let recent = store.recent_messages("r1", 2).await.unwrap();
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["b", "c"]);
        assert!(store.recent_messages("other", 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn achievements_are_awarded_once() {
        let store = MemoryStatsStore::new();
        let user = Uuid::new_v4();

        assert!(store.check_and_award_achievements(user).await.unwrap().is_empty());

        store.increment_message_count(user).await.unwrap();
        let awarded = store.check_and_award_achievements(user).await.unwrap();
        assert_eq!(awarded.len(), 1);
        assert_eq!(awarded[0].key, "first_message");

        store.increment_message_count(user).await.unwrap();
        assert!(store.check_and_award_achievements(user).await.unwrap().is_empty());

        let stats = store.user_stats(user).await;
        assert_eq!(stats.total_messages, 2);
        assert!(stats.achievements.contains("first_message"));
    }
}
