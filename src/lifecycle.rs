//! Room creation rules, pinned topic rooms and expiry cleanup.
//!
//! Every room that comes out of the store on its way to a client is loaded
//! into the hub first, so joins and broadcasts find it in memory. Expired
//! rooms are deleted from the store only; the hub keeps its copy until
//! restart.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use uuid::Uuid;

use crate::error::{RoomError, StoreError};
use crate::filter::ProfanityFilter;
use crate::hub::HubHandle;
use crate::store::{NewRoom, RoomStore, StoredRoom, Topic};

pub const PINNED_SLOTS: [&str; 2] = ["Discord Discussion", "Tech Talk"];
const MAX_NAME_CHARS: usize = 64;

#[async_trait]
pub trait TopicSource: Send + Sync {
    async fn fetch_topics(&self) -> Result<Vec<Topic>, StoreError>;
}

/// Fixed topics for pinned rooms.
pub struct StaticTopics {
    topics: Vec<Topic>,
}

impl StaticTopics {
    pub fn new(topics: Vec<Topic>) -> Self {
        StaticTopics { topics }
    }
}

impl Default for StaticTopics {
    fn default() -> Self {
        StaticTopics::new(vec![
            Topic {
                title: "What are you building this week?".to_string(),
                description: "Share a project, a screenshot or a blocker.".to_string(),
                url: "https://discord.com".to_string(),
                source: "discord".to_string(),
            },
            Topic {
                title: "Fearless concurrency in practice".to_string(),
                description: "Channels, actors and where locks still make sense.".to_string(),
                url: "https://doc.rust-lang.org/book/ch16-00-concurrency.html".to_string(),
                source: "tech".to_string(),
            },
        ])
    }
}

#[async_trait]
impl TopicSource for StaticTopics {
    async fn fetch_topics(&self) -> Result<Vec<Topic>, StoreError> {
        Ok(self.topics.clone())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    pub expired: usize,
    pub pinned_created: usize,
}

pub struct RoomLifecycle {
    rooms: Arc<dyn RoomStore>,
    topics: Arc<dyn TopicSource>,
    hub: HubHandle,
    filter: ProfanityFilter,
    max_rooms: usize,
    room_ttl: chrono::Duration,
}

impl RoomLifecycle {
    pub fn new(
        rooms: Arc<dyn RoomStore>,
        topics: Arc<dyn TopicSource>,
        hub: HubHandle,
        filter: ProfanityFilter,
        max_rooms: usize,
        room_ttl: Duration,
    ) -> Self {
        RoomLifecycle {
            rooms,
            topics,
            hub,
            filter,
            max_rooms,
            room_ttl: chrono::Duration::from_std(room_ttl)
                .unwrap_or_else(|_| chrono::Duration::days(365)),
        }
    }

    pub async fn create_room(
        &self,
        name: &str,
        creator: Option<Uuid>,
    ) -> Result<StoredRoom, RoomError> {
        let name = validate_name(name)?;
        if self.filter.is_inappropriate(&name) {
            return Err(RoomError::InappropriateName);
        }

        let room = self
            .rooms
            .create_room(NewRoom {
                name,
                creator_id: creator,
                max_active: Some(self.max_rooms),
                expires_at: Utc::now() + self.room_ttl,
                pinned_topic: None,
            })
            .await
            .map_err(|e| match e {
                StoreError::LimitReached(limit) => RoomError::LimitReached(limit),
                other => RoomError::Store(other),
            })?;
        self.hub.load_room(room.info()).await?;

        info!("Room {} created with id {}", room.name, room.id);
        Ok(room)
    }

    /// Active rooms, pinned first. Each is loaded into the hub.
    pub async fn active_rooms(&self) -> Result<Vec<StoredRoom>, RoomError> {
        let rooms = self.rooms.list_active_rooms().await?;
        for room in &rooms {
            self.hub.load_room(room.info()).await?;
        }
        Ok(rooms)
    }

    /// Confirms the room exists durably and is loaded before a client joins.
    pub async fn resolve_room(&self, room_id: &str) -> Result<StoredRoom, RoomError> {
        let room = self.rooms.get_room(room_id).await?;
        self.hub.load_room(room.info()).await?;
        Ok(room)
    }

    /// Creates a pinned room for every slot that has no active one.
    pub async fn check_and_refresh_pinned(&self) -> Result<usize, RoomError> {
        if self.rooms.count_pinned_rooms().await? >= PINNED_SLOTS.len() {
            return Ok(0);
        }

        let existing: Vec<String> = self
            .rooms
            .list_active_rooms()
            .await?
            .into_iter()
            .filter(|room| room.is_pinned)
            .map(|room| room.name)
            .collect();
        let topics = self.topics.fetch_topics().await?;
        let expires_at = next_midnight_utc(Utc::now());

        let mut created = 0;
        for (slot, topic) in PINNED_SLOTS.iter().zip(topics) {
            if existing.iter().any(|name| name.as_str() == *slot) {
                continue;
            }
            let title = topic.title.clone();
            let room = match self
                .rooms
                .create_room(NewRoom {
                    name: (*slot).to_string(),
                    creator_id: None,
                    max_active: None,
                    expires_at,
                    pinned_topic: Some(topic),
                })
                .await
            {
                Ok(room) => room,
                Err(e) => {
                    error!("Failed to create pinned room {}: {}", slot, e);
                    continue;
                }
            };
            self.hub.load_room(room.info()).await?;
            info!("Created pinned room {} with topic {}", room.name, title);
            created += 1;
        }
        Ok(created)
    }

    pub async fn cleanup(&self) -> Result<CleanupSummary, RoomError> {
        let expired = self.rooms.delete_expired_rooms().await?;
        if expired > 0 {
            info!("Deleted {} expired rooms", expired);
        }
        let pinned_created = self.check_and_refresh_pinned().await?;
        Ok(CleanupSummary {
            expired,
            pinned_created,
        })
    }

    /// Runs [`cleanup`](Self::cleanup) now and then on every tick, forever.
    pub async fn run_cleanup_job(self: Arc<Self>, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            if let Err(e) = self.cleanup().await {
                warn!("Room cleanup failed: {}", e);
            }
        }
    }
}

fn validate_name(name: &str) -> Result<String, RoomError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RoomError::InvalidName("name is empty".to_string()));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(RoomError::InvalidName(format!(
            "name is longer than {MAX_NAME_CHARS} characters"
        )));
    }
    Ok(name.to_string())
}

pub fn next_midnight_utc(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .succ_opt()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .map_or(DateTime::<Utc>::MAX_UTC, |midnight| midnight.and_utc())
}
