use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::messages::{ChatMessage, ClientSummary, Identity, Outbound};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: String,
    pub name: String,
    pub is_pinned: bool,
    pub topic_title: Option<String>,
    pub topic_description: Option<String>,
    pub topic_url: Option<String>,
    pub topic_source: Option<String>,
}

impl RoomInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        RoomInfo {
            id: id.into(),
            name: name.into(),
            is_pinned: false,
            topic_title: None,
            topic_description: None,
            topic_url: None,
            topic_source: None,
        }
    }
}

/// Identifies one connection of one client in one room.
///
/// `connection` distinguishes a reconnect under the same client id from the
/// connection it replaced, so a late unregister from the old socket cannot
/// remove the new one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub room_id: String,
    pub client_id: String,
    pub connection: Uuid,
}

/// Hub-side handle of a connected participant. Dropping it closes the
/// outbound queue, which stops the connection's writer.
#[derive(Debug)]
pub struct Client {
    key: ClientKey,
    username: String,
    queue: mpsc::Sender<Outbound>,
}

impl Client {
    pub fn new(
        identity: &Identity,
        room_id: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (queue, outbound) = mpsc::channel(capacity);
        let client = Client {
            key: ClientKey {
                room_id: room_id.into(),
                client_id: identity.client_id.clone(),
                connection: Uuid::new_v4(),
            },
            username: identity.username.clone(),
            queue,
        };
        (client, outbound)
    }

    pub fn key(&self) -> &ClientKey {
        &self.key
    }

    pub fn id(&self) -> &str {
        &self.key.client_id
    }

    pub fn room_id(&self) -> &str {
        &self.key.room_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Weak handle to the outbound queue; it does not keep the queue open.
    pub(crate) fn weak_queue(&self) -> mpsc::WeakSender<Outbound> {
        self.queue.downgrade()
    }

    fn offer(&self, item: Outbound) -> Result<(), TrySendError<Outbound>> {
        self.queue.try_send(item)
    }
}

/// Result of pushing one message to every member of a room.
#[derive(Debug, Default)]
pub struct FanOut {
    pub delivered: usize,
    pub evicted: Vec<Client>,
}

#[derive(Debug)]
pub struct Room {
    info: RoomInfo,
    members: HashMap<String, Client>,
    history: VecDeque<Arc<ChatMessage>>,
    history_capacity: usize,
}

impl Room {
    pub fn new(info: RoomInfo, history_capacity: usize) -> Self {
        Room {
            info,
            members: HashMap::new(),
            history: VecDeque::with_capacity(history_capacity),
            history_capacity,
        }
    }

    pub fn info(&self) -> &RoomInfo {
        &self.info
    }

    /// Replaces name and topic metadata, keeping members and history.
    pub fn refresh(&mut self, info: RoomInfo) {
        debug_assert_eq!(self.info.id, info.id);
        self.info = info;
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, key: &ClientKey) -> bool {
        self.members
            .get(&key.client_id)
            .is_some_and(|client| client.key == *key)
    }

    /// Inserts a member, returning the client previously held under the same id.
    pub fn insert(&mut self, client: Client) -> Option<Client> {
        self.members.insert(client.id().to_string(), client)
    }

    /// Removes the member only if the stored connection matches `key`.
    pub fn remove(&mut self, key: &ClientKey) -> Option<Client> {
        if self.contains(key) {
            self.members.remove(&key.client_id)
        } else {
            None
        }
    }

    pub fn record(&mut self, message: Arc<ChatMessage>) {
        if self.history_capacity == 0 {
            return;
        }
        if self.history.len() == self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(message);
    }

    /// Newest `limit` buffered messages, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<Arc<ChatMessage>> {
        let skip = self.history.len().saturating_sub(limit);
        self.history.iter().skip(skip).cloned().collect()
    }

    /// Offers `message` to every member without waiting. Members whose queue
    /// is full or closed are removed and handed back for the caller to drop.
    pub fn fan_out(&mut self, message: &Arc<ChatMessage>) -> FanOut {
        let mut result = FanOut::default();
        let mut stalled = Vec::new();

        for (id, client) in &self.members {
            match client.offer(Outbound::Message(Arc::clone(message))) {
                Ok(()) => result.delivered += 1,
                Err(TrySendError::Full(_) | TrySendError::Closed(_)) => stalled.push(id.clone()),
            }
        }

        for id in stalled {
            if let Some(client) = self.members.remove(&id) {
                result.evicted.push(client);
            }
        }

        result
    }

    pub fn summaries(&self) -> Vec<ClientSummary> {
        let mut clients: Vec<ClientSummary> = self
            .members
            .values()
            .map(|client| ClientSummary {
                id: client.id().to_string(),
                username: client.username().to_string(),
            })
            .collect();
        clients.sort_by(|a, b| a.id.cmp(&b.id));
        clients
    }
}

/// In-memory room id → room map. Owned by the hub task and never shared.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    rooms: HashMap<String, Room>,
    history_capacity: usize,
}

impl Registry {
    pub(crate) fn new(history_capacity: usize) -> Self {
        Registry {
            rooms: HashMap::new(),
            history_capacity,
        }
    }

    /// Inserts the room if absent, otherwise refreshes its metadata.
    /// Returns true when the room was newly loaded.
    pub(crate) fn load(&mut self, info: RoomInfo) -> bool {
        if let Some(room) = self.rooms.get_mut(&info.id) {
            room.refresh(info);
            false
        } else {
            let room = Room::new(info, self.history_capacity);
            self.rooms.insert(room.info.id.clone(), room);
            true
        }
    }

    pub(crate) fn get(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub(crate) fn get_mut(&mut self, room_id: &str) -> Option<&mut Room> {
        self.rooms.get_mut(room_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.rooms.len()
    }
}
