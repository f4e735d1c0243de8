//! The hub: a single task that owns the room registry.
//!
//! Register, unregister, broadcast and control events share one FIFO queue
//! and are handled one at a time in arrival order, so membership and fan-out
//! never race and every broadcast sees the membership of the instant it is
//! processed. Everything slow (history replay, persistence) is spawned off
//! the loop.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};

use crate::config::Config;
use crate::error::HubError;
use crate::messages::{ChatMessage, ClientSummary, Outbound};
use crate::pipeline::Pipeline;
use crate::room::{Client, ClientKey, Registry, RoomInfo};
use crate::store::{MessageStore, StoredMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    /// Bound of the event intake; senders wait when it is full.
    pub broadcast_capacity: usize,
    /// Durable messages replayed to a joining client.
    pub history_limit: usize,
    /// Messages kept in memory per room.
    pub history_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig {
            broadcast_capacity: 5,
            history_limit: 100,
            history_buffer: 100,
        }
    }
}

impl From<&Config> for HubConfig {
    fn from(config: &Config) -> Self {
        HubConfig {
            broadcast_capacity: config.broadcast_capacity,
            history_limit: config.history_limit,
            history_buffer: config.history_buffer,
        }
    }
}

enum HubEvent {
    Register {
        client: Client,
        reply: oneshot::Sender<Result<(), HubError>>,
    },
    Unregister {
        key: ClientKey,
        reply: oneshot::Sender<bool>,
    },
    Broadcast(ChatMessage),
    Control(Control),
}

enum Control {
    LoadRoom {
        info: RoomInfo,
        reply: oneshot::Sender<()>,
    },
    ListClients {
        room_id: String,
        reply: oneshot::Sender<Option<Vec<ClientSummary>>>,
    },
}

pub struct Hub {
    registry: Registry,
    events: mpsc::Receiver<HubEvent>,
    messages: Arc<dyn MessageStore>,
    pipeline: Pipeline,
    history_limit: usize,
}

/// Cloneable front door to a running [`Hub`]. The hub stops once every
/// handle has been dropped.
#[derive(Clone)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
}

impl Hub {
    pub fn new(
        config: HubConfig,
        messages: Arc<dyn MessageStore>,
        pipeline: Pipeline,
    ) -> (Self, HubHandle) {
        let (events_tx, events) = mpsc::channel(config.broadcast_capacity.max(1));

        let hub = Hub {
            registry: Registry::new(config.history_buffer),
            events,
            messages,
            pipeline,
            history_limit: config.history_limit,
        };
        let handle = HubHandle { events: events_tx };
        (hub, handle)
    }

    pub async fn run(mut self) {
        info!("Hub started");
        while let Some(event) = self.events.recv().await {
            match event {
                HubEvent::Register { client, reply } => {
                    let _ = reply.send(self.register(client));
                }
                HubEvent::Unregister { key, reply } => {
                    let _ = reply.send(self.unregister(&key));
                }
                HubEvent::Broadcast(message) => self.broadcast(message),
                HubEvent::Control(command) => self.handle_control(command),
            }
        }
        info!("Hub stopped, {} rooms were loaded", self.registry.len());
    }

    fn register(&mut self, client: Client) -> Result<(), HubError> {
        let room_id = client.room_id().to_string();
        let Some(room) = self.registry.get_mut(&room_id) else {
            warn!("Client {} tried to join unloaded room {}", client.id(), room_id);
            return Err(HubError::RoomNotLoaded(room_id));
        };

        let queue = client.weak_queue();
        let buffered = room.recent(self.history_limit);
        info!("{} ({}) joined room {}", client.username(), client.id(), room_id);
        if let Some(previous) = room.insert(client) {
            info!("Connection {} of {} replaced", previous.key().connection, previous.id());
        }

        self.spawn_replay(room_id, queue, buffered);
        Ok(())
    }

    /// Loads recent durable history for a joining client and queues it as one
    /// batch. Falls back to the in-memory buffer if the store fails. Only a
    /// weak handle to the queue is held while the store is read, so leaving
    /// or eviction closes the queue without waiting for the replay.
    fn spawn_replay(
        &self,
        room_id: String,
        queue: mpsc::WeakSender<Outbound>,
        buffered: Vec<Arc<ChatMessage>>,
    ) {
        if self.history_limit == 0 {
            return;
        }
        let messages = Arc::clone(&self.messages);
        let limit = self.history_limit;

        tokio::spawn(async move {
            let history: Vec<ChatMessage> = match messages.recent_messages(&room_id, limit).await {
                Ok(stored) => stored.into_iter().map(StoredMessage::into_chat).collect(),
                Err(e) => {
                    warn!(
                        "Failed to load history for room {}, replaying {} buffered messages: {}",
                        room_id,
                        buffered.len(),
                        e
                    );
                    buffered.iter().map(|m| m.as_ref().clone()).collect()
                }
            };
            if history.is_empty() {
                return;
            }
            let Some(queue) = queue.upgrade() else {
                debug!("Client left room {} before history replay", room_id);
                return;
            };
            if queue.send(Outbound::History(history)).await.is_err() {
                debug!("Client left room {} before history replay", room_id);
            }
        });
    }

    fn unregister(&mut self, key: &ClientKey) -> bool {
        let Some(room) = self.registry.get_mut(&key.room_id) else {
            return false;
        };
        match room.remove(key) {
            Some(client) => {
                info!("{} ({}) left room {}", client.username(), client.id(), key.room_id);
                true
            }
            None => false,
        }
    }

    fn broadcast(&mut self, message: ChatMessage) {
        let Some(room) = self.registry.get_mut(&message.room_id) else {
            warn!("Dropping message for unloaded room {}", message.room_id);
            return;
        };

        let message = Arc::new(message);
        room.record(Arc::clone(&message));
        let fan_out = room.fan_out(&message);
        for client in fan_out.evicted {
            warn!(
                "Evicted {} ({}) from room {}: outbound queue full or closed",
                client.username(),
                client.id(),
                message.room_id
            );
        }
        debug!(
            "Delivered message in room {} to {} clients",
            message.room_id, fan_out.delivered
        );

        self.pipeline.dispatch(message);
    }

    fn handle_control(&mut self, command: Control) {
        match command {
            Control::LoadRoom { info, reply } => {
                let room_id = info.id.clone();
                if self.registry.load(info) {
                    debug!("Loaded room {} ({} in memory)", room_id, self.registry.len());
                }
                let _ = reply.send(());
            }
            Control::ListClients { room_id, reply } => {
                let _ = reply.send(self.registry.get(&room_id).map(|room| room.summaries()));
            }
        }
    }
}

impl HubHandle {
    /// Adds the client to its room. Fails with [`HubError::RoomNotLoaded`] if
    /// the room has not been loaded, in which case the client is dropped.
    pub async fn register(&self, client: Client) -> Result<(), HubError> {
        let (reply, response) = oneshot::channel();
        self.send(HubEvent::Register { client, reply }).await?;
        response.await.map_err(|_| HubError::Closed)?
    }

    /// Removes the connection from its room and closes its queue. Returns
    /// whether anything was removed; repeated calls return false.
    pub async fn unregister(&self, key: ClientKey) -> Result<bool, HubError> {
        let (reply, response) = oneshot::channel();
        self.send(HubEvent::Unregister { key, reply }).await?;
        response.await.map_err(|_| HubError::Closed)
    }

    /// Queues a message for fan-out, waiting while the intake is full.
    pub async fn broadcast(&self, message: ChatMessage) -> Result<(), HubError> {
        self.send(HubEvent::Broadcast(message)).await
    }

    /// Makes a room known to the hub, or refreshes its metadata.
    pub async fn load_room(&self, info: RoomInfo) -> Result<(), HubError> {
        let (reply, response) = oneshot::channel();
        self.send(HubEvent::Control(Control::LoadRoom { info, reply }))
            .await?;
        response.await.map_err(|_| HubError::Closed)
    }

    /// Current members of a room, or `None` if the room is not loaded.
    pub async fn clients(&self, room_id: &str) -> Result<Option<Vec<ClientSummary>>, HubError> {
        let (reply, response) = oneshot::channel();
        self.send(HubEvent::Control(Control::ListClients {
            room_id: room_id.to_string(),
            reply,
        }))
        .await?;
        response.await.map_err(|_| HubError::Closed)
    }

    async fn send(&self, event: HubEvent) -> Result<(), HubError> {
        self.events.send(event).await.map_err(|_| HubError::Closed)
    }
}
