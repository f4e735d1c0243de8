//! Room-based real-time chat: a single hub task owns room membership and
//! fans messages out to per-client queues, while persistence and user
//! statistics run off the delivery path.

pub mod config;
pub mod connection;
pub mod error;
pub mod filter;
pub mod hub;
pub mod lifecycle;
pub mod messages;
pub mod pipeline;
pub mod room;
pub mod server;
pub mod store;

pub use config::Config;
pub use error::{ConfigError, ConnectionError, HubError, RoomError, StoreError};
pub use hub::{Hub, HubConfig, HubHandle};
pub use messages::{ChatMessage, Identity, Outbound};
pub use pipeline::{Pipeline, PipelineReport};
pub use room::{Client, ClientKey, RoomInfo};
