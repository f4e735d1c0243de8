use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("room {0} is not loaded in the hub")]
    RoomNotLoaded(String),
    #[error("hub has shut down")]
    Closed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("user {0} already has an active room")]
    DuplicateOwner(Uuid),
    #[error("maximum number of rooms reached ({0})")]
    LimitReached(usize),
    #[error("storage failure: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum RoomError {
    #[error("invalid room name: {0}")]
    InvalidName(String),
    #[error("room name contains inappropriate content")]
    InappropriateName,
    #[error("maximum number of rooms reached ({0})")]
    LimitReached(usize),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Hub(#[from] HubError),
}

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Hub(#[from] HubError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("TLS_CERT_PATH and TLS_KEY_PATH must be set together")]
    IncompleteTls,
}
