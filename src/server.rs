use std::convert::Infallible;
use std::sync::Arc;

use log::warn;
use serde::Deserialize;
use uuid::Uuid;
use warp::http::StatusCode;
use warp::reply::{self, Reply, Response};
use warp::ws::Ws;
use warp::{Filter, Rejection};

use crate::connection;
use crate::error::{RoomError, StoreError};
use crate::hub::HubHandle;
use crate::lifecycle::RoomLifecycle;
use crate::messages::{CreateRoomRequest, CreateRoomResponse, ErrorResponse, Identity, RoomResponse};

/// Header carrying the user id established by the upstream auth layer.
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Deserialize)]
pub struct JoinQuery {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    pub username: Option<String>,
}

#[derive(Clone)]
pub struct Server {
    hub: HubHandle,
    lifecycle: Arc<RoomLifecycle>,
    queue_capacity: usize,
}

impl Server {
    pub fn new(hub: HubHandle, lifecycle: Arc<RoomLifecycle>, queue_capacity: usize) -> Self {
        Server {
            hub,
            lifecycle,
            queue_capacity,
        }
    }

    /// `/ws/*` room routes plus `/health`.
    pub fn routes(self) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
        let server = warp::any().map(move || self.clone());

        let create_room = warp::path!("ws" / "createRoom")
            .and(warp::post())
            .and(warp::header::optional::<String>(USER_ID_HEADER))
            .and(warp::body::json())
            .and(server.clone())
            .and_then(Self::create_room);

        let get_rooms = warp::path!("ws" / "getRooms")
            .and(warp::get())
            .and(server.clone())
            .and_then(Self::get_rooms);

        let get_clients = warp::path!("ws" / "getClients" / String)
            .and(warp::get())
            .and(server.clone())
            .and_then(Self::get_clients);

        let join_room = warp::path!("ws" / "joinRoom" / String)
            .and(warp::ws())
            .and(warp::query::<JoinQuery>())
            .and(server)
            .and_then(Self::join_room);

        let health = warp::path!("health")
            .and(warp::get())
            .map(|| reply::json(&serde_json::json!({ "status": "ok" })).into_response());

        create_room
            .or(get_rooms)
            .unify()
            .or(get_clients)
            .unify()
            .or(join_room)
            .unify()
            .or(health)
            .unify()
    }

    async fn create_room(
        user_id: Option<String>,
        request: CreateRoomRequest,
        server: Server,
    ) -> Result<Response, Infallible> {
        let creator = user_id.and_then(|raw| match Uuid::parse_str(raw.trim()) {
            Ok(id) => Some(id),
            Err(_) => {
                warn!("Ignoring malformed {} header {:?}", USER_ID_HEADER, raw);
                None
            }
        });

        Ok(match server.lifecycle.create_room(&request.name, creator).await {
            Ok(room) => reply::json(&CreateRoomResponse {
                id: room.id,
                name: room.name,
            })
            .into_response(),
            Err(e) => error_response(&e),
        })
    }

    async fn get_rooms(server: Server) -> Result<Response, Infallible> {
        Ok(match server.lifecycle.active_rooms().await {
            Ok(rooms) => {
                let rooms: Vec<RoomResponse> = rooms.iter().map(|room| room.to_response()).collect();
                reply::json(&rooms).into_response()
            }
            Err(e) => error_response(&e),
        })
    }

    async fn get_clients(room_id: String, server: Server) -> Result<Response, Infallible> {
        Ok(match server.hub.clients(&room_id).await {
            Ok(clients) => reply::json(&clients.unwrap_or_default()).into_response(),
            Err(e) => error_response(&RoomError::Hub(e)),
        })
    }

    async fn join_room(
        room_id: String,
        ws: Ws,
        query: JoinQuery,
        server: Server,
    ) -> Result<Response, Infallible> {
        let room = match server.lifecycle.resolve_room(&room_id).await {
            Ok(room) => room,
            Err(e) => return Ok(error_response(&e)),
        };

        let identity = Identity::new(query.user_id, query.username);
        let hub = server.hub.clone();
        let capacity = server.queue_capacity;
        Ok(ws
            .on_upgrade(move |socket| connection::join(socket, identity, room.id, hub, capacity))
            .into_response())
    }
}

fn error_response(error: &RoomError) -> Response {
    let status = match error {
        RoomError::InvalidName(_) | RoomError::InappropriateName => StatusCode::BAD_REQUEST,
        RoomError::LimitReached(_) | RoomError::Store(StoreError::LimitReached(_)) => {
            StatusCode::TOO_MANY_REQUESTS
        }
        RoomError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
        RoomError::Store(StoreError::DuplicateOwner(_)) => StatusCode::CONFLICT,
        RoomError::Store(StoreError::Backend(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        RoomError::Hub(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    if status.is_server_error() {
        warn!("Request failed: {}", error);
    }
    let body = ErrorResponse {
        error: error.to_string(),
    };
    reply::with_status(reply::json(&body), status).into_response()
}
