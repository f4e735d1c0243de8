use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::{connect_async, tungstenite};
use uuid::Uuid;
use warp::http::{Response, StatusCode};
use warp::hyper::body::Bytes;

use room_hub::filter::ProfanityFilter;
use room_hub::lifecycle::{RoomLifecycle, StaticTopics};
use room_hub::messages::{ChatMessage, ClientSummary, CreateRoomResponse};
use room_hub::server::{Server, USER_ID_HEADER};
use room_hub::store::{MemoryMessageStore, MemoryRoomStore, MemoryStatsStore};
use room_hub::{Hub, HubConfig, HubHandle, Pipeline};

fn app(max_rooms: usize) -> (Server, HubHandle) {
    let messages = Arc::new(MemoryMessageStore::new());
    let (pipeline, _reports) = Pipeline::new(messages.clone(), Arc::new(MemoryStatsStore::new()), 4);
    let (hub, handle) = Hub::new(HubConfig::default(), messages, pipeline);
    tokio::spawn(hub.run());

    let lifecycle = Arc::new(RoomLifecycle::new(
        Arc::new(MemoryRoomStore::new()),
        Arc::new(StaticTopics::default()),
        handle.clone(),
        ProfanityFilter::standard().unwrap(),
        max_rooms,
        Duration::from_secs(3600),
    ));
    (Server::new(handle.clone(), lifecycle, 10), handle)
}

async fn create_room(server: &Server, name: &str, user: Option<Uuid>) -> Response<Bytes> {
    let mut request = warp::test::request()
        .method("POST")
        .path("/ws/createRoom")
        .json(&json!({ "name": name }));
    if let Some(user) = user {
        request = request.header(USER_ID_HEADER, user.to_string());
    }
    request.reply(&server.clone().routes()).await
}

async fn wait_for_members(hub: &HubHandle, room_id: &str, count: usize) -> Vec<ClientSummary> {
    for _ in 0..100 {
        if let Some(members) = hub.clients(room_id).await.unwrap() {
            if members.len() == count {
                return members;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("room {room_id} never reached {count} members");
}

#[tokio::test]
async fn health_reports_ok() {
    let (server, _) = app(5);
    let response = warp::test::request()
        .path("/health")
        .reply(&server.routes())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn create_and_list_rooms() {
    let (server, hub) = app(5);

    let response = create_room(&server, "Lobby", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let created: CreateRoomResponse = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(created.name, "Lobby");
    assert_eq!(hub.clients(&created.id).await.unwrap(), Some(Vec::new()));

    let response = warp::test::request()
        .path("/ws/getRooms")
        .reply(&server.clone().routes())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let rooms: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(rooms.as_array().unwrap().len(), 1);
    assert_eq!(rooms[0]["id"], created.id.as_str());
    assert_eq!(rooms[0]["is_pinned"], false);
    assert!(rooms[0].get("topic_title").is_none());
}

#[tokio::test]
async fn create_room_errors_map_to_statuses() {
    let (server, _) = app(2);
    let owner = Uuid::new_v4();

    assert_eq!(create_room(&server, "  ", None).await.status(), StatusCode::BAD_REQUEST);

    let rude = create_room(&server, "bullshit central", None).await;
    assert_eq!(rude.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(rude.body()).unwrap();
    assert_eq!(body["error"], "room name contains inappropriate content");

    assert_eq!(create_room(&server, "mine", Some(owner)).await.status(), StatusCode::OK);

    let duplicate = create_room(&server, "also mine", Some(owner)).await;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);
    let body: Value = serde_json::from_slice(duplicate.body()).unwrap();
    assert!(body["error"].as_str().unwrap().contains("active room"));

    assert_eq!(create_room(&server, "second", None).await.status(), StatusCode::OK);
    assert_eq!(
        create_room(&server, "third", None).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn clients_of_unknown_room_is_empty() {
    let (server, _) = app(5);
    let response = warp::test::request()
        .path("/ws/getClients/nope")
        .reply(&server.routes())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body().as_ref(), b"[]");
}

#[tokio::test]
async fn joining_unknown_room_is_refused() {
    let (server, _) = app(5);
    let result = warp::test::ws()
        .path("/ws/joinRoom/nope")
        .handshake(server.routes())
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn members_receive_each_others_messages() {
    let (server, hub) = app(5);
    let created: CreateRoomResponse =
        serde_json::from_slice(create_room(&server, "Lobby", None).await.body()).unwrap();

    let mut alice = warp::test::ws()
        .path(&format!("/ws/joinRoom/{}?userId=alice&username=Alice", created.id))
        .handshake(server.clone().routes())
        .await
        .expect("alice joins");
    let mut bob = warp::test::ws()
        .path(&format!("/ws/joinRoom/{}?userId=bob&username=Bob", created.id))
        .handshake(server.clone().routes())
        .await
        .expect("bob joins");

    let members = wait_for_members(&hub, &created.id, 2).await;
    assert_eq!(members[0].id, "alice");
    assert_eq!(members[1].username, "Bob");

    alice.send_text("hello bob").await;

    for client in [&mut alice, &mut bob] {
        let frame = client.recv().await.expect("message frame");
        let message: ChatMessage = serde_json::from_str(frame.to_str().unwrap()).unwrap();
        assert_eq!(message.content, "hello bob");
        assert_eq!(message.username, "Alice");
        assert_eq!(message.room_id, created.id);
        assert_eq!(message.user_id, None);
    }
}

#[tokio::test]
async fn real_socket_round_trip() {
    let (server, hub) = app(5);
    let created: CreateRoomResponse =
        serde_json::from_slice(create_room(&server, "Tech", None).await.body()).unwrap();

    let (addr, serving) = warp::serve(server.routes()).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(serving);

    let user = Uuid::new_v4();
    let url = format!(
        "ws://{addr}/ws/joinRoom/{}?userId={user}&username=ada",
        created.id
    );
    let (mut socket, _) = connect_async(url).await.expect("connect");
    wait_for_members(&hub, &created.id, 1).await;

    socket
        .send(tungstenite::Message::Text("hello".into()))
        .await
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(2), socket.next())
        .await
        .expect("echo in time")
        .expect("stream open")
        .expect("valid frame");
    let message: ChatMessage = serde_json::from_str(frame.to_text().unwrap()).unwrap();
    assert_eq!(message.content, "hello");
    assert_eq!(message.user_id, Some(user));

    socket.close(None).await.ok();
    wait_for_members(&hub, &created.id, 0).await;
}
