use std::fmt::Display;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use warp::ws::Message;

use crate::error::ConnectionError;
use crate::hub::HubHandle;
use crate::messages::{ChatMessage, Identity, Outbound};
use crate::room::{Client, ClientKey};

/// Registers a freshly upgraded socket with the hub and pumps it until it
/// disconnects. If the room is not loaded the socket is closed straight away.
pub async fn join<S, E>(
    mut socket: S,
    identity: Identity,
    room_id: String,
    hub: HubHandle,
    queue_capacity: usize,
) where
    S: Stream<Item = Result<Message, E>> + Sink<Message> + Unpin + Send + 'static,
    E: Display + Send,
    <S as Sink<Message>>::Error: Display + Send,
{
    let (client, outbound) = Client::new(&identity, room_id, queue_capacity);
    let key = client.key().clone();

    if let Err(e) = hub.register(client).await {
        warn!("Closing connection of {}: {}", identity.client_id, e);
        if let Err(e) = socket.close().await {
            debug!("Error closing rejected connection: {}", e);
        }
        return;
    }

    serve(socket, identity, key, outbound, hub).await;
}

/// Runs the reader on the current task and the writer on a spawned one.
/// Whichever stops first, the client is unregistered and both halves of the
/// socket are released before returning.
pub async fn serve<S, E>(
    socket: S,
    identity: Identity,
    key: ClientKey,
    outbound: mpsc::Receiver<Outbound>,
    hub: HubHandle,
) where
    S: Stream<Item = Result<Message, E>> + Sink<Message> + Send + 'static,
    E: Display + Send,
    <S as Sink<Message>>::Error: Display + Send,
{
    let (sink, mut frames) = socket.split();
    let mut writer = tokio::spawn(write_loop(sink, outbound));
    let mut writer_done = false;

    let outcome = tokio::select! {
        result = read_loop(&mut frames, &identity, &key.room_id, &hub) => result,
        joined = &mut writer => {
            writer_done = true;
            log_writer_exit(&identity, joined);
            Ok(())
        }
    };

    match outcome {
        Ok(()) => info!("{} disconnected from room {}", identity.client_id, key.room_id),
        Err(e) => warn!("Connection of {} ended: {}", identity.client_id, e),
    }

    match hub.unregister(key).await {
        Ok(true) => {}
        Ok(false) => debug!("{} was already removed from its room", identity.client_id),
        Err(e) => warn!("Could not unregister {}: {}", identity.client_id, e),
    }

    drop(frames);
    if !writer_done {
        log_writer_exit(&identity, writer.await);
    }
}

/// Turns inbound frames into messages for the hub until the peer goes away.
pub async fn read_loop<R, E>(
    frames: &mut R,
    sender: &Identity,
    room_id: &str,
    hub: &HubHandle,
) -> Result<(), ConnectionError>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(frame) = frames.next().await {
        let frame = frame.map_err(|e| ConnectionError::Transport(e.to_string()))?;
        if frame.is_close() {
            return Ok(());
        }
        let Some(content) = decode(&frame)? else {
            continue;
        };
        hub.broadcast(ChatMessage::from_sender(sender, room_id, content))
            .await?;
    }
    Ok(())
}

/// Serialises queued messages onto the sink until the queue is closed.
/// The sink is closed on every exit path.
pub async fn write_loop<W>(
    mut sink: W,
    mut outbound: mpsc::Receiver<Outbound>,
) -> Result<(), ConnectionError>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let result = drain(&mut sink, &mut outbound).await;
    if let Err(e) = sink.close().await {
        debug!("Error closing WebSocket: {}", e);
    }
    result
}

async fn drain<W>(sink: &mut W, outbound: &mut mpsc::Receiver<Outbound>) -> Result<(), ConnectionError>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    while let Some(item) = outbound.recv().await {
        for frame in item.encode()? {
            sink.send(Message::text(frame))
                .await
                .map_err(|e| ConnectionError::Transport(e.to_string()))?;
        }
    }
    Ok(())
}

fn decode(frame: &Message) -> Result<Option<String>, ConnectionError> {
    if let Ok(text) = frame.to_str() {
        return Ok(Some(text.to_string()));
    }
    if frame.is_binary() {
        return String::from_utf8(frame.as_bytes().to_vec())
            .map(Some)
            .map_err(|_| ConnectionError::Protocol("binary frame is not UTF-8".to_string()));
    }
    // ping / pong
    Ok(None)
}

fn log_writer_exit(
    identity: &Identity,
    joined: Result<Result<(), ConnectionError>, tokio::task::JoinError>,
) {
    match joined {
        Ok(Ok(())) => debug!("Writer for {} finished", identity.client_id),
        Ok(Err(e)) => warn!("Failed to send to {}: {}", identity.client_id, e),
        Err(e) => warn!("Writer task for {} failed: {}", identity.client_id, e),
    }
}
