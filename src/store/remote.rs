//! `RoomStore` over a WebSocket connection to a room host
//!
//! One background driver task owns the socket. Requests carry an id and are
//! answered by `room`, `ack` or `failed` frames; `snapshot` and `deleted`
//! frames are fanned out to local subscribers. When the socket drops, every
//! in-flight request fails with `NetworkTransient` and the driver reconnects
//! on the configured backoff, re-subscribing each room that still has a live
//! subscriber so it gets a fresh full snapshot.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::{StoreError, StoreResult};
use crate::model::{ChatMessage, NewRoom, Room, RoomId, RoomPatch};
use crate::store::{RoomStore, RoomUpdate, Subscription};
use crate::websocket::message::{ClientFrame, ServerFrame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Internal (re-subscribe) request ids count down from here, starting at
/// this value, so they never collide with caller ids counting up from 1.
const INTERNAL_REQUEST_BASE: u64 = u64::MAX;

#[derive(Debug)]
enum Reply {
    Room(Room),
    Ack,
}

struct Request {
    frame: ClientFrame,
    reply: oneshot::Sender<StoreResult<Reply>>,
    /// Set for `subscribe`: registered once the host acks
    subscriber: Option<UnboundedSender<RoomUpdate>>,
}

struct Pending {
    reply: oneshot::Sender<StoreResult<Reply>>,
    subscriber: Option<(RoomId, UnboundedSender<RoomUpdate>)>,
}

#[derive(Default)]
struct DriverState {
    pending: HashMap<u64, Pending>,
    subscribers: HashMap<RoomId, Vec<UnboundedSender<RoomUpdate>>>,
    next_internal_id: u64,
}

enum ConnectionEnd {
    /// The store handle was dropped
    Closed,
    Lost,
}

enum Reconnect {
    Connected(WsStream),
    GaveUp,
    Closed,
}

impl DriverState {
    fn internal_id(&mut self) -> u64 {
        let id = INTERNAL_REQUEST_BASE - self.next_internal_id;
        self.next_internal_id += 1;
        id
    }

    fn subscribe_pending(&self, room_id: &RoomId) -> bool {
        self.pending
            .values()
            .any(|p| matches!(&p.subscriber, Some((id, _)) if id == room_id))
    }

    fn live_rooms(&mut self) -> Vec<RoomId> {
        self.subscribers
            .retain(|_, senders| {
                senders.retain(|tx| !tx.is_closed());
                !senders.is_empty()
            });
        self.subscribers.keys().cloned().collect()
    }

    fn track(&mut self, request: Request) -> ClientFrame {
        if let Some(request_id) = request.frame.request_id() {
            let subscriber = match (&request.frame, request.subscriber) {
                (ClientFrame::Subscribe { room_id, .. }, Some(tx)) => Some((room_id.clone(), tx)),
                _ => None,
            };
            self.pending.insert(
                request_id,
                Pending {
                    reply: request.reply,
                    subscriber,
                },
            );
        }
        request.frame
    }

    fn fail_pending(&mut self, reason: &str) {
        for (_, pending) in self.pending.drain() {
            let _ = pending
                .reply
                .send(Err(StoreError::NetworkTransient(reason.to_string())));
        }
    }

    /// Route one host frame; returns a frame to send back, if any
    fn dispatch(&mut self, frame: ServerFrame) -> Option<ClientFrame> {
        match frame {
            ServerFrame::Room { request_id, room } => {
                if let Some(pending) = self.pending.remove(&request_id) {
                    let _ = pending.reply.send(Ok(Reply::Room(room)));
                }
                None
            }
            ServerFrame::Ack { request_id } => {
                if let Some(pending) = self.pending.remove(&request_id) {
                    if let Some((room_id, tx)) = pending.subscriber {
                        self.subscribers.entry(room_id).or_default().push(tx);
                    }
                    let _ = pending.reply.send(Ok(Reply::Ack));
                }
                None
            }
            ServerFrame::Failed { request_id, error } => {
                if let Some(pending) = self.pending.remove(&request_id) {
                    let _ = pending.reply.send(Err(error));
                }
                None
            }
            ServerFrame::Snapshot { room_id, room } => {
                let senders = self.subscribers.get_mut(&room_id)?;
                senders.retain(|tx| tx.send(RoomUpdate::Snapshot(room.clone())).is_ok());
                if senders.is_empty() {
                    self.subscribers.remove(&room_id);
                    // A subscribe already on the wire replaces the host's forwarder
                    if self.subscribe_pending(&room_id) {
                        return None;
                    }
                    return Some(ClientFrame::Unsubscribe { room_id });
                }
                None
            }
            ServerFrame::Deleted { room_id } => {
                if let Some(senders) = self.subscribers.remove(&room_id) {
                    for tx in senders {
                        let _ = tx.send(RoomUpdate::Deleted);
                    }
                }
                None
            }
            ServerFrame::Error { message } => {
                tracing::warn!("Room host rejected a frame: {}", message);
                None
            }
        }
    }
}

pub struct RemoteRoomStore {
    commands: UnboundedSender<Request>,
    next_request_id: AtomicU64,
}

impl RemoteRoomStore {
    /// Connect to a room host, e.g. `ws://127.0.0.1:8080/ws`
    pub async fn connect(url: &str, reconnect_delays: Vec<Duration>) -> StoreResult<Self> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| StoreError::NetworkTransient(e.to_string()))?;
        tracing::info!("Connected to room host {}", url);

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(drive(url.to_string(), ws, rx, reconnect_delays));

        Ok(Self {
            commands: tx,
            next_request_id: AtomicU64::new(1),
        })
    }

    fn next_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn request(
        &self,
        frame: ClientFrame,
        subscriber: Option<UnboundedSender<RoomUpdate>>,
    ) -> StoreResult<Reply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Request {
                frame,
                reply: reply_tx,
                subscriber,
            })
            .map_err(|_| StoreError::NetworkTransient("connection closed".into()))?;
        reply_rx
            .await
            .map_err(|_| StoreError::NetworkTransient("connection closed".into()))?
    }

    async fn request_room(&self, frame: ClientFrame) -> StoreResult<Room> {
        match self.request(frame, None).await? {
            Reply::Room(room) => Ok(room),
            Reply::Ack => Err(StoreError::InvalidRequest("expected a room".into())),
        }
    }

    async fn request_ack(&self, frame: ClientFrame) -> StoreResult<()> {
        self.request(frame, None).await.map(|_| ())
    }
}

#[async_trait]
impl RoomStore for RemoteRoomStore {
    async fn create_room(&self, request: NewRoom) -> StoreResult<Room> {
        self.request_room(ClientFrame::Create {
            request_id: self.next_id(),
            room: request,
        })
        .await
    }

    async fn read(&self, room_id: &RoomId) -> StoreResult<Room> {
        self.request_room(ClientFrame::Read {
            request_id: self.next_id(),
            room_id: room_id.clone(),
        })
        .await
    }

    async fn write_fields(&self, room_id: &RoomId, patch: RoomPatch) -> StoreResult<()> {
        self.request_ack(ClientFrame::Write {
            request_id: self.next_id(),
            room_id: room_id.clone(),
            patch,
        })
        .await
    }

    async fn subscribe(&self, room_id: &RoomId) -> StoreResult<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let frame = ClientFrame::Subscribe {
            request_id: self.next_id(),
            room_id: room_id.clone(),
        };
        self.request(frame, Some(tx)).await?;
        Ok(Subscription::new(room_id.clone(), rx))
    }

    async fn post_message(&self, room_id: &RoomId, message: ChatMessage) -> StoreResult<()> {
        self.request_ack(ClientFrame::Post {
            request_id: self.next_id(),
            room_id: room_id.clone(),
            message,
        })
        .await
    }
}

async fn drive(
    url: String,
    mut ws: WsStream,
    mut commands: UnboundedReceiver<Request>,
    reconnect_delays: Vec<Duration>,
) {
    let mut state = DriverState::default();

    loop {
        match run_connection(ws, &mut commands, &mut state).await {
            ConnectionEnd::Closed => return,
            ConnectionEnd::Lost => {
                tracing::warn!("Lost connection to room host {}", url);
                state.fail_pending("connection lost");
            }
        }

        match reconnect(&url, &reconnect_delays, &mut commands).await {
            Reconnect::Connected(next) => {
                tracing::info!("Reconnected to room host {}", url);
                ws = next;
            }
            Reconnect::Closed => return,
            Reconnect::GaveUp => {
                tracing::warn!("Giving up on room host {}", url);
                // Dropping the senders ends every local subscription
                state.subscribers.clear();
                while let Some(request) = commands.recv().await {
                    let _ = request
                        .reply
                        .send(Err(StoreError::NetworkTransient("room host unreachable".into())));
                }
                return;
            }
        }
    }
}

async fn run_connection(
    ws: WsStream,
    commands: &mut UnboundedReceiver<Request>,
    state: &mut DriverState,
) -> ConnectionEnd {
    let (mut sink, mut stream) = ws.split();

    for room_id in state.live_rooms() {
        let frame = ClientFrame::Subscribe {
            request_id: state.internal_id(),
            room_id,
        };
        if sink.send(Message::Text(frame.to_text())).await.is_err() {
            return ConnectionEnd::Lost;
        }
    }

    loop {
        tokio::select! {
            request = commands.recv() => {
                let Some(request) = request else {
                    let _ = sink.close().await;
                    return ConnectionEnd::Closed;
                };
                let frame = state.track(request);
                if sink.send(Message::Text(frame.to_text())).await.is_err() {
                    return ConnectionEnd::Lost;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let frame = match ServerFrame::parse(&text) {
                            Ok(frame) => frame,
                            Err(e) => {
                                tracing::debug!("Ignoring unreadable frame from host: {}", e);
                                continue;
                            }
                        };
                        if let Some(reply) = state.dispatch(frame) {
                            if sink.send(Message::Text(reply.to_text())).await.is_err() {
                                return ConnectionEnd::Lost;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return ConnectionEnd::Lost,
                    Some(Ok(_)) => {
                        // Ping/pong and binary frames carry nothing for us
                    }
                    Some(Err(e)) => {
                        tracing::warn!("Room host socket error: {}", e);
                        return ConnectionEnd::Lost;
                    }
                }
            }
        }
    }
}

async fn reconnect(
    url: &str,
    delays: &[Duration],
    commands: &mut UnboundedReceiver<Request>,
) -> Reconnect {
    for (attempt, delay) in delays.iter().enumerate() {
        let sleep = tokio::time::sleep(*delay);
        tokio::pin!(sleep);

        // Requests issued while offline fail right away; no retries here
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                request = commands.recv() => match request {
                    Some(request) => {
                        let _ = request
                            .reply
                            .send(Err(StoreError::NetworkTransient("reconnecting".into())));
                    }
                    None => return Reconnect::Closed,
                },
            }
        }

        match connect_async(url).await {
            Ok((ws, _)) => return Reconnect::Connected(ws),
            Err(e) => tracing::debug!("Reconnect attempt {} to {} failed: {}", attempt + 1, url, e),
        }
    }
    Reconnect::GaveUp
}
