//! WebSocket transport and [`EventBus`] implementation using
//! `tokio-tungstenite`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use trivia_protocol::{Ack, Codec, ConnectionId, JsonCodec, RoomCode, ServerEvent, ServerFrame};

use crate::{Connection, EventBus, Role, Transport, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type WsStream = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

/// A WebSocket-based [`Transport`] that listens for incoming connections.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await.map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self { listener })
    }

    /// Returns the address this transport is actually bound to, useful when
    /// `bind` was given a `:0` port.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let (stream, addr) = self.listener.accept().await.map_err(TransportError::AcceptFailed)?;

        let ws = tokio_tungstenite::accept_async(stream).await.map_err(|e| {
            TransportError::AcceptFailed(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, e))
        })?;

        let id = ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(%id, %addr, "accepted WebSocket connection");

        Ok(WebSocketConnection { id, ws: Arc::new(Mutex::new(ws)) })
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// A single WebSocket connection.
#[derive(Clone)]
pub struct WebSocketConnection {
    id: ConnectionId,
    ws: Arc<Mutex<WsStream>>,
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        use futures_util::SinkExt;
        let msg = Message::Binary(data.to_vec().into());
        self.ws.lock().await.send(msg).await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))
        })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        use futures_util::StreamExt;
        loop {
            let msg = self.ws.lock().await.next().await;
            match msg {
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.into())),
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_bytes().to_vec())),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.ws.lock().await.close(None).await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))
        })
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

/// An [`EventBus`] over [`WebSocketConnection`]s: a shared table of
/// connections plus room membership, both behind their own `Mutex`.
pub struct WebSocketEventBus {
    codec: JsonCodec,
    connections: Mutex<HashMap<ConnectionId, WebSocketConnection>>,
    rooms: Mutex<HashMap<RoomCode, HashMap<ConnectionId, Role>>>,
}

impl Default for WebSocketEventBus {
    fn default() -> Self {
        Self {
            codec: JsonCodec,
            connections: Mutex::new(HashMap::new()),
            rooms: Mutex::new(HashMap::new()),
        }
    }
}

impl WebSocketEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly-accepted connection so it can receive replies and
    /// broadcasts. Call before spawning the connection's read loop.
    pub async fn register(&self, conn: WebSocketConnection) {
        self.connections.lock().await.insert(conn.id(), conn);
    }

    /// Drops a connection from the bus and every room it was joined to.
    /// Called from the connection's read loop once `recv` returns `None`.
    pub async fn unregister(&self, id: ConnectionId) {
        self.connections.lock().await.remove(&id);
        let mut rooms = self.rooms.lock().await;
        for members in rooms.values_mut() {
            members.remove(&id);
        }
        rooms.retain(|_, members| !members.is_empty());
    }

    async fn send_frame(&self, conn: ConnectionId, frame: &ServerFrame) -> Result<(), TransportError> {
        let bytes = self.codec.encode(frame)?;
        let connections = self.connections.lock().await;
        let target = connections.get(&conn).ok_or(TransportError::UnknownConnection(conn))?;
        target.send(&bytes).await
    }
}

impl EventBus for WebSocketEventBus {
    async fn join_room(&self, conn: ConnectionId, room: &RoomCode, role: Role) {
        self.rooms.lock().await.entry(room.clone()).or_default().insert(conn, role);
    }

    async fn leave_room(&self, conn: ConnectionId, room: &RoomCode) {
        if let Some(members) = self.rooms.lock().await.get_mut(room) {
            members.remove(&conn);
        }
    }

    async fn reply(&self, conn: ConnectionId, id: u64, ack: Ack) -> Result<(), TransportError> {
        self.send_frame(conn, &ServerFrame::Ack { id, ack }).await
    }

    async fn emit(&self, conn: ConnectionId, event: &ServerEvent) -> Result<(), TransportError> {
        self.send_frame(conn, &ServerFrame::Event(event.clone())).await
    }

    async fn broadcast(&self, room: &RoomCode, event: &ServerEvent) -> Result<(), TransportError> {
        let members: Vec<ConnectionId> = {
            let rooms = self.rooms.lock().await;
            rooms.get(room).map(|m| m.keys().copied().collect()).unwrap_or_default()
        };
        let frame = ServerFrame::Event(event.clone());
        for member in members {
            if let Err(err) = self.send_frame(member, &frame).await {
                tracing::debug!(%member, %err, "dropping broadcast to stale connection");
            }
        }
        Ok(())
    }

    async fn broadcast_except(
        &self,
        room: &RoomCode,
        exclude: ConnectionId,
        event: &ServerEvent,
    ) -> Result<(), TransportError> {
        let members: Vec<ConnectionId> = {
            let rooms = self.rooms.lock().await;
            rooms
                .get(room)
                .map(|m| m.keys().copied().filter(|id| *id != exclude).collect())
                .unwrap_or_default()
        };
        let frame = ServerFrame::Event(event.clone());
        for member in members {
            if let Err(err) = self.send_frame(member, &frame).await {
                tracing::debug!(%member, %err, "dropping broadcast to stale connection");
            }
        }
        Ok(())
    }

    async fn broadcast_filtered(
        &self,
        room: &RoomCode,
        exclude_role: Role,
        event: &ServerEvent,
    ) -> Result<(), TransportError> {
        let members: Vec<ConnectionId> = {
            let rooms = self.rooms.lock().await;
            rooms
                .get(room)
                .map(|m| {
                    m.iter()
                        .filter(|(_, role)| **role != exclude_role)
                        .map(|(id, _)| *id)
                        .collect()
                })
                .unwrap_or_default()
        };
        let frame = ServerFrame::Event(event.clone());
        for member in members {
            if let Err(err) = self.send_frame(member, &frame).await {
                tracing::debug!(%member, %err, "dropping broadcast to stale connection");
            }
        }
        Ok(())
    }
}
