//! Transport abstraction layer for the trivia engine.
//!
//! Provides the [`Transport`]/[`Connection`] traits that abstract over the
//! raw byte pipe (WebSocket today), and the higher-level [`EventBus`] trait
//! that the room manager and game engine actually talk to: reply to the
//! socket that made a request, broadcast to every socket in a room, or
//! emit to one socket by id.
//!
//! # Feature Flags
//!
//! - `websocket` (default) — WebSocket transport via `tokio-tungstenite`.

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketEventBus, WebSocketTransport};

pub use trivia_protocol::ConnectionId;
use trivia_protocol::{Ack, RoomCode, ServerEvent};

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;

    /// Gracefully shuts down the transport, stopping new connections.
    async fn shutdown(&self) -> Result<(), Self::Error>;
}

/// A single connection that can send and receive bytes.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends data to the remote peer.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receives the next message from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Closes the connection.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}

/// The role a connection authenticates as, tagged on first successful
/// `room:create` or `room:join`. `EventBus` implementations
/// don't interpret this themselves — it travels with [`join_room`] purely
/// so `broadcast_filtered` can suppress delivery to a role, which the game
/// engine uses to keep `correctAnswer` off player-facing sockets even if a
/// future event shape forgot to build a role-specific payload.
///
/// [`join_room`]: EventBus::join_room
pub use trivia_protocol::Role;

/// Three-shape abstraction over the transport: reply, room broadcast, and
/// targeted emit.
///
/// Connections are joined to a room channel with [`join_room`] once the
/// `RoomManager` has decided to admit them, and removed with
/// [`leave_room`]. Everything else — authority checks, validation, game
/// logic — happens above this trait; `EventBus` only knows how to move
/// already-built [`ServerEvent`]s and [`Ack`]s to sockets.
///
/// [`join_room`]: EventBus::join_room
/// [`leave_room`]: EventBus::leave_room
pub trait EventBus: Send + Sync + 'static {
    /// Registers `conn` as a member of `room`'s broadcast channel, with the
    /// given role tag.
    async fn join_room(&self, conn: ConnectionId, room: &RoomCode, role: Role);

    /// Removes `conn` from `room`'s broadcast channel.
    async fn leave_room(&self, conn: ConnectionId, room: &RoomCode);

    /// One-shot reply to the socket that made a request, correlated by the
    /// request id it sent in its [`trivia_protocol::ClientEnvelope`].
    async fn reply(&self, conn: ConnectionId, id: u64, ack: Ack) -> Result<(), TransportError>;

    /// Sends an event to one socket by id, regardless of room membership.
    async fn emit(&self, conn: ConnectionId, event: &ServerEvent) -> Result<(), TransportError>;

    /// Delivers an event to every socket currently joined to `room`.
    /// Best-effort and unordered across recipients, ordered per recipient.
    async fn broadcast(&self, room: &RoomCode, event: &ServerEvent) -> Result<(), TransportError>;

    /// Like [`broadcast`](EventBus::broadcast), but skips one connection —
    /// used when a reply already told the initiator what happened and the
    /// broadcast is only for everyone else.
    async fn broadcast_except(
        &self,
        room: &RoomCode,
        exclude: ConnectionId,
        event: &ServerEvent,
    ) -> Result<(), TransportError>;

    /// Delivers an event to every socket in `room` whose tagged role is
    /// not `exclude_role`. Used to keep `correctAnswer` off player sockets
    /// even for event shapes that don't already omit it structurally.
    async fn broadcast_filtered(
        &self,
        room: &RoomCode,
        exclude_role: Role,
        event: &ServerEvent,
    ) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_display_matches_protocol_format() {
        let id = ConnectionId(7);
        assert_eq!(id.to_string(), "conn-7");
    }
}
