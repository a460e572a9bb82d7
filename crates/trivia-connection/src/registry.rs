//! The connection registry: per-connection `roomCode`/`role`/`playerId`/
//! `deviceId` bookkeeping.
//!
//! There is no token-based reconnection here: the rejoin flow matches an
//! existing player by case-insensitive name (`rejoinRoom`), not by a
//! reconnection token, so there is no token index to keep in sync.

use std::collections::HashMap;

use tokio::sync::Mutex;
use trivia_protocol::{ConnectionId, PlayerId, Role, RoomCode};

/// Opaque per-connection data every connection carries.
#[derive(Debug, Clone)]
pub struct ConnectionData {
    pub role: Option<Role>,
    pub room_code: Option<RoomCode>,
    pub player_id: Option<PlayerId>,
    pub device_id: Option<String>,
}

impl ConnectionData {
    fn new(device_id: Option<String>) -> Self {
        Self { role: None, room_code: None, player_id: None, device_id }
    }
}

/// Tracks metadata for every live connection. Owned by the server and
/// shared with the room manager/game engine so authority checks
/// (`role == Tv`) and room-membership lookups don't need a socket round
/// trip.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, ConnectionData>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly-accepted connection, before it has joined or
    /// created any room.
    pub async fn register(&self, conn: ConnectionId, device_id: Option<String>) {
        self.connections.lock().await.insert(conn, ConnectionData::new(device_id));
    }

    /// Removes a connection entirely. Called once its read loop ends.
    pub async fn remove(&self, conn: ConnectionId) -> Option<ConnectionData> {
        self.connections.lock().await.remove(&conn)
    }

    /// Tags a connection with its role and room on first successful
    /// `room:create` or `room:join`. `player_id` is `None` for the TV
    /// connection.
    pub async fn bind(
        &self,
        conn: ConnectionId,
        role: Role,
        room_code: RoomCode,
        player_id: Option<PlayerId>,
    ) {
        let mut connections = self.connections.lock().await;
        let entry = connections.entry(conn).or_insert_with(|| ConnectionData::new(None));
        entry.role = Some(role);
        entry.room_code = Some(room_code);
        entry.player_id = player_id;
    }

    /// Clears the room/player binding (on `room:leave`) while keeping the
    /// connection registered — a socket can create or join a new room
    /// without reconnecting.
    pub async fn unbind(&self, conn: ConnectionId) {
        if let Some(entry) = self.connections.lock().await.get_mut(&conn) {
            entry.room_code = None;
            entry.player_id = None;
        }
    }

    pub async fn get(&self, conn: ConnectionId) -> Option<ConnectionData> {
        self.connections.lock().await.get(&conn).cloned()
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_then_unbind_clears_room_but_keeps_connection() {
        let registry = ConnectionRegistry::new();
        let conn = ConnectionId(1);
        registry.register(conn, Some("device-1".into())).await;

        let code = RoomCode::from_issued("K7MN2P".into());
        registry.bind(conn, Role::Tv, code.clone(), None).await;
        assert_eq!(registry.get(conn).await.unwrap().room_code, Some(code));

        registry.unbind(conn).await;
        let data = registry.get(conn).await.unwrap();
        assert!(data.room_code.is_none());
        assert_eq!(data.device_id.as_deref(), Some("device-1"));
    }

    #[tokio::test]
    async fn remove_drops_all_metadata() {
        let registry = ConnectionRegistry::new();
        let conn = ConnectionId(2);
        registry.register(conn, None).await;
        registry.remove(conn).await;
        assert!(registry.get(conn).await.is_none());
    }
}
