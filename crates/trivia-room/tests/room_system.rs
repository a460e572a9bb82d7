//! Integration tests for the lobby layer: create/join/leave/rejoin through
//! `RoomManager`, exercised against a recording fake of `EventBus`.

use std::sync::Mutex;

use trivia_protocol::{
    ConnectionId, JoinPlayer, Role, RoomCode, RoomSettingsPatch, ServerEvent,
};
use trivia_room::{InMemoryCache, JoinKind, JoinOutcome, RoomError, RoomManager};
use trivia_transport::{EventBus, TransportError};

#[derive(Default)]
struct RecordingBus {
    broadcasts: Mutex<Vec<(RoomCode, String)>>,
    emits: Mutex<Vec<(ConnectionId, String)>>,
    joined: Mutex<Vec<(ConnectionId, RoomCode, Role)>>,
}

fn event_name(event: &ServerEvent) -> String {
    serde_json::to_value(event).unwrap()["event"].as_str().unwrap().to_string()
}

impl EventBus for RecordingBus {
    async fn join_room(&self, conn: ConnectionId, room: &RoomCode, role: Role) {
        self.joined.lock().unwrap().push((conn, room.clone(), role));
    }
    async fn leave_room(&self, _conn: ConnectionId, _room: &RoomCode) {}
    async fn reply(&self, _conn: ConnectionId, _id: u64, _ack: trivia_protocol::Ack) -> Result<(), TransportError> {
        Ok(())
    }
    async fn emit(&self, conn: ConnectionId, event: &ServerEvent) -> Result<(), TransportError> {
        self.emits.lock().unwrap().push((conn, event_name(event)));
        Ok(())
    }
    async fn broadcast(&self, room: &RoomCode, event: &ServerEvent) -> Result<(), TransportError> {
        self.broadcasts.lock().unwrap().push((room.clone(), event_name(event)));
        Ok(())
    }
    async fn broadcast_except(
        &self,
        room: &RoomCode,
        _exclude: ConnectionId,
        event: &ServerEvent,
    ) -> Result<(), TransportError> {
        self.broadcast(room, event).await
    }
    async fn broadcast_filtered(
        &self,
        room: &RoomCode,
        _exclude_role: Role,
        event: &ServerEvent,
    ) -> Result<(), TransportError> {
        self.broadcast(room, event).await
    }
}

fn join_player(name: &str, avatar: &str) -> JoinPlayer {
    JoinPlayer { name: name.to_string(), avatar: avatar.to_string(), jingle_id: None }
}

/// R1: create, join a player, leave, then rejoin yields a room identical
/// to just-after-create modulo timestamps — same code, same host, an
/// empty roster again.
#[tokio::test]
async fn round_trip_join_leave_rejoin_restores_an_empty_roster() {
    let manager: RoomManager<InMemoryCache> = RoomManager::new(InMemoryCache::new());
    let bus = RecordingBus::default();
    let created = manager.create_room(ConnectionId(1), Some("Host".into()), 1_000, &bus).await.unwrap();
    assert_eq!(created.players.len(), 0);

    let JoinOutcome::Player(_, after_join) = manager
        .join_room(&created.code, ConnectionId(2), JoinKind::Player, Some(join_player("Alice", "🦊")), &bus)
        .await
        .unwrap()
    else {
        panic!("expected a player outcome");
    };
    assert_eq!(after_join.players.len(), 1);

    manager.leave_room(&created.code, ConnectionId(2), &bus).await.unwrap();
    let after_leave = manager.store().get(&created.code).await.unwrap();

    assert_eq!(after_leave.code, created.code);
    assert_eq!(after_leave.host_id, created.host_id);
    assert_eq!(after_leave.players.len(), 0);
    assert_eq!(after_leave.settings.max_players, created.settings.max_players);
}

/// I1: name uniqueness holds across both the `joinRoom` and the
/// implicit-join branch of `rejoinRoom`.
#[tokio::test]
async fn name_uniqueness_holds_across_join_and_rejoin() {
    let manager: RoomManager<InMemoryCache> = RoomManager::new(InMemoryCache::new());
    let bus = RecordingBus::default();
    let room = manager.create_room(ConnectionId(1), None, 0, &bus).await.unwrap();

    manager
        .join_room(&room.code, ConnectionId(2), JoinKind::Player, Some(join_player("Alice", "🦊")), &bus)
        .await
        .unwrap();

    let err = manager.rejoin_room(&room.code, ConnectionId(3), "ALICE", Some("🐼".into()), None, &bus).await;
    // "ALICE" matches the existing "Alice" case-insensitively, so this is
    // a genuine rejoin (rebind), not a second player with a colliding
    // name — both must never coexist.
    assert!(err.is_ok());
    let final_room = manager.store().get(&room.code).await.unwrap();
    assert_eq!(final_room.players.len(), 1);
}

/// B2: joining at `maxPlayers - 1` succeeds; at `maxPlayers` fails with
/// `RoomFull`.
#[tokio::test]
async fn join_boundary_at_max_players() {
    let manager: RoomManager<InMemoryCache> = RoomManager::new(InMemoryCache::new());
    let bus = RecordingBus::default();
    let room = manager.create_room(ConnectionId(1), None, 0, &bus).await.unwrap();
    manager
        .update_settings(&room.code, Role::Tv, RoomSettingsPatch { max_players: Some(2), ..Default::default() }, &bus)
        .await
        .unwrap();

    manager
        .join_room(&room.code, ConnectionId(2), JoinKind::Player, Some(join_player("Alice", "🦊")), &bus)
        .await
        .expect("first of two slots should succeed");

    let err = manager
        .join_room(&room.code, ConnectionId(4), JoinKind::Player, Some(join_player("Carl", "🐯")), &bus)
        .await;
    // only one slot was filled so far (maxPlayers - 1 == 1 connected), the
    // second should still succeed, filling the room to maxPlayers.
    assert!(err.is_ok());

    let err = manager
        .join_room(&room.code, ConnectionId(5), JoinKind::Player, Some(join_player("Dana", "🐻")), &bus)
        .await
        .unwrap_err();
    assert!(matches!(err, RoomError::Conflict(msg) if msg.contains("full")));
}

/// Authority rule: host-only operations are rejected unless the caller's
/// role is `Tv`.
#[tokio::test]
async fn settings_update_requires_tv_role() {
    let manager: RoomManager<InMemoryCache> = RoomManager::new(InMemoryCache::new());
    let bus = RecordingBus::default();
    let room = manager.create_room(ConnectionId(1), None, 0, &bus).await.unwrap();

    let err = manager
        .update_settings(&room.code, Role::Player, RoomSettingsPatch { time_limit: Some(30), ..Default::default() }, &bus)
        .await
        .unwrap_err();
    assert!(matches!(err, RoomError::AuthZ(_)));

    manager
        .update_settings(&room.code, Role::Tv, RoomSettingsPatch { time_limit: Some(30), ..Default::default() }, &bus)
        .await
        .unwrap();
    assert_eq!(manager.store().get(&room.code).await.unwrap().settings.time_limit, 30);
}

/// A TV joining with `JoinKind::Tv` attaches to the room channel without
/// creating a player record.
#[tokio::test]
async fn tv_join_does_not_add_a_player() {
    let manager: RoomManager<InMemoryCache> = RoomManager::new(InMemoryCache::new());
    let bus = RecordingBus::default();
    let room = manager.create_room(ConnectionId(1), None, 0, &bus).await.unwrap();

    let outcome = manager.join_room(&room.code, ConnectionId(9), JoinKind::Tv, None, &bus).await.unwrap();
    assert!(matches!(outcome, JoinOutcome::Tv(_)));
    assert_eq!(manager.store().get(&room.code).await.unwrap().players.len(), 0);
    assert!(bus.joined.lock().unwrap().iter().any(|(c, _, role)| *c == ConnectionId(9) && *role == Role::Tv));
}

/// `onDisconnect` for a player flips `isConnected` but keeps the player
/// record (so a later rejoin can rebind it); for a TV it only broadcasts.
#[tokio::test]
async fn on_disconnect_marks_player_disconnected_without_removing_them() {
    let manager: RoomManager<InMemoryCache> = RoomManager::new(InMemoryCache::new());
    let bus = RecordingBus::default();
    let room = manager.create_room(ConnectionId(1), None, 0, &bus).await.unwrap();
    manager
        .join_room(&room.code, ConnectionId(2), JoinKind::Player, Some(join_player("Alice", "🦊")), &bus)
        .await
        .unwrap();

    manager.on_disconnect(&room.code, ConnectionId(2), Role::Player, &bus).await.unwrap();
    let room_after = manager.store().get(&room.code).await.unwrap();
    assert_eq!(room_after.players.len(), 1, "disconnect must not delete the player");
    assert!(!room_after.players[0].is_connected);

    manager.on_disconnect(&room.code, ConnectionId(1), Role::Tv, &bus).await.unwrap();
    assert!(bus.broadcasts.lock().unwrap().iter().any(|(_, e)| e == "room:tv-disconnected"));
}
