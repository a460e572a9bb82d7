//! Concrete lobby-shape operations, composing
//! [`RoomStore`], [`AvatarPool`], [`Validator`] and
//! [`trivia_transport::EventBus`].
//!
//! This manager only owns lobby transitions — the phase state machine
//! itself belongs to the game engine layer.

use std::collections::HashMap;

use tokio::sync::Mutex;
use trivia_protocol::{
    ConnectionId, JoinPlayer, Player, PlayerId, Role, Room, RoomCode, RoomSettings,
    RoomSettingsPatch, ServerEvent,
};
use trivia_transport::EventBus;

use crate::avatar::AvatarPool;
use crate::codes::RoomCodeIssuer;
use crate::error::RoomError;
use crate::store::{Cache, RoomStore};
use crate::validator::Validator;

/// Whether a `room:join` is a TV display attaching to an existing room or
/// a player entering the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Tv,
    Player,
}

pub enum JoinOutcome {
    Tv(Room),
    Player(Player, Room),
}

pub struct RoomManager<C: Cache> {
    store: RoomStore<C>,
    avatar_pools: Mutex<HashMap<RoomCode, AvatarPool>>,
}

impl<C: Cache> RoomManager<C> {
    pub fn new(cache: C) -> Self {
        Self { store: RoomStore::new(cache), avatar_pools: Mutex::new(HashMap::new()) }
    }

    pub fn store(&self) -> &RoomStore<C> {
        &self.store
    }

    /// `createRoom`: allocate a code, seed a lobby room with default
    /// settings, and join the host's connection to the room channel as
    /// `Tv`.
    pub async fn create_room(
        &self,
        host_conn: ConnectionId,
        host_name: Option<String>,
        created_at: u64,
        bus: &impl EventBus,
    ) -> Result<Room, RoomError> {
        let code = RoomCodeIssuer::issue(&self.store).await?;
        let room = Room::new(code.clone(), host_conn, host_name, created_at);
        self.store.create(&room).await?;
        self.avatar_pools.lock().await.insert(code.clone(), AvatarPool::new());
        bus.join_room(host_conn, &code, Role::Tv).await;
        Ok(room)
    }

    /// `joinRoom`. A `JoinKind::Tv` join only binds the connection to the
    /// room channel (a second display attaching to an already-created
    /// room); a `JoinKind::Player` join runs the full admission contract:
    /// validate, assign an avatar slot, and register the player.
    pub async fn join_room(
        &self,
        code: &RoomCode,
        conn: ConnectionId,
        kind: JoinKind,
        requested: Option<JoinPlayer>,
        bus: &impl EventBus,
    ) -> Result<JoinOutcome, RoomError> {
        if kind == JoinKind::Tv {
            let room = self.store.get(code).await?;
            bus.join_room(conn, code, Role::Tv).await;
            return Ok(JoinOutcome::Tv(room));
        }

        let requested = requested.ok_or_else(|| RoomError::Validation("Invalid player".to_string()))?;
        Validator::validate_player_name(&requested.name)?;
        Validator::validate_avatar(&requested.avatar)?;

        let (room, player) = self
            .store
            .update(code, |room| {
                if !room.phase.is_joinable() {
                    return Err(RoomError::Conflict("Game already in progress".to_string()));
                }
                if room.players.len() as u32 >= room.settings.max_players {
                    return Err(RoomError::Conflict("Room is full".to_string()));
                }
                if room.player_index_by_name_ci(&requested.name).is_some() {
                    return Err(RoomError::Conflict("Name already taken".to_string()));
                }
                let player = Player {
                    id: conn,
                    name: requested.name.clone(),
                    avatar: requested.avatar.clone(),
                    score: 0,
                    streak: 0,
                    jingle_id: requested.jingle_id.clone(),
                    is_connected: true,
                    is_host: false,
                    is_ready: false,
                };
                room.players.push(player.clone());
                Ok(player)
            })
            .await?;

        self.mark_avatar_in_use(code, &player.avatar).await;
        bus.join_room(conn, code, Role::Player).await;
        let player_count = room.connected_player_count();
        bus.broadcast(code, &ServerEvent::RoomPlayerJoined { player: player.clone(), player_count })
            .await
            .map_err(|e| RoomError::ServiceUnavailable(format!("broadcast room:player-joined: {e}")))?;

        Ok(JoinOutcome::Player(player, room))
    }

    /// `rejoinRoom`: matches by case-insensitive name. If no existing
    /// player and `phase == lobby`, falls through to a fresh join.
    pub async fn rejoin_room(
        &self,
        code: &RoomCode,
        conn: ConnectionId,
        name: &str,
        avatar: Option<String>,
        jingle_id: Option<String>,
        bus: &impl EventBus,
    ) -> Result<(Player, Room), RoomError> {
        let current = self.store.get(code).await?;
        if current.player_index_by_name_ci(name).is_none() {
            if !current.phase.is_joinable() {
                return Err(RoomError::NotFound(code.clone()));
            }
            let avatar = match avatar {
                Some(a) => a,
                None => self.acquire_avatar(code).await,
            };
            let requested = JoinPlayer { name: name.to_string(), avatar, jingle_id };
            return match self.join_room(code, conn, JoinKind::Player, Some(requested), bus).await? {
                JoinOutcome::Player(player, room) => Ok((player, room)),
                JoinOutcome::Tv(_) => unreachable!("join_room with JoinKind::Player never returns Tv"),
            };
        }

        let (room, (old_id, player)) = self
            .store
            .update(code, |room| {
                let idx = room.player_index_by_name_ci(name).ok_or_else(|| RoomError::NotFound(code.clone()))?;
                let old_id = room.players[idx].id;
                room.players[idx].id = conn;
                room.players[idx].is_connected = true;
                if let Some(avatar) = &avatar {
                    room.players[idx].avatar = avatar.clone();
                }
                if jingle_id.is_some() {
                    room.players[idx].jingle_id = jingle_id.clone();
                }
                Ok((old_id, room.players[idx].clone()))
            })
            .await?;

        bus.join_room(conn, code, Role::Player).await;
        bus.broadcast(code, &ServerEvent::RoomPlayerRejoined { old_player_id: old_id, player: player.clone() })
            .await
            .map_err(|e| RoomError::ServiceUnavailable(format!("broadcast room:player-rejoined: {e}")))?;

        Ok((player, room))
    }

    /// `leaveRoom`.
    pub async fn leave_room(&self, code: &RoomCode, conn: ConnectionId, bus: &impl EventBus) -> Result<(), RoomError> {
        let (room, avatar) = self
            .store
            .update(code, |room| {
                let idx = room.player_index_by_id(conn).ok_or_else(|| RoomError::NotFound(code.clone()))?;
                Ok(room.players.remove(idx).avatar)
            })
            .await?;

        self.release_avatar(code, &avatar).await;
        bus.leave_room(conn, code).await;
        bus.broadcast(
            code,
            &ServerEvent::RoomPlayerLeft { player_id: conn, player_count: room.connected_player_count() },
        )
        .await
        .map_err(|e| RoomError::ServiceUnavailable(format!("broadcast room:player-left: {e}")))?;
        Ok(())
    }

    /// `kickPlayer`. Authority rule: `requester_role == Tv` only.
    pub async fn kick_player(
        &self,
        code: &RoomCode,
        requester_role: Role,
        target: PlayerId,
        bus: &impl EventBus,
    ) -> Result<(), RoomError> {
        if requester_role != Role::Tv {
            return Err(RoomError::AuthZ("kick players".to_string()));
        }

        let (room, avatar) = self
            .store
            .update(code, |room| {
                let idx = room.player_index_by_id(target).ok_or_else(|| RoomError::NotFound(code.clone()))?;
                Ok(room.players.remove(idx).avatar)
            })
            .await?;

        self.release_avatar(code, &avatar).await;
        if let Err(e) = bus.emit(target, &ServerEvent::RoomKicked).await {
            tracing::debug!(%code, %target, error = %e, "kicked player's socket was already gone");
        }
        bus.leave_room(target, code).await;
        bus.broadcast(
            code,
            &ServerEvent::RoomPlayerLeft { player_id: target, player_count: room.connected_player_count() },
        )
        .await
        .map_err(|e| RoomError::ServiceUnavailable(format!("broadcast room:player-left: {e}")))?;
        Ok(())
    }

    /// `updateSettings`. Authority rule: `requester_role == Tv` only.
    pub async fn update_settings(
        &self,
        code: &RoomCode,
        requester_role: Role,
        patch: RoomSettingsPatch,
        bus: &impl EventBus,
    ) -> Result<RoomSettings, RoomError> {
        if requester_role != Role::Tv {
            return Err(RoomError::AuthZ("update settings".to_string()));
        }
        Validator::validate_settings(&patch)?;

        let (_, settings) = self
            .store
            .update(code, |room| {
                room.settings.apply_patch(patch);
                Ok(room.settings.clone())
            })
            .await?;

        bus.broadcast(code, &ServerEvent::RoomSettingsUpdated { settings: settings.clone() })
            .await
            .map_err(|e| RoomError::ServiceUnavailable(format!("broadcast room:settings-updated: {e}")))?;
        Ok(settings)
    }

    /// `updatePlayer`.
    pub async fn update_player(
        &self,
        code: &RoomCode,
        conn: ConnectionId,
        jingle_id: Option<String>,
        is_ready: Option<bool>,
        bus: &impl EventBus,
    ) -> Result<Player, RoomError> {
        let (room, player) = self
            .store
            .update(code, |room| {
                let idx = room.player_index_by_id(conn).ok_or_else(|| RoomError::NotFound(code.clone()))?;
                if jingle_id.is_some() {
                    room.players[idx].jingle_id = jingle_id.clone();
                }
                if let Some(ready) = is_ready {
                    room.players[idx].is_ready = ready;
                }
                Ok(room.players[idx].clone())
            })
            .await?;

        bus.broadcast(code, &ServerEvent::RoomPlayerUpdated { player: player.clone() })
            .await
            .map_err(|e| RoomError::ServiceUnavailable(format!("broadcast room:player-updated: {e}")))?;

        let connected: Vec<&Player> = room.players.iter().filter(|p| p.is_connected).collect();
        let all_ready = !connected.is_empty()
            && connected.iter().all(|p| p.is_ready)
            && connected.len() as u32 >= room.settings.min_players;
        if all_ready {
            bus.broadcast(code, &ServerEvent::RoomAllPlayersReady)
                .await
                .map_err(|e| RoomError::ServiceUnavailable(format!("broadcast room:all-players-ready: {e}")))?;
        }

        Ok(player)
    }

    /// `onDisconnect`.
    pub async fn on_disconnect(
        &self,
        code: &RoomCode,
        conn: ConnectionId,
        role: Role,
        bus: &impl EventBus,
    ) -> Result<(), RoomError> {
        if role == Role::Tv {
            bus.broadcast(code, &ServerEvent::RoomTvDisconnected)
                .await
                .map_err(|e| RoomError::ServiceUnavailable(format!("broadcast room:tv-disconnected: {e}")))?;
            return Ok(());
        }

        self.store
            .update(code, |room| {
                if let Some(idx) = room.player_index_by_id(conn) {
                    room.players[idx].is_connected = false;
                }
                Ok(())
            })
            .await?;

        bus.broadcast(code, &ServerEvent::RoomPlayerDisconnected { player_id: conn })
            .await
            .map_err(|e| RoomError::ServiceUnavailable(format!("broadcast room:player-disconnected: {e}")))?;
        Ok(())
    }

    async fn mark_avatar_in_use(&self, code: &RoomCode, avatar: &str) {
        let mut pools = self.avatar_pools.lock().await;
        pools.entry(code.clone()).or_insert_with(AvatarPool::new).mark_in_use(avatar);
    }

    async fn release_avatar(&self, code: &RoomCode, avatar: &str) {
        if let Some(pool) = self.avatar_pools.lock().await.get_mut(code) {
            pool.release(avatar);
        }
    }

    /// Used only by `rejoinRoom`'s implicit-join path, where the client
    /// didn't send an avatar.
    async fn acquire_avatar(&self, code: &RoomCode) -> String {
        let mut pools = self.avatar_pools.lock().await;
        pools.entry(code.clone()).or_insert_with(AvatarPool::new).acquire().to_string()
    }
}
