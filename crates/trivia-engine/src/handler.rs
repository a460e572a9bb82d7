//! Per-connection handler: decode envelopes, route them to the room manager
//! or the room's game engine, and reply with an `Ack`.
//!
//! There is no handshake step — a connection's [`Role`] is tagged the
//! moment its first `room:create` or `room:join` succeeds, tracked in
//! [`ConnectionRegistry`] rather than a session manager, since there is no
//! reconnection token to keep in sync (`rejoinRoom` matches by name
//! instead).

use std::sync::Arc;

use trivia_connection::ConnectionRegistry;
use trivia_protocol::{
    Ack, Codec, ClientEnvelope, ClientEvent, ConnectionId, JoinKind as WireJoinKind, PlayerId, Role,
    Room, RoomCode, RoomPublic,
};
use trivia_room::{Cache, JoinKind, JoinOutcome, RoomError};
use trivia_transport::{Connection, EventBus, WebSocketConnection};

use crate::archive::SessionArchive;
use crate::catalog::{Catalog, QuestionProvider};
use crate::error::EngineError;
use crate::server::ServerState;

fn parse_room_code(raw: &str) -> Result<RoomCode, EngineError> {
    RoomCode::parse(raw).map_err(|e| EngineError::Room(RoomError::Validation(e)))
}

fn ack_data(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}

/// Shapes a room for an ack addressed to `role`. A TV gets the raw room,
/// correct answers included; a player gets [`RoomPublic`] so the join/rejoin
/// ack can never carry a question's `correct_answer`.
fn room_payload(role: Role, room: &Room) -> serde_json::Value {
    match role {
        Role::Tv => serde_json::json!(room),
        Role::Player => serde_json::json!(RoomPublic::from(room)),
    }
}

async fn resolve_code(registry: &ConnectionRegistry, conn: ConnectionId, payload: Option<String>) -> Result<RoomCode, EngineError> {
    if let Some(raw) = payload {
        return parse_room_code(&raw);
    }
    registry
        .get(conn)
        .await
        .and_then(|d| d.room_code)
        .ok_or_else(|| EngineError::Room(RoomError::Precondition("not currently in a room".to_string())))
}

async fn current_role(registry: &ConnectionRegistry, conn: ConnectionId) -> Role {
    registry.get(conn).await.and_then(|d| d.role).unwrap_or(Role::Player)
}

async fn current_player_id(registry: &ConnectionRegistry, conn: ConnectionId) -> PlayerId {
    registry.get(conn).await.and_then(|d| d.player_id).unwrap_or(conn)
}

fn now_ms() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Handles one connection from accept to close.
pub(crate) async fn handle_connection<C, Cat, Prov, Arch>(
    conn: WebSocketConnection,
    state: Arc<ServerState<C, Cat, Prov, Arch>>,
) -> Result<(), EngineError>
where
    C: Cache,
    Cat: Catalog,
    Prov: QuestionProvider,
    Arch: SessionArchive,
{
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");
    state.registry.register(conn_id, None).await;

    loop {
        let data = match conn.recv().await {
            Ok(Some(data)) => data,
            Ok(None) => {
                tracing::debug!(%conn_id, "connection closed cleanly");
                break;
            }
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "recv error");
                break;
            }
        };

        let envelope: ClientEnvelope = match state.codec.decode(&data) {
            Ok(env) => env,
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "failed to decode client envelope");
                continue;
            }
        };

        let id = envelope.id;
        let ack = match dispatch(&state, conn_id, envelope.event).await {
            Ok(ack) => ack,
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "request failed");
                Ack::err(e.to_string())
            }
        };

        if id != 0 {
            if let Err(e) = state.bus.reply(conn_id, id, ack).await {
                tracing::debug!(%conn_id, error = %e, "failed to deliver reply");
                break;
            }
        }
    }

    on_disconnect(&state, conn_id).await;
    Ok(())
}

/// Runs the cleanup every exit path from the receive loop needs: marks the
/// connection disconnected in whatever room it was bound to, then forgets
/// it entirely.
async fn on_disconnect<C, Cat, Prov, Arch>(state: &Arc<ServerState<C, Cat, Prov, Arch>>, conn: ConnectionId)
where
    C: Cache,
    Cat: Catalog,
    Prov: QuestionProvider,
    Arch: SessionArchive,
{
    if let Some(data) = state.registry.remove(conn).await {
        if let Some(code) = data.room_code {
            let role = data.role.unwrap_or(Role::Player);
            if let Err(e) = state.manager.on_disconnect(&code, conn, role, state.bus.as_ref()).await {
                tracing::debug!(%conn, %code, error = %e, "on_disconnect failed");
            }
            if role == Role::Tv {
                state.engines.handle_for(&code).await.tv_disconnected().await;
            }
        }
    }
    state.bus.unregister(conn).await;
}

async fn dispatch<C, Cat, Prov, Arch>(
    state: &ServerState<C, Cat, Prov, Arch>,
    conn: ConnectionId,
    event: ClientEvent,
) -> Result<Ack, EngineError>
where
    C: Cache,
    Cat: Catalog,
    Prov: QuestionProvider,
    Arch: SessionArchive,
{
    let registry = &state.registry;
    let bus = state.bus.as_ref();

    match event {
        ClientEvent::RoomCreate { host_name, device_id: _ } => {
            let room = state.manager.create_room(conn, host_name, now_ms(), bus).await?;
            registry.bind(conn, Role::Tv, room.code.clone(), None).await;
            bus.broadcast(&room.code, &trivia_protocol::ServerEvent::RoomCreated { room_code: room.code.to_string(), room: room.clone() })
                .await
                .map_err(EngineError::Transport)?;
            Ok(Ack::ok_with(ack_data(serde_json::json!({ "room_code": room.code.as_str() }))))
        }

        ClientEvent::RoomJoin { room_code, kind, player } => {
            let code = parse_room_code(&room_code)?;
            let room_kind = match kind {
                WireJoinKind::Tv => JoinKind::Tv,
                WireJoinKind::Player => JoinKind::Player,
            };
            let outcome = state.manager.join_room(&code, conn, room_kind, player, bus).await?;
            match outcome {
                JoinOutcome::Tv(room) => {
                    registry.bind(conn, Role::Tv, code, None).await;
                    Ok(Ack::ok_with(ack_data(serde_json::json!({ "room": room_payload(Role::Tv, &room) }))))
                }
                JoinOutcome::Player(player, room) => {
                    registry.bind(conn, Role::Player, code, Some(player.id)).await;
                    Ok(Ack::ok_with(ack_data(
                        serde_json::json!({ "player": player, "room": room_payload(Role::Player, &room) }),
                    )))
                }
            }
        }

        ClientEvent::RoomRejoin { room_code, player_name, player_avatar, player_jingle_id } => {
            let code = parse_room_code(&room_code)?;
            let (player, room) = state.manager.rejoin_room(&code, conn, &player_name, player_avatar, player_jingle_id, bus).await?;
            registry.bind(conn, Role::Player, code, Some(player.id)).await;
            Ok(Ack::ok_with(ack_data(
                serde_json::json!({ "player": player, "room": room_payload(Role::Player, &room) }),
            )))
        }

        ClientEvent::RoomLeave { room_code } => {
            let code = resolve_code(registry, conn, room_code).await?;
            state.manager.leave_room(&code, conn, bus).await?;
            registry.unbind(conn).await;
            Ok(Ack::ok())
        }

        ClientEvent::RoomKick { room_code, player_id } => {
            let code = parse_room_code(&room_code)?;
            let role = current_role(registry, conn).await;
            state.manager.kick_player(&code, role, player_id, bus).await?;
            Ok(Ack::ok())
        }

        ClientEvent::RoomUpdateSettings { room_code, settings } => {
            let code = parse_room_code(&room_code)?;
            let role = current_role(registry, conn).await;
            let settings = state.manager.update_settings(&code, role, settings, bus).await?;
            Ok(Ack::ok_with(ack_data(serde_json::json!({ "settings": settings }))))
        }

        ClientEvent::PlayerUpdate { room_code, jingle_id, is_ready } => {
            let code = resolve_code(registry, conn, room_code).await?;
            let player = state.manager.update_player(&code, conn, jingle_id, is_ready, bus).await?;
            Ok(Ack::ok_with(ack_data(serde_json::json!({ "player": player }))))
        }

        ClientEvent::GameStart { room_code } => {
            let code = parse_room_code(&room_code)?;
            let role = current_role(registry, conn).await;
            state.engines.handle_for(&code).await.start_game(role).await?;
            Ok(Ack::ok())
        }

        ClientEvent::GameNextQuestion { room_code } => {
            let code = parse_room_code(&room_code)?;
            let role = current_role(registry, conn).await;
            state.engines.handle_for(&code).await.next_question(role).await?;
            Ok(Ack::ok())
        }

        ClientEvent::GamePause { room_code } => {
            let code = parse_room_code(&room_code)?;
            let role = current_role(registry, conn).await;
            state.engines.handle_for(&code).await.pause(role).await?;
            Ok(Ack::ok())
        }

        ClientEvent::GameResume { room_code } => {
            let code = parse_room_code(&room_code)?;
            let role = current_role(registry, conn).await;
            state.engines.handle_for(&code).await.resume(role).await?;
            Ok(Ack::ok())
        }

        ClientEvent::GameEnd { room_code } => {
            let code = parse_room_code(&room_code)?;
            let role = current_role(registry, conn).await;
            state.engines.handle_for(&code).await.end(role).await?;
            Ok(Ack::ok())
        }

        ClientEvent::GameRestart { room_code } => {
            let code = parse_room_code(&room_code)?;
            let role = current_role(registry, conn).await;
            state.engines.handle_for(&code).await.restart(role).await?;
            Ok(Ack::ok())
        }

        ClientEvent::AnswerSubmit { room_code, answer, timestamp } => {
            let code = parse_room_code(&room_code)?;
            let player_id = current_player_id(registry, conn).await;
            state.engines.handle_for(&code).await.submit_answer(player_id, answer, timestamp).await?;
            Ok(Ack::ok())
        }

        ClientEvent::AnswerTimeout { room_code } => {
            let code = parse_room_code(&room_code)?;
            let role = current_role(registry, conn).await;
            state.engines.handle_for(&code).await.answer_timeout(role).await?;
            Ok(Ack::ok())
        }

        ClientEvent::QuizGenerate { room_code, category, question_count, difficulty, is_custom_topic, topic_id } => {
            let code = parse_room_code(&room_code)?;
            let role = current_role(registry, conn).await;
            let count = state
                .engines
                .handle_for(&code)
                .await
                .generate_quiz(role, category, question_count, difficulty, is_custom_topic.unwrap_or(false), topic_id)
                .await?;
            Ok(Ack::ok_with(ack_data(serde_json::json!({ "question_count": count }))))
        }

        ClientEvent::QuizSelectCategory { room_code, category_id, category_name } => {
            let code = parse_room_code(&room_code)?;
            let role = current_role(registry, conn).await;
            state.engines.handle_for(&code).await.select_category(role, category_id, category_name).await?;
            Ok(Ack::ok())
        }

        ClientEvent::QuizSetOptions { room_code, question_count, difficulty, time_limit } => {
            let code = parse_room_code(&room_code)?;
            let role = current_role(registry, conn).await;
            let settings = state.engines.handle_for(&code).await.set_options(role, question_count, difficulty, time_limit).await?;
            Ok(Ack::ok_with(ack_data(serde_json::json!({ "settings": settings }))))
        }
    }
}
