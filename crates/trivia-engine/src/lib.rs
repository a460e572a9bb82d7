//! Wires together the protocol, transport, room, and timer crates into a
//! running trivia game server: one `RoomManager` for lobby operations, one
//! [`engine::GameEngine`] actor per in-progress room, and a connection
//! handler translating [`trivia_protocol::ClientEvent`]s into calls on both.

pub mod archive;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod handler;
pub mod pipeline;
pub mod server;

pub use archive::SessionArchive;
pub use catalog::{Catalog, QuestionProvider};
pub use config::AppConfig;
pub use engine::{GameEngineHandle, GameEngineRegistry};
pub use error::EngineError;
pub use pipeline::QuestionPipeline;
pub use server::{TriviaServer, TriviaServerBuilder};
