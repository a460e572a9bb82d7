//! Per-connection identity tracking for the trivia engine.
//!
//! This crate owns the `roomCode`/`role`/`playerId`/`deviceId` tuple every
//! connection carries, and the tagging that happens on first successful
//! `room:create`/`room:join`.
//!
//! # How it fits in the stack
//!
//! ```text
//! Room Layer (above)   ← uses the registry for authority checks and room membership
//!     ↕
//! Connection Layer (this crate)  ← tracks role/room/player per connection
//!     ↕
//! Protocol Layer (below)  ← provides ConnectionId, PlayerId, Role, RoomCode
//! ```

mod error;
mod registry;

pub use error::ConnectionError;
pub use registry::{ConnectionData, ConnectionRegistry};
