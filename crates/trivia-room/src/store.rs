//! `RoomStore`: single-writer, read-modify-write access to a `Room` by
//! code, backed by a key-value [`Cache`].
//!
//! An external KV cache is a future deployment concern this repo doesn't
//! vendor a Redis client for, so [`InMemoryCache`] is the only
//! implementation: a plain `HashMap` behind one lock for the lifetime of
//! a process.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use trivia_protocol::{Room, RoomCode};

use crate::config::ROOM_TTL;
use crate::error::RoomError;

/// Minimal async KV + set cache the room layout needs. `set_*`
/// TTLs are not separately tracked here — `active:rooms` membership is
/// maintained by room lifecycle (`create`/`delete`), not by expiry.
pub trait Cache: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Option<String>;

    /// Atomic set-if-absent. Returns `false` if `key` already existed.
    async fn set_if_absent(&self, key: &str, value: String, ttl: std::time::Duration) -> bool;

    async fn set(&self, key: &str, value: String, ttl: std::time::Duration);

    async fn delete(&self, key: &str);

    async fn set_add(&self, set_key: &str, member: &str);

    async fn set_remove(&self, set_key: &str, member: &str);
}

/// A process-local cache behind one `Mutex<HashMap>`. TTLs are recorded
/// but never swept in the background — no background job sweeps; expiry
/// relies on the cache.
#[derive(Default)]
pub struct InMemoryCache {
    values: Mutex<HashMap<String, String>>,
    sets: Mutex<HashMap<String, HashSet<String>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        self.values.lock().await.get(key).cloned()
    }

    async fn set_if_absent(&self, key: &str, value: String, _ttl: std::time::Duration) -> bool {
        let mut values = self.values.lock().await;
        if values.contains_key(key) {
            return false;
        }
        values.insert(key.to_string(), value);
        true
    }

    async fn set(&self, key: &str, value: String, _ttl: std::time::Duration) {
        self.values.lock().await.insert(key.to_string(), value);
    }

    async fn delete(&self, key: &str) {
        self.values.lock().await.remove(key);
    }

    async fn set_add(&self, set_key: &str, member: &str) {
        self.sets
            .lock()
            .await
            .entry(set_key.to_string())
            .or_default()
            .insert(member.to_string());
    }

    async fn set_remove(&self, set_key: &str, member: &str) {
        if let Some(set) = self.sets.lock().await.get_mut(set_key) {
            set.remove(member);
        }
    }
}

const ACTIVE_ROOMS_KEY: &str = "active:rooms";

fn room_key(code: &RoomCode) -> String {
    format!("room:{code}")
}

/// Typed front door onto a [`Cache`], serializing `Room` records as JSON
/// and enforcing a per-code critical section: `Update` acquires a lock
/// keyed by `code` for the duration of read-decide-write, a sharded
/// complement to the cache's own internal lock.
pub struct RoomStore<C: Cache> {
    cache: C,
    locks: Mutex<HashMap<RoomCode, Arc<Mutex<()>>>>,
}

impl<C: Cache> RoomStore<C> {
    pub fn new(cache: C) -> Self {
        Self { cache, locks: Mutex::new(HashMap::new()) }
    }

    async fn lock_for(&self, code: &RoomCode) -> Arc<Mutex<()>> {
        self.locks.lock().await.entry(code.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Set-if-absent with TTL; adds `code` to `active:rooms`. Fails with
    /// [`RoomError::Conflict`] if the key already exists.
    pub async fn create(&self, room: &Room) -> Result<(), RoomError> {
        let serialized = serde_json::to_string(room)
            .map_err(|e| RoomError::ServiceUnavailable(format!("serialize room: {e}")))?;
        let created = self.cache.set_if_absent(&room_key(&room.code), serialized, ROOM_TTL).await;
        if !created {
            return Err(RoomError::Conflict("room code already in use".to_string()));
        }
        self.cache.set_add(ACTIVE_ROOMS_KEY, room.code.as_str()).await;
        Ok(())
    }

    pub async fn get(&self, code: &RoomCode) -> Result<Room, RoomError> {
        let raw = self.cache.get(&room_key(code)).await.ok_or_else(|| RoomError::NotFound(code.clone()))?;
        serde_json::from_str(&raw).map_err(|e| RoomError::ServiceUnavailable(format!("deserialize room: {e}")))
    }

    /// Acquires the per-code lock, fetches, applies `mutator`, writes back
    /// with a refreshed TTL. `mutator` returns the value threaded back to
    /// the caller alongside the post-mutation room.
    pub async fn update<T>(
        &self,
        code: &RoomCode,
        mutator: impl FnOnce(&mut Room) -> Result<T, RoomError>,
    ) -> Result<(Room, T), RoomError> {
        let lock = self.lock_for(code).await;
        let _guard = lock.lock().await;

        let mut room = self.get(code).await?;
        let outcome = mutator(&mut room)?;

        let serialized = serde_json::to_string(&room)
            .map_err(|e| RoomError::ServiceUnavailable(format!("serialize room: {e}")))?;
        self.cache.set(&room_key(code), serialized, ROOM_TTL).await;
        Ok((room, outcome))
    }

    pub async fn delete(&self, code: &RoomCode) {
        self.cache.delete(&room_key(code)).await;
        self.cache.set_remove(ACTIVE_ROOMS_KEY, code.as_str()).await;
        self.locks.lock().await.remove(code);
    }
}
