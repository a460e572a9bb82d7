//! Per-room avatar assignment. Not shared across rooms — callers own one
//! `AvatarPool` per room code.

use std::collections::HashSet;

use rand::seq::IndexedRandom;
use trivia_protocol::AVATAR_SET;

#[derive(Default)]
pub struct AvatarPool {
    in_use: HashSet<&'static str>,
}

impl AvatarPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an unused avatar chosen pseudorandomly; if every avatar in
    /// [`AVATAR_SET`] is taken, falls back to a random one anyway — rooms
    /// can exceed 16 players.
    pub fn acquire(&mut self) -> &'static str {
        let mut rng = rand::rng();
        let free: Vec<&'static str> =
            AVATAR_SET.iter().copied().filter(|a| !self.in_use.contains(a)).collect();
        let chosen = free.choose(&mut rng).copied().unwrap_or_else(|| {
            *AVATAR_SET.choose(&mut rng).expect("AVATAR_SET is non-empty")
        });
        self.in_use.insert(chosen);
        chosen
    }

    /// Records a client-chosen avatar as taken, so a later [`acquire`]
    /// for this room won't hand it out twice. No-op for a string outside
    /// [`AVATAR_SET`] — `Validator` is what rejects those.
    ///
    /// [`acquire`]: AvatarPool::acquire
    pub fn mark_in_use(&mut self, avatar: &str) {
        if let Some(&canonical) = AVATAR_SET.iter().find(|a| **a == avatar) {
            self.in_use.insert(canonical);
        }
    }

    pub fn release(&mut self, avatar: &str) {
        self.in_use.remove(avatar);
    }

    pub fn reset(&mut self) {
        self.in_use.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_never_repeats_while_capacity_remains() {
        let mut pool = AvatarPool::new();
        let mut seen = HashSet::new();
        for _ in 0..AVATAR_SET.len() {
            let avatar = pool.acquire();
            assert!(seen.insert(avatar), "acquire handed out a duplicate before the pool was exhausted");
        }
    }

    #[test]
    fn release_makes_an_avatar_available_again() {
        let mut pool = AvatarPool::new();
        for _ in 0..AVATAR_SET.len() {
            pool.acquire();
        }
        pool.release(AVATAR_SET[0]);
        assert_eq!(pool.acquire(), AVATAR_SET[0]);
    }

    #[test]
    fn reset_clears_all_assignments() {
        let mut pool = AvatarPool::new();
        for _ in 0..AVATAR_SET.len() {
            pool.acquire();
        }
        pool.reset();
        let mut seen = HashSet::new();
        for _ in 0..AVATAR_SET.len() {
            assert!(seen.insert(pool.acquire()), "reset should have freed every avatar");
        }
    }
}
