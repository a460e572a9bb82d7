//! Draws fresh room codes and checks them against the store.
//!
//! A draw-and-retry loop over the 30-character alphabet `RoomCode` already
//! validates against, giving up with `CodeExhausted` after 10 attempts.

use rand::Rng;
use trivia_protocol::{RoomCode, ROOM_CODE_ALPHABET, ROOM_CODE_LEN};

use crate::config::CODE_ISSUE_RETRIES;
use crate::error::RoomError;
use crate::store::{Cache, RoomStore};

pub struct RoomCodeIssuer;

impl RoomCodeIssuer {
    /// Draws a code, asks `store` whether it's free, retries up to
    /// [`CODE_ISSUE_RETRIES`] times, then fails with
    /// [`RoomError::CodeExhausted`].
    pub async fn issue<C: Cache>(store: &RoomStore<C>) -> Result<RoomCode, RoomError> {
        for _ in 0..CODE_ISSUE_RETRIES {
            let candidate = Self::draw();
            if matches!(store.get(&candidate).await, Err(RoomError::NotFound(_))) {
                return Ok(candidate);
            }
        }
        Err(RoomError::CodeExhausted)
    }

    fn draw() -> RoomCode {
        let alphabet: Vec<char> = ROOM_CODE_ALPHABET.chars().collect();
        let mut rng = rand::rng();
        let code: String = (0..ROOM_CODE_LEN).map(|_| alphabet[rng.random_range(0..alphabet.len())]).collect();
        RoomCode::from_issued(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCache;

    #[tokio::test]
    async fn issue_draws_a_code_of_the_right_shape() {
        let store = RoomStore::new(InMemoryCache::new());
        let code = RoomCodeIssuer::issue(&store).await.unwrap();
        assert_eq!(code.as_str().len(), ROOM_CODE_LEN);
        assert!(code.as_str().chars().all(|c| ROOM_CODE_ALPHABET.contains(c)));
    }

    #[tokio::test]
    async fn issue_avoids_codes_already_in_the_store() {
        use trivia_protocol::{ConnectionId, Room};

        let store = RoomStore::new(InMemoryCache::new());
        let taken = RoomCodeIssuer::issue(&store).await.unwrap();
        store.create(&Room::new(taken.clone(), ConnectionId(1), None, 0)).await.unwrap();

        for _ in 0..50 {
            let code = RoomCodeIssuer::issue(&store).await.unwrap();
            assert_ne!(code, taken);
        }
    }
}
