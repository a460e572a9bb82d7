//! Per-room timer registry for the trivia engine.
//!
//! Each room has at most one single-shot **deadline** (question-end,
//! countdown-end, reveal-advance, ...) and one periodic 1 Hz **tick**
//! stream (countdown display). Both are cancellable `tokio::task`
//! `JoinHandle`s; setting a new deadline or tick stream implicitly aborts
//! whatever was running before.
//!
//! Firings are posted back into the owning room actor's own mailbox rather
//! than invoked as a callback, so every firing is naturally serialized with
//! the room's other commands — the actor re-checks phase/generation under
//! its own single-threaded command loop before acting, which is how a
//! stale fire gets dropped.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use trivia_protocol::RoomCode;

struct RoomTimers {
    generation: u64,
    deadline: Option<JoinHandle<()>>,
    ticks: Option<JoinHandle<()>>,
}

impl RoomTimers {
    fn new() -> Self {
        Self { generation: 0, deadline: None, ticks: None }
    }
}

/// A registry of per-room deadline and tick-stream tasks.
///
/// Generic over `M`, the message type the owning actor's mailbox accepts —
/// this crate has no opinion on what a "room command" looks like, only on
/// scheduling and cancelling the deadline and tick-stream timer shapes.
pub struct TimerRegistry<M: Send + 'static> {
    rooms: Mutex<HashMap<RoomCode, RoomTimers>>,
    _marker: std::marker::PhantomData<fn() -> M>,
}

impl<M: Send + 'static> Default for TimerRegistry<M> {
    fn default() -> Self {
        Self { rooms: Mutex::new(HashMap::new()), _marker: std::marker::PhantomData }
    }
}

impl<M: Send + 'static> TimerRegistry<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels and replaces any existing deadline for `room`, then schedules
    /// `make_event(generation)` to be sent on `tx` after `duration`.
    ///
    /// Returns the new generation number, which the caller can stash on its
    /// in-memory room state to recognize a stale fire without needing this
    /// registry's internals.
    pub async fn set_deadline(
        &self,
        room: RoomCode,
        duration: Duration,
        tx: mpsc::Sender<M>,
        make_event: impl FnOnce(u64) -> M + Send + 'static,
    ) -> u64 {
        let mut rooms = self.rooms.lock().await;
        let entry = rooms.entry(room.clone()).or_insert_with(RoomTimers::new);
        if let Some(handle) = entry.deadline.take() {
            handle.abort();
        }
        entry.generation += 1;
        let generation = entry.generation;

        let room_for_log = room.clone();
        entry.deadline = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let event = make_event(generation);
            if tx.send(event).await.is_err() {
                tracing::debug!(%room_for_log, generation, "deadline fired but room mailbox is closed");
            }
        }));

        generation
    }

    /// Starts a 1 Hz tick stream counting `count, count-1, ..., 0`, then
    /// auto-cancels. `make_tick` is called once per second with the
    /// registry's generation and the remaining count; `make_end` is called
    /// once after the final tick.
    ///
    /// Cancels and replaces any existing tick stream for `room`.
    pub async fn start_ticks(
        &self,
        room: RoomCode,
        count: u32,
        tx: mpsc::Sender<M>,
        make_tick: impl Fn(u64, u32) -> M + Send + Sync + 'static,
        make_end: impl FnOnce(u64) -> M + Send + 'static,
    ) -> u64 {
        let mut rooms = self.rooms.lock().await;
        let entry = rooms.entry(room.clone()).or_insert_with(RoomTimers::new);
        if let Some(handle) = entry.ticks.take() {
            handle.abort();
        }
        entry.generation += 1;
        let generation = entry.generation;

        let room_for_log = room.clone();
        entry.ticks = Some(tokio::spawn(async move {
            let mut remaining = count;
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let event = make_tick(generation, remaining);
                if tx.send(event).await.is_err() {
                    tracing::debug!(%room_for_log, generation, "tick fired but room mailbox is closed");
                    return;
                }
                if remaining == 0 {
                    break;
                }
                remaining -= 1;
            }
            let _ = tx.send(make_end(generation)).await;
        }));

        generation
    }

    /// Cancels both the deadline and the tick stream for `room`, if any.
    /// Synchronous from the caller's perspective: once this returns, the
    /// aborted tasks cannot observe any more `.await` points, so no further
    /// sends can originate from them.
    pub async fn cancel(&self, room: &RoomCode) {
        if let Some(timers) = self.rooms.lock().await.get_mut(room) {
            if let Some(handle) = timers.deadline.take() {
                handle.abort();
            }
            if let Some(handle) = timers.ticks.take() {
                handle.abort();
            }
        }
    }

    /// Tears down every timer for `room` and forgets it entirely. Called on
    /// room deletion.
    pub async fn remove_room(&self, room: &RoomCode) {
        if let Some(timers) = self.rooms.lock().await.remove(room) {
            if let Some(handle) = timers.deadline {
                handle.abort();
            }
            if let Some(handle) = timers.ticks {
                handle.abort();
            }
        }
    }

    /// The current generation for `room` (0 if no timer was ever set).
    pub async fn generation(&self, room: &RoomCode) -> u64 {
        self.rooms.lock().await.get(room).map(|t| t.generation).unwrap_or(0)
    }
}
