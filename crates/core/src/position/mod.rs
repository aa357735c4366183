use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

/// Musical position reported by a timeline beat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MusicPosition {
    pub bar: i32,
    pub beat: i32,
}

impl MusicPosition {
    pub fn new(bar: i32, beat: i32) -> Self {
        Self { bar, beat }
    }
}

/// Latest-value cell shared between the audio callback thread and the render
/// loop.
///
/// Writers overwrite the whole pair under one lock and readers copy it out
/// under the same lock, so a reader never sees `bar` and `beat` from
/// different updates. Clones share the same cell.
#[derive(Debug, Clone, Default)]
pub struct MusicPositionCache {
    shared: Arc<Mutex<MusicPosition>>,
}

impl MusicPositionCache {
    /// Creates a cache holding `(0, 0)`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the stored pair. Safe to call from middleware worker threads.
    pub fn set_position(&self, bar: i32, beat: i32) {
        *self.lock() = MusicPosition { bar, beat };
    }

    /// Copies out the most recent pair.
    pub fn position(&self) -> MusicPosition {
        *self.lock()
    }

    // Both fields are assigned together while the guard is held, so a
    // poisoned lock still holds a complete pair.
    fn lock(&self) -> MutexGuard<'_, MusicPosition> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Barrier,
        },
        thread,
    };

    use super::*;

    #[test]
    fn starts_at_origin() {
        assert_eq!(MusicPositionCache::new().position(), MusicPosition::new(0, 0));
    }

    #[test]
    fn last_write_wins() {
        let cache = MusicPositionCache::new();
        cache.set_position(3, 1);
        cache.set_position(4, 2);
        assert_eq!(cache.position(), MusicPosition::new(4, 2));
    }

    #[test]
    fn clones_share_state() {
        let cache = MusicPositionCache::new();
        let writer = cache.clone();
        thread::spawn(move || writer.set_position(12, 3))
            .join()
            .unwrap();
        assert_eq!(cache.position(), MusicPosition::new(12, 3));
    }

    #[test]
    fn concurrent_readers_never_see_torn_pairs() {
        const WRITERS: i32 = 8;
        const READERS: usize = 4;
        const ROUNDS: i32 = 2_000;

        let cache = MusicPositionCache::new();
        let done = Arc::new(AtomicBool::new(false));
        let barrier = Arc::new(Barrier::new(WRITERS as usize + READERS));

        let readers: Vec<_> = (0..READERS)
            .map(|_| {
                let cache = cache.clone();
                let done = Arc::clone(&done);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let mut observed = 0usize;
                    while !done.load(Ordering::Acquire) {
                        let MusicPosition { bar, beat } = cache.position();
                        assert_eq!(bar, beat, "torn read: ({bar}, {beat})");
                        assert!((0..WRITERS * ROUNDS).contains(&bar));
                        observed += 1;
                    }
                    observed
                })
            })
            .collect();

        let writers: Vec<_> = (0..WRITERS)
            .map(|writer| {
                let cache = cache.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for round in 0..ROUNDS {
                        let value = writer * ROUNDS + round;
                        cache.set_position(value, value);
                    }
                })
            })
            .collect();

        for writer in writers {
            writer.join().unwrap();
        }
        done.store(true, Ordering::Release);
        for reader in readers {
            reader.join().unwrap();
        }

        let last = cache.position();
        assert_eq!(last.bar, last.beat);
    }
}
