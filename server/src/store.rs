//! Latest-value frame store.
//!
//! Holds exactly one current [`Frame`] behind a mutex together with its
//! publish generation. Waiters capture the generation they last saw and sleep
//! on a [`Notify`] until it moves, so a publish that lands between a waiter's
//! check and its sleep is never missed.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use frame_relay_common::frame::{now_micros, Frame};
use tokio::sync::Notify;
use tracing::trace;

#[derive(Default)]
struct Slot {
    current: Option<Frame>,
    version: u64,
}

/// Outcome of waiting for a publish.
#[derive(Debug, Clone, PartialEq)]
pub enum Wake {
    /// A frame newer than the caller's generation was published.
    Frame(Frame),
    /// Nothing was published before the deadline. Not an error: callers use it
    /// as a keep-alive tick.
    Timeout,
}

#[derive(Default)]
pub struct FrameStore {
    slot: Mutex<Slot>,
    published: Notify,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        // No code panics while holding the lock, so a poisoned slot is still consistent.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the current frame unconditionally and wake every task that is
    /// already waiting. Returns the stored frame with its new generation.
    #[allow(dead_code)]
    pub fn publish(&self, payload: Bytes, captured_at_us: i64) -> Frame {
        self.publish_with(payload, |_| captured_at_us)
    }

    /// Publish stamped with the wall clock, read under the lock so stamps follow
    /// publish order. A clock that has not advanced past the previous frame
    /// yields previous + 1µs, keeping timestamps strictly increasing.
    pub fn publish_now(&self, payload: Bytes) -> Frame {
        self.publish_with(payload, |prev| {
            let now = now_micros();
            match prev {
                Some(prev) if now <= prev.captured_at_us => prev.captured_at_us + 1,
                _ => now,
            }
        })
    }

    /// The one publish path. `stamp` sees the previous frame and runs under
    /// the slot lock.
    fn publish_with(&self, payload: Bytes, stamp: impl FnOnce(Option<&Frame>) -> i64) -> Frame {
        let frame = {
            let mut slot = self.lock();
            let captured_at_us = stamp(slot.current.as_ref());
            slot.version += 1;
            let frame = Frame {
                payload,
                captured_at_us,
                version: slot.version,
            };
            slot.current = Some(frame.clone());
            frame
        };
        trace!(version = frame.version, bytes = frame.len(), "frame published");
        self.published.notify_waiters();
        frame
    }

    /// Current frame, or `None` before the first publish. Never blocks on a publish.
    pub fn read(&self) -> Option<Frame> {
        self.lock().current.clone()
    }

    pub fn version(&self) -> u64 {
        self.lock().version
    }

    /// Wait for the next publish after this call. Publishes that happened
    /// before the call are not seen.
    #[allow(dead_code)]
    pub async fn await_next(&self, timeout: Duration) -> Wake {
        let seen = self.version();
        self.await_after(seen, timeout).await
    }

    /// Wait until the generation moves past `seen`, returning immediately if it
    /// already has.
    pub async fn await_after(&self, seen: u64, timeout: Duration) -> Wake {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.published.notified();
            tokio::pin!(notified);
            // Register interest before checking, so a publish after the check
            // still wakes this waiter.
            notified.as_mut().enable();

            if let Some(frame) = self.newer_than(seen) {
                return Wake::Frame(frame);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Wake::Timeout;
            }
        }
    }

    fn newer_than(&self, seen: u64) -> Option<Frame> {
        let slot = self.lock();
        if slot.version > seen {
            slot.current.clone()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn read_before_publish_is_empty() {
        let store = FrameStore::new();
        assert!(store.read().is_none());
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn read_returns_kth_publish() {
        let store = FrameStore::new();
        for k in 1..=5u64 {
            let payload = Bytes::from(vec![k as u8; 8]);
            store.publish(payload.clone(), 1_000 * k as i64);
            let frame = store.read().unwrap();
            assert_eq!(frame.payload, payload);
            assert_eq!(frame.captured_at_us, 1_000 * k as i64);
            assert_eq!(frame.version, k);
            assert_eq!(store.version(), k);
        }
    }

    #[test]
    fn publish_now_stamps_strictly_increase() {
        let store = FrameStore::new();
        let mut last = i64::MIN;
        for _ in 0..100 {
            let frame = store.publish_now(Bytes::from_static(b"x"));
            assert!(frame.captured_at_us > last);
            last = frame.captured_at_us;
        }
    }

    #[test]
    fn publish_now_never_goes_behind_a_future_stamp() {
        let store = FrameStore::new();
        let future = now_micros() + 60_000_000;
        store.publish(Bytes::from_static(b"a"), future);
        let frame = store.publish_now(Bytes::from_static(b"b"));
        assert_eq!(frame.captured_at_us, future + 1);
    }

    #[test]
    fn both_publish_entry_points_share_one_generation() {
        let store = FrameStore::new();
        assert_eq!(store.publish(Bytes::from_static(b"a"), 5).version, 1);
        let frame = store.publish_now(Bytes::from_static(b"b"));
        assert_eq!(frame.version, 2);
        assert!(frame.captured_at_us > 5);
        assert_eq!(store.read(), Some(frame));
        assert_eq!(store.version(), 2);
    }

    #[tokio::test]
    async fn waiter_started_before_publish_is_woken() {
        let store = Arc::new(FrameStore::new());
        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.await_next(Duration::from_secs(5)).await })
        };
        // Let the waiter register before publishing.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        store.publish(Bytes::from_static(b"frame-1"), 42);

        match waiter.await.unwrap() {
            Wake::Frame(frame) => {
                assert_eq!(frame.captured_at_us, 42);
                assert_eq!(frame.payload, Bytes::from_static(b"frame-1"));
            }
            Wake::Timeout => panic!("waiter missed the publish"),
        }
    }

    #[tokio::test]
    async fn await_after_sees_publish_that_raced_ahead() {
        let store = FrameStore::new();
        let seen = store.version();
        // Publish lands between the caller capturing its generation and waiting.
        store.publish(Bytes::from_static(b"raced"), 7);
        let wake = store.await_after(seen, Duration::from_millis(10)).await;
        assert!(matches!(wake, Wake::Frame(f) if f.captured_at_us == 7));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_a_tick_and_waiting_still_works_afterwards() {
        let store = FrameStore::new();
        assert_eq!(store.await_next(Duration::from_secs(10)).await, Wake::Timeout);

        // join! polls the waiter first, so it is parked before the publish runs.
        let (wake, _) = tokio::join!(store.await_next(Duration::from_secs(10)), async {
            tokio::task::yield_now().await;
            store.publish(Bytes::from_static(b"after-timeout"), 9)
        });
        assert!(matches!(wake, Wake::Frame(f) if f.version == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn earlier_publish_is_not_seen_retroactively() {
        let store = FrameStore::new();
        store.publish(Bytes::from_static(b"old"), 1);
        assert_eq!(store.await_next(Duration::from_secs(1)).await, Wake::Timeout);
    }

    #[tokio::test]
    async fn every_waiter_is_woken_by_one_publish() {
        let store = Arc::new(FrameStore::new());
        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let seen = store.version();
                tokio::spawn(async move { store.await_after(seen, Duration::from_secs(5)).await })
            })
            .collect();
        store.publish(Bytes::from_static(b"fan-out"), 100);
        for waiter in waiters {
            assert!(matches!(waiter.await.unwrap(), Wake::Frame(f) if f.captured_at_us == 100));
        }
    }
}
