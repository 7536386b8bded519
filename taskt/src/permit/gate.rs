//! Single-slot gate built on a capacity-1 channel.
//!
//! The channel holds the slot while the gate is free. Acquiring receives it,
//! releasing sends it back. The gate is scoped to whoever owns it (normally
//! one `TaskServer`), so independent servers in one process never contend.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, mpsc};

/// The one unit of execution capacity.
#[derive(Debug)]
struct Slot;

struct GateInner {
    slot_tx: mpsc::Sender<Slot>,
    slot_rx: Mutex<mpsc::Receiver<Slot>>,
}

impl GateInner {
    fn return_slot(&self, slot: Slot) {
        if let Err(e) = self.slot_tx.try_send(slot) {
            // Only one slot exists, so a full channel means a double release.
            debug_assert!(false, "gate slot released twice");
            tracing::error!(error = %e, "Bug: gate slot released while already available");
        }
    }
}

/// Non-blocking, single-slot exclusion shared by every connection of a server.
#[derive(Clone)]
pub struct ExecutionGate {
    inner: Arc<GateInner>,
}

impl ExecutionGate {
    pub fn new() -> Self {
        let (slot_tx, slot_rx) = mpsc::channel(1);
        let inner = GateInner {
            slot_tx,
            slot_rx: Mutex::new(slot_rx),
        };
        inner.return_slot(Slot);
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Take the slot if it is free. Never waits and never queues.
    pub fn try_acquire(&self) -> Option<GatePermit> {
        let mut rx = self.inner.slot_rx.try_lock().ok()?;
        let slot = rx.try_recv().ok()?;
        tracing::trace!("Gate acquired");
        Some(GatePermit {
            slot: Some(slot),
            inner: Arc::clone(&self.inner),
            acquired_at: Instant::now(),
        })
    }

    /// True while a permit is outstanding.
    pub fn is_held(&self) -> bool {
        self.inner.slot_tx.capacity() > 0
    }
}

impl Default for ExecutionGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof of holding the gate. The slot goes back on release or drop.
#[must_use = "dropping the permit releases the gate immediately"]
pub struct GatePermit {
    slot: Option<Slot>,
    inner: Arc<GateInner>,
    acquired_at: Instant,
}

impl GatePermit {
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Return the slot to the gate.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.inner.return_slot(slot);
            tracing::trace!(held_for = ?self.acquired_at.elapsed(), "Gate released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn second_acquire_is_rejected() {
        let gate = ExecutionGate::new();
        assert!(!gate.is_held());

        let permit = gate.try_acquire();
        assert!(permit.is_some());
        assert!(gate.is_held());

        assert!(gate.try_acquire().is_none());
    }

    #[test]
    fn release_frees_the_slot() {
        let gate = ExecutionGate::new();

        let permit = gate.try_acquire().unwrap();
        permit.release();
        assert!(!gate.is_held());

        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn drop_frees_the_slot() {
        let gate = ExecutionGate::new();
        {
            let _permit = gate.try_acquire().unwrap();
            assert!(gate.try_acquire().is_none());
        }
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn clones_share_one_slot() {
        let gate = ExecutionGate::new();
        let other = gate.clone();

        let _permit = gate.try_acquire().unwrap();
        assert!(other.try_acquire().is_none());
        assert!(other.is_held());
    }

    #[test]
    fn separate_gates_are_independent() {
        let a = ExecutionGate::new();
        let b = ExecutionGate::new();

        let _pa = a.try_acquire().unwrap();
        assert!(b.try_acquire().is_some());
    }

    #[test]
    fn held_for_grows() {
        let gate = ExecutionGate::new();
        let permit = gate.try_acquire().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(permit.held_for() >= Duration::from_millis(5));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_acquirers_admit_at_most_one() {
        let gate = ExecutionGate::new();
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let gate = gate.clone();
            let running = Arc::clone(&running);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    if let Some(permit) = gate.try_acquire() {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        permit.release();
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(!gate.is_held());
    }
}
