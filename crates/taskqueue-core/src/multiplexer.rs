//! Worker Multiplexer (§4.3, §9 design note).
//!
//! A single schedule keyed by `next_fire_at` per task `worker_index`, woken
//! by one shared [`tokio::sync::Notify`], in place of a dynamic multi-way
//! receive over one channel per task. This avoids growing a channel set at
//! runtime and scales to many tasks without reshaping a select arm list.
//!
//! Arming a task that is already armed replaces its deadline (the previous
//! entry becomes stale and is discarded silently when it would otherwise
//! fire); disarming removes a task from consideration without disturbing
//! any other task's position, preserving the "indices never shift" rule.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::Notify;
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Tick {
    fire_at: Instant,
    worker_index: usize,
    generation: u64,
}

#[derive(Default)]
struct Inner {
    heap: BinaryHeap<Reverse<Tick>>,
    generation: HashMap<usize, u64>,
    armed: HashSet<usize>,
}

/// Dynamic set of per-task timers, selected simultaneously via a single
/// wait point instead of a reflect-style select set.
#[derive(Default)]
pub struct Multiplexer {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl Multiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `worker_index`'s timer to fire after `delay`. Replaces any
    /// existing deadline for the same task.
    pub fn arm(&self, worker_index: usize, delay: Duration) {
        let fire_at = Instant::now() + delay;
        {
            let mut inner = self.inner.lock().unwrap();
            let gen_slot = inner.generation.entry(worker_index).or_insert(0);
            *gen_slot += 1;
            let generation = *gen_slot;
            inner.armed.insert(worker_index);
            inner.heap.push(Reverse(Tick {
                fire_at,
                worker_index,
                generation,
            }));
        }
        self.notify.notify_one();
    }

    /// Disarm `worker_index`'s timer; its channel slot remains reserved
    /// (§4.3) but will never fire again until re-armed.
    pub fn disarm(&self, worker_index: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.armed.remove(&worker_index);
    }

    /// Force the wait loop to recompute without arming anything, used when
    /// the registry changes at runtime or leadership is reacquired (§4.3
    /// "refresh channel").
    pub fn refresh(&self) {
        self.notify.notify_one();
    }

    /// Block until the earliest still-armed tick fires, returning its
    /// `worker_index`. Stale ticks (superseded by a later `arm`, or
    /// disarmed since scheduling) are skipped transparently.
    pub async fn wait_for_tick(&self) -> usize {
        loop {
            let next = {
                let inner = self.inner.lock().unwrap();
                inner.heap.peek().map(|Reverse(t)| *t)
            };

            let due = match next {
                None => {
                    self.notify.notified().await;
                    continue;
                }
                Some(tick) => tick,
            };

            tokio::select! {
                _ = tokio::time::sleep_until(due.fire_at) => {
                    let is_live = {
                        let mut inner = self.inner.lock().unwrap();
                        if matches!(inner.heap.peek(), Some(Reverse(t)) if *t == due) {
                            inner.heap.pop();
                        }
                        inner.armed.contains(&due.worker_index)
                            && inner.generation.get(&due.worker_index) == Some(&due.generation)
                    };
                    if is_live {
                        return due.worker_index;
                    }
                }
                _ = self.notify.notified() => {}
            }
        }
    }

    pub fn is_armed(&self, worker_index: usize) -> bool {
        self.inner.lock().unwrap().armed.contains(&worker_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn earliest_armed_task_fires_first() {
        let mux = Multiplexer::new();
        mux.arm(1, Duration::from_millis(50));
        mux.arm(2, Duration::from_millis(5));
        let fired = mux.wait_for_tick().await;
        assert_eq!(fired, 2);
    }

    #[tokio::test]
    async fn disarm_prevents_firing() {
        let mux = Arc::new(Multiplexer::new());
        mux.arm(1, Duration::from_millis(5));
        mux.disarm(1);
        mux.arm(2, Duration::from_millis(20));
        let fired = mux.wait_for_tick().await;
        assert_eq!(fired, 2);
    }

    #[tokio::test]
    async fn rearming_replaces_previous_deadline() {
        let mux = Multiplexer::new();
        mux.arm(1, Duration::from_millis(100));
        // Re-arm much sooner; the stale 100ms entry must not fire first.
        mux.arm(1, Duration::from_millis(5));
        let start = Instant::now();
        let fired = mux.wait_for_tick().await;
        assert_eq!(fired, 1);
        assert!(start.elapsed() < StdDuration::from_millis(50));
    }

    #[tokio::test]
    async fn indices_are_independent_of_arm_order() {
        let mux = Multiplexer::new();
        mux.arm(3, Duration::from_millis(5));
        assert!(mux.is_armed(3));
        assert!(!mux.is_armed(7));
    }
}
