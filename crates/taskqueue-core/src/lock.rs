//! Distributed lock provider port (§1 out-of-scope collaborators, §4.6).
//!
//! Consumed the way `replicante_coordinator`'s `NonBlockingLock` is consumed
//! by its callers (acquire/check/release, auto-released if the holder is
//! lost) but reshaped around async channels instead of blocking calls, and
//! around the source's "single active instance drains a shared queue"
//! leadership model rather than general mutual exclusion.

use async_trait::async_trait;
use tokio::sync::watch;

/// A held (or pending) distributed lock session.
pub struct LockSession {
    /// Emits `true` once the lock is held, `false` if it is lost later.
    pub held: watch::Receiver<bool>,
    /// Kept alive so `held.changed()` only resolves on an explicit
    /// transition, not merely because every sender was dropped.
    _sender: watch::Sender<bool>,
}

impl LockSession {
    pub fn always_held() -> Self {
        let (tx, rx) = watch::channel(true);
        Self {
            held: rx,
            _sender: tx,
        }
    }

    /// Build a session from a coordinator-backed channel pair. `sender` is
    /// kept alive for the same reason `always_held` keeps its own: a real
    /// `SessionLock` implementation lives outside this crate and needs a way
    /// to hand back a session without exposing the private field directly.
    pub fn new(held: watch::Receiver<bool>, sender: watch::Sender<bool>) -> Self {
        Self {
            held,
            _sender: sender,
        }
    }

    pub fn is_held(&self) -> bool {
        *self.held.borrow()
    }
}

/// Distributed leadership provider: only the instance holding the lock
/// actively drains the shared queue (§4.6). `value` identifies the holder
/// (typically an instance id) for observability on the backing store.
#[async_trait]
pub trait SessionLock: Send + Sync {
    /// Block until the lock is acquired (or the attempt is abandoned via
    /// `destroy`), returning a session that reports subsequent loss.
    async fn acquire(&self, value: &str) -> anyhow::Result<LockSession>;

    /// Voluntarily release the lock, e.g. for leadership rotation (§4.6) or
    /// shutdown (§4.6). Safe to call when not currently held.
    async fn release(&self) -> anyhow::Result<()>;

    /// Tear down any persistent lock state held by this provider.
    async fn destroy(&self) -> anyhow::Result<()>;
}

/// Default single-instance provider: always immediately "acquired" and never
/// lost. Used when no distributed coordinator (`USE_CONSUL=false`) is
/// configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLock;

#[async_trait]
impl SessionLock for NoopLock {
    async fn acquire(&self, _value: &str) -> anyhow::Result<LockSession> {
        Ok(LockSession::always_held())
    }

    async fn release(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn destroy(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_lock_is_always_held() {
        let lock = NoopLock;
        let session = lock.acquire("instance-1").await.unwrap();
        assert!(session.is_held());
    }

    #[tokio::test]
    async fn noop_lock_release_and_destroy_are_infallible() {
        let lock = NoopLock;
        lock.release().await.unwrap();
        lock.destroy().await.unwrap();
    }
}
