//! Kill deadlines, keyed by the victim's durable session id.
//!
//! Each armed timer is a tokio task racing a sleep against a cancel signal.
//! The registry entry holds the sending half; removing the entry (cancel or
//! re-arm) drops it, which wakes and ends the task.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;

struct ArmedTimer {
    id: u64,
    _cancel: oneshot::Sender<()>,
}

/// Registry of armed kill timers. At most one per victim session.
pub struct KillTimers {
    timers: DashMap<String, ArmedTimer>,
    next_id: AtomicU64,
}

impl Default for KillTimers {
    fn default() -> Self {
        Self::new()
    }
}

impl KillTimers {
    pub fn new() -> Self {
        Self {
            timers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Arm a timer for `victim_session`, replacing any timer already armed
    /// for it. `on_fire` runs once, after `delay`, unless cancelled first.
    pub fn arm<F, Fut>(self: &Arc<Self>, victim_session: &str, delay: Duration, on_fire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let key = victim_session.to_string();

        // Registered before the task exists so a zero delay cannot fire
        // ahead of its own entry.
        if self
            .timers
            .insert(
                key.clone(),
                ArmedTimer {
                    id,
                    _cancel: cancel_tx,
                },
            )
            .is_some()
        {
            tracing::warn!(victim_session = %key, "replaced an already armed kill timer");
        }

        let timers = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel_rx => return,
            }
            if timers.timers.remove_if(&key, |_, t| t.id == id).is_none() {
                return;
            }
            tracing::debug!(victim_session = %key, "kill timer fired");
            on_fire().await;
        });
    }

    /// Cancel the timer for `victim_session`. Returns whether one was armed.
    /// Safe to call for timers that already fired or were cancelled.
    pub fn cancel(&self, victim_session: &str) -> bool {
        self.timers.remove(victim_session).is_some()
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}
