//! Lease-based leader election shared by the persistence engines
//!
//! One election key maps to at most one holder. `campaign` blocks until the
//! caller acquires the lease; the returned [`LeaderLease`] signals loss when
//! the lease is resigned, dropped, or expires without renewal. A background
//! task renews the lease while the holder is alive, so in practice expiry
//! only fires when the holding task is gone.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tracing::debug;

struct Holder {
    candidate: String,
    epoch: u64,
    expires_at: Instant,
    lost_tx: watch::Sender<bool>,
}

#[derive(Default)]
struct ElectionState {
    holder: Option<Holder>,
    released: Arc<Notify>,
}

/// In-process election table keyed by election key
#[derive(Default)]
pub(crate) struct ElectionHub {
    states: Mutex<HashMap<String, ElectionState>>,
    epoch: Mutex<u64>,
}

impl ElectionHub {
    /// Block until the candidate acquires the key, returning the loss
    /// channel and the epoch identifying this acquisition.
    pub(crate) async fn campaign(
        self: &Arc<Self>,
        key: &str,
        candidate: &str,
        ttl: Duration,
    ) -> (watch::Receiver<bool>, u64) {
        loop {
            let (released, expires_at) = {
                let mut states = self.states.lock();
                let state = states.entry(key.to_string()).or_default();
                let now = Instant::now();
                let current = state
                    .holder
                    .as_ref()
                    .filter(|holder| holder.expires_at > now)
                    .map(|holder| holder.expires_at);
                match current {
                    Some(expires_at) => (state.released.clone(), expires_at),
                    None => {
                        if let Some(holder) = state.holder.take() {
                            debug!(
                                "election {}: lease of {} expired, taking over",
                                key, holder.candidate
                            );
                            let _ = holder.lost_tx.send(true);
                        }
                        let epoch = {
                            let mut next = self.epoch.lock();
                            *next += 1;
                            *next
                        };
                        let (lost_tx, lost_rx) = watch::channel(false);
                        state.holder = Some(Holder {
                            candidate: candidate.to_string(),
                            epoch,
                            expires_at: now + ttl,
                            lost_tx,
                        });
                        self.spawn_keepalive(key.to_string(), epoch, ttl);
                        debug!("election {}: {} acquired lease", key, candidate);
                        return (lost_rx, epoch);
                    }
                }
            };

            tokio::select! {
                _ = released.notified() => {}
                _ = tokio::time::sleep_until((expires_at + Duration::from_millis(10)).into()) => {}
            }
        }
    }

    /// Release the lease if it is still held under the given epoch
    ///
    /// The cleanup (which erases the stored identity) runs under the hub
    /// lock and only when the epoch still matches, so a stale lease can
    /// never wipe the record of a newer holder, and waiters only wake
    /// after the key is gone.
    pub(crate) fn release(&self, key: &str, epoch: u64, cleanup: impl FnOnce()) {
        let mut states = self.states.lock();
        if let Some(state) = states.get_mut(key) {
            if state.holder.as_ref().map(|h| h.epoch) == Some(epoch) {
                if let Some(holder) = state.holder.take() {
                    let _ = holder.lost_tx.send(true);
                    debug!("election {}: {} released lease", key, holder.candidate);
                }
                cleanup();
                state.released.notify_waiters();
            }
        }
    }

    fn spawn_keepalive(self: &Arc<Self>, key: String, epoch: u64, ttl: Duration) {
        let hub = Arc::clone(self);
        let period = ttl / 3;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                let mut states = hub.states.lock();
                match states.get_mut(&key).and_then(|s| s.holder.as_mut()) {
                    Some(holder) if holder.epoch == epoch => {
                        holder.expires_at = Instant::now() + ttl;
                    }
                    _ => break,
                }
            }
        });
    }
}

/// Held leadership over an election key
///
/// Loss is observed through [`LeaderLease::lost`]; dropping the lease
/// resigns it.
pub struct LeaderLease {
    key: String,
    candidate: String,
    epoch: u64,
    lost_rx: watch::Receiver<bool>,
    hub: Arc<ElectionHub>,
    cleanup: Option<Box<dyn FnOnce() + Send>>,
}

impl LeaderLease {
    pub(crate) fn new(
        key: String,
        candidate: String,
        epoch: u64,
        lost_rx: watch::Receiver<bool>,
        hub: Arc<ElectionHub>,
        cleanup: Box<dyn FnOnce() + Send>,
    ) -> Self {
        Self {
            key,
            candidate,
            epoch,
            lost_rx,
            hub,
            cleanup: Some(cleanup),
        }
    }

    /// Identity this lease was acquired with
    pub fn candidate(&self) -> &str {
        &self.candidate
    }

    /// Resolves when leadership is gone (resigned, dropped, or expired)
    pub async fn lost(&mut self) {
        while !*self.lost_rx.borrow() {
            if self.lost_rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Give up leadership explicitly
    pub fn resign(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            self.hub.release(&self.key, self.epoch, cleanup);
        }
    }
}

impl Drop for LeaderLease {
    fn drop(&mut self) {
        self.release();
    }
}
