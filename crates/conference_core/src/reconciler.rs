use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use shared::domain::{MediaKind, Uid};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info};

/// Seam between the retry scheduler and the controller that owns it.
#[async_trait]
pub trait SubscribeSink: Send + Sync {
    /// One subscription attempt. Returning true resolves the pending entry.
    async fn try_subscribe(&self, uid: Uid, kind: MediaKind) -> bool;
    /// Gate re-checked before every retry; attempts stop mutating anything
    /// once the owning controller has left.
    async fn is_joined(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingSubscription {
    pub uid: Uid,
    pub kind: MediaKind,
    pub attempts: u32,
}

/// Resolves the race between a remote publish notification and local track
/// visibility: a burst of immediate retries at short fixed delays, plus a
/// periodic sweep for entries the burst did not resolve.
pub struct Reconciler {
    pending: Mutex<HashMap<(Uid, MediaKind), PendingSubscription>>,
    immediate_delays: Vec<Duration>,
    max_tracked_attempts: u32,
}

impl Reconciler {
    pub fn new(immediate_delays: Vec<Duration>, max_tracked_attempts: u32) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
            immediate_delays,
            max_tracked_attempts,
        })
    }

    /// Registers a pending entry and spawns the immediate retry burst. A
    /// re-schedule for the same key supersedes the old entry (attempt
    /// counter restarts). The returned handle must be tracked by the owning
    /// controller and aborted on leave.
    pub fn schedule(
        self: &Arc<Self>,
        uid: Uid,
        kind: MediaKind,
        sink: Arc<dyn SubscribeSink>,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            {
                let mut pending = this.pending.lock().await;
                pending.insert((uid, kind), PendingSubscription { uid, kind, attempts: 0 });
            }
            for delay in this.immediate_delays.clone() {
                if !delay.is_zero() {
                    time::sleep(delay).await;
                }
                if this.attempt(uid, kind, sink.as_ref()).await {
                    return;
                }
            }
        })
    }

    /// One attempt against the sink. The entry is taken out of the table
    /// before the subscribe call so a concurrently running path (immediate
    /// burst vs. sweep) finds nothing to act on; on failure it is
    /// re-inserted with a bumped attempt count, but only while the owner is
    /// still joined.
    pub async fn attempt(&self, uid: Uid, kind: MediaKind, sink: &dyn SubscribeSink) -> bool {
        let entry = { self.pending.lock().await.remove(&(uid, kind)) };
        let Some(mut entry) = entry else {
            return true;
        };

        if sink.try_subscribe(uid, kind).await {
            debug!(
                uid = uid.0,
                kind = %kind,
                attempts = entry.attempts,
                "reconciler: pending subscription resolved"
            );
            return true;
        }

        if !sink.is_joined().await {
            debug!(uid = uid.0, kind = %kind, "reconciler: owner left, dropping pending entry");
            return true;
        }

        if entry.attempts < self.max_tracked_attempts {
            entry.attempts += 1;
        }
        self.pending.lock().await.insert((uid, kind), entry);
        false
    }

    /// Periodic sweep over every pending entry. Never resolves entries into
    /// an un-joined controller; misses are silent by design (the remote peer
    /// may have unpublished before the race resolved).
    pub fn start_sweep(
        self: &Arc<Self>,
        interval: Duration,
        sink: Arc<dyn SubscribeSink>,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !sink.is_joined().await {
                    continue;
                }
                let keys: Vec<(Uid, MediaKind)> =
                    this.pending.lock().await.keys().copied().collect();
                for (uid, kind) in keys {
                    this.attempt(uid, kind, sink.as_ref()).await;
                }
            }
        })
    }

    /// Drops one pending entry; called when the remote peer unpublishes
    /// before the race resolved.
    pub async fn cancel_entry(&self, uid: Uid, kind: MediaKind) {
        self.pending.lock().await.remove(&(uid, kind));
    }

    /// Drops every pending entry for the uid; called when the remote
    /// participant leaves.
    pub async fn cancel(&self, uid: Uid) {
        let mut pending = self.pending.lock().await;
        let before = pending.len();
        pending.retain(|(entry_uid, _), _| *entry_uid != uid);
        if pending.len() != before {
            debug!(uid = uid.0, "reconciler: pending entries cancelled for departed user");
        }
    }

    /// Drops everything; called on controller leave.
    pub async fn cancel_all(&self) {
        let mut pending = self.pending.lock().await;
        if !pending.is_empty() {
            info!(
                dropped = pending.len(),
                "reconciler: unresolved pending subscriptions cancelled"
            );
        }
        pending.clear();
    }

    pub async fn is_pending(&self, uid: Uid, kind: MediaKind) -> bool {
        self.pending.lock().await.contains_key(&(uid, kind))
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn attempts_for(&self, uid: Uid, kind: MediaKind) -> Option<u32> {
        self.pending
            .lock()
            .await
            .get(&(uid, kind))
            .map(|entry| entry.attempts)
    }
}
