use std::{collections::HashMap, time::Duration};

use shared::domain::{MediaKind, Role, Uid};
use tokio::{
    sync::{broadcast, Mutex},
    time::Instant,
};
use tracing::debug;
use transport::TransportEvent;

/// Deduplicated transport event, tagged with the role of the client that
/// observed it. The origin tag identifies the connection, not the subject:
/// the subject's role comes from uid classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomEvent {
    pub origin: Role,
    pub event: TransportEvent,
}

/// Structural identity of an event: type plus subject. Two clients observing
/// the same logical room produce equal keys for the same state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum DedupKey {
    Joined(Uid),
    Left(Uid),
    Published(Uid, MediaKind),
    Unpublished(Uid, MediaKind),
    Connection(bool),
}

fn key_for(event: &TransportEvent) -> DedupKey {
    match *event {
        TransportEvent::UserJoined { uid } => DedupKey::Joined(uid),
        TransportEvent::UserLeft { uid } => DedupKey::Left(uid),
        TransportEvent::UserPublished { uid, kind } => DedupKey::Published(uid, kind),
        TransportEvent::UserUnpublished { uid, kind } => DedupKey::Unpublished(uid, kind),
        TransportEvent::ConnectionChanged { connected } => DedupKey::Connection(connected),
    }
}

/// Process-wide suppression stage between raw transport callbacks and every
/// downstream consumer. Performs identity-based suppression and origin
/// tagging only; no business logic.
pub struct DedupBus {
    window: Duration,
    seen: Mutex<HashMap<DedupKey, Instant>>,
    tx: broadcast::Sender<RoomEvent>,
}

impl DedupBus {
    pub fn new(window: Duration) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.tx.subscribe()
    }

    /// Funnels one raw event through the dedup window. Returns true when the
    /// event was rebroadcast, false when suppressed as a duplicate.
    pub async fn publish(&self, origin: Role, event: TransportEvent) -> bool {
        let key = key_for(&event);
        let now = Instant::now();
        {
            let mut seen = self.seen.lock().await;
            seen.retain(|_, first_seen| now.duration_since(*first_seen) < self.window);
            if seen.contains_key(&key) {
                debug!(origin = %origin, ?event, "bus: duplicate event suppressed");
                return false;
            }
            seen.insert(key, now);
        }

        // Send failure just means no subscriber is attached yet.
        let _ = self.tx.send(RoomEvent { origin, event });
        true
    }

    /// Empties the suppression window. Part of a wholesale session reset; a
    /// fresh join must not inherit suppression state from a prior session.
    pub async fn clear(&self) {
        self.seen.lock().await.clear();
    }

    #[cfg(test)]
    async fn window_len(&self) -> usize {
        self.seen.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined(uid: u32) -> TransportEvent {
        TransportEvent::UserJoined { uid: Uid(uid) }
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_from_second_client_is_suppressed() {
        let bus = DedupBus::new(Duration::from_secs(5));
        let mut rx = bus.subscribe();

        assert!(bus.publish(Role::Video, joined(2_500)).await);
        assert!(!bus.publish(Role::ScreenShare, joined(2_500)).await);

        let event = rx.recv().await.expect("first event");
        assert_eq!(event.origin, Role::Video);
        assert!(rx.try_recv().is_err(), "duplicate must not be rebroadcast");
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_subjects_pass_in_emission_order() {
        let bus = DedupBus::new(Duration::from_secs(5));
        let mut rx = bus.subscribe();

        assert!(bus.publish(Role::Video, joined(1_001)).await);
        assert!(bus.publish(Role::Video, joined(1_002)).await);

        assert_eq!(rx.recv().await.expect("first").event, joined(1_001));
        assert_eq!(rx.recv().await.expect("second").event, joined(1_002));
    }

    #[tokio::test(start_paused = true)]
    async fn publish_and_unpublish_key_on_media_kind() {
        let bus = DedupBus::new(Duration::from_secs(5));

        let audio = TransportEvent::UserPublished {
            uid: Uid(1_001),
            kind: MediaKind::Audio,
        };
        let video = TransportEvent::UserPublished {
            uid: Uid(1_001),
            kind: MediaKind::Video,
        };

        assert!(bus.publish(Role::Video, audio).await);
        assert!(bus.publish(Role::Video, video).await);
        assert!(!bus.publish(Role::Video, audio).await);
    }

    #[tokio::test(start_paused = true)]
    async fn key_expires_after_the_window() {
        let bus = DedupBus::new(Duration::from_secs(5));

        assert!(bus.publish(Role::Video, joined(1_001)).await);
        tokio::time::advance(Duration::from_millis(5_100)).await;
        assert!(bus.publish(Role::Video, joined(1_001)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_keys_are_pruned() {
        let bus = DedupBus::new(Duration::from_secs(5));

        bus.publish(Role::Video, joined(1_001)).await;
        bus.publish(Role::Video, joined(1_002)).await;
        tokio::time::advance(Duration::from_secs(6)).await;
        bus.publish(Role::Video, joined(1_003)).await;

        assert_eq!(bus.window_len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_forgets_the_window() {
        let bus = DedupBus::new(Duration::from_secs(5));

        assert!(bus.publish(Role::Video, joined(1_001)).await);
        bus.clear().await;
        assert!(bus.publish(Role::Video, joined(1_001)).await);
    }
}
