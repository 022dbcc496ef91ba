use std::sync::Arc;

use shared::domain::PresentationMode;
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::store::{SessionStore, StoreChange};

fn layout_relevant(change: &StoreChange) -> bool {
    matches!(
        change,
        StoreChange::LocalUserChanged { .. }
            | StoreChange::LocalUserCleared { .. }
            | StoreChange::RemoteUserAdded { .. }
            | StoreChange::RemoteUserUpdated { .. }
            | StoreChange::RemoteUserRemoved { .. }
            | StoreChange::Reset
    )
}

/// Derives the presentation mode from session state: any screen-share
/// presence, local or remote, switches the layout to screen focus. The mode
/// is a pure function of the store, published through a watch channel so
/// consumers only wake on actual transitions.
pub struct LayoutCoordinator {
    mode: watch::Receiver<PresentationMode>,
    task: JoinHandle<()>,
}

impl LayoutCoordinator {
    pub fn start(store: Arc<SessionStore>) -> Self {
        let (tx, mode) = watch::channel(PresentationMode::Grid);
        let mut changes = store.subscribe_changes();
        let task = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) if layout_relevant(&change) => {
                        let next = if store.screen_share_active().await {
                            PresentationMode::ScreenFocus
                        } else {
                            PresentationMode::Grid
                        };
                        if *tx.borrow() != next {
                            debug!(mode = ?next, "layout: presentation mode changed");
                            let _ = tx.send(next);
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "layout: change stream lagged, recomputing");
                        let next = if store.screen_share_active().await {
                            PresentationMode::ScreenFocus
                        } else {
                            PresentationMode::Grid
                        };
                        let _ = tx.send_if_modified(|mode| {
                            if *mode != next {
                                *mode = next;
                                true
                            } else {
                                false
                            }
                        });
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Self { mode, task }
    }

    pub fn mode(&self) -> watch::Receiver<PresentationMode> {
        self.mode.clone()
    }

    pub fn current(&self) -> PresentationMode {
        *self.mode.borrow()
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use shared::domain::{Role, Uid};

    use crate::store::UserRecord;

    use super::*;

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn screen_share_presence_switches_to_focus() {
        let store = Arc::new(SessionStore::new());
        let layout = LayoutCoordinator::start(store.clone());
        assert_eq!(layout.current(), PresentationMode::Grid);

        store
            .upsert_remote_user(UserRecord::remote(Uid(2_500), Role::ScreenShare))
            .await;
        settle().await;
        assert_eq!(layout.current(), PresentationMode::ScreenFocus);

        store.remove_remote_user(Uid(2_500)).await;
        settle().await;
        assert_eq!(layout.current(), PresentationMode::Grid);
        layout.shutdown();
    }

    #[tokio::test]
    async fn local_screen_session_also_focuses() {
        let store = Arc::new(SessionStore::new());
        let layout = LayoutCoordinator::start(store.clone());

        store
            .record_local_user(UserRecord::local(Uid(2_001), Role::ScreenShare, "me"))
            .await;
        settle().await;
        assert_eq!(layout.current(), PresentationMode::ScreenFocus);

        store.clear_role(Role::ScreenShare).await;
        settle().await;
        assert_eq!(layout.current(), PresentationMode::Grid);
        layout.shutdown();
    }

    #[tokio::test]
    async fn video_only_participants_stay_in_grid() {
        let store = Arc::new(SessionStore::new());
        let layout = LayoutCoordinator::start(store.clone());

        store
            .upsert_remote_user(UserRecord::remote(Uid(1_002), Role::Video))
            .await;
        store
            .upsert_remote_user(UserRecord::remote(Uid(1_003), Role::Video))
            .await;
        settle().await;
        assert_eq!(layout.current(), PresentationMode::Grid);
        layout.shutdown();
    }

    #[tokio::test]
    async fn reset_returns_to_grid() {
        let store = Arc::new(SessionStore::new());
        let layout = LayoutCoordinator::start(store.clone());

        store
            .upsert_remote_user(UserRecord::remote(Uid(2_500), Role::ScreenShare))
            .await;
        settle().await;
        assert_eq!(layout.current(), PresentationMode::ScreenFocus);

        store.reset().await;
        settle().await;
        assert_eq!(layout.current(), PresentationMode::Grid);
        layout.shutdown();
    }
}
