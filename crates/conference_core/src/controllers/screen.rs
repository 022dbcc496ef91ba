use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use shared::{
    domain::{MediaKind, Role},
    error::{SessionError, SessionResult},
};
use transport::{MediaDeviceProvider, TransportClientFactory};

use crate::{tracks, tracks::TrackFactory, EngineContext};

use super::{media::MediaCore, ControllerState, JoinParams};

/// Screen-share session. Capture is acquired before the transport join: a
/// dismissed capture dialog aborts the whole join instead of leaving a
/// dangling media connection with nothing to publish.
pub struct ScreenController {
    core: Arc<MediaCore>,
    tracks: TrackFactory,
    pause_busy: AtomicBool,
}

impl ScreenController {
    pub fn new(
        ctx: Arc<EngineContext>,
        factory: Arc<dyn TransportClientFactory>,
        devices: Arc<dyn MediaDeviceProvider>,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: MediaCore::new(Role::ScreenShare, &[MediaKind::Video], ctx, factory),
            tracks: TrackFactory::new(devices),
            pause_busy: AtomicBool::new(false),
        })
    }

    pub async fn state(&self) -> ControllerState {
        self.core.state().await
    }

    pub async fn join(&self, params: JoinParams) -> SessionResult<()> {
        if !self.core.begin_join().await {
            return Ok(());
        }

        let track = match self.tracks.create_screen_track().await {
            Ok(track) => track,
            Err(err) => return Err(self.core.fail_join(err).await),
        };

        if let Err(err) = self.core.connect(&params).await {
            tracks::release(track.as_ref());
            return Err(self.core.fail_join(err).await);
        }

        let Some(client) = self.core.client().await else {
            tracks::release(track.as_ref());
            return Err(
                self.core
                    .fail_join(SessionError::transport("transport client missing"))
                    .await,
            );
        };
        if let Err(err) = client.publish(Arc::clone(&track)).await {
            tracks::release(track.as_ref());
            return Err(
                self.core
                    .fail_join(SessionError::transport(err.to_string()))
                    .await,
            );
        }
        if let Some(previous) = self
            .core
            .ctx
            .store
            .put_local_track(Role::ScreenShare, MediaKind::Video, track)
            .await
        {
            tracks::release(previous.as_ref());
        }

        if !self.core.finish_join().await {
            return Err(self
                .core
                .fail_join(SessionError::transport("join cancelled by concurrent leave"))
                .await);
        }
        Ok(())
    }

    pub async fn leave(&self) {
        self.core.leave().await;
    }

    /// Same debounce contract as the video toggles: Ok(true) means exactly
    /// one state change was applied.
    pub async fn set_paused(&self, paused: bool) -> SessionResult<bool> {
        if self.core.state().await != ControllerState::Joined {
            return Err(SessionError::transport(
                "screen pause requires an active session",
            ));
        }
        if self
            .pause_busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(false);
        }
        let applied = self.core.ctx.store.set_screen_paused(paused).await;
        self.pause_busy.store(false, Ordering::SeqCst);
        Ok(applied)
    }
}
