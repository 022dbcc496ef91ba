use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use shared::{
    domain::{MediaKind, Role},
    error::{SessionError, SessionResult},
};
use tracing::warn;
use transport::{LocalMediaTrack, MediaDeviceProvider, TransportClientFactory};

use crate::{tracks, tracks::TrackFactory, EngineContext};

use super::{media::MediaCore, ControllerState, JoinParams, JoinReport};

/// Primary audio/video session. Device acquisition happens after the
/// transport join and is soft: a failed microphone or camera produces a
/// typed warning in the join report, not a failed join.
pub struct VideoController {
    core: Arc<MediaCore>,
    tracks: TrackFactory,
    mic_busy: AtomicBool,
    camera_busy: AtomicBool,
}

impl VideoController {
    pub fn new(
        ctx: Arc<EngineContext>,
        factory: Arc<dyn TransportClientFactory>,
        devices: Arc<dyn MediaDeviceProvider>,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: MediaCore::new(
                Role::Video,
                &[MediaKind::Audio, MediaKind::Video],
                ctx,
                factory,
            ),
            tracks: TrackFactory::new(devices),
            mic_busy: AtomicBool::new(false),
            camera_busy: AtomicBool::new(false),
        })
    }

    pub async fn state(&self) -> ControllerState {
        self.core.state().await
    }

    pub async fn join(&self, params: JoinParams) -> SessionResult<JoinReport> {
        if !self.core.begin_join().await {
            return Ok(JoinReport::default());
        }
        if let Err(err) = self.core.connect(&params).await {
            return Err(self.core.fail_join(err).await);
        }

        let mut report = JoinReport::default();
        match self.tracks.create_microphone_track().await {
            Ok(track) => self.publish_local(MediaKind::Audio, track, &mut report).await,
            Err(err) => {
                warn!(error = %err, "video: joining without microphone");
                report.device_warnings.push(err);
            }
        }
        match self.tracks.create_camera_track().await {
            Ok(track) => self.publish_local(MediaKind::Video, track, &mut report).await,
            Err(err) => {
                warn!(error = %err, "video: joining without camera");
                report.device_warnings.push(err);
            }
        }

        if !self.core.finish_join().await {
            return Err(self
                .core
                .fail_join(SessionError::transport("join cancelled by concurrent leave"))
                .await);
        }
        Ok(report)
    }

    async fn publish_local(
        &self,
        kind: MediaKind,
        track: Arc<dyn LocalMediaTrack>,
        report: &mut JoinReport,
    ) {
        let Some(client) = self.core.client().await else {
            tracks::release(track.as_ref());
            report
                .device_warnings
                .push(SessionError::transport("transport client missing"));
            return;
        };
        match client.publish(Arc::clone(&track)).await {
            Ok(()) => {
                if let Some(previous) = self
                    .core
                    .ctx
                    .store
                    .put_local_track(Role::Video, kind, track)
                    .await
                {
                    tracks::release(previous.as_ref());
                }
            }
            Err(err) => {
                warn!(%kind, error = %err, "video: publish failed, continuing without track");
                tracks::release(track.as_ref());
                report
                    .device_warnings
                    .push(SessionError::transport(err.to_string()));
            }
        }
    }

    pub async fn leave(&self) {
        self.core.leave().await;
    }

    /// Returns Ok(true) when a state change was applied, Ok(false) when the
    /// toggle was a no-op (same target, or a previous toggle still in
    /// flight).
    pub async fn set_microphone_muted(&self, muted: bool) -> SessionResult<bool> {
        self.toggle(&self.mic_busy, "microphone", |store| async move {
            store.set_mic_muted(muted).await
        })
        .await
    }

    pub async fn set_camera_off(&self, off: bool) -> SessionResult<bool> {
        self.toggle(&self.camera_busy, "camera", |store| async move {
            store.set_camera_off(off).await
        })
        .await
    }

    async fn toggle<F, Fut>(&self, busy: &AtomicBool, name: &str, apply: F) -> SessionResult<bool>
    where
        F: FnOnce(Arc<crate::store::SessionStore>) -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        if self.core.state().await != ControllerState::Joined {
            return Err(SessionError::transport(format!(
                "{name} toggle requires an active session"
            )));
        }
        if busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(false);
        }
        let applied = apply(Arc::clone(&self.core.ctx.store)).await;
        busy.store(false, Ordering::SeqCst);
        Ok(applied)
    }
}
