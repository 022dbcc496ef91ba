use std::sync::Arc;

use shared::{
    domain::TrackReadyState,
    error::{ErrorKind, SessionError, SessionResult},
};
use tracing::warn;
use transport::{
    AudioTrackConfig, DeviceError, LocalMediaTrack, MediaDeviceProvider, ScreenTrackConfig,
    VideoTrackConfig,
};

/// Creates, validates, and releases local media tracks. Holds no state
/// beyond the device capability; every returned handle is owned by the
/// calling controller.
pub struct TrackFactory {
    devices: Arc<dyn MediaDeviceProvider>,
}

impl TrackFactory {
    pub fn new(devices: Arc<dyn MediaDeviceProvider>) -> Self {
        Self { devices }
    }

    /// Primary encoder config, one fallback to a minimal config. When both
    /// fail the fallback's error is the one surfaced.
    pub async fn create_microphone_track(&self) -> SessionResult<Arc<dyn LocalMediaTrack>> {
        match self
            .devices
            .create_audio_track(AudioTrackConfig::high_quality())
            .await
        {
            Ok(track) => Ok(track),
            Err(primary) => {
                warn!(error = %primary, "tracks: primary audio config failed, retrying minimal config");
                self.devices
                    .create_audio_track(AudioTrackConfig::minimal())
                    .await
                    .map_err(map_device_error)
            }
        }
    }

    pub async fn create_camera_track(&self) -> SessionResult<Arc<dyn LocalMediaTrack>> {
        match self
            .devices
            .create_video_track(VideoTrackConfig::standard())
            .await
        {
            Ok(track) => Ok(track),
            Err(primary) => {
                warn!(error = %primary, "tracks: primary camera config failed, retrying reduced config");
                self.devices
                    .create_video_track(VideoTrackConfig::reduced())
                    .await
                    .map_err(map_device_error)
            }
        }
    }

    /// Fast-start config, one fallback to low quality. A dismissed capture
    /// dialog is a user decision, not a device failure: no fallback attempt.
    pub async fn create_screen_track(&self) -> SessionResult<Arc<dyn LocalMediaTrack>> {
        match self
            .devices
            .create_screen_track(ScreenTrackConfig::fast_start())
            .await
        {
            Ok(track) => Ok(track),
            Err(DeviceError::Cancelled) => Err(map_device_error(DeviceError::Cancelled)),
            Err(primary) => {
                warn!(error = %primary, "tracks: fast-start screen config failed, retrying low quality");
                self.devices
                    .create_screen_track(ScreenTrackConfig::low_quality())
                    .await
                    .map_err(map_device_error)
            }
        }
    }
}

pub fn is_valid(track: &dyn LocalMediaTrack) -> bool {
    track.supports_playback()
        && !track.is_closed()
        && !matches!(
            track.ready_state(),
            TrackReadyState::Ended | TrackReadyState::Failed
        )
}

/// Idempotent stop+close. Errors from an already-released track are logged
/// and swallowed; release must always leave the handle inert.
pub fn release(track: &dyn LocalMediaTrack) {
    if let Err(err) = track.stop() {
        warn!(kind = %track.kind(), error = %err, "tracks: stop failed during release");
    }
    if let Err(err) = track.close() {
        warn!(kind = %track.kind(), error = %err, "tracks: close failed during release");
    }
}

fn map_device_error(err: DeviceError) -> SessionError {
    match err {
        DeviceError::PermissionDenied(detail) => {
            SessionError::new(ErrorKind::DevicePermissionDenied, detail)
        }
        DeviceError::NotFound(detail) => SessionError::new(ErrorKind::DeviceNotFound, detail),
        DeviceError::Cancelled => SessionError::new(
            ErrorKind::UserCancelled,
            "screen capture dialog dismissed by user",
        ),
        DeviceError::Other(detail) => SessionError::new(ErrorKind::Unknown, detail),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use async_trait::async_trait;
    use shared::domain::MediaKind;
    use tokio::sync::Mutex;

    use super::*;

    struct ScriptedTrack {
        kind: MediaKind,
        enabled: AtomicBool,
        closed: AtomicBool,
        ready: TrackReadyState,
        stops: AtomicU32,
        closes: AtomicU32,
    }

    impl ScriptedTrack {
        fn new(kind: MediaKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                enabled: AtomicBool::new(true),
                closed: AtomicBool::new(false),
                ready: TrackReadyState::Live,
                stops: AtomicU32::new(0),
                closes: AtomicU32::new(0),
            })
        }
    }

    impl LocalMediaTrack for ScriptedTrack {
        fn kind(&self) -> MediaKind {
            self.kind
        }
        fn set_enabled(&self, enabled: bool) {
            self.enabled.store(enabled, Ordering::SeqCst);
        }
        fn is_enabled(&self) -> bool {
            self.enabled.load(Ordering::SeqCst)
        }
        fn ready_state(&self) -> TrackReadyState {
            self.ready
        }
        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
        fn supports_playback(&self) -> bool {
            true
        }
        fn stop(&self) -> anyhow::Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn close(&self) -> anyhow::Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct ScriptedDevices {
        audio: Mutex<Vec<Result<(), DeviceError>>>,
        video: Mutex<Vec<Result<(), DeviceError>>>,
        screen: Mutex<Vec<Result<(), DeviceError>>>,
        audio_configs: Mutex<Vec<AudioTrackConfig>>,
        screen_configs: Mutex<Vec<ScreenTrackConfig>>,
    }

    impl ScriptedDevices {
        fn with_audio(outcomes: Vec<Result<(), DeviceError>>) -> Arc<Self> {
            Arc::new(Self {
                audio: Mutex::new(outcomes),
                ..Default::default()
            })
        }
        fn with_video(outcomes: Vec<Result<(), DeviceError>>) -> Arc<Self> {
            Arc::new(Self {
                video: Mutex::new(outcomes),
                ..Default::default()
            })
        }
        fn with_screen(outcomes: Vec<Result<(), DeviceError>>) -> Arc<Self> {
            Arc::new(Self {
                screen: Mutex::new(outcomes),
                ..Default::default()
            })
        }
    }

    async fn next(outcomes: &Mutex<Vec<Result<(), DeviceError>>>) -> Result<(), DeviceError> {
        let mut outcomes = outcomes.lock().await;
        if outcomes.is_empty() {
            return Err(DeviceError::Other("script exhausted".into()));
        }
        outcomes.remove(0)
    }

    #[async_trait]
    impl MediaDeviceProvider for ScriptedDevices {
        async fn create_audio_track(
            &self,
            config: AudioTrackConfig,
        ) -> Result<Arc<dyn LocalMediaTrack>, DeviceError> {
            self.audio_configs.lock().await.push(config);
            next(&self.audio)
                .await
                .map(|_| ScriptedTrack::new(MediaKind::Audio) as Arc<dyn LocalMediaTrack>)
        }

        async fn create_video_track(
            &self,
            _config: VideoTrackConfig,
        ) -> Result<Arc<dyn LocalMediaTrack>, DeviceError> {
            next(&self.video)
                .await
                .map(|_| ScriptedTrack::new(MediaKind::Video) as Arc<dyn LocalMediaTrack>)
        }

        async fn create_screen_track(
            &self,
            config: ScreenTrackConfig,
        ) -> Result<Arc<dyn LocalMediaTrack>, DeviceError> {
            self.screen_configs.lock().await.push(config);
            next(&self.screen)
                .await
                .map(|_| ScriptedTrack::new(MediaKind::Video) as Arc<dyn LocalMediaTrack>)
        }
    }

    #[tokio::test]
    async fn microphone_falls_back_to_minimal_config() {
        let devices = ScriptedDevices::with_audio(vec![
            Err(DeviceError::Other("encoder rejected".into())),
            Ok(()),
        ]);
        let factory = TrackFactory::new(devices.clone());

        factory
            .create_microphone_track()
            .await
            .expect("fallback config succeeds");

        let configs = devices.audio_configs.lock().await;
        assert_eq!(configs[0], AudioTrackConfig::high_quality());
        assert_eq!(configs[1], AudioTrackConfig::minimal());
    }

    #[tokio::test]
    async fn camera_surfaces_fallback_error_kind() {
        let devices = ScriptedDevices::with_video(vec![
            Err(DeviceError::Other("encoder rejected".into())),
            Err(DeviceError::PermissionDenied("camera blocked".into())),
        ]);
        let factory = TrackFactory::new(devices);

        let Err(err) = factory.create_camera_track().await else {
            panic!("both attempts must fail");
        };
        assert_eq!(err.kind, ErrorKind::DevicePermissionDenied);
    }

    #[tokio::test]
    async fn camera_distinguishes_missing_device() {
        let devices = ScriptedDevices::with_video(vec![
            Err(DeviceError::NotFound("no camera".into())),
            Err(DeviceError::NotFound("no camera".into())),
        ]);
        let factory = TrackFactory::new(devices);

        let Err(err) = factory.create_camera_track().await else {
            panic!("missing device must fail");
        };
        assert_eq!(err.kind, ErrorKind::DeviceNotFound);
    }

    #[tokio::test]
    async fn cancelled_screen_capture_is_not_retried() {
        let devices = ScriptedDevices::with_screen(vec![Err(DeviceError::Cancelled), Ok(())]);
        let factory = TrackFactory::new(devices.clone());

        let Err(err) = factory.create_screen_track().await else {
            panic!("cancel must be terminal");
        };
        assert_eq!(err.kind, ErrorKind::UserCancelled);
        assert_eq!(
            devices.screen_configs.lock().await.len(),
            1,
            "no fallback attempt after user cancel"
        );
    }

    #[tokio::test]
    async fn screen_capture_falls_back_on_non_cancel_errors() {
        let devices = ScriptedDevices::with_screen(vec![
            Err(DeviceError::Other("capture source busy".into())),
            Ok(()),
        ]);
        let factory = TrackFactory::new(devices.clone());

        factory
            .create_screen_track()
            .await
            .expect("low quality fallback succeeds");

        let configs = devices.screen_configs.lock().await;
        assert_eq!(configs[0], ScreenTrackConfig::fast_start());
        assert_eq!(configs[1], ScreenTrackConfig::low_quality());
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let track = ScriptedTrack::new(MediaKind::Audio);
        release(track.as_ref());
        release(track.as_ref());
        assert_eq!(track.stops.load(Ordering::SeqCst), 2);
        assert!(track.is_closed());
    }

    #[tokio::test]
    async fn closed_track_is_invalid() {
        let track = ScriptedTrack::new(MediaKind::Video);
        assert!(is_valid(track.as_ref()));
        track.close().expect("close");
        assert!(!is_valid(track.as_ref()));
    }
}
