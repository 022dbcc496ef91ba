use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::domain::{MediaKind, TrackReadyState};
use thiserror::Error;

/// Device acquisition failure as reported by the capture backend.
#[derive(Debug, Clone, Error)]
pub enum DeviceError {
    #[error("device permission denied: {0}")]
    PermissionDenied(String),
    #[error("device not found: {0}")]
    NotFound(String),
    #[error("capture cancelled by user")]
    Cancelled,
    #[error("device error: {0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioTrackConfig {
    pub sample_rate: u32,
    pub stereo: bool,
    pub bitrate_kbps: u32,
}

impl AudioTrackConfig {
    pub fn high_quality() -> Self {
        Self {
            sample_rate: 48_000,
            stereo: true,
            bitrate_kbps: 128,
        }
    }

    pub fn minimal() -> Self {
        Self {
            sample_rate: 16_000,
            stereo: false,
            bitrate_kbps: 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoTrackConfig {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub bitrate_kbps: u32,
}

impl VideoTrackConfig {
    pub fn standard() -> Self {
        Self {
            width: 1280,
            height: 720,
            framerate: 30,
            bitrate_kbps: 1_500,
        }
    }

    pub fn reduced() -> Self {
        Self {
            width: 640,
            height: 360,
            framerate: 15,
            bitrate_kbps: 400,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenTrackConfig {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    /// Prefer quick first frame over steady-state quality.
    pub fast_start: bool,
}

impl ScreenTrackConfig {
    pub fn fast_start() -> Self {
        Self {
            width: 1920,
            height: 1080,
            framerate: 15,
            fast_start: true,
        }
    }

    pub fn low_quality() -> Self {
        Self {
            width: 1280,
            height: 720,
            framerate: 5,
            fast_start: false,
        }
    }
}

/// Handle to a locally captured track. Enable/disable is a synchronous
/// publish-state flip on the underlying SDK track.
pub trait LocalMediaTrack: Send + Sync {
    fn kind(&self) -> MediaKind;
    fn set_enabled(&self, enabled: bool);
    fn is_enabled(&self) -> bool;
    fn ready_state(&self) -> TrackReadyState;
    fn is_closed(&self) -> bool;
    fn supports_playback(&self) -> bool;
    /// Stops capture. Safe to call on an already-stopped track.
    fn stop(&self) -> anyhow::Result<()>;
    /// Releases the underlying device. Safe to call twice.
    fn close(&self) -> anyhow::Result<()>;
}

pub trait RemoteMediaTrack: Send + Sync {
    fn kind(&self) -> MediaKind;
    fn is_playable(&self) -> bool;
}

#[async_trait]
pub trait MediaDeviceProvider: Send + Sync {
    async fn create_audio_track(
        &self,
        config: AudioTrackConfig,
    ) -> Result<Arc<dyn LocalMediaTrack>, DeviceError>;
    async fn create_video_track(
        &self,
        config: VideoTrackConfig,
    ) -> Result<Arc<dyn LocalMediaTrack>, DeviceError>;
    async fn create_screen_track(
        &self,
        config: ScreenTrackConfig,
    ) -> Result<Arc<dyn LocalMediaTrack>, DeviceError>;
}
