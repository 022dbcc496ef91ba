//! Capability boundary for the conferencing engine.
//!
//! Everything here is an opaque SDK surface the engine consumes: real-time
//! transport clients, the messaging side-channel, the whiteboard room, and
//! media device acquisition. The engine never sees vendor types, only these
//! traits and their event enums.

use std::sync::Arc;

use async_trait::async_trait;
use shared::domain::{MediaKind, Uid};
use tokio::sync::broadcast;

pub mod media;
pub mod messaging;
pub mod whiteboard;

pub use media::{
    AudioTrackConfig, DeviceError, LocalMediaTrack, MediaDeviceProvider, RemoteMediaTrack,
    ScreenTrackConfig, VideoTrackConfig,
};
pub use messaging::{MessagingClient, MessagingEvent};
pub use whiteboard::{WhiteboardClient, WhiteboardEvent, WhiteboardRoomOptions, WhiteboardTool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomOptions {
    pub app_id: String,
    pub channel: String,
    pub token: String,
    pub uid: Uid,
}

/// Raw event set a transport client emits for the room it observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    UserJoined { uid: Uid },
    UserLeft { uid: Uid },
    UserPublished { uid: Uid, kind: MediaKind },
    UserUnpublished { uid: Uid, kind: MediaKind },
    ConnectionChanged { connected: bool },
}

/// Remote participant snapshot as the transport client currently sees it.
/// `has_*` reflects track visibility on this client, which can lag behind
/// the corresponding published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteUserInfo {
    pub uid: Uid,
    pub has_audio: bool,
    pub has_video: bool,
}

impl RemoteUserInfo {
    pub fn has_kind(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.has_audio,
            MediaKind::Video => self.has_video,
        }
    }
}

/// One real-time media connection to the room.
///
/// `subscribe` is idempotent: calling it again for an already-subscribed
/// (uid, kind) pair returns the existing track without side effects.
#[async_trait]
pub trait TransportClient: Send + Sync {
    async fn join(&self, options: RoomOptions) -> anyhow::Result<()>;
    async fn leave(&self) -> anyhow::Result<()>;
    async fn publish(&self, track: Arc<dyn LocalMediaTrack>) -> anyhow::Result<()>;
    async fn unpublish(&self, track: Arc<dyn LocalMediaTrack>) -> anyhow::Result<()>;
    async fn subscribe(&self, uid: Uid, kind: MediaKind)
        -> anyhow::Result<Arc<dyn RemoteMediaTrack>>;
    fn connection_state(&self) -> ConnectionState;
    fn remote_users(&self) -> Vec<RemoteUserInfo>;
    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent>;
}

/// Lazy per-role client construction; a controller builds its client on
/// first join, not at engine startup.
pub trait TransportClientFactory: Send + Sync {
    fn create_client(&self) -> Arc<dyn TransportClient>;
}
