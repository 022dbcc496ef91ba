//! Session and track reconciliation engine for a multi-role conferencing
//! client.
//!
//! One logical user is represented by up to three transport identities
//! (video, screen share, whiteboard), partitioned by uid range. Every raw
//! transport event passes through a deduplication bus before any controller
//! sees it; subscription races between publish notifications and track
//! visibility are resolved by a retry burst plus a periodic sweep. All
//! observable session state lives in [`store::SessionStore`], whose mutators
//! are the only write path.

pub mod bus;
pub mod config;
pub mod controllers;
pub mod identity;
pub mod layout;
pub mod reconciler;
pub mod store;
pub mod tracks;

use std::sync::Arc;

use shared::error::{SessionError, SessionResult};
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
};
use tracing::warn;
use transport::{
    MediaDeviceProvider, MessagingClient, MessagingEvent, TransportClientFactory, WhiteboardClient,
};

pub use bus::{DedupBus, RoomEvent};
pub use config::{load_settings, Settings};
pub use controllers::{
    ControllerState, JoinParams, JoinReport, ScreenController, VideoController,
    WhiteboardController, WhiteboardJoinParams,
};
pub use identity::{default_ranges, IdentityPlan, IdentityRange};
pub use layout::LayoutCoordinator;
pub use shared::domain::{MediaKind, PresentationMode, Role, TrackReadyState, Uid};
pub use shared::error::{ErrorKind, SessionError as EngineError, SessionResult as EngineResult};
pub use store::{ClientFlags, ControlFlags, SessionMeta, SessionStore, StoreChange, UserRecord};

/// Validated engine-wide state shared by every controller: settings, the
/// identity partition, the session store, and the event bus. Construction
/// fails fast on a malformed identity partition.
pub struct EngineContext {
    pub settings: Settings,
    pub identity: IdentityPlan,
    pub store: Arc<SessionStore>,
    pub bus: Arc<DedupBus>,
}

impl EngineContext {
    pub fn new(settings: Settings) -> SessionResult<Arc<Self>> {
        let identity = IdentityPlan::new(settings.identity_ranges.clone())?;
        let bus = Arc::new(DedupBus::new(settings.dedup_window()));
        Ok(Arc::new(Self {
            settings,
            identity,
            store: Arc::new(SessionStore::new()),
            bus,
        }))
    }
}

/// External capabilities injected at engine construction. Each transport
/// factory builds one client per role session; the two media roles never
/// share a connection.
pub struct EngineCapabilities {
    pub video_transport: Arc<dyn TransportClientFactory>,
    pub screen_transport: Arc<dyn TransportClientFactory>,
    pub devices: Arc<dyn MediaDeviceProvider>,
    pub whiteboard: Arc<dyn WhiteboardClient>,
    pub messaging: Arc<dyn MessagingClient>,
}

/// Signaling-side notifications surfaced to the embedding application.
#[derive(Debug, Clone)]
pub enum EngineNotification {
    Signal {
        channel: String,
        publisher: String,
        payload: serde_json::Value,
    },
    Presence {
        channel: String,
        publisher: String,
        joined: bool,
    },
    SignalingStatus {
        connected: bool,
    },
    SignalingError {
        message: String,
    },
}

/// Facade over the per-role controllers, the layout coordinator, and the
/// messaging side-channel.
pub struct ConferenceEngine {
    ctx: Arc<EngineContext>,
    video: Arc<VideoController>,
    screen: Arc<ScreenController>,
    whiteboard: Arc<WhiteboardController>,
    layout: LayoutCoordinator,
    messaging: Arc<dyn MessagingClient>,
    notifications: broadcast::Sender<EngineNotification>,
    messaging_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConferenceEngine {
    pub fn new(settings: Settings, caps: EngineCapabilities) -> SessionResult<Arc<Self>> {
        let ctx = EngineContext::new(settings)?;
        let video = VideoController::new(
            Arc::clone(&ctx),
            caps.video_transport,
            Arc::clone(&caps.devices),
        );
        let screen = ScreenController::new(Arc::clone(&ctx), caps.screen_transport, caps.devices);
        let whiteboard = WhiteboardController::new(Arc::clone(&ctx), caps.whiteboard);
        let layout = LayoutCoordinator::start(Arc::clone(&ctx.store));
        let (notifications, _) = broadcast::channel(128);
        Ok(Arc::new(Self {
            ctx,
            video,
            screen,
            whiteboard,
            layout,
            messaging: caps.messaging,
            notifications,
            messaging_task: Mutex::new(None),
        }))
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.ctx.store
    }

    pub fn video(&self) -> &Arc<VideoController> {
        &self.video
    }

    pub fn screen(&self) -> &Arc<ScreenController> {
        &self.screen
    }

    pub fn whiteboard(&self) -> &Arc<WhiteboardController> {
        &self.whiteboard
    }

    /// Deduplicated room events, post-suppression.
    pub fn subscribe_room_events(&self) -> broadcast::Receiver<RoomEvent> {
        self.ctx.bus.subscribe()
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<EngineNotification> {
        self.notifications.subscribe()
    }

    pub fn presentation_mode(&self) -> watch::Receiver<PresentationMode> {
        self.layout.mode()
    }

    /// Logs into the messaging side-channel, subscribes the signaling
    /// channel, and starts the notification pump on first call.
    pub async fn connect_signaling(self: &Arc<Self>, token: &str, channel: &str) -> SessionResult<()> {
        self.messaging
            .login(token)
            .await
            .map_err(|err| SessionError::transport(err.to_string()))?;
        self.messaging
            .subscribe_channel(channel)
            .await
            .map_err(|err| SessionError::transport(err.to_string()))?;

        let mut task = self.messaging_task.lock().await;
        if task.is_none() {
            *task = Some(self.spawn_messaging_pump());
        }
        Ok(())
    }

    fn spawn_messaging_pump(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.messaging.subscribe_events();
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                let notification = match event {
                    MessagingEvent::Message {
                        channel,
                        publisher,
                        payload,
                    } => {
                        // Non-JSON payloads pass through as plain strings.
                        let payload = serde_json::from_str(&payload)
                            .unwrap_or(serde_json::Value::String(payload));
                        EngineNotification::Signal {
                            channel,
                            publisher,
                            payload,
                        }
                    }
                    MessagingEvent::Presence {
                        channel,
                        publisher,
                        joined,
                    } => EngineNotification::Presence {
                        channel,
                        publisher,
                        joined,
                    },
                    MessagingEvent::Status { connected } => {
                        EngineNotification::SignalingStatus { connected }
                    }
                    MessagingEvent::Error { message } => {
                        warn!(%message, "engine: messaging error");
                        EngineNotification::SignalingError { message }
                    }
                };
                let _ = engine.notifications.send(notification);
            }
        })
    }

    pub async fn announce(&self, channel: &str, payload: &str) -> SessionResult<()> {
        self.messaging
            .publish(channel, payload)
            .await
            .map_err(|err| SessionError::transport(err.to_string()))
    }

    /// Wholesale teardown: every role leaves, the suppression window is
    /// emptied, and the store is cleared. A following join is
    /// indistinguishable from a first-ever join.
    pub async fn reset(&self) {
        self.video.leave().await;
        self.screen.leave().await;
        self.whiteboard.leave().await;
        self.ctx.bus.clear().await;
        for track in self.ctx.store.reset().await {
            tracks::release(track.as_ref());
        }
    }

    pub async fn shutdown(&self) {
        self.reset().await;
        if let Some(task) = self.messaging_task.lock().await.take() {
            task.abort();
        }
        if let Err(err) = self.messaging.logout().await {
            warn!(error = %err, "engine: messaging logout failed");
        }
        self.layout.shutdown();
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
