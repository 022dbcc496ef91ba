use std::sync::Arc;

use shared::{
    domain::{Role, Uid},
    error::{SessionError, SessionResult},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use transport::{TransportEvent, WhiteboardClient, WhiteboardEvent, WhiteboardRoomOptions, WhiteboardTool};

use crate::{bus::RoomEvent, store::UserRecord, EngineContext};

use super::ControllerState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhiteboardJoinParams {
    pub uid: Uid,
    pub display_name: String,
    pub room_uuid: String,
    pub room_token: String,
}

/// Whiteboard session. No media tracks; lifecycle wraps the drawing room
/// and mirrors its connection phase plus whiteboard-classified participants
/// into the store.
pub struct WhiteboardController {
    ctx: Arc<EngineContext>,
    client: Arc<dyn WhiteboardClient>,
    state: Mutex<ControllerState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WhiteboardController {
    pub fn new(ctx: Arc<EngineContext>, client: Arc<dyn WhiteboardClient>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            client,
            state: Mutex::new(ControllerState::Idle),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub async fn state(&self) -> ControllerState {
        *self.state.lock().await
    }

    async fn set_state(&self, next: ControllerState) {
        *self.state.lock().await = next;
    }

    pub async fn join(self: &Arc<Self>, params: WhiteboardJoinParams) -> SessionResult<()> {
        {
            let mut state = self.state.lock().await;
            match *state {
                ControllerState::Idle | ControllerState::Error => {
                    *state = ControllerState::Joining;
                }
                current => {
                    info!(?current, "whiteboard: join ignored in current state");
                    return Ok(());
                }
            }
        }

        let classified = self.ctx.identity.classify(params.uid);
        if classified != Role::Whiteboard {
            return Err(self
                .fail_join(SessionError::configuration(format!(
                    "uid {} classifies as {classified}, outside the whiteboard identity range",
                    params.uid.0
                )))
                .await);
        }

        let options = WhiteboardRoomOptions {
            room_uuid: params.room_uuid.clone(),
            room_token: params.room_token,
            user_label: params.display_name.clone(),
        };
        if let Err(err) = self.client.join_room(options).await {
            return Err(self.fail_join(SessionError::transport(err.to_string())).await);
        }

        // A concurrent leave may have raced the join await.
        if self.state().await != ControllerState::Joining {
            let _ = self.client.leave_room().await;
            return Err(SessionError::transport("join cancelled by concurrent leave"));
        }

        self.ctx
            .store
            .record_local_user(UserRecord::local(
                params.uid,
                Role::Whiteboard,
                params.display_name,
            ))
            .await;
        self.ctx.store.set_client_initialized(Role::Whiteboard).await;
        self.ctx
            .store
            .set_client_connected(Role::Whiteboard, true)
            .await;
        self.ctx
            .store
            .set_whiteboard_room(Some(params.room_uuid))
            .await;
        self.ctx.store.set_whiteboard_open(true).await;

        self.spawn_phase_task().await;
        self.spawn_bus_task().await;

        // The store writes above are suspension points; a leave that
        // interleaved through them has already cleared the role, and this
        // join must unwind instead of committing Joined.
        {
            let mut state = self.state.lock().await;
            if *state != ControllerState::Joining {
                drop(state);
                return Err(self
                    .fail_join(SessionError::transport("join cancelled by concurrent leave"))
                    .await);
            }
            *state = ControllerState::Joined;
        }
        info!("whiteboard: joined");
        Ok(())
    }

    /// Mirrors the drawing room's connection phase into the store.
    async fn spawn_phase_task(self: &Arc<Self>) {
        let mut events = self.client.subscribe_events();
        let controller = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    WhiteboardEvent::PhaseChanged { connected } => {
                        controller
                            .ctx
                            .store
                            .set_client_connected(Role::Whiteboard, connected)
                            .await;
                    }
                    WhiteboardEvent::MemberCountChanged { members } => {
                        debug!(members, "whiteboard: member count changed");
                    }
                }
            }
        });
        self.push_task(task).await;
    }

    /// Whiteboard participants announce themselves through the media
    /// transports; their uids classify here.
    async fn spawn_bus_task(self: &Arc<Self>) {
        let mut events = self.ctx.bus.subscribe();
        let controller = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(RoomEvent { event, .. }) => match event {
                        TransportEvent::UserJoined { uid }
                            if controller.ctx.identity.classify(uid) == Role::Whiteboard =>
                        {
                            controller
                                .ctx
                                .store
                                .upsert_remote_user(UserRecord::remote(uid, Role::Whiteboard))
                                .await;
                        }
                        TransportEvent::UserLeft { uid }
                            if controller.ctx.identity.classify(uid) == Role::Whiteboard =>
                        {
                            controller.ctx.store.remove_remote_user(uid).await;
                        }
                        _ => {}
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "whiteboard: event bus lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.push_task(task).await;
    }

    async fn push_task(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    async fn force_cleanup(&self) {
        {
            let mut tasks = self.tasks.lock().await;
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        if let Err(err) = self.client.leave_room().await {
            warn!(error = %err, "whiteboard: room leave failed");
        }
        self.ctx.store.clear_role(Role::Whiteboard).await;
    }

    async fn fail_join(&self, err: SessionError) -> SessionError {
        warn!(error = %err, "whiteboard: join failed");
        self.set_state(ControllerState::Error).await;
        self.force_cleanup().await;
        self.set_state(ControllerState::Idle).await;
        err
    }

    pub async fn leave(&self) {
        {
            let mut state = self.state.lock().await;
            match *state {
                ControllerState::Joining | ControllerState::Joined => {
                    *state = ControllerState::Leaving;
                }
                current => {
                    debug!(?current, "whiteboard: leave ignored in current state");
                    return;
                }
            }
        }
        self.force_cleanup().await;
        self.set_state(ControllerState::Idle).await;
        info!("whiteboard: left");
    }

    // ---- drawing surface controls, valid only while joined ----

    pub async fn set_tool(&self, tool: WhiteboardTool) -> SessionResult<()> {
        self.guard_joined().await?;
        self.client
            .set_tool(tool)
            .await
            .map_err(|err| SessionError::transport(err.to_string()))
    }

    pub async fn set_stroke_color(&self, rgb: [u8; 3]) -> SessionResult<()> {
        self.guard_joined().await?;
        self.client
            .set_stroke_color(rgb)
            .await
            .map_err(|err| SessionError::transport(err.to_string()))
    }

    pub async fn set_stroke_width(&self, width: u32) -> SessionResult<()> {
        self.guard_joined().await?;
        self.client
            .set_stroke_width(width)
            .await
            .map_err(|err| SessionError::transport(err.to_string()))
    }

    pub async fn undo(&self) -> SessionResult<()> {
        self.guard_joined().await?;
        self.client
            .undo()
            .await
            .map_err(|err| SessionError::transport(err.to_string()))
    }

    pub async fn redo(&self) -> SessionResult<()> {
        self.guard_joined().await?;
        self.client
            .redo()
            .await
            .map_err(|err| SessionError::transport(err.to_string()))
    }

    pub async fn clear_scene(&self) -> SessionResult<()> {
        self.guard_joined().await?;
        self.client
            .clear_scene()
            .await
            .map_err(|err| SessionError::transport(err.to_string()))
    }

    async fn guard_joined(&self) -> SessionResult<()> {
        if self.state().await != ControllerState::Joined {
            return Err(SessionError::transport(
                "whiteboard controls require an active session",
            ));
        }
        Ok(())
    }
}
