use std::sync::Arc;

use async_trait::async_trait;
use shared::{
    domain::{MediaKind, Role, Uid},
    error::{SessionError, SessionResult},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use transport::{RoomOptions, TransportClient, TransportClientFactory, TransportEvent};

use crate::{
    bus::RoomEvent,
    reconciler::{Reconciler, SubscribeSink},
    store::UserRecord,
    tracks, EngineContext,
};

use super::{ControllerState, JoinParams};

/// State and plumbing shared by the media controllers. Owns the per-role
/// transport client, the lifecycle state machine, the retry scheduler, and
/// every background task spawned on the role's behalf.
pub(crate) struct MediaCore {
    pub(crate) role: Role,
    kinds: &'static [MediaKind],
    pub(crate) ctx: Arc<EngineContext>,
    factory: Arc<dyn TransportClientFactory>,
    client: Mutex<Option<Arc<dyn TransportClient>>>,
    state: Mutex<ControllerState>,
    pub(crate) reconciler: Arc<Reconciler>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MediaCore {
    pub(crate) fn new(
        role: Role,
        kinds: &'static [MediaKind],
        ctx: Arc<EngineContext>,
        factory: Arc<dyn TransportClientFactory>,
    ) -> Arc<Self> {
        let reconciler = Reconciler::new(
            ctx.settings.immediate_retry_delays(),
            ctx.settings.max_tracked_attempts,
        );
        Arc::new(Self {
            role,
            kinds,
            ctx,
            factory,
            client: Mutex::new(None),
            state: Mutex::new(ControllerState::Idle),
            reconciler,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub(crate) async fn state(&self) -> ControllerState {
        *self.state.lock().await
    }

    async fn set_state(&self, next: ControllerState) {
        *self.state.lock().await = next;
    }

    pub(crate) async fn client(&self) -> Option<Arc<dyn TransportClient>> {
        self.client.lock().await.clone()
    }

    /// Takes the Idle/Error -> Joining transition. Any other current state
    /// makes the join a no-op for the caller.
    pub(crate) async fn begin_join(&self) -> bool {
        let mut state = self.state.lock().await;
        match *state {
            ControllerState::Idle | ControllerState::Error => {
                *state = ControllerState::Joining;
                true
            }
            current => {
                info!(role = %self.role, ?current, "controller: join ignored in current state");
                false
            }
        }
    }

    async fn push_task(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Builds the transport client on first use and starts the pump that
    /// funnels its raw events into the shared dedup bus.
    async fn ensure_client(self: &Arc<Self>) -> Arc<dyn TransportClient> {
        let (client, pump) = {
            let mut slot = self.client.lock().await;
            if let Some(client) = slot.as_ref() {
                return Arc::clone(client);
            }
            let client = self.factory.create_client();
            let mut events = client.subscribe_events();
            let core = Arc::clone(self);
            let pump = tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    core.ctx.bus.publish(core.role, event).await;
                }
            });
            *slot = Some(Arc::clone(&client));
            (client, pump)
        };
        self.push_task(pump).await;
        self.ctx.store.set_client_initialized(self.role).await;
        client
    }

    /// Transport join plus the bookkeeping every media role shares. The
    /// caller has already taken the Joining transition.
    pub(crate) async fn connect(self: &Arc<Self>, params: &JoinParams) -> SessionResult<()> {
        let classified = self.ctx.identity.classify(params.uid);
        if classified != self.role {
            return Err(SessionError::configuration(format!(
                "uid {} classifies as {classified}, outside the {} identity range",
                params.uid.0, self.role
            )));
        }

        let client = self.ensure_client().await;
        let options = RoomOptions {
            app_id: self.ctx.settings.app_id.clone(),
            channel: params.channel.clone(),
            token: params.token.clone(),
            uid: params.uid,
        };
        client
            .join(options)
            .await
            .map_err(|err| SessionError::transport(err.to_string()))?;

        // A concurrent leave may have raced the join await.
        if self.state().await != ControllerState::Joining {
            let _ = client.leave().await;
            return Err(SessionError::transport("join cancelled by concurrent leave"));
        }

        self.ctx
            .store
            .record_local_user(UserRecord::local(
                params.uid,
                self.role,
                params.display_name.clone(),
            ))
            .await;
        self.ctx.store.set_client_connected(self.role, true).await;
        Ok(())
    }

    /// Starts the event consumer and the periodic sweep, then commits the
    /// transition to Joined. The commit re-checks the state: a leave that
    /// interleaved during device acquisition or publish has already torn
    /// the role down, and the resumed join must not override it. Returns
    /// false in that case; the caller unwinds through `fail_join`, which
    /// also aborts the tasks spawned here.
    pub(crate) async fn finish_join(self: &Arc<Self>) -> bool {
        self.spawn_bus_task().await;
        let sink: Arc<dyn SubscribeSink> = Arc::clone(self) as Arc<dyn SubscribeSink>;
        let sweep = self
            .reconciler
            .start_sweep(self.ctx.settings.sweep_interval(), sink);
        self.push_task(sweep).await;

        let mut state = self.state.lock().await;
        if *state != ControllerState::Joining {
            return false;
        }
        *state = ControllerState::Joined;
        drop(state);
        info!(role = %self.role, "controller: joined");
        true
    }

    async fn spawn_bus_task(self: &Arc<Self>) {
        let mut events = self.ctx.bus.subscribe();
        let core = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(room_event) => core.handle_room_event(room_event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(role = %core.role, skipped, "controller: event bus lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.push_task(task).await;
    }

    /// Dispatch rule: uid classification decides which controller owns a
    /// user-scoped event; the origin tag only matters for connection events.
    async fn handle_room_event(self: &Arc<Self>, room_event: RoomEvent) {
        match room_event.event {
            TransportEvent::ConnectionChanged { connected } => {
                if room_event.origin == self.role {
                    self.ctx.store.set_client_connected(self.role, connected).await;
                }
            }
            TransportEvent::UserJoined { uid } => {
                if self.ctx.identity.classify(uid) != self.role {
                    return;
                }
                self.ctx
                    .store
                    .upsert_remote_user(UserRecord::remote(uid, self.role))
                    .await;
            }
            TransportEvent::UserLeft { uid } => {
                if self.ctx.identity.classify(uid) != self.role {
                    return;
                }
                self.reconciler.cancel(uid).await;
                self.ctx.store.remove_remote_user(uid).await;
            }
            TransportEvent::UserPublished { uid, kind } => {
                if self.ctx.identity.classify(uid) != self.role || !self.kinds.contains(&kind) {
                    return;
                }
                self.ctx
                    .store
                    .upsert_remote_user(UserRecord::remote(uid, self.role))
                    .await;
                // Try once inline; a miss hands the visibility race to the
                // retry scheduler.
                if !self.try_subscribe(uid, kind).await {
                    let sink: Arc<dyn SubscribeSink> = Arc::clone(self) as Arc<dyn SubscribeSink>;
                    let burst = self.reconciler.schedule(uid, kind, sink);
                    self.push_task(burst).await;
                }
            }
            TransportEvent::UserUnpublished { uid, kind } => {
                if self.ctx.identity.classify(uid) != self.role {
                    return;
                }
                self.reconciler.cancel_entry(uid, kind).await;
                self.ctx.store.detach_remote_track(uid, kind).await;
            }
        }
    }

    /// Tears down everything role-scoped. Safe to call from any state; the
    /// transport leave failure is logged, never propagated, because local
    /// cleanup must complete regardless.
    async fn force_cleanup(&self) {
        {
            let mut tasks = self.tasks.lock().await;
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        self.reconciler.cancel_all().await;

        // Reset-on-leave: the client handle is discarded, never reused.
        let client = { self.client.lock().await.take() };
        if let Some(client) = client {
            if let Err(err) = client.leave().await {
                warn!(role = %self.role, error = %err, "controller: transport leave failed");
            }
        }

        let released = self.ctx.store.clear_role(self.role).await;
        for track in released {
            tracks::release(track.as_ref());
        }
    }

    pub(crate) async fn leave(&self) {
        {
            let mut state = self.state.lock().await;
            match *state {
                ControllerState::Joining | ControllerState::Joined => {
                    *state = ControllerState::Leaving;
                }
                current => {
                    debug!(role = %self.role, ?current, "controller: leave ignored in current state");
                    return;
                }
            }
        }
        self.force_cleanup().await;
        self.set_state(ControllerState::Idle).await;
        info!(role = %self.role, "controller: left");
    }

    /// Join failure path: Error is observable, then forced cleanup unwinds
    /// back to Idle. Returns the error for the caller to propagate.
    pub(crate) async fn fail_join(&self, err: SessionError) -> SessionError {
        warn!(role = %self.role, error = %err, "controller: join failed");
        self.set_state(ControllerState::Error).await;
        self.force_cleanup().await;
        self.set_state(ControllerState::Idle).await;
        err
    }
}

#[async_trait]
impl SubscribeSink for MediaCore {
    async fn try_subscribe(&self, uid: Uid, kind: MediaKind) -> bool {
        if self.state().await != ControllerState::Joined {
            return false;
        }
        let Some(client) = self.client().await else {
            return false;
        };
        let visible = client
            .remote_users()
            .iter()
            .any(|user| user.uid == uid && user.has_kind(kind));
        if !visible {
            return false;
        }
        match client.subscribe(uid, kind).await {
            Ok(track) => {
                // Leave may have raced the subscribe await.
                if self.state().await != ControllerState::Joined {
                    return false;
                }
                self.ctx
                    .store
                    .attach_remote_track(uid, self.role, kind, track)
                    .await;
                true
            }
            Err(err) => {
                debug!(
                    role = %self.role,
                    uid = uid.0,
                    kind = %kind,
                    error = %err,
                    "controller: subscribe attempt failed"
                );
                false
            }
        }
    }

    async fn is_joined(&self) -> bool {
        self.state().await == ControllerState::Joined
    }
}
