use std::{collections::HashMap, sync::Arc};

use shared::domain::{MediaKind, Role, Uid};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};
use transport::{LocalMediaTrack, RemoteMediaTrack};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientFlags {
    pub is_initialized: bool,
    pub is_connected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub uid: Uid,
    pub display_name: String,
    pub is_local: bool,
    pub has_audio: bool,
    pub has_video: bool,
    pub is_muted: bool,
    pub is_video_off: bool,
    pub role: Role,
}

impl UserRecord {
    pub fn local(uid: Uid, role: Role, display_name: impl Into<String>) -> Self {
        Self {
            uid,
            display_name: display_name.into(),
            is_local: true,
            has_audio: false,
            has_video: false,
            is_muted: false,
            is_video_off: false,
            role,
        }
    }

    pub fn remote(uid: Uid, role: Role) -> Self {
        Self {
            uid,
            display_name: String::new(),
            is_local: false,
            has_audio: false,
            has_video: false,
            is_muted: false,
            is_video_off: false,
            role,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlFlags {
    pub mic_muted: bool,
    pub camera_off: bool,
    pub screen_paused: bool,
    pub whiteboard_open: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionMeta {
    pub app_id: String,
    pub channel: String,
    pub whiteboard_room_uuid: Option<String>,
}

/// Change descriptor emitted by every mutator. Consumers subscribe
/// explicitly; there is no implicit dependency tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreChange {
    ClientChanged { role: Role, connected: bool },
    LocalUserChanged { role: Role },
    LocalUserCleared { role: Role },
    RemoteUserAdded { uid: Uid, role: Role },
    RemoteUserUpdated { uid: Uid },
    RemoteUserRemoved { uid: Uid },
    RemoteTrackAttached { uid: Uid, kind: MediaKind },
    RemoteTrackDetached { uid: Uid, kind: MediaKind },
    LocalTrackChanged { role: Role, kind: MediaKind },
    ControlsChanged,
    MetaChanged,
    Reset,
}

#[derive(Default)]
struct StoreState {
    clients: HashMap<Role, ClientFlags>,
    local_users: HashMap<Role, UserRecord>,
    // Ordered table keyed by uid; insert asserts uid uniqueness.
    remote_users: Vec<UserRecord>,
    local_tracks: HashMap<(Role, MediaKind), Arc<dyn LocalMediaTrack>>,
    remote_tracks: HashMap<(Uid, MediaKind), Arc<dyn RemoteMediaTrack>>,
    controls: ControlFlags,
    meta: SessionMeta,
}

impl StoreState {
    fn remote_index(&self, uid: Uid) -> Option<usize> {
        self.remote_users.iter().position(|user| user.uid == uid)
    }
}

/// Single source of truth for clients, users, tracks, controls, and session
/// metadata. Mutators are the only write path; each one runs under a single
/// lock acquisition with no await inside, so consumers never observe a
/// half-updated state.
pub struct SessionStore {
    inner: Mutex<StoreState>,
    changes: broadcast::Sender<StoreChange>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            inner: Mutex::new(StoreState::default()),
            changes,
        }
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    fn emit(&self, change: StoreChange) {
        let _ = self.changes.send(change);
    }

    // ---- client slice ----

    pub async fn set_client_initialized(&self, role: Role) {
        let mut state = self.inner.lock().await;
        let flags = state.clients.entry(role).or_default();
        flags.is_initialized = true;
        let connected = flags.is_connected;
        drop(state);
        self.emit(StoreChange::ClientChanged { role, connected });
    }

    pub async fn set_client_connected(&self, role: Role, connected: bool) {
        let mut state = self.inner.lock().await;
        state.clients.entry(role).or_default().is_connected = connected;
        drop(state);
        self.emit(StoreChange::ClientChanged { role, connected });
    }

    pub async fn client_flags(&self, role: Role) -> ClientFlags {
        self.inner
            .lock()
            .await
            .clients
            .get(&role)
            .copied()
            .unwrap_or_default()
    }

    // ---- user slices ----

    pub async fn record_local_user(&self, user: UserRecord) {
        let role = user.role;
        self.inner.lock().await.local_users.insert(role, user);
        self.emit(StoreChange::LocalUserChanged { role });
    }

    pub async fn clear_local_user(&self, role: Role) {
        self.inner.lock().await.local_users.remove(&role);
        self.emit(StoreChange::LocalUserCleared { role });
    }

    pub async fn local_user(&self, role: Role) -> Option<UserRecord> {
        self.inner.lock().await.local_users.get(&role).cloned()
    }

    pub async fn update_local_user<F>(&self, role: Role, apply: F)
    where
        F: FnOnce(&mut UserRecord),
    {
        let mut state = self.inner.lock().await;
        if let Some(user) = state.local_users.get_mut(&role) {
            apply(user);
            drop(state);
            self.emit(StoreChange::LocalUserChanged { role });
        }
    }

    /// Inserts a remote record unless one already exists for the uid. The
    /// uid-uniqueness invariant is asserted here, not left to collection
    /// semantics. Returns true when a new record was inserted.
    pub async fn upsert_remote_user(&self, user: UserRecord) -> bool {
        let (uid, role) = (user.uid, user.role);
        let mut state = self.inner.lock().await;
        if let Some(index) = state.remote_index(uid) {
            let existing = &mut state.remote_users[index];
            if existing.role != role {
                warn!(
                    uid = uid.0,
                    existing = %existing.role,
                    classified = %role,
                    "store: remote user reclassified"
                );
                existing.role = role;
                drop(state);
                self.emit(StoreChange::RemoteUserUpdated { uid });
            }
            return false;
        }
        state.remote_users.push(user);
        drop(state);
        self.emit(StoreChange::RemoteUserAdded { uid, role });
        true
    }

    /// Removes the remote record and every track attached under its uid.
    pub async fn remove_remote_user(&self, uid: Uid) -> bool {
        let mut state = self.inner.lock().await;
        let Some(index) = state.remote_index(uid) else {
            return false;
        };
        state.remote_users.remove(index);
        let detached: Vec<MediaKind> = {
            let keys: Vec<(Uid, MediaKind)> = state
                .remote_tracks
                .keys()
                .filter(|(track_uid, _)| *track_uid == uid)
                .copied()
                .collect();
            keys.iter()
                .map(|key| {
                    state.remote_tracks.remove(key);
                    key.1
                })
                .collect()
        };
        drop(state);
        for kind in detached {
            self.emit(StoreChange::RemoteTrackDetached { uid, kind });
        }
        self.emit(StoreChange::RemoteUserRemoved { uid });
        true
    }

    pub async fn remote_user(&self, uid: Uid) -> Option<UserRecord> {
        let state = self.inner.lock().await;
        state
            .remote_index(uid)
            .map(|index| state.remote_users[index].clone())
    }

    // ---- track slices ----

    /// Attaches a subscribed remote track and flips the matching media flag
    /// in the same mutation. A missing record is created with the classified
    /// role so the publish-before-join window resolves here, synchronously.
    pub async fn attach_remote_track(
        &self,
        uid: Uid,
        role: Role,
        kind: MediaKind,
        track: Arc<dyn RemoteMediaTrack>,
    ) {
        let mut added = false;
        {
            let mut state = self.inner.lock().await;
            match state.remote_index(uid) {
                Some(index) => {
                    let user = &mut state.remote_users[index];
                    if user.role != role {
                        warn!(
                            uid = uid.0,
                            recorded = %user.role,
                            classified = %role,
                            "store: track attach corrects remote role"
                        );
                        user.role = role;
                    }
                    match kind {
                        MediaKind::Audio => user.has_audio = true,
                        MediaKind::Video => user.has_video = true,
                    }
                }
                None => {
                    let mut user = UserRecord::remote(uid, role);
                    match kind {
                        MediaKind::Audio => user.has_audio = true,
                        MediaKind::Video => user.has_video = true,
                    }
                    state.remote_users.push(user);
                    added = true;
                }
            }
            state.remote_tracks.insert((uid, kind), track);
        }
        if added {
            self.emit(StoreChange::RemoteUserAdded { uid, role });
        }
        self.emit(StoreChange::RemoteTrackAttached { uid, kind });
    }

    /// Detaches and returns the remote track; the caller may not touch the
    /// stored handle after this returns.
    pub async fn detach_remote_track(
        &self,
        uid: Uid,
        kind: MediaKind,
    ) -> Option<Arc<dyn RemoteMediaTrack>> {
        let mut state = self.inner.lock().await;
        let track = state.remote_tracks.remove(&(uid, kind));
        if track.is_some() {
            if let Some(index) = state.remote_index(uid) {
                let user = &mut state.remote_users[index];
                match kind {
                    MediaKind::Audio => user.has_audio = false,
                    MediaKind::Video => user.has_video = false,
                }
            }
            drop(state);
            self.emit(StoreChange::RemoteTrackDetached { uid, kind });
        }
        track
    }

    pub async fn has_remote_track(&self, uid: Uid, kind: MediaKind) -> bool {
        self.inner
            .lock()
            .await
            .remote_tracks
            .contains_key(&(uid, kind))
    }

    /// Stores a local track and flips the owning local user's media flag.
    /// Returns a previously stored handle, which the caller must release.
    pub async fn put_local_track(
        &self,
        role: Role,
        kind: MediaKind,
        track: Arc<dyn LocalMediaTrack>,
    ) -> Option<Arc<dyn LocalMediaTrack>> {
        let mut state = self.inner.lock().await;
        let previous = state.local_tracks.insert((role, kind), track);
        if previous.is_some() {
            warn!(%role, %kind, "store: replacing local track that was never taken");
        }
        if let Some(user) = state.local_users.get_mut(&role) {
            match kind {
                MediaKind::Audio => user.has_audio = true,
                MediaKind::Video => user.has_video = true,
            }
        }
        drop(state);
        self.emit(StoreChange::LocalTrackChanged { role, kind });
        previous
    }

    /// Moves the local track out of the store. Release happens outside the
    /// lock, and the slot is empty before any release call can run, so a
    /// released handle is never readable through the store.
    pub async fn take_local_track(
        &self,
        role: Role,
        kind: MediaKind,
    ) -> Option<Arc<dyn LocalMediaTrack>> {
        let mut state = self.inner.lock().await;
        let track = state.local_tracks.remove(&(role, kind));
        if track.is_some() {
            if let Some(user) = state.local_users.get_mut(&role) {
                match kind {
                    MediaKind::Audio => user.has_audio = false,
                    MediaKind::Video => user.has_video = false,
                }
            }
            drop(state);
            self.emit(StoreChange::LocalTrackChanged { role, kind });
        }
        track
    }

    pub async fn has_local_track(&self, role: Role, kind: MediaKind) -> bool {
        self.inner
            .lock()
            .await
            .local_tracks
            .contains_key(&(role, kind))
    }

    // ---- controls ----

    /// Control flag and track publish-state are updated inside one lock
    /// acquisition; no consumer can observe one without the other.
    pub async fn set_mic_muted(&self, muted: bool) -> bool {
        let mut state = self.inner.lock().await;
        if state.controls.mic_muted == muted {
            return false;
        }
        state.controls.mic_muted = muted;
        if let Some(track) = state.local_tracks.get(&(Role::Video, MediaKind::Audio)) {
            track.set_enabled(!muted);
        }
        if let Some(user) = state.local_users.get_mut(&Role::Video) {
            user.is_muted = muted;
        }
        drop(state);
        self.emit(StoreChange::ControlsChanged);
        true
    }

    pub async fn set_camera_off(&self, off: bool) -> bool {
        let mut state = self.inner.lock().await;
        if state.controls.camera_off == off {
            return false;
        }
        state.controls.camera_off = off;
        if let Some(track) = state.local_tracks.get(&(Role::Video, MediaKind::Video)) {
            track.set_enabled(!off);
        }
        if let Some(user) = state.local_users.get_mut(&Role::Video) {
            user.is_video_off = off;
        }
        drop(state);
        self.emit(StoreChange::ControlsChanged);
        true
    }

    pub async fn set_screen_paused(&self, paused: bool) -> bool {
        let mut state = self.inner.lock().await;
        if state.controls.screen_paused == paused {
            return false;
        }
        state.controls.screen_paused = paused;
        if let Some(track) = state
            .local_tracks
            .get(&(Role::ScreenShare, MediaKind::Video))
        {
            track.set_enabled(!paused);
        }
        drop(state);
        self.emit(StoreChange::ControlsChanged);
        true
    }

    pub async fn set_whiteboard_open(&self, open: bool) {
        let mut state = self.inner.lock().await;
        if state.controls.whiteboard_open == open {
            return;
        }
        state.controls.whiteboard_open = open;
        drop(state);
        self.emit(StoreChange::ControlsChanged);
    }

    pub async fn controls(&self) -> ControlFlags {
        self.inner.lock().await.controls
    }

    // ---- metadata ----

    pub async fn set_meta(&self, meta: SessionMeta) {
        self.inner.lock().await.meta = meta;
        self.emit(StoreChange::MetaChanged);
    }

    pub async fn set_whiteboard_room(&self, room_uuid: Option<String>) {
        self.inner.lock().await.meta.whiteboard_room_uuid = room_uuid;
        self.emit(StoreChange::MetaChanged);
    }

    pub async fn meta(&self) -> SessionMeta {
        self.inner.lock().await.meta.clone()
    }

    // ---- computed views ----

    /// Local users (in role order) followed by remote users in arrival order.
    pub async fn participants(&self) -> Vec<UserRecord> {
        let state = self.inner.lock().await;
        let mut all = Vec::with_capacity(state.local_users.len() + state.remote_users.len());
        for role in [Role::Video, Role::ScreenShare, Role::Whiteboard] {
            if let Some(user) = state.local_users.get(&role) {
                all.push(user.clone());
            }
        }
        all.extend(state.remote_users.iter().cloned());
        all
    }

    pub async fn remote_users(&self) -> Vec<UserRecord> {
        self.inner.lock().await.remote_users.clone()
    }

    pub async fn remote_users_of(&self, role: Role) -> Vec<UserRecord> {
        self.inner
            .lock()
            .await
            .remote_users
            .iter()
            .filter(|user| user.role == role)
            .cloned()
            .collect()
    }

    pub async fn connected_count(&self) -> usize {
        self.inner
            .lock()
            .await
            .clients
            .values()
            .filter(|flags| flags.is_connected)
            .count()
    }

    pub async fn screen_share_active(&self) -> bool {
        let state = self.inner.lock().await;
        state.local_users.contains_key(&Role::ScreenShare)
            || state
                .remote_users
                .iter()
                .any(|user| user.role == Role::ScreenShare)
    }

    // ---- cleanup ----

    /// Clears every slice scoped to one role and returns the local track
    /// handles so the owning controller can release them outside the lock.
    pub async fn clear_role(&self, role: Role) -> Vec<Arc<dyn LocalMediaTrack>> {
        let mut state = self.inner.lock().await;

        let had_local = state.local_users.remove(&role).is_some();
        state.clients.remove(&role);

        let local_keys: Vec<(Role, MediaKind)> = state
            .local_tracks
            .keys()
            .filter(|(track_role, _)| *track_role == role)
            .copied()
            .collect();
        let mut released = Vec::with_capacity(local_keys.len());
        for key in local_keys {
            if let Some(track) = state.local_tracks.remove(&key) {
                released.push(track);
            }
        }

        let removed: Vec<Uid> = state
            .remote_users
            .iter()
            .filter(|user| user.role == role)
            .map(|user| user.uid)
            .collect();
        state.remote_users.retain(|user| user.role != role);
        state
            .remote_tracks
            .retain(|(uid, _), _| !removed.contains(uid));

        match role {
            Role::Video => {
                state.controls.mic_muted = false;
                state.controls.camera_off = false;
            }
            Role::ScreenShare => state.controls.screen_paused = false,
            Role::Whiteboard => {
                state.controls.whiteboard_open = false;
                state.meta.whiteboard_room_uuid = None;
            }
            Role::Unknown => {}
        }

        drop(state);
        if had_local {
            self.emit(StoreChange::LocalUserCleared { role });
        }
        for uid in removed {
            self.emit(StoreChange::RemoteUserRemoved { uid });
        }
        self.emit(StoreChange::ClientChanged {
            role,
            connected: false,
        });
        self.emit(StoreChange::ControlsChanged);
        debug!(%role, "store: role slice cleared");
        released
    }

    /// Wholesale clear of every slice. The only operation permitted to run
    /// opportunistically without per-role cleanups first. Returns every
    /// local track handle for release.
    pub async fn reset(&self) -> Vec<Arc<dyn LocalMediaTrack>> {
        let mut state = self.inner.lock().await;
        let released: Vec<Arc<dyn LocalMediaTrack>> =
            state.local_tracks.drain().map(|(_, track)| track).collect();
        state.clients.clear();
        state.local_users.clear();
        state.remote_users.clear();
        state.remote_tracks.clear();
        state.controls = ControlFlags::default();
        state.meta = SessionMeta::default();
        drop(state);
        self.emit(StoreChange::Reset);
        released
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use shared::domain::TrackReadyState;

    use super::*;

    struct StubLocalTrack {
        kind: MediaKind,
        enabled: AtomicBool,
    }

    impl StubLocalTrack {
        fn new(kind: MediaKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                enabled: AtomicBool::new(true),
            })
        }
    }

    impl LocalMediaTrack for StubLocalTrack {
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
            TrackReadyState::Live
        }
        fn is_closed(&self) -> bool {
            false
        }
        fn supports_playback(&self) -> bool {
            true
        }
        fn stop(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn close(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct StubRemoteTrack {
        kind: MediaKind,
    }

    impl RemoteMediaTrack for StubRemoteTrack {
        fn kind(&self) -> MediaKind {
            self.kind
        }
        fn is_playable(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn remote_uid_is_unique() {
        let store = SessionStore::new();
        assert!(
            store
                .upsert_remote_user(UserRecord::remote(Uid(2_500), Role::ScreenShare))
                .await
        );
        assert!(
            !store
                .upsert_remote_user(UserRecord::remote(Uid(2_500), Role::ScreenShare))
                .await
        );
        assert_eq!(store.remote_users().await.len(), 1);
    }

    #[tokio::test]
    async fn mute_flag_and_track_state_change_together() {
        let store = SessionStore::new();
        store
            .record_local_user(UserRecord::local(Uid(1_001), Role::Video, "me"))
            .await;
        let mic = StubLocalTrack::new(MediaKind::Audio);
        store
            .put_local_track(Role::Video, MediaKind::Audio, mic.clone())
            .await;

        assert!(store.set_mic_muted(true).await);
        assert!(!mic.is_enabled());
        assert!(store.controls().await.mic_muted);
        assert!(store.local_user(Role::Video).await.expect("local").is_muted);

        // Same target is a no-op, not a second state change.
        assert!(!store.set_mic_muted(true).await);
    }

    #[tokio::test]
    async fn removing_remote_user_drops_their_tracks() {
        let store = SessionStore::new();
        store
            .upsert_remote_user(UserRecord::remote(Uid(2_500), Role::ScreenShare))
            .await;
        store
            .attach_remote_track(
                Uid(2_500),
                Role::ScreenShare,
                MediaKind::Video,
                Arc::new(StubRemoteTrack {
                    kind: MediaKind::Video,
                }),
            )
            .await;

        assert!(store.remove_remote_user(Uid(2_500)).await);
        assert!(!store.has_remote_track(Uid(2_500), MediaKind::Video).await);
    }

    #[tokio::test]
    async fn attach_creates_missing_record_with_classified_role() {
        let store = SessionStore::new();
        store
            .attach_remote_track(
                Uid(2_500),
                Role::ScreenShare,
                MediaKind::Video,
                Arc::new(StubRemoteTrack {
                    kind: MediaKind::Video,
                }),
            )
            .await;

        let user = store.remote_user(Uid(2_500)).await.expect("record created");
        assert_eq!(user.role, Role::ScreenShare);
        assert!(user.has_video);
    }

    #[tokio::test]
    async fn clear_role_scopes_to_one_role() {
        let store = SessionStore::new();
        store
            .record_local_user(UserRecord::local(Uid(1_001), Role::Video, "me"))
            .await;
        store
            .upsert_remote_user(UserRecord::remote(Uid(1_002), Role::Video))
            .await;
        store
            .upsert_remote_user(UserRecord::remote(Uid(2_500), Role::ScreenShare))
            .await;
        store
            .put_local_track(
                Role::Video,
                MediaKind::Audio,
                StubLocalTrack::new(MediaKind::Audio),
            )
            .await;

        let released = store.clear_role(Role::Video).await;
        assert_eq!(released.len(), 1);
        assert!(store.local_user(Role::Video).await.is_none());
        assert!(store.remote_user(Uid(1_002)).await.is_none());
        assert!(store.remote_user(Uid(2_500)).await.is_some());
        assert!(!store.client_flags(Role::Video).await.is_connected);
    }

    #[tokio::test]
    async fn reset_clears_every_slice_and_returns_tracks() {
        let store = SessionStore::new();
        store.set_client_connected(Role::Video, true).await;
        store
            .record_local_user(UserRecord::local(Uid(1_001), Role::Video, "me"))
            .await;
        store
            .upsert_remote_user(UserRecord::remote(Uid(2_500), Role::ScreenShare))
            .await;
        store
            .put_local_track(
                Role::Video,
                MediaKind::Audio,
                StubLocalTrack::new(MediaKind::Audio),
            )
            .await;
        store.set_mic_muted(true).await;

        let released = store.reset().await;
        assert_eq!(released.len(), 1);
        assert!(store.participants().await.is_empty());
        assert_eq!(store.connected_count().await, 0);
        assert_eq!(store.controls().await, ControlFlags::default());
        assert_eq!(store.meta().await, SessionMeta::default());
    }

    #[tokio::test]
    async fn screen_share_view_tracks_remote_and_local_presence() {
        let store = SessionStore::new();
        assert!(!store.screen_share_active().await);

        store
            .upsert_remote_user(UserRecord::remote(Uid(2_500), Role::ScreenShare))
            .await;
        assert!(store.screen_share_active().await);

        store.remove_remote_user(Uid(2_500)).await;
        assert!(!store.screen_share_active().await);

        store
            .record_local_user(UserRecord::local(Uid(2_001), Role::ScreenShare, "me"))
            .await;
        assert!(store.screen_share_active().await);
    }
}
