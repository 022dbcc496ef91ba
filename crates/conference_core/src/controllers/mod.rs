mod media;
pub mod screen;
pub mod video;
pub mod whiteboard;

pub use screen::ScreenController;
pub use video::VideoController;
pub use whiteboard::{WhiteboardController, WhiteboardJoinParams};

use shared::domain::Uid;
use shared::error::SessionError;

/// Controller lifecycle. `Error` is reachable from `Joining`/`Joined` and
/// always unwinds back to `Idle` through forced cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Joining,
    Joined,
    Leaving,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinParams {
    pub channel: String,
    pub uid: Uid,
    pub token: String,
    pub display_name: String,
}

/// Outcome of a successful join. Device acquisition failures during a video
/// join are soft: the session comes up without the device, and the typed
/// error is reported here for caller-facing messaging.
#[derive(Debug, Clone, Default)]
pub struct JoinReport {
    pub device_warnings: Vec<SessionError>,
}
