use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhiteboardTool {
    Selector,
    Pencil,
    Rectangle,
    Ellipse,
    Eraser,
    Text,
    Laser,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WhiteboardEvent {
    PhaseChanged { connected: bool },
    MemberCountChanged { members: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhiteboardRoomOptions {
    pub room_uuid: String,
    pub room_token: String,
    pub user_label: String,
}

/// Shared-drawing room. Rendering is internal to the SDK; the engine only
/// drives room lifecycle and member state.
#[async_trait]
pub trait WhiteboardClient: Send + Sync {
    async fn join_room(&self, options: WhiteboardRoomOptions) -> anyhow::Result<()>;
    async fn leave_room(&self) -> anyhow::Result<()>;
    async fn set_tool(&self, tool: WhiteboardTool) -> anyhow::Result<()>;
    async fn set_stroke_color(&self, rgb: [u8; 3]) -> anyhow::Result<()>;
    async fn set_stroke_width(&self, width: u32) -> anyhow::Result<()>;
    async fn undo(&self) -> anyhow::Result<()>;
    async fn redo(&self) -> anyhow::Result<()>;
    async fn clear_scene(&self) -> anyhow::Result<()>;
    fn subscribe_events(&self) -> broadcast::Receiver<WhiteboardEvent>;
}
