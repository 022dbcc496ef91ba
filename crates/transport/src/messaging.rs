use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum MessagingEvent {
    Message {
        channel: String,
        publisher: String,
        payload: String,
    },
    Presence {
        channel: String,
        publisher: String,
        joined: bool,
    },
    Status {
        connected: bool,
    },
    Error {
        message: String,
    },
}

/// Presence/notification side-channel. The engine uses it for signaling
/// only; it carries no media state.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    async fn login(&self, token: &str) -> anyhow::Result<()>;
    async fn logout(&self) -> anyhow::Result<()>;
    async fn subscribe_channel(&self, channel: &str) -> anyhow::Result<()>;
    async fn publish(&self, channel: &str, payload: &str) -> anyhow::Result<()>;
    fn subscribe_events(&self) -> broadcast::Receiver<MessagingEvent>;
}
