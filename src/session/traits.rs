use super::types::{
    DisconnectReason, EventBatch, Jid, MessageKey, OutboundPayload, PresenceState,
    ProtocolVersion, VersionInfo,
};
use crate::credentials::Credentials;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed: {0}")]
    Closed(DisconnectReason),
    #[error("no open session")]
    NotConnected,
    #[error("transport request timed out")]
    Timeout,
    #[error("transport request failed: {0}")]
    Request(String),
}

impl TransportError {
    /// A connect attempt that fails this way must not be retried.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed(reason) if reason.is_terminal())
    }
}

/// Options handed to [`Transport::connect`].
#[derive(Clone)]
pub struct ConnectOptions {
    pub version: ProtocolVersion,
    /// Chats the transport should never surface.
    pub ignore_jid: fn(&Jid) -> bool,
}

impl std::fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// A freshly opened session and the stream of batches it produces.
pub struct Connection {
    pub session: Arc<dyn Session>,
    pub events: mpsc::Receiver<EventBatch>,
}

/// Messaging network transport: knows how to open sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable transport name
    fn name(&self) -> &str;

    /// Newest protocol version this transport can speak.
    async fn latest_version(&self) -> anyhow::Result<VersionInfo>;

    /// Open a brand-new session. Each call returns an independent session.
    async fn connect(
        &self,
        credentials: &Credentials,
        options: &ConnectOptions,
    ) -> Result<Connection, TransportError>;
}

/// Outbound primitives of one live session.
///
/// After the session closes every call fails; callers never retry on the same
/// handle.
#[async_trait]
pub trait Session: Send + Sync {
    async fn send_message(
        &self,
        to: &Jid,
        payload: &OutboundPayload,
    ) -> Result<MessageKey, TransportError>;

    async fn send_presence_update(
        &self,
        state: PresenceState,
        to: &Jid,
    ) -> Result<(), TransportError>;

    async fn presence_subscribe(&self, to: &Jid) -> Result<(), TransportError>;

    async fn read_messages(&self, keys: &[MessageKey]) -> Result<(), TransportError>;

    async fn profile_picture_url(&self, jid: &Jid) -> Result<Option<String>, TransportError>;
}
