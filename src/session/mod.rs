pub mod connector;
pub mod console;
#[cfg(test)]
pub(crate) mod mock;
pub mod traits;
pub mod types;

pub use connector::{CloseOutcome, ConnectionState, ReconnectPolicy, SessionConnector};
pub use console::ConsoleTransport;
pub use traits::{ConnectOptions, Connection, Session, Transport, TransportError};
pub use types::{
    CallEvent, CallStatus, ChatUpdate, ConnectionStatus, ConnectionUpdate, ContactUpdate,
    DisconnectReason, Event, EventBatch, EventKind, HistorySet, InboundMessage, Jid,
    MessageContent, MessageKey, MessageStatus, MessageUpdate, MessagesUpsert, OutboundPayload,
    PresenceState, PresenceUpdate, ProfilePictureChange, ProtocolVersion, Reaction, ReceiptUpdate,
    STATUS_BROADCAST, UpsertType, VersionInfo,
};

use std::sync::Arc;

/// Factory: create the transport named in config.
pub fn create_transport(name: &str) -> anyhow::Result<Arc<dyn Transport>> {
    match name {
        "console" | "cli" => Ok(Arc::new(ConsoleTransport::new())),
        _ => anyhow::bail!("Unknown transport: {name}. Supported transports: console"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_console() {
        assert_eq!(create_transport("console").unwrap().name(), "console");
        assert_eq!(create_transport("cli").unwrap().name(), "console");
    }

    #[test]
    fn factory_unknown_errors() {
        let err = create_transport("carrier-pigeon").err().expect("unknown transport");
        assert!(err.to_string().contains("Unknown transport"));
    }
}
