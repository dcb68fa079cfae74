//! Wire-independent event and payload types exchanged with a transport.
//!
//! A transport decodes its protocol into these types and hands them to the
//! connector as [`EventBatch`]es. Nothing here knows how bytes are framed.

use crate::credentials::CredentialsUpdate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Address of the status broadcast pseudo-identity.
pub const STATUS_BROADCAST: &str = "status@broadcast";

// ── Identities ───────────────────────────────────────────────────

/// A network identity in `user@server` form (person, group or broadcast list).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Jid(String);

impl Jid {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part before `@`, or the whole address when there is no server.
    pub fn user(&self) -> &str {
        self.0.split_once('@').map_or(self.0.as_str(), |(user, _)| user)
    }

    pub fn server(&self) -> &str {
        self.0.split_once('@').map_or("", |(_, server)| server)
    }

    /// Broadcast-class addresses: status updates and broadcast lists.
    pub fn is_broadcast(&self) -> bool {
        self.server() == "broadcast"
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Jid {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

// ── Protocol version ─────────────────────────────────────────────

/// Three-part client version announced during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProtocolVersion(pub [u32; 3]);

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.0;
        write!(f, "{a}.{b}.{c}")
    }
}

/// Result of asking the transport which protocol version to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: ProtocolVersion,
    pub is_latest: bool,
}

// ── Connection updates ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Close,
}

/// Why a transport connection closed, keyed by the network's status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    ConnectionClosed,
    ConnectionLost,
    ConnectionReplaced,
    TimedOut,
    LoggedOut,
    BadSession,
    RestartRequired,
    MultideviceMismatch,
    Other(u16),
}

impl DisconnectReason {
    pub fn from_status_code(code: u16) -> Self {
        match code {
            428 => Self::ConnectionClosed,
            408 => Self::ConnectionLost,
            440 => Self::ConnectionReplaced,
            401 => Self::LoggedOut,
            500 => Self::BadSession,
            515 => Self::RestartRequired,
            411 => Self::MultideviceMismatch,
            other => Self::Other(other),
        }
    }

    pub fn status_code(self) -> u16 {
        match self {
            Self::ConnectionClosed => 428,
            Self::ConnectionLost | Self::TimedOut => 408,
            Self::ConnectionReplaced => 440,
            Self::LoggedOut => 401,
            Self::BadSession => 500,
            Self::RestartRequired => 515,
            Self::MultideviceMismatch => 411,
            Self::Other(code) => code,
        }
    }

    /// Only an explicit logout ends the session for good.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ConnectionClosed => "connection closed",
            Self::ConnectionLost => "connection lost",
            Self::ConnectionReplaced => "connection replaced",
            Self::TimedOut => "timed out",
            Self::LoggedOut => "logged out",
            Self::BadSession => "bad session",
            Self::RestartRequired => "restart required",
            Self::MultideviceMismatch => "multi-device mismatch",
            Self::Other(_) => "unknown",
        };
        write!(f, "{label} ({})", self.status_code())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionUpdate {
    pub connection: Option<ConnectionStatus>,
    pub last_disconnect: Option<DisconnectReason>,
    /// Pairing QR payload, present until the device is linked.
    pub qr: Option<String>,
}

impl ConnectionUpdate {
    pub fn open() -> Self {
        Self {
            connection: Some(ConnectionStatus::Open),
            ..Self::default()
        }
    }

    pub fn closed(reason: DisconnectReason) -> Self {
        Self {
            connection: Some(ConnectionStatus::Close),
            last_disconnect: Some(reason),
            ..Self::default()
        }
    }
}

// ── Messages ─────────────────────────────────────────────────────

/// Composite identity of a message: chat, id, and whether we sent it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageKey {
    pub remote_jid: Jid,
    pub id: String,
    pub from_me: bool,
    /// Group member who sent the message, when `remote_jid` is a group.
    pub participant: Option<Jid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Conversation(String),
    ExtendedText { text: String },
    Image { url: String, caption: Option<String> },
    /// Any content this client does not interpret, tagged by kind.
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub key: MessageKey,
    pub content: Option<MessageContent>,
    pub push_name: Option<String>,
    pub timestamp: u64,
}

impl InboundMessage {
    /// Plain conversation or extended text body. Image captions are not
    /// treated as commands.
    pub fn text(&self) -> Option<&str> {
        match self.content.as_ref()? {
            MessageContent::Conversation(text) | MessageContent::ExtendedText { text } => {
                Some(text)
            }
            _ => None,
        }
    }
}

/// `Notify` is live delivery; `Append` is replay of already-seen history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertType {
    Notify,
    Append,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagesUpsert {
    pub messages: Vec<InboundMessage>,
    pub kind: UpsertType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySet {
    pub chats: Vec<Jid>,
    pub contacts: Vec<Jid>,
    pub messages: Vec<InboundMessage>,
    pub is_latest: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Error,
    Pending,
    ServerAck,
    DeliveryAck,
    Read,
    Played,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageUpdate {
    pub key: MessageKey,
    pub status: Option<MessageStatus>,
    /// Set when the sender revoked the message.
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptUpdate {
    pub key: MessageKey,
    pub user: Jid,
    pub read: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaction {
    pub key: MessageKey,
    pub sender: Jid,
    /// `None` removes a previous reaction.
    pub text: Option<String>,
}

// ── Presence ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    Available,
    Unavailable,
    Composing,
    Recording,
    Paused,
}

impl PresenceState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Unavailable => "unavailable",
            Self::Composing => "composing",
            Self::Recording => "recording",
            Self::Paused => "paused",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub chat: Jid,
    pub presences: BTreeMap<Jid, PresenceState>,
}

// ── Contacts, chats, calls ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfilePictureChange {
    Removed,
    Changed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactUpdate {
    pub id: Jid,
    pub notify: Option<String>,
    /// `None` when the picture did not change in this update.
    pub picture: Option<ProfilePictureChange>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatUpdate {
    pub id: Jid,
    pub name: Option<String>,
    pub unread_count: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Offer,
    Ringing,
    Timeout,
    Reject,
    Accept,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEvent {
    pub id: String,
    pub from: Jid,
    pub status: CallStatus,
    pub is_video: bool,
}

// ── Outbound ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundPayload {
    Text(String),
    Image { url: String, caption: Option<String> },
}

impl OutboundPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn image(url: impl Into<String>, caption: Option<String>) -> Self {
        Self::Image {
            url: url.into(),
            caption,
        }
    }
}

// ── Event batches ────────────────────────────────────────────────

/// Event kinds in dispatch priority order. The derived `Ord` is the order in
/// which a batch is handled: connection state, credentials, message arrivals,
/// then metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    ConnectionUpdate,
    CredsUpdate,
    HistorySet,
    MessagesUpsert,
    MessagesUpdate,
    ReceiptUpdate,
    MessagesReaction,
    PresenceUpdate,
    ChatsUpdate,
    ContactsUpdate,
    ChatsDelete,
    Call,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionUpdate => "connection.update",
            Self::CredsUpdate => "creds.update",
            Self::HistorySet => "messaging-history.set",
            Self::MessagesUpsert => "messages.upsert",
            Self::MessagesUpdate => "messages.update",
            Self::ReceiptUpdate => "message-receipt.update",
            Self::MessagesReaction => "messages.reaction",
            Self::PresenceUpdate => "presence.update",
            Self::ChatsUpdate => "chats.update",
            Self::ContactsUpdate => "contacts.update",
            Self::ChatsDelete => "chats.delete",
            Self::Call => "call",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ConnectionUpdate(ConnectionUpdate),
    CredsUpdate(CredentialsUpdate),
    HistorySet(HistorySet),
    MessagesUpsert(MessagesUpsert),
    MessagesUpdate(Vec<MessageUpdate>),
    ReceiptUpdate(Vec<ReceiptUpdate>),
    MessagesReaction(Vec<Reaction>),
    PresenceUpdate(PresenceUpdate),
    ChatsUpdate(Vec<ChatUpdate>),
    ContactsUpdate(Vec<ContactUpdate>),
    ChatsDelete(Vec<Jid>),
    Call(Vec<CallEvent>),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ConnectionUpdate(_) => EventKind::ConnectionUpdate,
            Self::CredsUpdate(_) => EventKind::CredsUpdate,
            Self::HistorySet(_) => EventKind::HistorySet,
            Self::MessagesUpsert(_) => EventKind::MessagesUpsert,
            Self::MessagesUpdate(_) => EventKind::MessagesUpdate,
            Self::ReceiptUpdate(_) => EventKind::ReceiptUpdate,
            Self::MessagesReaction(_) => EventKind::MessagesReaction,
            Self::PresenceUpdate(_) => EventKind::PresenceUpdate,
            Self::ChatsUpdate(_) => EventKind::ChatsUpdate,
            Self::ContactsUpdate(_) => EventKind::ContactsUpdate,
            Self::ChatsDelete(_) => EventKind::ChatsDelete,
            Self::Call(_) => EventKind::Call,
        }
    }
}

/// One atomically delivered group of events, at most one entry per kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventBatch {
    events: BTreeMap<EventKind, Event>,
}

impl EventBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(event: Event) -> Self {
        Self::new().with(event)
    }

    pub fn with(mut self, event: Event) -> Self {
        self.insert(event);
        self
    }

    /// Adds an event, returning the one it replaced for the same kind.
    pub fn insert(&mut self, event: Event) -> Option<Event> {
        self.events.insert(event.kind(), event)
    }

    pub fn get(&self, kind: EventKind) -> Option<&Event> {
        self.events.get(&kind)
    }

    pub fn remove(&mut self, kind: EventKind) -> Option<Event> {
        self.events.remove(&kind)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Kinds present, in dispatch priority order.
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.keys().copied().collect()
    }

    /// Drops every inbound message whose chat matches `drop`, removing
    /// message entries left empty.
    pub fn retain_messages(&mut self, drop: impl Fn(&Jid) -> bool) {
        if let Some(Event::MessagesUpsert(upsert)) = self.events.get_mut(&EventKind::MessagesUpsert)
        {
            upsert.messages.retain(|m| !drop(&m.key.remote_jid));
            if upsert.messages.is_empty() {
                self.events.remove(&EventKind::MessagesUpsert);
            }
        }
        if let Some(Event::HistorySet(history)) = self.events.get_mut(&EventKind::HistorySet) {
            history.messages.retain(|m| !drop(&m.key.remote_jid));
        }
    }
}

impl IntoIterator for EventBatch {
    type Item = Event;
    type IntoIter = std::collections::btree_map::IntoValues<EventKind, Event>;

    /// Yields events in dispatch priority order.
    fn into_iter(self) -> Self::IntoIter {
        self.events.into_values()
    }
}
