use super::traits::{ConnectOptions, Connection, Session, Transport, TransportError};
use super::types::{
    ConnectionUpdate, DisconnectReason, Event, EventBatch, InboundMessage, Jid, MessageContent,
    MessageKey, MessagesUpsert, OutboundPayload, PresenceState, ProtocolVersion, UpsertType,
    VersionInfo,
};
use crate::credentials::{AccountIdentity, Credentials, CredentialsUpdate};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Chat the operator types into.
pub const OPERATOR_JID: &str = "operator@console";
/// Account the console session pretends to be.
pub const CONSOLE_ACCOUNT_JID: &str = "wabot@console";

const CONSOLE_VERSION: ProtocolVersion = ProtocolVersion([1, 0, 0]);

/// Stdin/stdout transport, always available, no network.
///
/// Every non-empty stdin line arrives as a live message from
/// [`OPERATOR_JID`]. `/quit`, `/exit` or end of input closes the session as a
/// logout so the process stops instead of reconnecting.
pub struct ConsoleTransport;

impl ConsoleTransport {
    pub fn new() -> Self {
        Self
    }
}

/// Turn one stdin line into a live message, skipping blanks.
fn line_to_message(line: &str) -> Option<InboundMessage> {
    let text = line.trim();
    if text.is_empty() {
        return None;
    }
    Some(InboundMessage {
        key: MessageKey {
            remote_jid: Jid::new(OPERATOR_JID),
            id: Uuid::new_v4().to_string(),
            from_me: false,
            participant: None,
        },
        content: Some(MessageContent::Conversation(text.to_string())),
        push_name: Some("operator".into()),
        timestamp: chrono::Utc::now().timestamp().max(0) as u64,
    })
}

fn is_quit(line: &str) -> bool {
    matches!(line.trim(), "/quit" | "/exit")
}

/// First batch of a console session: open, plus pairing on first run.
fn opening_batch(credentials: &Credentials) -> EventBatch {
    let batch = EventBatch::single(Event::ConnectionUpdate(ConnectionUpdate::open()));
    if credentials.registered {
        return batch;
    }
    batch.with(Event::CredsUpdate(CredentialsUpdate {
        me: Some(AccountIdentity {
            id: Jid::new(CONSOLE_ACCOUNT_JID),
            name: Some("wabot".into()),
        }),
        registered: Some(true),
        ..CredentialsUpdate::default()
    }))
}

/// Forward input lines as live messages until quit, end of input, or the
/// receiving side goes away. A reader left over from an earlier connection
/// stops as soon as its receiver is dropped, so only the current session
/// consumes input.
async fn pump_lines<R>(
    reader: R,
    tx: mpsc::Sender<EventBatch>,
    session: Arc<ConsoleSession>,
    ignore: fn(&Jid) -> bool,
) where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let next = tokio::select! {
            () = tx.closed() => return,
            next = lines.next_line() => next,
        };
        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Console read failed: {e}");
                break;
            }
        };
        if is_quit(&line) {
            break;
        }
        let Some(message) = line_to_message(&line) else {
            continue;
        };
        if ignore(&message.key.remote_jid) {
            continue;
        }
        let batch = EventBatch::single(Event::MessagesUpsert(MessagesUpsert {
            messages: vec![message],
            kind: UpsertType::Notify,
        }));
        if tx.send(batch).await.is_err() {
            return;
        }
    }

    session.open.store(false, Ordering::SeqCst);
    let _ = tx
        .send(EventBatch::single(Event::ConnectionUpdate(
            ConnectionUpdate::closed(DisconnectReason::LoggedOut),
        )))
        .await;
}

#[async_trait]
impl Transport for ConsoleTransport {
    fn name(&self) -> &str {
        "console"
    }

    async fn latest_version(&self) -> anyhow::Result<VersionInfo> {
        Ok(VersionInfo {
            version: CONSOLE_VERSION,
            is_latest: true,
        })
    }

    async fn connect(
        &self,
        credentials: &Credentials,
        options: &ConnectOptions,
    ) -> Result<Connection, TransportError> {
        let (tx, rx) = mpsc::channel(32);
        let session = Arc::new(ConsoleSession {
            open: AtomicBool::new(true),
        });

        tx.send(opening_batch(credentials))
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        tokio::spawn(pump_lines(
            BufReader::new(io::stdin()),
            tx,
            Arc::clone(&session),
            options.ignore_jid,
        ));

        Ok(Connection {
            session,
            events: rx,
        })
    }
}

pub struct ConsoleSession {
    open: AtomicBool,
}

impl ConsoleSession {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Closed(DisconnectReason::ConnectionClosed))
        }
    }
}

#[async_trait]
impl Session for ConsoleSession {
    async fn send_message(
        &self,
        to: &Jid,
        payload: &OutboundPayload,
    ) -> Result<MessageKey, TransportError> {
        self.ensure_open()?;
        match payload {
            OutboundPayload::Text(text) => println!("{text}"),
            OutboundPayload::Image { url, caption } => {
                println!("🖼  {url}");
                if let Some(caption) = caption {
                    println!("   {caption}");
                }
            }
        }
        Ok(MessageKey {
            remote_jid: to.clone(),
            id: Uuid::new_v4().to_string(),
            from_me: true,
            participant: None,
        })
    }

    async fn send_presence_update(
        &self,
        state: PresenceState,
        to: &Jid,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        if state == PresenceState::Composing {
            eprintln!("… typing");
        }
        tracing::debug!("Console presence {} for {to}", state.as_str());
        Ok(())
    }

    async fn presence_subscribe(&self, to: &Jid) -> Result<(), TransportError> {
        self.ensure_open()?;
        tracing::debug!("Console presence subscribe for {to}");
        Ok(())
    }

    async fn read_messages(&self, keys: &[MessageKey]) -> Result<(), TransportError> {
        self.ensure_open()?;
        tracing::debug!("Console marked {} message(s) read", keys.len());
        Ok(())
    }

    async fn profile_picture_url(&self, _jid: &Jid) -> Result<Option<String>, TransportError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_transport_name() {
        assert_eq!(ConsoleTransport::new().name(), "console");
    }

    #[test]
    fn blank_lines_are_skipped() {
        assert!(line_to_message("   ").is_none());
    }

    #[test]
    fn lines_become_live_operator_messages() {
        let msg = line_to_message("  /ia hello  ").unwrap();
        assert_eq!(msg.key.remote_jid.as_str(), OPERATOR_JID);
        assert!(!msg.key.from_me);
        assert_eq!(msg.text(), Some("/ia hello"));
    }

    #[test]
    fn quit_commands_are_recognized() {
        assert!(is_quit("/quit"));
        assert!(is_quit(" /exit "));
        assert!(!is_quit("/ia quit"));
    }

    #[test]
    fn first_connect_pairs_the_console_account() {
        let batch = opening_batch(&Credentials::generate());
        let Some(Event::CredsUpdate(update)) = batch.get(super::super::EventKind::CredsUpdate)
        else {
            panic!("expected a credentials update");
        };
        assert_eq!(update.registered, Some(true));
        assert_eq!(
            update.me.as_ref().map(|me| me.id.as_str()),
            Some(CONSOLE_ACCOUNT_JID)
        );
    }

    #[test]
    fn registered_credentials_only_open() {
        let mut creds = Credentials::generate();
        creds.registered = true;
        assert_eq!(opening_batch(&creds).len(), 1);
    }

    fn open_session() -> Arc<ConsoleSession> {
        Arc::new(ConsoleSession {
            open: AtomicBool::new(true),
        })
    }

    #[tokio::test]
    async fn reader_stops_when_its_receiver_is_dropped() {
        // The writer half stays alive, so input never ends on its own.
        let (_writer, reader) = tokio::io::duplex(64);
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(pump_lines(BufReader::new(reader), tx, open_session(), |_| false));

        drop(rx);
        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .expect("reader should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn end_of_input_logs_out_after_pending_lines() {
        let input: &[u8] = b"/ia hello\n\n";
        let (tx, mut rx) = mpsc::channel(4);
        let session = open_session();
        pump_lines(input, tx, Arc::clone(&session), |_| false).await;

        let first = rx.recv().await.unwrap();
        let Some(Event::MessagesUpsert(upsert)) = first.get(super::super::EventKind::MessagesUpsert)
        else {
            panic!("expected a message batch");
        };
        assert_eq!(upsert.messages[0].text(), Some("/ia hello"));

        let last = rx.recv().await.unwrap();
        assert_eq!(
            last.get(super::super::EventKind::ConnectionUpdate),
            Some(&Event::ConnectionUpdate(ConnectionUpdate::closed(
                DisconnectReason::LoggedOut
            )))
        );
        assert!(!session.open.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn closed_session_rejects_sends() {
        let session = ConsoleSession {
            open: AtomicBool::new(false),
        };
        let err = session
            .send_message(&Jid::new(OPERATOR_JID), &OutboundPayload::text("hi"))
            .await
            .expect_err("closed");
        assert!(matches!(err, TransportError::Closed(_)));
    }
}
