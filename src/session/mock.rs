//! Scripted in-memory transport for unit tests.

use super::traits::{ConnectOptions, Connection, Session, Transport, TransportError};
use super::types::{
    DisconnectReason, EventBatch, Jid, MessageKey, OutboundPayload, PresenceState,
    ProtocolVersion, VersionInfo,
};
use crate::credentials::Credentials;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// Shared, ordered record of every outbound call.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub struct MockTransport {
    sessions: Mutex<Vec<Arc<MockSession>>>,
    credentials_seen: Mutex<Vec<Credentials>>,
    failures_left: AtomicUsize,
    reject: AtomicBool,
    log: CallLog,
}

impl MockTransport {
    pub const VERSION: ProtocolVersion = ProtocolVersion([2, 2413, 1]);

    pub fn new() -> Self {
        Self::with_log(CallLog::default())
    }

    pub fn with_log(log: CallLog) -> Self {
        Self {
            sessions: Mutex::new(Vec::new()),
            credentials_seen: Mutex::new(Vec::new()),
            failures_left: AtomicUsize::new(0),
            reject: AtomicBool::new(false),
            log,
        }
    }

    pub fn log(&self) -> CallLog {
        Arc::clone(&self.log)
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn reject_credentials(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }

    pub fn connect_calls(&self) -> usize {
        self.credentials_seen.lock().len()
    }

    pub fn credentials_seen(&self) -> Vec<Credentials> {
        self.credentials_seen.lock().clone()
    }

    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.sessions.lock().clone()
    }

    pub fn latest(&self) -> Arc<MockSession> {
        self.sessions
            .lock()
            .last()
            .cloned()
            .expect("no session opened yet")
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn latest_version(&self) -> anyhow::Result<VersionInfo> {
        Ok(VersionInfo {
            version: Self::VERSION,
            is_latest: true,
        })
    }

    async fn connect(
        &self,
        credentials: &Credentials,
        _options: &ConnectOptions,
    ) -> Result<Connection, TransportError> {
        self.credentials_seen.lock().push(credentials.clone());

        if self.reject.load(Ordering::SeqCst) {
            return Err(TransportError::Closed(DisconnectReason::LoggedOut));
        }
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::Request("handshake refused".into()));
        }

        let (tx, rx) = mpsc::channel(16);
        let session = Arc::new(MockSession {
            tx: Mutex::new(Some(tx)),
            sent: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            fail_profiles: AtomicBool::new(false),
            log: Arc::clone(&self.log),
        });
        self.sessions.lock().push(Arc::clone(&session));
        Ok(Connection {
            session,
            events: rx,
        })
    }
}

pub struct MockSession {
    tx: Mutex<Option<mpsc::Sender<EventBatch>>>,
    sent: Mutex<Vec<(Jid, OutboundPayload)>>,
    fail_sends: AtomicBool,
    fail_profiles: AtomicBool,
    log: CallLog,
}

impl MockSession {
    pub async fn emit(&self, batch: EventBatch) {
        let tx = self.tx.lock().clone().expect("stream already closed");
        tx.send(batch).await.expect("receiver dropped");
    }

    pub fn close_stream(&self) {
        self.tx.lock().take();
    }

    pub fn sent(&self) -> Vec<(Jid, OutboundPayload)> {
        self.sent.lock().clone()
    }

    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub fn fail_profile_lookups(&self) {
        self.fail_profiles.store(true, Ordering::SeqCst);
    }

    fn record(&self, entry: String) {
        self.log.lock().push(entry);
    }
}

#[async_trait]
impl Session for MockSession {
    async fn send_message(
        &self,
        to: &Jid,
        payload: &OutboundPayload,
    ) -> Result<MessageKey, TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Closed(DisconnectReason::ConnectionLost));
        }
        self.record(format!("send:{to}"));
        self.sent.lock().push((to.clone(), payload.clone()));
        Ok(MessageKey {
            remote_jid: to.clone(),
            id: format!("out-{}", self.sent.lock().len()),
            from_me: true,
            participant: None,
        })
    }

    async fn send_presence_update(
        &self,
        state: PresenceState,
        to: &Jid,
    ) -> Result<(), TransportError> {
        self.record(format!("presence:{}:{to}", state.as_str()));
        Ok(())
    }

    async fn presence_subscribe(&self, to: &Jid) -> Result<(), TransportError> {
        self.record(format!("subscribe:{to}"));
        Ok(())
    }

    async fn read_messages(&self, keys: &[MessageKey]) -> Result<(), TransportError> {
        for key in keys {
            self.record(format!("read:{}", key.id));
        }
        Ok(())
    }

    async fn profile_picture_url(&self, jid: &Jid) -> Result<Option<String>, TransportError> {
        if self.fail_profiles.load(Ordering::SeqCst) {
            return Err(TransportError::Request("item-not-found".into()));
        }
        Ok(Some(format!("https://pps.example/{}.jpg", jid.user())))
    }
}
