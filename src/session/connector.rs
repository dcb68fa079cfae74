//! Session lifecycle: connect, replace on recoverable close, stop on logout.
//!
//! The connector owns the only "current session" slot. Reconnecting builds a
//! new session and swaps the slot; the old handle is dropped and never reused.
//! Senders look the slot up on every call, so a task that raced a reconnect
//! fails its next call instead of talking to a dead session.

use super::traits::{ConnectOptions, Session, Transport, TransportError};
use super::types::{
    ConnectionStatus, ConnectionUpdate, DisconnectReason, Event, EventBatch, Jid, MessageKey,
    OutboundPayload, PresenceState, ProtocolVersion, VersionInfo,
};
use crate::config::ReliabilityConfig;
use crate::credentials::{CredentialStore, Credentials, CredentialsUpdate};
use crate::health;
use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::time::Duration;

const COMPONENT: &str = "session";

/// Used when the transport cannot report its latest version.
pub const FALLBACK_VERSION: ProtocolVersion = ProtocolVersion([2, 3000, 1_015_901_307]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initializing,
    Open,
    ClosedRecoverable,
    ClosedTerminal,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Open => "open",
            Self::ClosedRecoverable => "closed (recoverable)",
            Self::ClosedTerminal => "closed (terminal)",
        }
    }
}

/// Delay between failed connect attempts. The first reconnect after a
/// recoverable close is always immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl ReconnectPolicy {
    pub fn immediate() -> Self {
        Self {
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    fn next(self, current: Duration) -> Duration {
        if current.is_zero() {
            self.initial_backoff.min(self.max_backoff)
        } else {
            current.saturating_mul(2).min(self.max_backoff)
        }
    }
}

impl From<&ReliabilityConfig> for ReconnectPolicy {
    fn from(config: &ReliabilityConfig) -> Self {
        let initial = config.reconnect_initial_backoff_ms;
        Self {
            initial_backoff: Duration::from_millis(initial),
            max_backoff: Duration::from_millis(config.reconnect_max_backoff_ms.max(initial)),
        }
    }
}

/// What the connector did with a close signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Reconnected { generation: u64 },
    Terminal,
}

struct ActiveSession {
    generation: u64,
    version: ProtocolVersion,
    session: Arc<dyn Session>,
}

pub struct SessionConnector {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    /// In-memory credentials. Held across `save` so a second update waits
    /// until the first is durable.
    credentials: tokio::sync::Mutex<Credentials>,
    active: RwLock<Option<ActiveSession>>,
    events: tokio::sync::Mutex<Option<mpsc::Receiver<EventBatch>>>,
    state: Mutex<ConnectionState>,
    generation: AtomicU64,
    connect_attempts: AtomicU64,
    policy: ReconnectPolicy,
}

impl SessionConnector {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        credentials: Credentials,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            transport,
            store,
            credentials: tokio::sync::Mutex::new(credentials),
            active: RwLock::new(None),
            events: tokio::sync::Mutex::new(None),
            state: Mutex::new(ConnectionState::Initializing),
            generation: AtomicU64::new(0),
            connect_attempts: AtomicU64::new(0),
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_terminal(&self) -> bool {
        self.state() == ConnectionState::ClosedTerminal
    }

    /// Generation of the current session, `None` when no session is open.
    pub fn session_generation(&self) -> Option<u64> {
        self.active.read().as_ref().map(|a| a.generation)
    }

    pub fn session_version(&self) -> Option<ProtocolVersion> {
        self.active.read().as_ref().map(|a| a.version)
    }

    /// Total `Transport::connect` calls made so far, failed ones included.
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub async fn credentials(&self) -> Credentials {
        self.credentials.lock().await.clone()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.lock(), state);
        if previous != state {
            tracing::debug!(
                "Session state {} -> {}",
                previous.as_str(),
                state.as_str()
            );
        }
    }

    async fn negotiate_version(&self) -> VersionInfo {
        match self.transport.latest_version().await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(
                    "Failed to fetch latest protocol version from {}: {e}; using {FALLBACK_VERSION}",
                    self.transport.name()
                );
                VersionInfo {
                    version: FALLBACK_VERSION,
                    is_latest: false,
                }
            }
        }
    }

    /// One connect attempt. On success the new session replaces whatever was
    /// in the slot and its event stream becomes the one `next_batch` reads.
    pub async fn connect(&self) -> Result<u64, TransportError> {
        self.set_state(ConnectionState::Initializing);

        let info = self.negotiate_version().await;
        tracing::info!("using WA v{}, isLatest: {}", info.version, info.is_latest);

        let options = ConnectOptions {
            version: info.version,
            ignore_jid: Jid::is_broadcast,
        };
        let credentials = self.credentials.lock().await.clone();

        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let connection = self.transport.connect(&credentials, &options).await?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.events.lock().await = Some(connection.events);
        *self.active.write() = Some(ActiveSession {
            generation,
            version: info.version,
            session: connection.session,
        });

        tracing::info!(
            "Opened session #{generation} over {} transport",
            self.transport.name()
        );
        Ok(generation)
    }

    /// Connect, backing off between failed attempts, until a session opens or
    /// the transport reports a logout.
    pub async fn connect_with_retry(&self) -> Result<u64> {
        let mut backoff = Duration::ZERO;
        loop {
            match self.connect().await {
                Ok(generation) => return Ok(generation),
                Err(e) if e.is_terminal() => {
                    self.enter_terminal();
                    return Err(e).context("Transport rejected the stored credentials");
                }
                Err(e) => {
                    backoff = self.policy.next(backoff);
                    health::mark_component_error(COMPONENT, &e);
                    tracing::warn!(
                        "Connect via {} failed: {e}; retrying in {}ms",
                        self.transport.name(),
                        backoff.as_millis()
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Apply a connection update: track open/connecting, reconnect on a
    /// recoverable close, stop on logout.
    pub async fn on_connection_update(&self, update: &ConnectionUpdate) -> Result<Option<CloseOutcome>> {
        if update.qr.is_some() {
            tracing::info!("Pairing QR code received; link this device from the phone");
        }

        match update.connection {
            Some(ConnectionStatus::Connecting) => {
                self.set_state(ConnectionState::Initializing);
                Ok(None)
            }
            Some(ConnectionStatus::Open) => {
                self.set_state(ConnectionState::Open);
                health::mark_component_ok(COMPONENT);
                tracing::info!("Connection opened");
                Ok(None)
            }
            Some(ConnectionStatus::Close) => {
                let reason = update
                    .last_disconnect
                    .unwrap_or(DisconnectReason::ConnectionClosed);
                self.handle_close(reason).await.map(Some)
            }
            None => Ok(None),
        }
    }

    /// The recoverable/terminal transition.
    pub async fn handle_close(&self, reason: DisconnectReason) -> Result<CloseOutcome> {
        let stale = self.active.write().take();
        *self.events.lock().await = None;

        if reason.is_terminal() {
            self.enter_terminal();
            return Ok(CloseOutcome::Terminal);
        }

        self.set_state(ConnectionState::ClosedRecoverable);
        health::mark_component_error(COMPONENT, reason);
        health::bump_component_restart(COMPONENT);
        tracing::warn!(
            "Session #{} closed ({reason}), reconnecting",
            stale.as_ref().map_or(0, |s| s.generation)
        );
        drop(stale);

        let generation = self.connect_with_retry().await?;
        Ok(CloseOutcome::Reconnected { generation })
    }

    fn enter_terminal(&self) {
        self.active.write().take();
        self.set_state(ConnectionState::ClosedTerminal);
        health::mark_component_error(COMPONENT, "logged out");
        tracing::error!("Connection closed. You are logged out.");
    }

    /// Next batch from the current session, with broadcast-class chats
    /// removed. A stream that ends without a close event is reported as a
    /// lost connection. Returns `None` once terminal or never connected.
    pub async fn next_batch(&self) -> Option<EventBatch> {
        if self.is_terminal() {
            return None;
        }

        let mut guard = self.events.lock().await;
        let receiver = guard.as_mut()?;
        match receiver.recv().await {
            Some(mut batch) => {
                batch.retain_messages(Jid::is_broadcast);
                Some(batch)
            }
            None => {
                *guard = None;
                tracing::warn!("Event stream ended without a close event");
                Some(EventBatch::single(Event::ConnectionUpdate(
                    ConnectionUpdate::closed(DisconnectReason::ConnectionLost),
                )))
            }
        }
    }

    /// Merge a credentials update and persist it before returning.
    pub async fn apply_credentials_update(&self, update: CredentialsUpdate) -> Result<()> {
        let mut credentials = self.credentials.lock().await;
        let mut merged = credentials.clone();
        if !merged.apply(update) {
            tracing::debug!("Credentials update carried no changes");
        }
        // Memory only moves once the store has the merged state.
        self.store
            .save(&merged)
            .await
            .with_context(|| format!("Failed to persist credentials to {} store", self.store.name()))?;
        *credentials = merged;
        Ok(())
    }

    fn current(&self) -> Result<Arc<dyn Session>, TransportError> {
        self.active
            .read()
            .as_ref()
            .map(|a| Arc::clone(&a.session))
            .ok_or(TransportError::NotConnected)
    }

    pub async fn send(
        &self,
        to: &Jid,
        payload: &OutboundPayload,
    ) -> Result<MessageKey, TransportError> {
        self.current()?.send_message(to, payload).await
    }

    pub async fn set_presence(&self, to: &Jid, state: PresenceState) -> Result<(), TransportError> {
        self.current()?.send_presence_update(state, to).await
    }

    pub async fn subscribe_presence(&self, to: &Jid) -> Result<(), TransportError> {
        self.current()?.presence_subscribe(to).await
    }

    pub async fn mark_read(&self, keys: &[MessageKey]) -> Result<(), TransportError> {
        self.current()?.read_messages(keys).await
    }

    /// Best effort: any failure means "no picture".
    pub async fn resolve_profile_image(&self, jid: &Jid) -> Option<String> {
        let session = self.current().ok()?;
        match session.profile_picture_url(jid).await {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!("Profile picture lookup for {jid} failed: {e}");
                None
            }
        }
    }
}
