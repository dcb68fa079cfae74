//! Typing choreography around every reply.

use crate::config::PresenceConfig;
use crate::session::{Jid, MessageKey, OutboundPayload, PresenceState, SessionConnector};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct PresenceSequencer {
    connector: Arc<SessionConnector>,
    subscribe_delay: Duration,
    composing_delay: Duration,
}

impl PresenceSequencer {
    pub fn new(connector: Arc<SessionConnector>, config: &PresenceConfig) -> Self {
        Self {
            connector,
            subscribe_delay: Duration::from_millis(config.subscribe_delay_ms),
            composing_delay: Duration::from_millis(config.composing_delay_ms),
        }
    }

    /// Subscribe, pause, show "composing", pause, show "paused", send.
    /// Stops at the first failing step.
    pub async fn send_with_typing(
        &self,
        payload: &OutboundPayload,
        target: &Jid,
    ) -> Result<MessageKey> {
        self.connector
            .subscribe_presence(target)
            .await
            .with_context(|| format!("Presence subscribe for {target} failed"))?;
        tokio::time::sleep(self.subscribe_delay).await;

        self.connector
            .set_presence(target, PresenceState::Composing)
            .await
            .with_context(|| format!("Composing presence for {target} failed"))?;
        tokio::time::sleep(self.composing_delay).await;

        self.connector
            .set_presence(target, PresenceState::Paused)
            .await
            .with_context(|| format!("Paused presence for {target} failed"))?;

        self.connector
            .send(target, payload)
            .await
            .with_context(|| format!("Reply to {target} failed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{Credentials, MemoryCredentialStore};
    use crate::session::ReconnectPolicy;
    use crate::session::mock::MockTransport;

    fn no_delays() -> PresenceConfig {
        PresenceConfig {
            subscribe_delay_ms: 0,
            composing_delay_ms: 0,
        }
    }

    async fn connected(transport: &Arc<MockTransport>) -> Arc<SessionConnector> {
        let connector = Arc::new(SessionConnector::new(
            transport.clone(),
            Arc::new(MemoryCredentialStore::new()),
            Credentials::generate(),
            ReconnectPolicy::immediate(),
        ));
        connector.connect().await.unwrap();
        connector
    }

    #[tokio::test]
    async fn steps_run_in_order_before_send() {
        let transport = Arc::new(MockTransport::new());
        let sequencer = PresenceSequencer::new(connected(&transport).await, &no_delays());
        let chat = Jid::new("5511@s.whatsapp.net");

        sequencer
            .send_with_typing(&OutboundPayload::text("hi"), &chat)
            .await
            .unwrap();

        assert_eq!(
            *transport.log().lock(),
            vec![
                "subscribe:5511@s.whatsapp.net",
                "presence:composing:5511@s.whatsapp.net",
                "presence:paused:5511@s.whatsapp.net",
                "send:5511@s.whatsapp.net",
            ]
        );
    }

    #[tokio::test]
    async fn delays_are_honored() {
        let transport = Arc::new(MockTransport::new());
        let config = PresenceConfig {
            subscribe_delay_ms: 20,
            composing_delay_ms: 30,
        };
        let sequencer = PresenceSequencer::new(connected(&transport).await, &config);

        let started = std::time::Instant::now();
        sequencer
            .send_with_typing(&OutboundPayload::text("hi"), &Jid::new("1@s.whatsapp.net"))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn send_failure_propagates_after_presence_steps() {
        let transport = Arc::new(MockTransport::new());
        let sequencer = PresenceSequencer::new(connected(&transport).await, &no_delays());
        transport.latest().fail_sends();

        let err = sequencer
            .send_with_typing(&OutboundPayload::text("hi"), &Jid::new("1@s.whatsapp.net"))
            .await
            .expect_err("send fails");
        assert!(err.to_string().contains("Reply to"));
        assert_eq!(transport.log().lock().len(), 3);
    }

    #[tokio::test]
    async fn no_session_aborts_at_first_step() {
        let transport = Arc::new(MockTransport::new());
        let connector = Arc::new(SessionConnector::new(
            transport.clone(),
            Arc::new(MemoryCredentialStore::new()),
            Credentials::generate(),
            ReconnectPolicy::immediate(),
        ));
        let sequencer = PresenceSequencer::new(connector, &no_delays());

        let err = sequencer
            .send_with_typing(&OutboundPayload::text("hi"), &Jid::new("1@s.whatsapp.net"))
            .await
            .expect_err("not connected");
        assert!(err.to_string().contains("Presence subscribe"));
        assert!(transport.log().lock().is_empty());
    }
}
