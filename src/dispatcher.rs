//! Sequential batch loop.
//!
//! Batches are handled one at a time and the next batch is not pulled until
//! every entry of the current one settled. Entries run in [`EventKind`]
//! priority order; a failing entry is logged and the rest still run. Command
//! handlers are spawned by the router and never awaited here.

use crate::commands::CommandRouter;
use crate::health;
use crate::session::{
    CloseOutcome, ContactUpdate, Event, EventBatch, EventKind, HistorySet, MessagesUpsert,
    ProfilePictureChange, SessionConnector, UpsertType,
};
use anyhow::{Context, Result};
use std::sync::Arc;

const COMPONENT: &str = "dispatcher";

/// What happened to each entry of one batch, in handling order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub handled: Vec<EventKind>,
    pub failed: Vec<EventKind>,
    /// Commands spawned while handling the batch.
    pub commands_spawned: usize,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct EventDispatcher {
    connector: Arc<SessionConnector>,
    router: CommandRouter,
}

impl EventDispatcher {
    pub fn new(connector: Arc<SessionConnector>, router: CommandRouter) -> Self {
        Self { connector, router }
    }

    /// Consume batches until the session is logged out. Returns the number of
    /// batches processed.
    pub async fn run(&self) -> Result<u64> {
        health::mark_component_ok(COMPONENT);
        let mut processed = 0u64;

        while let Some(batch) = self.connector.next_batch().await {
            let report = self.process_batch(batch).await;
            processed += 1;
            if report.is_clean() {
                health::mark_component_ok(COMPONENT);
            }
            if self.connector.is_terminal() {
                break;
            }
        }

        health::mark_component_error(COMPONENT, "session ended");
        tracing::info!("Event loop stopped after {processed} batch(es)");
        Ok(processed)
    }

    /// Handle every entry of `batch` in priority order. Stops early only when
    /// a connection entry ends the session for good.
    pub async fn process_batch(&self, batch: EventBatch) -> BatchReport {
        let mut report = BatchReport::default();

        for event in batch {
            let kind = event.kind();
            match self.handle(event, &mut report).await {
                Ok(()) => report.handled.push(kind),
                Err(e) => {
                    tracing::error!("Handling {} failed: {e:#}", kind.as_str());
                    health::mark_component_error(COMPONENT, format!("{}: {e}", kind.as_str()));
                    report.failed.push(kind);
                }
            }

            if kind == EventKind::ConnectionUpdate && self.connector.is_terminal() {
                break;
            }
        }

        report
    }

    async fn handle(&self, event: Event, report: &mut BatchReport) -> Result<()> {
        match event {
            Event::ConnectionUpdate(update) => {
                tracing::debug!("connection update {update:?}");
                match self.connector.on_connection_update(&update).await? {
                    Some(CloseOutcome::Reconnected { generation }) => {
                        tracing::info!("Continuing on session #{generation}");
                    }
                    Some(CloseOutcome::Terminal) | None => {}
                }
                Ok(())
            }
            Event::CredsUpdate(update) => self
                .connector
                .apply_credentials_update(update)
                .await
                .context("Failed to save credentials"),
            Event::HistorySet(history) => {
                log_history(&history);
                Ok(())
            }
            Event::MessagesUpsert(upsert) => {
                report.commands_spawned += self.handle_upsert(upsert).await?;
                Ok(())
            }
            Event::MessagesUpdate(updates) => {
                for update in &updates {
                    tracing::debug!(
                        "message {} in {} updated: status {:?}, deleted {}",
                        update.key.id,
                        update.key.remote_jid,
                        update.status,
                        update.deleted
                    );
                }
                Ok(())
            }
            Event::ReceiptUpdate(receipts) => {
                for receipt in &receipts {
                    tracing::debug!(
                        "receipt for {} from {} (read: {})",
                        receipt.key.id,
                        receipt.user,
                        receipt.read
                    );
                }
                Ok(())
            }
            Event::MessagesReaction(reactions) => {
                for reaction in &reactions {
                    tracing::debug!(
                        "{} reacted {:?} to {}",
                        reaction.sender,
                        reaction.text.as_deref().unwrap_or(""),
                        reaction.key.id
                    );
                }
                Ok(())
            }
            Event::PresenceUpdate(update) => {
                for (who, state) in &update.presences {
                    tracing::debug!("presence in {}: {who} is {}", update.chat, state.as_str());
                }
                Ok(())
            }
            Event::ChatsUpdate(chats) => {
                tracing::debug!("{} chat(s) updated", chats.len());
                Ok(())
            }
            Event::ContactsUpdate(contacts) => {
                for contact in &contacts {
                    self.handle_contact(contact).await;
                }
                Ok(())
            }
            Event::ChatsDelete(chats) => {
                tracing::info!(
                    "chats deleted {}",
                    chats.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(", ")
                );
                Ok(())
            }
            Event::Call(calls) => {
                for call in &calls {
                    tracing::info!(
                        "recv call event {} from {} ({:?}, video: {})",
                        call.id,
                        call.from,
                        call.status,
                        call.is_video
                    );
                }
                Ok(())
            }
        }
    }

    /// Route live messages. Replays are only logged. A message that fails to
    /// route does not stop the ones after it; the first error is returned
    /// once all were tried.
    async fn handle_upsert(&self, upsert: MessagesUpsert) -> Result<usize> {
        tracing::debug!(
            "recv {} message(s) ({:?})",
            upsert.messages.len(),
            upsert.kind
        );
        if upsert.kind != UpsertType::Notify {
            return Ok(0);
        }

        let mut spawned = 0;
        let mut first_error = None;
        for message in &upsert.messages {
            match self.router.route(message).await {
                Ok(Some(_)) => spawned += 1,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("{e:#}");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(spawned),
        }
    }

    async fn handle_contact(&self, contact: &ContactUpdate) {
        let Some(change) = contact.picture else {
            return;
        };
        let url = match change {
            ProfilePictureChange::Removed => None,
            ProfilePictureChange::Changed => self.connector.resolve_profile_image(&contact.id).await,
        };
        tracing::info!(
            "contact {} has a new profile pic: {}",
            contact.id,
            url.as_deref().unwrap_or("null")
        );
    }
}

fn log_history(history: &HistorySet) {
    tracing::info!(
        "recv {} chats, {} contacts, {} msgs (is latest: {})",
        history.chats.len(),
        history.contacts.len(),
        history.messages.len(),
        history.is_latest
    );
}
