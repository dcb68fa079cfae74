//! `/ia` and `/img` routing for live messages.

use crate::config::CommandsConfig;
use crate::presence::PresenceSequencer;
use crate::providers::{GenerationClient, is_failure};
use crate::session::{InboundMessage, Jid, OutboundPayload, SessionConnector};
use anyhow::{Context, Result};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Text completion.
    Davinci3,
    /// Image generation.
    Dalle,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Davinci3 => "davinci3",
            Self::Dalle => "dalle",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub kind: CommandKind,
    /// Body after the token, trimmed. May be empty.
    pub argument: String,
}

/// Token to command mapping, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTable {
    entries: Vec<(String, CommandKind)>,
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::from(&CommandsConfig::default())
    }
}

impl From<&CommandsConfig> for CommandTable {
    fn from(config: &CommandsConfig) -> Self {
        Self {
            entries: vec![
                (config.text_command.trim().to_string(), CommandKind::Davinci3),
                (config.image_command.trim().to_string(), CommandKind::Dalle),
            ],
        }
    }
}

impl CommandTable {
    /// Match the first whitespace-delimited word of `body` against the table.
    pub fn parse(&self, body: &str) -> Option<ParsedCommand> {
        let body = body.trim_start();
        let (token, rest) = body
            .split_once(char::is_whitespace)
            .unwrap_or((body, ""));
        let kind = self
            .entries
            .iter()
            .find(|(t, _)| t == token)
            .map(|(_, kind)| *kind)?;
        Some(ParsedCommand {
            kind,
            argument: rest.trim().to_string(),
        })
    }
}

/// A command that was recognized and handed to a background task.
#[derive(Debug)]
pub struct Routed {
    pub command: ParsedCommand,
    pub chat: Jid,
    pub task: JoinHandle<()>,
}

#[derive(Clone)]
pub struct CommandRouter {
    table: Arc<CommandTable>,
    connector: Arc<SessionConnector>,
    generation: GenerationClient,
    presence: PresenceSequencer,
}

impl CommandRouter {
    pub fn new(
        table: CommandTable,
        connector: Arc<SessionConnector>,
        generation: GenerationClient,
        presence: PresenceSequencer,
    ) -> Self {
        Self {
            table: Arc::new(table),
            connector,
            generation,
            presence,
        }
    }

    /// Whether a message may reach command parsing at all.
    pub fn accepts(message: &InboundMessage) -> bool {
        !message.key.from_me && !message.key.remote_jid.is_broadcast()
    }

    /// Mark a live message read and, when it starts with a known command,
    /// spawn its handler. The handler is not awaited.
    pub async fn route(&self, message: &InboundMessage) -> Result<Option<Routed>> {
        if !Self::accepts(message) {
            return Ok(None);
        }

        let chat = message.key.remote_jid.clone();
        tracing::info!("replying to {chat}");
        self.connector
            .mark_read(std::slice::from_ref(&message.key))
            .await
            .with_context(|| format!("Failed to mark message {} read", message.key.id))?;

        let Some(command) = message.text().and_then(|body| self.table.parse(body)) else {
            return Ok(None);
        };

        tracing::debug!(
            "Routing {} command from {chat} ({} chars)",
            command.kind,
            command.argument.chars().count()
        );
        let task = tokio::spawn(run_command(
            self.generation.clone(),
            self.presence.clone(),
            command.clone(),
            chat.clone(),
        ));
        Ok(Some(Routed {
            command,
            chat,
            task,
        }))
    }
}

async fn run_command(
    generation: GenerationClient,
    presence: PresenceSequencer,
    command: ParsedCommand,
    chat: Jid,
) {
    let payload = match command.kind {
        CommandKind::Davinci3 => {
            OutboundPayload::text(generation.complete_text(&command.argument).await)
        }
        CommandKind::Dalle => {
            let reply = generation.complete_image(&command.argument).await;
            if is_failure(&reply) {
                OutboundPayload::text(reply)
            } else {
                let caption = Some(command.argument).filter(|c| !c.is_empty());
                OutboundPayload::image(reply, caption)
            }
        }
    };

    match presence.send_with_typing(&payload, &chat).await {
        Ok(key) => tracing::debug!("Sent {} reply {} to {chat}", command.kind, key.id),
        Err(e) => tracing::warn!("Failed to deliver {} reply to {chat}: {e:#}", command.kind),
    }
}
