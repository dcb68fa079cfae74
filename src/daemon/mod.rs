use crate::commands::{CommandRouter, CommandTable};
use crate::config::Config;
use crate::credentials::{self, CredentialStore, MemoryCredentialStore, SqliteCredentialStore};
use crate::dispatcher::EventDispatcher;
use crate::presence::PresenceSequencer;
use crate::providers::{self, GenerationClient, GenerationService, GenerationSettings};
use crate::session::{self, ReconnectPolicy, SessionConnector, Transport};
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

const STATUS_FLUSH_SECONDS: u64 = 5;

/// A fully wired bot: one connector and the dispatcher that drains it.
pub struct Bot {
    pub connector: Arc<SessionConnector>,
    pub dispatcher: EventDispatcher,
}

impl Bot {
    /// Load credentials and build every component around `transport`. Does
    /// not connect.
    pub async fn assemble(
        config: &Config,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        service: Arc<dyn GenerationService>,
    ) -> Result<Self> {
        let credentials = credentials::load_or_generate(store.as_ref())
            .await
            .with_context(|| format!("Failed to load credentials from {} store", store.name()))?;

        let connector = Arc::new(SessionConnector::new(
            transport,
            store,
            credentials,
            ReconnectPolicy::from(&config.reliability),
        ));
        let presence = PresenceSequencer::new(Arc::clone(&connector), &config.presence);
        let generation = GenerationClient::new(
            service,
            GenerationSettings::from(&config.generation),
        );
        let router = CommandRouter::new(
            CommandTable::from(&config.commands),
            Arc::clone(&connector),
            generation,
            presence,
        );

        Ok(Self {
            dispatcher: EventDispatcher::new(Arc::clone(&connector), router),
            connector,
        })
    }

    /// Connect and process events until logout.
    pub async fn run(&self) -> Result<u64> {
        self.connector.connect_with_retry().await?;
        self.dispatcher.run().await
    }
}

fn open_store(config: &Config, ephemeral: bool) -> Result<Arc<dyn CredentialStore>> {
    if ephemeral {
        tracing::info!("Ephemeral session: credentials stay in memory");
        return Ok(Arc::new(MemoryCredentialStore::new()));
    }
    Ok(Arc::new(SqliteCredentialStore::open(
        &config.session.credentials_path,
    )?))
}

pub async fn run(config: Config, ephemeral: bool) -> Result<()> {
    crate::health::mark_component_ok("daemon");

    let transport = session::create_transport(&config.session.transport)?;
    let store = open_store(&config, ephemeral)?;
    let service = providers::create_service(&config.generation);
    if let Err(e) = service.warmup().await {
        tracing::warn!("Generation service warmup failed: {e}");
    }

    let bot = Bot::assemble(&config, transport, store, service).await?;
    let state_writer = spawn_state_writer(config.clone());

    println!("🤖 wabot started");
    println!("   Transport: {}", config.session.transport);
    println!(
        "   Commands:  {} <prompt>, {} <description>",
        config.commands.text_command, config.commands.image_command
    );
    println!("   Ctrl+C to stop");

    let result = tokio::select! {
        result = bot.run() => result.map(|batches| {
            tracing::info!("Session ended after {batches} batch(es)");
        }),
        signal = tokio::signal::ctrl_c() => {
            crate::health::mark_component_error("daemon", "shutdown requested");
            signal.context("Failed to listen for Ctrl+C")
        }
    };

    state_writer.abort();
    let _ = state_writer.await;
    write_state_file(&config.state_file_path()).await;
    result
}

/// Print the last written health snapshot and the stored identity.
pub async fn status(config: &Config) -> Result<()> {
    let path = config.state_file_path();
    match tokio::fs::read_to_string(&path).await {
        Ok(raw) => {
            let snapshot: serde_json::Value = serde_json::from_str(&raw)
                .with_context(|| format!("Malformed state file {}", path.display()))?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Err(_) => println!("No daemon state at {} (not running yet?)", path.display()),
    }

    let credentials_path = &config.session.credentials_path;
    if !credentials_path.exists() {
        println!("Session:  not paired ({} missing)", credentials_path.display());
        return Ok(());
    }
    let store = SqliteCredentialStore::open(credentials_path)?;
    match store.load().await? {
        Some(creds) => {
            let account = creds
                .me
                .as_ref()
                .map_or_else(|| "unpaired".to_string(), |me| me.id.to_string());
            println!("Session:  {account} (registered: {})", creds.registered);
            println!("Identity: {}", creds.signed_identity_key.fingerprint());
        }
        None => println!("Session:  empty store at {}", credentials_path.display()),
    }
    Ok(())
}

/// Forget the stored session so the next run pairs from scratch.
pub async fn logout(config: &Config) -> Result<()> {
    let path = &config.session.credentials_path;
    if !path.exists() {
        println!("Nothing to clear at {}", path.display());
        return Ok(());
    }
    SqliteCredentialStore::open(path)?.clear().await?;
    println!("Cleared stored session at {}", path.display());
    Ok(())
}

async fn write_state_file(path: &Path) {
    let mut json = crate::health::snapshot_json();
    if let Some(obj) = json.as_object_mut() {
        obj.insert(
            "written_at".into(),
            serde_json::json!(Utc::now().to_rfc3339()),
        );
    }
    let data = serde_json::to_vec_pretty(&json).unwrap_or_else(|_| b"{}".to_vec());
    if let Err(e) = tokio::fs::write(path, data).await {
        tracing::debug!("Failed to write state file {}: {e}", path.display());
    }
}

fn spawn_state_writer(config: Config) -> JoinHandle<()> {
    tokio::spawn(async move {
        let path = config.state_file_path();
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }

        let mut interval = tokio::time::interval(Duration::from_secs(STATUS_FLUSH_SECONDS));
        loop {
            interval.tick().await;
            write_state_file(&path).await;
        }
    })
}
