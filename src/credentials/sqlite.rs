//! SQLite credential store.
//!
//! One `device` row holds the static identity; `session_keys` holds one row
//! per peer. Every save rewrites both inside a single transaction with
//! `synchronous = FULL`, so a returned `save` is on disk. Each half of a key
//! pair has its own column, so key lengths are whatever the transport hands
//! us.

use super::{AccountIdentity, CredentialStore, Credentials, KeyPair, SignedPreKey};
use crate::session::Jid;
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

const DEVICE_ID: i64 = 1;

#[derive(Clone)]
pub struct SqliteCredentialStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCredentialStore {
    /// Opens (or creates) the database at `db_path`, creating parent
    /// directories as needed.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create session directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open session database {}", db_path.display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;",
        )?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS device (
                id INTEGER PRIMARY KEY,
                registration_id INTEGER NOT NULL,
                noise_public BLOB NOT NULL,
                noise_private BLOB NOT NULL,
                identity_public BLOB NOT NULL,
                identity_private BLOB NOT NULL,
                signed_pre_key_id INTEGER NOT NULL,
                signed_pre_key_public BLOB NOT NULL,
                signed_pre_key_private BLOB NOT NULL,
                signed_pre_key_signature BLOB NOT NULL,
                adv_secret_key BLOB NOT NULL,
                me_id TEXT,
                me_name TEXT,
                registered INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS session_keys (
                address TEXT NOT NULL,
                record BLOB NOT NULL,
                device_id INTEGER NOT NULL,
                PRIMARY KEY (address, device_id)
            );",
        )
        .context("Failed to initialize credential schema")?;
        Ok(())
    }
}

fn key_pair(row: &Row<'_>, prefix: &str) -> rusqlite::Result<KeyPair> {
    Ok(KeyPair {
        public: row.get(format!("{prefix}_public").as_str())?,
        private: row.get(format!("{prefix}_private").as_str())?,
    })
}

fn load_blocking(conn: &Connection) -> Result<Option<Credentials>> {
    let device = conn
        .query_row(
            "SELECT registration_id, noise_public, noise_private,
                    identity_public, identity_private,
                    signed_pre_key_id, signed_pre_key_public, signed_pre_key_private,
                    signed_pre_key_signature, adv_secret_key, me_id, me_name, registered
             FROM device WHERE id = ?1",
            params![DEVICE_ID],
            |row| {
                let me_id: Option<String> = row.get("me_id")?;
                let me_name: Option<String> = row.get("me_name")?;

                Ok(Credentials {
                    noise_key: key_pair(row, "noise")?,
                    signed_identity_key: key_pair(row, "identity")?,
                    signed_pre_key: SignedPreKey {
                        key_id: row.get("signed_pre_key_id")?,
                        key_pair: key_pair(row, "signed_pre_key")?,
                        signature: row.get("signed_pre_key_signature")?,
                    },
                    registration_id: row.get("registration_id")?,
                    adv_secret_key: row.get("adv_secret_key")?,
                    me: me_id.map(|id| AccountIdentity {
                        id: Jid::new(id),
                        name: me_name,
                    }),
                    registered: row.get::<_, i64>("registered")? != 0,
                    session_keys: BTreeMap::new(),
                })
            },
        )
        .optional()
        .context("Failed to read device credentials")?;

    let Some(mut credentials) = device else {
        return Ok(None);
    };

    let mut stmt = conn
        .prepare("SELECT address, record FROM session_keys WHERE device_id = ?1")
        .context("Failed to prepare session key query")?;
    let rows = stmt.query_map(params![DEVICE_ID], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
    })?;
    for row in rows {
        let (address, record) = row.context("Failed to read session key")?;
        credentials.session_keys.insert(address, record);
    }

    Ok(Some(credentials))
}

fn save_blocking(conn: &mut Connection, credentials: &Credentials) -> Result<()> {
    let tx = conn
        .transaction()
        .context("Failed to begin credential transaction")?;

    tx.execute(
        "INSERT OR REPLACE INTO device (
            id, registration_id, noise_public, noise_private,
            identity_public, identity_private,
            signed_pre_key_id, signed_pre_key_public, signed_pre_key_private,
            signed_pre_key_signature, adv_secret_key, me_id, me_name, registered, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            DEVICE_ID,
            credentials.registration_id,
            credentials.noise_key.public,
            credentials.noise_key.private,
            credentials.signed_identity_key.public,
            credentials.signed_identity_key.private,
            credentials.signed_pre_key.key_id,
            credentials.signed_pre_key.key_pair.public,
            credentials.signed_pre_key.key_pair.private,
            credentials.signed_pre_key.signature,
            credentials.adv_secret_key,
            credentials.me.as_ref().map(|me| me.id.to_string()),
            credentials.me.as_ref().and_then(|me| me.name.clone()),
            i64::from(credentials.registered),
            chrono::Utc::now().to_rfc3339(),
        ],
    )
    .context("Failed to write device credentials")?;

    tx.execute(
        "DELETE FROM session_keys WHERE device_id = ?1",
        params![DEVICE_ID],
    )?;
    {
        let mut insert = tx.prepare(
            "INSERT INTO session_keys (address, record, device_id) VALUES (?1, ?2, ?3)",
        )?;
        for (address, record) in &credentials.session_keys {
            insert.execute(params![address, record, DEVICE_ID])?;
        }
    }

    tx.commit().context("Failed to commit credentials")?;
    Ok(())
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn load(&self) -> Result<Option<Credentials>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || load_blocking(&conn.lock())).await?
    }

    async fn save(&self, credentials: &Credentials) -> Result<()> {
        let conn = self.conn.clone();
        let credentials = credentials.clone();
        tokio::task::spawn_blocking(move || save_blocking(&mut conn.lock(), &credentials)).await?
    }

    async fn clear(&self) -> Result<()> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = conn.lock();
            conn.execute_batch(
                "DELETE FROM session_keys;
                 DELETE FROM device;",
            )
            .context("Failed to clear credentials")?;
            Ok(())
        })
        .await?
    }
}
