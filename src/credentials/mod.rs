//! Long-lived authentication state and the stores that persist it.
//!
//! Key material is opaque to this crate: the transport rotates it and reports
//! changes as [`CredentialsUpdate`]s, and the connector persists the merged
//! result through a [`CredentialStore`] before accepting the next change.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryCredentialStore;
pub use sqlite::SqliteCredentialStore;

use crate::session::Jid;
use anyhow::Result;
use async_trait::async_trait;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const KEY_LEN: usize = 32;
const SIGNATURE_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub public: Vec<u8>,
    pub private: Vec<u8>,
}

impl KeyPair {
    fn random(rng: &mut impl RngCore) -> Self {
        Self {
            public: random_bytes(rng, KEY_LEN),
            private: random_bytes(rng, KEY_LEN),
        }
    }

    /// Short hex fingerprint of the public half, safe to print.
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.public[..self.public.len().min(8)])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPreKey {
    pub key_id: u32,
    pub key_pair: KeyPair,
    pub signature: Vec<u8>,
}

/// The account this device is linked to, known once pairing completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountIdentity {
    pub id: Jid,
    pub name: Option<String>,
}

/// Static identity keys plus per-peer session keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub noise_key: KeyPair,
    pub signed_identity_key: KeyPair,
    pub signed_pre_key: SignedPreKey,
    pub registration_id: u32,
    pub adv_secret_key: Vec<u8>,
    pub me: Option<AccountIdentity>,
    pub registered: bool,
    /// Session key records by peer address.
    pub session_keys: BTreeMap<String, Vec<u8>>,
}

impl Credentials {
    /// Fresh, unpaired credentials with random key material.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        Self {
            noise_key: KeyPair::random(&mut rng),
            signed_identity_key: KeyPair::random(&mut rng),
            signed_pre_key: SignedPreKey {
                key_id: 1,
                key_pair: KeyPair::random(&mut rng),
                signature: random_bytes(&mut rng, SIGNATURE_LEN),
            },
            // Registration ids are 14-bit on the wire.
            registration_id: (rng.next_u32() & 0x3fff).max(1),
            adv_secret_key: random_bytes(&mut rng, KEY_LEN),
            me: None,
            registered: false,
            session_keys: BTreeMap::new(),
        }
    }

    /// Merges an update in place. Returns `true` if anything changed.
    pub fn apply(&mut self, update: CredentialsUpdate) -> bool {
        let mut changed = false;

        if let Some(me) = update.me {
            changed |= self.me.as_ref() != Some(&me);
            self.me = Some(me);
        }
        if let Some(registered) = update.registered {
            changed |= self.registered != registered;
            self.registered = registered;
        }
        if let Some(signed_pre_key) = update.signed_pre_key {
            changed |= self.signed_pre_key != signed_pre_key;
            self.signed_pre_key = signed_pre_key;
        }
        for (address, record) in update.session_keys {
            match record {
                Some(record) => {
                    let previous = self.session_keys.insert(address, record.clone());
                    changed |= previous.as_ref() != Some(&record);
                }
                None => changed |= self.session_keys.remove(&address).is_some(),
            }
        }

        changed
    }
}

/// A change to credentials reported by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialsUpdate {
    pub me: Option<AccountIdentity>,
    pub registered: Option<bool>,
    pub signed_pre_key: Option<SignedPreKey>,
    /// `None` deletes the record for that address.
    pub session_keys: BTreeMap<String, Option<Vec<u8>>>,
}

/// Durable home for [`Credentials`].
#[async_trait]
pub trait CredentialStore: Send + Sync {
    fn name(&self) -> &str;

    async fn load(&self) -> Result<Option<Credentials>>;

    /// Must not return before the credentials are durable.
    async fn save(&self, credentials: &Credentials) -> Result<()>;

    /// Forget everything, forcing a fresh pairing on next start.
    async fn clear(&self) -> Result<()>;
}

/// Load persisted credentials, or generate and persist a fresh set.
pub async fn load_or_generate(store: &dyn CredentialStore) -> Result<Credentials> {
    if let Some(credentials) = store.load().await? {
        tracing::info!(
            "Loaded credentials from {} store (registration id {})",
            store.name(),
            credentials.registration_id
        );
        return Ok(credentials);
    }

    tracing::info!(
        "No stored credentials in {} store, generating a new device identity",
        store.name()
    );
    let credentials = Credentials::generate();
    store.save(&credentials).await?;
    Ok(credentials)
}

fn random_bytes(rng: &mut impl RngCore, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rng.fill_bytes(&mut buf);
    buf
}
