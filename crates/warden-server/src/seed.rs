// SPDX-License-Identifier: AGPL-3.0-only
//! JSON seed data for the in-memory store.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;
use warden_auth::memory::NewUser;
use warden_auth::{BackendSettings, CredentialStore, MemoryStore};
use warden_relay::{CredentialMap, Device, DeviceDirectory};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seed {
    #[serde(default)]
    pub users: Vec<SeedUser>,
    #[serde(default)]
    pub devices: Vec<Device>,
    /// Backend settings by category (`ldap`, `tacacs`, `radius`).
    #[serde(default)]
    pub settings: HashMap<String, BackendSettings>,
    #[serde(default)]
    pub device_credentials: Vec<SeedCredential>,
}

fn active_by_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedUser {
    pub username: String,
    /// Plaintext, hashed on load.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default = "active_by_default")]
    pub active: bool,
    #[serde(default)]
    pub directory_user: bool,
    #[serde(default)]
    pub group_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedCredential {
    /// Local username the credential belongs to.
    pub user: String,
    #[serde(default)]
    pub device_id: Option<i64>,
    pub username: String,
    pub secret: String,
}

impl Seed {
    pub fn load(path: &Path) -> Result<Seed> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading seed file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing seed file {}", path.display()))
    }

    /// Loads users and settings into `store`, device credentials into
    /// `credentials`, and returns the device table.
    pub fn apply(
        self,
        store: &MemoryStore,
        hasher: &CredentialStore,
        credentials: &mut CredentialMap,
    ) -> Result<DeviceTable> {
        let mut ids = HashMap::new();
        for user in self.users {
            let password_hash = match (user.password_hash, user.password) {
                (Some(hash), _) => hash,
                (None, Some(plain)) => hasher
                    .hash_secret(&plain)
                    .with_context(|| format!("hashing seed password for {}", user.username))?,
                (None, None) => CredentialStore::unusable_secret()?,
            };
            let record = store.try_insert_user(NewUser {
                username: user.username,
                password_hash,
                full_name: user.full_name,
                email: user.email,
                active: user.active,
                directory_user: user.directory_user,
                group_id: user.group_id,
            })?;
            ids.insert(record.username.clone(), record.id);
        }

        for (category, settings) in self.settings {
            store.set_settings(&category, settings);
        }

        for cred in self.device_credentials {
            let Some(user_id) = ids.get(&cred.user) else {
                bail!("device credential for unknown user '{}'", cred.user);
            };
            credentials.insert(*user_id, cred.device_id, cred.username, cred.secret);
        }

        info!(
            users = ids.len(),
            devices = self.devices.len(),
            device_credentials = credentials.len(),
            "seed data loaded"
        );
        Ok(DeviceTable::new(self.devices))
    }
}

/// Devices by id.
#[derive(Debug, Default)]
pub struct DeviceTable {
    devices: RwLock<HashMap<i64, Device>>,
}

impl DeviceTable {
    pub fn new(devices: Vec<Device>) -> DeviceTable {
        DeviceTable {
            devices: RwLock::new(devices.into_iter().map(|d| (d.id, d)).collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}

#[async_trait]
impl DeviceDirectory for DeviceTable {
    async fn device(&self, id: i64) -> Result<Option<Device>> {
        Ok(self.devices.read().get(&id).cloned())
    }
}
