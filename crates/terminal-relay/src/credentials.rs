// SPDX-License-Identifier: AGPL-3.0-only
//! Credentials the relay presents to devices on behalf of a user.

use crate::device::Device;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use warden_auth::Identity;
use secrecy::SecretString;

#[derive(Debug, Clone)]
pub struct DeviceLogin {
    pub username: String,
    pub secret: SecretString,
}

#[async_trait]
pub trait DeviceCredentials: Send + Sync {
    async fn credentials_for(&self, identity: &Identity, device: &Device) -> Result<Option<DeviceLogin>>;
}

/// One secret for every device. Without a fixed username the user's own
/// principal is presented.
pub struct SharedCredential {
    username: Option<String>,
    secret: SecretString,
}

impl SharedCredential {
    pub fn new(username: Option<String>, secret: impl Into<String>) -> SharedCredential {
        SharedCredential {
            username,
            secret: SecretString::new(secret.into()),
        }
    }

    fn login_for(&self, identity: &Identity) -> DeviceLogin {
        DeviceLogin {
            username: self
                .username
                .clone()
                .unwrap_or_else(|| identity.principal.clone()),
            secret: self.secret.clone(),
        }
    }
}

#[async_trait]
impl DeviceCredentials for SharedCredential {
    async fn credentials_for(&self, identity: &Identity, _device: &Device) -> Result<Option<DeviceLogin>> {
        Ok(Some(self.login_for(identity)))
    }
}

struct Entry {
    username: String,
    secret: SecretString,
}

/// Per-user credentials, optionally scoped to one device, with an optional
/// shared fallback.
#[derive(Default)]
pub struct CredentialMap {
    entries: HashMap<(i64, Option<i64>), Entry>,
    fallback: Option<SharedCredential>,
}

impl CredentialMap {
    pub fn new(fallback: Option<SharedCredential>) -> CredentialMap {
        CredentialMap {
            entries: HashMap::new(),
            fallback,
        }
    }

    pub fn insert(
        &mut self,
        user_id: i64,
        device_id: Option<i64>,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) {
        self.entries.insert(
            (user_id, device_id),
            Entry {
                username: username.into(),
                secret: SecretString::new(secret.into()),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl DeviceCredentials for CredentialMap {
    async fn credentials_for(&self, identity: &Identity, device: &Device) -> Result<Option<DeviceLogin>> {
        let entry = self
            .entries
            .get(&(identity.user_id, Some(device.id)))
            .or_else(|| self.entries.get(&(identity.user_id, None)));
        Ok(match entry {
            Some(entry) => Some(DeviceLogin {
                username: entry.username.clone(),
                secret: entry.secret.clone(),
            }),
            None => self.fallback.as_ref().map(|f| f.login_for(identity)),
        })
    }
}
