// SPDX-License-Identifier: AGPL-3.0-only
//! In-memory implementation of the persistence collaborators.

use crate::audit::{AccessRecord, AuditSink, CommandRecord};
use crate::config::BackendSettings;
use crate::store::{DirectoryProfile, LocalUser, SettingStore, UpsertOutcome, UserStore};
use anyhow::{Result, bail};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use time::OffsetDateTime;
use tracing::info;

/// Fields for a new local account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub active: bool,
    pub directory_user: bool,
    pub group_id: Option<i64>,
}

impl Default for NewUser {
    fn default() -> Self {
        NewUser {
            username: String::new(),
            password_hash: String::new(),
            full_name: None,
            email: None,
            active: true,
            directory_user: false,
            group_id: None,
        }
    }
}

#[derive(Default)]
struct Inner {
    users: HashMap<i64, LocalUser>,
    next_id: i64,
    settings: HashMap<String, BackendSettings>,
    access: Vec<AccessRecord>,
    commands: Vec<CommandRecord>,
}

impl Inner {
    fn insert(&mut self, user: NewUser) -> LocalUser {
        self.next_id += 1;
        let record = LocalUser {
            id: self.next_id,
            username: user.username,
            password_hash: user.password_hash,
            full_name: user.full_name,
            email: user.email,
            is_active: user.active,
            is_directory_user: user.directory_user,
            group_id: user.group_id,
            last_login: None,
        };
        self.users.insert(record.id, record.clone());
        record
    }

    fn by_name(&self, username: &str) -> Option<&LocalUser> {
        self.users.values().find(|u| u.username == username)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    /// Inserts a user; fails when the username is taken.
    pub fn try_insert_user(&self, user: NewUser) -> Result<LocalUser> {
        let mut inner = self.inner.write();
        if inner.by_name(&user.username).is_some() {
            bail!("user '{}' already exists", user.username);
        }
        Ok(inner.insert(user))
    }

    pub fn insert_user(&self, user: NewUser) -> LocalUser {
        self.inner.write().insert(user)
    }

    pub fn set_settings(&self, category: &str, settings: BackendSettings) {
        self.inner
            .write()
            .settings
            .insert(category.to_string(), settings);
    }

    pub fn users(&self) -> Vec<LocalUser> {
        let mut users: Vec<_> = self.inner.read().users.values().cloned().collect();
        users.sort_by_key(|u| u.id);
        users
    }

    pub fn access_records(&self) -> Vec<AccessRecord> {
        self.inner.read().access.clone()
    }

    pub fn command_records(&self) -> Vec<CommandRecord> {
        self.inner.read().commands.clone()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<LocalUser>> {
        Ok(self.inner.read().by_name(username).cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<LocalUser>> {
        Ok(self.inner.read().users.get(&id).cloned())
    }

    async fn upsert_directory_user(
        &self,
        profile: &DirectoryProfile,
        unusable_hash: &str,
    ) -> Result<UpsertOutcome> {
        let mut inner = self.inner.write();
        let existing = inner.by_name(&profile.username).map(|u| u.id);
        let Some(id) = existing else {
            let user = inner.insert(NewUser {
                username: profile.username.clone(),
                password_hash: unusable_hash.to_string(),
                full_name: profile.full_name.clone(),
                email: profile.email.clone(),
                active: profile.active,
                directory_user: true,
                group_id: None,
            });
            return Ok(UpsertOutcome::Created(user));
        };

        let Some(user) = inner.users.get_mut(&id) else {
            bail!("user {id} vanished during upsert");
        };
        if !user.is_directory_user {
            return Ok(UpsertOutcome::Foreign(user.clone()));
        }
        let mut changed = false;
        if profile.full_name.is_some() && user.full_name != profile.full_name {
            user.full_name = profile.full_name.clone();
            changed = true;
        }
        if profile.email.is_some() && user.email != profile.email {
            user.email = profile.email.clone();
            changed = true;
        }
        if user.is_active != profile.active {
            user.is_active = profile.active;
            changed = true;
        }
        Ok(if changed {
            UpsertOutcome::Updated(user.clone())
        } else {
            UpsertOutcome::Unchanged(user.clone())
        })
    }

    async fn record_login(&self, id: i64, at: OffsetDateTime) -> Result<()> {
        match self.inner.write().users.get_mut(&id) {
            Some(user) => {
                user.last_login = Some(at);
                Ok(())
            }
            None => bail!("user {id} not found"),
        }
    }
}

#[async_trait]
impl SettingStore for MemoryStore {
    async fn settings(&self, category: &str) -> Result<BackendSettings> {
        Ok(self
            .inner
            .read()
            .settings
            .get(category)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl AuditSink for MemoryStore {
    async fn record_access(&self, record: AccessRecord) -> Result<()> {
        info!(
            target: "audit",
            kind = %record.kind,
            status = %record.status,
            user_id = record.user_id,
            device_id = record.device_id,
            peer = %record.peer,
            details = %record.details,
            "access"
        );
        self.inner.write().access.push(record);
        Ok(())
    }

    async fn record_command(&self, record: CommandRecord) -> Result<()> {
        info!(
            target: "audit",
            user_id = record.user_id,
            device_id = record.device_id,
            command = %record.command,
            "command"
        );
        self.inner.write().commands.push(record);
        Ok(())
    }
}
