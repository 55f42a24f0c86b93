// SPDX-License-Identifier: AGPL-3.0-only
//! Persistence collaborators consumed by the broker.

use crate::config::BackendSettings;
use crate::identity::{BackendKind, Identity};
use anyhow::Result;
use async_trait::async_trait;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalUser {
    pub id: i64,
    pub username: String,
    /// PHC-format password hash. Directory shadows hold an unusable value.
    pub password_hash: String,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub is_active: bool,
    pub is_directory_user: bool,
    pub group_id: Option<i64>,
    pub last_login: Option<OffsetDateTime>,
}

impl LocalUser {
    pub fn identity(&self, origin: BackendKind) -> Identity {
        Identity {
            user_id: self.id,
            principal: self.username.clone(),
            display_name: self
                .full_name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| self.username.clone()),
            email: self.email.clone(),
            origin,
            group_id: self.group_id,
        }
    }
}

/// A principal as the directory describes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryProfile {
    pub username: String,
    pub dn: String,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created(LocalUser),
    Updated(LocalUser),
    Unchanged(LocalUser),
    /// A local account with this name exists but is not directory managed;
    /// it was left untouched.
    Foreign(LocalUser),
}

impl UpsertOutcome {
    pub fn user(&self) -> &LocalUser {
        match self {
            UpsertOutcome::Created(u)
            | UpsertOutcome::Updated(u)
            | UpsertOutcome::Unchanged(u)
            | UpsertOutcome::Foreign(u) => u,
        }
    }

    pub fn into_user(self) -> LocalUser {
        match self {
            UpsertOutcome::Created(u)
            | UpsertOutcome::Updated(u)
            | UpsertOutcome::Unchanged(u)
            | UpsertOutcome::Foreign(u) => u,
        }
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<LocalUser>>;

    async fn find_by_id(&self, id: i64) -> Result<Option<LocalUser>>;

    /// Creates or refreshes the local shadow of a directory principal.
    /// New records get `unusable_hash` as their password.
    async fn upsert_directory_user(
        &self,
        profile: &DirectoryProfile,
        unusable_hash: &str,
    ) -> Result<UpsertOutcome>;

    async fn record_login(&self, id: i64, at: OffsetDateTime) -> Result<()>;
}

#[async_trait]
pub trait SettingStore: Send + Sync {
    /// All key/value rows of one category; empty when none exist.
    async fn settings(&self, category: &str) -> Result<BackendSettings>;
}
