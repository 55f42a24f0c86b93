// SPDX-License-Identifier: AGPL-3.0-only
//! LDAP / Active Directory backend.
//!
//! The client holds a service-account connection once initialized. Principal
//! binds always use a fresh connection so the service binding is never
//! replaced by a user's.

mod ldap;

pub use ldap::LdapConnector;

use crate::config::{DirectoryConfig, DirectoryFlavor};
use crate::error::BackendError;
use crate::health::HealthStatus;
use crate::identity::BackendKind;
use crate::local::CredentialStore;
use crate::store::{DirectoryProfile, UpsertOutcome, UserStore};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

const BACKEND: BackendKind = BackendKind::Directory;

/// AD `userAccountControl` bit for disabled accounts.
const UAC_ACCOUNTDISABLE: u32 = 0x2;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryFault {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("operation timed out")]
    Timeout,
    #[error("connection refused")]
    Refused,
    #[error("{0}")]
    Other(String),
}

impl DirectoryFault {
    fn into_backend(self, timeout: Duration) -> BackendError {
        match self {
            DirectoryFault::InvalidCredentials => BackendError::Server {
                backend: BACKEND,
                message: "service account bind rejected".into(),
            },
            DirectoryFault::Timeout => BackendError::Timeout {
                backend: BACKEND,
                timeout_ms: timeout.as_millis() as u64,
            },
            DirectoryFault::Refused => BackendError::Refused { backend: BACKEND },
            DirectoryFault::Other(message) => BackendError::Protocol {
                backend: BACKEND,
                message,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    Base,
    Subtree,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attrs: HashMap<String, Vec<String>>,
}

impl DirectoryEntry {
    pub fn values(&self, attr: &str) -> &[String] {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(attr))
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn first(&self, attr: &str) -> Option<&str> {
        self.values(attr)
            .iter()
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
    }
}

#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    async fn connect(&self, config: &DirectoryConfig) -> Result<Box<dyn DirectoryConnection>, DirectoryFault>;
}

#[async_trait]
pub trait DirectoryConnection: Send + Sync {
    async fn bind(&self, dn: &str, secret: &str) -> Result<(), DirectoryFault>;

    async fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<DirectoryEntry>, DirectoryFault>;

    async fn unbind(&self);
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryGroup {
    pub name: String,
    pub dn: String,
    pub description: Option<String>,
    pub members: Vec<String>,
}

struct Ready {
    config: Arc<DirectoryConfig>,
    service: Box<dyn DirectoryConnection>,
}

pub struct DirectoryClient {
    connector: Arc<dyn DirectoryConnector>,
    state: RwLock<Option<Arc<Ready>>>,
}

impl DirectoryClient {
    pub fn new(connector: Arc<dyn DirectoryConnector>) -> DirectoryClient {
        DirectoryClient {
            connector,
            state: RwLock::new(None),
        }
    }

    pub async fn is_ready(&self) -> bool {
        self.state.read().await.is_some()
    }

    /// Connects and binds the service account. On failure the client stays
    /// (or becomes) uninitialized.
    #[instrument(skip_all, fields(url = %config.url))]
    pub async fn initialize(&self, config: DirectoryConfig) -> Result<(), BackendError> {
        let config = Arc::new(config);
        let service = match self.service_connection(&config).await {
            Ok(conn) => conn,
            Err(err) => {
                self.shutdown().await;
                return Err(err);
            }
        };
        let previous = self.state.write().await.replace(Arc::new(Ready {
            config: config.clone(),
            service,
        }));
        if let Some(previous) = previous {
            previous.service.unbind().await;
        }
        info!(
            active_directory = config.is_active_directory(),
            "directory client initialized"
        );
        Ok(())
    }

    /// Releases the service connection.
    pub async fn shutdown(&self) {
        let previous = self.state.write().await.take();
        if let Some(previous) = previous {
            previous.service.unbind().await;
            debug!("directory client shut down");
        }
    }

    async fn ready(&self) -> Result<Arc<Ready>, BackendError> {
        self.state
            .read()
            .await
            .clone()
            .ok_or(BackendError::NotInitialized(BACKEND))
    }

    /// Maps a fault raised on the shared service connection. Anything but a
    /// credential rejection drops the connection so the next initialization
    /// rebinds.
    async fn service_fault(&self, ready: &Arc<Ready>, fault: DirectoryFault) -> BackendError {
        let timeout = ready.config.timeout;
        if fault != DirectoryFault::InvalidCredentials {
            let mut state = self.state.write().await;
            if state.as_ref().is_some_and(|current| Arc::ptr_eq(current, ready)) {
                state.take();
                drop(state);
                ready.service.unbind().await;
                warn!(error = %fault, "directory service connection failed; client reset");
            }
        }
        fault.into_backend(timeout)
    }

    async fn service_connection(&self, config: &DirectoryConfig) -> Result<Box<dyn DirectoryConnection>, BackendError> {
        let conn = self
            .connector
            .connect(config)
            .await
            .map_err(|f| f.into_backend(config.connect_timeout))?;
        if let Err(fault) = conn.bind(&config.bind_dn, config.bind_secret.expose_secret()).await {
            conn.unbind().await;
            return Err(fault.into_backend(config.timeout));
        }
        Ok(conn)
    }

    /// `Ok(Some(profile))` when the directory accepts the credential,
    /// `Ok(None)` when it rejects it.
    #[instrument(skip(self, secret))]
    pub async fn authenticate(&self, principal: &str, secret: &str) -> Result<Option<DirectoryProfile>, BackendError> {
        let ready = self.ready().await?;
        // An empty password would be an unauthenticated bind, which servers accept.
        if principal.trim().is_empty() || secret.is_empty() {
            return Ok(None);
        }
        let config = &ready.config;
        match &config.flavor {
            DirectoryFlavor::ActiveDirectory => {
                let Some(entry) = self.lookup(&ready, principal).await? else {
                    debug!("principal not found in directory");
                    return Ok(None);
                };
                if !in_allowed_groups(config, &entry) {
                    debug!("principal outside allowed groups");
                    return Ok(None);
                }
                if !self.bind_as(config, &entry.dn, secret).await? {
                    return Ok(None);
                }
                Ok(profile_from_entry(config, &entry))
            }
            DirectoryFlavor::Generic { user_dn_pattern } => {
                let dn = user_dn_pattern.replace("{username}", &ldap3::dn_escape(principal));
                if !self.bind_as(config, &dn, secret).await? {
                    return Ok(None);
                }
                let profile = self
                    .lookup(&ready, principal)
                    .await?
                    .and_then(|entry| profile_from_entry(config, &entry))
                    .unwrap_or_else(|| DirectoryProfile {
                        username: principal.to_string(),
                        dn,
                        full_name: None,
                        email: None,
                        active: true,
                    });
                Ok(Some(profile))
            }
        }
    }

    async fn lookup(&self, ready: &Arc<Ready>, principal: &str) -> Result<Option<DirectoryEntry>, BackendError> {
        let config = &ready.config;
        let result = ready
            .service
            .search(
                &config.search_base,
                SearchScope::Subtree,
                &user_lookup_filter(config, principal),
                &user_attributes(config),
            )
            .await;
        match result {
            Ok(entries) => Ok(entries.into_iter().next()),
            Err(fault) => Err(self.service_fault(ready, fault).await),
        }
    }

    /// `true` on a successful bind, `false` on invalid credentials.
    async fn bind_as(&self, config: &DirectoryConfig, dn: &str, secret: &str) -> Result<bool, BackendError> {
        let conn = self
            .connector
            .connect(config)
            .await
            .map_err(|f| f.into_backend(config.connect_timeout))?;
        let result = conn.bind(dn, secret).await;
        conn.unbind().await;
        match result {
            Ok(()) => Ok(true),
            Err(DirectoryFault::InvalidCredentials) => Ok(false),
            Err(fault) => Err(fault.into_backend(config.timeout)),
        }
    }

    /// Mirrors every matching directory principal into the local user store.
    /// Per-principal failures are logged and counted as skipped.
    #[instrument(skip_all)]
    pub async fn sync_all(&self, users: &dyn UserStore) -> Result<SyncReport, BackendError> {
        let ready = self.ready().await?;
        let config = &ready.config;
        let result = ready
            .service
            .search(
                &config.search_base,
                SearchScope::Subtree,
                &sync_filter(config),
                &user_attributes(config),
            )
            .await;
        let entries = match result {
            Ok(entries) => entries,
            Err(fault) => return Err(self.service_fault(&ready, fault).await),
        };

        let mut report = SyncReport {
            total: entries.len(),
            ..SyncReport::default()
        };
        for entry in &entries {
            let Some(profile) = profile_from_entry(config, entry) else {
                warn!(dn = %entry.dn, "directory entry lacks {}; skipped", config.user_id_attribute);
                report.skipped += 1;
                continue;
            };
            let unusable = match CredentialStore::unusable_secret() {
                Ok(value) => value,
                Err(err) => {
                    warn!(error = %err, principal = %profile.username, "could not generate shadow password");
                    report.skipped += 1;
                    continue;
                }
            };
            match users.upsert_directory_user(&profile, &unusable).await {
                Ok(UpsertOutcome::Created(_)) => report.created += 1,
                Ok(UpsertOutcome::Updated(_)) => report.updated += 1,
                Ok(UpsertOutcome::Unchanged(_)) | Ok(UpsertOutcome::Foreign(_)) => {}
                Err(err) => {
                    warn!(error = %err, principal = %profile.username, "directory user upsert failed");
                    report.skipped += 1;
                }
            }
        }
        info!(
            created = report.created,
            updated = report.updated,
            skipped = report.skipped,
            total = report.total,
            "directory sync finished"
        );
        Ok(report)
    }

    pub async fn list_groups(&self) -> Result<Vec<DirectoryGroup>, BackendError> {
        let ready = self.ready().await?;
        let config = &ready.config;
        let filter = format!("(objectClass={})", ldap3::ldap_escape(&config.group_object_class));
        let result = ready
            .service
            .search(
                config.group_base(),
                SearchScope::Subtree,
                &filter,
                &["cn", "description", "member"],
            )
            .await;
        let entries = match result {
            Ok(entries) => entries,
            Err(fault) => return Err(self.service_fault(&ready, fault).await),
        };
        Ok(entries
            .into_iter()
            .map(|entry| DirectoryGroup {
                name: entry.first("cn").unwrap_or(&entry.dn).to_string(),
                description: entry.first("description").map(str::to_string),
                members: entry.values("member").to_vec(),
                dn: entry.dn,
            })
            .collect())
    }

    /// Fresh bind plus a root-DSE read, bounded by the probe timeout.
    pub async fn probe(&self) -> HealthStatus {
        let Ok(ready) = self.ready().await else {
            return HealthStatus::offline("LDAP not configured");
        };
        let config = ready.config.clone();
        let attempt = async {
            let conn = match self.connector.connect(&config).await {
                Ok(conn) => conn,
                Err(DirectoryFault::Refused | DirectoryFault::Timeout) => {
                    return HealthStatus::offline("LDAP server unreachable");
                }
                Err(fault) => return HealthStatus::error(format!("LDAP connection failed: {fault}")),
            };
            if let Err(fault) = conn.bind(&config.bind_dn, config.bind_secret.expose_secret()).await {
                conn.unbind().await;
                return HealthStatus::offline(format!("LDAP bind failed: {fault}"));
            }
            let status = match conn
                .search("", SearchScope::Base, "(objectClass=*)", &["namingContexts"])
                .await
            {
                Ok(_) => HealthStatus::online("LDAP server is operational"),
                Err(fault) => HealthStatus::degraded(format!("LDAP bind ok but query failed: {fault}")),
            };
            conn.unbind().await;
            status
        };
        match tokio::time::timeout(config.probe_timeout, attempt).await {
            Ok(status) => status,
            Err(_) => HealthStatus::offline("LDAP probe timed out"),
        }
    }
}

fn user_attributes(config: &DirectoryConfig) -> Vec<&str> {
    let mut attrs = vec![
        config.user_id_attribute.as_str(),
        config.first_name_attribute.as_str(),
        config.last_name_attribute.as_str(),
        config.email_attribute.as_str(),
        "displayName",
        "cn",
    ];
    if config.is_active_directory() {
        attrs.extend(["userPrincipalName", "memberOf", "userAccountControl"]);
    }
    attrs
}

fn user_lookup_filter(config: &DirectoryConfig, principal: &str) -> String {
    let escaped = ldap3::ldap_escape(principal);
    if config.is_active_directory() {
        format!(
            "(&(objectClass=user)(!(objectClass=computer))({}={escaped}))",
            config.user_id_attribute
        )
    } else {
        format!(
            "(&(objectClass={})({}={escaped}))",
            config.user_object_class, config.user_id_attribute
        )
    }
}

fn sync_filter(config: &DirectoryConfig) -> String {
    let mut clauses = match &config.user_filter {
        Some(custom) => custom.clone(),
        None if config.is_active_directory() => "(objectClass=user)(!(objectClass=computer))".to_string(),
        None => format!("(objectClass={})", ldap3::ldap_escape(&config.user_object_class)),
    };
    if !config.allowed_groups.is_empty() {
        let members: String = config
            .allowed_groups
            .iter()
            .map(|group| {
                let dn = format!("CN={group},{}", config.group_base());
                format!("(memberOf={})", ldap3::ldap_escape(&dn))
            })
            .collect();
        clauses.push_str(&format!("(|{members})"));
    }
    format!("(&{clauses})")
}

fn in_allowed_groups(config: &DirectoryConfig, entry: &DirectoryEntry) -> bool {
    if config.allowed_groups.is_empty() {
        return true;
    }
    let member_of: Vec<String> = entry
        .values("memberOf")
        .iter()
        .map(|dn| dn.to_ascii_lowercase())
        .collect();
    config.allowed_groups.iter().any(|group| {
        let prefix = format!("cn={},", group.to_ascii_lowercase());
        member_of.iter().any(|dn| dn.starts_with(&prefix))
    })
}

fn profile_from_entry(config: &DirectoryConfig, entry: &DirectoryEntry) -> Option<DirectoryProfile> {
    let username = entry.first(&config.user_id_attribute)?.to_string();
    let first = entry.first(&config.first_name_attribute);
    let last = entry.first(&config.last_name_attribute);
    let full_name = match (first, last) {
        (Some(f), Some(l)) => Some(format!("{f} {l}")),
        (Some(one), None) | (None, Some(one)) => Some(one.to_string()),
        (None, None) => entry
            .first("displayName")
            .or_else(|| entry.first("cn"))
            .map(str::to_string),
    };
    let email = entry
        .first(&config.email_attribute)
        .or_else(|| {
            if config.is_active_directory() {
                entry.first("userPrincipalName")
            } else {
                None
            }
        })
        .map(str::to_string);
    let active = if config.is_active_directory() {
        entry
            .first("userAccountControl")
            .and_then(|raw| raw.parse::<u32>().ok())
            .is_none_or(|uac| uac & UAC_ACCOUNTDISABLE == 0)
    } else {
        true
    };
    Some(DirectoryProfile {
        username,
        dn: entry.dn.clone(),
        full_name,
        email,
        active,
    })
}
