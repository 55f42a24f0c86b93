// SPDX-License-Identifier: AGPL-3.0-only
//! Dispatches credentials to the selected backend and maps the answer onto a
//! local identity.

use crate::config::{DirectoryConfig, RadiusConfig, TacacsConfig};
use crate::directory::{DirectoryClient, DirectoryConnector, DirectoryGroup, SyncReport};
use crate::error::{AuthError, BackendError};
use crate::health::{HealthStatus, StatusReport};
use crate::identity::{AuthVerdict, BackendKind, RejectReason};
use crate::local::{CredentialStore, LocalCheck};
use crate::radius::RadiusClient;
use crate::store::{LocalUser, SettingStore, UserStore};
use crate::tacacs::{CommandAuthorization, TacacsClient};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

pub struct AuthBroker {
    users: Arc<dyn UserStore>,
    settings: Arc<dyn SettingStore>,
    credentials: CredentialStore,
    directory: DirectoryClient,
    tacacs: TacacsClient,
    radius: RadiusClient,
    /// One per [`BackendKind`]; serializes (re)initialization.
    init_locks: [Mutex<()>; 4],
}

impl AuthBroker {
    pub fn new(
        users: Arc<dyn UserStore>,
        settings: Arc<dyn SettingStore>,
        credentials: CredentialStore,
        directory_connector: Arc<dyn DirectoryConnector>,
    ) -> AuthBroker {
        AuthBroker {
            users,
            settings,
            credentials,
            directory: DirectoryClient::new(directory_connector),
            tacacs: TacacsClient::new(),
            radius: RadiusClient::new(),
            init_locks: Default::default(),
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    fn init_lock(&self, kind: BackendKind) -> &Mutex<()> {
        &self.init_locks[kind as usize]
    }

    async fn is_ready(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::Local => true,
            BackendKind::Directory => self.directory.is_ready().await,
            BackendKind::Tacacs => self.tacacs.is_ready().await,
            BackendKind::Radius => self.radius.is_ready().await,
        }
    }

    /// Loads the backend's settings and initializes it unless it already is.
    /// Concurrent callers wait for a single initialization.
    async fn ensure_ready(&self, kind: BackendKind) -> Result<(), AuthError> {
        if self.is_ready(kind).await {
            return Ok(());
        }
        let _guard = self.init_lock(kind).lock().await;
        if self.is_ready(kind).await {
            return Ok(());
        }
        let settings = self.settings.settings(kind.settings_category()).await?;
        let result = match kind {
            BackendKind::Local => Ok(()),
            BackendKind::Directory => match DirectoryConfig::from_settings(&settings) {
                Ok(config) => self.directory.initialize(config).await,
                Err(err) => Err(BackendError::from(err)),
            },
            BackendKind::Tacacs => match TacacsConfig::from_settings(&settings) {
                Ok(config) => {
                    self.tacacs.initialize(config).await;
                    Ok(())
                }
                Err(err) => Err(BackendError::from(err)),
            },
            BackendKind::Radius => match RadiusConfig::from_settings(&settings) {
                Ok(config) => {
                    self.radius.initialize(config).await;
                    Ok(())
                }
                Err(err) => Err(BackendError::from(err)),
            },
        };
        if let Err(err) = &result {
            warn!(backend = %kind, error = %err, "backend unavailable");
        }
        Ok(result?)
    }

    /// Whether the backend has a usable configuration. Initializes it on the
    /// way when it does.
    pub async fn is_configured(&self, kind: BackendKind) -> bool {
        self.ensure_ready(kind).await.is_ok()
    }

    /// Drops the backend's current configuration; the next use reloads it.
    pub async fn reconfigure(&self, kind: BackendKind) {
        let _guard = self.init_lock(kind).lock().await;
        match kind {
            BackendKind::Local => return,
            BackendKind::Directory => self.directory.shutdown().await,
            BackendKind::Tacacs => self.tacacs.shutdown().await,
            BackendKind::Radius => self.radius.shutdown().await,
        }
        info!(backend = %kind, "backend configuration reset");
    }

    #[instrument(skip(self, secret), fields(backend = %kind))]
    pub async fn authenticate(&self, principal: &str, secret: &str, kind: BackendKind) -> Result<AuthVerdict, AuthError> {
        self.ensure_ready(kind).await?;
        let (user, attributes) = match kind {
            BackendKind::Local => match self.credentials.check(principal, secret).await? {
                LocalCheck::Verified(user) => (user, Vec::new()),
                LocalCheck::Rejected(reason) => return Ok(AuthVerdict::rejected(reason)),
            },
            BackendKind::Directory => {
                let Some(profile) = self.directory.authenticate(principal, secret).await? else {
                    return Ok(AuthVerdict::rejected(RejectReason::BadSecret));
                };
                let unusable = CredentialStore::unusable_secret()?;
                let user = self
                    .users
                    .upsert_directory_user(&profile, &unusable)
                    .await?
                    .into_user();
                (user, Vec::new())
            }
            BackendKind::Tacacs | BackendKind::Radius => {
                let answer = if kind == BackendKind::Tacacs {
                    self.tacacs.authenticate(principal, secret).await?
                } else {
                    self.radius.authenticate(principal, secret).await?
                };
                if !answer.accepted {
                    return Ok(AuthVerdict::rejected(RejectReason::BadSecret));
                }
                let user = self.provisioned(principal, kind).await?;
                (user, answer.attributes)
            }
        };
        if !user.is_active {
            debug!(principal, "backend accepted an inactive account");
            return Ok(AuthVerdict::rejected(RejectReason::Inactive));
        }

        if let Err(err) = self.users.record_login(user.id, OffsetDateTime::now_utc()).await {
            warn!(error = %err, user_id = user.id, "could not record last login");
        }
        info!(principal, user_id = user.id, "authenticated");
        Ok(AuthVerdict::accepted(user.identity(kind), attributes))
    }

    async fn provisioned(&self, principal: &str, kind: BackendKind) -> Result<LocalUser, AuthError> {
        self.users
            .find_by_username(principal)
            .await?
            .ok_or_else(|| AuthError::IdentityNotProvisioned {
                principal: principal.to_string(),
                backend: kind,
            })
    }

    /// Probes every remote backend concurrently; each result stands alone.
    pub async fn check_all_statuses(&self) -> StatusReport {
        let (directory, tacacs, radius) = tokio::join!(
            self.status_of(BackendKind::Directory),
            self.status_of(BackendKind::Tacacs),
            self.status_of(BackendKind::Radius),
        );
        StatusReport {
            directory,
            tacacs,
            radius,
        }
    }

    async fn status_of(&self, kind: BackendKind) -> HealthStatus {
        match self.ensure_ready(kind).await {
            Ok(()) => {}
            Err(AuthError::BackendUnavailable(err)) => return HealthStatus::offline(err.to_string()),
            Err(err) => return HealthStatus::error(err.to_string()),
        }
        match kind {
            BackendKind::Local => HealthStatus::online("local credential store"),
            BackendKind::Directory => self.directory.probe().await,
            BackendKind::Tacacs => self.tacacs.probe().await,
            BackendKind::Radius => self.radius.probe().await,
        }
    }

    pub async fn sync_directory(&self) -> Result<SyncReport, AuthError> {
        self.ensure_ready(BackendKind::Directory).await?;
        Ok(self.directory.sync_all(self.users.as_ref()).await?)
    }

    pub async fn list_directory_groups(&self) -> Result<Vec<DirectoryGroup>, AuthError> {
        self.ensure_ready(BackendKind::Directory).await?;
        Ok(self.directory.list_groups().await?)
    }

    pub async fn authorize_command(
        &self,
        principal: &str,
        device_address: &str,
        command: &str,
    ) -> Result<CommandAuthorization, AuthError> {
        self.ensure_ready(BackendKind::Tacacs).await?;
        Ok(self
            .tacacs
            .authorize_command(principal, device_address, command)
            .await?)
    }

    pub async fn log_command(
        &self,
        principal: &str,
        device_address: &str,
        command: &str,
        success: bool,
    ) -> Result<(), AuthError> {
        self.ensure_ready(BackendKind::Tacacs).await?;
        Ok(self
            .tacacs
            .log_command(principal, device_address, command, success)
            .await?)
    }

    pub async fn start_accounting(&self, principal: &str, device_address: &str, session_id: &str) -> Result<(), AuthError> {
        self.ensure_ready(BackendKind::Radius).await?;
        Ok(self
            .radius
            .start_accounting(principal, device_address, session_id)
            .await?)
    }

    pub async fn stop_accounting(
        &self,
        principal: &str,
        device_address: &str,
        session_id: &str,
        duration_secs: u64,
    ) -> Result<(), AuthError> {
        self.ensure_ready(BackendKind::Radius).await?;
        Ok(self
            .radius
            .stop_accounting(principal, device_address, session_id, duration_secs)
            .await?)
    }
}
