// SPDX-License-Identifier: AGPL-3.0-only
//! Backend accounting hooks fired by relay sessions.

use async_trait::async_trait;
use warden_auth::{AuthBroker, AuthError, BackendKind, CommandAuthorization, Identity};

#[async_trait]
pub trait SessionAccounting: Send + Sync {
    /// Whether per-command TACACS+ accounting and authorization are available.
    async fn command_accounting_enabled(&self) -> bool;

    async fn authorize_command(
        &self,
        identity: &Identity,
        device_address: &str,
        command: &str,
    ) -> Result<CommandAuthorization, AuthError>;

    async fn log_command(
        &self,
        identity: &Identity,
        device_address: &str,
        command: &str,
        success: bool,
    ) -> Result<(), AuthError>;

    async fn session_started(&self, identity: &Identity, device_address: &str, session_id: &str) -> Result<(), AuthError>;

    async fn session_stopped(
        &self,
        identity: &Identity,
        device_address: &str,
        session_id: &str,
        duration_secs: u64,
    ) -> Result<(), AuthError>;
}

#[async_trait]
impl SessionAccounting for AuthBroker {
    async fn command_accounting_enabled(&self) -> bool {
        self.is_configured(BackendKind::Tacacs).await
    }

    async fn authorize_command(
        &self,
        identity: &Identity,
        device_address: &str,
        command: &str,
    ) -> Result<CommandAuthorization, AuthError> {
        AuthBroker::authorize_command(self, &identity.principal, device_address, command).await
    }

    async fn log_command(
        &self,
        identity: &Identity,
        device_address: &str,
        command: &str,
        success: bool,
    ) -> Result<(), AuthError> {
        AuthBroker::log_command(self, &identity.principal, device_address, command, success).await
    }

    /// RADIUS Start record, for identities that logged in through RADIUS.
    async fn session_started(&self, identity: &Identity, device_address: &str, session_id: &str) -> Result<(), AuthError> {
        if identity.origin != BackendKind::Radius {
            return Ok(());
        }
        self.start_accounting(&identity.principal, device_address, session_id)
            .await
    }

    async fn session_stopped(
        &self,
        identity: &Identity,
        device_address: &str,
        session_id: &str,
        duration_secs: u64,
    ) -> Result<(), AuthError> {
        if identity.origin != BackendKind::Radius {
            return Ok(());
        }
        self.stop_accounting(&identity.principal, device_address, session_id, duration_secs)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use warden_auth::{CredentialStore, DirectoryConnector, LdapConnector, MemoryStore};

    fn broker(store: &Arc<MemoryStore>) -> AuthBroker {
        let credentials = CredentialStore::new(store.clone()).unwrap();
        let connector: Arc<dyn DirectoryConnector> = Arc::new(LdapConnector);
        AuthBroker::new(store.clone(), store.clone(), credentials, connector)
    }

    fn identity(origin: BackendKind) -> Identity {
        Identity {
            user_id: 1,
            principal: "alice".into(),
            display_name: "alice".into(),
            email: None,
            origin,
            group_id: None,
        }
    }

    #[tokio::test]
    async fn unconfigured_tacacs_disables_command_accounting() {
        let store = Arc::new(MemoryStore::new());
        assert!(!broker(&store).command_accounting_enabled().await);
    }

    #[tokio::test]
    async fn radius_accounting_skips_other_origins() {
        let store = Arc::new(MemoryStore::new());
        let broker = broker(&store);
        broker
            .session_started(&identity(BackendKind::Local), "10.0.0.1", "s1")
            .await
            .unwrap();
        broker
            .session_stopped(&identity(BackendKind::Directory), "10.0.0.1", "s1", 5)
            .await
            .unwrap();
        assert!(
            broker
                .session_started(&identity(BackendKind::Radius), "10.0.0.1", "s1")
                .await
                .is_err()
        );
    }
}
