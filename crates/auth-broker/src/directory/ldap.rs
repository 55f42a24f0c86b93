// SPDX-License-Identifier: AGPL-3.0-only
//! `ldap3`-backed directory connections.

use super::{DirectoryConnection, DirectoryConnector, DirectoryEntry, DirectoryFault, SearchScope};
use crate::config::DirectoryConfig;
use async_trait::async_trait;
use ldap3::adapters::{Adapter, EntriesOnly, PagedResults};
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError, ResultEntry, Scope, SearchEntry};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// LDAP result code for invalidCredentials.
const RC_INVALID_CREDENTIALS: u32 = 49;

/// Entries requested per page on subtree searches. Active Directory refuses
/// unpaged result sets beyond its MaxPageSize (1000 by default).
const SEARCH_PAGE_SIZE: i32 = 500;

#[derive(Debug, Default, Clone, Copy)]
pub struct LdapConnector;

#[async_trait]
impl DirectoryConnector for LdapConnector {
    async fn connect(&self, config: &DirectoryConfig) -> Result<Box<dyn DirectoryConnection>, DirectoryFault> {
        let settings = LdapConnSettings::new().set_conn_timeout(config.connect_timeout);
        let (conn, ldap) = timed(config.connect_timeout, LdapConnAsync::with_settings(settings, &config.url)).await?;
        let url = config.url.clone();
        tokio::spawn(async move {
            if let Err(err) = conn.drive().await {
                warn!(error = %err, url = %url, "directory connection ended with error");
            }
        });
        debug!(url = %config.url, "directory connection established");
        Ok(Box::new(LdapConnection {
            ldap,
            timeout: config.timeout,
        }))
    }
}

struct LdapConnection {
    ldap: Ldap,
    timeout: Duration,
}

#[async_trait]
impl DirectoryConnection for LdapConnection {
    async fn bind(&self, dn: &str, secret: &str) -> Result<(), DirectoryFault> {
        let mut ldap = self.ldap.clone();
        let result = timed(self.timeout, ldap.simple_bind(dn, secret)).await?;
        if result.rc == RC_INVALID_CREDENTIALS {
            return Err(DirectoryFault::InvalidCredentials);
        }
        result.success().map(|_| ()).map_err(fault)
    }

    async fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<DirectoryEntry>, DirectoryFault> {
        let mut ldap = self.ldap.clone();
        if scope == SearchScope::Base {
            let result = timed(self.timeout, ldap.search(base, Scope::Base, filter, attrs.to_vec())).await?;
            let (entries, _) = result.success().map_err(fault)?;
            return Ok(entries.into_iter().map(directory_entry).collect());
        }

        let adapters: Vec<Box<dyn Adapter<_, _>>> = vec![
            Box::new(EntriesOnly::new()),
            Box::new(PagedResults::new(SEARCH_PAGE_SIZE)),
        ];
        let mut stream = timed(
            self.timeout,
            ldap.streaming_search_with(adapters, base, Scope::Subtree, filter, attrs.to_vec()),
        )
        .await?;
        let mut entries = Vec::new();
        while let Some(raw) = timed(self.timeout, stream.next()).await? {
            entries.push(directory_entry(raw));
        }
        stream.finish().await.success().map_err(fault)?;
        debug!(base, count = entries.len(), "paged directory search finished");
        Ok(entries)
    }

    async fn unbind(&self) {
        let mut ldap = self.ldap.clone();
        if let Err(err) = ldap.unbind().await {
            debug!(error = %err, "directory unbind failed");
        }
    }
}

fn directory_entry(raw: ResultEntry) -> DirectoryEntry {
    let entry = SearchEntry::construct(raw);
    DirectoryEntry {
        dn: entry.dn,
        attrs: entry.attrs,
    }
}

async fn timed<T, F>(limit: Duration, op: F) -> Result<T, DirectoryFault>
where
    F: Future<Output = Result<T, LdapError>>,
{
    match tokio::time::timeout(limit, op).await {
        Ok(result) => result.map_err(fault),
        Err(_) => Err(DirectoryFault::Timeout),
    }
}

fn fault(err: LdapError) -> DirectoryFault {
    if let LdapError::LdapResult { result } = &err {
        if result.rc == RC_INVALID_CREDENTIALS {
            return DirectoryFault::InvalidCredentials;
        }
    }
    let refused = std::iter::successors(Some(&err as &(dyn std::error::Error + 'static)), |e| e.source())
        .filter_map(|e| e.downcast_ref::<std::io::Error>())
        .any(|io| io.kind() == std::io::ErrorKind::ConnectionRefused);
    if refused {
        DirectoryFault::Refused
    } else {
        DirectoryFault::Other(err.to_string())
    }
}
