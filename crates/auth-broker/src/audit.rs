// SPDX-License-Identifier: AGPL-3.0-only
//! Append-only audit records and the sink that persists them.

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Login,
    DirectorySync,
    Connect(&'static str),
    Disconnect(&'static str),
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessKind::Login => f.write_str("login"),
            AccessKind::DirectorySync => f.write_str("ldap-sync"),
            AccessKind::Connect(protocol) => write!(f, "connect-{protocol}"),
            AccessKind::Disconnect(protocol) => write!(f, "disconnect-{protocol}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessStatus {
    Success,
    Failure,
    Attempt,
}

impl fmt::Display for AccessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AccessStatus::Success => "success",
            AccessStatus::Failure => "failure",
            AccessStatus::Attempt => "attempt",
        })
    }
}

#[derive(Debug, Clone)]
pub struct AccessRecord {
    pub user_id: Option<i64>,
    pub device_id: Option<i64>,
    pub peer: String,
    pub kind: AccessKind,
    pub status: AccessStatus,
    pub details: String,
    pub at: OffsetDateTime,
}

impl AccessRecord {
    pub fn new(kind: AccessKind, status: AccessStatus, peer: impl Into<String>) -> AccessRecord {
        AccessRecord {
            user_id: None,
            device_id: None,
            peer: peer.into(),
            kind,
            status,
            details: String::new(),
            at: OffsetDateTime::now_utc(),
        }
    }

    pub fn user(mut self, user_id: i64) -> AccessRecord {
        self.user_id = Some(user_id);
        self
    }

    pub fn device(mut self, device_id: i64) -> AccessRecord {
        self.device_id = Some(device_id);
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> AccessRecord {
        self.details = details.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord {
    pub user_id: i64,
    pub device_id: i64,
    pub command: String,
    pub executed_at: OffsetDateTime,
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record_access(&self, record: AccessRecord) -> Result<()>;

    async fn record_command(&self, record: CommandRecord) -> Result<()>;
}
