// SPDX-License-Identifier: AGPL-3.0-only
//! Per-connection relay session state.

use crate::command::CommandDetector;
use crate::device::Device;
use crate::registry::ManagedSession;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use warden_auth::Identity;

/// Random session identifier; also used as the RADIUS accounting session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> SessionId {
        SessionId(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        SessionId::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RelayState {
    Handshaking,
    Authenticated,
    Connecting,
    Streaming,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ssh,
    Telnet,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Ssh => "ssh",
            Protocol::Telnet => "telnet",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Protocol::Ssh => "SSH",
            Protocol::Telnet => "Telnet",
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ssh" => Ok(Protocol::Ssh),
            "telnet" => Ok(Protocol::Telnet),
            other => Err(other.to_string()),
        }
    }
}

/// A live relay session as seen by the registry.
pub struct RelaySession {
    pub id: SessionId,
    pub identity: Identity,
    pub device: Device,
    pub protocol: Protocol,
    pub peer: String,
    pub opened_at: OffsetDateTime,
    started: Instant,
    pub(crate) detector: CommandDetector,
    cancel: CancellationToken,
}

impl RelaySession {
    pub fn new(
        identity: Identity,
        device: Device,
        protocol: Protocol,
        peer: impl Into<String>,
        detector: CommandDetector,
    ) -> RelaySession {
        RelaySession {
            id: SessionId::new(),
            identity,
            device,
            protocol,
            peer: peer.into(),
            opened_at: OffsetDateTime::now_utc(),
            started: Instant::now(),
            detector,
            cancel: CancellationToken::new(),
        }
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[async_trait]
impl ManagedSession for RelaySession {
    /// Signals the owning relay task; it performs the actual teardown.
    async fn teardown(&self) -> Result<()> {
        self.cancel.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique() {
        let ids: std::collections::HashSet<_> = (0..1000).map(|_| SessionId::new()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn protocol_parses_case_insensitively() {
        assert_eq!("SSH".parse::<Protocol>().unwrap(), Protocol::Ssh);
        assert_eq!("telnet".parse::<Protocol>().unwrap(), Protocol::Telnet);
        assert_eq!("rdp".parse::<Protocol>().unwrap_err(), "rdp");
    }
}
