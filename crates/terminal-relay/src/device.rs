// SPDX-License-Identifier: AGPL-3.0-only
//! Managed devices and the collaborators the relay resolves them through.

use crate::session::Protocol;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use warden_auth::BackendKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    Maintenance,
    Unknown,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: i64,
    pub name: String,
    #[serde(alias = "ipAddress")]
    pub address: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub status: DeviceStatus,
    #[serde(default = "default_true")]
    pub supports_ssh: bool,
    #[serde(default)]
    pub supports_telnet: bool,
    /// Pinned host key in OpenSSH format (`ssh-ed25519 AAAA...`).
    #[serde(default)]
    pub host_key: Option<String>,
}

impl Device {
    pub fn supports(&self, protocol: Protocol) -> bool {
        match protocol {
            Protocol::Ssh => self.supports_ssh,
            Protocol::Telnet => self.supports_telnet,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == DeviceStatus::Online
    }

    pub fn target(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn device(&self, id: i64) -> Result<Option<Device>>;
}

/// What a valid session token says about its bearer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub user_id: i64,
    pub username: String,
    pub origin: BackendKind,
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// `None` for unknown or expired tokens.
    async fn verify(&self, token: &str) -> Option<TokenClaims>;
}
