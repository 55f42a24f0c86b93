// SPDX-License-Identifier: AGPL-3.0-only
//! Backend kinds, canonical identities and authentication verdicts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of identity backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    #[serde(alias = "ldap")]
    Directory,
    Tacacs,
    Radius,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Local,
        BackendKind::Directory,
        BackendKind::Tacacs,
        BackendKind::Radius,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Directory => "directory",
            BackendKind::Tacacs => "tacacs",
            BackendKind::Radius => "radius",
        }
    }

    /// Settings category the backend's key/value configuration lives under.
    pub fn settings_category(self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Directory => "ldap",
            BackendKind::Tacacs => "tacacs",
            BackendKind::Radius => "radius",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(BackendKind::Local),
            "directory" | "ldap" | "ad" => Ok(BackendKind::Directory),
            "tacacs" | "tacacs+" => Ok(BackendKind::Tacacs),
            "radius" => Ok(BackendKind::Radius),
            other => Err(format!("unknown authentication backend '{other}'")),
        }
    }
}

/// Canonical identity produced by a successful authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: i64,
    pub principal: String,
    pub display_name: String,
    pub email: Option<String>,
    pub origin: BackendKind,
    pub group_id: Option<i64>,
}

/// Why a credential was rejected. Internal only; never shown to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    UnknownPrincipal,
    Inactive,
    BadSecret,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::UnknownPrincipal => "unknown principal",
            RejectReason::Inactive => "account inactive",
            RejectReason::BadSecret => "bad secret",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthVerdict {
    pub authenticated: bool,
    pub identity: Option<Identity>,
    pub attributes: Vec<(String, String)>,
    reason: Option<RejectReason>,
}

impl AuthVerdict {
    pub fn accepted(identity: Identity, attributes: Vec<(String, String)>) -> AuthVerdict {
        AuthVerdict {
            authenticated: true,
            identity: Some(identity),
            attributes,
            reason: None,
        }
    }

    pub fn rejected(reason: RejectReason) -> AuthVerdict {
        AuthVerdict {
            authenticated: false,
            identity: None,
            attributes: Vec::new(),
            reason: Some(reason),
        }
    }

    pub fn reject_reason(&self) -> Option<RejectReason> {
        self.reason
    }
}

/// What a remote backend said about a credential, before local mapping.
#[derive(Debug, Clone, Default)]
pub struct BackendAnswer {
    pub accepted: bool,
    pub message: Option<String>,
    pub attributes: Vec<(String, String)>,
}

impl BackendAnswer {
    pub fn accept() -> BackendAnswer {
        BackendAnswer {
            accepted: true,
            ..BackendAnswer::default()
        }
    }

    pub fn reject() -> BackendAnswer {
        BackendAnswer::default()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> BackendAnswer {
        let message = message.into();
        if !message.is_empty() {
            self.message = Some(message);
        }
        self
    }
}
