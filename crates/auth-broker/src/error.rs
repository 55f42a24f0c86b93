// SPDX-License-Identifier: AGPL-3.0-only
//! Error taxonomy shared by the backends and the broker.

use crate::identity::BackendKind;
use thiserror::Error;

/// Generic message shown to clients for every rejected or failed login.
pub const LOGIN_FAILED_MESSAGE: &str = "Invalid username or password";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{backend} configuration is missing required key `{key}`")]
    MissingKey {
        backend: BackendKind,
        key: &'static str,
    },
    #[error("{backend} configuration key `{key}` is invalid: {reason}")]
    InvalidValue {
        backend: BackendKind,
        key: &'static str,
        reason: String,
    },
}

/// A backend could not give an answer. Never a credential rejection.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{0} backend is not initialized")]
    NotInitialized(BackendKind),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{backend} request timed out after {timeout_ms} ms")]
    Timeout { backend: BackendKind, timeout_ms: u64 },
    #[error("{backend} server refused the connection")]
    Refused { backend: BackendKind },
    #[error("{backend} transport error: {source}")]
    Transport {
        backend: BackendKind,
        #[source]
        source: std::io::Error,
    },
    #[error("{backend} protocol error: {message}")]
    Protocol { backend: BackendKind, message: String },
    #[error("{backend} server error: {message}")]
    Server { backend: BackendKind, message: String },
}

impl BackendError {
    pub fn backend(&self) -> Option<BackendKind> {
        match self {
            BackendError::NotInitialized(kind) => Some(*kind),
            BackendError::Config(ConfigError::MissingKey { backend, .. })
            | BackendError::Config(ConfigError::InvalidValue { backend, .. }) => Some(*backend),
            BackendError::Timeout { backend, .. }
            | BackendError::Refused { backend }
            | BackendError::Transport { backend, .. }
            | BackendError::Protocol { backend, .. }
            | BackendError::Server { backend, .. } => Some(*backend),
        }
    }

    /// Timeouts and refusals: the server is not there at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            BackendError::Timeout { .. } | BackendError::Refused { .. } | BackendError::Transport { .. }
        )
    }

    pub(crate) fn from_io(backend: BackendKind, err: std::io::Error) -> BackendError {
        if err.kind() == std::io::ErrorKind::ConnectionRefused {
            BackendError::Refused { backend }
        } else {
            BackendError::Transport {
                backend,
                source: err,
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication backend unavailable: {0}")]
    BackendUnavailable(#[from] BackendError),
    #[error("{principal} authenticated against {backend} but has no local account")]
    IdentityNotProvisioned {
        principal: String,
        backend: BackendKind,
    },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl AuthError {
    /// Message safe to show a client.
    pub fn outward_message(&self) -> &'static str {
        match self {
            AuthError::BackendUnavailable(_) => "Authentication service unavailable",
            AuthError::IdentityNotProvisioned { .. } => {
                "Authenticated but not registered in the system; contact an administrator"
            }
            AuthError::Store(_) => "Internal server error",
        }
    }

    /// Whether the failure belongs to the server side (5xx class).
    pub fn is_server_fault(&self) -> bool {
        !matches!(self, AuthError::IdentityNotProvisioned { .. })
    }
}
