// SPDX-License-Identifier: AGPL-3.0-only
//! Relay error taxonomy. Display strings are shown to the (already
//! authenticated) client as-is.

use thiserror::Error;

/// A client frame that could not be understood.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("unsupported frame type '{0}'")]
    UnsupportedType(String),
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Token or device id not provided")]
    MissingParameter,
    #[error("Invalid device id '{0}'")]
    InvalidDeviceId(String),
    #[error("Unsupported protocol '{0}'")]
    UnknownProtocol(String),
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("User or device not found")]
    NotFound,
    #[error("User account is inactive")]
    InactiveUser,
    #[error("Device {0} is not online")]
    DeviceOffline(String),
    #[error("Device {device} does not support {protocol}")]
    ProtocolUnsupported { device: String, protocol: &'static str },
    #[error("{0} sessions are not implemented")]
    NotImplemented(&'static str),
    #[error("No device credentials available for {0}")]
    NoCredentials(String),
    #[error("Connection to {target} failed: {reason}")]
    Connect { target: String, reason: String },
    #[error("Session protocol error: {0}")]
    SessionProtocol(#[from] FrameError),
    #[error("Device connection lost: {0}")]
    Transport(String),
    #[error("Session closed by server shutdown")]
    Shutdown,
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}
