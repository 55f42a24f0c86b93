// SPDX-License-Identifier: AGPL-3.0-only
//! Backend health reporting.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Online,
    Degraded,
    Offline,
    Error,
}

impl HealthState {
    /// Gauge encoding used by the metrics exporter.
    pub fn as_gauge(self) -> i64 {
        match self {
            HealthState::Online => 1,
            HealthState::Degraded => 2,
            HealthState::Offline => 0,
            HealthState::Error => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub status: HealthState,
    pub message: String,
}

impl HealthStatus {
    pub fn new(status: HealthState, message: impl Into<String>) -> HealthStatus {
        HealthStatus {
            status,
            message: message.into(),
        }
    }

    pub fn online(message: impl Into<String>) -> HealthStatus {
        HealthStatus::new(HealthState::Online, message)
    }

    pub fn degraded(message: impl Into<String>) -> HealthStatus {
        HealthStatus::new(HealthState::Degraded, message)
    }

    pub fn offline(message: impl Into<String>) -> HealthStatus {
        HealthStatus::new(HealthState::Offline, message)
    }

    pub fn error(message: impl Into<String>) -> HealthStatus {
        HealthStatus::new(HealthState::Error, message)
    }
}

/// One entry per remote backend.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    #[serde(rename = "ldap")]
    pub directory: HealthStatus,
    pub tacacs: HealthStatus,
    pub radius: HealthStatus,
}
