// SPDX-License-Identifier: AGPL-3.0-only
//! Multi-backend authentication broker.
//!
//! [`AuthBroker`] dispatches a (principal, secret, backend) triple to one of
//! four backends ([`CredentialStore`], [`DirectoryClient`], [`TacacsClient`],
//! [`RadiusClient`]) and turns the backend's answer into an [`AuthVerdict`]
//! carrying a canonical [`Identity`]. Backends are configured lazily from the
//! settings collaborator and can be reconfigured at runtime.

pub mod audit;
pub mod broker;
pub mod config;
pub mod directory;
pub mod error;
pub mod health;
pub mod identity;
pub mod local;
pub mod memory;
pub mod radius;
pub mod store;
pub mod tacacs;

pub use audit::{AccessKind, AccessRecord, AccessStatus, AuditSink, CommandRecord};
pub use broker::AuthBroker;
pub use config::{BackendSettings, DirectoryConfig, RadiusConfig, TacacsConfig};
pub use directory::{DirectoryClient, DirectoryConnector, DirectoryGroup, LdapConnector, SyncReport};
pub use error::{AuthError, BackendError, ConfigError};
pub use health::{HealthState, HealthStatus, StatusReport};
pub use identity::{AuthVerdict, BackendAnswer, BackendKind, Identity, RejectReason};
pub use local::{CredentialStore, LocalCheck};
pub use memory::MemoryStore;
pub use radius::RadiusClient;
pub use store::{DirectoryProfile, LocalUser, SettingStore, UpsertOutcome, UserStore};
pub use tacacs::{CommandAuthorization, TacacsClient};
