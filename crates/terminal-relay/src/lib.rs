// SPDX-License-Identifier: AGPL-3.0-only
//! Authenticated terminal relay.
//!
//! [`TerminalRelay`] bridges a client byte stream to an SSH shell on a managed
//! device, detecting executed commands for the audit trail and reporting them
//! to TACACS+/RADIUS accounting through [`SessionAccounting`]. Live sessions
//! are tracked in a [`SessionRegistry`] so they can be force-closed.

pub mod accounting;
pub mod command;
pub mod credentials;
pub mod device;
pub mod error;
pub mod frame;
pub mod registry;
pub mod relay;
pub mod session;
pub mod ssh;
pub mod transport;

pub use accounting::SessionAccounting;
pub use command::{CaptureMode, CommandDetector};
pub use credentials::{CredentialMap, DeviceCredentials, DeviceLogin, SharedCredential};
pub use device::{Device, DeviceDirectory, DeviceStatus, TokenClaims, TokenVerifier};
pub use error::{FrameError, RelayError};
pub use frame::{ClientFrame, ServerFrame, WindowSize};
pub use registry::{ManagedSession, SessionRegistry};
pub use relay::{ClientLink, CloseReason, RelayDeps, RelayOutcome, RelayRequest, RelaySettings, TerminalRelay};
pub use session::{Protocol, RelaySession, RelayState, SessionId};
pub use ssh::SshConnector;
pub use transport::{DeviceConnector, DeviceControl, DeviceInput, DeviceLink};
