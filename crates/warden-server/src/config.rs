// SPDX-License-Identifier: AGPL-3.0-only
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use warden_relay::{CaptureMode, RelaySettings, WindowSize};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// JSON structured logging for log aggregation.
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum CaptureArg {
    #[default]
    Keystrokes,
    DeviceEcho,
}

impl From<CaptureArg> for CaptureMode {
    fn from(arg: CaptureArg) -> Self {
        match arg {
            CaptureArg::Keystrokes => CaptureMode::Keystrokes,
            CaptureArg::DeviceEcho => CaptureMode::DeviceEcho,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "warden-server", version, about = "Network device access broker")]
pub struct Args {
    /// Listen address for the API, terminal endpoint, health checks and metrics.
    #[arg(long, env = "WARDEN_LISTEN", default_value = "127.0.0.1:3000")]
    pub listen: SocketAddr,

    /// JSON seed file with users, devices, backend settings and device credentials.
    #[arg(long, env = "WARDEN_SEED")]
    pub seed: Option<PathBuf>,

    /// Log output format: text or json.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Session token lifetime in seconds.
    #[arg(long, env = "WARDEN_TOKEN_TTL_SECS", default_value_t = 8 * 60 * 60)]
    pub token_ttl_secs: u64,

    /// Username presented to every device. Without it each user's own
    /// principal is used together with the shared device secret.
    #[arg(long, env = "WARDEN_DEVICE_USERNAME")]
    pub device_username: Option<String>,

    /// Shared secret presented to devices when no per-user credential exists.
    #[arg(long, env = "WARDEN_DEVICE_SECRET", hide_env_values = true)]
    pub device_secret: Option<String>,

    /// SSH connect and shell setup timeout in milliseconds.
    #[arg(long, default_value_t = 30_000)]
    pub ssh_connect_timeout_ms: u64,

    /// SSH keepalive interval in seconds.
    #[arg(long, default_value_t = 30)]
    pub ssh_keepalive_secs: u64,

    /// Which side of a terminal session command detection reads.
    #[arg(long, value_enum, default_value_t = CaptureArg::Keystrokes)]
    pub command_capture: CaptureArg,

    /// Authorize every typed command with TACACS+ before it reaches the device.
    #[arg(long, default_value_t = false)]
    pub authorize_commands: bool,

    /// Graceful shutdown drain timeout in seconds.
    #[arg(long, default_value_t = 10)]
    pub shutdown_drain_timeout_secs: u64,
}

impl Args {
    pub fn relay_settings(&self) -> Result<RelaySettings, String> {
        let capture = CaptureMode::from(self.command_capture);
        if self.authorize_commands && capture != CaptureMode::Keystrokes {
            return Err("--authorize-commands requires --command-capture keystrokes".into());
        }
        Ok(RelaySettings {
            capture,
            authorize_commands: self.authorize_commands,
            initial_size: WindowSize::default(),
        })
    }

    pub fn ssh_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.ssh_connect_timeout_ms)
    }

    pub fn ssh_keepalive(&self) -> Duration {
        Duration::from_secs(self.ssh_keepalive_secs)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}
