// SPDX-License-Identifier: AGPL-3.0-only
//! SSH device connector built on russh.

use crate::credentials::DeviceLogin;
use crate::device::Device;
use crate::error::RelayError;
use crate::frame::WindowSize;
use crate::transport::{DeviceConnector, DeviceInput, DeviceLink};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use russh::keys::HashAlg;
use russh::{ChannelMsg, Disconnect, client, keys};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const TERM: &str = "xterm-color";
const LINK_BUFFER: usize = 64;

pub struct SshConnector {
    config: Arc<client::Config>,
    connect_timeout: Duration,
}

impl SshConnector {
    pub fn new(connect_timeout: Duration, keepalive: Duration) -> SshConnector {
        let config = client::Config {
            nodelay: true,
            keepalive_interval: Some(keepalive),
            keepalive_max: 3,
            ..Default::default()
        };
        SshConnector {
            config: Arc::new(config),
            connect_timeout,
        }
    }
}

/// Accepts the device's host key if it matches the pinned key; without a
/// pinned key the presented one is accepted with a warning.
struct HostKeyPolicy {
    device: String,
    expected: Option<String>,
}

impl client::Handler for HostKeyPolicy {
    type Error = anyhow::Error;

    async fn check_server_key(&mut self, key: &keys::PublicKey) -> Result<bool, Self::Error> {
        let presented = key.to_openssh().map(|s| s.trim().to_string()).unwrap_or_default();
        let fingerprint = key.fingerprint(HashAlg::Sha256).to_string();
        match &self.expected {
            Some(expected) if expected.trim() == presented => Ok(true),
            Some(_) => {
                warn!(device = %self.device, fp = %fingerprint, "device host key mismatch; rejecting connection");
                Ok(false)
            }
            None => {
                warn!(device = %self.device, fp = %fingerprint, "no pinned host key for device; accepting");
                Ok(true)
            }
        }
    }
}

fn failed(target: &str, reason: impl std::fmt::Display) -> RelayError {
    RelayError::Connect {
        target: target.to_string(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl DeviceConnector for SshConnector {
    async fn connect(&self, device: &Device, login: &DeviceLogin, size: WindowSize) -> Result<DeviceLink, RelayError> {
        let target = device.target();
        let handler = HostKeyPolicy {
            device: device.name.clone(),
            expected: device.host_key.clone(),
        };
        info!(device = %device.name, target, "connecting to device");

        let establish = async {
            let mut session = client::connect(
                Arc::clone(&self.config),
                (device.address.as_str(), device.port),
                handler,
            )
            .await
            .map_err(|e| failed(&target, e))?;
            let auth = session
                .authenticate_password(login.username.clone(), login.secret.expose_secret().clone())
                .await
                .map_err(|e| failed(&target, e))?;
            if !matches!(auth, client::AuthResult::Success) {
                return Err(failed(&target, "device rejected the relay credentials"));
            }
            let channel = session
                .channel_open_session()
                .await
                .map_err(|e| failed(&target, e))?;
            channel
                .request_pty(true, TERM, size.cols, size.rows, size.width, size.height, &[])
                .await
                .map_err(|e| failed(&target, e))?;
            channel
                .request_shell(true)
                .await
                .map_err(|e| failed(&target, e))?;
            Ok((session, channel))
        };
        let (session, channel) = tokio::time::timeout(self.connect_timeout, establish)
            .await
            .map_err(|_| failed(&target, "timed out"))??;

        let (link, output, input) = DeviceLink::pair(LINK_BUFFER);
        tokio::spawn(pump(session, channel, output, input, target));
        Ok(link)
    }
}

/// Shuttles bytes between the SSH channel and the link until either side
/// closes, then shuts the connection down.
async fn pump(
    session: client::Handle<HostKeyPolicy>,
    mut channel: russh::Channel<client::Msg>,
    output: mpsc::Sender<Vec<u8>>,
    mut input: mpsc::Receiver<DeviceInput>,
    target: String,
) {
    loop {
        tokio::select! {
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                    if output.send(data.to_vec()).await.is_err() {
                        break;
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    debug!(target, exit_status, "device shell exited");
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            },
            next = input.recv() => match next {
                Some(DeviceInput::Data(bytes)) => {
                    if channel.data(&bytes[..]).await.is_err() {
                        break;
                    }
                }
                Some(DeviceInput::Resize(size)) => {
                    if let Err(err) = channel.window_change(size.cols, size.rows, size.width, size.height).await {
                        debug!(target, error = %err, "window change failed");
                    }
                }
                Some(DeviceInput::Close) | None => break,
            },
        }
    }
    let _ = channel.eof().await;
    let _ = channel.close().await;
    let _ = session
        .disconnect(Disconnect::ByApplication, "session closed", "en")
        .await;
    debug!(target, "device connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceStatus;
    use secrecy::SecretString;

    #[tokio::test]
    async fn refused_port_is_a_connect_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let device = Device {
            id: 1,
            name: "lab".into(),
            address: "127.0.0.1".into(),
            port,
            status: DeviceStatus::Online,
            supports_ssh: true,
            supports_telnet: false,
            host_key: None,
        };
        let login = DeviceLogin {
            username: "ops".into(),
            secret: SecretString::new("pw".into()),
        };
        let connector = SshConnector::new(Duration::from_secs(2), Duration::from_secs(30));
        let err = connector
            .connect(&device, &login, WindowSize::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Connect { ref target, .. } if target == &device.target()));
    }

    #[tokio::test]
    async fn silent_device_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _hold = tokio::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let device = Device {
            id: 1,
            name: "lab".into(),
            address: "127.0.0.1".into(),
            port,
            status: DeviceStatus::Online,
            supports_ssh: true,
            supports_telnet: false,
            host_key: None,
        };
        let login = DeviceLogin {
            username: "ops".into(),
            secret: SecretString::new("pw".into()),
        };
        let connector = SshConnector::new(Duration::from_millis(200), Duration::from_secs(30));
        let err = connector
            .connect(&device, &login, WindowSize::default())
            .await
            .unwrap_err();
        match err {
            RelayError::Connect { reason, .. } => assert_eq!(reason, "timed out"),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
