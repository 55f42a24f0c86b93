// SPDX-License-Identifier: AGPL-3.0-only
//! Device transport seam: a connector yields a byte-stream link to a device
//! shell, decoupled from the concrete protocol driving it.

use crate::credentials::DeviceLogin;
use crate::device::Device;
use crate::error::RelayError;
use crate::frame::WindowSize;
use async_trait::async_trait;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceInput {
    Data(Vec<u8>),
    Resize(WindowSize),
    Close,
}

/// Write half of a device link. Not cloneable, so the connection can only
/// be closed once.
#[derive(Debug)]
pub struct DeviceControl {
    tx: mpsc::Sender<DeviceInput>,
}

impl DeviceControl {
    pub fn new(tx: mpsc::Sender<DeviceInput>) -> DeviceControl {
        DeviceControl { tx }
    }

    pub async fn send(&self, bytes: Vec<u8>) -> Result<(), RelayError> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.tx
            .send(DeviceInput::Data(bytes))
            .await
            .map_err(|_| RelayError::Transport("device input closed".to_string()))
    }

    pub async fn resize(&self, size: WindowSize) -> Result<(), RelayError> {
        self.tx
            .send(DeviceInput::Resize(size))
            .await
            .map_err(|_| RelayError::Transport("device input closed".to_string()))
    }

    /// Terminates the device connection. A link that already went away is fine.
    pub async fn close(self) {
        let _ = self.tx.send(DeviceInput::Close).await;
    }
}

/// An open shell on a device.
#[derive(Debug)]
pub struct DeviceLink {
    pub output: mpsc::Receiver<Vec<u8>>,
    pub control: DeviceControl,
}

impl DeviceLink {
    /// A link plus the device-side ends of its channels.
    pub fn pair(buffer: usize) -> (DeviceLink, mpsc::Sender<Vec<u8>>, mpsc::Receiver<DeviceInput>) {
        let (out_tx, out_rx) = mpsc::channel(buffer);
        let (in_tx, in_rx) = mpsc::channel(buffer);
        (
            DeviceLink {
                output: out_rx,
                control: DeviceControl::new(in_tx),
            },
            out_tx,
            in_rx,
        )
    }
}

#[async_trait]
pub trait DeviceConnector: Send + Sync {
    async fn connect(&self, device: &Device, login: &DeviceLogin, size: WindowSize) -> Result<DeviceLink, RelayError>;
}
