// SPDX-License-Identifier: AGPL-3.0-only
//! Client session protocol frames.
//!
//! Client to relay: raw keystrokes arrive either as binary messages or as
//! `{"type":"data","data":"..."}`; `{"type":"resize","cols":..,"rows":..}`
//! changes the pseudo-terminal size. Relay to client: device output is sent
//! as binary messages, lifecycle notices as JSON text.

use crate::error::FrameError;
use serde::{Deserialize, Serialize};

const MAX_DIMENSION: u32 = 1000;

/// Pseudo-terminal geometry in character cells and pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSize {
    pub cols: u32,
    pub rows: u32,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

impl Default for WindowSize {
    fn default() -> Self {
        WindowSize {
            cols: 80,
            rows: 24,
            width: 0,
            height: 0,
        }
    }
}

impl WindowSize {
    pub fn validate(self) -> Result<WindowSize, FrameError> {
        if self.cols == 0 || self.rows == 0 || self.cols > MAX_DIMENSION || self.rows > MAX_DIMENSION {
            return Err(FrameError::Malformed(format!(
                "window size {}x{} out of range",
                self.cols, self.rows
            )));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Data(Vec<u8>),
    Resize(WindowSize),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireFrame {
    Data { data: String },
    Resize {
        cols: u32,
        rows: u32,
        #[serde(default)]
        width: u32,
        #[serde(default)]
        height: u32,
    },
}

impl ClientFrame {
    /// Parses a text message.
    pub fn parse(text: &str) -> Result<ClientFrame, FrameError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| FrameError::Malformed(e.to_string()))?;
        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| FrameError::Malformed("missing frame type".to_string()))?;
        if kind != "data" && kind != "resize" {
            return Err(FrameError::UnsupportedType(kind.to_string()));
        }
        let frame: WireFrame =
            serde_json::from_value(value).map_err(|e| FrameError::Malformed(e.to_string()))?;
        match frame {
            WireFrame::Data { data } => Ok(ClientFrame::Data(data.into_bytes())),
            WireFrame::Resize {
                cols,
                rows,
                width,
                height,
            } => Ok(ClientFrame::Resize(
                WindowSize {
                    cols,
                    rows,
                    width,
                    height,
                }
                .validate()?,
            )),
        }
    }

    pub fn binary(bytes: impl Into<Vec<u8>>) -> ClientFrame {
        ClientFrame::Data(bytes.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    #[serde(skip)]
    Data(Vec<u8>),
    Info { message: String },
    Error { message: String },
    Connected {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Closed { reason: String },
}

impl ServerFrame {
    pub fn info(message: impl Into<String>) -> ServerFrame {
        ServerFrame::Info {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> ServerFrame {
        ServerFrame::Error {
            message: message.into(),
        }
    }

    /// JSON text for control frames; `None` for device data, which goes out binary.
    pub fn to_json(&self) -> Option<String> {
        match self {
            ServerFrame::Data(_) => None,
            other => serde_json::to_string(other).ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_frame_carries_keystrokes() {
        let frame = ClientFrame::parse(r#"{"type":"data","data":"ls\r"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Data(b"ls\r".to_vec()));
    }

    #[test]
    fn resize_defaults_pixel_dimensions() {
        let frame = ClientFrame::parse(r#"{"type":"resize","cols":120,"rows":40}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Resize(WindowSize {
                cols: 120,
                rows: 40,
                width: 0,
                height: 0
            })
        );
    }

    #[test]
    fn zero_sized_window_is_rejected() {
        let err = ClientFrame::parse(r#"{"type":"resize","cols":0,"rows":40}"#).unwrap_err();
        assert!(matches!(err, FrameError::Malformed(_)));
    }

    #[test]
    fn unknown_type_is_reported() {
        let err = ClientFrame::parse(r#"{"type":"upload","path":"/etc"}"#).unwrap_err();
        assert_eq!(err, FrameError::UnsupportedType("upload".to_string()));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(ClientFrame::parse("not json"), Err(FrameError::Malformed(_))));
        assert!(matches!(ClientFrame::parse(r#"{"data":"x"}"#), Err(FrameError::Malformed(_))));
    }

    #[test]
    fn control_frames_serialize_with_type_tag() {
        let json = ServerFrame::info("hello").to_json().unwrap();
        assert_eq!(json, r#"{"type":"info","message":"hello"}"#);
        let json = ServerFrame::Connected {
            session_id: "abc".into(),
        }
        .to_json()
        .unwrap();
        assert_eq!(json, r#"{"type":"connected","sessionId":"abc"}"#);
        assert!(ServerFrame::Data(vec![1]).to_json().is_none());
    }
}
