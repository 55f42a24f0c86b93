// SPDX-License-Identifier: AGPL-3.0-only
//! Command-boundary detection over the terminal byte stream.
//!
//! Bytes are appended to a per-session line buffer. Every time a line
//! terminator arrives the completed lines are trimmed and, unless blank or
//! shaped like a device prompt, reported as executed commands. The trailing
//! partial line stays buffered until its terminator shows up.

use parking_lot::Mutex;
use regex::Regex;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::LazyLock;

static ESCAPE_SEQUENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b(?:\[[0-?]*[ -/]*[@-~]|O.|[@-Z\\-_])").expect("escape sequence pattern")
});

static PROMPT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[#>$\]%]").expect("prompt pattern"));

const BACKSPACE: char = '\u{8}';
const DELETE: char = '\u{7f}';
const CTRL_C: char = '\u{3}';
const CTRL_U: char = '\u{15}';

/// Which side of the session feeds the line buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureMode {
    /// Client keystrokes. Line editing keys are applied before detection.
    #[default]
    Keystrokes,
    /// Device output, including its echo of typed input.
    DeviceEcho,
}

impl FromStr for CaptureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keystrokes" => Ok(CaptureMode::Keystrokes),
            "device-echo" => Ok(CaptureMode::DeviceEcho),
            other => Err(format!("unknown capture mode '{other}'")),
        }
    }
}

/// Line accumulation shared by both relay directions of one session.
#[derive(Debug, Default)]
pub struct CommandDetector {
    mode: CaptureMode,
    line: Mutex<String>,
}

impl CommandDetector {
    pub fn new(mode: CaptureMode) -> CommandDetector {
        CommandDetector {
            mode,
            line: Mutex::new(String::new()),
        }
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    /// Bytes typed by the client. Returns the commands completed by them.
    pub fn feed_client(&self, bytes: &[u8]) -> Vec<String> {
        match self.mode {
            CaptureMode::Keystrokes => self.feed(bytes),
            CaptureMode::DeviceEcho => Vec::new(),
        }
    }

    /// Bytes produced by the device. Returns the commands completed by them.
    pub fn feed_device(&self, bytes: &[u8]) -> Vec<String> {
        match self.mode {
            CaptureMode::DeviceEcho => self.feed(bytes),
            CaptureMode::Keystrokes => Vec::new(),
        }
    }

    /// The partial line typed so far, if it would be reported as a command.
    pub fn pending_command(&self) -> Option<String> {
        as_command(&self.line.lock())
    }

    /// The trimmed partial line, prompt-shaped or not. `None` when blank.
    pub fn pending_line(&self) -> Option<String> {
        let line = self.line.lock();
        let trimmed = line.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    /// Forgets the partial line.
    pub fn discard_line(&self) {
        self.line.lock().clear();
    }

    fn feed(&self, bytes: &[u8]) -> Vec<String> {
        let text = String::from_utf8_lossy(bytes);
        let text = ESCAPE_SEQUENCE.replace_all(&text, "");
        let mut commands = Vec::new();
        let mut line = self.line.lock();
        for ch in text.chars() {
            match ch {
                '\r' | '\n' => {
                    if let Some(command) = as_command(&line) {
                        commands.push(command);
                    }
                    line.clear();
                }
                BACKSPACE | DELETE => {
                    line.pop();
                }
                CTRL_C | CTRL_U => line.clear(),
                '\t' => line.push(' '),
                c if c.is_control() => {}
                c => line.push(c),
            }
        }
        commands
    }
}

fn as_command(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || PROMPT_LINE.is_match(trimmed) {
        None
    } else {
        Some(trimmed.to_string())
    }
}
