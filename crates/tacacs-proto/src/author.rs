// SPDX-License-Identifier: AGPL-3.0-only
//! TACACS+ authorization REQUEST builder/encoder and RESPONSE decoder.

use crate::util::{Attribute, parse_attributes, read_string, read_u16, short_len};
use crate::{AUTHOR_STATUS_PASS_ADD, AUTHOR_STATUS_PASS_REPL};
use anyhow::{Result, anyhow, ensure};
use bytes::{BufMut, BytesMut};

pub const AUTHEN_METHOD_TACACSPLUS: u8 = 0x06;

#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub authen_method: u8,
    pub priv_lvl: u8,
    pub authen_type: u8,
    pub authen_service: u8,
    pub user: String,
    pub port: String,
    pub rem_addr: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AuthorizationResponse {
    pub status: u8,
    pub server_msg: String,
    pub data: String,
    pub args: Vec<String>,
}

impl AuthorizationRequest {
    pub fn builder(user: impl Into<String>) -> AuthorizationRequest {
        AuthorizationRequest {
            authen_method: AUTHEN_METHOD_TACACSPLUS,
            priv_lvl: 1,
            authen_type: crate::AUTHEN_TYPE_PAP,
            authen_service: crate::authen::AUTHEN_SERVICE_LOGIN,
            user: user.into(),
            port: String::new(),
            rem_addr: String::new(),
            args: Vec::new(),
        }
    }

    /// Set or replace the service attribute (enforced to appear first).
    pub fn with_service(mut self, service: impl AsRef<str>) -> Self {
        self.args
            .retain(|a| !a.to_lowercase().starts_with("service="));
        self.args.insert(0, format!("service={}", service.as_ref()));
        self
    }

    /// Set or replace the protocol attribute (kept after service when present).
    pub fn with_protocol(mut self, protocol: impl AsRef<str>) -> Self {
        self.args
            .retain(|a| !a.to_lowercase().starts_with("protocol="));
        let service_pos = self
            .args
            .iter()
            .position(|a| a.to_lowercase().starts_with("service="));
        let insert_pos = service_pos.map(|p| p + 1).unwrap_or(self.args.len());
        self.args
            .insert(insert_pos, format!("protocol={}", protocol.as_ref()));
        self
    }

    pub fn with_cmd(mut self, cmd: impl AsRef<str>) -> Self {
        self.args.retain(|a| !a.to_lowercase().starts_with("cmd="));
        self.args.push(format!("cmd={}", cmd.as_ref()));
        self
    }

    pub fn add_cmd_arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(format!("cmd-arg={}", arg.as_ref()));
        self
    }

    /// Shell command request: `service=shell`, `protocol`, then `cmd` and one
    /// `cmd-arg` per remaining whitespace-separated token of `command_line`.
    pub fn shell_command(mut self, protocol: impl AsRef<str>, command_line: &str) -> Self {
        self = self.with_service("shell").with_protocol(protocol);
        let mut tokens = command_line.split_whitespace();
        if let Some(cmd) = tokens.next() {
            self = self.with_cmd(cmd);
        }
        for arg in tokens {
            self = self.add_cmd_arg(arg);
        }
        self
    }

    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = port.into();
        self
    }

    pub fn with_rem_addr(mut self, rem_addr: impl Into<String>) -> Self {
        self.rem_addr = rem_addr.into();
        self
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        ensure!(!self.args.is_empty(), "authorization request requires attributes");
        ensure!(self.args.len() <= u8::MAX as usize, "too many authorization attributes");
        ensure!(self.priv_lvl <= 0x0f, "authorization priv_lvl invalid");
        let user = self.user.as_bytes();
        let port = self.port.as_bytes();
        let rem_addr = self.rem_addr.as_bytes();

        let mut buf = BytesMut::new();
        buf.put_u8(self.authen_method);
        buf.put_u8(self.priv_lvl);
        buf.put_u8(self.authen_type);
        buf.put_u8(self.authen_service);
        buf.put_u8(short_len(user, "user")?);
        buf.put_u8(short_len(port, "port")?);
        buf.put_u8(short_len(rem_addr, "rem_addr")?);
        buf.put_u8(self.args.len() as u8);
        for (idx, arg) in self.args.iter().enumerate() {
            buf.put_u8(short_len(arg.as_bytes(), &format!("arg[{idx}]"))?);
        }
        buf.extend_from_slice(user);
        buf.extend_from_slice(port);
        buf.extend_from_slice(rem_addr);
        for arg in &self.args {
            buf.extend_from_slice(arg.as_bytes());
        }
        Ok(buf.to_vec())
    }
}

impl AuthorizationResponse {
    pub fn decode(body: &[u8]) -> Result<AuthorizationResponse> {
        ensure!(body.len() >= 6, "authorization response too short");
        let status = body[0];
        let arg_cnt = body[1] as usize;
        let server_msg_len = read_u16(body, 2, "server_msg_len")? as usize;
        let data_len = read_u16(body, 4, "data_len")? as usize;
        let mut cursor = 6;
        let arg_lens = body
            .get(cursor..cursor + arg_cnt)
            .ok_or_else(|| anyhow!("authorization response args length truncated"))?;
        cursor += arg_cnt;
        let total_args_len: usize = arg_lens.iter().map(|l| *l as usize).sum();
        ensure!(
            cursor + server_msg_len + data_len + total_args_len == body.len(),
            "authorization response length mismatch"
        );
        let (server_msg, next) = read_string(body, cursor, server_msg_len, "server_msg")?;
        let (data, mut cursor) = read_string(body, next, data_len, "data")?;
        let mut args = Vec::with_capacity(arg_cnt);
        for (idx, len) in arg_lens.iter().enumerate() {
            let (arg, next_cursor) =
                read_string(body, cursor, *len as usize, &format!("arg[{idx}]"))?;
            cursor = next_cursor;
            args.push(arg);
        }
        Ok(AuthorizationResponse {
            status,
            server_msg,
            data,
            args,
        })
    }

    pub fn is_permitted(&self) -> bool {
        self.status == AUTHOR_STATUS_PASS_ADD || self.status == AUTHOR_STATUS_PASS_REPL
    }

    pub fn attributes(&self) -> Vec<Attribute> {
        parse_attributes(&self.args)
    }
}
