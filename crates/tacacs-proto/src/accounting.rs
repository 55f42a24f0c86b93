// SPDX-License-Identifier: AGPL-3.0-only
//! TACACS+ accounting REQUEST encoder and REPLY decoder.

use crate::author::AUTHEN_METHOD_TACACSPLUS;
use crate::util::{read_string, read_u16, short_len};
use crate::{ACCT_FLAG_START, ACCT_FLAG_STOP, ACCT_FLAG_WATCHDOG, ACCT_STATUS_SUCCESS};
use anyhow::{Result, ensure};
use bytes::{BufMut, BytesMut};

#[derive(Debug, Clone)]
pub struct AccountingRequest {
    pub flags: u8,
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
pub struct AccountingReply {
    pub status: u8,
    pub server_msg: String,
    pub data: String,
}

impl AccountingRequest {
    pub fn new(flags: u8, user: impl Into<String>) -> AccountingRequest {
        AccountingRequest {
            flags,
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

    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = port.into();
        self
    }

    pub fn with_rem_addr(mut self, rem_addr: impl Into<String>) -> Self {
        self.rem_addr = rem_addr.into();
        self
    }

    pub fn add_arg(mut self, name: &str, value: impl std::fmt::Display) -> Self {
        self.args.push(format!("{name}={value}"));
        self
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let kind = self.flags & (ACCT_FLAG_START | ACCT_FLAG_STOP | ACCT_FLAG_WATCHDOG);
        ensure!(
            kind == ACCT_FLAG_START
                || kind == ACCT_FLAG_STOP
                || kind == ACCT_FLAG_WATCHDOG
                || kind == (ACCT_FLAG_START | ACCT_FLAG_WATCHDOG),
            "accounting flags {:02x} invalid",
            self.flags
        );
        ensure!(
            self.args.iter().any(|a| a.starts_with("task_id=")),
            "accounting request requires task_id"
        );
        ensure!(self.args.len() <= u8::MAX as usize, "too many accounting attributes");
        let user = self.user.as_bytes();
        let port = self.port.as_bytes();
        let rem_addr = self.rem_addr.as_bytes();

        let mut buf = BytesMut::new();
        buf.put_u8(self.flags);
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

impl AccountingReply {
    pub fn decode(body: &[u8]) -> Result<AccountingReply> {
        ensure!(body.len() >= 5, "accounting reply too short");
        let server_msg_len = read_u16(body, 0, "server_msg_len")? as usize;
        let data_len = read_u16(body, 2, "data_len")? as usize;
        let status = body[4];
        ensure!(
            5 + server_msg_len + data_len == body.len(),
            "accounting reply length mismatch"
        );
        let (server_msg, cursor) = read_string(body, 5, server_msg_len, "server_msg")?;
        let (data, _) = read_string(body, cursor, data_len, "data")?;
        Ok(AccountingReply {
            status,
            server_msg,
            data,
        })
    }

    pub fn is_success(&self) -> bool {
        self.status == ACCT_STATUS_SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ACCT_STATUS_ERROR;

    #[test]
    fn stop_record_layout() {
        let body = AccountingRequest::new(ACCT_FLAG_STOP, "alice")
            .with_rem_addr("10.1.1.1")
            .add_arg("task_id", 7)
            .add_arg("cmd", "show version")
            .encode()
            .unwrap();
        assert_eq!(body[0], ACCT_FLAG_STOP);
        assert_eq!(body[5], 5);
        assert_eq!(body[7], 8);
        assert_eq!(body[8], 2);
        assert_eq!(body[9], "task_id=7".len() as u8);
        assert_eq!(body[10], "cmd=show version".len() as u8);
        assert!(body.ends_with(b"task_id=7cmd=show version"));
    }

    #[test]
    fn request_without_task_id_rejected() {
        let err = AccountingRequest::new(ACCT_FLAG_START, "alice")
            .add_arg("service", "shell")
            .encode()
            .unwrap_err();
        assert!(err.to_string().contains("task_id"));
    }

    #[test]
    fn start_and_stop_together_rejected() {
        let req = AccountingRequest::new(ACCT_FLAG_START | ACCT_FLAG_STOP, "alice")
            .add_arg("task_id", 1);
        assert!(req.encode().is_err());
    }

    #[test]
    fn reply_status_follows_lengths() {
        let mut body = Vec::new();
        body.extend_from_slice(&2u16.to_be_bytes());
        body.extend_from_slice(&0u16.to_be_bytes());
        body.push(ACCT_STATUS_SUCCESS);
        body.extend_from_slice(b"ok");
        let reply = AccountingReply::decode(&body).unwrap();
        assert!(reply.is_success());
        assert_eq!(reply.server_msg, "ok");
    }

    #[test]
    fn error_reply_is_not_success() {
        let body = vec![0, 0, 0, 0, ACCT_STATUS_ERROR];
        assert!(!AccountingReply::decode(&body).unwrap().is_success());
    }
}
