// SPDX-License-Identifier: AGPL-3.0-only
//! TACACS+ authentication START encoding and REPLY decoding.

use crate::util::{read_bytes, read_string, read_u16, short_len};
use crate::{
    AUTHEN_STATUS_ERROR, AUTHEN_STATUS_FAIL, AUTHEN_STATUS_FOLLOW, AUTHEN_STATUS_GETDATA,
    AUTHEN_STATUS_GETPASS, AUTHEN_STATUS_GETUSER, AUTHEN_STATUS_PASS, AUTHEN_STATUS_RESTART,
    AUTHEN_TYPE_PAP,
};
use anyhow::{Result, ensure};
use bytes::{BufMut, BytesMut};

pub const AUTHEN_ACTION_LOGIN: u8 = 0x01;
pub const AUTHEN_SERVICE_LOGIN: u8 = 0x01;

#[derive(Debug, Clone)]
pub struct AuthenStart {
    pub action: u8,
    pub priv_lvl: u8,
    pub authen_type: u8,
    pub service: u8,
    pub user: String,
    pub port: String,
    pub rem_addr: String,
    pub data: Vec<u8>,
}

impl AuthenStart {
    /// PAP login: the password travels in the data field of the START packet.
    pub fn pap(user: impl Into<String>, password: impl AsRef<[u8]>) -> AuthenStart {
        AuthenStart {
            action: AUTHEN_ACTION_LOGIN,
            priv_lvl: 1,
            authen_type: AUTHEN_TYPE_PAP,
            service: AUTHEN_SERVICE_LOGIN,
            user: user.into(),
            port: String::new(),
            rem_addr: String::new(),
            data: password.as_ref().to_vec(),
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

    pub fn with_priv_lvl(mut self, priv_lvl: u8) -> Self {
        self.priv_lvl = priv_lvl;
        self
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        ensure!(self.priv_lvl <= 0x0f, "authentication priv_lvl invalid");
        let user = self.user.as_bytes();
        let port = self.port.as_bytes();
        let rem_addr = self.rem_addr.as_bytes();

        let mut buf = BytesMut::with_capacity(8 + user.len() + port.len() + rem_addr.len() + self.data.len());
        buf.put_u8(self.action);
        buf.put_u8(self.priv_lvl);
        buf.put_u8(self.authen_type);
        buf.put_u8(self.service);
        buf.put_u8(short_len(user, "user")?);
        buf.put_u8(short_len(port, "port")?);
        buf.put_u8(short_len(rem_addr, "rem_addr")?);
        buf.put_u8(short_len(&self.data, "data")?);
        buf.extend_from_slice(user);
        buf.extend_from_slice(port);
        buf.extend_from_slice(rem_addr);
        buf.extend_from_slice(&self.data);
        Ok(buf.to_vec())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenStatus {
    Pass,
    Fail,
    GetData,
    GetUser,
    GetPass,
    Restart,
    Error,
    Follow,
    Unknown(u8),
}

impl From<u8> for AuthenStatus {
    fn from(raw: u8) -> Self {
        match raw {
            AUTHEN_STATUS_PASS => AuthenStatus::Pass,
            AUTHEN_STATUS_FAIL => AuthenStatus::Fail,
            AUTHEN_STATUS_GETDATA => AuthenStatus::GetData,
            AUTHEN_STATUS_GETUSER => AuthenStatus::GetUser,
            AUTHEN_STATUS_GETPASS => AuthenStatus::GetPass,
            AUTHEN_STATUS_RESTART => AuthenStatus::Restart,
            AUTHEN_STATUS_ERROR => AuthenStatus::Error,
            AUTHEN_STATUS_FOLLOW => AuthenStatus::Follow,
            other => AuthenStatus::Unknown(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthenReply {
    pub status: u8,
    pub flags: u8,
    pub server_msg: String,
    pub data: Vec<u8>,
}

impl AuthenReply {
    pub fn decode(body: &[u8]) -> Result<AuthenReply> {
        ensure!(body.len() >= 6, "authentication reply too short");
        let status = body[0];
        let flags = body[1];
        let server_msg_len = read_u16(body, 2, "server_msg_len")? as usize;
        let data_len = read_u16(body, 4, "data_len")? as usize;
        ensure!(
            6 + server_msg_len + data_len == body.len(),
            "authentication reply length mismatch"
        );
        let (server_msg, cursor) = read_string(body, 6, server_msg_len, "server_msg")?;
        let (data, _) = read_bytes(body, cursor, data_len, "data")?;
        Ok(AuthenReply {
            status,
            flags,
            server_msg,
            data,
        })
    }

    pub fn status(&self) -> AuthenStatus {
        AuthenStatus::from(self.status)
    }
}
