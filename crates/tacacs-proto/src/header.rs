// SPDX-License-Identifier: AGPL-3.0-only
//! TACACS+ packet header handling for the client half of a session.

use anyhow::{Context, Result, ensure};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::FLAG_UNENCRYPTED;

pub const HEADER_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub packet_type: u8,
    pub seq_no: u8,
    pub flags: u8,
    pub session_id: u32,
    pub length: u32,
}

impl Header {
    /// Header for the opening packet of a client session (seq 1, obfuscated).
    pub fn request(packet_type: u8, version: u8, session_id: u32) -> Header {
        Header {
            version,
            packet_type,
            seq_no: 1,
            flags: 0,
            session_id,
            length: 0,
        }
    }

    pub fn with_length(&self, length: u32) -> Header {
        Header {
            length,
            ..self.clone()
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = self.version;
        buf[1] = self.packet_type;
        buf[2] = self.seq_no;
        buf[3] = self.flags;
        buf[4..8].copy_from_slice(&self.session_id.to_be_bytes());
        buf[8..12].copy_from_slice(&self.length.to_be_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; HEADER_LEN]) -> Header {
        Header {
            version: buf[0],
            packet_type: buf[1],
            seq_no: buf[2],
            flags: buf[3],
            session_id: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            length: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        }
    }
}

pub async fn read_header<R>(reader: &mut R) -> Result<Header>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; HEADER_LEN];
    reader
        .read_exact(&mut buf)
        .await
        .with_context(|| "reading TACACS+ header")?;
    Ok(Header::from_bytes(&buf))
}

pub async fn write_header<W>(writer: &mut W, header: &Header) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(&header.to_bytes())
        .await
        .with_context(|| "writing TACACS+ header")
}

/// Checks a server reply header against the request it answers.
pub fn validate_reply_header(request: &Header, reply: &Header, max_body_len: u32) -> Result<()> {
    ensure!(
        reply.packet_type == request.packet_type,
        "unexpected TACACS+ type {}, expected {}",
        reply.packet_type,
        request.packet_type
    );
    ensure!(
        reply.version >> 4 == request.version >> 4,
        "unsupported TACACS+ major version {:x}",
        reply.version >> 4
    );
    ensure!(
        reply.session_id == request.session_id,
        "TACACS+ reply for session {:08x}, expected {:08x}",
        reply.session_id,
        request.session_id
    );
    ensure!(
        reply.seq_no.is_multiple_of(2),
        "server TACACS+ packets must use even seq numbers"
    );
    ensure!(
        reply.seq_no == request.seq_no.wrapping_add(1),
        "TACACS+ reply seq {} does not follow request seq {}",
        reply.seq_no,
        request.seq_no
    );
    ensure!(
        reply.flags & FLAG_UNENCRYPTED == 0,
        "unencrypted TACACS+ reply refused"
    );
    ensure!(
        reply.length <= max_body_len,
        "TACACS+ reply body of {} bytes exceeds limit {}",
        reply.length,
        max_body_len
    );
    Ok(())
}
