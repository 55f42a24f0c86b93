// SPDX-License-Identifier: Apache-2.0
//! Single-exchange client sessions: send one request, read and validate one reply.

use crate::crypto::obfuscate;
use crate::header::{Header, read_header, validate_reply_header, write_header};
use crate::{
    AccountingReply, AccountingRequest, AuthenReply, AuthenStart, AuthorizationRequest,
    AuthorizationResponse, MAX_BODY_LEN, TYPE_ACCT, TYPE_AUTHEN, TYPE_AUTHOR, VERSION,
    VERSION_MINOR_ONE,
};
use anyhow::{Context, Result};
use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Random, non-zero session identifier.
pub fn new_session_id() -> Result<u32> {
    loop {
        let mut raw = [0u8; 4];
        openssl::rand::rand_bytes(&mut raw).context("generating TACACS+ session id")?;
        let id = u32::from_be_bytes(raw);
        if id != 0 {
            return Ok(id);
        }
    }
}

/// PAP authentication. PAP requires minor version 1.
pub async fn authenticate<S>(
    stream: &mut S,
    session_id: u32,
    start: &AuthenStart,
    secret: &[u8],
) -> Result<AuthenReply>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let header = Header::request(TYPE_AUTHEN, VERSION_MINOR_ONE, session_id);
    let body = exchange(stream, header, start.encode()?, secret).await?;
    AuthenReply::decode(&body)
}

pub async fn authorize<S>(
    stream: &mut S,
    session_id: u32,
    request: &AuthorizationRequest,
    secret: &[u8],
) -> Result<AuthorizationResponse>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let header = Header::request(TYPE_AUTHOR, VERSION, session_id);
    let body = exchange(stream, header, request.encode()?, secret).await?;
    AuthorizationResponse::decode(&body)
}

pub async fn account<S>(
    stream: &mut S,
    session_id: u32,
    request: &AccountingRequest,
    secret: &[u8],
) -> Result<AccountingReply>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let header = Header::request(TYPE_ACCT, VERSION, session_id);
    let body = exchange(stream, header, request.encode()?, secret).await?;
    AccountingReply::decode(&body)
}

async fn exchange<S>(stream: &mut S, header: Header, mut body: Vec<u8>, secret: &[u8]) -> Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = header.with_length(body.len() as u32);
    obfuscate(&request, &mut body, secret)?;
    write_header(stream, &request).await?;
    stream
        .write_all(&body)
        .await
        .with_context(|| "writing TACACS+ request body")?;
    stream.flush().await.context("flushing TACACS+ request")?;

    let reply = read_header(stream).await?;
    validate_reply_header(&request, &reply, MAX_BODY_LEN)?;
    let mut reply_body = vec![0u8; reply.length as usize];
    stream
        .read_exact(&mut reply_body)
        .await
        .with_context(|| "reading TACACS+ reply body")?;
    obfuscate(&reply, &mut reply_body, secret)?;
    debug!(
        "TACACS+ session {:08x} type {} reply of {} bytes",
        reply.session_id, reply.packet_type, reply.length
    );
    Ok(reply_body)
}
