// SPDX-License-Identifier: AGPL-3.0-only
//! TACACS+ shared-secret body obfuscation (MD5 pad).

use crate::MIN_SECRET_LEN;
use crate::header::Header;
use anyhow::{Result, anyhow, bail};
use openssl::hash::{MessageDigest, hash};

/// XORs `body` with the pseudo pad derived from the header and secret.
/// The operation is its own inverse.
pub fn obfuscate(header: &Header, body: &mut [u8], secret: &[u8]) -> Result<()> {
    if secret.len() < MIN_SECRET_LEN {
        bail!("shared secret too short; minimum {MIN_SECRET_LEN} bytes required");
    }
    let pad = pseudo_pad(header, secret, body.len())?;
    for (b, p) in body.iter_mut().zip(pad.iter()) {
        *b ^= *p;
    }
    Ok(())
}

fn pseudo_pad(header: &Header, secret: &[u8], len: usize) -> Result<Vec<u8>> {
    let mut pad: Vec<u8> = Vec::with_capacity(len + 16);
    let mut prev: Option<[u8; 16]> = None;

    while pad.len() < len {
        let mut seed: Vec<u8> = Vec::with_capacity(4 + secret.len() + 2 + 16);
        seed.extend_from_slice(&header.session_id.to_be_bytes());
        seed.extend_from_slice(secret);
        seed.push(header.version);
        seed.push(header.seq_no);
        if let Some(prev_pad) = prev {
            seed.extend_from_slice(&prev_pad);
        }
        let digest = hash(MessageDigest::md5(), &seed)?;
        let digest: [u8; 16] = digest
            .as_ref()
            .try_into()
            .map_err(|_| anyhow!("unexpected MD5 length"))?;
        pad.extend_from_slice(&digest);
        prev = Some(digest);
    }
    pad.truncate(len);
    Ok(pad)
}
