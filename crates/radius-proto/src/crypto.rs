// SPDX-License-Identifier: AGPL-3.0-only
//! Shared-secret operations: User-Password hiding, authenticators and
//! HMAC-MD5 Message-Authenticator.

use crate::AUTHENTICATOR_LEN;
use anyhow::{Context, Result, anyhow, ensure};
use openssl::hash::{MessageDigest, hash};
use openssl::pkey::PKey;
use openssl::sign::Signer;

pub const MAX_PASSWORD_LEN: usize = 128;

pub fn random_authenticator() -> Result<[u8; AUTHENTICATOR_LEN]> {
    let mut auth = [0u8; AUTHENTICATOR_LEN];
    openssl::rand::rand_bytes(&mut auth).context("generating request authenticator")?;
    Ok(auth)
}

pub fn random_identifier() -> Result<u8> {
    let mut id = [0u8; 1];
    openssl::rand::rand_bytes(&mut id).context("generating packet identifier")?;
    Ok(id[0])
}

fn md5(parts: &[&[u8]]) -> Result<[u8; 16]> {
    let joined = parts.concat();
    let digest = hash(MessageDigest::md5(), &joined)?;
    digest
        .as_ref()
        .try_into()
        .map_err(|_| anyhow!("unexpected MD5 length"))
}

/// Hides a User-Password value (RFC 2865 section 5.2).
pub fn hide_password(
    password: &[u8],
    secret: &[u8],
    authenticator: &[u8; AUTHENTICATOR_LEN],
) -> Result<Vec<u8>> {
    ensure!(
        password.len() <= MAX_PASSWORD_LEN,
        "password exceeds {MAX_PASSWORD_LEN} bytes"
    );
    let padded_len = password.len().div_ceil(16).max(1) * 16;
    let mut out = password.to_vec();
    out.resize(padded_len, 0);

    let mut prev: [u8; 16] = *authenticator;
    for chunk in out.chunks_mut(16) {
        let pad = md5(&[secret, &prev])?;
        for (b, p) in chunk.iter_mut().zip(pad.iter()) {
            *b ^= *p;
        }
        prev.copy_from_slice(chunk);
    }
    Ok(out)
}

/// Reverses [`hide_password`], dropping the trailing NUL padding.
pub fn unhide_password(
    hidden: &[u8],
    secret: &[u8],
    authenticator: &[u8; AUTHENTICATOR_LEN],
) -> Result<Vec<u8>> {
    ensure!(
        !hidden.is_empty() && hidden.len().is_multiple_of(16),
        "hidden password length {} invalid",
        hidden.len()
    );
    let mut out = Vec::with_capacity(hidden.len());
    let mut prev: &[u8] = authenticator;
    for chunk in hidden.chunks(16) {
        let pad = md5(&[secret, prev])?;
        out.extend(chunk.iter().zip(pad.iter()).map(|(c, p)| c ^ p));
        prev = chunk;
    }
    while out.last() == Some(&0) {
        out.pop();
    }
    Ok(out)
}

/// MD5(packet || secret), where `packet` already carries the authenticator
/// field the digest is computed over (request authenticator for responses,
/// zeros for accounting requests).
pub fn packet_digest(packet: &[u8], secret: &[u8]) -> Result<[u8; AUTHENTICATOR_LEN]> {
    md5(&[packet, secret])
}

pub fn message_authenticator(packet: &[u8], secret: &[u8]) -> Result<[u8; AUTHENTICATOR_LEN]> {
    let key = PKey::hmac(secret)?;
    let mut signer = Signer::new(MessageDigest::md5(), &key)?;
    signer.update(packet)?;
    let mac = signer.sign_to_vec()?;
    mac.as_slice()
        .try_into()
        .map_err(|_| anyhow!("unexpected HMAC-MD5 length"))
}

pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && openssl::memcmp::eq(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 2865 section 7.1 example.
    const RFC_SECRET: &[u8] = b"xyzzy5461";
    const RFC_AUTHENTICATOR: [u8; 16] = [
        0x0f, 0x40, 0x3f, 0x94, 0x73, 0x97, 0x80, 0x57, 0xbd, 0x83, 0xd5, 0xcb, 0x98, 0xf4, 0x22,
        0x7a,
    ];
    const RFC_HIDDEN: [u8; 16] = [
        0x0d, 0xbe, 0x70, 0x8d, 0x93, 0xd4, 0x13, 0xce, 0x31, 0x96, 0xe4, 0x3f, 0x78, 0x2a, 0x0a,
        0xee,
    ];

    #[test]
    fn hides_password_like_rfc_example() {
        let hidden = hide_password(b"arctangent", RFC_SECRET, &RFC_AUTHENTICATOR).unwrap();
        assert_eq!(hidden, RFC_HIDDEN);
    }

    #[test]
    fn unhides_rfc_example() {
        let plain = unhide_password(&RFC_HIDDEN, RFC_SECRET, &RFC_AUTHENTICATOR).unwrap();
        assert_eq!(plain, b"arctangent");
    }

    #[test]
    fn long_password_chains_blocks() {
        let password = b"a-password-longer-than-one-block";
        let hidden = hide_password(password, RFC_SECRET, &RFC_AUTHENTICATOR).unwrap();
        assert_eq!(hidden.len(), 32);
        let plain = unhide_password(&hidden, RFC_SECRET, &RFC_AUTHENTICATOR).unwrap();
        assert_eq!(plain, password);
    }

    #[test]
    fn empty_password_still_fills_one_block() {
        let hidden = hide_password(b"", RFC_SECRET, &RFC_AUTHENTICATOR).unwrap();
        assert_eq!(hidden.len(), 16);
    }

    #[test]
    fn oversized_password_rejected() {
        assert!(hide_password(&[b'x'; 129], RFC_SECRET, &RFC_AUTHENTICATOR).is_err());
    }

    #[test]
    fn message_authenticator_depends_on_secret() {
        let a = message_authenticator(b"packet", b"one").unwrap();
        let b = message_authenticator(b"packet", b"two").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn constant_time_eq_handles_length_mismatch() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
