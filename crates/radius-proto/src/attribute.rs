// SPDX-License-Identifier: AGPL-3.0-only
//! RADIUS attribute values and the type numbers this crate speaks.

use anyhow::{Result, anyhow, ensure};
use std::net::Ipv4Addr;

pub const USER_NAME: u8 = 1;
pub const USER_PASSWORD: u8 = 2;
pub const NAS_IP_ADDRESS: u8 = 4;
pub const NAS_PORT: u8 = 5;
pub const REPLY_MESSAGE: u8 = 18;
pub const STATE: u8 = 24;
pub const CLASS: u8 = 25;
pub const CALLING_STATION_ID: u8 = 31;
pub const NAS_IDENTIFIER: u8 = 32;
pub const ACCT_STATUS_TYPE: u8 = 40;
pub const ACCT_SESSION_ID: u8 = 44;
pub const ACCT_AUTHENTIC: u8 = 45;
pub const ACCT_SESSION_TIME: u8 = 46;
pub const MESSAGE_AUTHENTICATOR: u8 = 80;

/// Largest value that fits the one-octet attribute length.
pub const MAX_VALUE_LEN: usize = 253;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub typ: u8,
    pub value: Vec<u8>,
}

impl Attribute {
    pub fn new(typ: u8, value: impl Into<Vec<u8>>) -> Attribute {
        Attribute {
            typ,
            value: value.into(),
        }
    }

    pub fn text(typ: u8, value: &str) -> Attribute {
        Attribute::new(typ, value.as_bytes())
    }

    pub fn integer(typ: u8, value: u32) -> Attribute {
        Attribute::new(typ, value.to_be_bytes())
    }

    pub fn ipv4(typ: u8, addr: Ipv4Addr) -> Attribute {
        Attribute::new(typ, addr.octets())
    }

    pub fn as_text(&self) -> Result<String> {
        String::from_utf8(self.value.clone())
            .map_err(|_| anyhow!("attribute {} is not UTF-8 text", self.typ))
    }

    pub fn as_integer(&self) -> Result<u32> {
        let raw: [u8; 4] = self
            .value
            .as_slice()
            .try_into()
            .map_err(|_| anyhow!("attribute {} is not a 32-bit integer", self.typ))?;
        Ok(u32::from_be_bytes(raw))
    }

    pub(crate) fn encoded_len(&self) -> usize {
        2 + self.value.len()
    }

    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) -> Result<()> {
        ensure!(
            self.value.len() <= MAX_VALUE_LEN,
            "attribute {} value exceeds {MAX_VALUE_LEN} bytes",
            self.typ
        );
        buf.push(self.typ);
        buf.push(self.encoded_len() as u8);
        buf.extend_from_slice(&self.value);
        Ok(())
    }
}

/// Splits the attribute area of a packet.
pub fn decode_attributes(mut raw: &[u8]) -> Result<Vec<Attribute>> {
    let mut attrs = Vec::new();
    while !raw.is_empty() {
        ensure!(raw.len() >= 2, "attribute header truncated");
        let typ = raw[0];
        let len = raw[1] as usize;
        ensure!(len >= 2, "attribute {typ} length {len} invalid");
        ensure!(len <= raw.len(), "attribute {typ} truncated");
        attrs.push(Attribute::new(typ, &raw[2..len]));
        raw = &raw[len..];
    }
    Ok(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_round_trip() {
        let attr = Attribute::integer(NAS_PORT, 3);
        assert_eq!(attr.value, vec![0, 0, 0, 3]);
        assert_eq!(attr.as_integer().unwrap(), 3);
    }

    #[test]
    fn integer_of_wrong_width_rejected() {
        assert!(Attribute::new(NAS_PORT, vec![1, 2]).as_integer().is_err());
    }

    #[test]
    fn oversized_value_rejected() {
        let attr = Attribute::new(REPLY_MESSAGE, vec![b'x'; 254]);
        assert!(attr.encode_into(&mut Vec::new()).is_err());
    }

    #[test]
    fn decode_rejects_zero_length() {
        assert!(decode_attributes(&[USER_NAME, 0]).is_err());
    }

    #[test]
    fn decode_rejects_overrun() {
        assert!(decode_attributes(&[USER_NAME, 8, b'a']).is_err());
    }

    #[test]
    fn decode_splits_consecutive_attributes() {
        let attrs = decode_attributes(&[USER_NAME, 4, b'h', b'i', NAS_PORT, 6, 0, 0, 0, 1]).unwrap();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0].as_text().unwrap(), "hi");
        assert_eq!(attrs[1].as_integer().unwrap(), 1);
    }
}
