// SPDX-License-Identifier: AGPL-3.0-only
//! Shared field helpers for TACACS+ packet bodies.

use anyhow::{Context, Result, anyhow, ensure};

pub fn read_bytes(body: &[u8], offset: usize, len: usize, label: &str) -> Result<(Vec<u8>, usize)> {
    let next = offset
        .checked_add(len)
        .ok_or_else(|| anyhow!("overflow parsing {label}"))?;
    let slice = body
        .get(offset..next)
        .ok_or_else(|| anyhow!("{label} truncated"))?;
    Ok((slice.to_vec(), next))
}

pub fn read_string(body: &[u8], offset: usize, len: usize, label: &str) -> Result<(String, usize)> {
    let (raw, next) = read_bytes(body, offset, len, label)?;
    let value = String::from_utf8(raw).with_context(|| format!("decoding {label} as UTF-8"))?;
    Ok((value, next))
}

pub fn read_u16(body: &[u8], offset: usize, label: &str) -> Result<u16> {
    let raw = body
        .get(offset..offset + 2)
        .ok_or_else(|| anyhow!("{label} truncated"))?;
    Ok(u16::from_be_bytes([raw[0], raw[1]]))
}

/// Length prefix for a single-octet length field.
pub fn short_len(value: &[u8], label: &str) -> Result<u8> {
    ensure!(value.len() <= u8::MAX as usize, "{label} exceeds 255 bytes");
    Ok(value.len() as u8)
}

/// A `name=value` (mandatory) or `name*value` (optional) AV pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
    pub optional: bool,
}

impl Attribute {
    pub fn parse(raw: &str) -> Option<Attribute> {
        let idx = raw.find(['=', '*'])?;
        let (name, rest) = raw.split_at(idx);
        if name.is_empty() {
            return None;
        }
        Some(Attribute {
            name: name.to_string(),
            value: rest[1..].to_string(),
            optional: rest.starts_with('*'),
        })
    }
}

pub fn parse_attributes(args: &[String]) -> Vec<Attribute> {
    args.iter().filter_map(|a| Attribute::parse(a)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_string_reports_truncation() {
        let err = read_string(b"abc", 1, 5, "user").unwrap_err();
        assert!(err.to_string().contains("user truncated"));
    }

    #[test]
    fn read_string_advances_cursor() {
        let (value, next) = read_string(b"xxadmin", 2, 5, "user").unwrap();
        assert_eq!(value, "admin");
        assert_eq!(next, 7);
    }

    #[test]
    fn read_u16_is_big_endian() {
        assert_eq!(read_u16(&[0x00, 0x01, 0x02], 1, "len").unwrap(), 0x0102);
        assert!(read_u16(&[0x00], 0, "len").is_err());
    }

    #[test]
    fn short_len_limits_to_one_octet() {
        assert_eq!(short_len(&[0u8; 255], "arg").unwrap(), 255);
        assert!(short_len(&[0u8; 256], "arg").is_err());
    }

    #[test]
    fn attributes_parse_mandatory_and_optional() {
        let attrs = parse_attributes(&[
            "priv-lvl=15".to_string(),
            "timeout*30".to_string(),
            "garbage".to_string(),
        ]);
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0].name, "priv-lvl");
        assert_eq!(attrs[0].value, "15");
        assert!(!attrs[0].optional);
        assert!(attrs[1].optional);
    }
}
