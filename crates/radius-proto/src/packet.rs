// SPDX-License-Identifier: AGPL-3.0-only
//! RADIUS packet encode/decode and authenticator handling.

use crate::attribute::{self, Attribute, decode_attributes};
use crate::crypto;
use crate::{AUTHENTICATOR_LEN, HEADER_LEN, MAX_PACKET_LEN};
use anyhow::{Result, bail, ensure};
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    AccessRequest,
    AccessAccept,
    AccessReject,
    AccountingRequest,
    AccountingResponse,
    AccessChallenge,
    StatusServer,
}

impl Code {
    pub fn as_u8(self) -> u8 {
        match self {
            Code::AccessRequest => 1,
            Code::AccessAccept => 2,
            Code::AccessReject => 3,
            Code::AccountingRequest => 4,
            Code::AccountingResponse => 5,
            Code::AccessChallenge => 11,
            Code::StatusServer => 12,
        }
    }
}

impl TryFrom<u8> for Code {
    type Error = anyhow::Error;

    fn try_from(raw: u8) -> Result<Self> {
        Ok(match raw {
            1 => Code::AccessRequest,
            2 => Code::AccessAccept,
            3 => Code::AccessReject,
            4 => Code::AccountingRequest,
            5 => Code::AccountingResponse,
            11 => Code::AccessChallenge,
            12 => Code::StatusServer,
            other => bail!("unsupported RADIUS code {other}"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Packet {
    pub code: Code,
    pub identifier: u8,
    pub authenticator: [u8; AUTHENTICATOR_LEN],
    pub attributes: Vec<Attribute>,
}

/// Wire bytes of a request plus the authenticator its response is keyed to.
#[derive(Debug, Clone)]
pub struct EncodedRequest {
    pub bytes: Vec<u8>,
    pub identifier: u8,
    pub authenticator: [u8; AUTHENTICATOR_LEN],
}

impl Packet {
    pub fn new(code: Code, identifier: u8) -> Packet {
        Packet {
            code,
            identifier,
            authenticator: [0u8; AUTHENTICATOR_LEN],
            attributes: Vec::new(),
        }
    }

    /// Access-Request carrying User-Name and a hidden User-Password.
    pub fn access_request(identifier: u8, username: &str, password: &[u8], secret: &[u8]) -> Result<Packet> {
        let authenticator = crypto::random_authenticator()?;
        let hidden = crypto::hide_password(password, secret, &authenticator)?;
        Ok(Packet {
            code: Code::AccessRequest,
            identifier,
            authenticator,
            attributes: vec![
                Attribute::text(attribute::USER_NAME, username),
                Attribute::new(attribute::USER_PASSWORD, hidden),
            ],
        })
    }

    pub fn with_attribute(mut self, attr: Attribute) -> Packet {
        self.attributes.push(attr);
        self
    }

    pub fn attribute(&self, typ: u8) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.typ == typ)
    }

    /// Concatenated Reply-Message attributes, if any.
    pub fn reply_message(&self) -> Option<String> {
        let parts: Vec<String> = self
            .attributes
            .iter()
            .filter(|a| a.typ == attribute::REPLY_MESSAGE)
            .filter_map(|a| a.as_text().ok())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(""))
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let len = HEADER_LEN + self.attributes.iter().map(Attribute::encoded_len).sum::<usize>();
        ensure!(len <= MAX_PACKET_LEN, "RADIUS packet of {len} bytes exceeds {MAX_PACKET_LEN}");
        let mut buf = Vec::with_capacity(len);
        buf.push(self.code.as_u8());
        buf.push(self.identifier);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
        buf.extend_from_slice(&self.authenticator);
        for attr in &self.attributes {
            attr.encode_into(&mut buf)?;
        }
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> Result<Packet> {
        ensure!(buf.len() >= HEADER_LEN, "RADIUS packet too short");
        let len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        ensure!(
            (HEADER_LEN..=MAX_PACKET_LEN).contains(&len),
            "RADIUS length field {len} invalid"
        );
        ensure!(len <= buf.len(), "RADIUS packet truncated");
        // Octets past the length field are padding and ignored.
        let mut authenticator = [0u8; AUTHENTICATOR_LEN];
        authenticator.copy_from_slice(&buf[4..HEADER_LEN]);
        Ok(Packet {
            code: Code::try_from(buf[0])?,
            identifier: buf[1],
            authenticator,
            attributes: decode_attributes(&buf[HEADER_LEN..len])?,
        })
    }

    /// Signs a request for the wire. Access-Requests get a Message-Authenticator;
    /// Accounting-Requests get the MD5 request authenticator of RFC 2866.
    pub fn encode_request(&self, secret: &[u8]) -> Result<EncodedRequest> {
        match self.code {
            Code::AccessRequest | Code::StatusServer => {
                let mut packet = self.clone();
                packet.attributes.retain(|a| a.typ != attribute::MESSAGE_AUTHENTICATOR);
                packet.attributes.push(Attribute::new(
                    attribute::MESSAGE_AUTHENTICATOR,
                    [0u8; AUTHENTICATOR_LEN],
                ));
                let mut bytes = packet.encode()?;
                let mac = crypto::message_authenticator(&bytes, secret)?;
                let offset = bytes.len() - AUTHENTICATOR_LEN;
                bytes[offset..].copy_from_slice(&mac);
                Ok(EncodedRequest {
                    bytes,
                    identifier: self.identifier,
                    authenticator: self.authenticator,
                })
            }
            Code::AccountingRequest => {
                let mut packet = self.clone();
                packet.authenticator = [0u8; AUTHENTICATOR_LEN];
                let mut bytes = packet.encode()?;
                let authenticator = crypto::packet_digest(&bytes, secret)?;
                bytes[4..HEADER_LEN].copy_from_slice(&authenticator);
                Ok(EncodedRequest {
                    bytes,
                    identifier: self.identifier,
                    authenticator,
                })
            }
            other => bail!("{other:?} is not a client request"),
        }
    }

    /// Signs a response to the request that carried `request_authenticator`.
    pub fn encode_response(&self, request_authenticator: &[u8; AUTHENTICATOR_LEN], secret: &[u8]) -> Result<Vec<u8>> {
        let mut packet = self.clone();
        packet.authenticator = *request_authenticator;
        let mut bytes = packet.encode()?;
        let authenticator = crypto::packet_digest(&bytes, secret)?;
        bytes[4..HEADER_LEN].copy_from_slice(&authenticator);
        Ok(bytes)
    }

    /// Decodes a response and checks it against the request it answers.
    pub fn decode_response(buf: &[u8], request: &EncodedRequest, secret: &[u8]) -> Result<Packet> {
        let packet = Packet::decode(buf)?;
        ensure!(
            packet.identifier == request.identifier,
            "RADIUS response identifier {} does not match request {}",
            packet.identifier,
            request.identifier
        );
        let len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        let mut keyed = buf[..len].to_vec();
        keyed[4..HEADER_LEN].copy_from_slice(&request.authenticator);
        let expected = crypto::packet_digest(&keyed, secret)?;
        ensure!(
            crypto::constant_time_eq(&expected, &packet.authenticator),
            "RADIUS response authenticator mismatch"
        );

        if let Some(offset) = message_authenticator_offset(&keyed) {
            let received = keyed[offset..offset + AUTHENTICATOR_LEN].to_vec();
            keyed[offset..offset + AUTHENTICATOR_LEN].fill(0);
            let mac = crypto::message_authenticator(&keyed, secret)?;
            ensure!(
                crypto::constant_time_eq(&mac, &received),
                "RADIUS Message-Authenticator mismatch"
            );
        }
        debug!("RADIUS {:?} id {} verified", packet.code, packet.identifier);
        Ok(packet)
    }
}

fn message_authenticator_offset(packet: &[u8]) -> Option<usize> {
    let mut offset = HEADER_LEN;
    while offset + 2 <= packet.len() {
        let typ = packet[offset];
        let len = packet[offset + 1] as usize;
        if len < 2 {
            return None;
        }
        if typ == attribute::MESSAGE_AUTHENTICATOR && len == 2 + AUTHENTICATOR_LEN {
            return Some(offset + 2);
        }
        offset += len;
    }
    None
}
