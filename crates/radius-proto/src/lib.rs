// SPDX-License-Identifier: AGPL-3.0-only
//! RADIUS packet codec (RFC 2865/2866) for the client side of an exchange:
//! attribute encoding, User-Password hiding, request/response authenticators
//! and Message-Authenticator (RFC 3579).

pub mod attribute;
pub mod crypto;
pub mod packet;

pub use attribute::Attribute;
pub use packet::{Code, EncodedRequest, Packet};

pub const HEADER_LEN: usize = 20;
pub const MAX_PACKET_LEN: usize = 4096;
pub const AUTHENTICATOR_LEN: usize = 16;

pub const ACCT_STATUS_START: u32 = 1;
pub const ACCT_STATUS_STOP: u32 = 2;
pub const ACCT_AUTHENTIC_RADIUS: u32 = 1;
