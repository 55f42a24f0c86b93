// SPDX-License-Identifier: AGPL-3.0-only
//! TACACS+ protocol helpers for the client side of a session: headers,
//! authentication/authorization/accounting bodies, and shared-secret body crypto.

pub mod accounting;
pub mod authen;
pub mod author;
pub mod client;
pub mod crypto;
pub mod header;
mod util;

pub use accounting::{AccountingReply, AccountingRequest};
pub use authen::{AuthenReply, AuthenStart, AuthenStatus};
pub use author::{AuthorizationRequest, AuthorizationResponse};
pub use header::Header;
pub use util::Attribute;

pub const VERSION: u8 = 0xc << 4; // Major version 0xC, minor 0
pub const VERSION_MINOR_ONE: u8 = VERSION | 0x01;

pub const TYPE_AUTHEN: u8 = 0x01;
pub const TYPE_AUTHOR: u8 = 0x02;
pub const TYPE_ACCT: u8 = 0x03;

pub const FLAG_UNENCRYPTED: u8 = 0x01;
pub const MIN_SECRET_LEN: usize = 8;
pub const MAX_BODY_LEN: u32 = 64 * 1024;

pub const AUTHEN_STATUS_PASS: u8 = 0x01;
pub const AUTHEN_STATUS_FAIL: u8 = 0x02;
pub const AUTHEN_STATUS_GETDATA: u8 = 0x03;
pub const AUTHEN_STATUS_GETUSER: u8 = 0x04;
pub const AUTHEN_STATUS_GETPASS: u8 = 0x05;
pub const AUTHEN_STATUS_RESTART: u8 = 0x06;
pub const AUTHEN_STATUS_ERROR: u8 = 0x07;
pub const AUTHEN_STATUS_FOLLOW: u8 = 0x21;

pub const AUTHEN_TYPE_PAP: u8 = 0x02;

pub const AUTHOR_STATUS_PASS_ADD: u8 = 0x01;
pub const AUTHOR_STATUS_PASS_REPL: u8 = 0x02;
pub const AUTHOR_STATUS_FAIL: u8 = 0x10;
pub const AUTHOR_STATUS_ERROR: u8 = 0x11;

pub const ACCT_STATUS_SUCCESS: u8 = 0x01;
pub const ACCT_STATUS_ERROR: u8 = 0x02;
pub const ACCT_FLAG_START: u8 = 0x02;
pub const ACCT_FLAG_STOP: u8 = 0x04;
pub const ACCT_FLAG_WATCHDOG: u8 = 0x08;
