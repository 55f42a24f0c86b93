// SPDX-License-Identifier: AGPL-3.0-only
//! Opaque bearer tokens minted at login and verified by the API and relay.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use warden_relay::{TokenClaims, TokenVerifier};

const TOKEN_BYTES: usize = 32;

struct Issued {
    claims: TokenClaims,
    expires: Instant,
}

pub struct SessionTokens {
    ttl: Duration,
    tokens: RwLock<HashMap<String, Issued>>,
}

impl SessionTokens {
    pub fn new(ttl: Duration) -> SessionTokens {
        SessionTokens {
            ttl,
            tokens: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, claims: TokenClaims) -> Result<String> {
        let mut raw = [0u8; TOKEN_BYTES];
        openssl::rand::rand_bytes(&mut raw).context("generating session token")?;
        let token = hex::encode(raw);
        let now = Instant::now();
        let mut tokens = self.tokens.write();
        tokens.retain(|_, issued| issued.expires > now);
        tokens.insert(
            token.clone(),
            Issued {
                claims,
                expires: now + self.ttl,
            },
        );
        Ok(token)
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.tokens.write().remove(token).is_some()
    }

    pub fn claims(&self, token: &str) -> Option<TokenClaims> {
        let tokens = self.tokens.read();
        let issued = tokens.get(token)?;
        (issued.expires > Instant::now()).then(|| issued.claims.clone())
    }

    pub fn len(&self) -> usize {
        self.tokens.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.read().is_empty()
    }
}

#[async_trait]
impl TokenVerifier for SessionTokens {
    async fn verify(&self, token: &str) -> Option<TokenClaims> {
        self.claims(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_auth::BackendKind;

    fn claims() -> TokenClaims {
        TokenClaims {
            user_id: 1,
            username: "admin".into(),
            origin: BackendKind::Local,
        }
    }

    #[tokio::test]
    async fn issued_token_verifies_until_revoked() {
        let tokens = SessionTokens::new(Duration::from_secs(60));
        let token = tokens.issue(claims()).unwrap();
        assert_eq!(token.len(), 64);
        assert_eq!(tokens.verify(&token).await, Some(claims()));
        assert!(tokens.revoke(&token));
        assert!(tokens.verify(&token).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_expire() {
        let tokens = SessionTokens::new(Duration::from_secs(60));
        let token = tokens.issue(claims()).unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(tokens.verify(&token).await.is_none());

        tokens.issue(claims()).unwrap();
        assert_eq!(tokens.len(), 1);
    }

    #[test]
    fn tokens_are_unique() {
        let tokens = SessionTokens::new(Duration::from_secs(60));
        let a = tokens.issue(claims()).unwrap();
        let b = tokens.issue(claims()).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), TOKEN_BYTES * 2);
        assert_eq!(hex::decode(&a).unwrap().len(), TOKEN_BYTES);
    }
}
