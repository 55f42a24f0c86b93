// SPDX-License-Identifier: AGPL-3.0-only
//! Local password store: Argon2id hashes verified off the async executor.

use crate::identity::RejectReason;
use crate::store::{LocalUser, UserStore};
use anyhow::{Context, Result, anyhow};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use std::sync::Arc;
use tracing::debug;

/// Prefix of stored values that can never verify.
pub const UNUSABLE_PREFIX: char = '!';

#[derive(Debug)]
pub enum LocalCheck {
    Verified(LocalUser),
    Rejected(RejectReason),
}

pub struct CredentialStore {
    users: Arc<dyn UserStore>,
    hasher: Argon2<'static>,
    /// Hash verified when the principal is unknown so both paths cost the same.
    dummy_hash: String,
}

impl CredentialStore {
    pub fn new(users: Arc<dyn UserStore>) -> Result<CredentialStore> {
        CredentialStore::with_params(users, Params::default())
    }

    pub fn with_params(users: Arc<dyn UserStore>, params: Params) -> Result<CredentialStore> {
        let hasher = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let dummy_hash = hash_with(&hasher, &random_hex(24)?)?;
        Ok(CredentialStore {
            users,
            hasher,
            dummy_hash,
        })
    }

    /// `true` only for an existing, active principal whose secret matches.
    pub async fn verify(&self, principal: &str, secret: &str) -> Result<bool> {
        Ok(matches!(self.check(principal, secret).await?, LocalCheck::Verified(_)))
    }

    /// Like [`verify`](Self::verify) but keeps the record and the internal
    /// rejection reason.
    pub async fn check(&self, principal: &str, secret: &str) -> Result<LocalCheck> {
        let user = self.users.find_by_username(principal).await?;
        let stored = user
            .as_ref()
            .map(|u| u.password_hash.clone())
            .unwrap_or_else(|| self.dummy_hash.clone());
        let matched = self.verify_hash(stored, secret).await;

        let outcome = match user {
            None => LocalCheck::Rejected(RejectReason::UnknownPrincipal),
            Some(u) if !u.is_active => LocalCheck::Rejected(RejectReason::Inactive),
            Some(_) if !matched => LocalCheck::Rejected(RejectReason::BadSecret),
            Some(u) => LocalCheck::Verified(u),
        };
        if let LocalCheck::Rejected(reason) = &outcome {
            debug!(principal, reason = reason.as_str(), "local credential rejected");
        }
        Ok(outcome)
    }

    /// Write-path hashing for the user-record collaborator.
    pub fn hash_secret(&self, secret: &str) -> Result<String> {
        hash_with(&self.hasher, secret)
    }

    /// Random value that never verifies, for directory shadow accounts.
    pub fn unusable_secret() -> Result<String> {
        Ok(format!("{UNUSABLE_PREFIX}{}", random_hex(16)?))
    }

    async fn verify_hash(&self, stored: String, secret: &str) -> bool {
        let hasher = self.hasher.clone();
        let dummy = self.dummy_hash.clone();
        let secret = secret.to_owned();
        tokio::task::spawn_blocking(move || {
            match PasswordHash::new(&stored) {
                Ok(parsed) => hasher.verify_password(secret.as_bytes(), &parsed).is_ok(),
                Err(_) => {
                    // Unusable or corrupt hash: still spend the verification time.
                    if let Ok(parsed) = PasswordHash::new(&dummy) {
                        let _ = hasher.verify_password(secret.as_bytes(), &parsed);
                    }
                    false
                }
            }
        })
        .await
        .unwrap_or(false)
    }
}

fn hash_with(hasher: &Argon2<'_>, secret: &str) -> Result<String> {
    let mut salt = [0u8; 16];
    openssl::rand::rand_bytes(&mut salt).context("generating password salt")?;
    let salt = SaltString::encode_b64(&salt).map_err(|e| anyhow!("encoding salt: {e}"))?;
    let hash = hasher
        .hash_password(secret.as_bytes(), &salt)
        .map_err(|e| anyhow!("hashing secret: {e}"))?;
    Ok(hash.to_string())
}

fn random_hex(len: usize) -> Result<String> {
    let mut raw = vec![0u8; len];
    openssl::rand::rand_bytes(&mut raw).context("generating random bytes")?;
    Ok(hex::encode(raw))
}
