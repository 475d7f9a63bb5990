//! bcrypt password hashing.
//!
//! bcrypt is CPU-bound, so every call runs on the blocking pool.

use std::sync::OnceLock;

use bcrypt::DEFAULT_COST;

use crate::error::GateError;

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// bcrypt only reads the first 72 bytes.
pub const MAX_PASSWORD_LENGTH: usize = 72;

/// Verified against when the email is unknown, so both login failure paths
/// cost one bcrypt verification.
const DUMMY_PASSWORD: &str = "sqlgate-unknown-account";

pub struct PasswordHasher {
    cost: u32,
    dummy_hash: OnceLock<String>,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(DEFAULT_COST)
    }
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self {
            cost,
            dummy_hash: OnceLock::new(),
        }
    }

    pub fn validate(&self, password: &str) -> Result<(), GateError> {
        if password.len() < MIN_PASSWORD_LENGTH {
            return Err(GateError::InvalidInput(format!(
                "password must be at least {MIN_PASSWORD_LENGTH} characters"
            )));
        }
        if password.len() > MAX_PASSWORD_LENGTH {
            return Err(GateError::InvalidInput(format!(
                "password must be at most {MAX_PASSWORD_LENGTH} bytes"
            )));
        }
        Ok(())
    }

    pub async fn hash(&self, password: &str) -> Result<String, GateError> {
        let password = password.to_string();
        let cost = self.cost;
        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| GateError::Internal(anyhow::anyhow!("hash task failed: {e}")))?
            .map_err(|e| GateError::Internal(anyhow::anyhow!("bcrypt hash failed: {e}")))
    }

    /// `Ok(false)` on mismatch. A stored hash bcrypt cannot parse is also a
    /// mismatch, logged, so a corrupt row cannot be told apart from a wrong
    /// password.
    pub async fn verify(&self, password: &str, hash: &str) -> Result<bool, GateError> {
        let password = password.to_string();
        let hash = hash.to_string();
        let outcome = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| GateError::Internal(anyhow::anyhow!("verify task failed: {e}")))?;
        match outcome {
            Ok(matched) => Ok(matched),
            Err(e) => {
                tracing::warn!("stored password hash is unusable: {e}");
                Ok(false)
            }
        }
    }

    /// Spend the same work as a real verification for an account that does
    /// not exist.
    pub async fn verify_absent(&self, password: &str) {
        let Some(dummy) = self.dummy_hash().await else {
            return;
        };
        let _ = self.verify(password, &dummy).await;
    }

    async fn dummy_hash(&self) -> Option<String> {
        if let Some(hash) = self.dummy_hash.get() {
            return Some(hash.clone());
        }
        let cost = self.cost;
        let hashed = tokio::task::spawn_blocking(move || bcrypt::hash(DUMMY_PASSWORD, cost))
            .await
            .ok()?
            .ok()?;
        Some(self.dummy_hash.get_or_init(|| hashed).clone())
    }
}
