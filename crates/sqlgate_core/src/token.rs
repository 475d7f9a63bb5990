//! Bearer token codec and the random source that feeds it.
//!
//! A token is `selector:secret`. The selector is a public lookup key for the
//! session row; the secret is never stored, only its SHA-256 digest. Both
//! halves are fixed-length ASCII alphanumerics, so the separator can never
//! appear inside either part.

use std::fmt;

use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::GateError;

pub const SELECTOR_LEN: usize = 16;
pub const SECRET_LEN: usize = 32;
const SEPARATOR: char = ':';

// ── Secret source ─────────────────────────────────────────────

/// Random source for selectors and secrets. Injected so the session service
/// has no process-global generator to contend on.
pub trait SecretSource: Send + Sync {
    /// `len` characters drawn uniformly from `[A-Za-z0-9]`.
    fn alphanumeric(&self, len: usize) -> String;
}

/// Operating-system CSPRNG. Stateless; every call reads fresh entropy.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSecretSource;

impl SecretSource for OsSecretSource {
    fn alphanumeric(&self, len: usize) -> String {
        OsRng
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }
}

// ── BearerToken ───────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken {
    selector: String,
    secret: String,
}

impl BearerToken {
    /// Draw a fresh selector and secret.
    pub fn generate(source: &dyn SecretSource) -> Self {
        Self {
            selector: source.alphanumeric(SELECTOR_LEN),
            secret: source.alphanumeric(SECRET_LEN),
        }
    }

    pub fn from_parts(selector: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            secret: secret.into(),
        }
    }

    /// Wire form handed to the client exactly once, at login.
    pub fn encode(&self) -> String {
        format!("{}{SEPARATOR}{}", self.selector, self.secret)
    }

    pub fn decode(raw: &str) -> Result<Self, GateError> {
        let (selector, secret) = raw.split_once(SEPARATOR).ok_or(GateError::MalformedToken)?;
        if !is_component(selector, SELECTOR_LEN) || !is_component(secret, SECRET_LEN) {
            return Err(GateError::MalformedToken);
        }
        Ok(Self::from_parts(selector, secret))
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// Hex SHA-256 of the secret half. This is what gets persisted.
    pub fn validator_hash(&self) -> String {
        hex::encode(Sha256::digest(self.secret.as_bytes()))
    }

    /// Constant-time comparison of the presented secret against a stored hash.
    /// The selector is only an index, so this comparison is the whole proof.
    pub fn matches_hash(&self, stored_hex: &str) -> bool {
        let presented = Sha256::digest(self.secret.as_bytes());
        match hex::decode(stored_hex) {
            Ok(stored) => presented.as_slice().ct_eq(stored.as_slice()).into(),
            Err(_) => false,
        }
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("selector", &self.selector)
            .field("secret", &"<redacted>")
            .finish()
    }
}

fn is_component(part: &str, len: usize) -> bool {
    part.len() == len && part.bytes().all(|b| b.is_ascii_alphanumeric())
}
