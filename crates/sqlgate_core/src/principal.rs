use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GateError;

/// Longest role name PostgreSQL accepts without truncation (NAMEDATALEN - 1).
const MAX_ROLE_LEN: usize = 63;

/// Authenticated identity making a request.
///
/// Loaded by the session service on every authenticated request and never
/// mutated afterwards. Core logic always receives it explicitly; there is no
/// ambient or thread-local identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: Uuid,
    pub display_name: String,
    pub email: String,
    /// Database role assumed for the duration of each executed statement.
    pub database_role: String,
}

/// Principal together with its stored password hash. Only the session
/// service sees this shape.
#[derive(Debug, Clone)]
pub struct PrincipalCredentials {
    pub principal: Principal,
    pub password_hash: String,
}

/// Registration input.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPrincipal {
    pub display_name: String,
    pub email: String,
    pub database_role: String,
}

impl NewPrincipal {
    /// Trim and lower-case the email, then check the fields are usable.
    pub fn normalized(self) -> Result<Self, GateError> {
        let email = normalize_email(&self.email);
        let display_name = self.display_name.trim().to_string();

        if display_name.is_empty() {
            return Err(GateError::InvalidInput("display name is required".into()));
        }
        if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
            return Err(GateError::InvalidInput("email is not valid".into()));
        }
        validate_role_name(&self.database_role)?;

        Ok(Self {
            display_name,
            email,
            database_role: self.database_role,
        })
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Role names are stored verbatim and later bound as a parameter, so this is
/// about rejecting nonsense early rather than escaping.
pub fn validate_role_name(role: &str) -> Result<(), GateError> {
    let mut chars = role.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid_start && valid_rest && role.len() <= MAX_ROLE_LEN {
        Ok(())
    } else {
        Err(GateError::InvalidInput(format!(
            "database role {role:?} is not a plain identifier"
        )))
    }
}
