//! Session protocol: login, validation, logout.
//!
//! Sessions are split tokens. The selector finds the row; the secret is
//! checked against the stored digest in constant time. Every way a token can
//! be wrong (bad shape, unknown selector, wrong secret, expired) produces the
//! same `SessionInvalid`.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::GateError;
use crate::password::PasswordHasher;
use crate::ports::{PrincipalStore, SessionRecord, SessionRepository};
use crate::principal::{normalize_email, NewPrincipal, Principal};
use crate::token::{BearerToken, OsSecretSource, SecretSource};

/// Selector collisions are astronomically rare; this bounds the retry loop.
const MAX_INSERT_ATTEMPTS: usize = 3;

/// Returned once, at login. The token is not recoverable afterwards.
#[derive(Clone)]
pub struct IssuedSession {
    pub token: String,
    pub principal: Principal,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for IssuedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedSession")
            .field("token", &"<redacted>")
            .field("principal", &self.principal.id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

pub struct SessionService {
    principals: Arc<dyn PrincipalStore>,
    sessions: Arc<dyn SessionRepository>,
    secrets: Arc<dyn SecretSource>,
    clock: Arc<dyn Clock>,
    hasher: Arc<PasswordHasher>,
}

impl SessionService {
    pub fn new(principals: Arc<dyn PrincipalStore>, sessions: Arc<dyn SessionRepository>) -> Self {
        Self {
            principals,
            sessions,
            secrets: Arc::new(OsSecretSource),
            clock: Arc::new(SystemClock),
            hasher: Arc::new(PasswordHasher::default()),
        }
    }

    pub fn with_secret_source(mut self, secrets: Arc<dyn SecretSource>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_password_hasher(mut self, hasher: PasswordHasher) -> Self {
        self.hasher = Arc::new(hasher);
        self
    }

    // ── Registration ──────────────────────────────────────────────

    pub async fn register(&self, new: NewPrincipal, password: &str) -> Result<Principal, GateError> {
        let new = new.normalized()?;
        self.hasher.validate(password)?;
        let hash = self.hasher.hash(password).await?;
        let principal = self.principals.insert_principal(&new, &hash).await?;
        tracing::info!(
            principal_id = %principal.id,
            database_role = %principal.database_role,
            "principal registered"
        );
        Ok(principal)
    }

    // ── Login ─────────────────────────────────────────────────────

    /// Unknown email and wrong password are indistinguishable: same error,
    /// and both paths pay for one bcrypt verification.
    pub async fn create(
        &self,
        email: &str,
        password: &str,
        ttl: Duration,
    ) -> Result<IssuedSession, GateError> {
        let email = normalize_email(email);
        let Some(credentials) = self.principals.find_credentials(&email).await? else {
            self.hasher.verify_absent(password).await;
            tracing::debug!("login rejected");
            return Err(GateError::AuthenticationFailed);
        };
        if !self
            .hasher
            .verify(password, &credentials.password_hash)
            .await?
        {
            tracing::debug!("login rejected");
            return Err(GateError::AuthenticationFailed);
        }

        let principal = credentials.principal;
        let now = self.clock.now();
        let expires_at = now + ttl;

        let mut attempt = 0;
        let token = loop {
            attempt += 1;
            let token = BearerToken::generate(self.secrets.as_ref());
            let record = SessionRecord {
                selector: token.selector().to_string(),
                validator_hash: token.validator_hash(),
                principal_id: principal.id,
                expires_at,
                created_at: now,
            };
            match self.sessions.insert_session(&record).await {
                Ok(()) => break token,
                Err(GateError::Conflict(_)) if attempt < MAX_INSERT_ATTEMPTS => {
                    tracing::warn!(attempt, "session selector collision, regenerating");
                }
                Err(e) => return Err(e),
            }
        };

        tracing::info!(principal_id = %principal.id, %expires_at, "session created");
        Ok(IssuedSession {
            token: token.encode(),
            principal,
            expires_at,
        })
    }

    // ── Validation ────────────────────────────────────────────────

    /// Resolve a presented bearer token to its principal.
    pub async fn validate(&self, raw: &str) -> Result<Principal, GateError> {
        let token = match BearerToken::decode(raw) {
            Ok(token) => token,
            Err(e) => {
                tracing::debug!("rejecting bearer token: {e}");
                return Err(GateError::SessionInvalid);
            }
        };

        let Some((record, principal)) = self.sessions.find_session(token.selector()).await?
        else {
            return Err(GateError::SessionInvalid);
        };

        if !token.matches_hash(&record.validator_hash) {
            tracing::warn!(principal_id = %principal.id, "bearer secret mismatch");
            return Err(GateError::SessionInvalid);
        }

        // Valid strictly before expiry.
        if self.clock.now() >= record.expires_at {
            if let Err(e) = self.sessions.delete_session(&record.selector).await {
                tracing::warn!("failed to drop expired session: {e}");
            }
            return Err(GateError::SessionInvalid);
        }

        Ok(principal)
    }

    // ── Logout ────────────────────────────────────────────────────

    /// Requires the whole token; a selector alone revokes nothing.
    pub async fn revoke(&self, raw: &str) -> Result<(), GateError> {
        let principal = self.validate(raw).await?;
        let token = BearerToken::decode(raw).map_err(|_| GateError::SessionInvalid)?;
        self.sessions.delete_session(token.selector()).await?;
        tracing::info!(principal_id = %principal.id, "session revoked");
        Ok(())
    }

    pub async fn revoke_all(&self, principal_id: Uuid) -> Result<u64, GateError> {
        let removed = self.sessions.delete_sessions_for(principal_id).await?;
        tracing::info!(%principal_id, removed, "all sessions revoked");
        Ok(removed)
    }

    /// Delete every session whose expiry has passed.
    pub async fn purge_expired(&self) -> Result<u64, GateError> {
        self.sessions.delete_expired(self.clock.now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryAuthStore, ManualClock};
    use crate::token::{SECRET_LEN, SELECTOR_LEN};
    use std::sync::Mutex;

    const PASSWORD: &str = "correct horse";

    struct Fixture {
        store: Arc<InMemoryAuthStore>,
        clock: Arc<ManualClock>,
        service: SessionService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryAuthStore::new());
        let clock = Arc::new(ManualClock::default());
        let service = SessionService::new(store.clone(), store.clone())
            .with_clock(clock.clone())
            .with_password_hasher(PasswordHasher::new(4));
        Fixture {
            store,
            clock,
            service,
        }
    }

    async fn registered(f: &Fixture, email: &str) -> Principal {
        f.service
            .register(
                NewPrincipal {
                    display_name: "Ada".into(),
                    email: email.into(),
                    database_role: "analyst".into(),
                },
                PASSWORD,
            )
            .await
            .unwrap()
    }

    /// Hands out queued strings, then falls back to the OS source.
    struct ScriptedSecrets(Mutex<Vec<String>>);

    impl SecretSource for ScriptedSecrets {
        fn alphanumeric(&self, len: usize) -> String {
            let mut queue = self.0.lock().unwrap();
            if queue.is_empty() {
                OsSecretSource.alphanumeric(len)
            } else {
                queue.remove(0)
            }
        }
    }

    // ── login ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn validate_after_create_returns_principal() {
        let f = fixture();
        let principal = registered(&f, "ada@example.com").await;

        let issued = f
            .service
            .create("ada@example.com", PASSWORD, Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(issued.principal, principal);

        let validated = f.service.validate(&issued.token).await.unwrap();
        assert_eq!(validated, principal);
    }

    #[tokio::test]
    async fn login_email_is_case_insensitive() {
        let f = fixture();
        registered(&f, "Ada@Example.com").await;
        assert!(f
            .service
            .create("  ADA@example.COM", PASSWORD, Duration::hours(1))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_look_the_same() {
        let f = fixture();
        registered(&f, "ada@example.com").await;

        let unknown = f
            .service
            .create("nobody@example.com", PASSWORD, Duration::hours(1))
            .await
            .unwrap_err();
        let wrong = f
            .service
            .create("ada@example.com", "wrong password", Duration::hours(1))
            .await
            .unwrap_err();

        assert!(matches!(unknown, GateError::AuthenticationFailed));
        assert!(matches!(wrong, GateError::AuthenticationFailed));
        assert_eq!(f.store.session_count().await, 0);
    }

    #[tokio::test]
    async fn selector_collision_is_retried() {
        let f = fixture();
        registered(&f, "ada@example.com").await;
        let selector = "s".repeat(SELECTOR_LEN);
        let script = vec![
            selector.clone(),
            "a".repeat(SECRET_LEN),
            selector.clone(),
            "b".repeat(SECRET_LEN),
        ];
        let service = SessionService::new(f.store.clone(), f.store.clone())
            .with_password_hasher(PasswordHasher::new(4))
            .with_secret_source(Arc::new(ScriptedSecrets(Mutex::new(script))));

        let first = service
            .create("ada@example.com", PASSWORD, Duration::hours(1))
            .await
            .unwrap();
        let second = service
            .create("ada@example.com", PASSWORD, Duration::hours(1))
            .await
            .unwrap();

        assert!(first.token.starts_with(&selector));
        assert!(!second.token.starts_with(&selector));
        assert_eq!(f.store.session_count().await, 2);
    }

    // ── register ──────────────────────────────────────────────────

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let f = fixture();
        registered(&f, "ada@example.com").await;
        let err = f
            .service
            .register(
                NewPrincipal {
                    display_name: "Other Ada".into(),
                    email: "ADA@example.com".into(),
                    database_role: "analyst".into(),
                },
                PASSWORD,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Conflict(_)));
    }

    #[tokio::test]
    async fn short_password_is_rejected() {
        let f = fixture();
        let err = f
            .service
            .register(
                NewPrincipal {
                    display_name: "Ada".into(),
                    email: "ada@example.com".into(),
                    database_role: "analyst".into(),
                },
                "short",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::InvalidInput(_)));
    }

    // ── validate ──────────────────────────────────────────────────

    #[tokio::test]
    async fn session_expires_at_ttl() {
        let f = fixture();
        registered(&f, "ada@example.com").await;
        let issued = f
            .service
            .create("ada@example.com", PASSWORD, Duration::minutes(30))
            .await
            .unwrap();

        f.clock.advance(Duration::minutes(29));
        assert!(f.service.validate(&issued.token).await.is_ok());

        f.clock.advance(Duration::minutes(1));
        assert!(matches!(
            f.service.validate(&issued.token).await,
            Err(GateError::SessionInvalid)
        ));
        // The expired row is gone.
        assert_eq!(f.store.session_count().await, 0);
    }

    #[tokio::test]
    async fn tampered_secret_is_invalid() {
        let f = fixture();
        registered(&f, "ada@example.com").await;
        let issued = f
            .service
            .create("ada@example.com", PASSWORD, Duration::hours(1))
            .await
            .unwrap();

        let token = BearerToken::decode(&issued.token).unwrap();
        let tampered = BearerToken::from_parts(token.selector(), "Z".repeat(SECRET_LEN));
        assert!(matches!(
            f.service.validate(&tampered.encode()).await,
            Err(GateError::SessionInvalid)
        ));
        // A wrong secret must not delete the real session.
        assert!(f.service.validate(&issued.token).await.is_ok());
    }

    #[tokio::test]
    async fn malformed_and_unknown_tokens_are_invalid() {
        let f = fixture();
        let unknown = BearerToken::generate(&OsSecretSource).encode();
        for raw in ["", "garbage", "a:b", unknown.as_str()] {
            assert!(matches!(
                f.service.validate(raw).await,
                Err(GateError::SessionInvalid)
            ));
        }
    }

    // ── revoke ────────────────────────────────────────────────────

    #[tokio::test]
    async fn revoke_ends_one_session() {
        let f = fixture();
        registered(&f, "ada@example.com").await;
        let a = f
            .service
            .create("ada@example.com", PASSWORD, Duration::hours(1))
            .await
            .unwrap();
        let b = f
            .service
            .create("ada@example.com", PASSWORD, Duration::hours(1))
            .await
            .unwrap();

        f.service.revoke(&a.token).await.unwrap();
        assert!(f.service.validate(&a.token).await.is_err());
        assert!(f.service.validate(&b.token).await.is_ok());
    }

    #[tokio::test]
    async fn revoke_with_selector_only_does_nothing() {
        let f = fixture();
        registered(&f, "ada@example.com").await;
        let issued = f
            .service
            .create("ada@example.com", PASSWORD, Duration::hours(1))
            .await
            .unwrap();
        let selector = BearerToken::decode(&issued.token).unwrap().selector().to_string();
        let forged = BearerToken::from_parts(selector, "x".repeat(SECRET_LEN)).encode();

        assert!(f.service.revoke(&forged).await.is_err());
        assert!(f.service.validate(&issued.token).await.is_ok());
    }

    #[tokio::test]
    async fn revoke_all_invalidates_every_token() {
        let f = fixture();
        let ada = registered(&f, "ada@example.com").await;
        registered(&f, "grace@example.com").await;

        let mut tokens = Vec::new();
        for _ in 0..3 {
            tokens.push(
                f.service
                    .create("ada@example.com", PASSWORD, Duration::hours(1))
                    .await
                    .unwrap()
                    .token,
            );
        }
        let grace = f
            .service
            .create("grace@example.com", PASSWORD, Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(f.service.revoke_all(ada.id).await.unwrap(), 3);
        for token in &tokens {
            assert!(f.service.validate(token).await.is_err());
        }
        assert!(f.service.validate(&grace.token).await.is_ok());
    }

    #[tokio::test]
    async fn purge_removes_only_expired_rows() {
        let f = fixture();
        registered(&f, "ada@example.com").await;
        f.service
            .create("ada@example.com", PASSWORD, Duration::minutes(5))
            .await
            .unwrap();
        let long = f
            .service
            .create("ada@example.com", PASSWORD, Duration::hours(5))
            .await
            .unwrap();

        f.clock.advance(Duration::minutes(10));
        assert_eq!(f.service.purge_expired().await.unwrap(), 1);
        assert!(f.service.validate(&long.token).await.is_ok());
    }

    #[test]
    fn issued_session_debug_redacts_token() {
        let issued = IssuedSession {
            token: "selector:supersecret".into(),
            principal: Principal {
                id: Uuid::nil(),
                display_name: "Ada".into(),
                email: "ada@example.com".into(),
                database_role: "analyst".into(),
            },
            expires_at: Utc::now(),
        };
        assert!(!format!("{issued:?}").contains("supersecret"));
    }
}
