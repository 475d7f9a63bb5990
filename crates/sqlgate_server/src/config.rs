//! Process configuration from environment variables.
//!
//!   SQLGATE_DATABASE_URL         - Postgres connection string (required)
//!   SQLGATE_POLICY_FILE          - Rego policy document (required)
//!   SQLGATE_POLICY_QUERY         - allow rule (default: data.sql.allow)
//!   SQLGATE_BIND_ADDR            - listen address (default: 0.0.0.0:8080)
//!   SQLGATE_SESSION_TTL_SECS     - session lifetime (default: 7200)
//!   SQLGATE_MAX_CONNECTIONS      - pool size (default: 10)
//!   SQLGATE_STATEMENT_TIMEOUT_MS - per-statement timeout (default: 5000)
//!   SQLGATE_SWEEP_INTERVAL_SECS  - expired-session sweep period (default: 300)
//!   SQLGATE_RUN_MIGRATIONS       - apply bundled schema at startup (default: false)
//!   SQLGATE_DEFAULT_ROLE         - database role given to self-registered principals
//!                                  (default: sqlgate_reader)

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context};
use sqlgate_core::policy::DEFAULT_ALLOW_RULE;
use sqlgate_core::principal::validate_role_name;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub policy_file: PathBuf,
    pub policy_query: String,
    pub bind_addr: String,
    pub session_ttl: Duration,
    pub max_connections: u32,
    pub statement_timeout: Duration,
    pub sweep_interval: Duration,
    pub run_migrations: bool,
    pub default_role: String,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let required = |name: &str| lookup(name).ok_or_else(|| anyhow!("{name} must be set"));

        let default_role = lookup("SQLGATE_DEFAULT_ROLE").unwrap_or_else(|| "sqlgate_reader".into());
        validate_role_name(&default_role).context("SQLGATE_DEFAULT_ROLE")?;

        let session_ttl_secs = positive_or(&lookup, "SQLGATE_SESSION_TTL_SECS", 7200)?;
        let statement_timeout_ms = positive_or(&lookup, "SQLGATE_STATEMENT_TIMEOUT_MS", 5000)?;
        let sweep_interval_secs = positive_or(&lookup, "SQLGATE_SWEEP_INTERVAL_SECS", 300)?;

        Ok(Self {
            database_url: required("SQLGATE_DATABASE_URL")?,
            policy_file: required("SQLGATE_POLICY_FILE")?.into(),
            policy_query: lookup("SQLGATE_POLICY_QUERY")
                .unwrap_or_else(|| DEFAULT_ALLOW_RULE.into()),
            bind_addr: lookup("SQLGATE_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".into()),
            session_ttl: Duration::from_secs(session_ttl_secs),
            max_connections: positive_or(&lookup, "SQLGATE_MAX_CONNECTIONS", 10)?
                .try_into()
                .context("SQLGATE_MAX_CONNECTIONS is too large")?,
            statement_timeout: Duration::from_millis(statement_timeout_ms),
            sweep_interval: Duration::from_secs(sweep_interval_secs),
            run_migrations: parse_or(&lookup, "SQLGATE_RUN_MIGRATIONS", false)?,
            default_role,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{name}={raw:?} is invalid: {e}")),
        None => Ok(default),
    }
}

/// Zero would disable the setting it sizes (a timeout of 0 means none in
/// Postgres; a zero interval panics the sweeper), so it is refused.
fn positive_or(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
) -> anyhow::Result<u64> {
    let value = parse_or(lookup, name, default)?;
    if value == 0 {
        return Err(anyhow!("{name} must be positive"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("SQLGATE_DATABASE_URL", "postgresql:///sqlgate"),
        ("SQLGATE_POLICY_FILE", "/etc/sqlgate/policy.rego"),
    ];

    #[test]
    fn defaults_apply() {
        let config = ServerConfig::from_lookup(lookup(REQUIRED)).unwrap();
        assert_eq!(config.policy_query, "data.sql.allow");
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.session_ttl, Duration::from_secs(7200));
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.statement_timeout, Duration::from_millis(5000));
        assert_eq!(config.sweep_interval, Duration::from_secs(300));
        assert!(!config.run_migrations);
        assert_eq!(config.default_role, "sqlgate_reader");
    }

    #[test]
    fn overrides_are_parsed() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("SQLGATE_SESSION_TTL_SECS", "60"),
            ("SQLGATE_RUN_MIGRATIONS", "true"),
            ("SQLGATE_DEFAULT_ROLE", "analyst"),
            ("SQLGATE_POLICY_QUERY", "data.gate.allow"),
        ]);
        let config = ServerConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.session_ttl, Duration::from_secs(60));
        assert!(config.run_migrations);
        assert_eq!(config.default_role, "analyst");
        assert_eq!(config.policy_query, "data.gate.allow");
    }

    #[test]
    fn missing_required_is_an_error() {
        let err = ServerConfig::from_lookup(lookup(&REQUIRED[..1])).unwrap_err();
        assert!(err.to_string().contains("SQLGATE_POLICY_FILE"));
    }

    #[test]
    fn garbage_numbers_are_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("SQLGATE_MAX_CONNECTIONS", "lots"));
        assert!(ServerConfig::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn bad_default_role_is_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("SQLGATE_DEFAULT_ROLE", "reader; drop"));
        assert!(ServerConfig::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn zero_durations_are_rejected() {
        for name in [
            "SQLGATE_SESSION_TTL_SECS",
            "SQLGATE_STATEMENT_TIMEOUT_MS",
            "SQLGATE_SWEEP_INTERVAL_SECS",
            "SQLGATE_MAX_CONNECTIONS",
        ] {
            let mut pairs = REQUIRED.to_vec();
            pairs.push((name, "0"));
            let err = ServerConfig::from_lookup(lookup(&pairs)).unwrap_err();
            assert!(err.to_string().contains(name), "{name}: {err}");
            assert!(err.to_string().contains("must be positive"), "{name}: {err}");
        }
    }

    #[test]
    fn oversized_pool_is_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("SQLGATE_MAX_CONNECTIONS", "4294967296"));
        assert!(ServerConfig::from_lookup(lookup(&pairs)).is_err());
    }
}
