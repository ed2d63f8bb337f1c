use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;

///
/// DatabaseConfig
///
/// Deserialized from TOML or built in code. Every field has a default so a
/// config file only states what it overrides.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Storage backend URL. Only the `memory://` scheme is built in.
    pub url: String,

    pub pool: PoolConfig,
}

impl DatabaseConfig {
    /// Parse a config from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(text)
            .map_err(|err| Error::config(format!("failed to parse config: {err}")))?;
        config.validate()?;

        Ok(config)
    }

    /// Reject shapes that would fail later in a less obvious place.
    pub fn validate(&self) -> Result<(), Error> {
        if self.scheme().is_none() {
            return Err(Error::config(format!(
                "url '{}' has no scheme; expected e.g. memory://",
                self.url
            )));
        }
        if self.pool.max_connections == 0 {
            return Err(Error::config("pool.max_connections must be at least 1"));
        }

        Ok(())
    }

    /// The URL scheme, when one is present.
    #[must_use]
    pub fn scheme(&self) -> Option<&str> {
        self.url.split_once("://").map(|(scheme, _)| scheme)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "memory://".to_string(),
            pool: PoolConfig::default(),
        }
    }
}

///
/// PoolConfig
///

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    pub max_connections: usize,
    pub acquire_timeout_ms: u64,
}

impl PoolConfig {
    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 8,
            acquire_timeout_ms: 5_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn empty_config_uses_defaults() {
        let config = DatabaseConfig::from_toml_str("").expect("empty config should parse");

        assert_eq!(config, DatabaseConfig::default());
        assert_eq!(config.scheme(), Some("memory"));
    }

    #[test]
    fn overrides_apply_over_defaults() {
        let config = DatabaseConfig::from_toml_str(
            r#"
                url = "memory://test"

                [pool]
                max_connections = 2
                acquire_timeout_ms = 100
            "#,
        )
        .expect("config should parse");

        assert_eq!(config.pool.max_connections, 2);
        assert_eq!(config.pool.acquire_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn schemeless_url_is_rejected() {
        let err = DatabaseConfig::from_toml_str(r#"url = "nowhere""#)
            .expect_err("schemeless url should be rejected");

        assert_eq!(err.kind, ErrorKind::Config);
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        let err = DatabaseConfig::from_toml_str("[pool]\nmax_connections = 0")
            .expect_err("zero-size pool should be rejected");

        assert_eq!(err.kind, ErrorKind::Config);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = DatabaseConfig::from_toml_str("pool_size = 3")
            .expect_err("unknown key should be rejected");

        assert_eq!(err.kind, ErrorKind::Config);
    }
}
