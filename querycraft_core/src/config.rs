use crate::{Error, Result};
use std::time::Duration;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_TRINO_USER: &str = "trino_user";
const DEV_JWT_SECRET: &str = "querycraft-dev-secret";

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub key_prefix: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl: Duration,
}

/// Settings applied when talking to user-registered data sources.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Value sent as `X-Trino-User` when the connection does not override it.
    pub trino_user: String,
    pub http_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SchemaCacheConfig {
    /// `None` stores entries without expiry; they live until overwritten or invalidated.
    pub ttl: Option<Duration>,
}

/// Process configuration. Postgres and Redis are optional: without them the
/// server runs against in-memory backends (local dev and tests).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub postgres: Option<PostgresConfig>,
    pub redis: Option<RedisConfig>,
    pub llm: LlmConfig,
    pub auth: AuthConfig,
    pub sources: SourceConfig,
    pub schema_cache: SchemaCacheConfig,
}

/// Reads settings by name. Blank values count as unset; values that are
/// present but unparseable are errors rather than silently defaulted.
struct Settings<F> {
    lookup: F,
}

impl<F> Settings<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn opt(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.opt(name)
            .map(|raw| {
                raw.parse::<T>()
                    .map_err(|e| Error::InvalidInput(format!("{name}={raw:?} is invalid: {e}")))
            })
            .transpose()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build and validate the configuration from an arbitrary variable source.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Settings { lookup };

        let postgres = match env.opt("DATABASE_URL") {
            Some(url) => Some(PostgresConfig {
                url,
                max_connections: env.parse("QUERYCRAFT_DB_MAX_CONNECTIONS")?.unwrap_or(10),
                acquire_timeout: Duration::from_millis(
                    env.parse("QUERYCRAFT_DB_ACQUIRE_TIMEOUT_MS")?.unwrap_or(5_000),
                ),
            }),
            None => None,
        };

        let redis = env.opt("REDIS_URL").map(|url| RedisConfig {
            url,
            key_prefix: env.opt("QUERYCRAFT_REDIS_KEY_PREFIX"),
        });

        let http_timeout =
            Duration::from_millis(env.parse("QUERYCRAFT_HTTP_TIMEOUT_MS")?.unwrap_or(30_000));

        let llm = LlmConfig {
            api_base: env
                .opt("GEMINI_API_BASE")
                .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string()),
            api_key: env.opt("GEMINI_API_KEY").unwrap_or_default(),
            model: env
                .opt("GEMINI_MODEL")
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            timeout: http_timeout,
        };

        // Tokens signed with the built-in secret are forgeable, so it is only
        // accepted for the in-memory store.
        let jwt_secret = match (env.opt("JWT_SECRET"), &postgres) {
            (Some(s), _) => s,
            (None, Some(_)) => {
                return Err(Error::InvalidInput(
                    "JWT_SECRET is required when DATABASE_URL is set".to_string(),
                ));
            }
            (None, None) => {
                tracing::warn!("JWT_SECRET not set; using the dev signing secret");
                DEV_JWT_SECRET.to_string()
            }
        };
        let ttl_days: u64 = env.parse("QUERYCRAFT_TOKEN_TTL_DAYS")?.unwrap_or(30);
        let ttl_secs = ttl_days.checked_mul(24 * 60 * 60).ok_or_else(|| {
            Error::InvalidInput(format!("QUERYCRAFT_TOKEN_TTL_DAYS={ttl_days} is too large"))
        })?;
        let auth = AuthConfig {
            jwt_secret,
            token_ttl: Duration::from_secs(ttl_secs),
        };

        let sources = SourceConfig {
            trino_user: env
                .opt("QUERYCRAFT_TRINO_USER")
                .unwrap_or_else(|| DEFAULT_TRINO_USER.to_string()),
            http_timeout,
        };

        let schema_cache = SchemaCacheConfig {
            ttl: env
                .parse::<u64>("QUERYCRAFT_SCHEMA_CACHE_TTL_SECS")?
                .filter(|s| *s > 0)
                .map(Duration::from_secs),
        };

        let cfg = Self {
            postgres,
            redis,
            llm,
            auth,
            sources,
            schema_cache,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// In-memory configuration with fixed secrets, for tests and embedded use.
    pub fn for_tests() -> Self {
        Self {
            postgres: None,
            redis: None,
            llm: LlmConfig {
                api_base: DEFAULT_GEMINI_API_BASE.to_string(),
                api_key: String::new(),
                model: DEFAULT_GEMINI_MODEL.to_string(),
                timeout: Duration::from_secs(5),
            },
            auth: AuthConfig {
                jwt_secret: "test-secret".to_string(),
                token_ttl: Duration::from_secs(60 * 60),
            },
            sources: SourceConfig {
                trino_user: DEFAULT_TRINO_USER.to_string(),
                http_timeout: Duration::from_secs(5),
            },
            schema_cache: SchemaCacheConfig { ttl: None },
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn validate(&self) -> Result<()> {
        if let Some(pg) = &self.postgres {
            if pg.max_connections == 0 {
                return Err(Error::InvalidInput(
                    "postgres.max_connections must be > 0".to_string(),
                ));
            }
            if pg.acquire_timeout.is_zero() {
                return Err(Error::InvalidInput(
                    "postgres.acquire_timeout must be > 0".to_string(),
                ));
            }
        }
        if self.auth.jwt_secret.trim().is_empty() {
            return Err(Error::InvalidInput("auth.jwt_secret is empty".to_string()));
        }
        if self.postgres.is_some() && self.auth.jwt_secret == DEV_JWT_SECRET {
            return Err(Error::InvalidInput(
                "auth.jwt_secret must not be the dev secret when a database is configured"
                    .to_string(),
            ));
        }
        if self.auth.token_ttl.is_zero() {
            return Err(Error::InvalidInput(
                "auth.token_ttl must be > 0".to_string(),
            ));
        }
        if self.llm.model.trim().is_empty() {
            return Err(Error::InvalidInput("llm.model is empty".to_string()));
        }
        if self.llm.api_base.trim().is_empty() {
            return Err(Error::InvalidInput("llm.api_base is empty".to_string()));
        }
        if self.sources.http_timeout.is_zero() {
            return Err(Error::InvalidInput(
                "sources.http_timeout must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn dev_secret_only_without_database() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.auth.jwt_secret, DEV_JWT_SECRET);
        assert!(cfg.postgres.is_none());

        let err = load(&[
            ("DATABASE_URL", "postgres://prod-db/querycraft"),
            ("REDIS_URL", "redis://prod-cache:6379"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET is required"), "{err}");

        let cfg = load(&[
            ("DATABASE_URL", "postgres://prod-db/querycraft"),
            ("JWT_SECRET", "s3cret"),
        ])
        .unwrap();
        assert_eq!(cfg.auth.jwt_secret, "s3cret");

        let mut cfg = AppConfig::for_tests();
        cfg.auth.jwt_secret = DEV_JWT_SECRET.to_string();
        cfg.postgres = Some(PostgresConfig {
            url: "postgres://prod-db/querycraft".to_string(),
            max_connections: 4,
            acquire_timeout: Duration::from_secs(1),
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn token_ttl_overflow_and_garbage_are_errors() {
        let cfg = load(&[("QUERYCRAFT_TOKEN_TTL_DAYS", "7")]).unwrap();
        assert_eq!(cfg.auth.token_ttl, Duration::from_secs(7 * 86_400));

        let err = load(&[("QUERYCRAFT_TOKEN_TTL_DAYS", "300000000000000")]).unwrap_err();
        assert!(err.to_string().contains("too large"), "{err}");

        let err = load(&[("QUERYCRAFT_TOKEN_TTL_DAYS", "thirty")]).unwrap_err();
        assert!(err.to_string().contains("QUERYCRAFT_TOKEN_TTL_DAYS"), "{err}");

        let err = load(&[("QUERYCRAFT_HTTP_TIMEOUT_MS", "-5")]).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let cfg = load(&[("GEMINI_MODEL", "  "), ("QUERYCRAFT_SCHEMA_CACHE_TTL_SECS", "0")]).unwrap();
        assert_eq!(cfg.llm.model, DEFAULT_GEMINI_MODEL);
        assert!(cfg.schema_cache.ttl.is_none());
        assert_eq!(cfg.sources.http_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_config_is_valid() {
        AppConfig::for_tests().validate().unwrap();
    }

    #[test]
    fn rejects_empty_secret_and_zero_pool() {
        let mut cfg = AppConfig::for_tests();
        cfg.auth.jwt_secret = "  ".to_string();
        assert!(matches!(cfg.validate(), Err(Error::InvalidInput(_))));

        let mut cfg = AppConfig::for_tests();
        cfg.postgres = Some(PostgresConfig {
            url: "postgres://localhost/qc".to_string(),
            max_connections: 0,
            acquire_timeout: Duration::from_secs(1),
        });
        assert!(cfg.validate().is_err());
    }
}
