use clap::Parser;
use querycraft_core::config::{AppConfig, PostgresConfig};
use querycraft_core::o11y::{redact_secret, redact_url};
use querycraft_core::store::{PostgresAppDb, RedisCache};
use querycraft_server::cli::{Cli, Commands, DEFAULT_PORT};
use std::net::SocketAddr;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    querycraft_core::o11y::init_from_env()?;
    let cli = Cli::parse();

    let cmd = cli.command.unwrap_or(Commands::Serve {
        host: "0.0.0.0".to_string(),
        port: std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT),
    });

    match cmd {
        Commands::Serve { host, port } => {
            let addr: SocketAddr = format!("{host}:{port}").parse()?;
            let config = AppConfig::from_env()?;
            let state = querycraft_server::dev_backends::build_state(config).await?;
            querycraft_server::server::serve(addr, state).await?;
        }
        Commands::Migrate { database_url } => {
            let url = database_url.or_else(|| std::env::var("DATABASE_URL").ok());
            match url {
                Some(url) => {
                    let cfg = PostgresConfig {
                        url,
                        max_connections: 2,
                        acquire_timeout: Duration::from_secs(10),
                    };
                    let db = PostgresAppDb::connect(&cfg).await?;
                    db.migrate().await?;
                    tracing::info!("migrations applied");
                }
                None => anyhow::bail!("no database configured (set DATABASE_URL or --database-url)"),
            }
        }
        Commands::Config => {
            let cfg = AppConfig::from_env()?;
            let out = serde_json::json!({
                "DATABASE_URL": cfg.postgres.as_ref().map(|p| redact_url(&p.url)),
                "QUERYCRAFT_DB_MAX_CONNECTIONS": cfg.postgres.as_ref().map(|p| p.max_connections),
                "QUERYCRAFT_DB_ACQUIRE_TIMEOUT_MS": cfg.postgres.as_ref().map(|p| p.acquire_timeout.as_millis() as u64),
                "REDIS_URL": cfg.redis.as_ref().map(|r| redact_url(&r.url)),
                "QUERYCRAFT_REDIS_KEY_PREFIX": cfg.redis.as_ref().and_then(|r| r.key_prefix.clone()),
                "GEMINI_API_BASE": cfg.llm.api_base,
                "GEMINI_API_KEY": redact_secret(&cfg.llm.api_key),
                "GEMINI_MODEL": cfg.llm.model,
                "JWT_SECRET": redact_secret(&cfg.auth.jwt_secret),
                "QUERYCRAFT_TOKEN_TTL_DAYS": cfg.auth.token_ttl.as_secs() / 86_400,
                "QUERYCRAFT_TRINO_USER": cfg.sources.trino_user,
                "QUERYCRAFT_HTTP_TIMEOUT_MS": cfg.sources.http_timeout.as_millis() as u64,
                "QUERYCRAFT_SCHEMA_CACHE_TTL_SECS": cfg.schema_cache.ttl.map(|t| t.as_secs()),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Check => {
            let cfg = AppConfig::from_env()?;
            match &cfg.postgres {
                Some(pg) => match PostgresAppDb::connect(pg).await {
                    Ok(db) => match db.ping().await {
                        Ok(()) => println!("postgres: ok"),
                        Err(e) => println!("postgres: error ({e})"),
                    },
                    Err(e) => println!("postgres: error ({e})"),
                },
                None => println!("postgres: not configured"),
            }
            match &cfg.redis {
                Some(redis) => match RedisCache::new(redis).await {
                    Ok(cache) => match cache.ping().await {
                        Ok(()) => println!("redis: ok"),
                        Err(e) => println!("redis: error ({e})"),
                    },
                    Err(e) => println!("redis: error ({e})"),
                },
                None => println!("redis: not configured"),
            }
        }
    }

    Ok(())
}
