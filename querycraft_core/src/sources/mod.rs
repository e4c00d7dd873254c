//! Drivers for user-registered data sources.

pub mod models;
pub mod postgres;
pub mod supabase;
pub mod traits;
pub mod trino;

use crate::config::SourceConfig;
use crate::store::models::ConnectionRecord;
use crate::{Error, Result};
use models::SourceKind;
use traits::{BackendFactory, SqlBackend};

pub use postgres::PostgresSource;
pub use supabase::SupabaseSource;
pub use trino::TrinoClient;

/// Dispatches on the connection's source kind. Holds one shared HTTP client;
/// database connections are opened per call by the backends themselves.
#[derive(Clone)]
pub struct DefaultBackendFactory {
    http: reqwest::Client,
    cfg: SourceConfig,
}

impl DefaultBackendFactory {
    pub fn new(cfg: SourceConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.http_timeout)
            .build()
            .map_err(|e| Error::backend("build source http client", e))?;
        Ok(Self { http, cfg })
    }
}

impl BackendFactory for DefaultBackendFactory {
    #[tracing::instrument(level = "debug", skip_all, fields(connection_id = %connection.id, source = %connection.source))]
    fn open(&self, connection: &ConnectionRecord) -> Result<Box<dyn SqlBackend>> {
        Ok(match connection.source {
            SourceKind::Trino => Box::new(TrinoClient::from_connection(
                self.http.clone(),
                connection,
                &self.cfg,
            )?),
            SourceKind::Postgres | SourceKind::Neon => Box::new(PostgresSource::from_connection(
                connection,
                self.cfg.http_timeout,
            )?),
            SourceKind::Supabase => Box::new(SupabaseSource::from_connection(
                self.http.clone(),
                connection,
            )?),
        })
    }
}
