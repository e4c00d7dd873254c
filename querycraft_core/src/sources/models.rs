use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Kind of external data source a connection points at.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Trino,
    Postgres,
    Neon,
    Supabase,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Trino => "trino",
            SourceKind::Postgres => "postgres",
            SourceKind::Neon => "neon",
            SourceKind::Supabase => "supabase",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trino" => Ok(SourceKind::Trino),
            "postgres" => Ok(SourceKind::Postgres),
            "neon" => Ok(SourceKind::Neon),
            "supabase" => Ok(SourceKind::Supabase),
            other => Err(Error::InvalidInput(format!(
                "Unsupported connection type: {other}"
            ))),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine-reported statistics. Times are seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryTimings {
    pub cpu_time: Option<f64>,
    pub elapsed_time: Option<f64>,
    pub wall_time: Option<f64>,
    pub queued_time: Option<f64>,
    pub processed_rows: Option<i64>,
    pub processed_bytes: Option<i64>,
}

/// Result of running one statement against a source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOutput {
    pub columns: Vec<String>,
    /// One JSON object per row, keyed by column name.
    pub rows: Vec<serde_json::Value>,
    pub row_count: usize,
    #[serde(default)]
    pub timings: QueryTimings,
}

fn de_port<'de, D>(deserializer: D) -> std::result::Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Num(u16),
        Text(String),
    }
    match Option::<Port>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Port::Num(n)) => Ok(Some(n)),
        Some(Port::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Port::Text(s)) => s
            .trim()
            .parse::<u16>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Credentials stored in a Postgres/Neon connection's auth blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PostgresAuth {
    pub host: String,
    #[serde(default, deserialize_with = "de_port")]
    pub port: Option<u16>,
    pub database: String,
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SupabaseAuth {
    pub url: String,
    #[serde(rename = "apiKey")]
    pub api_key: String,
}

/// Optional basic-auth credentials for Trino.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TrinoAuth {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn auth_from_blob<T: serde::de::DeserializeOwned>(blob: &serde_json::Value, what: &str) -> Result<T> {
    serde_json::from_value(blob.clone())
        .map_err(|e| Error::InvalidInput(format!("invalid {what} credentials: {e}")))
}

impl PostgresAuth {
    pub fn from_blob(blob: &serde_json::Value) -> Result<Self> {
        auth_from_blob(blob, "postgres")
    }
}

impl SupabaseAuth {
    pub fn from_blob(blob: &serde_json::Value) -> Result<Self> {
        let auth: Self = auth_from_blob(blob, "supabase")?;
        if auth.url.trim().is_empty() || auth.api_key.trim().is_empty() {
            return Err(Error::InvalidInput(
                "Supabase apiKey or url is missing".to_string(),
            ));
        }
        Ok(auth)
    }
}

impl TrinoAuth {
    /// A missing or non-object blob means no basic auth.
    pub fn from_blob(blob: &serde_json::Value) -> Result<Self> {
        if !blob.is_object() {
            return Ok(Self::default());
        }
        auth_from_blob(blob, "trino")
    }
}

/// Flatten a JSON object of header-ish pairs into strings; non-objects yield nothing.
pub(crate) fn string_pairs(blob: &serde_json::Value) -> Vec<(String, String)> {
    let Some(map) = blob.as_object() else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(k, v)| {
            let v = match v {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => return None,
                other => other.to_string(),
            };
            Some((k.clone(), v))
        })
        .collect()
}

/// True when the ssl blob requests TLS (any non-empty object, or `true`).
pub(crate) fn ssl_requested(blob: &serde_json::Value) -> bool {
    match blob {
        serde_json::Value::Object(m) => !m.is_empty(),
        serde_json::Value::Bool(b) => *b,
        _ => false,
    }
}
