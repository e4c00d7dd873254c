use crate::schema::introspect;
use crate::schema::models::{Relationship, SchemaColumn};
use crate::sources::models::{PostgresAuth, QueryOutput, QueryTimings, SourceKind, ssl_requested};
use crate::sources::traits::SqlBackend;
use crate::store::models::ConnectionRecord;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use rust_decimal::Decimal;
use sqlx::postgres::types::{Oid, PgInterval, PgMoney, PgTimeTz};
use sqlx::postgres::{
    PgConnectOptions, PgPoolOptions, PgRow, PgSslMode, PgValueFormat, PgValueRef,
};
use sqlx::{Column, PgPool, Row, TypeInfo, ValueRef};
use std::net::IpAddr;
use std::time::Duration;

const DEFAULT_PORT: u16 = 5432;

/// Postgres / Neon source. Every call opens a single-connection pool and
/// closes it afterwards; nothing is shared between requests.
#[derive(Clone)]
pub struct PostgresSource {
    kind: SourceKind,
    options: PgConnectOptions,
    connect_timeout: Duration,
}

impl std::fmt::Debug for PostgresSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresSource")
            .field("kind", &self.kind)
            .field("host", &self.options.get_host())
            .field("database", &self.options.get_database())
            .finish_non_exhaustive()
    }
}

impl PostgresSource {
    pub fn from_connection(connection: &ConnectionRecord, connect_timeout: Duration) -> Result<Self> {
        let auth = PostgresAuth::from_blob(&connection.auth)?;
        let ssl_mode = if ssl_requested(&connection.ssl) {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        };
        let mut options = PgConnectOptions::new()
            .host(&auth.host)
            .port(auth.port.unwrap_or(DEFAULT_PORT))
            .database(&auth.database)
            .username(&auth.user)
            .ssl_mode(ssl_mode);
        if let Some(pw) = auth.password.as_deref() {
            options = options.password(pw);
        }
        Ok(Self {
            kind: connection.source,
            options,
            connect_timeout,
        })
    }

    async fn pool(&self) -> Result<PgPool> {
        PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(self.connect_timeout)
            .connect_with(self.options.clone())
            .await
            .map_err(|e| Error::backend("connect source postgres", e))
    }

    async fn fetch_rows(&self, sql: &str) -> Result<Vec<PgRow>> {
        let pool = self.pool().await?;
        let res = sqlx::query(sql).fetch_all(&pool).await;
        pool.close().await;
        res.map_err(|e| Error::backend("source query", e))
    }
}

/// Decode one column by probing its declared type. Types without a JSON
/// mapping fall back to their text form, or `null` when none is available.
fn cell_to_json(row: &PgRow, idx: usize) -> Value {
    fn get<'r, T>(row: &'r PgRow, idx: usize) -> Option<T>
    where
        T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
    {
        row.try_get::<Option<T>, _>(idx).ok().flatten()
    }

    let raw = match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw,
        Err(_) => return Value::Null,
    };

    let type_name = row.column(idx).type_info().name().to_ascii_uppercase();
    let value = match type_name.as_str() {
        "BOOL" => get::<bool>(row, idx).map(Value::from),
        "INT2" => get::<i16>(row, idx).map(Value::from),
        "INT4" => get::<i32>(row, idx).map(Value::from),
        "INT8" => get::<i64>(row, idx).map(Value::from),
        "OID" => get::<Oid>(row, idx).map(|v| Value::from(v.0)),
        "FLOAT4" => get::<f32>(row, idx).map(|v| Value::from(v as f64)),
        "FLOAT8" => get::<f64>(row, idx).map(Value::from),
        "NUMERIC" => get::<Decimal>(row, idx).map(numeric_to_json),
        "MONEY" => get::<PgMoney>(row, idx).map(|v| numeric_to_json(v.to_decimal(2))),
        "UUID" => get::<uuid::Uuid>(row, idx).map(|v| Value::from(v.to_string())),
        "TIMESTAMPTZ" => {
            get::<chrono::DateTime<chrono::Utc>>(row, idx).map(|v| Value::from(v.to_rfc3339()))
        }
        "TIMESTAMP" => get::<chrono::NaiveDateTime>(row, idx).map(|v| Value::from(v.to_string())),
        "DATE" => get::<chrono::NaiveDate>(row, idx).map(|v| Value::from(v.to_string())),
        "TIME" => get::<chrono::NaiveTime>(row, idx).map(|v| Value::from(v.to_string())),
        "TIMETZ" => get::<PgTimeTz<chrono::NaiveTime, chrono::FixedOffset>>(row, idx)
            .map(|v| Value::from(format!("{}{}", v.time, v.offset))),
        "INTERVAL" => get::<PgInterval>(row, idx).map(|v| Value::from(interval_text(&v))),
        "BYTEA" => get::<Vec<u8>>(row, idx).map(|v| Value::from(bytea_text(&v))),
        "INET" | "CIDR" => binary_or_text(&raw, |b| inet_text(b, type_name == "CIDR")),
        "MACADDR" => binary_or_text(&raw, macaddr_text),
        "JSON" | "JSONB" => get::<Value>(row, idx),
        "TEXT[]" | "VARCHAR[]" => get::<Vec<String>>(row, idx).map(Value::from),
        "BOOL[]" => get::<Vec<bool>>(row, idx).map(Value::from),
        "INT2[]" => get::<Vec<i16>>(row, idx).map(Value::from),
        "INT4[]" => get::<Vec<i32>>(row, idx).map(Value::from),
        "INT8[]" => get::<Vec<i64>>(row, idx).map(Value::from),
        "FLOAT8[]" => get::<Vec<f64>>(row, idx).map(Value::from),
        "NUMERIC[]" => get::<Vec<Decimal>>(row, idx)
            .map(|v| Value::Array(v.into_iter().map(numeric_to_json).collect())),
        "UUID[]" => get::<Vec<uuid::Uuid>>(row, idx)
            .map(|v| Value::from(v.iter().map(ToString::to_string).collect::<Vec<_>>())),
        _ => get::<String>(row, idx)
            .map(Value::from)
            .or_else(|| binary_or_text(&raw, |_| None)),
    };
    value.unwrap_or_else(|| {
        tracing::debug!(column = idx, type_name = %type_name, "column value not representable as JSON");
        Value::Null
    })
}

/// Text-format values are returned as-is; binary ones go through `decode`.
fn binary_or_text(raw: &PgValueRef<'_>, decode: impl Fn(&[u8]) -> Option<String>) -> Option<Value> {
    match raw.format() {
        PgValueFormat::Text => raw.as_str().ok().map(Value::from),
        PgValueFormat::Binary => raw.as_bytes().ok().and_then(decode).map(Value::from),
    }
}

/// NUMERIC keeps its exact decimal text, scale included, as a JSON string.
fn numeric_to_json(d: Decimal) -> Value {
    Value::from(d.to_string())
}

/// Postgres' default `IntervalStyle` rendering, e.g. `1 year 2 mons 3 days 04:05:06.5`.
fn interval_text(iv: &PgInterval) -> String {
    fn unit(n: i64, singular: &str, plural: &str) -> String {
        if n.abs() == 1 {
            format!("{n} {singular}")
        } else {
            format!("{n} {plural}")
        }
    }

    let mut parts = Vec::new();
    let (years, months) = (iv.months / 12, iv.months % 12);
    if years != 0 {
        parts.push(unit(years.into(), "year", "years"));
    }
    if months != 0 {
        parts.push(unit(months.into(), "mon", "mons"));
    }
    if iv.days != 0 {
        parts.push(unit(iv.days.into(), "day", "days"));
    }
    if iv.microseconds != 0 || parts.is_empty() {
        let sign = if iv.microseconds < 0 { "-" } else { "" };
        let total = iv.microseconds.unsigned_abs();
        let secs = total / 1_000_000;
        let frac = total % 1_000_000;
        let mut clock = format!("{sign}{:02}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60);
        if frac != 0 {
            let digits = format!("{frac:06}");
            clock.push('.');
            clock.push_str(digits.trim_end_matches('0'));
        }
        parts.push(clock);
    }
    parts.join(" ")
}

/// Postgres hex escape form: `\x` followed by lowercase hex.
fn bytea_text(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Binary `inet`/`cidr`: family, prefix bits, cidr flag, address length, address.
fn inet_text(bytes: &[u8], cidr: bool) -> Option<String> {
    let (&[family, bits, _, len], addr) = bytes.split_first_chunk::<4>()?;
    let (ip, full): (IpAddr, u8) = match (family, len, addr) {
        (2, 4, a) => (IpAddr::from(<[u8; 4]>::try_from(a).ok()?), 32),
        (3, 16, a) => (IpAddr::from(<[u8; 16]>::try_from(a).ok()?), 128),
        _ => return None,
    };
    if cidr || bits != full {
        Some(format!("{ip}/{bits}"))
    } else {
        Some(ip.to_string())
    }
}

fn macaddr_text(bytes: &[u8]) -> Option<String> {
    (bytes.len() == 6).then(|| {
        bytes
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(":")
    })
}

pub(crate) fn row_to_json(row: &PgRow) -> Value {
    let obj: serde_json::Map<String, Value> = row
        .columns()
        .iter()
        .map(|c| (c.name().to_string(), cell_to_json(row, c.ordinal())))
        .collect();
    Value::Object(obj)
}

#[async_trait]
impl SqlBackend for PostgresSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    #[tracing::instrument(level = "debug", skip(self, sql), fields(source = %self.kind))]
    async fn query(&self, sql: &str) -> Result<QueryOutput> {
        let rows = self.fetch_rows(sql).await?;
        let columns = rows
            .first()
            .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let rows: Vec<Value> = rows.iter().map(row_to_json).collect();
        Ok(QueryOutput {
            row_count: rows.len(),
            columns,
            rows,
            timings: QueryTimings::default(),
        })
    }

    async fn ping(&self) -> Result<()> {
        self.fetch_rows("SELECT 1 AS success").await.map(|_| ())
    }

    async fn fetch_schema(&self) -> Result<Vec<SchemaColumn>> {
        let out = self.query(&introspect::tables_query(None)?).await?;
        Ok(introspect::flatten_schema_rows(&out.rows))
    }

    async fn fetch_relationships(&self) -> Result<Vec<Relationship>> {
        let out = self.query(&introspect::relationships_query(None)?).await?;
        Ok(introspect::flatten_relationship_rows(&out.rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn conn(auth: Value, ssl: Value) -> ConnectionRecord {
        let now = Utc::now();
        ConnectionRecord {
            id: crate::ConnectionId::new(),
            name: None,
            project_id: crate::ProjectId::new(),
            server: String::new(),
            catalog: "default".to_string(),
            schema: "public".to_string(),
            source: SourceKind::Neon,
            auth,
            extra_headers: json!({}),
            ssl,
            extra_credential: json!({}),
            session: json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn options_follow_auth_blob() {
        let source = PostgresSource::from_connection(
            &conn(
                json!({"host": "ep-1.neon.tech", "database": "main", "user": "app", "password": "pw"}),
                json!({"rejectUnauthorized": true}),
            ),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(source.kind(), SourceKind::Neon);
        assert_eq!(source.options.get_host(), "ep-1.neon.tech");
        assert_eq!(source.options.get_port(), DEFAULT_PORT);
        assert_eq!(source.options.get_database(), Some("main"));
        assert!(matches!(source.options.get_ssl_mode(), PgSslMode::Require));
    }

    #[test]
    fn numeric_keeps_exact_text() {
        let avg: Decimal = "1.5000000000000000".parse().unwrap();
        assert_eq!(numeric_to_json(avg), json!("1.5000000000000000"));
        let sum: Decimal = "3".parse().unwrap();
        assert_eq!(numeric_to_json(sum), json!("3"));
        assert_eq!(
            numeric_to_json(PgMoney(-1234).to_decimal(2)),
            json!("-12.34")
        );
    }

    #[test]
    fn intervals_render_like_postgres() {
        let iv = |months, days, microseconds| PgInterval {
            months,
            days,
            microseconds,
        };
        assert_eq!(interval_text(&iv(0, 0, 0)), "00:00:00");
        assert_eq!(interval_text(&iv(14, 3, 0)), "1 year 2 mons 3 days");
        assert_eq!(interval_text(&iv(0, 1, 3_723_500_000)), "1 day 01:02:03.5");
        assert_eq!(interval_text(&iv(0, -2, -90_000_000)), "-2 days -00:01:30");
    }

    #[test]
    fn binary_network_and_bytea_values() {
        assert_eq!(bytea_text(&[0xde, 0xad, 0x01]), "\\xdead01");
        assert_eq!(
            inet_text(&[2, 32, 0, 4, 10, 0, 0, 1], false).as_deref(),
            Some("10.0.0.1")
        );
        assert_eq!(
            inet_text(&[2, 24, 1, 4, 192, 168, 1, 0], true).as_deref(),
            Some("192.168.1.0/24")
        );
        let mut v6 = vec![3, 64, 0, 16];
        v6.extend_from_slice(&[0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(inet_text(&v6, false).as_deref(), Some("2001:db8::1/64"));
        assert_eq!(inet_text(&[2, 32, 0, 4, 1], false), None);
        assert_eq!(
            macaddr_text(&[0x08, 0x00, 0x2b, 0x01, 0x02, 0x03]).as_deref(),
            Some("08:00:2b:01:02:03")
        );
    }

    #[test]
    fn missing_credentials_are_invalid_input() {
        let err = PostgresSource::from_connection(&conn(json!({}), json!({})), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
