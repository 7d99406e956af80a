//! PostgreSQL source connections via `sqlx`.

use std::time::Duration;

use async_trait::async_trait;
use querybeat_core::{ConnectionConfig, QueryPayload};
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::{Column, ConnectOptions, Connection, Row, TypeInfo};
use tracing::warn;

use crate::broker::{Connector, SourceConnection};
use crate::error::{ExecutionError, Result};

/// Opens one unpooled `PgConnection` per call.
///
/// Sessions are opened with `default_transaction_read_only=on`, so a
/// statement that slipped past the SELECT check still cannot write.
#[derive(Debug, Clone)]
pub struct PgConnector {
    connect_timeout: Duration,
}

impl PgConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    fn options(config: &ConnectionConfig) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.username)
            .password(&config.password)
            .database(&config.database_name)
            .application_name("querybeat")
            .options([("default_transaction_read_only", "on")])
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn SourceConnection>> {
        let options = Self::options(config);
        let conn = tokio::time::timeout(self.connect_timeout, options.connect())
            .await
            .map_err(|_| {
                ExecutionError::Connection(format!(
                    "connecting to {}:{} timed out after {}s",
                    config.host,
                    config.port,
                    self.connect_timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                ExecutionError::Connection(format!("{}:{}: {e}", config.host, config.port))
            })?;
        Ok(Box::new(PgSourceConnection { conn }))
    }
}

struct PgSourceConnection {
    conn: PgConnection,
}

#[async_trait]
impl SourceConnection for PgSourceConnection {
    async fn fetch(&mut self, query: &str) -> Result<QueryPayload> {
        // simple-query protocol: every value arrives in text format
        let conn: &mut PgConnection = &mut self.conn;
        let rows: Vec<PgRow> = sqlx::Executor::fetch_all(conn, sqlx::raw_sql(query))
            .await
            .map_err(|e| ExecutionError::QueryExecution(e.to_string()))?;
        Ok(rows_to_payload(&rows))
    }

    async fn close(self: Box<Self>) {
        if let Err(e) = self.conn.close().await {
            warn!(error = %e, "error while closing source connection");
        }
    }
}

/// Column names come from the first row; an empty result has none.
fn rows_to_payload(rows: &[PgRow]) -> QueryPayload {
    let columns = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();
    let rows = rows
        .iter()
        .map(|row| (0..row.len()).map(|i| decode_value(row, i)).collect())
        .collect();
    QueryPayload { columns, rows }
}

/// Map a column to JSON by its Postgres type. Numbers, booleans and JSON
/// keep their shape; everything else is carried as its text form.
fn decode_value(row: &PgRow, idx: usize) -> Value {
    let type_name = row.column(idx).type_info().name().to_ascii_uppercase();
    let decoded = match type_name.as_str() {
        "BOOL" => row
            .try_get::<Option<bool>, _>(idx)
            .map(|v| v.map(Value::from)),
        "INT2" => row
            .try_get::<Option<i16>, _>(idx)
            .map(|v| v.map(Value::from)),
        "INT4" => row
            .try_get::<Option<i32>, _>(idx)
            .map(|v| v.map(Value::from)),
        "INT8" => row
            .try_get::<Option<i64>, _>(idx)
            .map(|v| v.map(Value::from)),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(idx)
            .map(|v| v.map(Value::from)),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(idx)
            .map(|v| v.map(Value::from)),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(idx),
        _ => row
            .try_get_unchecked::<Option<String>, _>(idx)
            .map(|v| v.map(Value::String)),
    };
    decoded.ok().flatten().unwrap_or(Value::Null)
}
