//! Executor: runs validated, planner-checked SQL in a read-only
//! transaction with a capped statement timeout and row limit.

use serde_json::Value;
use sqlx::{Column, PgPool, Row, TypeInfo};

use crate::error::{PipelineError, Result};

const MAX_STATEMENT_TIMEOUT_MS: u64 = 30_000;

pub struct Executor<'a> {
    pool: &'a PgPool,
}

impl<'a> Executor<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Execute `sql` read-only, capping `requested_timeout_ms` at
    /// [`MAX_STATEMENT_TIMEOUT_MS`]. `sql` is expected to already carry its
    /// own `LIMIT` -- `structural::validate_structural` is the single place
    /// that injects one, using the same `max_rows` the caller passes here.
    /// `max_rows` is enforced again on the fetched rows as a backstop
    /// against SQL that reached the executor without going through that
    /// validator. Commits (a no-op for a read-only transaction) on success,
    /// rolls back on any error.
    pub async fn execute(&self, sql: &str, requested_timeout_ms: u64, max_rows: u64) -> Result<Vec<Value>> {
        let timeout_ms = requested_timeout_ms.min(MAX_STATEMENT_TIMEOUT_MS);

        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        sqlx::query("SET LOCAL transaction_read_only = on")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        sqlx::query(&format!("SET LOCAL statement_timeout = {}", timeout_ms))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        let mut rows = match sqlx::query(sql).fetch_all(&mut *tx).await {
            Ok(rows) => rows,
            Err(err) => {
                let _ = tx.rollback().await;
                return Err(map_sqlx_err(err));
            }
        };

        tx.commit().await.map_err(map_sqlx_err)?;

        rows.truncate(max_rows as usize);
        Ok(rows.iter().map(row_to_json).collect())
    }
}

fn row_to_json(row: &sqlx::postgres::PgRow) -> Value {
    let mut object = serde_json::Map::new();
    for column in row.columns() {
        let name = column.name().to_string();
        let value = match column.type_info().name() {
            "INT2" | "INT4" | "INT8" => row
                .try_get::<Option<i64>, _>(column.ordinal())
                .ok()
                .flatten()
                .map(Value::from)
                .unwrap_or(Value::Null),
            "FLOAT4" | "FLOAT8" | "NUMERIC" => row
                .try_get::<Option<f64>, _>(column.ordinal())
                .ok()
                .flatten()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            "BOOL" => row
                .try_get::<Option<bool>, _>(column.ordinal())
                .ok()
                .flatten()
                .map(Value::from)
                .unwrap_or(Value::Null),
            _ => row
                .try_get::<Option<String>, _>(column.ordinal())
                .ok()
                .flatten()
                .map(Value::from)
                .unwrap_or(Value::Null),
        };
        object.insert(name, value);
    }
    Value::Object(object)
}

fn map_sqlx_err(err: sqlx::Error) -> PipelineError {
    if let sqlx::Error::Database(db_err) = &err {
        let sqlstate = db_err.code().map(|c| c.to_string()).unwrap_or_default();
        if sqlstate == "42501" {
            return PipelineError::PermissionDenied(db_err.message().to_string());
        }
        return PipelineError::Planner { sqlstate, message: db_err.message().to_string() };
    }
    PipelineError::Connection(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_timeout_is_capped_at_thirty_seconds() {
        let requested = 60_000u64;
        let capped = requested.min(MAX_STATEMENT_TIMEOUT_MS);
        assert_eq!(capped, MAX_STATEMENT_TIMEOUT_MS);
    }

    #[test]
    fn statement_timeout_below_cap_is_unchanged() {
        let requested = 5_000u64;
        assert_eq!(requested.min(MAX_STATEMENT_TIMEOUT_MS), 5_000);
    }
}
