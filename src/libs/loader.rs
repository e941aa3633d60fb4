use log::{debug, info, warn};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Number, Value};
use sqlx::postgres::{PgConnectOptions, PgRow};
use sqlx::{Column, Connection, PgConnection, Postgres, Row, Transaction};

use crate::libs::query_builder::{
    TABLE_EXISTS_SQL, TableLayout, create_table_sql, insert_sql, rows_per_statement,
};
use crate::libs::record::{Param, Record, RecordFilter, record_params};
use crate::libs::retry::RetryPolicy;
use crate::libs::schema::FieldSchema;
use crate::{LoaderError, Result};

/// Result of an idempotent create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Creation {
    Created,
    AlreadyExists,
}

/// Schema-driven loader for one PostgreSQL destination.
///
/// Every operation opens its own connection, works inside a single
/// transaction, and closes the connection before returning.
#[derive(Debug, Clone)]
pub struct Loader {
    options: PgConnectOptions,
    layout: TableLayout,
    filter: Option<RecordFilter>,
    retry: RetryPolicy,
}

impl Loader {
    pub fn new(database_url: &str) -> Result<Self> {
        let options = database_url
            .parse::<PgConnectOptions>()
            .map_err(|e| LoaderError::Config(format!("invalid database url: {e}")))?;
        Ok(Self::with_options(options))
    }

    pub fn with_options(options: PgConnectOptions) -> Self {
        Self {
            options,
            layout: TableLayout::default(),
            filter: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_layout(mut self, layout: TableLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Skip records rejected by `filter` in [`Loader::load_records`].
    pub fn with_filter(mut self, filter: RecordFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Backoff and classifier used by [`Loader::execute_with_retry`].
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn options(&self) -> &PgConnectOptions {
        &self.options
    }

    pub fn layout(&self) -> &TableLayout {
        &self.layout
    }

    async fn open(&self) -> sqlx::Result<PgConnection> {
        debug!(
            "connecting to {}:{}/{}",
            self.options.get_host(),
            self.options.get_port(),
            self.options.get_database().unwrap_or_default()
        );
        PgConnection::connect_with(&self.options).await
    }

    /// Open a fresh connection to the destination.
    pub async fn connect(&self) -> Result<PgConnection> {
        self.open().await.map_err(LoaderError::Connection)
    }

    // -------- Create table --------

    /// Create `table` from `schema` unless a table of that name already
    /// exists, in which case nothing is changed.
    pub async fn create_table(&self, schema: &FieldSchema, table: &str) -> Result<Creation> {
        let mut conn = self.connect().await?;
        let result = self.create_table_on(&mut conn, schema, table).await;
        release(conn).await;

        let creation = result.map_err(|source| LoaderError::SchemaCreation {
            table: table.to_string(),
            source,
        })?;
        match creation {
            Creation::Created => info!("created table {table}"),
            Creation::AlreadyExists => info!("table {table} already exists"),
        }
        Ok(creation)
    }

    async fn create_table_on(
        &self,
        conn: &mut PgConnection,
        schema: &FieldSchema,
        table: &str,
    ) -> sqlx::Result<Creation> {
        let mut tx = conn.begin().await?;
        let result = self.create_in(&mut tx, schema, table).await;
        finish(tx, result).await
    }

    async fn create_in(
        &self,
        conn: &mut PgConnection,
        schema: &FieldSchema,
        table: &str,
    ) -> sqlx::Result<Creation> {
        let exists: bool = sqlx::query_scalar(TABLE_EXISTS_SQL)
            .bind(table)
            .fetch_one(&mut *conn)
            .await?;
        if exists {
            return Ok(Creation::AlreadyExists);
        }

        let sql = create_table_sql(table, schema, &self.layout);
        debug!("creating table with SQL:\n{sql}");
        sqlx::query(&sql).execute(&mut *conn).await?;
        Ok(Creation::Created)
    }

    // -------- Load records --------

    /// Insert `records` into `table` as one all-or-nothing batch and return
    /// the number of rows inserted. The table must already exist.
    pub async fn load_records(
        &self,
        records: &[Record],
        schema: &FieldSchema,
        table: &str,
    ) -> Result<u64> {
        let kept: Vec<&Record> = records
            .iter()
            .filter(|r| self.filter.as_ref().is_none_or(|f| f.keeps(r)))
            .collect();
        let skipped = records.len() - kept.len();
        if skipped > 0 {
            info!("skipping {skipped} filtered record(s)");
        }
        if kept.is_empty() {
            info!("no records to load into {table}");
            return Ok(0);
        }

        let mut conn = self.connect().await?;
        let result = self.insert_on(&mut conn, &kept, schema, table).await;
        release(conn).await;

        let inserted = result.map_err(|source| LoaderError::Load {
            table: table.to_string(),
            source,
        })?;
        info!("loaded {inserted} record(s) into {table}");
        Ok(inserted)
    }

    async fn insert_on(
        &self,
        conn: &mut PgConnection,
        records: &[&Record],
        schema: &FieldSchema,
        table: &str,
    ) -> sqlx::Result<u64> {
        let columns = self.layout.field_columns(schema);
        let batch = rows_per_statement(schema.len());

        let mut tx = conn.begin().await?;
        let result = Self::insert_chunks(&mut tx, records, schema, table, &columns, batch).await;
        finish(tx, result).await
    }

    async fn insert_chunks(
        conn: &mut PgConnection,
        records: &[&Record],
        schema: &FieldSchema,
        table: &str,
        columns: &[String],
        batch: usize,
    ) -> sqlx::Result<u64> {
        let mut inserted = 0;
        for chunk in records.chunks(batch) {
            let sql = insert_sql(table, schema, columns, chunk.len());
            let mut query = sqlx::query(&sql);
            for record in chunk {
                for param in record_params(record, schema) {
                    query = param.bind(query);
                }
            }
            inserted += query.execute(&mut *conn).await?.rows_affected();
        }
        Ok(inserted)
    }

    // -------- Ad-hoc statements --------

    /// Run `statement` with `params`, making up to `max_retries` attempts
    /// under the loader's retry policy. Rows come back as JSON objects.
    pub async fn execute_with_retry(
        &self,
        statement: &str,
        params: &[Value],
        max_retries: u32,
    ) -> Result<Vec<Map<String, Value>>> {
        let policy = RetryPolicy {
            max_attempts: max_retries,
            ..self.retry
        };
        self.execute_with_policy(statement, params, &policy).await
    }

    /// Like [`Loader::execute_with_retry`] with an explicit policy. Each
    /// attempt uses a new connection, which is closed whatever the outcome.
    pub async fn execute_with_policy(
        &self,
        statement: &str,
        params: &[Value],
        policy: &RetryPolicy,
    ) -> Result<Vec<Map<String, Value>>> {
        policy
            .run(|attempt| async move {
                debug!("executing statement (attempt {attempt})");
                let mut conn = self.open().await?;
                let result = fetch_on(&mut conn, statement, params).await;
                release(conn).await;
                result
            })
            .await
    }
}

async fn fetch_on(
    conn: &mut PgConnection,
    statement: &str,
    params: &[Value],
) -> sqlx::Result<Vec<Map<String, Value>>> {
    let mut tx = conn.begin().await?;
    let mut query = sqlx::query(statement);
    for value in params {
        query = Param::from_json(value).bind(query);
    }
    let rows = query.fetch_all(&mut *tx).await;
    let rows = finish(tx, rows).await?;
    Ok(rows.iter().map(row_to_json).collect())
}

/// Commit on success, roll back on failure. The original error wins over a
/// failed rollback.
async fn finish<T>(tx: Transaction<'_, Postgres>, result: sqlx::Result<T>) -> sqlx::Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                warn!("rollback failed: {rollback}");
            }
            Err(err)
        }
    }
}

/// Close `conn`. A failure to close is logged, not returned.
pub(crate) async fn release(conn: PgConnection) {
    if let Err(e) = conn.close().await {
        warn!("error closing connection: {e}");
    }
}

/// Decode a row into a JSON object, trying the common column types in turn.
/// `NUMERIC` becomes a JSON number when that keeps every digit, otherwise a
/// string. Timestamps, dates and times become ISO 8601 strings, with an
/// offset only for `TIMESTAMPTZ`. Other types decode to null unless the
/// statement casts them to text.
pub fn row_to_json(row: &PgRow) -> Map<String, Value> {
    let mut map = Map::new();
    for col in row.columns() {
        let i = col.ordinal();
        let value = if let Ok(v) = row.try_get::<Option<i64>, _>(i) {
            v.map(Value::from)
        } else if let Ok(v) = row.try_get::<Option<i32>, _>(i) {
            v.map(Value::from)
        } else if let Ok(v) = row.try_get::<Option<i16>, _>(i) {
            v.map(Value::from)
        } else if let Ok(v) = row.try_get::<Option<f64>, _>(i) {
            v.map(Value::from)
        } else if let Ok(v) = row.try_get::<Option<f32>, _>(i) {
            v.map(|f| Value::from(f64::from(f)))
        } else if let Ok(v) = row.try_get::<Option<Decimal>, _>(i) {
            v.map(decimal_to_json)
        } else if let Ok(v) = row.try_get::<Option<bool>, _>(i) {
            v.map(Value::from)
        } else if let Ok(v) = row.try_get::<Option<String>, _>(i) {
            v.map(Value::from)
        } else if let Ok(v) = row.try_get::<Option<Value>, _>(i) {
            v
        } else if let Ok(v) = row.try_get::<Option<DateTime<Utc>>, _>(i) {
            v.map(|t| Value::from(t.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
        } else if let Ok(v) = row.try_get::<Option<NaiveDateTime>, _>(i) {
            v.map(|t| Value::from(t.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
        } else if let Ok(v) = row.try_get::<Option<NaiveDate>, _>(i) {
            v.map(|d| Value::from(d.to_string()))
        } else if let Ok(v) = row.try_get::<Option<NaiveTime>, _>(i) {
            v.map(|t| Value::from(t.to_string()))
        } else {
            None
        };
        map.insert(col.name().to_string(), value.unwrap_or(Value::Null));
    }
    map
}

fn decimal_to_json(d: Decimal) -> Value {
    let text = d.normalize().to_string();
    match text.parse::<Number>() {
        Ok(n) if n.to_string() == text => Value::Number(n),
        _ => Value::String(text),
    }
}
