//! Operational helpers around the loader: database bootstrap, connection
//! checks and table inspection.

use log::info;
use sqlx::{PgConnection, query, query_as, query_scalar};

use crate::libs::loader::{Creation, Loader, release};
use crate::libs::query_builder::{TABLE_EXISTS_SQL, count_rows_sql, drop_table_sql, quote_ident};
use crate::{LoaderError, Result};

/// Database used to issue `CREATE DATABASE`.
pub const MAINTENANCE_DATABASE: &str = "postgres";

const DATABASE_EXISTS_SQL: &str = "SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)";

const COLUMNS_SQL: &str = "SELECT column_name::text, data_type::text, column_default::text, \
     (is_nullable = 'YES') \
     FROM information_schema.columns \
     WHERE table_schema = current_schema() AND table_name = $1 \
     ORDER BY ordinal_position";

const PRIMARY_KEY_SQL: &str = "SELECT tc.constraint_name::text, kcu.column_name::text \
     FROM information_schema.table_constraints AS tc \
     JOIN information_schema.key_column_usage AS kcu \
       ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
     WHERE tc.table_schema = current_schema() AND tc.table_name = $1 \
       AND tc.constraint_type = 'PRIMARY KEY' \
     ORDER BY kcu.ordinal_position";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub default: Option<String>,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKeyInfo {
    pub constraint: String,
    pub columns: Vec<String>,
}

/// Structure and contents summary of a loaded table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReport {
    pub columns: Vec<ColumnInfo>,
    pub primary_key: Option<PrimaryKeyInfo>,
    pub row_count: i64,
    /// Ten largest groups when a group-by column was requested.
    pub groups: Vec<(Option<String>, i64)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionReport {
    pub server_version: String,
    pub table_exists: bool,
}

/// Create the loader's target database unless it already exists.
pub async fn ensure_database(loader: &Loader) -> Result<Creation> {
    let name = loader
        .options()
        .get_database()
        .ok_or_else(|| LoaderError::Config("database url names no database".into()))?
        .to_string();

    let maintenance = Loader::with_options(loader.options().clone().database(MAINTENANCE_DATABASE));
    let mut conn = maintenance.connect().await?;
    let result = create_database_on(&mut conn, &name).await;
    release(conn).await;

    let creation = result.map_err(LoaderError::Query)?;
    match creation {
        Creation::Created => info!("database {name} created"),
        Creation::AlreadyExists => info!("database {name} already exists"),
    }
    Ok(creation)
}

async fn create_database_on(conn: &mut PgConnection, name: &str) -> sqlx::Result<Creation> {
    let exists: bool = query_scalar(DATABASE_EXISTS_SQL)
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    if exists {
        return Ok(Creation::AlreadyExists);
    }
    // CREATE DATABASE cannot run inside a transaction block
    let sql = format!("CREATE DATABASE {}", quote_ident(name));
    sqlx::raw_sql(&sql).execute(&mut *conn).await?;
    Ok(Creation::Created)
}

/// Server version and whether `table` exists yet.
pub async fn check_connection(loader: &Loader, table: &str) -> Result<ConnectionReport> {
    let mut conn = loader.connect().await?;
    let result = async {
        let server_version: String = query_scalar("SELECT version()").fetch_one(&mut conn).await?;
        let table_exists: bool = query_scalar(TABLE_EXISTS_SQL)
            .bind(table)
            .fetch_one(&mut conn)
            .await?;
        Ok::<_, sqlx::Error>(ConnectionReport {
            server_version,
            table_exists,
        })
    }
    .await;
    release(conn).await;
    result.map_err(LoaderError::Query)
}

/// Describe `table`, or `None` when it does not exist.
pub async fn describe_table(
    loader: &Loader,
    table: &str,
    group_by: Option<&str>,
) -> Result<Option<TableReport>> {
    let mut conn = loader.connect().await?;
    let result = describe_on(&mut conn, table, group_by).await;
    release(conn).await;
    result.map_err(LoaderError::Query)
}

async fn describe_on(
    conn: &mut PgConnection,
    table: &str,
    group_by: Option<&str>,
) -> sqlx::Result<Option<TableReport>> {
    let exists: bool = query_scalar(TABLE_EXISTS_SQL)
        .bind(table)
        .fetch_one(&mut *conn)
        .await?;
    if !exists {
        return Ok(None);
    }

    let columns = query_as::<_, (String, String, Option<String>, bool)>(COLUMNS_SQL)
        .bind(table)
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(|(name, data_type, default, nullable)| ColumnInfo {
            name,
            data_type,
            default,
            nullable,
        })
        .collect();

    let key_rows: Vec<(String, String)> = query_as(PRIMARY_KEY_SQL)
        .bind(table)
        .fetch_all(&mut *conn)
        .await?;
    let primary_key = key_rows.first().map(|(constraint, _)| PrimaryKeyInfo {
        constraint: constraint.clone(),
        columns: key_rows.iter().map(|(_, column)| column.clone()).collect(),
    });

    let row_count: i64 = query_scalar(&count_rows_sql(table))
        .fetch_one(&mut *conn)
        .await?;

    let groups = match group_by {
        Some(column) => {
            let sql = format!(
                "SELECT {col}::text, COUNT(*) FROM {table} GROUP BY 1 ORDER BY 2 DESC, 1 LIMIT 10",
                col = quote_ident(column),
                table = quote_ident(table),
            );
            query_as::<_, (Option<String>, i64)>(&sql)
                .fetch_all(&mut *conn)
                .await?
        }
        None => Vec::new(),
    };

    Ok(Some(TableReport {
        columns,
        primary_key,
        row_count,
        groups,
    }))
}

/// Number of rows currently in `table`.
pub async fn count_rows(loader: &Loader, table: &str) -> Result<i64> {
    let mut conn = loader.connect().await?;
    let result: sqlx::Result<i64> = query_scalar(&count_rows_sql(table))
        .fetch_one(&mut conn)
        .await;
    release(conn).await;
    result.map_err(LoaderError::Query)
}

/// `DROP TABLE IF EXISTS`, for full reloads.
pub async fn drop_table(loader: &Loader, table: &str) -> Result<()> {
    let mut conn = loader.connect().await?;
    let result = query(&drop_table_sql(table)).execute(&mut conn).await;
    release(conn).await;
    result.map_err(LoaderError::Query)?;
    info!("dropped table {table} if it existed");
    Ok(())
}
