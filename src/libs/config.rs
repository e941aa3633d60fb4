use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::libs::players::{PLAYERS_TABLE, player_schema};
use crate::libs::query_builder::TableLayout;
use crate::libs::record::RecordFilter;
use crate::libs::schema::FieldSchema;
use crate::{LoaderError, Result};

/// Player universe database loader.
#[derive(Debug, Parser)]
#[command(name = "rosterload", version, about)]
pub struct Cli {
    /// PostgreSQL connection URL.
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    pub database_url: Option<String>,

    /// Target table.
    #[arg(long, env = "ROSTERLOAD_TABLE", default_value = PLAYERS_TABLE, global = true)]
    pub table: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load player data into the database.
    Load(LoadArgs),
    /// Verify the table structure and data.
    Verify {
        /// Also report the ten largest groups of this column.
        #[arg(long)]
        group_by: Option<String>,
    },
    /// Create the database if it doesn't exist.
    CreateDb,
    /// Test the connection and report whether the table exists.
    Check,
}

#[derive(Debug, Args)]
pub struct LoadArgs {
    /// JSON file holding an array of records.
    #[arg(long, short, env = "ROSTERLOAD_SOURCE")]
    pub source: PathBuf,

    /// JSON schema file; the built-in player schema when omitted.
    #[arg(long, env = "ROSTERLOAD_SCHEMA")]
    pub schema: Option<PathBuf>,

    /// Promote this field to primary key instead of a generated id column.
    #[arg(long)]
    pub key_field: Option<String>,

    /// Name of the generated id column.
    #[arg(long, default_value = "id")]
    pub identity_column: String,

    /// Skip records whose FIELD equals VALUE.
    #[arg(
        long,
        value_name = "FIELD=VALUE",
        default_value = "status=retired",
        value_parser = parse_exclusion
    )]
    pub exclude: RecordFilter,

    /// Load every record, ignoring --exclude.
    #[arg(long)]
    pub no_filter: bool,

    /// Drop the table before loading.
    #[arg(long)]
    pub replace: bool,
}

impl Cli {
    pub fn database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| LoaderError::Config("no database url (set DATABASE_URL)".into()))
    }
}

impl LoadArgs {
    pub fn filter(&self) -> Option<RecordFilter> {
        (!self.no_filter).then(|| self.exclude.clone())
    }

    pub fn layout(&self) -> TableLayout {
        TableLayout {
            identity_column: self.identity_column.clone(),
            ..TableLayout::default()
        }
    }

    pub async fn field_schema(&self) -> Result<FieldSchema> {
        load_schema(self.schema.as_deref(), self.key_field.as_deref()).await
    }
}

fn parse_exclusion(raw: &str) -> std::result::Result<RecordFilter, String> {
    match raw.split_once('=') {
        Some((field, value)) if !field.is_empty() => Ok(RecordFilter::exclude_equals(field, value)),
        _ => Err(format!("expected FIELD=VALUE, got `{raw}`")),
    }
}

/// Read a schema file, or fall back to the player schema, then apply the
/// requested primary-key promotion.
pub async fn load_schema(path: Option<&Path>, key_field: Option<&str>) -> Result<FieldSchema> {
    let schema = match path {
        Some(path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .map_err(|source| LoaderError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
            FieldSchema::from_json(&text)?
        }
        None => player_schema()?,
    };
    match key_field {
        Some(field) => schema.with_primary_key(field),
        None => Ok(schema),
    }
}
