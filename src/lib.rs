//! Schema-driven loading of JSON records into PostgreSQL.
//!
//! ```no_run
//! use rosterload::*;
//!
//! # async fn run() -> rosterload::Result<()> {
//! let schema = FieldSchema::new(vec![
//!     FieldDef::integer("id").primary_key(),
//!     FieldDef::text("name"),
//!     FieldDef::json("tags"),
//! ])?;
//! let loader = Loader::new("postgres://postgres@localhost:5432/mtbl")?
//!     .with_filter(RecordFilter::exclude_retired());
//!
//! let records = JsonFileSource::new("players.json").read_records().await?;
//! loader.create_table(&schema, "t").await?;
//! let inserted = loader.load_records(&records, &schema, "t").await?;
//! println!("loaded {inserted} records");
//! # Ok(())
//! # }
//! ```

pub mod libs;

pub use libs::*;
