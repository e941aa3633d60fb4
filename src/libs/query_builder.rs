//! SQL text synthesis for the loader. Nothing here touches a connection, so
//! every statement the loader issues can be inspected in tests.

use crate::libs::schema::{FieldSchema, PrimaryKey};

/// PostgreSQL rejects statements with more bind parameters than this.
pub const MAX_BIND_PARAMS: usize = 65_535;

/// Catalog query backing the idempotent create. Exact, case-sensitive match.
pub const TABLE_EXISTS_SQL: &str = "SELECT EXISTS (\
     SELECT 1 FROM information_schema.tables \
     WHERE table_schema = current_schema() AND table_name = $1)";

/// Names of the columns the loader adds on top of the schema fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    /// `SERIAL` key column used when no field is promoted.
    pub identity_column: String,
    /// Server-filled creation timestamp.
    pub created_at_column: String,
}

impl Default for TableLayout {
    fn default() -> Self {
        Self {
            identity_column: "id".to_string(),
            created_at_column: "created_at".to_string(),
        }
    }
}

impl TableLayout {
    /// Destination columns of `schema` under this layout, in schema order.
    pub fn field_columns(&self, schema: &FieldSchema) -> Vec<String> {
        match schema.primary_key() {
            PrimaryKey::Identity => {
                schema.columns(&[self.identity_column.as_str(), self.created_at_column.as_str()])
            }
            PrimaryKey::Field(_) => schema.columns(&[self.created_at_column.as_str()]),
        }
    }
}

/// Quote an identifier so PostgreSQL keeps it verbatim.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `CREATE TABLE` for `schema`, with either a generated identity key or the
/// promoted field as primary key, plus the creation-timestamp column.
pub fn create_table_sql(table: &str, schema: &FieldSchema, layout: &TableLayout) -> String {
    let columns = layout.field_columns(schema);
    let mut defs = Vec::with_capacity(schema.len() + 2);

    if schema.primary_key() == PrimaryKey::Identity {
        defs.push(format!(
            "{} SERIAL PRIMARY KEY",
            quote_ident(&layout.identity_column)
        ));
    }

    for (field, column) in schema.fields().iter().zip(&columns) {
        let mut col_def = format!("{} {}", quote_ident(column), field.semantic_type.sql_type());
        if field.primary_key {
            col_def.push_str(" PRIMARY KEY");
        } else if !field.nullable {
            col_def.push_str(" NOT NULL");
        }
        defs.push(col_def);
    }

    defs.push(format!(
        "{} TIMESTAMP DEFAULT CURRENT_TIMESTAMP",
        quote_ident(&layout.created_at_column)
    ));

    format!(
        "CREATE TABLE {} (\n    {}\n)",
        quote_ident(table),
        defs.join(",\n    ")
    )
}

/// How many rows fit in one insert statement for `columns` columns.
pub fn rows_per_statement(columns: usize) -> usize {
    (MAX_BIND_PARAMS / columns.max(1)).max(1)
}

/// Multi-row `INSERT` with `rows` tuples. Every placeholder carries an
/// explicit cast to its column type (unbounded for text), so text-encoded
/// values (JSON, numerics, timestamps) are converted server-side.
pub fn insert_sql(table: &str, schema: &FieldSchema, columns: &[String], rows: usize) -> String {
    let width = schema.len();
    let tuples: Vec<String> = (0..rows)
        .map(|row| {
            let placeholders: Vec<String> = schema
                .fields()
                .iter()
                .enumerate()
                .map(|(i, f)| format!("${}::{}", row * width + i + 1, f.semantic_type.cast_type()))
                .collect();
            format!("({})", placeholders.join(", "))
        })
        .collect();

    let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_ident(table),
        cols.join(", "),
        tuples.join(", ")
    )
}

pub fn count_rows_sql(table: &str) -> String {
    format!("SELECT COUNT(*) FROM {}", quote_ident(table))
}

pub fn drop_table_sql(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(table))
}
