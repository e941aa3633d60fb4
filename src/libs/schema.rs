// schema.rs
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{LoaderError, Result};

/// Suffix appended to a field's column when it collides with a column the
/// loader generates itself.
pub const COLLISION_SUFFIX: &str = "_src";

/// Declared semantic type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Text,
    Integer,
    Number,
    Boolean,
    Json,
    Timestamp,
}

impl SemanticType {
    /// PostgreSQL column type used for this semantic type.
    pub fn sql_type(self) -> &'static str {
        match self {
            SemanticType::Text => "VARCHAR(255)",
            SemanticType::Integer => "INTEGER",
            SemanticType::Number => "NUMERIC",
            SemanticType::Boolean => "BOOLEAN",
            SemanticType::Json => "JSONB",
            SemanticType::Timestamp => "TIMESTAMP",
        }
    }

    /// Type an insert placeholder is cast to. Text uses unbounded `VARCHAR`
    /// so that an over-long value fails on assignment instead of being
    /// truncated by the cast.
    pub fn cast_type(self) -> &'static str {
        match self {
            SemanticType::Text => "VARCHAR",
            other => other.sql_type(),
        }
    }
}

/// A single field of a [`FieldSchema`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub semantic_type: SemanticType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    /// Destination column, when it must differ from `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
}

fn default_nullable() -> bool {
    true
}

impl FieldDef {
    pub fn new(name: &str, semantic_type: SemanticType) -> Self {
        Self {
            name: name.to_string(),
            semantic_type,
            nullable: true,
            primary_key: false,
            column: None,
        }
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, SemanticType::Text)
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, SemanticType::Integer)
    }

    pub fn number(name: &str) -> Self {
        Self::new(name, SemanticType::Number)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, SemanticType::Boolean)
    }

    pub fn json(name: &str) -> Self {
        Self::new(name, SemanticType::Json)
    }

    pub fn timestamp(name: &str) -> Self {
        Self::new(name, SemanticType::Timestamp)
    }

    /// Mark the field `NOT NULL`.
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Promote the field to the table's primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Store the field under a different column name.
    pub fn column(mut self, column: &str) -> Self {
        self.column = Some(column.to_string());
        self
    }

    /// Column name before collision handling.
    pub fn declared_column(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.name)
    }
}

/// How the table's primary key is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryKey<'a> {
    /// Generated `SERIAL` column, named by the loader options.
    Identity,
    /// A schema field promoted to `PRIMARY KEY`.
    Field(&'a FieldDef),
}

/// Ordered, validated list of fields. Order drives both the DDL column order
/// and the positional bind order of inserts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldSchema {
    fields: Vec<FieldDef>,
}

impl FieldSchema {
    pub fn new(fields: Vec<FieldDef>) -> Result<Self> {
        if fields.is_empty() {
            return Err(LoaderError::InvalidSchema("schema has no fields".into()));
        }

        let mut names = HashSet::new();
        let mut columns = HashSet::new();
        let mut keys = 0;
        for f in &fields {
            if f.name.is_empty() || f.declared_column().is_empty() {
                return Err(LoaderError::InvalidSchema("field names must not be empty".into()));
            }
            if !names.insert(f.name.as_str()) {
                return Err(LoaderError::InvalidSchema(format!(
                    "duplicate field `{}`",
                    f.name
                )));
            }
            if !columns.insert(f.declared_column()) {
                return Err(LoaderError::InvalidSchema(format!(
                    "duplicate column `{}`",
                    f.declared_column()
                )));
            }
            if f.primary_key {
                keys += 1;
            }
        }
        if keys > 1 {
            return Err(LoaderError::InvalidSchema(
                "at most one field may be the primary key".into(),
            ));
        }

        Ok(Self { fields })
    }

    /// Parse a schema from its JSON form, an array of field objects.
    pub fn from_json(text: &str) -> Result<Self> {
        let fields: Vec<FieldDef> = serde_json::from_str(text)?;
        Self::new(fields)
    }

    /// Make `field` the only promoted primary key.
    pub fn with_primary_key(mut self, field: &str) -> Result<Self> {
        if !self.fields.iter().any(|f| f.name == field) {
            return Err(LoaderError::InvalidSchema(format!(
                "primary key field `{field}` is not in the schema"
            )));
        }
        for f in &mut self.fields {
            f.primary_key = f.name == field;
            if f.primary_key {
                f.nullable = false;
            }
        }
        Ok(self)
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn primary_key(&self) -> PrimaryKey<'_> {
        self.fields
            .iter()
            .find(|f| f.primary_key)
            .map(PrimaryKey::Field)
            .unwrap_or(PrimaryKey::Identity)
    }

    /// Destination column for every field, in schema order.
    ///
    /// Any field column equal to one of `reserved` is suffixed with
    /// [`COLLISION_SUFFIX`]. In identity mode the reserved set holds the
    /// identity and creation-timestamp columns, otherwise only the latter.
    pub fn columns(&self, reserved: &[&str]) -> Vec<String> {
        let taken: HashSet<&str> = self.fields.iter().map(|f| f.declared_column()).collect();
        self.fields
            .iter()
            .map(|f| {
                let col = f.declared_column();
                if !reserved.contains(&col) {
                    return col.to_string();
                }
                let mut renamed = format!("{col}{COLLISION_SUFFIX}");
                while taken.contains(renamed.as_str()) || reserved.contains(&renamed.as_str()) {
                    renamed.push_str(COLLISION_SUFFIX);
                }
                renamed
            })
            .collect()
    }
}

impl<'de> Deserialize<'de> for FieldSchema {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let fields = Vec::<FieldDef>::deserialize(deserializer)?;
        FieldSchema::new(fields).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicates_and_multiple_keys() {
        let dup = FieldSchema::new(vec![FieldDef::text("a"), FieldDef::integer("a")]);
        assert!(matches!(dup, Err(LoaderError::InvalidSchema(_))));

        let dup_col = FieldSchema::new(vec![FieldDef::text("a"), FieldDef::text("b").column("a")]);
        assert!(matches!(dup_col, Err(LoaderError::InvalidSchema(_))));

        let keys = FieldSchema::new(vec![
            FieldDef::integer("a").primary_key(),
            FieldDef::integer("b").primary_key(),
        ]);
        assert!(matches!(keys, Err(LoaderError::InvalidSchema(_))));

        assert!(FieldSchema::new(vec![]).is_err());
    }

    #[test]
    fn primary_key_strategy_follows_schema() {
        let identity = FieldSchema::new(vec![FieldDef::text("name")]).unwrap();
        assert_eq!(identity.primary_key(), PrimaryKey::Identity);

        let promoted =
            FieldSchema::new(vec![FieldDef::integer("id").primary_key(), FieldDef::text("name")])
                .unwrap();
        match promoted.primary_key() {
            PrimaryKey::Field(f) => {
                assert_eq!(f.name, "id");
                assert!(!f.nullable);
            }
            PrimaryKey::Identity => panic!("expected promoted key"),
        }
    }

    #[test]
    fn colliding_columns_get_suffixed() {
        let schema = FieldSchema::new(vec![
            FieldDef::integer("id"),
            FieldDef::text("id_src"),
            FieldDef::text("name").column("display"),
        ])
        .unwrap();

        assert_eq!(
            schema.columns(&["id", "created_at"]),
            vec!["id_src_src", "id_src", "display"]
        );
        assert_eq!(schema.columns(&["created_at"]), vec!["id", "id_src", "display"]);
    }

    #[test]
    fn parses_json_schema() {
        let schema = FieldSchema::from_json(
            r#"[
                {"name": "id", "type": "integer", "primary_key": true},
                {"name": "name", "type": "text"},
                {"name": "tags", "type": "json", "nullable": true},
                {"name": "born", "type": "timestamp", "nullable": false}
            ]"#,
        )
        .unwrap();

        let f = schema.fields();
        assert_eq!(f.len(), 4);
        assert!(f[0].primary_key);
        assert!(f[1].nullable);
        assert_eq!(f[2].semantic_type, SemanticType::Json);
        assert!(!f[3].nullable);
    }

    #[test]
    fn type_mapping() {
        assert_eq!(SemanticType::Text.sql_type(), "VARCHAR(255)");
        assert_eq!(SemanticType::Number.sql_type(), "NUMERIC");
        assert_eq!(SemanticType::Json.sql_type(), "JSONB");
        assert_eq!(SemanticType::Text.cast_type(), "VARCHAR");
        assert_eq!(SemanticType::Integer.cast_type(), "INTEGER");
    }
}
