use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use crate::libs::record::Record;
use crate::{LoaderError, Result};

/// Upstream producer of records. Content is assumed to be validated already.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn read_records(&self) -> Result<Vec<Record>>;
}

/// A file holding one JSON array of objects.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordSource for JsonFileSource {
    async fn read_records(&self) -> Result<Vec<Record>> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| LoaderError::Io {
                path: self.path.clone(),
                source,
            })?;
        let records = parse_records(&bytes, &self.path)?;
        log::info!("read {} record(s) from {}", records.len(), self.path.display());
        Ok(records)
    }
}

/// Split a JSON array into its object elements.
pub fn parse_records(bytes: &[u8], origin: &Path) -> Result<Vec<Record>> {
    let value: Value = serde_json::from_slice(bytes)?;
    let Value::Array(items) = value else {
        return Err(LoaderError::Source {
            path: origin.to_path_buf(),
            message: "expected a JSON array of records".into(),
        });
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(map) => Ok(map),
            other => Err(LoaderError::Source {
                path: origin.to_path_buf(),
                message: format!("element {i} is not an object: {other}"),
            }),
        })
        .collect()
}
