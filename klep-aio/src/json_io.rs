// klep-aio/src/json_io.rs
use std::path::Path;
use std::sync::Arc;

use klep_common::error::{KlepError, Result};
use serde::Serialize;
use tracing::debug;

/// Writes serializable data to a JSON file (pretty-printed, trailing
/// newline) through an atomic replace.
pub fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    debug!("Writing JSON to: {}", path.display());
    let mut json_bytes = serde_json::to_vec_pretty(data).map_err(|e| KlepError::Json(Arc::new(e)))?;
    json_bytes.push(b'\n');
    crate::fs::atomic_write_file(path, &json_bytes)
}

/// Reads a JSON document and hands it to `parse`, `None` when the file
/// does not exist.
pub fn read_document<T>(path: &Path, parse: impl FnOnce(&str) -> Result<T>) -> Result<Option<T>> {
    debug!("Reading JSON from: {}", path.display());
    match crate::fs::read_optional(path)? {
        Some(text) => parse(&text).map(Some),
        None => Ok(None),
    }
}
