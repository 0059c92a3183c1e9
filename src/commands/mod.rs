//! Command implementations
//!
//! Every command returns the process exit code:
//! 0 ok, 2 rejected document, 3 partial, 4 aborted. Internal errors
//! propagate as `Err` and exit 1.

pub mod apply;
pub mod backups;
pub mod diff;
pub mod restore;
pub mod schema;
pub mod validate;

use anyhow::{Context as AnyhowContext, Result};
use declarative::{
    ConfigDocument, DocumentFormat, ValidationError, ValidationErrors, validate as validate_document,
};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// A document file as read from disk
pub struct Document {
    pub path: PathBuf,
    pub format: DocumentFormat,
    /// Parsed content, or why it could not be parsed
    parsed: Result<Value, ValidationError>,
}

impl Document {
    pub fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let format = DocumentFormat::detect(path, &content);
        log::debug!("Reading {} as {format:?}", path.display());

        let parsed = format.parse(&content).map_err(|e| ValidationError {
            path: "$".to_string(),
            reason: e.to_string(),
        });
        Ok(Self {
            path: path.to_path_buf(),
            format,
            parsed,
        })
    }

    /// Validate the document; a parse failure is reported like any
    /// other validation error.
    pub fn validate(&self) -> Result<ConfigDocument, Vec<ValidationError>> {
        match &self.parsed {
            Ok(raw) => validate_document(raw).map_err(ValidationErrors::into_vec),
            Err(e) => Err(vec![e.clone()]),
        }
    }
}
