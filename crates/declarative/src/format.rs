//! Document and report file formats

use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use thiserror::Error;

/// Failure to parse or render a document
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("cannot render TOML: {0}")]
    TomlRender(#[from] toml::ser::Error),
}

/// Serialization format of documents and reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Toml,
}

impl DocumentFormat {
    /// Pick a format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }

    /// Guess from content: JSON documents start with `{`
    pub fn sniff(content: &str) -> Self {
        if content.trim_start().starts_with('{') {
            Self::Json
        } else {
            Self::Toml
        }
    }

    /// Extension first, then content
    pub fn detect(path: &Path, content: &str) -> Self {
        Self::from_path(path).unwrap_or_else(|| Self::sniff(content))
    }

    /// Parse into an order-preserving JSON value
    pub fn parse(&self, content: &str) -> Result<Value, FormatError> {
        match self {
            Self::Json => Ok(serde_json::from_str(content)?),
            Self::Toml => {
                let table: toml::Table = toml::from_str(content)?;
                Ok(serde_json::to_value(table)?)
            }
        }
    }

    pub fn render<T: Serialize>(&self, value: &T) -> Result<String, FormatError> {
        match self {
            Self::Json => Ok(serde_json::to_string_pretty(value)?),
            Self::Toml => Ok(toml::to_string_pretty(value)?),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Toml => "toml",
        }
    }
}
