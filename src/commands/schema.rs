//! `winconf schema` - print the document schema

use anyhow::Result;
use declarative::document_schema;

pub fn run() -> Result<i32> {
    let schema = serde_json::to_string_pretty(&document_schema().to_json())?;
    println!("{schema}");
    Ok(0)
}
