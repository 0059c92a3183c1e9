//! Persistent environment variables

use super::SubsystemRules;
use declarative::{ApplyError, Attributes, DiffKind, Subsystem};
use serde_json::Value;
use winkit::RecordKind;

pub struct EnvironmentRules;

impl SubsystemRules for EnvironmentRules {
    const SUBSYSTEM: Subsystem = Subsystem::Environment;
    const KIND: RecordKind = RecordKind::EnvironmentVariable;
    const CONCURRENT_SAFE: bool = true;

    fn prepare(_kind: DiffKind, id: &str, target: &mut Attributes) -> Result<(), ApplyError> {
        // Setting an empty value deletes the variable on Windows
        if target.get("value").and_then(Value::as_str) == Some("") {
            return Err(ApplyError::Permanent(format!(
                "'{id}' has an empty value; remove it from the document to delete it"
            )));
        }
        Ok(())
    }
}
