//! Registry values

use super::SubsystemRules;
use declarative::{Attributes, Subsystem};
use serde_json::Value;
use winkit::RecordKind;

pub struct RegistryRules;

impl SubsystemRules for RegistryRules {
    const SUBSYSTEM: Subsystem = Subsystem::Registry;
    const KIND: RecordKind = RecordKind::RegistryValue;
    const CONCURRENT_SAFE: bool = true;

    /// String-typed values written as bare numbers are stored as text
    fn normalize(attributes: &mut Attributes) {
        let text_type = match attributes.get("type").and_then(Value::as_str) {
            None => true,
            Some(t) => t == "string" || t == "expand_string",
        };
        if text_type && let Some(Value::Number(n)) = attributes.get("data") {
            let text = n.to_string();
            attributes.insert("data".to_string(), Value::String(text));
        }
    }
}
