//! Filesystem permissions

use super::SubsystemRules;
use declarative::{ApplyError, Attributes, DiffKind, Subsystem};
use serde_json::Value;
use std::collections::HashSet;
use winkit::RecordKind;

pub struct PermissionRules;

fn rule_key(rule: &Value) -> (String, String, String) {
    let field = |name: &str| {
        rule.get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase()
    };
    (field("identity"), field("access"), field("rights"))
}

impl SubsystemRules for PermissionRules {
    const SUBSYSTEM: Subsystem = Subsystem::Permissions;
    const KIND: RecordKind = RecordKind::PathAcl;

    /// Explicit rules compare as a set
    fn normalize(attributes: &mut Attributes) {
        if let Some(Value::Array(rules)) = attributes.get_mut("rules") {
            rules.sort_by_key(rule_key);
        }
    }

    fn prepare(_kind: DiffKind, id: &str, target: &mut Attributes) -> Result<(), ApplyError> {
        let Some(rules) = target.get("rules").and_then(Value::as_array) else {
            return Ok(());
        };
        let mut seen = HashSet::new();
        for rule in rules {
            let (identity, access, _) = rule_key(rule);
            if !seen.insert((identity.clone(), access.clone())) {
                return Err(ApplyError::Permanent(format!(
                    "{id}: more than one {access} rule for '{identity}'"
                )));
            }
        }
        Ok(())
    }
}
