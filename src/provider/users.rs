//! Local users and groups

use super::SubsystemRules;
use declarative::{ApplyError, Attributes, DiffKind, Subsystem};
use serde_json::Value;
use winkit::RecordKind;

pub struct UserRules;

impl SubsystemRules for UserRules {
    const SUBSYSTEM: Subsystem = Subsystem::Users;
    const KIND: RecordKind = RecordKind::Account;

    /// Group membership is a set; Windows reports it in no particular order
    fn normalize(attributes: &mut Attributes) {
        if let Some(Value::Array(groups)) = attributes.get_mut("groups") {
            groups.sort_by_key(|g| g.as_str().map(str::to_lowercase));
            groups.dedup_by(|a, b| match (a.as_str(), b.as_str()) {
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                _ => false,
            });
        }
    }

    fn prepare(_kind: DiffKind, id: &str, target: &mut Attributes) -> Result<(), ApplyError> {
        if target.get("kind").and_then(Value::as_str) != Some("group") {
            return Ok(());
        }
        let has_groups = target
            .get("groups")
            .and_then(Value::as_array)
            .is_some_and(|g| !g.is_empty());
        if has_groups {
            return Err(ApplyError::Permanent(format!(
                "local group '{id}' cannot be a member of other local groups"
            )));
        }
        if target.get("enabled") == Some(&Value::Bool(false)) {
            return Err(ApplyError::Permanent(format!(
                "local group '{id}' cannot be disabled"
            )));
        }
        Ok(())
    }
}
