//! Validate a raw document against the document schema

use crate::schema::{Kind, SchemaNode, document_schema};
use crate::types::{ConfigDocument, ResourceDescriptor, Section, Subsystem};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// One schema violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{path}: {reason}")]
pub struct ValidationError {
    /// Dotted/indexed location, e.g. `firewall.resources[0].port`
    pub path: String,
    pub reason: String,
}

/// Every violation found in a document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    pub fn errors(&self) -> &[ValidationError] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<ValidationError> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn push(&mut self, path: &str, reason: impl Into<String>) {
        self.0.push(ValidationError {
            path: path.to_string(),
            reason: reason.into(),
        });
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.0.len();
        write!(f, "{n} validation error{}", if n == 1 { "" } else { "s" })?;
        for e in &self.0 {
            write!(f, "\n  {e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Validate a raw document, collecting every error in one pass.
///
/// Missing optional fields receive their schema defaults. Unknown keys,
/// unknown subsystems and duplicate resource ids are errors.
pub fn validate(raw: &Value) -> Result<ConfigDocument, ValidationErrors> {
    let mut errors = ValidationErrors::default();

    let Some(root) = raw.as_object() else {
        errors.push("$", format!("expected object, found {}", found(raw)));
        return Err(errors);
    };

    let schema = document_schema();
    let mut sections = Vec::new();

    for (key, value) in root {
        let Some(subsystem) = Subsystem::from_name(key) else {
            errors.push(
                key,
                format!(
                    "unknown subsystem '{key}' (expected one of: {})",
                    Subsystem::names()
                ),
            );
            continue;
        };

        let normalized = check(schema.section(subsystem), Some(value), key, &mut errors);
        if let Some(Value::Object(map)) = normalized {
            sections.push(build_section(subsystem, map, &mut errors));
        }
    }

    if errors.is_empty() {
        Ok(ConfigDocument::from_sections(sections))
    } else {
        Err(errors)
    }
}

fn build_section(
    subsystem: Subsystem,
    mut map: Map<String, Value>,
    errors: &mut ValidationErrors,
) -> Section {
    let authoritative = map
        .get("authoritative")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let items = match map.remove("resources") {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    };

    let case = subsystem.id_case();
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut resources = Vec::with_capacity(items.len());

    for (index, item) in items.into_iter().enumerate() {
        let Value::Object(mut attrs) = item else {
            continue;
        };
        let Some(Value::String(id)) = attrs.shift_remove("id") else {
            continue;
        };
        if let Some(first) = seen.insert(case.key(&id), index) {
            errors.push(
                &format!("{subsystem}.resources[{index}].id"),
                format!("duplicate id '{id}' (first declared at resources[{first}])"),
            );
            continue;
        }
        if subsystem == Subsystem::Registry {
            check_registry_data(&attrs, &format!("{subsystem}.resources[{index}].data"), errors);
        }
        resources.push(ResourceDescriptor::new(id, attrs));
    }

    Section {
        subsystem,
        authoritative,
        resources,
    }
}

/// Registry `data` must fit the declared value `type`.
fn check_registry_data(attrs: &Map<String, Value>, path: &str, errors: &mut ValidationErrors) {
    let Some(data) = attrs.get("data") else {
        return;
    };
    let value_type = attrs.get("type").and_then(Value::as_str).unwrap_or("string");
    let max = match value_type {
        "dword" => u64::from(u32::MAX),
        "qword" => u64::MAX,
        _ => {
            // numbers are stored as their decimal text
            if !(data.is_string() || data.is_number()) {
                errors.push(path, format!("expected string for {value_type}, found {}", found(data)));
            }
            return;
        }
    };
    match data.as_u64() {
        Some(n) if n <= max => {}
        _ if data.is_i64() || data.is_u64() => {
            errors.push(path, format!("{data} is out of range for {value_type} (0..={max})"));
        }
        _ => errors.push(path, format!("expected integer for {value_type}, found {}", found(data))),
    }
}

/// Check `value` against `node`, returning the normalized value.
///
/// `None` in means the field is absent; `None` out means nothing to store
/// (absent optional field without default, or an error was recorded).
fn check(
    node: &SchemaNode,
    value: Option<&Value>,
    path: &str,
    errors: &mut ValidationErrors,
) -> Option<Value> {
    let value = match value {
        None | Some(Value::Null) => {
            if node.required {
                errors.push(path, "missing required field");
            }
            return node.default.clone();
        }
        Some(v) => v,
    };

    match &node.kind {
        Kind::String { pattern } => {
            let Some(s) = value.as_str() else {
                return mismatch(node, value, path, errors);
            };
            if let Some(p) = pattern
                && !p.is_match(s)
            {
                errors.push(path, format!("'{s}' does not match pattern {}", p.as_str()));
                return None;
            }
            check_allowed(node, s, path, errors)
        }
        Kind::Integer { min, max } => {
            let Some(n) = value.as_i64() else {
                return mismatch(node, value, path, errors);
            };
            if min.is_some_and(|m| n < m) || max.is_some_and(|m| n > m) {
                errors.push(
                    path,
                    format!(
                        "{n} is out of range {}..={}",
                        min.map_or_else(String::new, |m| m.to_string()),
                        max.map_or_else(String::new, |m| m.to_string())
                    ),
                );
                return None;
            }
            Some(value.clone())
        }
        Kind::Boolean => match value {
            Value::Bool(_) => Some(value.clone()),
            _ => mismatch(node, value, path, errors),
        },
        Kind::Scalar => match value {
            Value::String(s) => check_allowed(node, s, path, errors),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
            _ => mismatch(node, value, path, errors),
        },
        Kind::List(item) => {
            let Some(items) = value.as_array() else {
                return mismatch(node, value, path, errors);
            };
            let mut out = Vec::with_capacity(items.len());
            for (i, v) in items.iter().enumerate() {
                if let Some(v) = check(item, Some(v), &format!("{path}[{i}]"), errors) {
                    out.push(v);
                }
            }
            Some(Value::Array(out))
        }
        Kind::Object(fields) => {
            let Some(obj) = value.as_object() else {
                return mismatch(node, value, path, errors);
            };
            for key in obj.keys() {
                if !fields.iter().any(|f| f.name == key) {
                    errors.push(&format!("{path}.{key}"), format!("unknown field '{key}'"));
                }
            }
            let mut out = Map::new();
            for f in fields {
                let child = format!("{path}.{}", f.name);
                if let Some(v) = check(&f.node, obj.get(f.name), &child, errors) {
                    out.insert(f.name.to_string(), v);
                }
            }
            Some(Value::Object(out))
        }
    }
}

fn check_allowed(
    node: &SchemaNode,
    s: &str,
    path: &str,
    errors: &mut ValidationErrors,
) -> Option<Value> {
    if let Some(allowed) = node.allowed
        && !allowed.contains(&s)
    {
        errors.push(
            path,
            format!("'{s}' is not one of: {}", allowed.join(", ")),
        );
        return None;
    }
    Some(Value::String(s.to_string()))
}

fn mismatch(
    node: &SchemaNode,
    value: &Value,
    path: &str,
    errors: &mut ValidationErrors,
) -> Option<Value> {
    errors.push(
        path,
        format!("expected {}, found {}", node.type_name(), found(value)),
    );
    None
}

fn found(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn paths(errors: &ValidationErrors) -> Vec<&str> {
        errors.errors().iter().map(|e| e.path.as_str()).collect()
    }

    #[test]
    fn test_valid_document_gets_defaults() {
        let doc = validate(&json!({
            "firewall": {
                "resources": [
                    {"id": "allow-http", "direction": "inbound", "action": "allow", "port": 8080}
                ]
            }
        }))
        .unwrap();

        let section = doc.section(Subsystem::Firewall).unwrap();
        assert!(!section.authoritative);
        let rule = &section.resources[0];
        assert_eq!(rule.id, "allow-http");
        assert_eq!(rule.attributes["protocol"], "tcp");
        assert_eq!(rule.attributes["enabled"], true);
        assert_eq!(rule.attributes["port"], 8080);
        assert!(!rule.attributes.contains_key("program"));
    }

    #[test]
    fn test_wrong_type_reports_exact_path() {
        let errors = validate(&json!({
            "environment": {"resources": [{"id": "system:PATH", "value": ["a", "b"]}]}
        }))
        .unwrap_err();

        assert_eq!(errors.len(), 1);
        let e = &errors.errors()[0];
        assert_eq!(e.path, "environment.resources[0].value");
        assert_eq!(e.reason, "expected string, found list");
    }

    #[test]
    fn test_collects_all_errors_in_one_pass() {
        let errors = validate(&json!({
            "firewall": {"resources": [
                {"id": "r1", "direction": "sideways", "action": "allow", "port": 70000},
                {"id": "r2", "action": "block", "colour": "red"}
            ]},
            "dns": {}
        }))
        .unwrap_err();

        let p = paths(&errors);
        assert!(p.contains(&"firewall.resources[0].direction"));
        assert!(p.contains(&"firewall.resources[0].port"));
        assert!(p.contains(&"firewall.resources[1].colour"));
        assert!(p.contains(&"firewall.resources[1].direction"));
        assert!(p.contains(&"dns"));
        assert_eq!(errors.len(), 5);
    }

    #[test]
    fn test_duplicate_ids_use_case_rule() {
        let errors = validate(&json!({
            "services": {"resources": [
                {"id": "Spooler", "start_type": "manual"},
                {"id": "spooler", "start_type": "disabled"}
            ]}
        }))
        .unwrap_err();
        assert_eq!(paths(&errors), vec!["services.resources[1].id"]);

        // firewall names are case-sensitive, so these are distinct
        assert!(
            validate(&json!({
                "firewall": {"resources": [
                    {"id": "Web", "direction": "inbound", "action": "allow"},
                    {"id": "web", "direction": "inbound", "action": "allow"}
                ]}
            }))
            .is_ok()
        );
    }

    #[test]
    fn test_nested_rule_errors() {
        let errors = validate(&json!({
            "permissions": {"resources": [
                {"id": "C:\\data", "rules": [{"identity": "Users", "rights": "everything"}]}
            ]}
        }))
        .unwrap_err();
        assert_eq!(paths(&errors), vec!["permissions.resources[0].rules[0].rights"]);
    }

    #[test]
    fn test_missing_required_and_bad_pattern() {
        let errors = validate(&json!({
            "registry": {"resources": [{"id": "HKLM\\Software"}]}
        }))
        .unwrap_err();
        let p = paths(&errors);
        assert!(p.contains(&"registry.resources[0].id"));
        assert!(p.contains(&"registry.resources[0].data"));
    }

    #[test]
    fn test_registry_data_must_fit_its_type() {
        let errors = validate(&json!({
            "registry": {"resources": [
                {"id": "HKCU\\Software\\Acme\\A", "type": "dword", "data": "abc"},
                {"id": "HKCU\\Software\\Acme\\B", "type": "dword", "data": 4_294_967_296_u64},
                {"id": "HKCU\\Software\\Acme\\C", "type": "qword", "data": -1},
                {"id": "HKCU\\Software\\Acme\\D", "type": "string", "data": true},
                {"id": "HKCU\\Software\\Acme\\E", "type": "dword", "data": 4_294_967_295_u64},
                {"id": "HKCU\\Software\\Acme\\F", "type": "expand_string", "data": 7}
            ]}
        }))
        .unwrap_err();

        assert_eq!(
            paths(&errors),
            vec![
                "registry.resources[0].data",
                "registry.resources[1].data",
                "registry.resources[2].data",
                "registry.resources[3].data",
            ]
        );
        assert_eq!(errors.errors()[0].reason, "expected integer for dword, found string");
        assert_eq!(
            errors.errors()[1].reason,
            "4294967296 is out of range for dword (0..=4294967295)"
        );
    }

    #[test]
    fn test_root_must_be_object() {
        let errors = validate(&json!([1, 2])).unwrap_err();
        assert_eq!(paths(&errors), vec!["$"]);
    }

    #[test]
    fn test_floats_are_not_integers() {
        let errors = validate(&json!({
            "firewall": {"resources": [
                {"id": "r", "direction": "inbound", "action": "allow", "port": 80.5}
            ]}
        }))
        .unwrap_err();
        assert_eq!(errors.errors()[0].reason, "expected integer, found float");
    }

    #[test]
    fn test_revalidation_is_idempotent() {
        let raw = json!({
            "startup": {"resources": [{"id": "Sync", "command": "C:\\sync.exe"}]},
            "users": {"authoritative": true, "resources": [{"id": "svc-backup", "groups": ["Backup Operators"]}]},
            "registry": {"resources": [{"id": "HKCU\\Software\\Acme\\Level", "type": "dword", "data": 3}]}
        });
        let first = validate(&raw).unwrap();
        let second = validate(&first.to_value()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.to_value(), second.to_value());
    }

    #[test]
    fn test_empty_document_is_valid() {
        let doc = validate(&json!({})).unwrap();
        assert!(doc.sections().is_empty());
    }
}
