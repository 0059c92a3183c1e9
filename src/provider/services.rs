//! Windows services

use super::{SubsystemRules, default_attribute};
use declarative::{ApplyError, Attributes, DiffKind, Subsystem};
use serde_json::Value;
use winkit::RecordKind;

pub struct ServiceRules;

impl SubsystemRules for ServiceRules {
    const SUBSYSTEM: Subsystem = Subsystem::Services;
    const KIND: RecordKind = RecordKind::Service;

    fn prepare(kind: DiffKind, id: &str, target: &mut Attributes) -> Result<(), ApplyError> {
        if kind != DiffKind::Create {
            return Ok(());
        }
        if target.get("binary_path").is_none_or(Value::is_null) {
            return Err(ApplyError::Permanent(format!(
                "service '{id}' does not exist and has no binary_path to create it from"
            )));
        }
        default_attribute(target, "display_name", Value::String(id.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::HostProvider;
    use crate::provider::tests::{apply_op, op};
    use declarative::{Applied, Provider};
    use serde_json::json;
    use std::sync::Arc;
    use winkit::MemoryBackend;

    #[test]
    fn test_create_requires_binary_path() {
        let host = Arc::new(MemoryBackend::new());
        let provider = HostProvider::<ServiceRules>::new(host.clone());
        let create = op(
            Subsystem::Services,
            "AcmeAgent",
            DiffKind::Create,
            Some(json!({"start_type": "automatic"})),
        );
        let err = apply_op(&provider, &create).unwrap_err();
        assert!(err.to_string().contains("binary_path"));
        assert!(host.mutations().is_empty());
    }

    #[test]
    fn test_create_defaults_display_name() {
        let host = Arc::new(MemoryBackend::new());
        let provider = HostProvider::<ServiceRules>::new(host);
        let create = op(
            Subsystem::Services,
            "AcmeAgent",
            DiffKind::Create,
            Some(json!({"start_type": "manual", "binary_path": "C:\\acme\\agent.exe"})),
        );
        assert_eq!(apply_op(&provider, &create).unwrap(), Applied::Changed);

        let live = provider.read_one("acmeagent").unwrap();
        assert!(live.exists);
        assert_eq!(live.attributes["display_name"], "AcmeAgent");
    }

    #[test]
    fn test_update_needs_no_binary_path() {
        let host = Arc::new(MemoryBackend::new());
        let provider = HostProvider::<ServiceRules>::new(host);
        let update = op(
            Subsystem::Services,
            "Spooler",
            DiffKind::Update,
            Some(json!({"start_type": "disabled", "state": "stopped"})),
        );
        assert_eq!(apply_op(&provider, &update).unwrap(), Applied::Changed);
    }
}
