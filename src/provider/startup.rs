//! Startup entries under the Run keys

use super::SubsystemRules;
use declarative::{ApplyError, Attributes, DiffKind, Subsystem};
use serde_json::Value;
use winkit::RecordKind;

pub struct StartupRules;

impl SubsystemRules for StartupRules {
    const SUBSYSTEM: Subsystem = Subsystem::Startup;
    const KIND: RecordKind = RecordKind::StartupEntry;

    fn normalize(attributes: &mut Attributes) {
        if let Some(Value::String(command)) = attributes.get_mut("command") {
            let trimmed = command.trim();
            if trimmed.len() != command.len() {
                *command = trimmed.to_string();
            }
        }
    }

    fn prepare(_kind: DiffKind, id: &str, target: &mut Attributes) -> Result<(), ApplyError> {
        Self::normalize(target);
        if target.get("command").and_then(Value::as_str).is_none_or(str::is_empty) {
            return Err(ApplyError::Permanent(format!("startup entry '{id}' has no command")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::HostProvider;
    use crate::provider::tests::{apply_op, op, section};
    use declarative::{Provider, Scope};
    use serde_json::json;
    use std::sync::Arc;
    use winkit::MemoryBackend;

    #[test]
    fn test_blank_command_rejected() {
        let provider = HostProvider::<StartupRules>::new(Arc::new(MemoryBackend::new()));
        let create = op(
            Subsystem::Startup,
            "Tray",
            DiffKind::Create,
            Some(json!({"command": "   "})),
        );
        assert!(matches!(apply_op(&provider, &create), Err(ApplyError::Permanent(_))));
    }

    #[test]
    fn test_command_whitespace_ignored_in_diff() {
        let host = Arc::new(MemoryBackend::new());
        let provider = HostProvider::<StartupRules>::new(host);
        apply_op(
            &provider,
            &op(
                Subsystem::Startup,
                "Tray",
                DiffKind::Create,
                Some(json!({"command": "C:\\tray.exe ", "location": "user_run"})),
            ),
        )
        .unwrap();
        let desired = section(
            Subsystem::Startup,
            vec![("Tray", json!({"command": "C:\\tray.exe", "location": "user_run"}))],
        );
        let live = provider.read_live(&Scope::of(&desired)).unwrap();
        assert_eq!(provider.diff(&desired, &live)[0].kind, DiffKind::Noop);
    }
}
