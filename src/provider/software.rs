//! Installed packages
//!
//! Installers hold a machine-wide lock, so package ops always run one at a
//! time.

use super::SubsystemRules;
use declarative::{ApplyError, Attributes, DiffKind, Subsystem};
use serde_json::Value;
use winkit::RecordKind;

pub struct SoftwareRules;

impl SubsystemRules for SoftwareRules {
    const SUBSYSTEM: Subsystem = Subsystem::Software;
    const KIND: RecordKind = RecordKind::Package;

    fn prepare(_kind: DiffKind, id: &str, target: &mut Attributes) -> Result<(), ApplyError> {
        let store = target.get("source").and_then(Value::as_str) == Some("msstore");
        if store && target.get("version").is_some_and(|v| !v.is_null()) {
            return Err(ApplyError::Permanent(format!(
                "{id}: Microsoft Store packages cannot be pinned to a version"
            )));
        }
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
    fn test_store_version_pin_rejected() {
        let provider = HostProvider::<SoftwareRules>::new(Arc::new(MemoryBackend::new()));
        let create = op(
            Subsystem::Software,
            "9NBLGGH4NNS1",
            DiffKind::Create,
            Some(json!({"source": "msstore", "version": "1.0"})),
        );
        assert!(matches!(apply_op(&provider, &create), Err(ApplyError::Permanent(_))));
    }

    #[test]
    fn test_install_then_uninstall() {
        let host = Arc::new(MemoryBackend::new());
        let provider = HostProvider::<SoftwareRules>::new(host.clone());
        let install = op(
            Subsystem::Software,
            "Git.Git",
            DiffKind::Create,
            Some(json!({"source": "winget", "version": "2.47.0"})),
        );
        assert_eq!(apply_op(&provider, &install).unwrap(), Applied::Changed);
        assert!(!provider.concurrent_safe());

        let remove = op(Subsystem::Software, "git.git", DiffKind::Delete, None);
        assert_eq!(apply_op(&provider, &remove).unwrap(), Applied::Changed);
        assert_eq!(
            host.mutations(),
            vec!["PUT package Git.Git", "REMOVE package git.git"]
        );
    }
}
