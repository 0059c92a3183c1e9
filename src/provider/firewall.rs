//! Firewall rules
//!
//! Rules this tool creates are put in [`MANAGED_FIREWALL_GROUP`]; an
//! authoritative firewall section only ever deletes rules from that group.

use super::{SubsystemRules, default_attribute};
use declarative::{ApplyError, Attributes, DiffKind, Subsystem};
use serde_json::Value;
use winkit::{MANAGED_FIREWALL_GROUP, RecordKind};

pub struct FirewallRules;

impl SubsystemRules for FirewallRules {
    const SUBSYSTEM: Subsystem = Subsystem::Firewall;
    const KIND: RecordKind = RecordKind::FirewallRule;

    fn prepare(kind: DiffKind, id: &str, target: &mut Attributes) -> Result<(), ApplyError> {
        let protocol = target.get("protocol").and_then(Value::as_str).unwrap_or("tcp");
        if protocol == "any" && target.get("port").is_some_and(|p| !p.is_null()) {
            return Err(ApplyError::Permanent(format!(
                "rule '{id}': a port needs protocol tcp or udp"
            )));
        }
        if kind == DiffKind::Create {
            default_attribute(target, "group", Value::String(MANAGED_FIREWALL_GROUP.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::HostProvider;
    use crate::provider::tests::{apply_op, op};
    use declarative::{Provider, Scope};
    use serde_json::json;
    use std::sync::Arc;
    use winkit::{MemoryBackend, Record};

    #[test]
    fn test_created_rules_join_managed_group() {
        let host = Arc::new(MemoryBackend::new());
        let provider = HostProvider::<FirewallRules>::new(host.clone());
        let create = op(
            Subsystem::Firewall,
            "allow-http",
            DiffKind::Create,
            Some(json!({"direction": "inbound", "action": "allow", "protocol": "tcp", "port": 80})),
        );
        apply_op(&provider, &create).unwrap();

        let records = host.records(RecordKind::FirewallRule);
        let Record::FirewallRule(rule) = &records[0] else {
            panic!("expected a firewall rule");
        };
        assert_eq!(rule.group.as_deref(), Some(MANAGED_FIREWALL_GROUP));
        assert_eq!(rule.port, Some(80));

        // an authoritative scope with no declared rules still sees it
        let live = provider
            .read_live(&Scope {
                ids: Vec::new(),
                enumerate: true,
            })
            .unwrap();
        assert_eq!(live.len(), 1);
    }

    #[test]
    fn test_port_with_any_protocol_rejected() {
        let provider = HostProvider::<FirewallRules>::new(Arc::new(MemoryBackend::new()));
        let create = op(
            Subsystem::Firewall,
            "weird",
            DiffKind::Create,
            Some(json!({"direction": "inbound", "action": "block", "protocol": "any", "port": 22})),
        );
        assert!(matches!(apply_op(&provider, &create), Err(ApplyError::Permanent(_))));
    }

    #[test]
    fn test_unmanaged_rules_are_not_enumerated() {
        let host = Arc::new(MemoryBackend::new());
        host.insert(
            Record::from_attributes(
                RecordKind::FirewallRule,
                "Core Networking",
                json!({"direction": "outbound", "action": "allow"}).as_object().unwrap(),
            )
            .unwrap(),
        );
        let provider = HostProvider::<FirewallRules>::new(host);
        let live = provider
            .read_live(&Scope {
                ids: Vec::new(),
                enumerate: true,
            })
            .unwrap();
        assert!(live.is_empty());
    }
}
