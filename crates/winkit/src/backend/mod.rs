//! Backend abstraction for host operations.
//!
//! The [`Backend`] trait defines the interface for reading and changing the
//! host, allowing for different implementations (PowerShell on a real host,
//! in-memory for tests and simulation).

pub mod memory;
pub mod powershell;

use crate::error::{Error, Result};
use crate::types::{EnvScope, Record, RecordKind, registry_key};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Group given to firewall rules this tool creates; the managed portion of
/// the firewall.
pub const MANAGED_FIREWALL_GROUP: &str = "winconf";

/// What a [`Backend::list`] call must return.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Identifiers asked for by name
    pub ids: Vec<String>,
    /// Also return the managed portion around those identifiers
    pub enumerate: bool,
}

impl ListFilter {
    /// Filter for the given identifiers only.
    pub fn ids(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
            enumerate: false,
        }
    }

    /// Whether `record` belongs in the result.
    ///
    /// The managed portion per kind:
    /// - registry values under a key that holds a listed value
    /// - firewall rules in [`MANAGED_FIREWALL_GROUP`]
    /// - variables in a scope that holds a listed variable
    /// - every local account, package and startup entry the backend reports
    /// - services and path ACLs: listed identifiers only
    pub fn admits(&self, record: &Record) -> bool {
        let kind = record.kind();
        let id = record.id();
        if self.ids.iter().any(|wanted| kind.ids_equal(wanted, id)) {
            return true;
        }
        if !self.enumerate {
            return false;
        }
        match record {
            Record::RegistryValue(value) => {
                let key = value.key().to_lowercase();
                self.ids
                    .iter()
                    .any(|wanted| registry_key(wanted).to_lowercase() == key)
            }
            Record::FirewallRule(rule) => rule.group.as_deref() == Some(MANAGED_FIREWALL_GROUP),
            Record::EnvironmentVariable(var) => {
                let scope = var.scope();
                scope.is_some()
                    && self
                        .ids
                        .iter()
                        .any(|wanted| EnvScope::split(wanted).map(|(s, _)| s) == scope)
            }
            Record::Account(_) | Record::Package(_) | Record::StartupEntry(_) => true,
            Record::Service(_) | Record::PathAcl(_) => false,
        }
    }
}

/// A host object that exists but has no faithful [`Record`] form, such as a
/// `REG_BINARY` value or an ICMP firewall rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opaque {
    /// Kind the object was listed as
    pub kind: RecordKind,
    /// Identifier the object answers to
    pub id: String,
    /// What could not be represented
    pub reason: String,
}

impl fmt::Display for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}': {}", self.kind, self.id, self.reason)
    }
}

/// Apply `filter` to what a host listed and screen out objects that cannot
/// be addressed faithfully.
///
/// An identifier shared by several host objects is treated like an opaque
/// one. Opaque objects that were only enumerated are left out; one asked
/// for by name fails the whole listing, since leaving it out would make it
/// look absent.
pub(crate) fn screen(
    kind: RecordKind,
    filter: &ListFilter,
    records: Vec<Record>,
    mut opaque: Vec<Opaque>,
) -> Result<Vec<Record>> {
    let mut records: Vec<Record> = records
        .into_iter()
        .filter(|r| r.kind() == kind && filter.admits(r))
        .collect();

    for (i, record) in records.iter().enumerate() {
        let id = record.id();
        if opaque.iter().any(|o| kind.ids_equal(&o.id, id)) {
            continue;
        }
        let count = records[i..]
            .iter()
            .filter(|r| kind.ids_equal(r.id(), id))
            .count();
        if count > 1 {
            opaque.push(Opaque {
                kind,
                id: id.to_string(),
                reason: format!("name matches {count} host objects"),
            });
        }
    }
    records.retain(|r| !opaque.iter().any(|o| kind.ids_equal(&o.id, r.id())));

    let (named, enumerated): (Vec<Opaque>, Vec<Opaque>) = opaque
        .into_iter()
        .filter(|o| o.kind == kind)
        .partition(|o| filter.ids.iter().any(|wanted| kind.ids_equal(wanted, &o.id)));
    for object in &enumerated {
        log::debug!("Leaving out {object}");
    }
    if named.is_empty() {
        Ok(records)
    } else {
        Err(Error::Unrepresentable(named))
    }
}

/// Backend trait for host operations.
///
/// This trait abstracts the underlying host access, enabling:
/// - Real execution via PowerShell scripts
/// - In-memory hosts for testing and `--simulate`
pub trait Backend: Send + Sync {
    /// Check whether the host API for `kind` can be reached.
    fn is_available(&self, kind: RecordKind) -> bool;

    /// Whether the process runs with administrative rights.
    fn is_elevated(&self) -> bool;

    /// List records of `kind` admitted by `filter`.
    fn list(&self, kind: RecordKind, filter: &ListFilter) -> Result<Vec<Record>>;

    /// Read one record.
    fn get(&self, kind: RecordKind, id: &str) -> Result<Option<Record>> {
        Ok(self
            .list(kind, &ListFilter::ids([id]))?
            .into_iter()
            .find(|r| kind.ids_equal(r.id(), id)))
    }

    /// Create or overwrite a record.
    fn put(&self, record: &Record, timeout: Duration) -> Result<()>;

    /// Remove a record; `NotFound` if it does not exist.
    fn remove(&self, kind: RecordKind, id: &str, timeout: Duration) -> Result<()>;
}

/// Get the default backend (PowerShell on the local host).
pub fn default_backend() -> Result<powershell::PowerShellBackend> {
    powershell::PowerShellBackend::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, Direction, EnvironmentVariable, FirewallRule, Protocol};

    fn rule(id: &str, group: Option<&str>) -> Record {
        Record::FirewallRule(FirewallRule {
            id: id.into(),
            direction: Direction::Inbound,
            action: Action::Allow,
            protocol: Protocol::Tcp,
            port: None,
            program: None,
            enabled: true,
            group: group.map(String::from),
        })
    }

    fn var(id: &str) -> Record {
        Record::EnvironmentVariable(EnvironmentVariable {
            id: id.into(),
            value: "x".into(),
            expand: false,
        })
    }

    fn opaque(id: &str) -> Opaque {
        Opaque {
            kind: RecordKind::FirewallRule,
            id: id.into(),
            reason: "protocol icmpv4".into(),
        }
    }

    #[test]
    fn test_screen_rejects_named_opaque_object() {
        let filter = ListFilter::ids(["allow-http", "ping"]);
        let err = screen(
            RecordKind::FirewallRule,
            &filter,
            vec![rule("allow-http", None)],
            vec![opaque("ping")],
        )
        .unwrap_err();
        assert!(matches!(&err, Error::Unrepresentable(objects) if objects[0].id == "ping"));
        assert_eq!(err.to_string(), "cannot represent firewall rule 'ping': protocol icmpv4");
    }

    #[test]
    fn test_screen_leaves_out_enumerated_opaque_object() {
        let filter = ListFilter {
            ids: vec!["allow-http".into()],
            enumerate: true,
        };
        let records = screen(
            RecordKind::FirewallRule,
            &filter,
            vec![rule("allow-http", None)],
            vec![opaque("ping")],
        )
        .unwrap();
        assert_eq!(records, vec![rule("allow-http", None)]);
    }

    #[test]
    fn test_screen_rejects_ambiguous_name() {
        let filter = ListFilter::ids(["Firefox"]);
        let err = screen(
            RecordKind::FirewallRule,
            &filter,
            vec![rule("Firefox", None), rule("Firefox", None)],
            Vec::new(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("name matches 2 host objects"));

        // the same duplicates, only enumerated, are left alone
        let filter = ListFilter {
            ids: vec!["allow-http".into()],
            enumerate: true,
        };
        let records = screen(
            RecordKind::FirewallRule,
            &filter,
            vec![
                rule("Firefox", Some(MANAGED_FIREWALL_GROUP)),
                rule("Firefox", Some(MANAGED_FIREWALL_GROUP)),
                rule("allow-http", None),
            ],
            Vec::new(),
        )
        .unwrap();
        assert_eq!(records, vec![rule("allow-http", None)]);
    }

    #[test]
    fn test_listed_ids_only() {
        let filter = ListFilter::ids(["allow-http"]);
        assert!(filter.admits(&rule("allow-http", None)));
        assert!(!filter.admits(&rule("Allow-HTTP", None)));
        assert!(!filter.admits(&rule("other", Some(MANAGED_FIREWALL_GROUP))));
    }

    #[test]
    fn test_enumerate_managed_firewall_group() {
        let filter = ListFilter {
            ids: vec!["allow-http".into()],
            enumerate: true,
        };
        assert!(filter.admits(&rule("legacy-5000", Some(MANAGED_FIREWALL_GROUP))));
        assert!(!filter.admits(&rule("Core Networking", Some("Core Networking"))));
    }

    #[test]
    fn test_enumerate_environment_scope() {
        let filter = ListFilter {
            ids: vec!["user:EDITOR".into()],
            enumerate: true,
        };
        assert!(filter.admits(&var("USER:PAGER")));
        assert!(!filter.admits(&var("system:PATH")));
    }
}
