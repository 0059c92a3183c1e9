//! Core types for Windows host records.
//!
//! Every record carries its identifier in `id`, in the same shape the
//! desired-state document uses (`HKLM\Software\Acme\Level`, `user:PATH`,
//! a rule or service name, ...). Records convert to and from flat
//! attribute maps so callers never need to know the per-kind layout.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Kind of host object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// A named value under a registry key
    RegistryValue,
    /// A Windows Defender Firewall rule
    FirewallRule,
    /// A Windows service
    Service,
    /// A local user or group
    Account,
    /// A user or machine environment variable
    EnvironmentVariable,
    /// Owner, inheritance and explicit rules of a path
    PathAcl,
    /// An installed package
    Package,
    /// A Run-key startup entry
    StartupEntry,
}

impl RecordKind {
    /// All kinds.
    pub const ALL: [RecordKind; 8] = [
        RecordKind::RegistryValue,
        RecordKind::FirewallRule,
        RecordKind::Service,
        RecordKind::Account,
        RecordKind::EnvironmentVariable,
        RecordKind::PathAcl,
        RecordKind::Package,
        RecordKind::StartupEntry,
    ];

    /// Human-readable name.
    pub fn label(&self) -> &'static str {
        match self {
            RecordKind::RegistryValue => "registry value",
            RecordKind::FirewallRule => "firewall rule",
            RecordKind::Service => "service",
            RecordKind::Account => "account",
            RecordKind::EnvironmentVariable => "environment variable",
            RecordKind::PathAcl => "path acl",
            RecordKind::Package => "package",
            RecordKind::StartupEntry => "startup entry",
        }
    }

    /// Whether identifiers of this kind compare case-sensitively.
    ///
    /// Only firewall rule names do; everything else on Windows is
    /// case-insensitive.
    pub fn case_sensitive(&self) -> bool {
        matches!(self, RecordKind::FirewallRule)
    }

    /// Compare two identifiers under this kind's case rule.
    pub fn ids_equal(&self, a: &str, b: &str) -> bool {
        if self.case_sensitive() {
            a == b
        } else {
            a.to_lowercase() == b.to_lowercase()
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Registry value type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryType {
    /// REG_SZ
    #[default]
    String,
    /// REG_EXPAND_SZ
    ExpandString,
    /// REG_DWORD
    Dword,
    /// REG_QWORD
    Qword,
}

impl RegistryType {
    /// Whether this type stores a number.
    pub fn is_numeric(&self) -> bool {
        matches!(self, RegistryType::Dword | RegistryType::Qword)
    }
}

/// Registry value data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegistryData {
    /// Signed number
    Integer(i64),
    /// Number above `i64::MAX` (QWORD only)
    Unsigned(u64),
    /// String data
    Text(String),
}

/// A named registry value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryValue {
    /// `HIVE\key\...\value`
    pub id: String,
    /// Value type
    #[serde(rename = "type", default)]
    pub value_type: RegistryType,
    /// Value data
    pub data: RegistryData,
}

impl RegistryValue {
    /// The key path (everything before the last separator).
    pub fn key(&self) -> &str {
        registry_key(&self.id)
    }

    /// The value name (everything after the last separator).
    pub fn name(&self) -> &str {
        self.id.rsplit_once('\\').map_or("", |(_, name)| name)
    }

    /// Check that data matches the declared type.
    pub fn check(&self) -> Result<()> {
        let numeric = matches!(self.data, RegistryData::Integer(_) | RegistryData::Unsigned(_));
        if numeric != self.value_type.is_numeric() {
            return Err(Error::invalid(format!(
                "{}: data does not match type {:?}",
                self.id, self.value_type
            )));
        }
        match (self.value_type, &self.data) {
            (RegistryType::Dword, RegistryData::Integer(n)) if !(0..=i64::from(u32::MAX)).contains(n) => {
                Err(Error::invalid(format!("{}: {n} does not fit a DWORD", self.id)))
            }
            (RegistryType::Dword, RegistryData::Unsigned(n)) => {
                Err(Error::invalid(format!("{}: {n} does not fit a DWORD", self.id)))
            }
            (RegistryType::Qword, RegistryData::Integer(n)) if *n < 0 => {
                Err(Error::invalid(format!("{}: QWORD data cannot be negative", self.id)))
            }
            _ => Ok(()),
        }
    }
}

/// Key portion of a registry value path.
pub fn registry_key(id: &str) -> &str {
    id.rsplit_once('\\').map_or(id, |(key, _)| key)
}

// ============================================================================
// Firewall
// ============================================================================

/// Traffic direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Inbound traffic
    Inbound,
    /// Outbound traffic
    Outbound,
}

/// Rule action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Allow matching traffic
    Allow,
    /// Block matching traffic
    Block,
}

/// Transport protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// TCP
    #[default]
    Tcp,
    /// UDP
    Udp,
    /// Any protocol
    Any,
}

/// A firewall rule, addressed by display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    /// Rule display name
    pub id: String,
    /// Traffic direction
    pub direction: Direction,
    /// Allow or block
    pub action: Action,
    /// Transport protocol
    #[serde(default)]
    pub protocol: Protocol,
    /// Local port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Program path the rule is limited to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    /// Whether the rule is active
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// Rule group; rules created by this crate's callers carry a managed group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

// ============================================================================
// Services
// ============================================================================

/// Service start type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartType {
    /// Started at boot
    Automatic,
    /// Started shortly after boot
    Delayed,
    /// Started on demand
    Manual,
    /// Cannot be started
    Disabled,
}

/// Service run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    /// Running
    Running,
    /// Stopped
    Stopped,
}

/// Configuration of a Windows service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name
    pub id: String,
    /// Start type
    pub start_type: StartType,
    /// Run state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ServiceState>,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Executable path with arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<String>,
}

// ============================================================================
// Accounts
// ============================================================================

/// Local account kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    /// A local user
    #[default]
    User,
    /// A local group
    Group,
}

/// A local user or group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalAccount {
    /// Account name
    pub id: String,
    /// User or group
    #[serde(default)]
    pub kind: AccountKind,
    /// Full name (users only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the account can sign in (always true for groups)
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// Local groups the user belongs to
    #[serde(default)]
    pub groups: Vec<String>,
}

// ============================================================================
// Environment
// ============================================================================

/// Environment variable scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvScope {
    /// Current user (`HKCU\Environment`)
    User,
    /// Machine-wide
    System,
}

impl EnvScope {
    /// Split a `scope:NAME` identifier.
    pub fn split(id: &str) -> Option<(EnvScope, &str)> {
        let (scope, name) = id.split_once(':')?;
        let scope = match scope.to_lowercase().as_str() {
            "user" => EnvScope::User,
            "system" => EnvScope::System,
            _ => return None,
        };
        Some((scope, name))
    }
}

/// A persistent environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    /// `user:NAME` or `system:NAME`
    pub id: String,
    /// Value
    pub value: String,
    /// Stored as an expandable string
    #[serde(default)]
    pub expand: bool,
}

impl EnvironmentVariable {
    /// Scope of the variable, if the identifier is well-formed.
    pub fn scope(&self) -> Option<EnvScope> {
        EnvScope::split(&self.id).map(|(scope, _)| scope)
    }
}

// ============================================================================
// Permissions
// ============================================================================

/// File system rights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rights {
    /// Read
    Read,
    /// Read and execute
    ReadExecute,
    /// Write
    Write,
    /// Modify
    Modify,
    /// Full control
    FullControl,
}

/// Allow or deny.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Allow
    #[default]
    Allow,
    /// Deny
    Deny,
}

/// One explicit access rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    /// Account or group the rule applies to
    pub identity: String,
    /// Granted or denied rights
    pub rights: Rights,
    /// Allow or deny
    #[serde(default)]
    pub access: Access,
    /// Whether child objects inherit the rule
    #[serde(default = "enabled")]
    pub inherit: bool,
}

/// Owner, inheritance and explicit rules of a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathAcl {
    /// Absolute path
    pub id: String,
    /// Owner account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Whether rules are inherited from the parent
    #[serde(default = "enabled")]
    pub inheritance: bool,
    /// Explicit rules
    #[serde(default)]
    pub rules: Vec<AccessRule>,
}

// ============================================================================
// Software
// ============================================================================

/// Package source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageSource {
    /// The winget community repository
    #[default]
    Winget,
    /// The Microsoft Store
    Msstore,
}

/// An installed package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftwarePackage {
    /// Package identifier
    pub id: String,
    /// Installed (or pinned) version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Source the package comes from
    #[serde(default)]
    pub source: PackageSource,
}

// ============================================================================
// Startup
// ============================================================================

/// Run key an entry lives under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupLocation {
    /// `HKCU\...\Run`
    #[default]
    UserRun,
    /// `HKLM\...\Run`
    MachineRun,
}

/// A startup entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupEntry {
    /// Entry name
    pub id: String,
    /// Command line
    pub command: String,
    /// Run key
    #[serde(default)]
    pub location: StartupLocation,
    /// Whether Explorer starts the entry
    #[serde(default = "enabled")]
    pub enabled: bool,
}

fn enabled() -> bool {
    true
}

// ============================================================================
// Record
// ============================================================================

/// Any host record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum Record {
    /// Registry value
    RegistryValue(RegistryValue),
    /// Firewall rule
    FirewallRule(FirewallRule),
    /// Service
    Service(ServiceConfig),
    /// Local account
    Account(LocalAccount),
    /// Environment variable
    EnvironmentVariable(EnvironmentVariable),
    /// Path ACL
    PathAcl(PathAcl),
    /// Package
    Package(SoftwarePackage),
    /// Startup entry
    StartupEntry(StartupEntry),
}

impl Record {
    /// The record's identifier.
    pub fn id(&self) -> &str {
        match self {
            Record::RegistryValue(r) => &r.id,
            Record::FirewallRule(r) => &r.id,
            Record::Service(r) => &r.id,
            Record::Account(r) => &r.id,
            Record::EnvironmentVariable(r) => &r.id,
            Record::PathAcl(r) => &r.id,
            Record::Package(r) => &r.id,
            Record::StartupEntry(r) => &r.id,
        }
    }

    /// The record's kind.
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::RegistryValue(_) => RecordKind::RegistryValue,
            Record::FirewallRule(_) => RecordKind::FirewallRule,
            Record::Service(_) => RecordKind::Service,
            Record::Account(_) => RecordKind::Account,
            Record::EnvironmentVariable(_) => RecordKind::EnvironmentVariable,
            Record::PathAcl(_) => RecordKind::PathAcl,
            Record::Package(_) => RecordKind::Package,
            Record::StartupEntry(_) => RecordKind::StartupEntry,
        }
    }

    /// Build a record from an object that includes `id`.
    pub fn from_object(kind: RecordKind, object: Map<String, Value>) -> Result<Self> {
        let value = Value::Object(object);
        let record = match kind {
            RecordKind::RegistryValue => {
                let value: RegistryValue = parse(kind, value)?;
                value.check()?;
                Record::RegistryValue(value)
            }
            RecordKind::FirewallRule => Record::FirewallRule(parse(kind, value)?),
            RecordKind::Service => Record::Service(parse(kind, value)?),
            RecordKind::Account => Record::Account(parse(kind, value)?),
            RecordKind::EnvironmentVariable => {
                let var: EnvironmentVariable = parse(kind, value)?;
                if var.scope().is_none() {
                    return Err(Error::invalid(format!(
                        "'{}' is not a user: or system: variable",
                        var.id
                    )));
                }
                Record::EnvironmentVariable(var)
            }
            RecordKind::PathAcl => Record::PathAcl(parse(kind, value)?),
            RecordKind::Package => Record::Package(parse(kind, value)?),
            RecordKind::StartupEntry => Record::StartupEntry(parse(kind, value)?),
        };
        Ok(record)
    }

    /// Build a record from an identifier and its attribute map.
    pub fn from_attributes(kind: RecordKind, id: &str, attributes: &Map<String, Value>) -> Result<Self> {
        let mut object = Map::with_capacity(attributes.len() + 1);
        object.insert("id".to_string(), Value::String(id.to_string()));
        for (key, value) in attributes {
            if key != "id" && !value.is_null() {
                object.insert(key.clone(), value.clone());
            }
        }
        Self::from_object(kind, object)
    }

    /// The record's attributes, without `id`.
    pub fn to_attributes(&self) -> Map<String, Value> {
        let value = match self {
            Record::RegistryValue(r) => serde_json::to_value(r),
            Record::FirewallRule(r) => serde_json::to_value(r),
            Record::Service(r) => serde_json::to_value(r),
            Record::Account(r) => serde_json::to_value(r),
            Record::EnvironmentVariable(r) => serde_json::to_value(r),
            Record::PathAcl(r) => serde_json::to_value(r),
            Record::Package(r) => serde_json::to_value(r),
            Record::StartupEntry(r) => serde_json::to_value(r),
        };
        let mut map = match value {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        map.shift_remove("id");
        map
    }
}

fn parse<T: DeserializeOwned>(kind: RecordKind, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::invalid(format!("malformed {kind}: {e}")))
}
