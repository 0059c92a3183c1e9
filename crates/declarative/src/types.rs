//! Core types for declarative host reconciliation

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Attribute map of a resource, in declaration order
pub type Attributes = Map<String, Value>;

/// A managed subsystem of the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subsystem {
    Users,
    Environment,
    Registry,
    Permissions,
    Software,
    Services,
    Firewall,
    Startup,
}

impl Subsystem {
    /// Fixed order in which providers run.
    ///
    /// Accounts exist before anything references them, environment and
    /// registry before software that reads them, services before the
    /// firewall rules that expose them.
    pub const DEPENDENCY_ORDER: [Self; 8] = [
        Self::Users,
        Self::Environment,
        Self::Registry,
        Self::Permissions,
        Self::Software,
        Self::Services,
        Self::Firewall,
        Self::Startup,
    ];

    /// Wire name used as the top-level document key
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Environment => "environment",
            Self::Registry => "registry",
            Self::Permissions => "permissions",
            Self::Software => "software",
            Self::Services => "services",
            Self::Firewall => "firewall",
            Self::Startup => "startup",
        }
    }

    /// Look up a subsystem by its wire name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::DEPENDENCY_ORDER
            .into_iter()
            .find(|s| s.as_str() == name)
    }

    /// Position in [`Self::DEPENDENCY_ORDER`]
    pub fn position(&self) -> usize {
        Self::DEPENDENCY_ORDER
            .iter()
            .position(|s| s == self)
            .unwrap_or(usize::MAX)
    }

    /// How resource identifiers compare within this subsystem
    pub fn id_case(&self) -> IdCase {
        match self {
            // Rule names are matched exactly by the firewall API
            Self::Firewall => IdCase::Sensitive,
            _ => IdCase::Insensitive,
        }
    }

    /// Comma-separated list of all wire names, for error messages
    pub fn names() -> String {
        Self::DEPENDENCY_ORDER
            .iter()
            .map(Self::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Subsystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
            .ok_or_else(|| format!("unknown subsystem '{s}' (expected one of: {})", Self::names()))
    }
}

/// Identifier comparison rule of a subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdCase {
    Sensitive,
    Insensitive,
}

impl IdCase {
    /// Canonical lookup key for an identifier
    pub fn key(&self, id: &str) -> String {
        match self {
            Self::Sensitive => id.to_string(),
            Self::Insensitive => id.to_lowercase(),
        }
    }

    /// Whether two identifiers name the same resource
    pub fn matches(&self, a: &str, b: &str) -> bool {
        match self {
            Self::Sensitive => a == b,
            Self::Insensitive => a.to_lowercase() == b.to_lowercase(),
        }
    }
}

/// Run-wide failure handling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailurePolicy {
    /// First failure aborts the run and rolls back every change made so far
    #[default]
    FailFast,
    /// Failures are recorded and the run continues
    BestEffort,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FailFast => "FAIL_FAST",
            Self::BestEffort => "BEST_EFFORT",
        })
    }
}

/// One declared resource within a section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub id: String,
    /// Declared attributes, already checked against the schema
    pub attributes: Attributes,
}

impl ResourceDescriptor {
    pub fn new(id: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            id: id.into(),
            attributes,
        }
    }

    /// Attributes with the `id` field put back in front, as written in a document
    pub fn to_value(&self) -> Value {
        let mut map = Map::with_capacity(self.attributes.len() + 1);
        map.insert("id".to_string(), Value::String(self.id.clone()));
        for (k, v) in &self.attributes {
            map.insert(k.clone(), v.clone());
        }
        Value::Object(map)
    }
}

/// Observed state of one resource on the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveResourceState {
    pub id: String,
    pub exists: bool,
    #[serde(default)]
    pub attributes: Attributes,
}

impl LiveResourceState {
    pub fn present(id: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            id: id.into(),
            exists: true,
            attributes,
        }
    }

    pub fn absent(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            exists: false,
            attributes: Attributes::new(),
        }
    }
}

/// The declared state of one subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub subsystem: Subsystem,
    /// Live resources of the managed portion not declared here are deleted
    pub authoritative: bool,
    pub resources: Vec<ResourceDescriptor>,
}

impl Section {
    pub fn new(subsystem: Subsystem) -> Self {
        Self {
            subsystem,
            authoritative: false,
            resources: Vec::new(),
        }
    }

    /// Find a declared resource using the subsystem's case rule
    pub fn find(&self, id: &str) -> Option<&ResourceDescriptor> {
        let case = self.subsystem.id_case();
        self.resources.iter().find(|r| case.matches(&r.id, id))
    }

    /// Declared identifiers, in order
    pub fn ids(&self) -> Vec<String> {
        self.resources.iter().map(|r| r.id.clone()).collect()
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("authoritative".to_string(), Value::Bool(self.authoritative));
        map.insert(
            "resources".to_string(),
            Value::Array(self.resources.iter().map(ResourceDescriptor::to_value).collect()),
        );
        Value::Object(map)
    }
}

/// A validated desired-state document.
///
/// Only produced by [`crate::validate`]; immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    sections: Vec<Section>,
}

impl ConfigDocument {
    pub(crate) fn from_sections(sections: Vec<Section>) -> Self {
        Self { sections }
    }

    /// Sections in document order
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, subsystem: Subsystem) -> Option<&Section> {
        self.sections.iter().find(|s| s.subsystem == subsystem)
    }

    /// Sections present in the document, in dependency order
    pub fn ordered_sections(&self) -> Vec<&Section> {
        Subsystem::DEPENDENCY_ORDER
            .iter()
            .filter_map(|s| self.section(*s))
            .collect()
    }

    pub fn subsystems(&self) -> Vec<Subsystem> {
        self.ordered_sections().iter().map(|s| s.subsystem).collect()
    }

    pub fn resource_count(&self) -> usize {
        self.sections.iter().map(|s| s.resources.len()).sum()
    }

    /// Re-serialize to the raw document shape; validating the result
    /// yields an equal document.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        for section in &self.sections {
            map.insert(section.subsystem.as_str().to_string(), section.to_value());
        }
        Value::Object(map)
    }
}
