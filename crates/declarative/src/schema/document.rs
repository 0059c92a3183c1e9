//! The static schema of a desired-state document

use super::{SchemaNode, field};
use crate::types::Subsystem;
use serde_json::{Map, Value, json};
use std::sync::OnceLock;

const REGISTRY_ID: &str = r"^(?i:HKLM|HKCU|HKCR|HKU|HKCC)(\\[^\\]+){2,}$";
const ENVIRONMENT_ID: &str = r"^(?i:user|system):[^=\s][^=]*$";
const FIREWALL_ID: &str = r"^\S(.*\S)?$";
const SERVICE_ID: &str = r"^[^\\/\s][^\\/]*$";
const ACCOUNT_ID: &str = r#"^[^"/\\\[\]:;|=,+*?<>@]{1,256}$"#;
const PATH_ID: &str = r"^(?:[A-Za-z]:\\|\\\\)[^\x00]*$";
const PACKAGE_ID: &str = r"^[A-Za-z0-9][A-Za-z0-9._+\-]*$";
const STARTUP_ID: &str = r"^[^\\/]+$";

/// Per-subsystem section schemas
#[derive(Debug)]
pub struct DocumentSchema {
    sections: Vec<(Subsystem, SchemaNode)>,
}

impl DocumentSchema {
    /// Schema of a whole section (`authoritative` + `resources`)
    pub fn section(&self, subsystem: Subsystem) -> &SchemaNode {
        self.sections
            .iter()
            .find(|(s, _)| *s == subsystem)
            .map(|(_, node)| node)
            .expect("every subsystem has a section schema")
    }

    /// Schema of one resource entry of a section
    pub fn resource(&self, subsystem: Subsystem) -> &SchemaNode {
        self.section(subsystem)
            .field("resources")
            .and_then(SchemaNode::item)
            .expect("section schemas declare a resources list")
    }

    /// Whether `id` is a well-formed identifier for `subsystem`
    pub fn is_valid_id(&self, subsystem: Subsystem, id: &str) -> bool {
        match self.resource(subsystem).field("id").map(|n| &n.kind) {
            Some(super::Kind::String { pattern: Some(p) }) => p.is_match(id),
            _ => !id.is_empty(),
        }
    }

    /// The schema of every section, keyed by wire name
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (subsystem, node) in &self.sections {
            map.insert(subsystem.as_str().to_string(), node.to_json());
        }
        Value::Object(map)
    }
}

/// Process-wide document schema, built on first use
pub fn document_schema() -> &'static DocumentSchema {
    static SCHEMA: OnceLock<DocumentSchema> = OnceLock::new();
    SCHEMA.get_or_init(build)
}

fn build() -> DocumentSchema {
    let sections = Subsystem::DEPENDENCY_ORDER
        .iter()
        .map(|s| (*s, section(resource_schema(*s))))
        .collect();
    DocumentSchema { sections }
}

fn section(resource: SchemaNode) -> SchemaNode {
    SchemaNode::object(vec![
        field(
            "authoritative",
            SchemaNode::boolean()
                .default_value(false)
                .describe("Delete live resources of the managed portion that are not declared"),
        ),
        field(
            "resources",
            SchemaNode::list(resource).default_value(json!([])),
        ),
    ])
}

fn id(pattern: &'static str, description: &'static str) -> SchemaNode {
    SchemaNode::string()
        .required()
        .pattern(pattern)
        .describe(description)
}

fn optional_string() -> SchemaNode {
    SchemaNode::string()
}

fn flag(default: bool) -> SchemaNode {
    SchemaNode::boolean().default_value(default)
}

fn resource_schema(subsystem: Subsystem) -> SchemaNode {
    let fields = match subsystem {
        Subsystem::Registry => vec![
            field("id", id(REGISTRY_ID, r"Full value path, HIVE\key\...\value")),
            field(
                "type",
                SchemaNode::string()
                    .one_of(&["string", "expand_string", "dword", "qword"])
                    .default_value("string"),
            ),
            field("data", SchemaNode::scalar().required()),
        ],
        Subsystem::Firewall => vec![
            field("id", id(FIREWALL_ID, "Rule name")),
            field(
                "direction",
                SchemaNode::string()
                    .required()
                    .one_of(&["inbound", "outbound"]),
            ),
            field(
                "action",
                SchemaNode::string().required().one_of(&["allow", "block"]),
            ),
            field(
                "protocol",
                SchemaNode::string()
                    .one_of(&["tcp", "udp", "any"])
                    .default_value("tcp"),
            ),
            field("port", SchemaNode::integer().range(1, 65535)),
            field("program", optional_string().describe("Program path the rule applies to")),
            field("enabled", flag(true)),
        ],
        Subsystem::Services => vec![
            field("id", id(SERVICE_ID, "Service name")),
            field(
                "start_type",
                SchemaNode::string()
                    .required()
                    .one_of(&["automatic", "delayed", "manual", "disabled"]),
            ),
            field("state", SchemaNode::string().one_of(&["running", "stopped"])),
            field("display_name", optional_string()),
            field(
                "binary_path",
                optional_string().describe("Required to create a service"),
            ),
        ],
        Subsystem::Users => vec![
            field("id", id(ACCOUNT_ID, "Local account or group name")),
            field(
                "kind",
                SchemaNode::string()
                    .one_of(&["user", "group"])
                    .default_value("user"),
            ),
            field("full_name", optional_string()),
            field("description", optional_string()),
            field("enabled", flag(true)),
            field(
                "groups",
                SchemaNode::list(SchemaNode::string()).default_value(json!([])),
            ),
        ],
        Subsystem::Environment => vec![
            field("id", id(ENVIRONMENT_ID, "user:NAME or system:NAME")),
            field("value", SchemaNode::string().required()),
            field(
                "expand",
                flag(false).describe("Store as an expandable string (REG_EXPAND_SZ)"),
            ),
        ],
        Subsystem::Permissions => vec![
            field("id", id(PATH_ID, "Absolute filesystem path")),
            field("owner", optional_string()),
            field("inheritance", flag(true)),
            field(
                "rules",
                SchemaNode::list(SchemaNode::object(vec![
                    field("identity", SchemaNode::string().required()),
                    field(
                        "rights",
                        SchemaNode::string().required().one_of(&[
                            "read",
                            "read_execute",
                            "write",
                            "modify",
                            "full_control",
                        ]),
                    ),
                    field(
                        "access",
                        SchemaNode::string()
                            .one_of(&["allow", "deny"])
                            .default_value("allow"),
                    ),
                    field("inherit", flag(true)),
                ]))
                .default_value(json!([])),
            ),
        ],
        Subsystem::Software => vec![
            field("id", id(PACKAGE_ID, "Package identifier")),
            field("version", optional_string()),
            field(
                "source",
                SchemaNode::string()
                    .one_of(&["winget", "msstore"])
                    .default_value("winget"),
            ),
        ],
        Subsystem::Startup => vec![
            field("id", id(STARTUP_ID, "Startup entry name")),
            field("command", SchemaNode::string().required()),
            field(
                "location",
                SchemaNode::string()
                    .one_of(&["user_run", "machine_run"])
                    .default_value("user_run"),
            ),
            field("enabled", flag(true)),
        ],
    };
    SchemaNode::object(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_subsystem_has_a_resource_id() {
        let schema = document_schema();
        for s in Subsystem::DEPENDENCY_ORDER {
            let id = schema.resource(s).field("id").unwrap();
            assert!(id.required, "{s} id must be required");
        }
    }

    #[test]
    fn test_id_patterns() {
        let schema = document_schema();
        assert!(schema.is_valid_id(Subsystem::Registry, r"HKLM\Software\Acme\Level"));
        assert!(!schema.is_valid_id(Subsystem::Registry, r"HKLM\Software"));
        assert!(!schema.is_valid_id(Subsystem::Registry, r"HKXX\Software\Acme\Level"));
        assert!(schema.is_valid_id(Subsystem::Environment, "system:JAVA_HOME"));
        assert!(schema.is_valid_id(Subsystem::Environment, "User:PATH"));
        assert!(!schema.is_valid_id(Subsystem::Environment, "JAVA_HOME"));
        assert!(schema.is_valid_id(Subsystem::Permissions, r"C:\data"));
        assert!(schema.is_valid_id(Subsystem::Permissions, r"\\server\share"));
        assert!(!schema.is_valid_id(Subsystem::Permissions, "relative\\dir"));
        assert!(schema.is_valid_id(Subsystem::Firewall, "allow-http"));
        assert!(!schema.is_valid_id(Subsystem::Firewall, " padded"));
        assert!(schema.is_valid_id(Subsystem::Software, "Git.Git"));
    }

    #[test]
    fn test_schema_json_lists_all_sections() {
        let json = document_schema().to_json();
        assert_eq!(json.as_object().unwrap().len(), 8);
        assert_eq!(
            json["firewall"]["fields"]["resources"]["items"]["fields"]["port"]["max"],
            65535
        );
    }
}
