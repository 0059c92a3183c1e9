//! Schema nodes describing the shape of a desired-state document

mod document;

pub use document::{DocumentSchema, document_schema};

use regex::Regex;
use serde_json::{Map, Value, json};

/// Shape of a value
#[derive(Debug, Clone)]
pub enum Kind {
    String { pattern: Option<Regex> },
    Integer { min: Option<i64>, max: Option<i64> },
    Boolean,
    /// String or integer
    Scalar,
    List(Box<SchemaNode>),
    Object(Vec<Field>),
}

/// A named field of an object node
#[derive(Debug, Clone)]
pub struct Field {
    pub name: &'static str,
    pub node: SchemaNode,
}

/// Build a named field
pub fn field(name: &'static str, node: SchemaNode) -> Field {
    Field { name, node }
}

/// A node of the document schema
#[derive(Debug, Clone)]
pub struct SchemaNode {
    pub kind: Kind,
    pub required: bool,
    pub default: Option<Value>,
    pub allowed: Option<&'static [&'static str]>,
    pub description: &'static str,
}

impl SchemaNode {
    fn of(kind: Kind) -> Self {
        Self {
            kind,
            required: false,
            default: None,
            allowed: None,
            description: "",
        }
    }

    pub fn string() -> Self {
        Self::of(Kind::String { pattern: None })
    }

    pub fn integer() -> Self {
        Self::of(Kind::Integer {
            min: None,
            max: None,
        })
    }

    pub fn boolean() -> Self {
        Self::of(Kind::Boolean)
    }

    pub fn scalar() -> Self {
        Self::of(Kind::Scalar)
    }

    pub fn list(item: Self) -> Self {
        Self::of(Kind::List(Box::new(item)))
    }

    pub fn object(fields: Vec<Field>) -> Self {
        Self::of(Kind::Object(fields))
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Restrict a string to a fixed set of values
    pub fn one_of(mut self, allowed: &'static [&'static str]) -> Self {
        self.allowed = Some(allowed);
        self
    }

    /// Inclusive integer range
    pub fn range(mut self, lo: i64, hi: i64) -> Self {
        if let Kind::Integer { min, max } = &mut self.kind {
            *min = Some(lo);
            *max = Some(hi);
        }
        self
    }

    /// Anchored regular expression a string must match.
    ///
    /// Patterns are compiled once when the static schema is built.
    pub fn pattern(mut self, pattern: &'static str) -> Self {
        if let Kind::String { pattern: p } = &mut self.kind {
            *p = Some(Regex::new(pattern).expect("schema patterns are static and valid"));
        }
        self
    }

    pub fn describe(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Look up a field of an object node
    pub fn field(&self, name: &str) -> Option<&Self> {
        match &self.kind {
            Kind::Object(fields) => fields.iter().find(|f| f.name == name).map(|f| &f.node),
            _ => None,
        }
    }

    /// Item node of a list node
    pub fn item(&self) -> Option<&Self> {
        match &self.kind {
            Kind::List(item) => Some(item),
            _ => None,
        }
    }

    /// Human name of the expected type
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            Kind::String { .. } => "string",
            Kind::Integer { .. } => "integer",
            Kind::Boolean => "boolean",
            Kind::Scalar => "string or integer",
            Kind::List(_) => "list",
            Kind::Object(_) => "object",
        }
    }

    /// Describe this node as JSON, for printing the schema
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        out.insert("type".into(), json!(self.type_name()));
        if self.required {
            out.insert("required".into(), json!(true));
        }
        if let Some(default) = &self.default {
            out.insert("default".into(), default.clone());
        }
        if let Some(allowed) = self.allowed {
            out.insert("allowed".into(), json!(allowed));
        }
        if !self.description.is_empty() {
            out.insert("description".into(), json!(self.description));
        }
        match &self.kind {
            Kind::String { pattern: Some(p) } => {
                out.insert("pattern".into(), json!(p.as_str()));
            }
            Kind::Integer { min, max } => {
                if let Some(min) = min {
                    out.insert("min".into(), json!(min));
                }
                if let Some(max) = max {
                    out.insert("max".into(), json!(max));
                }
            }
            Kind::List(item) => {
                out.insert("items".into(), item.to_json());
            }
            Kind::Object(fields) => {
                let mut props = Map::new();
                for f in fields {
                    props.insert(f.name.to_string(), f.node.to_json());
                }
                out.insert("fields".into(), Value::Object(props));
            }
            _ => {}
        }
        Value::Object(out)
    }
}
