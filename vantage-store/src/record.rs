use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// A node as returned by the graph store: internal identity, labels and properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreNode {
    pub id: i64,
    pub labels: Vec<String>,
    #[serde(default)]
    pub properties: Map<String, JsonValue>,
}

impl StoreNode {
    pub fn new(id: i64, label: &str) -> Self {
        Self {
            id,
            labels: vec![label.to_string()],
            properties: Map::new(),
        }
    }

    pub fn with_property(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// A relationship as returned by the graph store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRelationship {
    pub id: i64,
    pub start: i64,
    pub end: i64,
    pub rel_type: String,
    #[serde(default)]
    pub properties: Map<String, JsonValue>,
}

impl StoreRelationship {
    pub fn new(id: i64, start: i64, end: i64, rel_type: &str) -> Self {
        Self {
            id,
            start,
            end,
            rel_type: rel_type.to_string(),
            properties: Map::new(),
        }
    }
}

/// One column value of a result record.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Node(StoreNode),
    Relationship(StoreRelationship),
    Scalar(JsonValue),
    Null,
}

impl Value {
    pub fn as_node(&self) -> Option<&StoreNode> {
        match self {
            Value::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Scalar(v) => v.as_i64(),
            _ => None,
        }
    }
}

/// An ordered mapping from result column name to value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    columns: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: Value) -> Self {
        self.push(column, value);
        self
    }

    pub fn push(&mut self, column: &str, value: Value) {
        self.columns.push((column.to_string(), value));
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// A declarative query plus its bound parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    pub text: String,
    pub params: Map<String, JsonValue>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Map::new(),
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}
