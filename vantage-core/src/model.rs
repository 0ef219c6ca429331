use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Organization,
    Subnet,
    #[serde(rename = "IP")]
    Ip,
    DomainName,
    Node,
    Host,
    SoftwareVersion,
    NetworkService,
    Vulnerability,
    #[serde(rename = "CVE")]
    Cve,
    Compound,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Organization => "Organization",
            NodeType::Subnet => "Subnet",
            NodeType::Ip => "IP",
            NodeType::DomainName => "DomainName",
            NodeType::Node => "Node",
            NodeType::Host => "Host",
            NodeType::SoftwareVersion => "SoftwareVersion",
            NodeType::NetworkService => "NetworkService",
            NodeType::Vulnerability => "Vulnerability",
            NodeType::Cve => "CVE",
            NodeType::Compound => "Compound",
        }
    }

    /// Map a graph store label onto a node type. Compound nodes never come from the store.
    pub fn from_store_label(label: &str) -> Option<Self> {
        match label {
            "OrganizationUnit" | "Organization" => Some(NodeType::Organization),
            "Subnet" => Some(NodeType::Subnet),
            "IP" => Some(NodeType::Ip),
            "DomainName" => Some(NodeType::DomainName),
            "Node" => Some(NodeType::Node),
            "Host" => Some(NodeType::Host),
            "SoftwareVersion" => Some(NodeType::SoftwareVersion),
            "NetworkService" => Some(NodeType::NetworkService),
            "Vulnerability" => Some(NodeType::Vulnerability),
            "CVE" => Some(NodeType::Cve),
            _ => None,
        }
    }

    /// Attribute types grouped under the vulnerability compound of an IP.
    pub fn is_vulnerability_group(&self) -> bool {
        matches!(
            self,
            NodeType::Vulnerability
                | NodeType::NetworkService
                | NodeType::Cve
                | NodeType::SoftwareVersion
        )
    }

    /// Types whose presence marks an IP expansion as carrying vulnerability data.
    pub fn is_vulnerability_data(&self) -> bool {
        matches!(
            self,
            NodeType::Vulnerability | NodeType::NetworkService | NodeType::Cve
        )
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Secondary display value of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Details {
    Text(String),
    List(Vec<String>),
}

/// Denormalized summary of the device behind an IP.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default)]
    pub domain_names: Vec<String>,
    #[serde(default)]
    pub software: Vec<String>,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub cves: Vec<String>,
    #[serde(default)]
    pub vulnerable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Details>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosts: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vulns: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_data: Option<DeviceData>,
}

impl GraphNode {
    pub fn new(id: impl Into<String>, node_type: NodeType, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type,
            label: label.into(),
            details: None,
            hosts: None,
            vulns: None,
            parent: None,
            device_data: None,
        }
    }

    pub fn with_details(mut self, details: Details) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    #[serde(default)]
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "type", default)]
    pub edge_type: String,
}

impl GraphEdge {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        edge_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            edge_type: edge_type.into(),
        }
    }

    /// Whether this edge joins the same two endpoints as `(a, b)`, in either direction.
    pub fn joins(&self, a: &str, b: &str) -> bool {
        (self.source == a && self.target == b) || (self.source == b && self.target == a)
    }
}

/// A node or edge upsert, as produced by expansion and consumed by the cache.
///
/// Edges are tried first when decoding so that anything carrying `source` and
/// `target` is treated as an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Element {
    Edge(GraphEdge),
    Node(GraphNode),
}

impl Element {
    pub fn as_node(&self) -> Option<&GraphNode> {
        match self {
            Element::Node(node) => Some(node),
            Element::Edge(_) => None,
        }
    }

    pub fn as_edge(&self) -> Option<&GraphEdge> {
        match self {
            Element::Edge(edge) => Some(edge),
            Element::Node(_) => None,
        }
    }
}

impl From<GraphNode> for Element {
    fn from(node: GraphNode) -> Self {
        Element::Node(node)
    }
}

impl From<GraphEdge> for Element {
    fn from(edge: GraphEdge) -> Self {
        Element::Edge(edge)
    }
}

/// Identifies something to collapse: a node by id or an edge by its endpoint pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ElementRef {
    Edge { source: String, target: String },
    Node { id: String },
}

impl ElementRef {
    pub fn node(id: impl Into<String>) -> Self {
        ElementRef::Node { id: id.into() }
    }

    pub fn edge(source: impl Into<String>, target: impl Into<String>) -> Self {
        ElementRef::Edge {
            source: source.into(),
            target: target.into(),
        }
    }
}

impl From<&Element> for ElementRef {
    fn from(element: &Element) -> Self {
        match element {
            Element::Node(node) => ElementRef::node(node.id.clone()),
            Element::Edge(edge) => ElementRef::edge(edge.source.clone(), edge.target.clone()),
        }
    }
}
