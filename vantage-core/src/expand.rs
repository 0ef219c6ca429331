//! Topology expansion: turns a typed node reference into one graph store
//! query and shapes the returned rows into cache upserts.
//!
//! Expanding an IP additionally groups its attribute chain under synthetic
//! compound nodes (`compound-<id>` and `vulnerability-compound-<id>`) so a
//! renderer can nest them visually under the owning IP.

use crate::error::{ExpansionError, ShapeError};
use crate::model::{DeviceData, Details, Element, GraphEdge, GraphNode, NodeType};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use vantage_store::{GraphStore, Query, Record, StoreNode, StoreRelationship, Value};

pub const COMPOUND_PREFIX: &str = "compound-";
pub const VULNERABILITY_COMPOUND_PREFIX: &str = "vulnerability-compound-";

const ORGANIZATION_UNITS: &str = "\
MATCH (o:OrganizationUnit)
WHERE $organization IS NULL OR o.name = $organization
OPTIONAL MATCH (o)-[r]-(p:OrganizationUnit)
RETURN o, r, p";

const ORGANIZATION_SUBNETS: &str = "\
MATCH (o:OrganizationUnit)-[r]-(s:Subnet)
WHERE id(o) = $nodeId
  AND s.range STARTS WITH $cidrBase
  AND ($excludedCidr IS NULL OR s.range <> $excludedCidr)
OPTIONAL MATCH (s)-[]-(i:IP)
OPTIONAL MATCH (i)-[*1..5]-(v:Vulnerability)
RETURN o, r, s, count(DISTINCT i) AS hosts, count(DISTINCT v) AS vulns";

const SUBNET_IPS: &str = "\
MATCH (s:Subnet)-[r]-(i:IP)
WHERE id(s) = $nodeId
OPTIONAL MATCH (i)-[*1..5]-(v:Vulnerability)
RETURN s, r, i, count(DISTINCT v) AS vulns";

const IP_CHAIN: &str = "\
MATCH (i:IP)
WHERE id(i) = $nodeId
OPTIONAL MATCH (i)-[r1]-(d:DomainName)
OPTIONAL MATCH (i)-[r2]-(n:Node)-[r3]-(h:Host)-[r4]-(sw:SoftwareVersion)
OPTIONAL MATCH (sw)-[r5]-(ns:NetworkService)
OPTIONAL MATCH (sw)-[r6]-(v:Vulnerability)-[r7]-(c:CVE)
RETURN i, r1, d, r2, n, r3, h, r4, sw, r5, ns, r6, v, r7, c
LIMIT 1";

pub fn compound_id(node_id: &str) -> String {
    format!("{}{}", COMPOUND_PREFIX, node_id)
}

pub fn vulnerability_compound_id(node_id: &str) -> String {
    format!("{}{}", VULNERABILITY_COMPOUND_PREFIX, node_id)
}

/// Node types that can be expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpandKind {
    Organization,
    Subnet,
    Ip,
}

impl FromStr for ExpandKind {
    type Err = ExpansionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "organization" | "organizationunit" => Ok(ExpandKind::Organization),
            "subnet" => Ok(ExpandKind::Subnet),
            "ip" => Ok(ExpandKind::Ip),
            _ => Err(ExpansionError::UnsupportedNodeType(s.to_string())),
        }
    }
}

impl fmt::Display for ExpandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpandKind::Organization => f.write_str("Organization"),
            ExpandKind::Subnet => f.write_str("Subnet"),
            ExpandKind::Ip => f.write_str("IP"),
        }
    }
}

/// Per-call expansion parameters.
#[derive(Debug, Clone)]
pub struct ExpandContext {
    /// Subnet ranges must start with this prefix (organization expansion).
    pub cidr_base: String,
    /// A subnet range to leave out (organization expansion).
    pub excluded_cidr: Option<String>,
    pub timeout: Duration,
}

impl Default for ExpandContext {
    fn default() -> Self {
        Self {
            cidr_base: String::new(),
            excluded_cidr: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// A query plus the column whose node receives aggregate scalars.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub query: Query,
    pub primary: &'static str,
}

pub fn top_level_plan(organization: Option<&str>) -> QueryPlan {
    QueryPlan {
        query: Query::new(ORGANIZATION_UNITS).param(
            "organization",
            organization.map_or(JsonValue::Null, JsonValue::from),
        ),
        primary: "o",
    }
}

pub fn expansion_plan(kind: ExpandKind, node_id: i64, ctx: &ExpandContext) -> QueryPlan {
    match kind {
        ExpandKind::Organization => QueryPlan {
            query: Query::new(ORGANIZATION_SUBNETS)
                .param("nodeId", node_id)
                .param("cidrBase", ctx.cidr_base.as_str())
                .param(
                    "excludedCidr",
                    ctx.excluded_cidr
                        .as_deref()
                        .map_or(JsonValue::Null, JsonValue::from),
                ),
            primary: "s",
        },
        ExpandKind::Subnet => QueryPlan {
            query: Query::new(SUBNET_IPS).param("nodeId", node_id),
            primary: "i",
        },
        ExpandKind::Ip => QueryPlan {
            query: Query::new(IP_CHAIN).param("nodeId", node_id),
            primary: "i",
        },
    }
}

pub struct ExpansionEngine<S: ?Sized> {
    store: Arc<S>,
    organization: Option<String>,
}

impl<S: GraphStore + ?Sized> ExpansionEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            organization: None,
        }
    }

    pub fn with_organization(mut self, organization: Option<String>) -> Self {
        self.organization = organization;
        self
    }

    /// Organization units and the relationships between them.
    pub async fn fetch_top_level(&self, timeout: Duration) -> Result<Vec<Element>, ExpansionError> {
        let plan = top_level_plan(self.organization.as_deref());
        let Some(records) = self.run(&plan, "top-level organizations", timeout).await? else {
            return Ok(Vec::new());
        };

        match shape_records(&records, plan.primary) {
            Ok(elements) => {
                info!("Fetched {} top-level elements", elements.len());
                Ok(elements)
            }
            Err(e) => {
                error!("Malformed top-level rows: {}", e);
                Ok(Vec::new())
            }
        }
    }

    /// Expand one node into the upserts describing its neighborhood.
    ///
    /// Store failures and malformed rows yield an empty list; only bad input
    /// and timeouts are errors.
    pub async fn expand(
        &self,
        node_id: &str,
        node_type: &str,
        ctx: &ExpandContext,
    ) -> Result<Vec<Element>, ExpansionError> {
        let kind: ExpandKind = node_type.parse()?;
        let id: i64 = node_id
            .trim()
            .parse()
            .map_err(|_| ExpansionError::InvalidNodeId(node_id.to_string()))?;

        let plan = expansion_plan(kind, id, ctx);
        let target = format!("{} {}", kind, id);
        let Some(records) = self.run(&plan, &target, ctx.timeout).await? else {
            return Ok(Vec::new());
        };

        let mut elements = match shape_records(&records, plan.primary) {
            Ok(elements) => elements,
            Err(e) => {
                error!("Malformed rows expanding {}: {}", target, e);
                return Ok(Vec::new());
            }
        };

        if kind == ExpandKind::Ip && !elements.is_empty() {
            let ip_id = id.to_string();
            attach_device_data(&ip_id, &mut elements);
            elements = synthesize_compounds(&ip_id, elements);
        }

        debug!("Expanded {} into {} elements", target, elements.len());
        Ok(elements)
    }

    async fn run(
        &self,
        plan: &QueryPlan,
        target: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<Record>>, ExpansionError> {
        match tokio::time::timeout(timeout, self.store.run(&plan.query)).await {
            Err(_) => Err(ExpansionError::Timeout {
                target: target.to_string(),
                timeout,
            }),
            Ok(Err(e)) => {
                error!("Store query for {} failed: {}", target, e);
                Ok(None)
            }
            Ok(Ok(records)) => Ok(Some(records)),
        }
    }
}

#[derive(Default)]
struct Shaped {
    nodes: Vec<GraphNode>,
    node_positions: HashMap<String, usize>,
    edges: Vec<GraphEdge>,
    edge_keys: HashSet<(String, String)>,
}

impl Shaped {
    fn push_node(&mut self, node: GraphNode) {
        if !self.node_positions.contains_key(&node.id) {
            self.node_positions.insert(node.id.clone(), self.nodes.len());
            self.nodes.push(node);
        }
    }

    fn push_edge(&mut self, edge: GraphEdge) {
        let key = if edge.source <= edge.target {
            (edge.source.clone(), edge.target.clone())
        } else {
            (edge.target.clone(), edge.source.clone())
        };
        if self.edge_keys.insert(key) {
            self.edges.push(edge);
        }
    }

    fn annotate(&mut self, id: &str, hosts: Option<u64>, vulns: Option<u64>) {
        if let Some(&pos) = self.node_positions.get(id) {
            let node = &mut self.nodes[pos];
            node.hosts = hosts.or(node.hosts);
            node.vulns = vulns.or(node.vulns);
        }
    }

    fn into_elements(self) -> Vec<Element> {
        self.nodes
            .into_iter()
            .map(Element::Node)
            .chain(self.edges.into_iter().map(Element::Edge))
            .collect()
    }
}

/// Turn store records into deduplicated node and edge upserts, nodes first.
///
/// Scalar `hosts` and `vulns` columns annotate the node found in the `primary`
/// column of the same record.
pub fn shape_records(records: &[Record], primary: &str) -> Result<Vec<Element>, ShapeError> {
    let mut shaped = Shaped::default();

    for record in records {
        let mut primary_id = None;
        let (mut hosts, mut vulns) = (None, None);

        for (column, value) in record.iter() {
            match value {
                Value::Node(node) => {
                    let node = decode_node(node)?;
                    if column == primary {
                        primary_id = Some(node.id.clone());
                    }
                    shaped.push_node(node);
                }
                Value::Relationship(rel) => shaped.push_edge(decode_relationship(rel)),
                Value::Scalar(v) => match column {
                    "hosts" => hosts = v.as_u64(),
                    "vulns" => vulns = v.as_u64(),
                    _ => {}
                },
                Value::Null => {}
            }
        }

        if let Some(id) = primary_id {
            shaped.annotate(&id, hosts, vulns);
        }
    }

    Ok(shaped.into_elements())
}

pub fn decode_relationship(rel: &StoreRelationship) -> GraphEdge {
    GraphEdge::new(
        rel.id.to_string(),
        rel.start.to_string(),
        rel.end.to_string(),
        rel.rel_type.clone(),
    )
}

/// Decode a store node by its label. Unknown labels are rejected.
pub fn decode_node(node: &StoreNode) -> Result<GraphNode, ShapeError> {
    let node_type = node
        .labels
        .iter()
        .find_map(|label| NodeType::from_store_label(label))
        .ok_or_else(|| ShapeError::UnrecognizedLabels {
            id: node.id,
            labels: node.labels.clone(),
        })?;

    match node_type {
        NodeType::Organization => decode_organization(node),
        NodeType::Subnet => decode_subnet(node),
        NodeType::Ip => decode_ip(node),
        NodeType::DomainName => decode_domain_name(node),
        NodeType::Node => Ok(decode_assignment(node)),
        NodeType::Host => Ok(decode_host(node)),
        NodeType::SoftwareVersion => decode_software_version(node),
        NodeType::NetworkService => Ok(decode_network_service(node)),
        NodeType::Vulnerability => Ok(decode_vulnerability(node)),
        NodeType::Cve => decode_cve(node),
        NodeType::Compound => Err(ShapeError::UnrecognizedLabels {
            id: node.id,
            labels: node.labels.clone(),
        }),
    }
}

fn decode_organization(node: &StoreNode) -> Result<GraphNode, ShapeError> {
    let name = required(node, NodeType::Organization, "name")?;
    let mut decoded = GraphNode::new(node.id.to_string(), NodeType::Organization, name);
    decoded.details = text(node, "comment").map(Details::Text);
    Ok(decoded)
}

fn decode_subnet(node: &StoreNode) -> Result<GraphNode, ShapeError> {
    let range = required(node, NodeType::Subnet, "range")?;
    let mut decoded = GraphNode::new(node.id.to_string(), NodeType::Subnet, range);
    decoded.details = text(node, "note").map(Details::Text);
    Ok(decoded)
}

fn decode_ip(node: &StoreNode) -> Result<GraphNode, ShapeError> {
    let address = required(node, NodeType::Ip, "address")?;
    Ok(GraphNode::new(node.id.to_string(), NodeType::Ip, address))
}

fn decode_domain_name(node: &StoreNode) -> Result<GraphNode, ShapeError> {
    let name = required(node, NodeType::DomainName, "domain_name")?;
    let mut decoded = GraphNode::new(node.id.to_string(), NodeType::DomainName, name);
    decoded.details = text(node, "tag").map(Details::Text);
    Ok(decoded)
}

fn decode_assignment(node: &StoreNode) -> GraphNode {
    let label = text(node, "name").unwrap_or_else(|| "Node".to_string());
    GraphNode::new(node.id.to_string(), NodeType::Node, label)
}

fn decode_host(node: &StoreNode) -> GraphNode {
    let label = text(node, "hostname").unwrap_or_else(|| "Host".to_string());
    let mut decoded = GraphNode::new(node.id.to_string(), NodeType::Host, label);
    decoded.details = text(node, "os").map(Details::Text);
    decoded
}

fn decode_software_version(node: &StoreNode) -> Result<GraphNode, ShapeError> {
    let version = required(node, NodeType::SoftwareVersion, "version")?;
    let mut decoded = GraphNode::new(node.id.to_string(), NodeType::SoftwareVersion, version);
    decoded.details = text(node, "tag").map(Details::Text);
    Ok(decoded)
}

fn decode_network_service(node: &StoreNode) -> GraphNode {
    let endpoint = match (text(node, "protocol"), text(node, "port")) {
        (Some(protocol), Some(port)) => Some(format!("{}/{}", protocol, port)),
        (None, Some(port)) => Some(port),
        (Some(protocol), None) => Some(protocol),
        (None, None) => None,
    };
    let label = text(node, "service")
        .or_else(|| endpoint.clone())
        .unwrap_or_else(|| "NetworkService".to_string());

    let mut decoded = GraphNode::new(node.id.to_string(), NodeType::NetworkService, label);
    decoded.details = endpoint.map(Details::Text);
    decoded
}

fn decode_vulnerability(node: &StoreNode) -> GraphNode {
    let label = text(node, "name").unwrap_or_else(|| "Vulnerability".to_string());
    let mut decoded = GraphNode::new(node.id.to_string(), NodeType::Vulnerability, label);
    decoded.details = text(node, "description").map(Details::Text);
    decoded
}

fn decode_cve(node: &StoreNode) -> Result<GraphNode, ShapeError> {
    let cve_id = required(node, NodeType::Cve, "CVE_id")?;
    let mut details = list(node, "impact");
    if let Some(score) = text(node, "base_score_v3").or_else(|| text(node, "base_score_v2")) {
        details.push(format!("CVSS {}", score));
    }

    let mut decoded = GraphNode::new(node.id.to_string(), NodeType::Cve, cve_id);
    if !details.is_empty() {
        decoded.details = Some(Details::List(details));
    }
    Ok(decoded)
}

fn scalar_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn text(node: &StoreNode, key: &str) -> Option<String> {
    node.properties.get(key).and_then(scalar_text)
}

fn list(node: &StoreNode, key: &str) -> Vec<String> {
    match node.properties.get(key) {
        Some(JsonValue::Array(items)) => items.iter().filter_map(scalar_text).collect(),
        Some(value) => scalar_text(value).into_iter().collect(),
        None => Vec::new(),
    }
}

fn required(
    node: &StoreNode,
    node_type: NodeType,
    property: &'static str,
) -> Result<String, ShapeError> {
    text(node, property).ok_or(ShapeError::MissingProperty {
        id: node.id,
        node_type: node_type.as_str(),
        property,
    })
}

/// Summarize the attribute chain onto the IP node itself.
pub fn attach_device_data(ip_id: &str, elements: &mut [Element]) {
    let mut device = DeviceData::default();

    for node in elements.iter().filter_map(Element::as_node) {
        match node.node_type {
            NodeType::DomainName => device.domain_names.push(node.label.clone()),
            NodeType::Host => device.hostname = Some(node.label.clone()),
            NodeType::SoftwareVersion => device.software.push(node.label.clone()),
            NodeType::NetworkService => device.services.push(node.label.clone()),
            NodeType::Cve => device.cves.push(node.label.clone()),
            NodeType::Vulnerability => device.vulnerable = true,
            _ => {}
        }
    }
    device.vulnerable |= !device.cves.is_empty();

    if let Some(ip) = elements.iter_mut().find_map(|element| match element {
        Element::Node(node) if node.id == ip_id => Some(node),
        _ => None,
    }) {
        ip.device_data = Some(device);
    }
}

/// Parent every attribute node of an IP expansion under synthetic compounds.
///
/// Detection runs over the whole batch before any parent is assigned: when the
/// chain carries a vulnerability, network service or CVE, those nodes and the
/// software versions go under `vulnerability-compound-<id>`, which itself sits
/// under `compound-<id>`. Everything else goes under `compound-<id>`.
pub fn synthesize_compounds(ip_id: &str, elements: Vec<Element>) -> Vec<Element> {
    let has_vulnerability_data = elements
        .iter()
        .filter_map(Element::as_node)
        .any(|node| node.node_type.is_vulnerability_data());

    let compound = compound_id(ip_id);
    let vulnerability_compound = vulnerability_compound_id(ip_id);
    let ip_label = elements
        .iter()
        .filter_map(Element::as_node)
        .find(|node| node.id == ip_id)
        .map(|node| node.label.clone())
        .unwrap_or_else(|| ip_id.to_string());

    let mut grouped: Vec<Element> = elements
        .into_iter()
        .map(|element| match element {
            Element::Node(mut node) if node.id != ip_id => {
                let parent = if has_vulnerability_data && node.node_type.is_vulnerability_group() {
                    vulnerability_compound.clone()
                } else {
                    compound.clone()
                };
                node.parent = Some(parent);
                Element::Node(node)
            }
            other => other,
        })
        .collect();

    grouped.push(GraphNode::new(compound.clone(), NodeType::Compound, ip_label).into());
    if has_vulnerability_data {
        grouped.push(
            GraphNode::new(vulnerability_compound, NodeType::Compound, "Vulnerabilities")
                .with_parent(compound)
                .into(),
        );
    }

    grouped
}
