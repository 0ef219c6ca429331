// Tests for the topology expansion engine

use std::sync::Arc;
use std::time::Duration;
use vantage_core::error::ExpansionError;
use vantage_core::expand::{compound_id, vulnerability_compound_id};
use vantage_core::{Element, ExpandContext, ExpansionEngine, GraphNode, NodeType};
use vantage_store::{Record, StoreNode, StoreRelationship, StubGraphStore, Value};

const IP_QUERY: &str = "MATCH (i:IP)";
const SUBNET_QUERY: &str = "MATCH (s:Subnet)-[r]-(i:IP)";
const ORG_QUERY: &str = "(o:OrganizationUnit)-[r]-(s:Subnet)";
const TOP_QUERY: &str = "(p:OrganizationUnit)";

fn node(value: StoreNode) -> Value {
    Value::Node(value)
}

fn rel(id: i64, start: i64, end: i64, rel_type: &str) -> Value {
    Value::Relationship(StoreRelationship::new(id, start, end, rel_type))
}

fn ip_chain(with_vulnerability: bool) -> Record {
    let record = Record::new()
        .with("i", node(StoreNode::new(100, "IP").with_property("address", "10.0.1.5")))
        .with("r1", rel(500, 100, 101, "RESOLVES_TO"))
        .with(
            "d",
            node(StoreNode::new(101, "DomainName").with_property("domain_name", "db.example.org")),
        )
        .with("r2", rel(501, 100, 102, "IS_A"))
        .with("n", node(StoreNode::new(102, "Node")))
        .with("r3", rel(502, 102, 103, "IS_A"))
        .with("h", node(StoreNode::new(103, "Host").with_property("hostname", "db01")))
        .with("r4", rel(503, 103, 104, "ON"))
        .with(
            "sw",
            node(StoreNode::new(104, "SoftwareVersion").with_property("version", "postgresql 13.2")),
        );

    if !with_vulnerability {
        return record
            .with("r5", Value::Null)
            .with("ns", Value::Null)
            .with("r6", Value::Null)
            .with("v", Value::Null)
            .with("r7", Value::Null)
            .with("c", Value::Null);
    }

    record
        .with("r5", rel(504, 104, 105, "PROVIDES"))
        .with(
            "ns",
            node(
                StoreNode::new(105, "NetworkService")
                    .with_property("service", "postgresql")
                    .with_property("protocol", "tcp")
                    .with_property("port", 5432),
            ),
        )
        .with("r6", rel(505, 104, 106, "IN"))
        .with("v", node(StoreNode::new(106, "Vulnerability").with_property("description", "auth bypass")))
        .with("r7", rel(506, 106, 107, "REFERS_TO"))
        .with(
            "c",
            node(
                StoreNode::new(107, "CVE")
                    .with_property("CVE_id", "CVE-2021-32027")
                    .with_property("base_score_v3", 8.8),
            ),
        )
}

fn engine(store: &Arc<StubGraphStore>) -> ExpansionEngine<StubGraphStore> {
    ExpansionEngine::new(store.clone())
}

fn nodes(elements: &[Element]) -> Vec<&GraphNode> {
    elements.iter().filter_map(Element::as_node).collect()
}

fn find<'a>(elements: &'a [Element], id: &str) -> &'a GraphNode {
    nodes(elements)
        .into_iter()
        .find(|n| n.id == id)
        .unwrap_or_else(|| panic!("node {} missing", id))
}

// ============================================================================
// Compound synthesis
// ============================================================================

#[tokio::test]
async fn test_ip_with_cve_gets_vulnerability_compound() {
    let store = Arc::new(StubGraphStore::new());
    store.respond(IP_QUERY, vec![ip_chain(true)]);

    let elements = engine(&store)
        .expand("100", "IP", &ExpandContext::default())
        .await
        .unwrap();

    let compounds: Vec<&GraphNode> = nodes(&elements)
        .into_iter()
        .filter(|n| n.node_type == NodeType::Compound)
        .collect();
    assert_eq!(compounds.len(), 2);

    let vuln_compound = find(&elements, &vulnerability_compound_id("100"));
    assert_eq!(vuln_compound.parent.as_deref(), Some("compound-100"));
    let plain = find(&elements, &compound_id("100"));
    assert_eq!(plain.parent, None);
    assert_eq!(plain.label, "10.0.1.5");

    for id in ["104", "105", "106", "107"] {
        assert_eq!(
            find(&elements, id).parent.as_deref(),
            Some("vulnerability-compound-100"),
            "node {}",
            id
        );
    }
    for id in ["101", "102", "103"] {
        assert_eq!(find(&elements, id).parent.as_deref(), Some("compound-100"));
    }
    assert_eq!(find(&elements, "100").parent, None);
}

#[tokio::test]
async fn test_ip_without_vulnerability_data_gets_plain_compound_only() {
    let store = Arc::new(StubGraphStore::new());
    store.respond(IP_QUERY, vec![ip_chain(false)]);

    let elements = engine(&store)
        .expand("100", "IP", &ExpandContext::default())
        .await
        .unwrap();

    let compounds: Vec<&GraphNode> = nodes(&elements)
        .into_iter()
        .filter(|n| n.node_type == NodeType::Compound)
        .collect();
    assert_eq!(compounds.len(), 1);
    assert_eq!(compounds[0].id, "compound-100");

    for node in nodes(&elements) {
        if node.id != "100" && node.node_type != NodeType::Compound {
            assert_eq!(node.parent.as_deref(), Some("compound-100"));
        }
    }
    // Software versions only join the vulnerability group when one exists
    assert_eq!(find(&elements, "104").parent.as_deref(), Some("compound-100"));
}

#[tokio::test]
async fn test_ip_expansion_attaches_device_data() {
    let store = Arc::new(StubGraphStore::new());
    store.respond(IP_QUERY, vec![ip_chain(true)]);

    let elements = engine(&store)
        .expand("100", "IP", &ExpandContext::default())
        .await
        .unwrap();

    let device = find(&elements, "100").device_data.clone().unwrap();
    assert_eq!(device.hostname.as_deref(), Some("db01"));
    assert_eq!(device.domain_names, vec!["db.example.org"]);
    assert_eq!(device.software, vec!["postgresql 13.2"]);
    assert_eq!(device.services, vec!["postgresql"]);
    assert_eq!(device.cves, vec!["CVE-2021-32027"]);
    assert!(device.vulnerable);
}

#[tokio::test]
async fn test_unknown_ip_yields_nothing() {
    let store = Arc::new(StubGraphStore::new());
    store.respond(IP_QUERY, vec![]);

    let elements = engine(&store)
        .expand("100", "IP", &ExpandContext::default())
        .await
        .unwrap();

    assert!(elements.is_empty());
}

// ============================================================================
// Row shaping
// ============================================================================

#[tokio::test]
async fn test_organization_expansion_counts_and_dedup() {
    let org = StoreNode::new(1, "OrganizationUnit").with_property("name", "Acme");
    let subnet = |id: i64, range: &str| StoreNode::new(id, "Subnet").with_property("range", range);

    let store = Arc::new(StubGraphStore::new());
    store.respond(
        ORG_QUERY,
        vec![
            Record::new()
                .with("o", node(org.clone()))
                .with("r", rel(20, 1, 10, "PART_OF"))
                .with("s", node(subnet(10, "10.0.1.0/24")))
                .with("hosts", Value::Scalar(12.into()))
                .with("vulns", Value::Scalar(3.into())),
            Record::new()
                .with("o", node(org))
                .with("r", rel(21, 11, 1, "PART_OF"))
                .with("s", node(subnet(11, "10.0.2.0/24")))
                .with("hosts", Value::Scalar(4.into()))
                .with("vulns", Value::Scalar(0.into())),
        ],
    );

    let ctx = ExpandContext {
        cidr_base: "10.0.".to_string(),
        ..ExpandContext::default()
    };
    let elements = engine(&store).expand("1", "OrganizationUnit", &ctx).await.unwrap();

    assert_eq!(nodes(&elements).len(), 3);
    assert_eq!(elements.iter().filter(|e| e.as_edge().is_some()).count(), 2);

    let first = find(&elements, "10");
    assert_eq!(first.label, "10.0.1.0/24");
    assert_eq!((first.hosts, first.vulns), (Some(12), Some(3)));
    let second = find(&elements, "11");
    assert_eq!((second.hosts, second.vulns), (Some(4), Some(0)));
    assert_eq!(find(&elements, "1").hosts, None);

    let executed = store.executed();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].params["cidrBase"], "10.0.");
    assert_eq!(executed[0].params["excludedCidr"], serde_json::Value::Null);
}

#[tokio::test]
async fn test_subnet_expansion_edges_keep_store_orientation() {
    let store = Arc::new(StubGraphStore::new());
    store.respond(
        SUBNET_QUERY,
        vec![Record::new()
            .with("s", node(StoreNode::new(10, "Subnet").with_property("range", "10.0.1.0/24")))
            .with("r", rel(30, 100, 10, "PART_OF"))
            .with("i", node(StoreNode::new(100, "IP").with_property("address", "10.0.1.5")))
            .with("vulns", Value::Scalar(2.into()))],
    );

    let elements = engine(&store)
        .expand("10", "Subnet", &ExpandContext::default())
        .await
        .unwrap();

    let edge = elements.iter().find_map(Element::as_edge).unwrap();
    assert_eq!((edge.source.as_str(), edge.target.as_str()), ("100", "10"));
    assert_eq!(edge.edge_type, "PART_OF");
    assert_eq!(find(&elements, "100").vulns, Some(2));
}

#[tokio::test]
async fn test_missing_required_property_yields_empty() {
    let store = Arc::new(StubGraphStore::new());
    store.respond(
        SUBNET_QUERY,
        vec![Record::new()
            .with("s", node(StoreNode::new(10, "Subnet")))
            .with("i", node(StoreNode::new(100, "IP").with_property("address", "10.0.1.5")))],
    );

    let elements = engine(&store)
        .expand("10", "Subnet", &ExpandContext::default())
        .await
        .unwrap();

    assert!(elements.is_empty());
}

#[tokio::test]
async fn test_unrecognized_label_yields_empty() {
    let store = Arc::new(StubGraphStore::new());
    store.respond(
        SUBNET_QUERY,
        vec![Record::new().with("i", node(StoreNode::new(100, "Printer")))],
    );

    let elements = engine(&store)
        .expand("10", "Subnet", &ExpandContext::default())
        .await
        .unwrap();

    assert!(elements.is_empty());
}

// ============================================================================
// Failure modes
// ============================================================================

#[tokio::test]
async fn test_unsupported_type_issues_no_query() {
    let store = Arc::new(StubGraphStore::new());

    let err = engine(&store)
        .expand("103", "Host", &ExpandContext::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ExpansionError::UnsupportedNodeType(ref t) if t == "Host"));
    assert_eq!(store.executed_count(), 0);
}

#[tokio::test]
async fn test_non_numeric_id_rejected() {
    let store = Arc::new(StubGraphStore::new());

    let err = engine(&store)
        .expand("compound-100", "IP", &ExpandContext::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ExpansionError::InvalidNodeId(_)));
    assert_eq!(store.executed_count(), 0);
}

#[tokio::test]
async fn test_store_failure_yields_empty() {
    let store = Arc::new(StubGraphStore::new());
    store.fail(IP_QUERY, "connection refused");

    let elements = engine(&store)
        .expand("100", "IP", &ExpandContext::default())
        .await
        .unwrap();

    assert!(elements.is_empty());
    assert_eq!(store.executed_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_store_times_out() {
    let store = Arc::new(StubGraphStore::new().with_latency(Duration::from_secs(5)));
    store.respond(IP_QUERY, vec![ip_chain(true)]);

    let ctx = ExpandContext {
        timeout: Duration::from_millis(50),
        ..ExpandContext::default()
    };
    let err = engine(&store).expand("100", "IP", &ctx).await.unwrap_err();

    assert!(matches!(err, ExpansionError::Timeout { .. }));
}

// ============================================================================
// Top level
// ============================================================================

#[tokio::test]
async fn test_top_level_binds_organization_filter() {
    let store = Arc::new(StubGraphStore::new());
    store.respond(
        TOP_QUERY,
        vec![
            Record::new()
                .with("o", node(StoreNode::new(1, "OrganizationUnit").with_property("name", "Acme")))
                .with("r", rel(40, 1, 2, "PART_OF"))
                .with("p", node(StoreNode::new(2, "OrganizationUnit").with_property("name", "Acme Labs"))),
            Record::new()
                .with("o", node(StoreNode::new(1, "OrganizationUnit").with_property("name", "Acme")))
                .with("r", Value::Null)
                .with("p", Value::Null),
        ],
    );

    let elements = ExpansionEngine::new(store.clone())
        .with_organization(Some("Acme".to_string()))
        .fetch_top_level(Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(nodes(&elements).len(), 2);
    assert_eq!(elements.iter().filter(|e| e.as_edge().is_some()).count(), 1);
    assert_eq!(store.executed()[0].params["organization"], "Acme");
}
