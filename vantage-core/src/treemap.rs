//! Nested subnet hierarchy for area-proportional rendering.
//!
//! The builder lays out the complete binary subdivision of a supernet down to
//! a maximum prefix, then hangs every entry under its most specific containing
//! range. Observed subnets keep their labels; every generated range is labelled
//! with its own CIDR string.

use crate::cidr::Cidr;
use crate::error::CidrError;
use crate::model::{Details, GraphNode, NodeType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

pub const DEFAULT_MAX_PREFIX: u8 = 31;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSubnetInfo {
    Label(String),
    Full {
        #[serde(default)]
        label: String,
        #[serde(default)]
        vuln: Option<bool>,
    },
}

/// Display data for one observed subnet. Decodes from either a bare label
/// string or `{label, vuln}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawSubnetInfo")]
pub struct SubnetInfo {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vuln: Option<bool>,
}

impl SubnetInfo {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            vuln: None,
        }
    }

    pub fn with_vuln(mut self, vuln: bool) -> Self {
        self.vuln = Some(vuln);
        self
    }
}

impl From<RawSubnetInfo> for SubnetInfo {
    fn from(raw: RawSubnetInfo) -> Self {
        match raw {
            RawSubnetInfo::Label(label) => SubnetInfo::new(label),
            RawSubnetInfo::Full { label, vuln } => SubnetInfo { label, vuln },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CidrTreeNode {
    pub cidr: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vuln: Option<bool>,
    pub children: Vec<CidrTreeNode>,
}

impl CidrTreeNode {
    /// Number of nodes in this subtree, itself included.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(CidrTreeNode::size).sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Treemap {
    pub tree: Vec<CidrTreeNode>,
    pub levels: Vec<u8>,
}

impl Treemap {
    pub fn node_count(&self) -> usize {
        self.tree.iter().map(CidrTreeNode::size).sum()
    }

    /// Depth of `cidr` below the supernet; its direct children sit at depth 1.
    pub fn depth_of(&self, cidr: &str) -> Option<usize> {
        fn search(nodes: &[CidrTreeNode], cidr: &str, depth: usize) -> Option<usize> {
            nodes.iter().find_map(|node| {
                if node.cidr == cidr {
                    Some(depth)
                } else {
                    search(&node.children, cidr, depth + 1)
                }
            })
        }
        search(&self.tree, cidr, 1)
    }
}

struct Slot {
    cidr: Cidr,
    info: SubnetInfo,
    children: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct TreemapBuilder {
    supernet: Cidr,
    max_prefix: u8,
}

impl TreemapBuilder {
    pub fn new(supernet: &str) -> Result<Self, CidrError> {
        Ok(Self {
            supernet: supernet.parse()?,
            max_prefix: DEFAULT_MAX_PREFIX,
        })
    }

    pub fn with_max_prefix(mut self, max_prefix: u8) -> Self {
        self.max_prefix = max_prefix;
        self
    }

    pub fn supernet(&self) -> Cidr {
        self.supernet
    }

    /// Every subnet produced by repeated bisection of the supernet, and the
    /// prefix lengths the hierarchy spans.
    pub fn subnet_space(&self) -> Result<(Vec<Cidr>, Vec<u8>), CidrError> {
        if self.max_prefix > 32 || self.max_prefix < self.supernet.prefix() {
            return Err(CidrError::InvalidSubdivision {
                prefix: self.supernet.prefix(),
                new_prefix: self.max_prefix,
            });
        }

        let mut levels = vec![self.supernet.prefix()];
        let mut candidates = Vec::new();
        let mut current = vec![self.supernet];
        let mut prefix = self.supernet.prefix();

        while prefix < self.max_prefix {
            let next: Vec<Cidr> = current
                .iter()
                .filter_map(Cidr::halves)
                .flat_map(|(low, high)| [low, high])
                .collect();
            prefix += 1;
            levels.push(prefix);
            candidates.extend_from_slice(&next);
            current = next;
        }

        Ok((candidates, levels))
    }

    pub fn build(&self, observed: &BTreeMap<String, SubnetInfo>) -> Result<Treemap, CidrError> {
        let (candidates, levels) = self.subnet_space()?;

        let mut entries: HashMap<Cidr, SubnetInfo> = HashMap::with_capacity(candidates.len());
        for (key, info) in observed {
            let cidr: Cidr = key.parse()?;
            let mut info = info.clone();
            if info.label.is_empty() {
                info.label = cidr.to_string();
            }
            entries.insert(cidr, info);
        }
        for cidr in candidates {
            entries
                .entry(cidr)
                .or_insert_with(|| SubnetInfo::new(cidr.to_string()));
        }
        entries.remove(&self.supernet);

        let mut sorted: Vec<(Cidr, SubnetInfo)> = entries.into_iter().collect();
        sorted.sort_by_key(|(cidr, _)| (cidr.prefix(), cidr.start()));

        let mut arena = vec![Slot {
            cidr: self.supernet,
            info: SubnetInfo::new(self.supernet.to_string()),
            children: Vec::new(),
        }];

        for (cidr, info) in sorted {
            if !self.supernet.contains(&cidr) {
                warn!("Skipping {}: outside supernet {}", cidr, self.supernet);
                continue;
            }

            let parent = deepest_container(&arena, cidr);
            arena.push(Slot {
                cidr,
                info,
                children: Vec::new(),
            });
            let idx = arena.len() - 1;
            arena[parent].children.push(idx);
        }

        let top = std::mem::take(&mut arena[0].children);
        let tree: Vec<CidrTreeNode> = top.into_iter().map(|idx| materialize(&mut arena, idx)).collect();

        debug!(
            "Built treemap for {}: {} top-level ranges, {} levels",
            self.supernet,
            tree.len(),
            levels.len()
        );
        Ok(Treemap { tree, levels })
    }
}

/// Walk down from the root, always into the containing child with the longest prefix.
fn deepest_container(arena: &[Slot], cidr: Cidr) -> usize {
    let mut at = 0;
    loop {
        let mut best: Option<usize> = None;
        for &child in &arena[at].children {
            if arena[child].cidr.contains(&cidr)
                && best.is_none_or(|b| arena[child].cidr.prefix() > arena[b].cidr.prefix())
            {
                best = Some(child);
            }
        }
        match best {
            Some(child) => at = child,
            None => return at,
        }
    }
}

fn materialize(arena: &mut [Slot], idx: usize) -> CidrTreeNode {
    let children = std::mem::take(&mut arena[idx].children);
    let info = std::mem::take(&mut arena[idx].info);
    CidrTreeNode {
        cidr: arena[idx].cidr.to_string(),
        label: info.label,
        vuln: info.vuln,
        children: children
            .into_iter()
            .map(|child| materialize(arena, child))
            .collect(),
    }
}

/// Observed subnets keyed by range. A subnet's note becomes its label and a
/// known vulnerability count sets the marker.
pub fn subnets_from_nodes(nodes: &[GraphNode]) -> BTreeMap<String, SubnetInfo> {
    let mut subnets = BTreeMap::new();
    for node in nodes.iter().filter(|n| n.node_type == NodeType::Subnet) {
        let Ok(cidr) = node.label.parse::<Cidr>() else {
            warn!("Subnet {} has an unusable range '{}'", node.id, node.label);
            continue;
        };

        let label = match &node.details {
            Some(Details::Text(note)) if !note.is_empty() => note.clone(),
            _ => cidr.to_string(),
        };
        let mut info = SubnetInfo::new(label);
        info.vuln = node.vulns.map(|count| count > 0);
        subnets.insert(cidr.to_string(), info);
    }
    subnets
}

/// Build the hierarchy for `supernet` with the default maximum prefix.
pub fn build_treemap(
    supernet: &str,
    subnets: &BTreeMap<String, SubnetInfo>,
) -> Result<Treemap, CidrError> {
    TreemapBuilder::new(supernet)?.build(subnets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subnet_info_decodes_both_shapes() {
        let dict: BTreeMap<String, SubnetInfo> = serde_json::from_str(
            r#"{"10.0.0.0/24": "office", "10.0.1.0/24": {"label": "dmz", "vuln": true}}"#,
        )
        .unwrap();

        assert_eq!(dict["10.0.0.0/24"], SubnetInfo::new("office"));
        assert_eq!(dict["10.0.1.0/24"], SubnetInfo::new("dmz").with_vuln(true));
    }

    #[test]
    fn test_subnet_space_counts() {
        let builder = TreemapBuilder::new("10.0.0.0/24").unwrap().with_max_prefix(26);
        let (candidates, levels) = builder.subnet_space().unwrap();

        assert_eq!(levels, vec![24, 25, 26]);
        assert_eq!(candidates.len(), 2 + 4);
    }

    #[test]
    fn test_small_tree_shape() {
        let builder = TreemapBuilder::new("192.168.0.0/30").unwrap();
        let treemap = builder.build(&BTreeMap::new()).unwrap();

        assert_eq!(treemap.levels, vec![30, 31]);
        let cidrs: Vec<&str> = treemap.tree.iter().map(|n| n.cidr.as_str()).collect();
        assert_eq!(cidrs, vec!["192.168.0.0/31", "192.168.0.2/31"]);
        assert!(treemap.tree.iter().all(|n| n.children.is_empty()));
        assert_eq!(treemap.tree[0].label, "192.168.0.0/31");
    }

    #[test]
    fn test_subnets_from_nodes_skips_bad_ranges() {
        let mut noted = GraphNode::new("10", NodeType::Subnet, "10.0.1.0/24")
            .with_details(Details::Text("servers".to_string()));
        noted.vulns = Some(3);
        let nodes = vec![
            noted,
            GraphNode::new("11", NodeType::Subnet, "10.0.2.0/24"),
            GraphNode::new("12", NodeType::Subnet, "not a range"),
            GraphNode::new("1", NodeType::Organization, "Acme"),
        ];

        let subnets = subnets_from_nodes(&nodes);

        assert_eq!(subnets.len(), 2);
        assert_eq!(subnets["10.0.1.0/24"], SubnetInfo::new("servers").with_vuln(true));
        assert_eq!(subnets["10.0.2.0/24"], SubnetInfo::new("10.0.2.0/24"));
    }

    #[test]
    fn test_max_prefix_out_of_range() {
        let builder = TreemapBuilder::new("10.0.0.0/24").unwrap().with_max_prefix(33);
        assert_eq!(
            builder.build(&BTreeMap::new()),
            Err(CidrError::InvalidSubdivision {
                prefix: 24,
                new_prefix: 33
            })
        );
    }
}
