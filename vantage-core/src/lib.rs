pub mod cache;
pub mod cidr;
pub mod config;
pub mod error;
pub mod expand;
pub mod explorer;
pub mod graph;
pub mod model;
pub mod snapshot;
pub mod treemap;

pub use cache::{CacheStatus, LoadOutcome, NetworkCache};
pub use cidr::Cidr;
pub use config::Config;
pub use expand::{ExpandContext, ExpandKind, ExpansionEngine};
pub use explorer::Explorer;
pub use graph::{CollapseStats, MergeStats, TopologyGraph};
pub use model::{DeviceData, Details, Element, ElementRef, GraphEdge, GraphNode, NodeType};
pub use treemap::{CidrTreeNode, SubnetInfo, Treemap, TreemapBuilder, build_treemap};
