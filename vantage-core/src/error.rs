use std::time::Duration;
use thiserror::Error;

/// Failures that end a single expansion call.
#[derive(Error, Debug)]
pub enum ExpansionError {
    #[error("Unsupported node type '{0}': expected Organization, Subnet or IP")]
    UnsupportedNodeType(String),

    #[error("Invalid node id '{0}': expected an integer store identity")]
    InvalidNodeId(String),

    #[error("Expansion of {target} timed out after {timeout:?}")]
    Timeout { target: String, timeout: Duration },
}

/// Rows that could not be turned into cache elements.
#[derive(Error, Debug)]
pub enum ShapeError {
    #[error("Node {id} has no recognized label (labels: {labels:?})")]
    UnrecognizedLabels { id: i64, labels: Vec<String> },

    #[error("{node_type} node {id} is missing required property '{property}'")]
    MissingProperty {
        id: i64,
        node_type: &'static str,
        property: &'static str,
    },
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Snapshot IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Snapshot decode error: {0}")]
    DecodeError(#[from] serde_json::Error),

    #[error("Unsupported snapshot version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}

#[derive(Error, Debug, PartialEq)]
pub enum CidrError {
    #[error("Invalid CIDR '{0}'")]
    InvalidCidr(String),

    #[error("CIDR '{0}' has host bits set")]
    HostBitsSet(String),

    #[error("Cannot subdivide /{prefix} into /{new_prefix}")]
    InvalidSubdivision { prefix: u8, new_prefix: u8 },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ParseError(#[from] serde_json::Error),
}
