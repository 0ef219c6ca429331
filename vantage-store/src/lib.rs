pub mod client;
pub mod error;
pub mod record;
#[cfg(feature = "stub")]
pub mod stub;

pub use client::{GraphStore, Neo4jClient};
pub use error::StoreError;
pub use record::{Query, Record, StoreNode, StoreRelationship, Value};
#[cfg(feature = "stub")]
pub use stub::StubGraphStore;
