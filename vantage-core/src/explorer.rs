//! The explorer ties the expansion engine to the network cache.
//!
//! Store queries always run before the cache is touched; the results are then
//! merged under the cache's write lock and one snapshot is queued per call.

use crate::cache::{CacheStatus, LoadOutcome, NetworkCache};
use crate::error::ExpansionError;
use crate::expand::{ExpandContext, ExpansionEngine};
use crate::graph::CollapseStats;
use crate::model::{Element, ElementRef, NodeType};
use crate::treemap::{SubnetInfo, subnets_from_nodes};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use vantage_store::GraphStore;

pub struct Explorer<S: ?Sized> {
    engine: ExpansionEngine<S>,
    cache: Arc<NetworkCache>,
    repopulate_on_stale: bool,
    top_level_timeout: Duration,
}

impl<S: GraphStore + ?Sized> Explorer<S> {
    pub fn new(store: Arc<S>, cache: Arc<NetworkCache>) -> Self {
        Self {
            engine: ExpansionEngine::new(store),
            cache,
            repopulate_on_stale: false,
            top_level_timeout: ExpandContext::default().timeout,
        }
    }

    pub fn with_organization(mut self, organization: Option<String>) -> Self {
        self.engine = self.engine.with_organization(organization);
        self
    }

    pub fn with_repopulate_on_stale(mut self, repopulate: bool) -> Self {
        self.repopulate_on_stale = repopulate;
        self
    }

    pub fn with_top_level_timeout(mut self, timeout: Duration) -> Self {
        self.top_level_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &NetworkCache {
        &self.cache
    }

    /// Load the snapshot, repopulating from the store when it had expired and
    /// repopulation is enabled.
    pub async fn start(&self) -> Result<LoadOutcome, ExpansionError> {
        let outcome = self.cache.load().await;
        if matches!(outcome, LoadOutcome::Stale { .. }) && self.repopulate_on_stale {
            info!("Repopulating expired cache from the store");
            self.fetch_top_level().await?;
        }
        Ok(outcome)
    }

    pub async fn fetch_top_level(&self) -> Result<Vec<Element>, ExpansionError> {
        let elements = self.engine.fetch_top_level(self.top_level_timeout).await?;
        self.absorb(&elements).await;
        Ok(elements)
    }

    /// Expand one node and fold the result into the cache.
    pub async fn expand(
        &self,
        node_id: &str,
        node_type: &str,
        ctx: &ExpandContext,
    ) -> Result<Vec<Element>, ExpansionError> {
        let elements = self.engine.expand(node_id, node_type, ctx).await?;
        self.absorb(&elements).await;
        Ok(elements)
    }

    pub async fn collapse(&self, targets: &[ElementRef]) -> CollapseStats {
        let stats = self.cache.collapse(targets).await;
        if stats.nodes_removed + stats.edges_removed > 0 {
            self.cache.persist().await;
        }
        stats
    }

    pub async fn read_all(&self) -> Vec<Element> {
        self.cache.read_all().await
    }

    /// Drop everything cached and start over from the top level.
    pub async fn refresh(&self) -> Result<Vec<Element>, ExpansionError> {
        info!("Refreshing cache");
        self.cache.clear().await;
        self.fetch_top_level().await
    }

    pub async fn status(&self) -> CacheStatus {
        self.cache.status().await
    }

    /// Observed subnets from the cache, keyed by range, for the treemap builder.
    pub async fn subnet_dictionary(&self) -> BTreeMap<String, SubnetInfo> {
        subnets_from_nodes(&self.cache.nodes_of_type(NodeType::Subnet).await)
    }

    /// Wait for queued snapshot writes to land.
    pub async fn shutdown(&self) {
        self.cache.flush().await;
    }

    async fn absorb(&self, elements: &[Element]) {
        if elements.is_empty() {
            return;
        }
        self.cache.merge(elements).await;
        self.cache.persist().await;
    }
}
