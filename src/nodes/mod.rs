// Classified, pre-sorted view of the cluster's worker nodes.
//
// Spot nodes are drain sources and are ordered most requested CPU first.
// On-demand nodes are migration targets and are ordered least requested CPU
// first. Downstream bin-packing walks both lists greedily, so the two
// orderings must not change independently.

pub mod classify;
pub mod info;
pub mod resources;

#[cfg(test)]
pub(crate) mod testing;

pub use classify::{classify, NodeClass};
pub use info::{NodeInfo, NodeInfos};

use crate::cluster::PodLister;
use crate::config::NodeMapConfig;
use crate::error::LoadError;
use futures::stream::{self, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info};

/// Node records grouped by class. Both classes are always present.
#[derive(Debug, Clone, Default)]
pub struct NodeMap {
    spot: NodeInfos,
    on_demand: NodeInfos,
}

impl NodeMap {
    /// Builds the map from a node inventory.
    ///
    /// Nodes matching neither label rule are skipped without querying their
    /// pods. Pod listing runs concurrently, bounded by
    /// `config.build_concurrency`; the first failure aborts the build and no
    /// partial map is returned.
    pub async fn build<L>(
        nodes: Vec<Node>,
        config: &NodeMapConfig,
        lister: &L,
    ) -> Result<Self, LoadError>
    where
        L: PodLister + ?Sized,
    {
        let total = nodes.len();
        let classified: Vec<(NodeClass, Arc<Node>)> = nodes
            .into_iter()
            .filter_map(|node| {
                let class = classify(&node, config);
                if class.is_none() {
                    debug!(node = %node.name_any(), "node matches no class, skipping");
                }
                class.map(|class| (class, Arc::new(node)))
            })
            .collect();

        let built: Vec<(NodeClass, NodeInfo)> = stream::iter(classified)
            .map(|(class, node)| async move {
                NodeInfo::build(node, class, lister, config.priority_threshold)
                    .await
                    .map(|info| (class, info))
            })
            .buffered(config.build_concurrency.max(1))
            .try_collect()
            .await?;

        let mut map = NodeMap::default();
        for (class, info) in built {
            map.get_mut(class).push(info);
        }
        map.sort();

        info!(
            nodes = total,
            spot = map.spot.len(),
            on_demand = map.on_demand.len(),
            "built node map"
        );
        Ok(map)
    }

    /// Builds the map from records that were already loaded.
    #[cfg(test)]
    pub(crate) fn from_infos<I>(infos: I) -> Self
    where
        I: IntoIterator<Item = (NodeClass, NodeInfo)>,
    {
        let mut map = NodeMap::default();
        for (class, info) in infos {
            map.get_mut(class).push(info);
        }
        map.sort();
        map
    }

    fn sort(&mut self) {
        self.spot.sort_by_requested_cpu(true);
        self.on_demand.sort_by_requested_cpu(false);
    }

    /// Spot nodes, most requested CPU first.
    pub fn spot(&self) -> &NodeInfos {
        &self.spot
    }

    /// On-demand nodes, least requested CPU first.
    pub fn on_demand(&self) -> &NodeInfos {
        &self.on_demand
    }

    pub fn get(&self, class: NodeClass) -> &NodeInfos {
        match class {
            NodeClass::Spot => &self.spot,
            NodeClass::OnDemand => &self.on_demand,
        }
    }

    /// Record at `index` of a class, for in-place [`NodeInfo::add_pod`].
    /// The class order is not restored afterwards.
    pub fn record_mut(&mut self, class: NodeClass, index: usize) -> Option<&mut NodeInfo> {
        self.get_mut(class).iter_mut().nth(index)
    }

    fn get_mut(&mut self, class: NodeClass) -> &mut NodeInfos {
        match class {
            NodeClass::Spot => &mut self.spot,
            NodeClass::OnDemand => &mut self.on_demand,
        }
    }

    /// Number of classified nodes.
    pub fn len(&self) -> usize {
        self.spot.len() + self.on_demand.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
