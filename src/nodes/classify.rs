use crate::config::NodeMapConfig;
use k8s_openapi::api::core::v1::Node;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two node classes a rebalancer cares about.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum NodeClass {
    /// Preemptible capacity, drained most-loaded first.
    Spot,
    /// Stable capacity, filled least-loaded first.
    OnDemand,
}

impl NodeClass {
    pub const ALL: [NodeClass; 2] = [NodeClass::Spot, NodeClass::OnDemand];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeClass::Spot => "spot",
            NodeClass::OnDemand => "on_demand",
        }
    }
}

impl fmt::Display for NodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a node by its labels. The spot rule is checked first, so a
/// node matching both rules is a spot node. `None` means the node is neither
/// and takes no part in rebalancing.
pub fn classify(node: &Node, config: &NodeMapConfig) -> Option<NodeClass> {
    if config.spot_rule.matches(node) {
        Some(NodeClass::Spot)
    } else if config.on_demand_rule.matches(node) {
        Some(NodeClass::OnDemand)
    } else {
        None
    }
}
