// Serializable summary of a node map, printed by `snapshot` and logged by `run`.
use crate::nodes::{NodeClass, NodeInfo, NodeMap};
use chrono::{DateTime, Utc};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeMapReport {
    pub generated_at: DateTime<Utc>,

    /// Spot nodes, most requested CPU first
    pub spot: Vec<NodeReport>,

    /// On-demand nodes, least requested CPU first
    pub on_demand: Vec<NodeReport>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeReport {
    pub name: String,
    pub allocatable_cpu: i64,
    pub requested_cpu: i64,
    pub free_cpu: i64,

    /// `namespace/name` of the counted pods, in map order
    pub pods: Vec<String>,
}

impl From<&NodeInfo> for NodeReport {
    fn from(info: &NodeInfo) -> Self {
        Self {
            name: info.name(),
            allocatable_cpu: info.allocatable_cpu(),
            requested_cpu: info.requested_cpu(),
            free_cpu: info.free_cpu(),
            pods: info
                .pods()
                .iter()
                .map(|pod| match pod.namespace() {
                    Some(ns) => format!("{}/{}", ns, pod.name_any()),
                    None => pod.name_any(),
                })
                .collect(),
        }
    }
}

impl NodeMapReport {
    pub fn new(map: &NodeMap) -> Self {
        let nodes = |class| map.get(class).iter().map(NodeReport::from).collect();
        Self {
            generated_at: Utc::now(),
            spot: nodes(NodeClass::Spot),
            on_demand: nodes(NodeClass::OnDemand),
        }
    }

    /// Spot CPU that would have to move if every spot node were drained.
    pub fn spot_requested_cpu(&self) -> i64 {
        self.spot
            .iter()
            .fold(0i64, |acc, n| acc.saturating_add(n.requested_cpu))
    }

    /// Headroom available on on-demand nodes, ignoring overcommitted ones.
    pub fn on_demand_free_cpu(&self) -> i64 {
        self.on_demand
            .iter()
            .fold(0i64, |acc, n| acc.saturating_add(n.free_cpu.max(0)))
    }
}
