use crate::cluster::PodLister;
use crate::error::LoadError;
use crate::nodes::classify::NodeClass;
use crate::nodes::resources::{allocatable_cpu, node_cpu, pod_cpu};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::ResourceExt;
use std::cmp::Reverse;
use std::ops::{Deref, Index, IndexMut};
use std::sync::Arc;
use tracing::debug;

/// A node together with the pods counted against it and its CPU usage.
///
/// `requested_cpu` and `free_cpu` are only ever updated together, from the
/// full pod list.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    node: Arc<Node>,
    pods: Vec<Arc<Pod>>,
    requested_cpu: i64,
    free_cpu: i64,
}

impl NodeInfo {
    /// Wraps a node and its pods, sorting the pods by CPU request, largest
    /// first.
    pub fn new(node: Arc<Node>, pods: Vec<Arc<Pod>>) -> Self {
        let mut info = Self {
            node,
            pods,
            requested_cpu: 0,
            free_cpu: 0,
        };
        info.sort_pods();
        info.recalculate();
        info
    }

    /// Loads the pods bound to `node` and builds its record.
    ///
    /// On spot nodes, pods with a priority below `priority_threshold` are
    /// left out entirely. A pod without a priority counts as priority 0.
    pub async fn build<L>(
        node: Arc<Node>,
        class: NodeClass,
        lister: &L,
        priority_threshold: i32,
    ) -> Result<Self, LoadError>
    where
        L: PodLister + ?Sized,
    {
        let pods = lister
            .list_pods_on_node(&node)
            .await
            .map_err(|source| LoadError::Pods {
                node: node.name_any(),
                source,
            })?;

        let listed = pods.len();
        let pods: Vec<Arc<Pod>> = pods
            .into_iter()
            .filter(|pod| class != NodeClass::Spot || priority(pod) >= priority_threshold)
            .map(Arc::new)
            .collect();

        let info = Self::new(node, pods);
        debug!(
            node = %info.name(),
            %class,
            pods = info.pods.len(),
            ignored = listed - info.pods.len(),
            requested_cpu = info.requested_cpu,
            free_cpu = info.free_cpu,
            "built node info"
        );
        Ok(info)
    }

    /// Adds a pod and recomputes the CPU totals.
    ///
    /// The pod is appended at the end: the descending CPU order established
    /// by [`NodeInfo::build`] is not maintained. Call
    /// [`NodeInfo::sort_pods`] if the order matters afterwards.
    pub fn add_pod(&mut self, pod: Arc<Pod>) {
        self.pods.push(pod);
        self.recalculate();
    }

    /// Sorts the pods by CPU request, largest first.
    pub fn sort_pods(&mut self) {
        self.pods.sort_by_cached_key(|pod| Reverse(pod_cpu(pod)));
    }

    fn recalculate(&mut self) {
        self.requested_cpu = node_cpu(self.pods.iter().map(|pod| pod.as_ref()));
        self.free_cpu = allocatable_cpu(&self.node).saturating_sub(self.requested_cpu);
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn name(&self) -> String {
        self.node.name_any()
    }

    pub fn pods(&self) -> &[Arc<Pod>] {
        &self.pods
    }

    /// CPU requested by the counted pods, in milli-cores.
    pub fn requested_cpu(&self) -> i64 {
        self.requested_cpu
    }

    /// Allocatable minus requested CPU, in milli-cores. May be negative.
    pub fn free_cpu(&self) -> i64 {
        self.free_cpu
    }

    pub fn allocatable_cpu(&self) -> i64 {
        allocatable_cpu(&self.node)
    }
}

fn priority(pod: &Pod) -> i32 {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.priority)
        .unwrap_or(0)
}

/// An ordered list of node records.
///
/// Records can be changed in place through [`NodeInfo::add_pod`], but the
/// list itself can't be reordered or resized from outside the crate.
#[derive(Debug, Clone, Default)]
pub struct NodeInfos(Vec<NodeInfo>);

impl NodeInfos {
    pub fn new(infos: Vec<NodeInfo>) -> Self {
        Self(infos)
    }

    /// Copies every record so the copies can take [`NodeInfo::add_pod`]
    /// without touching the originals. Nodes and pods are shared, not cloned.
    pub fn copy_all(&self) -> NodeInfos {
        NodeInfos(self.0.iter().map(NodeInfo::clone).collect())
    }

    /// Records in order, for in-place [`NodeInfo::add_pod`].
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, NodeInfo> {
        self.0.iter_mut()
    }

    pub(crate) fn push(&mut self, info: NodeInfo) {
        self.0.push(info);
    }

    pub(crate) fn sort_by_requested_cpu(&mut self, descending: bool) {
        if descending {
            self.0.sort_by_key(|info| Reverse(info.requested_cpu));
        } else {
            self.0.sort_by_key(|info| info.requested_cpu);
        }
    }
}

impl Deref for NodeInfos {
    type Target = [NodeInfo];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Index<usize> for NodeInfos {
    type Output = NodeInfo;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl IndexMut<usize> for NodeInfos {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.0[index]
    }
}

impl FromIterator<NodeInfo> for NodeInfos {
    fn from_iter<T: IntoIterator<Item = NodeInfo>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a NodeInfos {
    type Item = &'a NodeInfo;
    type IntoIter = std::slice::Iter<'a, NodeInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;
    use crate::nodes::testing::{node, on_demand_labels, pod, spot_labels, StaticPodLister};

    fn cpus(info: &NodeInfo) -> Vec<i64> {
        info.pods().iter().map(|p| pod_cpu(p)).collect()
    }

    fn names(info: &NodeInfo) -> Vec<String> {
        info.pods().iter().map(|p| p.name_any()).collect()
    }

    #[tokio::test]
    async fn test_build_sorts_pods_largest_first() {
        let lister = StaticPodLister::default().with_pods(
            "od",
            vec![
                pod("small", 0, &["100m"]),
                pod("large", 0, &["2"]),
                pod("medium", 0, &["500m", "250m"]),
                pod("none", 0, &[]),
            ],
        );
        let n = Arc::new(node("od", "4", on_demand_labels()));

        let info = NodeInfo::build(n, NodeClass::OnDemand, &lister, 0).await.unwrap();

        assert_eq!(cpus(&info), vec![2000, 750, 100, 0]);
        assert_eq!(names(&info), vec!["large", "medium", "small", "none"]);
        assert_eq!(info.requested_cpu(), 2850);
        assert_eq!(info.free_cpu(), 1150);
        assert_eq!(info.allocatable_cpu(), 4000);
    }

    #[tokio::test]
    async fn test_spot_node_drops_low_priority_pods() {
        let pods = vec![pod("filler", -1, &["500m"]), pod("critical", 0, &["1"])];
        let lister = StaticPodLister::default()
            .with_pods("spot", pods.clone())
            .with_pods("od", pods);

        let spot = NodeInfo::build(
            Arc::new(node("spot", "4", spot_labels())),
            NodeClass::Spot,
            &lister,
            0,
        )
        .await
        .unwrap();
        assert_eq!(names(&spot), vec!["critical"]);
        assert_eq!(spot.requested_cpu(), 1000);
        assert_eq!(spot.free_cpu(), 3000);

        let on_demand = NodeInfo::build(
            Arc::new(node("od", "4", on_demand_labels())),
            NodeClass::OnDemand,
            &lister,
            0,
        )
        .await
        .unwrap();
        assert_eq!(names(&on_demand), vec!["critical", "filler"]);
        assert_eq!(on_demand.requested_cpu(), 1500);
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive_and_missing_priority_is_zero() {
        let mut unprioritised = pod("unprioritised", 0, &["300m"]);
        if let Some(spec) = unprioritised.spec.as_mut() {
            spec.priority = None;
        }
        let lister = StaticPodLister::default().with_pods(
            "spot",
            vec![
                pod("at", 100, &["100m"]),
                pod("below", 99, &["200m"]),
                unprioritised,
            ],
        );
        let n = Arc::new(node("spot", "1", spot_labels()));

        let info = NodeInfo::build(n.clone(), NodeClass::Spot, &lister, 100).await.unwrap();
        assert_eq!(names(&info), vec!["at"]);

        let info = NodeInfo::build(n, NodeClass::Spot, &lister, 0).await.unwrap();
        assert_eq!(names(&info), vec!["unprioritised", "below", "at"]);
    }

    #[tokio::test]
    async fn test_build_propagates_query_failure() {
        let lister = StaticPodLister::default().failing_on("broken");
        let n = Arc::new(node("broken", "4", spot_labels()));

        let err = NodeInfo::build(n, NodeClass::Spot, &lister, 0).await.unwrap_err();

        match err {
            LoadError::Pods { node, source } => {
                assert_eq!(node, "broken");
                assert!(matches!(source, QueryError::Unavailable(_)));
            }
        }
    }

    #[test]
    fn test_add_pod_recalculates_without_sorting() {
        let n = Arc::new(node("od", "2", on_demand_labels()));
        let mut info = NodeInfo::new(n, vec![Arc::new(pod("a", 0, &["500m"]))]);

        info.add_pod(Arc::new(pod("b", 0, &["2"])));

        assert_eq!(info.requested_cpu(), 2500);
        assert_eq!(info.free_cpu(), -500);
        assert_eq!(names(&info), vec!["a", "b"]);

        info.sort_pods();
        assert_eq!(names(&info), vec!["b", "a"]);
    }

    #[test]
    fn test_copy_all_isolates_add_pod() {
        let n = Arc::new(node("od", "4", on_demand_labels()));
        let original = NodeInfos::new(vec![NodeInfo::new(
            n.clone(),
            vec![Arc::new(pod("a", 0, &["1"]))],
        )]);

        let mut copies = original.copy_all();
        copies[0].add_pod(Arc::new(pod("moved", 0, &["1500m"])));

        assert_eq!(copies[0].requested_cpu(), 2500);
        assert_eq!(copies[0].pods().len(), 2);
        assert_eq!(original[0].requested_cpu(), 1000);
        assert_eq!(original[0].free_cpu(), 3000);
        assert_eq!(original[0].pods().len(), 1);
        assert!(Arc::ptr_eq(copies[0].node(), original[0].node()));
        assert!(Arc::ptr_eq(&copies[0].pods()[0], &original[0].pods()[0]));
    }
}
