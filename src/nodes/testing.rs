// Fixtures shared by the node map tests.
use crate::cluster::PodLister;
use crate::error::QueryError;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Container, Node, NodeStatus, Pod, PodSpec, ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

pub fn spot_labels() -> BTreeMap<String, String> {
    BTreeMap::from([("kubernetes.io/role".to_string(), "spot-worker".to_string())])
}

pub fn on_demand_labels() -> BTreeMap<String, String> {
    BTreeMap::from([("kubernetes.io/role".to_string(), "worker".to_string())])
}

pub fn node(name: &str, allocatable_cpu: &str, labels: BTreeMap<String, String>) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        status: Some(NodeStatus {
            allocatable: Some(BTreeMap::from([(
                "cpu".to_string(),
                Quantity(allocatable_cpu.to_string()),
            )])),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A pod with one container per CPU request.
pub fn pod(name: &str, priority: i32, cpu_requests: &[&str]) -> Pod {
    let containers = cpu_requests
        .iter()
        .enumerate()
        .map(|(i, cpu)| Container {
            name: format!("{}-{}", name, i),
            resources: Some(ResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "cpu".to_string(),
                    Quantity(cpu.to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect();

    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers,
            priority: Some(priority),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// In-memory pod lister. Nodes marked as failing return an error.
#[derive(Default)]
pub struct StaticPodLister {
    pods: HashMap<String, Vec<Pod>>,
    failing: HashSet<String>,
    queried: Mutex<Vec<String>>,
}

impl StaticPodLister {
    pub fn with_pods(mut self, node: &str, pods: Vec<Pod>) -> Self {
        self.pods.insert(node.to_string(), pods);
        self
    }

    pub fn failing_on(mut self, node: &str) -> Self {
        self.failing.insert(node.to_string());
        self
    }

    pub fn queried(&self) -> Vec<String> {
        self.queried.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PodLister for StaticPodLister {
    async fn list_pods_on_node(&self, node: &Node) -> Result<Vec<Pod>, QueryError> {
        let name = node.name_any();
        if let Ok(mut queried) = self.queried.lock() {
            queried.push(name.clone());
        }
        if self.failing.contains(&name) {
            return Err(QueryError::Unavailable(format!("pods on {} unavailable", name)));
        }
        Ok(self.pods.get(&name).cloned().unwrap_or_default())
    }
}
