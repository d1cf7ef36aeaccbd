// Cluster query seams and their kube-backed implementation.
use crate::error::QueryError;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use tracing::debug;

/// Lists the full node inventory.
#[async_trait]
pub trait NodeLister: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<Node>, QueryError>;
}

/// Lists the pods bound to a node.
#[async_trait]
pub trait PodLister: Send + Sync {
    async fn list_pods_on_node(&self, node: &Node) -> Result<Vec<Pod>, QueryError>;
}

/// Queries the Kubernetes API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn try_default() -> Result<Self, QueryError> {
        Ok(Self::new(Client::try_default().await?))
    }
}

#[async_trait]
impl NodeLister for KubeCluster {
    async fn list_nodes(&self) -> Result<Vec<Node>, QueryError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api.list(&ListParams::default()).await?;
        debug!(count = nodes.items.len(), "listed nodes");
        Ok(nodes.items)
    }
}

#[async_trait]
impl PodLister for KubeCluster {
    async fn list_pods_on_node(&self, node: &Node) -> Result<Vec<Pod>, QueryError> {
        let name = node.name_any();
        let api: Api<Pod> = Api::all(self.client.clone());
        let params = ListParams::default().fields(&format!("spec.nodeName={}", name));
        let pods = api.list(&params).await?;
        debug!(node = %name, count = pods.items.len(), "listed pods on node");
        Ok(pods.items)
    }
}
