// Node map configuration: label rules, priority threshold and build tuning.
use crate::error::ConfigError;
use k8s_openapi::api::core::v1::Node;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

pub const DEFAULT_SPOT_NODE_LABEL: &str = "kubernetes.io/role=spot-worker";
pub const DEFAULT_ON_DEMAND_NODE_LABEL: &str = "kubernetes.io/role=worker";
pub const DEFAULT_PRIORITY_THRESHOLD: i32 = 0;
pub const DEFAULT_BUILD_CONCURRENCY: usize = 8;
pub const DEFAULT_HOUSEKEEPING_INTERVAL_SECS: u64 = 10;

/// A node label matcher.
///
/// `KeyOnly` is the older label schema (`node-role.kubernetes.io/spot-worker`),
/// `KeyValue` the newer one (`kubernetes.io/role=spot-worker`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelRule {
    KeyOnly(String),
    KeyValue(String, String),
}

impl LabelRule {
    /// Parse a rule in `key` or `key=value` form.
    pub fn parse(rule: &str) -> Result<Self, ConfigError> {
        let mut parts = rule.splitn(2, '=');
        let key = parts.next().unwrap_or_default();
        if key.is_empty() {
            return Err(ConfigError::EmptyLabelKey {
                rule: rule.to_string(),
            });
        }

        match parts.next() {
            None => Ok(LabelRule::KeyOnly(key.to_string())),
            Some(value) if value.contains('=') => Err(ConfigError::AmbiguousLabelRule {
                rule: rule.to_string(),
            }),
            Some(value) => Ok(LabelRule::KeyValue(key.to_string(), value.to_string())),
        }
    }

    /// True if the node carries the key (and, for `KeyValue`, exactly the value).
    pub fn matches(&self, node: &Node) -> bool {
        let Some(labels) = node.metadata.labels.as_ref() else {
            return false;
        };

        match self {
            LabelRule::KeyOnly(key) => labels.contains_key(key),
            LabelRule::KeyValue(key, value) => labels.get(key) == Some(value),
        }
    }
}

impl fmt::Display for LabelRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelRule::KeyOnly(key) => write!(f, "{}", key),
            LabelRule::KeyValue(key, value) => write!(f, "{}={}", key, value),
        }
    }
}

/// On-disk configuration, as read from YAML.
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigFile {
    /// Label rule identifying spot nodes (`key` or `key=value`)
    pub spot_node_label: String,

    /// Label rule identifying on-demand nodes (`key` or `key=value`)
    pub on_demand_node_label: String,

    /// Pods on spot nodes with a priority below this are ignored
    pub priority_threshold: i32,

    /// Maximum number of nodes whose pods are listed concurrently
    #[schemars(range(min = 1))]
    pub build_concurrency: usize,

    /// Seconds between two node map snapshots in `run` mode
    #[schemars(range(min = 1))]
    pub housekeeping_interval_secs: u64,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            spot_node_label: DEFAULT_SPOT_NODE_LABEL.to_string(),
            on_demand_node_label: DEFAULT_ON_DEMAND_NODE_LABEL.to_string(),
            priority_threshold: DEFAULT_PRIORITY_THRESHOLD,
            build_concurrency: DEFAULT_BUILD_CONCURRENCY,
            housekeeping_interval_secs: DEFAULT_HOUSEKEEPING_INTERVAL_SECS,
        }
    }
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    /// Parse the label rules and check the tuning values.
    pub fn validate(&self) -> Result<NodeMapConfig, ConfigError> {
        if self.build_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }

        Ok(NodeMapConfig {
            spot_rule: LabelRule::parse(&self.spot_node_label)?,
            on_demand_rule: LabelRule::parse(&self.on_demand_node_label)?,
            priority_threshold: self.priority_threshold,
            build_concurrency: self.build_concurrency,
        })
    }
}

/// Validated, immutable settings used to classify nodes and build the map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMapConfig {
    pub spot_rule: LabelRule,
    pub on_demand_rule: LabelRule,
    pub priority_threshold: i32,
    pub build_concurrency: usize,
}

impl NodeMapConfig {
    pub fn new(spot_rule: LabelRule, on_demand_rule: LabelRule, priority_threshold: i32) -> Self {
        Self {
            spot_rule,
            on_demand_rule,
            priority_threshold,
            build_concurrency: DEFAULT_BUILD_CONCURRENCY,
        }
    }
}

impl Default for NodeMapConfig {
    fn default() -> Self {
        Self::new(
            LabelRule::KeyValue("kubernetes.io/role".to_string(), "spot-worker".to_string()),
            LabelRule::KeyValue("kubernetes.io/role".to_string(), "worker".to_string()),
            DEFAULT_PRIORITY_THRESHOLD,
        )
    }
}
