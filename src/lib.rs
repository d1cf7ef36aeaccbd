//! Classified, pre-sorted view of a cluster's spot and on-demand nodes for a
//! rescheduler that drains spot nodes onto on-demand capacity.

pub mod cluster;
pub mod config;
pub mod error;
pub mod metrics;
pub mod nodes;
pub mod report;

pub use cluster::{KubeCluster, NodeLister, PodLister};
pub use config::{ConfigFile, LabelRule, NodeMapConfig};
pub use error::{ConfigError, LoadError, QueryError};
pub use nodes::{NodeClass, NodeInfo, NodeInfos, NodeMap};
