use thiserror::Error;

/// Failure reported by the cluster-query collaborator.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Kube error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Cluster query unavailable: {0}")]
    Unavailable(String),
}

/// Failure building a node map. Any of these aborts the whole build.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to list pods on node {node}: {source}")]
    Pods {
        node: String,
        #[source]
        source: QueryError,
    },
}

impl LoadError {
    /// Short label used for the error metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            LoadError::Pods { .. } => "pod_query_error",
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("label rule {rule:?} has an empty key")]
    EmptyLabelKey { rule: String },

    #[error("label rule {rule:?} contains more than one '='; use `key` or `key=value`")]
    AmbiguousLabelRule { rule: String },

    #[error("build concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}
