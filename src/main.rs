use clap::{Parser, Subcommand, ValueEnum};
use spot_rescheduler::metrics::{health_handler, metrics_handler, ready_handler, MetricsCollector};
use spot_rescheduler::report::NodeMapReport;
use spot_rescheduler::{
    ConfigError, ConfigFile, KubeCluster, LoadError, NodeLister, NodeMap, NodeMapConfig,
    QueryError,
};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};
use warp::Filter;

#[derive(Parser, Debug)]
#[command(
    name = "spot-rescheduler",
    version,
    about = "Builds the spot/on-demand node map used to drain spot nodes"
)]
struct Cli {
    /// YAML config file
    #[arg(long, env = "SPOT_RESCHEDULER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Label rule for spot nodes (`key` or `key=value`)
    #[arg(long, env = "SPOT_NODE_LABEL", global = true)]
    spot_node_label: Option<String>,

    /// Label rule for on-demand nodes (`key` or `key=value`)
    #[arg(long, env = "ON_DEMAND_NODE_LABEL", global = true)]
    on_demand_node_label: Option<String>,

    /// Pods on spot nodes below this priority are ignored
    #[arg(long, env = "PRIORITY_THRESHOLD", global = true, allow_negative_numbers = true)]
    priority_threshold: Option<i32>,

    /// Nodes whose pods are listed concurrently
    #[arg(long, env = "BUILD_CONCURRENCY", global = true)]
    build_concurrency: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rebuild the node map periodically and export it as metrics
    Run {
        #[arg(long, env = "METRICS_PORT", default_value_t = 8080)]
        metrics_port: u16,

        /// Seconds between snapshots, overrides the config file
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    /// Build the node map once and print it
    Snapshot {
        #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
        output: OutputFormat,
    },
    /// Print the JSON schema of the config file
    ConfigSchema,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Error, Debug)]
enum SnapshotError {
    #[error("failed to list nodes: {0}")]
    Nodes(#[source] QueryError),

    #[error(transparent)]
    Load(#[from] LoadError),
}

impl SnapshotError {
    fn kind(&self) -> &'static str {
        match self {
            SnapshotError::Nodes(_) => "node_query_error",
            SnapshotError::Load(e) => e.kind(),
        }
    }
}

impl Cli {
    /// Config file (or defaults) with command line overrides applied.
    fn config_file(&self) -> Result<ConfigFile, ConfigError> {
        let mut file = match &self.config {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };

        if let Some(label) = &self.spot_node_label {
            file.spot_node_label = label.clone();
        }
        if let Some(label) = &self.on_demand_node_label {
            file.on_demand_node_label = label.clone();
        }
        if let Some(threshold) = self.priority_threshold {
            file.priority_threshold = threshold;
        }
        if let Some(concurrency) = self.build_concurrency {
            file.build_concurrency = concurrency;
        }
        Ok(file)
    }
}

async fn snapshot(
    cluster: &KubeCluster,
    config: &NodeMapConfig,
    metrics: &MetricsCollector,
) -> Result<NodeMap, SnapshotError> {
    let timer = metrics.start_snapshot();

    let result = async {
        let nodes = cluster.list_nodes().await.map_err(SnapshotError::Nodes)?;
        Ok::<_, SnapshotError>(NodeMap::build(nodes, config, cluster).await?)
    }
    .await;

    match result {
        Ok(map) => {
            metrics.observe_node_map(&map);
            timer.success();
            Ok(map)
        }
        Err(e) => {
            timer.error(e.kind());
            Err(e)
        }
    }
}

async fn run(
    cluster: KubeCluster,
    config: NodeMapConfig,
    interval: Duration,
    metrics_port: u16,
) {
    let metrics = MetricsCollector::new();

    let routes = metrics_handler()
        .or(health_handler(metrics.clone()))
        .or(ready_handler(metrics.clone()));
    tokio::spawn(async move {
        info!(port = metrics_port, "starting metrics server");
        warp::serve(routes).run(([0, 0, 0, 0], metrics_port)).await;
    });

    info!(
        spot_rule = %config.spot_rule,
        on_demand_rule = %config.on_demand_rule,
        priority_threshold = config.priority_threshold,
        interval_secs = interval.as_secs(),
        "starting spot rescheduler"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }

        match snapshot(&cluster, &config, &metrics).await {
            Ok(map) => {
                let report = NodeMapReport::new(&map);
                for node in &report.spot {
                    debug!(
                        node = %node.name,
                        requested_cpu = node.requested_cpu,
                        pods = node.pods.len(),
                        "spot node"
                    );
                }
                info!(
                    spot_nodes = report.spot.len(),
                    on_demand_nodes = report.on_demand.len(),
                    spot_requested_cpu = report.spot_requested_cpu(),
                    on_demand_free_cpu = report.on_demand_free_cpu(),
                    "node map snapshot"
                );
            }
            Err(e) => error!(error = %e, "node map snapshot failed, retrying next interval"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Command::ConfigSchema => {
            let schema = schemars::schema_for!(ConfigFile);
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
        Command::Snapshot { output } => {
            let config = cli.config_file()?.validate()?;
            let cluster = KubeCluster::try_default().await?;
            let map = snapshot(&cluster, &config, &MetricsCollector::new()).await?;
            let report = NodeMapReport::new(&map);
            match output {
                OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&report)?),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            }
        }
        Command::Run {
            metrics_port,
            interval_secs,
        } => {
            let file = cli.config_file()?;
            let config = file.validate()?;
            let interval =
                Duration::from_secs(interval_secs.unwrap_or(file.housekeeping_interval_secs).max(1));
            let cluster = KubeCluster::try_default().await?;
            run(cluster, config, interval, *metrics_port).await;
        }
    }

    Ok(())
}
