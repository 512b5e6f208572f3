use clap::Parser;
use pkg_constants::controller::{DEFAULT_RESYNC_INTERVAL_SECS, DEFAULT_WORKERS};
use pkg_constants::paths::{DEFAULT_CONTROLLER_CONFIG, DEFAULT_CONTROLLER_DATA_DIR};
use pkg_controllers::deployment::{ControllerConfig, DeploymentController};
use pkg_controllers::events::StoreEventRecorder;
use pkg_state::client::StateStore;
use pkg_state::registry::Registry;
use pkg_types::config::{ControllerConfigFile, load_config_file};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "kdeploy-controller", about = "Deployment rollout controller")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_CONTROLLER_CONFIG)]
    config: String,

    /// Directory for SlateDB state storage
    #[arg(long)]
    data_dir: Option<String>,

    /// Number of reconcile workers
    #[arg(long)]
    workers: Option<usize>,

    /// Seconds between full resyncs of every Deployment
    #[arg(long)]
    resync_interval_secs: Option<u64>,

    /// Max old ReplicaSets scaled down per pass (0 = unbounded)
    #[arg(long)]
    max_scale_downs_per_pass: Option<usize>,

    /// Log output format: text or json
    #[arg(long)]
    log_format: Option<String>,
}

fn init_tracing(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config file (returns defaults if file not found)
    let file_cfg: ControllerConfigFile = load_config_file(&cli.config)?;

    // Merge: CLI args > config file > defaults
    let log_format = cli
        .log_format
        .or(file_cfg.log_format)
        .unwrap_or_else(|| "text".to_string());
    init_tracing(&log_format);
    info!("Config file: {}", cli.config);

    let data_dir = cli
        .data_dir
        .or(file_cfg.data_dir)
        .unwrap_or_else(|| DEFAULT_CONTROLLER_DATA_DIR.to_string());
    let workers = cli.workers.or(file_cfg.workers).unwrap_or(DEFAULT_WORKERS);
    let resync_secs = cli
        .resync_interval_secs
        .or(file_cfg.resync_interval_secs)
        .unwrap_or(DEFAULT_RESYNC_INTERVAL_SECS);
    let max_scale_downs = cli
        .max_scale_downs_per_pass
        .or(file_cfg.max_scale_downs_per_pass);

    info!("Starting kdeploy-controller");
    info!("  Data dir:  {}", data_dir);
    info!("  Workers:   {}", workers);
    info!("  Resync:    {}s", resync_secs);
    match max_scale_downs {
        Some(cap) if cap > 0 => info!("  Scale-down cap: {} per pass", cap),
        _ => info!("  Scale-down cap: unbounded"),
    }

    let store = StateStore::new(&data_dir).await?;
    let registry = Registry::new(store.clone());
    let recorder = StoreEventRecorder::new(store.clone());

    let config = ControllerConfig {
        workers,
        resync_interval: Duration::from_secs(resync_secs.max(1)),
        max_scale_downs_per_pass: max_scale_downs,
        ..Default::default()
    };
    let controller = DeploymentController::new(
        Arc::new(registry),
        Arc::new(recorder),
        store.event_log.clone(),
        config,
    );
    let queue = controller.queue().clone();
    let handle = controller.start();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, draining workers");
    queue.shutdown();
    if let Err(e) = handle.await {
        warn!("Controller task ended abnormally: {}", e);
    }

    store.close().await?;
    info!("kdeploy-controller stopped");
    Ok(())
}
