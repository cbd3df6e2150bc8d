//! Standalone cross-cluster mirror process.
//!
//! Loads the YAML configuration, connects a broker client per cluster, and
//! runs every enabled replication flow until interrupted.

use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kafka_mirror_core::broker::BrokerClient;
use kafka_mirror_core::config::{LoggingConfig, MirrorConfig};
use kafka_mirror_core::flow::{FlowHandle, FlowSettings, MirrorFlow};
use kafka_mirror_core::metrics::MirrorMetrics;

mod kafka;

use kafka::KafkaBrokerClient;

/// Cross-cluster topic replication with consumer-group offset translation.
#[derive(Parser)]
#[command(name = "kafka-mirror")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, default_value = "mirror.yaml")]
    config: String,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = MirrorConfig::from_file(&args.config)?;

    if args.check {
        println!("configuration ok: {} cluster(s), {} flow(s)", config.clusters.len(), config.flows.len());
        return Ok(());
    }

    let log_config = match args.verbose {
        0 => config.logging.clone(),
        1 => LoggingConfig {
            level: "debug".to_string(),
            ..config.logging.clone()
        },
        _ => LoggingConfig {
            level: "trace".to_string(),
            ..config.logging.clone()
        },
    };
    setup_tracing(&log_config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        clusters = config.clusters.len(),
        flows = config.enabled_flows().len(),
        "starting kafka mirror"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move { run_mirror(config).await })
}

fn setup_tracing(config: &LoggingConfig) {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());
    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer()).init();
    }
}

async fn run_mirror(config: MirrorConfig) -> anyhow::Result<()> {
    let metrics = Arc::new(MirrorMetrics::new());

    // One client per cluster, shared by every flow touching it.
    let mut clients: HashMap<String, Arc<dyn BrokerClient>> = HashMap::new();
    for (alias, cluster) in &config.clusters {
        let client = KafkaBrokerClient::new(alias, cluster)?;
        clients.insert(alias.clone(), Arc::new(client));
        info!(
            cluster = %alias,
            bootstrap_servers = ?cluster.bootstrap_servers,
            "configured cluster client"
        );
    }

    if config.metrics.enabled {
        let metrics_clone = Arc::clone(&metrics);
        let metrics_addr = config.metrics.address.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_metrics(&metrics_addr, metrics_clone).await {
                tracing::error!(error = %e, "metrics server error");
            }
        });
        info!(address = %config.metrics.address, "metrics server started");
    }

    let mut flows: Vec<FlowHandle> = Vec::new();
    for flow_config in config.enabled_flows() {
        let settings = FlowSettings::compile(&config, flow_config)?;
        let source = Arc::clone(&clients[&flow_config.source]);
        let target = Arc::clone(&clients[&flow_config.target]);
        let handle = MirrorFlow::new(source, target, settings, Arc::clone(&metrics))
            .start()
            .await?;
        info!(flow = %flow_config.name(), "flow started");
        flows.push(handle);
    }

    if flows.is_empty() {
        anyhow::bail!("no enabled flows in configuration");
    }

    shutdown_signal().await;
    info!("shutdown signal received, draining flows");
    for flow in flows {
        flow.shutdown().await;
    }
    info!("mirror shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

async fn serve_metrics(
    addr: &str,
    metrics: Arc<MirrorMetrics>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    let addr: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(addr).await?;

    info!(address = %addr, "metrics server listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = Arc::clone(&metrics);

        tokio::spawn(async move {
            let service = service_fn(move |_req: Request<hyper::body::Incoming>| {
                let metrics = Arc::clone(&metrics);
                async move {
                    let body = metrics.encode();
                    Ok::<_, hyper::Error>(Response::new(Full::new(Bytes::from(body))))
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(error = %e, "metrics connection error");
            }
        });
    }
}
