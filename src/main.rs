//! Storage Lifecycle Operator
//!
//! Converges storage-cluster infrastructure resources toward declared
//! `StorageDeployment` objects and drains storage-plugin workload from nodes
//! scheduled for maintenance.

use clap::Parser;
use kube::{Client, CustomResourceExt};
use prometheus::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storage_lifecycle_operator::adapters::DrainScope;
use storage_lifecycle_operator::controller::{self, Context, Metrics, OperatorConfig, StatusStore};
use storage_lifecycle_operator::{
    ApiServer, ApiServerConfig, DrainConfig, DrainKeys, Error, PollSpec, Result,
    StorageDeployment,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Storage Lifecycle Operator - declarative reconciler and node-drain orchestrator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// REST API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8090")]
    api_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Namespace to watch for StorageDeployments (all when unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Namespace of the storage-plugin DaemonSet
    #[arg(long, env = "PLUGIN_NAMESPACE", default_value = "rook-ceph")]
    plugin_namespace: String,

    /// Label selector of the storage-plugin pods
    #[arg(long, env = "PLUGIN_SELECTOR", default_value = "app=csi-rbdplugin")]
    plugin_selector: String,

    /// Container inside the plugin pod used for mount inspection
    #[arg(long, env = "PLUGIN_CONTAINER", default_value = "csi-rbdplugin")]
    plugin_container: String,

    /// CSI attacher whose volume attachments are cleaned up
    #[arg(long, env = "CSI_ATTACHER", default_value = "rbd.csi.ceph.com")]
    csi_attacher: String,

    /// Label selector restricting the nodes evaluated for drain
    #[arg(long, env = "NODE_SELECTOR")]
    node_selector: Option<String>,

    /// Label marking nodes under eviction supervision
    #[arg(long, env = "WATCH_LABEL", default_value = "lifecycle.billyronks.io/csi-watch")]
    watch_label: String,

    /// Annotation requesting a drain
    #[arg(long, env = "DRAIN_REQUEST_ANNOTATION", default_value = "lifecycle.billyronks.io/drain-request")]
    drain_request_annotation: String,

    /// Annotation reporting a node ready for maintenance
    #[arg(long, env = "DRAIN_READY_ANNOTATION", default_value = "lifecycle.billyronks.io/drain-ready")]
    drain_ready_annotation: String,

    /// Poll interval for volume detach, in seconds
    #[arg(long, env = "DETACH_INTERVAL", default_value = "10")]
    detach_interval_secs: u64,

    /// Timeout for volume detach, in seconds
    #[arg(long, env = "DETACH_TIMEOUT", default_value = "300")]
    detach_timeout_secs: u64,

    /// Poll interval for plugin pod eviction, in seconds
    #[arg(long, env = "EVICTION_INTERVAL", default_value = "5")]
    eviction_interval_secs: u64,

    /// Timeout for plugin pod eviction, in seconds
    #[arg(long, env = "EVICTION_TIMEOUT", default_value = "120")]
    eviction_timeout_secs: u64,

    /// Poll interval for the daemonset consistency check, in seconds
    #[arg(long, env = "CONSISTENCY_INTERVAL", default_value = "5")]
    consistency_interval_secs: u64,

    /// Timeout for the daemonset consistency check, in seconds
    #[arg(long, env = "CONSISTENCY_TIMEOUT", default_value = "120")]
    consistency_timeout_secs: u64,

    /// Seconds between passes for a deployment
    #[arg(long, env = "REQUEUE_INTERVAL", default_value = "300")]
    requeue_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Print the StorageDeployment CRD as YAML and exit
    #[arg(long)]
    print_crd: bool,
}

impl Args {
    fn operator_config(&self) -> Result<OperatorConfig> {
        let drain = DrainConfig {
            keys: DrainKeys {
                watch_label: self.watch_label.clone(),
                drain_request_annotation: self.drain_request_annotation.clone(),
                drain_ready_annotation: self.drain_ready_annotation.clone(),
            },
            plugin_container: self.plugin_container.clone(),
            attacher: self.csi_attacher.clone(),
            detach: PollSpec::from_secs(self.detach_interval_secs, self.detach_timeout_secs)?,
            pod_eviction: PollSpec::from_secs(
                self.eviction_interval_secs,
                self.eviction_timeout_secs,
            )?,
            consistency: PollSpec::from_secs(
                self.consistency_interval_secs,
                self.consistency_timeout_secs,
            )?,
            ..Default::default()
        };

        if self.requeue_interval_secs == 0 {
            return Err(Error::Configuration(
                "requeue interval must be greater than zero".into(),
            ));
        }

        Ok(OperatorConfig {
            watch_namespace: self.watch_namespace.clone(),
            requeue_interval: Duration::from_secs(self.requeue_interval_secs),
            drain,
            drain_scope: DrainScope {
                plugin_namespace: self.plugin_namespace.clone(),
                plugin_selector: self.plugin_selector.clone(),
                node_selector: self.node_selector.clone(),
            },
            ..Default::default()
        })
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_crd {
        print!("{}", serde_yaml::to_string(&StorageDeployment::crd())?);
        return Ok(());
    }

    init_logging(&args);

    info!("Starting Storage Lifecycle Operator");
    info!("  Version: {}", storage_lifecycle_operator::VERSION);
    info!("  REST API: {}", args.api_addr);
    info!("  Metrics: {}", args.metrics_addr);

    let config = args.operator_config()?;
    let api_addr: SocketAddr = args
        .api_addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid REST API address: {}", e)))?;
    let metrics_addr: SocketAddr = args
        .metrics_addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid metrics address: {}", e)))?;

    let client = Client::try_default().await?;
    let registry = Registry::new();
    let metrics = Arc::new(Metrics::new(&registry)?);
    let status = Arc::new(StatusStore::new());
    let cancel = CancellationToken::new();

    // Metrics server
    let metrics_cancel = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr, registry, metrics_cancel).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Status API
    let api_server = ApiServer::new(ApiServerConfig { rest_addr: api_addr }, status.clone());
    let api_cancel = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = api_server.run(api_cancel).await {
            error!("API server error: {}", e);
        }
    });

    // Abort in-flight polls on shutdown
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
        }
        signal_cancel.cancel();
    });

    let ctx = Arc::new(Context::new(client, config, status, metrics, cancel.clone()));
    controller::run(ctx).await;
    cancel.cancel();

    info!("Operator shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},hyper=warn,kube=info,tower=warn,tower_http=info,axum=info",
            level
        ))
    });

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(
    addr: SocketAddr,
    registry: Registry,
    shutdown: CancellationToken,
) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::header::CONTENT_TYPE;
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let registry = Arc::new(registry);

    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                async move {
                    let mut response = Response::new(Body::empty());
                    match req.uri().path() {
                        "/metrics" => {
                            let encoder = TextEncoder::new();
                            let mut buffer = Vec::new();
                            match encoder.encode(&registry.gather(), &mut buffer) {
                                Ok(()) => {
                                    if let Ok(value) = encoder.format_type().parse() {
                                        response.headers_mut().insert(CONTENT_TYPE, value);
                                    }
                                    *response.body_mut() = Body::from(buffer);
                                }
                                Err(e) => {
                                    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                                    *response.body_mut() = Body::from(e.to_string());
                                }
                            }
                        }
                        "/healthz" | "/livez" => *response.body_mut() = Body::from("ok"),
                        _ => {
                            *response.status_mut() = StatusCode::NOT_FOUND;
                            *response.body_mut() = Body::from("not found");
                        }
                    }
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::try_bind(&addr)
        .map_err(|e| Error::Internal(format!("Failed to bind metrics server: {}", e)))?
        .serve(make_svc)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
