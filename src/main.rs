//! FSS Provisioner
//!
//! Watches PersistentVolumeClaims of FSS storage classes and provisions
//! mount targets and exports for them.

use anyhow::Context;
use clap::Parser;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fss_provisioner::controlplane::kube::{ClaimWatcher, KubeStatusSink, PublisherConfig};
use fss_provisioner::controlplane::MemoryStatusSink;
use fss_provisioner::domain::ports::ClaimStatusSink;
use fss_provisioner::{
    ApiServer, ApiServerConfig, BackendFactory, ProvisionerConfig, ProvisionerMetrics, Reconciler,
    StoreFactory,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// FSS Provisioner - dynamic File Storage Service volumes for Kubernetes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Status API bind address
    #[arg(long, env = "API_ADDR")]
    api_addr: Option<SocketAddr>,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,

    /// Provisioner name storage classes refer to
    #[arg(long, env = "PROVISIONER_NAME")]
    provisioner_name: Option<String>,

    /// File storage backend (memory, http)
    #[arg(long, env = "BACKEND")]
    backend: Option<String>,

    /// File storage API endpoint
    #[arg(long, env = "FSS_ENDPOINT")]
    endpoint: Option<String>,

    /// Compartment for created resources
    #[arg(long, env = "COMPARTMENT_ID")]
    compartment_id: Option<String>,

    /// Subnet for mount targets of automatically provisioned claims
    #[arg(long, env = "DEFAULT_SUBNET_ID")]
    default_subnet_id: Option<String>,

    /// Provision state store (memory, file)
    #[arg(long, env = "STORE")]
    store: Option<String>,

    /// State directory of the file store
    #[arg(long, env = "STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Tags applied to every export (`key=value,namespace.key=value`)
    #[arg(long, env = "OCI_DEFAULT_TAGS")]
    default_tags: Option<String>,

    /// Prefix of export display names
    #[arg(long, env = "EXPORT_NAME_PREFIX")]
    export_name_prefix: Option<String>,

    /// Number of reconciler workers
    #[arg(long, env = "WORKERS")]
    workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Run in standalone mode (no Kubernetes)
    #[arg(long, env = "STANDALONE")]
    standalone: bool,
}

impl Args {
    /// Load the configuration file (if any) and apply flag overrides
    fn config(&self) -> anyhow::Result<ProvisionerConfig> {
        let mut config = match &self.config {
            Some(path) => ProvisionerConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => ProvisionerConfig::default(),
        };

        if let Some(addr) = self.api_addr {
            config.api_addr = addr;
        }
        if let Some(addr) = self.metrics_addr {
            config.metrics_addr = addr;
        }
        if let Some(name) = &self.provisioner_name {
            config.provisioner_name = name.clone();
        }
        if let Some(backend) = &self.backend {
            config.backend.kind = backend.clone();
        }
        if let Some(endpoint) = &self.endpoint {
            config.backend.endpoint = endpoint.clone();
        }
        if let Some(compartment) = &self.compartment_id {
            config.backend.compartment_id = compartment.clone();
        }
        if let Some(subnet) = &self.default_subnet_id {
            config.reconciler.default_subnet_id = Some(subnet.clone());
        }
        if let Some(store) = &self.store {
            config.store.kind = store.clone();
        }
        if let Some(dir) = &self.state_dir {
            config.store.path = Some(dir.clone());
        }
        if let Some(tags) = &self.default_tags {
            config
                .set_default_tags(tags)
                .context("invalid default tags")?;
        }
        if let Some(prefix) = &self.export_name_prefix {
            config.reconciler.export_name_prefix = prefix.clone();
        }
        if let Some(workers) = self.workers {
            config.reconciler.workers = workers;
        }
        Ok(config)
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args)?;

    let config = args.config()?;

    info!("Starting FSS Provisioner");
    info!("  Version: {}", fss_provisioner::VERSION);
    info!("  Provisioner: {}", config.provisioner_name);
    info!("  Backend: {}", config.backend.kind);
    info!("  Store: {}", config.store.kind);
    info!("  Standalone mode: {}", args.standalone);

    let backend = BackendFactory::create(
        &config.backend.kind,
        config.backend.backend_config(config.region.as_deref()),
    )
    .context("failed to create file storage backend")?;

    let store_backend = config.store_backend()?;
    let store = StoreFactory::open(&store_backend)
        .await
        .context("failed to open provision store")?;

    let client = if args.standalone {
        None
    } else {
        Some(
            kube::Client::try_default()
                .await
                .context("failed to create Kubernetes client")?,
        )
    };

    let sink: Arc<dyn ClaimStatusSink> = match &client {
        Some(client) => Arc::new(KubeStatusSink::new(
            client.clone(),
            PublisherConfig {
                provisioner_name: config.provisioner_name.clone(),
                region: config.region.clone(),
            },
        )),
        None => Arc::new(MemoryStatusSink::new()),
    };

    let reconciler = Reconciler::new(config.reconciler.clone(), backend, store, sink)?;
    let resumed = reconciler.recover().await?;
    info!(resumed, "Provision store recovered");

    let shutdown = CancellationToken::new();
    let workers = tokio::spawn(reconciler.clone().run(shutdown.clone()));

    if let Some(client) = client {
        let watcher = ClaimWatcher::new(client, reconciler.clone(), config.provisioner_name.clone());
        let token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = watcher.run(token.clone()).await {
                error!("Claim watcher error: {}", e);
                token.cancel();
            }
        });
    }

    // Start metrics server
    let metrics = reconciler.metrics();
    let metrics_addr = config.metrics_addr;
    let token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr, metrics, token).await {
            error!("Metrics server error: {}", e);
        }
    });

    let token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown signal received");
        token.cancel();
    });

    let api_server = ApiServer::new(
        ApiServerConfig {
            rest_addr: config.api_addr,
        },
        reconciler.clone(),
    );
    let result = api_server.run(shutdown.clone()).await;

    shutdown.cancel();
    workers.await.context("reconciler task failed")?;
    result?;

    info!("Provisioner shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("kube=info".parse()?)
        .add_directive("tower=warn".parse()?)
        .add_directive("tower_http=info".parse()?)
        .add_directive("axum=info".parse()?);

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
    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(
    addr: SocketAddr,
    metrics: Arc<ProvisionerMetrics>,
    shutdown: CancellationToken,
) -> fss_provisioner::Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::Server;

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let metrics = metrics.clone();
                async move { Ok::<_, Infallible>(metrics_response(req, &metrics)) }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| fss_provisioner::Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}

fn metrics_response(
    req: hyper::Request<hyper::Body>,
    metrics: &ProvisionerMetrics,
) -> hyper::Response<hyper::Body> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::{Body, Response, StatusCode};

    let (status, body) = match req.uri().path() {
        "/metrics" => match metrics.encode() {
            Ok(text) => (StatusCode::OK, text),
            Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        },
        "/healthz" | "/livez" => (StatusCode::OK, "ok".to_string()),
        _ => (StatusCode::NOT_FOUND, "not found".to_string()),
    };

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}
