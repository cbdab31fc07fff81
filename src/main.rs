//! OpenSearch DR Operator
//!
//! Disaster-recovery switchover controller for active/standby OpenSearch
//! cluster pairs.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                   OpenSearchService Controller                       │
//! │          (subsystem driver: reconcile → configure → status)          │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────┐   shared    ┌─────────────────────────┐ │
//! │  │  Switchover             │◄── lock ───►│  Replication Watcher    │ │
//! │  │  Orchestrator           │             │  (self-healing)         │ │
//! │  └───────────┬─────────────┘             └────────────┬────────────┘ │
//! │              │        ┌─────────────────────┐         │              │
//! │              └───────►│ Replication Manager │◄────────┘              │
//! │                       └─────────────────────┘                        │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  OpenSearch REST  │  Peer Probe  │  DBaaS Users Recovery  │  kube    │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use opensearch_dr_operator::{
    controller, Credentials, DrMetrics, HealthServer, HealthServerConfig, OperatorConfig,
    OperatorContext, ReplicationChecker, RestClient, RestClientConfig,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// OpenSearch DR Operator - switchover controller for active/standby clusters
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    /// Log DR health response bodies
    #[arg(long, env = "DEBUG", global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the controller with liveness, metrics and DR health servers
    Operator(OperatorArgs),
    /// Run only the DR health API
    HealthServer(HealthArgs),
}

/// Local OpenSearch cluster
#[derive(Args, Debug)]
struct ClusterArgs {
    /// OpenSearch service name
    #[arg(long, env = "OPENSEARCH_NAME", default_value = "opensearch")]
    opensearch_name: String,

    /// OpenSearch protocol; derived from the CA file when unset
    #[arg(long, env = "OPENSEARCH_PROTOCOL")]
    opensearch_protocol: Option<String>,

    /// OpenSearch URL, overrides name and protocol
    #[arg(long, env = "OPENSEARCH_HOST")]
    opensearch_host: Option<String>,

    #[arg(long, env = "OPENSEARCH_USERNAME", default_value = "")]
    opensearch_username: String,

    #[arg(long, env = "OPENSEARCH_PASSWORD", default_value = "", hide_env_values = true)]
    opensearch_password: String,

    /// Root CA of the OpenSearch cluster
    #[arg(long, env = "CA_CERT", default_value = "/certs/crt.pem")]
    ca_cert: PathBuf,

    /// Timeout of outbound HTTP requests in seconds
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value = "30")]
    http_timeout_secs: u64,

    /// DR health API bind address
    #[arg(long, env = "DR_HEALTH_ADDR", default_value = "0.0.0.0:8069")]
    dr_health_addr: SocketAddr,
}

impl ClusterArgs {
    fn rest_config(&self) -> RestClientConfig {
        let mut config = RestClientConfig::for_service(&self.opensearch_name, self.ca_cert.clone())
            .with_credentials(Credentials::new(
                self.opensearch_username.clone(),
                self.opensearch_password.clone(),
            ))
            .with_timeout(Duration::from_secs(self.http_timeout_secs));
        if let Some(protocol) = &self.opensearch_protocol {
            config = config.with_url(format!("{}://{}-internal:9200", protocol, self.opensearch_name));
        }
        if let Some(host) = &self.opensearch_host {
            config = config.with_url(host.clone());
        }
        config
    }
}

#[derive(Args, Debug)]
struct OperatorArgs {
    #[command(flatten)]
    cluster: ClusterArgs,

    /// Namespace to watch; all namespaces when unset
    #[arg(long, env = "WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Secondary regional client service gated during switchovers
    #[arg(long, env = "OPENSEARCH_GKE_SERVICE")]
    secondary_service: Option<String>,

    /// Root CA of the DBaaS aggregator and adapter
    #[arg(long, env = "DBAAS_CA_CERT", default_value = "/tls/dbaas/ca.crt")]
    dbaas_ca_cert: PathBuf,

    /// Liveness server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: SocketAddr,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8082")]
    metrics_addr: SocketAddr,
}

#[derive(Args, Debug)]
struct HealthArgs {
    #[command(flatten)]
    cluster: ClusterArgs,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli)?;

    info!("Starting OpenSearch DR Operator");
    info!("  Version: {}", opensearch_dr_operator::VERSION);

    match cli.command {
        Command::Operator(args) => run_operator(args, cli.verbose).await,
        Command::HealthServer(args) => run_dr_health(args, cli.verbose).await,
    }
}

async fn run_operator(args: OperatorArgs, verbose: bool) -> anyhow::Result<()> {
    let metrics = Arc::new(DrMetrics::new()?);
    let shutdown = CancellationToken::new();

    // Start liveness server
    let health_addr = args.health_addr;
    tokio::spawn(async move {
        if let Err(e) = run_health_server(health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr;
    let exported = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr, exported).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Start DR health API
    let checker = ReplicationChecker::new(Arc::new(RestClient::new(args.cluster.rest_config())?));
    let dr_health = HealthServer::new(
        HealthServerConfig {
            addr: args.cluster.dr_health_addr,
            verbose,
        },
        checker,
    )
    .with_metrics(metrics.clone());
    let dr_health_shutdown = shutdown.clone();
    let dr_health_handle = tokio::spawn(async move { dr_health.run(dr_health_shutdown).await });

    let config = OperatorConfig {
        namespace: args.watch_namespace.filter(|ns| !ns.is_empty()),
        opensearch_url: args.cluster.opensearch_host.clone(),
        secondary_service: args.secondary_service.filter(|s| !s.is_empty()),
        ca_cert: args.cluster.ca_cert.clone(),
        dbaas_ca_cert: args.dbaas_ca_cert,
        http_timeout: Duration::from_secs(args.cluster.http_timeout_secs),
        ..OperatorConfig::default()
    };
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("<all>"));

    let client = kube::Client::try_default()
        .await
        .context("Kubernetes client cannot be created")?;
    let ctx = Arc::new(OperatorContext::new(client, config, metrics));

    let result = controller::run(ctx).await;

    shutdown.cancel();
    if let Err(e) = dr_health_handle.await? {
        error!("DR health server error: {}", e);
    }

    result?;
    info!("Operator shutdown complete");
    Ok(())
}

async fn run_dr_health(args: HealthArgs, verbose: bool) -> anyhow::Result<()> {
    let checker = ReplicationChecker::new(Arc::new(RestClient::new(args.cluster.rest_config())?));
    let server = HealthServer::new(
        HealthServerConfig {
            addr: args.cluster.dr_health_addr,
            verbose,
        },
        checker,
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.cancel();
        }
    });

    server.run(shutdown).await?;
    info!("DR health server stopped");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    // Response bodies are logged at debug level
    let level = if cli.verbose { level.max(Level::DEBUG) } else { level };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("kube=info".parse()?)
        .add_directive("tower=warn".parse()?)
        .add_directive("axum=info".parse()?);

    if cli.log_json {
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
// Liveness Server
// =============================================================================

async fn run_health_server(addr: SocketAddr) -> anyhow::Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let mut response = Response::new(Body::from("ok"));
            if !matches!(req.uri().path(), "/healthz" | "/livez" | "/readyz") {
                *response.status_mut() = StatusCode::NOT_FOUND;
                *response.body_mut() = Body::from("not found");
            }
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    info!("Health server listening on {}", addr);
    Server::bind(&addr).serve(make_svc).await?;
    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: SocketAddr, metrics: Arc<DrMetrics>) -> anyhow::Result<()> {
    use hyper::header::CONTENT_TYPE;
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let mut response = Response::new(Body::empty());
                    if req.uri().path() != "/metrics" {
                        *response.status_mut() = StatusCode::NOT_FOUND;
                        *response.body_mut() = Body::from("not found");
                        return Ok::<_, std::convert::Infallible>(response);
                    }
                    match metrics.encode() {
                        Ok((content_type, buffer)) => {
                            if let Ok(value) = content_type.parse() {
                                response.headers_mut().insert(CONTENT_TYPE, value);
                            }
                            *response.body_mut() = Body::from(buffer);
                        }
                        Err(e) => {
                            error!("Metrics cannot be encoded: {}", e);
                            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                        }
                    }
                    Ok(response)
                }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr).serve(make_svc).await?;
    Ok(())
}
