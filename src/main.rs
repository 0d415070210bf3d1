// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use dd_operator::{
    constants::{
        DEFAULT_METRICS_ADDR, DEFAULT_REQUEUE_SECS, ERROR_REQUEUE_SECS, HEALTHZ_PATH, METRICS_PATH,
        READYZ_PATH, RUNTIME_THREAD_NAME, RUNTIME_WORKER_THREADS,
    },
    context::{Context, Readiness},
    crd::DatadogAgent,
    metrics::gather_metrics,
    reconcilers::ReconcileOptions,
    render::{load_owner, render},
};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use kube::{
    api::ListParams,
    runtime::{
        controller::{self, Action},
        watcher::Config,
        Controller,
    },
    Client, ResourceExt,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
struct ReconcileError(#[from] anyhow::Error);

/// Kubernetes operator deploying Datadog agents from `DatadogAgent` resources.
#[derive(Debug, Parser)]
#[command(name = "dd-operator", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Only watch `DatadogAgent` resources in this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Address serving /metrics, /healthz and /readyz
    #[arg(long, env = "METRICS_ADDR", default_value = DEFAULT_METRICS_ADDR)]
    metrics_addr: SocketAddr,

    /// Run the node agent as an ExtendedDaemonSet
    #[arg(long, env = "EXTENDED_DAEMONSET")]
    extended_daemonset: bool,

    /// Requeue delay of a pass that asked for nothing sooner
    #[arg(long, env = "REQUEUE_SECS", default_value_t = DEFAULT_REQUEUE_SECS)]
    requeue_secs: u64,

    /// Reconcile --manifest in memory and print the resulting objects
    #[arg(long, requires = "manifest")]
    dry_run: bool,

    /// `DatadogAgent` manifest used by --dry-run
    #[arg(long, value_name = "FILE")]
    manifest: Option<PathBuf>,

    /// Log output format
    #[arg(long, env = "RUST_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

impl Args {
    fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            extended_daemonset: self.extended_daemonset,
            default_requeue: Duration::from_secs(self.requeue_secs),
        }
    }

    fn watch_namespace(&self) -> Option<String> {
        self.watch_namespace.clone().filter(|ns| !ns.is_empty())
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    if let Some(Command::Completions { shell }) = args.command {
        clap_complete::generate(shell, &mut Args::command(), "dd-operator", &mut std::io::stdout());
        return Ok(());
    }

    init_tracing(args.log_format);

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(RUNTIME_WORKER_THREADS)
        .thread_name(RUNTIME_THREAD_NAME)
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args))
}

/// Format: timestamp file:line LEVEL message, or JSON with `RUST_LOG_FORMAT=json`.
///
/// Respects `RUST_LOG`, defaulting to INFO. Logs go to stderr so dry-run
/// output on stdout stays valid YAML.
fn init_tracing(format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

async fn async_main(args: Args) -> Result<()> {
    let options = args.reconcile_options();

    if args.dry_run {
        let Some(path) = &args.manifest else {
            anyhow::bail!("--dry-run needs --manifest");
        };
        let manifest = tokio::fs::read_to_string(path).await?;
        print!("{}", render(load_owner(&manifest)?, options).await?);
        return Ok(());
    }

    info!(
        watch_namespace = ?args.watch_namespace(),
        extended_daemonset = options.extended_daemonset,
        requeue_secs = options.default_requeue.as_secs(),
        "Starting Datadog Agent operator"
    );

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;
    let ctx = Arc::new(Context::new(client, options, args.watch_namespace())?);

    // The health server runs for the life of the process; the controller
    // returns once a termination signal was handled.
    tokio::select! {
        result = serve_health(args.metrics_addr, ctx.readiness.clone()) => {
            error!("CRITICAL: health server exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("health server exited unexpectedly without error")
        }
        result = run_controller(ctx.clone()) => {
            result?;
            info!("Controller stopped");
            Ok(())
        }
    }
}

/// Run the `DatadogAgent` controller
async fn run_controller(ctx: Arc<Context>) -> Result<()> {
    info!("Starting DatadogAgent controller");

    // Fails early when the CRD is not installed.
    ctx.owners().list(&ListParams::default().limit(1)).await?;
    ctx.readiness.mark_ready();

    Controller::new(ctx.owners(), Config::default())
        .owns(ctx.api::<Deployment>(), Config::default())
        .owns(ctx.api::<DaemonSet>(), Config::default())
        .shutdown_on_signal()
        .run(reconcile_datadogagent_wrapper, error_policy, Arc::clone(&ctx))
        .for_each(|result| {
            let ctx = Arc::clone(&ctx);
            async move {
                match result {
                    Ok((object, action)) => debug!(object = %object, action = ?action, "Reconcile finished"),
                    // A requeue fired after the owner was deleted
                    Err(controller::Error::ObjectNotFound(object)) => ctx
                        .reconciler
                        .forget_owner(object.namespace.as_deref().unwrap_or_default(), &object.name),
                    Err(e) => warn!(error = %e, "Reconcile failed"),
                }
            }
        })
        .await;

    Ok(())
}

/// Reconcile wrapper for `DatadogAgent`
async fn reconcile_datadogagent_wrapper(
    dda: Arc<DatadogAgent>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    debug!(
        name = %dda.name_any(),
        namespace = ?dda.namespace(),
        "Reconcile wrapper called for DatadogAgent"
    );

    match ctx.reconciler.reconcile(&dda).await {
        Ok(outcome) => Ok(Action::requeue(outcome.requeue_after)),
        Err(e) => {
            error!("Failed to reconcile DatadogAgent {}: {}", dda.name_any(), e);
            Err(anyhow::Error::from(e).into())
        }
    }
}

/// Error policy for controller
fn error_policy(_resource: Arc<DatadogAgent>, _err: &ReconcileError, _ctx: Arc<Context>) -> Action {
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_SECS))
}

fn health_router(readiness: Readiness) -> Router {
    Router::new()
        .route(METRICS_PATH, get(metrics))
        .route(HEALTHZ_PATH, get(|| async { "ok" }))
        .route(READYZ_PATH, get(ready))
        .with_state(readiness)
}

async fn serve_health(addr: SocketAddr, readiness: Readiness) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Serving metrics and health probes");
    axum::serve(listener, health_router(readiness)).await?;
    Ok(())
}

async fn metrics() -> impl IntoResponse {
    match gather_metrics() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn ready(State(readiness): State<Readiness>) -> StatusCode {
    if readiness.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod main_tests;
