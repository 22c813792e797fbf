//! poolshift operator - migrates workloads between node pools

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use kube::{Api, Client, CustomResourceExt};
use tokio_util::sync::CancellationToken;

use poolshift::access::{ClusterAccess, KubeconfigAccess};
use poolshift::controller::{self, Context};
use poolshift::crd::WorkloadMigration;
use poolshift::pipeline::{MigrationPipeline, MigrationReport};
use poolshift::telemetry::{init_tracing, LogFormat, TelemetryConfig};

/// poolshift - CRD-driven operator that migrates workloads between node pools
#[derive(Parser, Debug)]
#[command(name = "poolshift", version, about, long_about = None)]
struct Cli {
    /// Print the WorkloadMigration CRD and exit
    #[arg(long)]
    crd: bool,

    /// Log output format
    #[arg(long, value_enum, env = "POOLSHIFT_LOG_FORMAT", default_value = "json", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Installs the CRD, then reconciles every WorkloadMigration it sees.
    Controller(ControllerArgs),

    /// Execute one migration pass from a file and exit
    ///
    /// Exits non-zero if validation or any update fails. Readiness timeouts
    /// are reported but do not fail the run.
    Run(RunArgs),
}

/// Controller mode arguments
#[derive(Parser, Debug)]
struct ControllerArgs {
    /// Only watch WorkloadMigrations in this namespace
    #[arg(long)]
    namespace: Option<String>,

    /// Seconds between readiness checks
    #[arg(
        long,
        env = "POOLSHIFT_POLL_INTERVAL_SECS",
        default_value = "5",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    poll_interval_secs: u64,

    /// Seconds before a failed migration with retryOnError is retried
    #[arg(
        long,
        env = "POOLSHIFT_RETRY_DELAY_SECS",
        default_value = "30",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    retry_delay_secs: u64,
}

impl ControllerArgs {
    /// Arguments for controller mode when no subcommand is given
    ///
    /// Parsed through clap so env var fallbacks and defaults still apply.
    fn from_env() -> Result<Self, clap::Error> {
        Self::try_parse_from(["poolshift"])
    }
}

/// One-shot run arguments
#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to a WorkloadMigration YAML file
    #[arg(short = 'f', long = "file")]
    file: PathBuf,

    /// Log intended changes without writing or waiting
    #[arg(long)]
    dry_run: bool,

    /// Seconds between readiness checks
    #[arg(
        long,
        env = "POOLSHIFT_POLL_INTERVAL_SECS",
        default_value = "5",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    poll_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&WorkloadMigration::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_tracing(TelemetryConfig::with_format(cli.log_format))?;

    match cli.command {
        Some(Commands::Run(args)) => run_once(args).await,
        Some(Commands::Controller(args)) => run_controller(args).await,
        None => run_controller(ControllerArgs::from_env()?).await,
    }
}

/// Cancel `token` on SIGINT or SIGTERM
fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "cannot listen for SIGTERM, using ctrl-c only");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        tracing::info!("shutdown signal received");
        token.cancel();
    });
}

/// Ensure the WorkloadMigration CRD is installed
///
/// The operator installs its own CRD on startup using server-side apply.
/// This ensures the CRD version always matches the operator version.
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(poolshift::client::FIELD_MANAGER).force();

    tracing::info!("Installing WorkloadMigration CRD...");
    crds.patch(
        "workloadmigrations.poolshift.dev",
        &params,
        &Patch::Apply(&WorkloadMigration::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install WorkloadMigration CRD: {}", e))?;

    Ok(())
}

/// Run in controller mode
async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crd_installed(&client).await?;

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());

    let ctx = Arc::new(
        Context::builder()
            .poll_interval(Duration::from_secs(args.poll_interval_secs))
            .retry_delay(Duration::from_secs(args.retry_delay_secs))
            .shutdown(shutdown)
            .build(),
    );

    controller::run(client, args.namespace.as_deref(), ctx).await;
    Ok(())
}

/// Run one migration pass from a file
async fn run_once(args: RunArgs) -> anyhow::Result<()> {
    let content = tokio::fs::read_to_string(&args.file)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read {:?}: {}", args.file, e))?;
    let migration: WorkloadMigration = serde_yaml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse WorkloadMigration: {}", e))?;

    let mut spec = migration.spec;
    if args.dry_run {
        spec.test_mode = true;
    }
    spec.validate()?;

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());

    let client = KubeconfigAccess::new()
        .client_for(&spec.cluster_ref())
        .await?;
    let pipeline = MigrationPipeline::new(client, shutdown)
        .with_poll_interval(Duration::from_secs(args.poll_interval_secs));

    let mut report = MigrationReport::new();
    let result = pipeline.run(&spec, &mut report).await;
    report.log_summary();
    result?;
    Ok(())
}
