mod audit;
mod catalog;
mod config;
mod diff;
mod eligibility;
mod fingerprint;
mod http;
mod images;
mod metrics;
mod models;
mod notify;
mod reconcile;
mod snapshot;
mod source;
mod sync;
mod uploads;

use catalog::{CatalogClient, SpreeClient};
use clap::{Parser, Subcommand};
use config::{Environment, ImageConfig, SyncConfig};
use eyre::{WrapErr, bail, eyre};
use images::{ImageFolder, ImageLocator, NoImages};
use notify::{CrashReporter, notifier_from_config};
use reconcile::{ProductFilter, ReconcileOptions};
use snapshot::SnapshotStore;
use source::{ExportSource, fetch_inventory};
use std::{any::Any, path::PathBuf, sync::Arc};
use sync::SyncContext;
use tracing::{Instrument, error, info, info_span};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

/// Mirrors the legacy inventory into the web store catalog.
#[derive(Debug, Parser)]
#[command(name = "stock-catalog-sync", version)]
struct Cli {
    /// Deployment to run against.
    #[arg(value_enum)]
    env: Environment,

    /// Directory holding `config_<env>.yml`.
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Push inventory changes to the catalog (default).
    Sync {
        /// Forget the previous snapshots first, so every record counts as new.
        #[arg(long)]
        bootstrap: bool,
    },
    /// List published records that could not be created in the catalog.
    Audit,
    /// Send a test notice to the crash reporter.
    TestNotice,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    let _ = dotenvy::dotenv();
    init_tracing();

    let environment = cli.env;
    let config = SyncConfig::load(environment, &cli.config_dir)
        .wrap_err_with(|| format!("loading {environment} configuration"))?;
    let reporter = config
        .crash_reports
        .clone()
        .map(|reports| CrashReporter::new(reports, environment, &config.http));

    let command = cli.command.unwrap_or(Command::Sync { bootstrap: false });
    let run_id = Uuid::new_v4();
    let span = info_span!("run", %run_id, %environment, ?command);
    let outcome = tokio::spawn(execute(command, environment, config).instrument(span)).await;

    let (error_class, message) = match outcome {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(err)) => ("SyncError", format!("{err:#}")),
        Err(join) if join.is_panic() => ("Panic", panic_message(join.into_panic())),
        Err(join) => ("Cancelled", join.to_string()),
    };
    error!(target = "catalog_sync.main", %run_id, error_class, error = %message, "run_failed");
    if let Some(reporter) = &reporter {
        reporter.report(error_class, &message).await;
    }
    Err(eyre!("{error_class}: {message}"))
}

async fn execute(
    command: Command,
    environment: Environment,
    config: SyncConfig,
) -> eyre::Result<()> {
    match command {
        Command::Sync { bootstrap } => sync_once(environment, &config, bootstrap).await,
        Command::Audit => run_audit(&config).await,
        Command::TestNotice => send_test_notice(environment, &config).await,
    }
}

async fn sync_once(
    environment: Environment,
    config: &SyncConfig,
    bootstrap: bool,
) -> eyre::Result<()> {
    let store = SnapshotStore::new(config.snapshots.dir.clone(), environment);
    if bootstrap {
        sync::bootstrap(&store)?;
    }
    let catalog: Arc<dyn CatalogClient> = Arc::new(SpreeClient::new(&config.catalog, &config.http));
    let images = image_locator(&config.images);
    let filter = ProductFilter::load(config.valid_products_path.as_deref());
    let notifier = notifier_from_config(&config.notifications, &config.http);
    let mut source = ExportSource::new(config.inventory.export_path.clone());

    info!(
        target = "catalog_sync.main",
        catalog = %config.catalog.base_url,
        export = %source.path().display(),
        "sync_started"
    );
    let ctx = SyncContext {
        environment,
        store: &store,
        catalog,
        images: images.as_ref(),
        filter: &filter,
        notifier: notifier.as_ref(),
        options: ReconcileOptions {
            only_with_images: config.images.only_with_images,
            upload_workers: config.images.upload_workers,
        },
    };
    sync::run_sync(ctx, &mut source).await?;
    Ok(())
}

async fn run_audit(config: &SyncConfig) -> eyre::Result<()> {
    let images = image_locator(&config.images);
    let filter = ProductFilter::load(config.valid_products_path.as_deref());
    let mut source = ExportSource::new(config.inventory.export_path.clone());
    let inventory = fetch_inventory(&mut source).await?;
    let findings = audit::audit_records(&inventory.stock, images.as_ref(), &filter);
    audit::log_findings(&findings);
    Ok(())
}

async fn send_test_notice(environment: Environment, config: &SyncConfig) -> eyre::Result<()> {
    let Some(reports) = config.crash_reports.clone() else {
        bail!("crash_reports is not configured for {environment}");
    };
    let reporter = CrashReporter::new(reports, environment, &config.http);
    if !reporter
        .report("TestNotice", "Test notice from stock-catalog-sync")
        .await
    {
        bail!("crash reporter did not accept the test notice");
    }
    info!(target = "catalog_sync.main", "test_notice_sent");
    Ok(())
}

fn image_locator(config: &ImageConfig) -> Box<dyn ImageLocator> {
    match &config.folder {
        Some(folder) => Box::new(ImageFolder::new(folder.clone())),
        None => Box::new(NoImages),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|text| text.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "run panicked".to_string())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
